//! Pagination cursors. A cursor is the opaque wire form of the pair
//! `(updated_at_ms, uid)` of the last row on a page — never constructed by
//! concatenation anywhere outside this module.

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use sync_domain::Error;
use uuid::Uuid;

/// The logical value behind an opaque cursor token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Cursor {
    pub updated_at_ms: i64,
    pub uid: Uuid,
}

impl Cursor {
    pub fn new(updated_at_ms: i64, uid: Uuid) -> Self {
        Cursor { updated_at_ms, uid }
    }
}

/// Encodes and decodes cursor tokens. Kept as a trait (rather than bare
/// functions) so callers depend on a named codec, not ad hoc base64 calls.
pub trait CursorCodec {
    fn encode(&self, cursor: Cursor) -> String;
    fn decode(&self, token: &str) -> Result<Cursor, Error>;
}

/// The one codec implementation used in production: base64 of
/// `"<unix_ms>|<uid>"`. Decoding accepts both standard and URL-safe
/// alphabets, with or without padding, since clients must treat the token
/// as opaque and some base64 libraries default to the URL-safe variant.
#[derive(Debug, Clone, Copy, Default)]
pub struct Base64Codec;

impl CursorCodec for Base64Codec {
    fn encode(&self, cursor: Cursor) -> String {
        let raw = format!("{}|{}", cursor.updated_at_ms, cursor.uid);
        STANDARD_NO_PAD.encode(raw.as_bytes())
    }

    fn decode(&self, token: &str) -> Result<Cursor, Error> {
        let bytes = STANDARD
            .decode(token)
            .or_else(|_| STANDARD_NO_PAD.decode(token))
            .or_else(|_| URL_SAFE.decode(token))
            .or_else(|_| URL_SAFE_NO_PAD.decode(token))
            .map_err(|_| Error::validation("malformed cursor"))?;

        let raw = String::from_utf8(bytes).map_err(|_| Error::validation("malformed cursor"))?;
        let (ms_str, uid_str) = raw
            .split_once('|')
            .ok_or_else(|| Error::validation("malformed cursor"))?;

        let updated_at_ms: i64 = ms_str
            .parse()
            .map_err(|_| Error::validation("malformed cursor"))?;
        let uid: Uuid = uid_str
            .parse()
            .map_err(|_| Error::validation("malformed cursor"))?;

        Ok(Cursor { updated_at_ms, uid })
    }
}

/// Decodes an optional cursor parameter: `None` or an empty string both
/// mean "from the beginning".
pub fn decode_optional(codec: &impl CursorCodec, token: Option<&str>) -> Result<Option<Cursor>, Error> {
    match token {
        None => Ok(None),
        Some(t) if t.is_empty() => Ok(None),
        Some(t) => codec.decode(t).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_standard() {
        let codec = Base64Codec;
        let uid = Uuid::new_v4();
        let cursor = Cursor::new(1_730_628_000_123, uid);
        let token = codec.encode(cursor);
        assert_eq!(codec.decode(&token).unwrap(), cursor);
    }

    #[test]
    fn decodes_url_safe_tokens_too() {
        let codec = Base64Codec;
        let uid = Uuid::new_v4();
        let raw = format!("{}|{}", 42i64, uid);
        let url_safe_token = URL_SAFE_NO_PAD.encode(raw.as_bytes());
        let decoded = codec.decode(&url_safe_token).unwrap();
        assert_eq!(decoded, Cursor::new(42, uid));
    }

    #[test]
    fn rejects_malformed_tokens() {
        let codec = Base64Codec;
        assert!(codec.decode("not valid base64!!").is_err());
        let bogus = STANDARD_NO_PAD.encode(b"no-pipe-here");
        assert!(codec.decode(&bogus).is_err());
    }

    #[test]
    fn empty_and_absent_cursor_both_mean_start() {
        let codec = Base64Codec;
        assert_eq!(decode_optional(&codec, None).unwrap(), None);
        assert_eq!(decode_optional(&codec, Some("")).unwrap(), None);
    }

    #[test]
    fn ordering_matches_composite_key_semantics() {
        let a = Cursor::new(100, Uuid::nil());
        let b = Cursor::new(100, Uuid::max());
        let c = Cursor::new(101, Uuid::nil());
        assert!(a < b);
        assert!(b < c);
    }
}
