//! Shared types for the sync backend: entity kinds, the wire envelope, and
//! the portable error taxonomy used by every crate above storage.

mod error;
mod kind;
mod time;

pub mod envelope;

pub use error::Error;
pub use kind::EntityKind;
pub use time::{now_ms, rfc3339_millis, try_parse_rfc3339_ms};

pub type Result<T> = std::result::Result<T, Error>;
