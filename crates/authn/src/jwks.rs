use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use tokio::sync::{Mutex, RwLock};

use sync_domain::Error;

use crate::claims::IdentityClaims;

const REFRESH_INTERVAL: Duration = Duration::from_secs(60 * 60);

struct CachedSet {
    keys: JwkSet,
    fetched_at: Instant,
}

/// Caches the JWKS document for an OIDC issuer. Refreshed periodically and
/// refetched once, single-flight, when a token names a `kid` we don't
/// recognize — covers key rotation without hammering the issuer.
pub struct JwksCache {
    jwks_url: String,
    http: reqwest::Client,
    cached: RwLock<Option<CachedSet>>,
    refetch_lock: Mutex<()>,
}

impl JwksCache {
    pub fn new(jwks_url: impl Into<String>) -> Self {
        JwksCache {
            jwks_url: jwks_url.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with static config"),
            cached: RwLock::new(None),
            refetch_lock: Mutex::new(()),
        }
    }

    async fn fetch(&self) -> Result<JwkSet, Error> {
        let response = self
            .http
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| Error::internal(format!("jwks fetch failed: {e}")))?;
        response
            .json::<JwkSet>()
            .await
            .map_err(|e| Error::internal(format!("jwks decode failed: {e}")))
    }

    async fn refresh(&self) -> Result<(), Error> {
        let keys = self.fetch().await?;
        *self.cached.write().await = Some(CachedSet {
            keys,
            fetched_at: Instant::now(),
        });
        Ok(())
    }

    async fn find_key(&self, kid: Option<&str>) -> Result<Option<Jwk>, Error> {
        {
            let guard = self.cached.read().await;
            if let Some(set) = guard.as_ref() {
                if set.fetched_at.elapsed() < REFRESH_INTERVAL {
                    if let Some(jwk) = lookup(&set.keys, kid) {
                        return Ok(Some(jwk));
                    }
                }
            }
        }

        // Either stale or the kid is unknown: refetch, but collapse
        // concurrent misses into a single request.
        let _guard = self.refetch_lock.lock().await;
        {
            // Another waiter may have already refreshed while we queued.
            let guard = self.cached.read().await;
            if let Some(set) = guard.as_ref() {
                if set.fetched_at.elapsed() < REFRESH_INTERVAL {
                    if let Some(jwk) = lookup(&set.keys, kid) {
                        return Ok(Some(jwk));
                    }
                }
            }
        }
        self.refresh().await?;
        let guard = self.cached.read().await;
        Ok(guard.as_ref().and_then(|set| lookup(&set.keys, kid)))
    }

    /// Verifies a token's signature and decodes its claims against the
    /// matching JWK. Issuer is always checked; audience is checked unless
    /// `enforce_audience` is false (dynamic-client-registration mode).
    pub async fn verify(
        &self,
        token: &str,
        issuer: &str,
        audience: Option<&str>,
        enforce_audience: bool,
    ) -> Result<IdentityClaims, Error> {
        let header = jsonwebtoken::decode_header(token).map_err(|_| Error::Unauthenticated)?;
        if !algorithm_is_asymmetric(header.alg) {
            return Err(Error::Unauthenticated);
        }
        let jwk = self
            .find_key(header.kid.as_deref())
            .await?
            .ok_or(Error::Unauthenticated)?;

        let decoding_key = decoding_key_from_jwk(&jwk)?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[issuer]);
        if enforce_audience {
            if let Some(aud) = audience {
                validation.set_audience(&[aud]);
            }
        } else {
            validation.validate_aud = false;
        }

        let data = decode::<IdentityClaims>(token, &decoding_key, &validation)
            .map_err(|_| Error::Unauthenticated)?;
        Ok(data.claims)
    }
}

fn lookup(set: &JwkSet, kid: Option<&str>) -> Option<Jwk> {
    match kid {
        Some(kid) => set.find(kid).cloned(),
        None => set.keys.first().cloned(),
    }
}

fn decoding_key_from_jwk(jwk: &Jwk) -> Result<DecodingKey, Error> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
            .map_err(|_| Error::internal("malformed RSA JWK")),
        AlgorithmParameters::EllipticCurve(ec) => DecodingKey::from_ec_components(&ec.x, &ec.y)
            .map_err(|_| Error::internal("malformed EC JWK")),
        _ => Err(Error::internal("unsupported JWK algorithm")),
    }
}

/// JWKS-sourced keys are always RSA or EC; a header naming an HMAC
/// algorithm can never match one and is rejected before the lookup.
fn algorithm_is_asymmetric(alg: Algorithm) -> bool {
    !matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}
