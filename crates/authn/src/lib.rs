//! Identity verification and tenant resolution/authorization.
//!
//! Three authentication mechanisms are supported, selected by
//! configuration: asymmetric (OIDC/JWKS), symmetric (HS256 shared secret),
//! and a dev-only subject header. The dev header is refused outright
//! whenever `dev_mode` is off — there is no code path that honors it
//! "somewhat"; either the deployment is a dev deployment or the header is
//! inert.

mod claims;
mod directory;
mod jwks;
mod tenant;

pub use claims::IdentityClaims;
pub use directory::{FakeOrgDirectory, HttpOrgDirectory, OrgDirectory, TenantMembership};
pub use jwks::JwksCache;
pub use tenant::{TenantOption, TenantResolution, TenantResolver};

use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use sync_domain::Error;
use sync_storage::{Storage, User};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    Oidc,
    Symmetric,
}

#[derive(Debug, Clone)]
pub struct AuthnConfig {
    pub mode: IdentityMode,
    pub issuer: String,
    pub audience: Option<String>,
    /// Dynamic-client-registration mode: issuer/signature still enforced,
    /// audience is not.
    pub enforce_audience: bool,
    pub symmetric_secret: Option<String>,
    pub dev_mode: bool,
}

pub struct AuthnService {
    config: AuthnConfig,
    jwks: Option<JwksCache>,
    storage: Storage,
}

impl AuthnService {
    pub fn new(config: AuthnConfig, jwks_url: Option<&str>, storage: Storage) -> Self {
        let jwks = match config.mode {
            IdentityMode::Oidc => jwks_url.map(JwksCache::new),
            IdentityMode::Symmetric => None,
        };
        AuthnService { config, jwks, storage }
    }

    /// Verifies the bearer token (or the dev-mode header, if permitted)
    /// and provisions/looks up the corresponding user row.
    pub async fn authenticate(
        &self,
        bearer_token: Option<&str>,
        dev_subject_header: Option<&str>,
    ) -> Result<User, Error> {
        let subject = if let Some(subject) = dev_subject_header {
            if !self.config.dev_mode {
                return Err(Error::Unauthenticated);
            }
            subject.to_string()
        } else {
            let token = bearer_token.ok_or(Error::Unauthenticated)?;
            self.verify_token(token).await?.sub
        };

        sync_storage::find_or_create_by_subject(self.storage.pool(), &subject).await
    }

    async fn verify_token(&self, token: &str) -> Result<IdentityClaims, Error> {
        match self.config.mode {
            IdentityMode::Oidc => {
                let jwks = self.jwks.as_ref().ok_or_else(|| Error::internal("JWKS not configured"))?;
                jwks.verify(
                    token,
                    &self.config.issuer,
                    self.config.audience.as_deref(),
                    self.config.enforce_audience,
                )
                .await
            }
            IdentityMode::Symmetric => {
                let secret = self
                    .config
                    .symmetric_secret
                    .as_deref()
                    .ok_or_else(|| Error::internal("symmetric secret not configured"))?;
                let key = DecodingKey::from_secret(secret.as_bytes());
                let mut validation = Validation::new(Algorithm::HS256);
                validation.set_issuer(&[&self.config.issuer]);
                validation.validate_aud = false;
                decode::<IdentityClaims>(token, &key, &validation)
                    .map(|d| d.claims)
                    .map_err(|_| Error::Unauthenticated)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use sync_storage::StorageConfig;

    #[derive(serde::Serialize)]
    struct Claims<'a> {
        sub: &'a str,
        iss: &'a str,
    }

    async fn symmetric_service() -> AuthnService {
        let storage = Storage::connect(&StorageConfig::in_memory()).await.unwrap();
        let config = AuthnConfig {
            mode: IdentityMode::Symmetric,
            issuer: "https://issuer.example".into(),
            audience: None,
            enforce_audience: false,
            symmetric_secret: Some("test-secret".into()),
            dev_mode: false,
        };
        AuthnService::new(config, None, storage)
    }

    #[tokio::test]
    async fn symmetric_token_provisions_user() {
        let service = symmetric_service().await;
        let claims = Claims { sub: "alice", iss: "https://issuer.example" };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"test-secret")).unwrap();

        let user = service.authenticate(Some(&token), None).await.unwrap();
        assert_eq!(user.subject, "alice");

        // Second call with a token for the same subject finds the same user.
        let user2 = service.authenticate(Some(&token), None).await.unwrap();
        assert_eq!(user.id, user2.id);
    }

    #[tokio::test]
    async fn bad_signature_is_unauthenticated() {
        let service = symmetric_service().await;
        let claims = Claims { sub: "alice", iss: "https://issuer.example" };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(b"wrong-secret")).unwrap();

        let err = service.authenticate(Some(&token), None).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
    }

    #[tokio::test]
    async fn dev_header_rejected_outside_dev_mode() {
        let service = symmetric_service().await;
        let err = service.authenticate(None, Some("alice")).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
    }

    #[tokio::test]
    async fn dev_header_accepted_in_dev_mode() {
        let storage = Storage::connect(&StorageConfig::in_memory()).await.unwrap();
        let config = AuthnConfig {
            mode: IdentityMode::Symmetric,
            issuer: "https://issuer.example".into(),
            audience: None,
            enforce_audience: false,
            symmetric_secret: Some("test-secret".into()),
            dev_mode: true,
        };
        let service = AuthnService::new(config, None, storage);
        let user = service.authenticate(None, Some("alice")).await.unwrap();
        assert_eq!(user.subject, "alice");
    }

    #[tokio::test]
    async fn missing_credentials_is_unauthenticated() {
        let service = symmetric_service().await;
        let err = service.authenticate(None, None).await.unwrap_err();
        assert!(matches!(err, Error::Unauthenticated));
    }
}
