//! Environment-driven configuration. Every field has a named `SYNC_*`
//! variable; nothing is read positionally or from a config file, matching
//! the deployment's "surrounding glue is excluded" stance — this crate is
//! the one piece of that glue the core actually needs.

mod error;

pub use error::{ConfigError, Result};

use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityModeConfig {
    Oidc,
    Symmetric,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub storage_dsn: String,
    pub bind_rest: String,
    pub bind_rpc: String,

    pub identity_mode: IdentityModeConfig,
    pub identity_issuer: String,
    pub identity_jwks_url: Option<String>,
    pub identity_audience: Option<String>,
    pub identity_enforce_audience: bool,
    pub identity_symmetric_secret: Option<String>,

    pub default_tenant_id: String,
    pub default_tenant_name: String,
    pub org_directory_base_url: Option<String>,
    pub org_directory_api_key: Option<String>,

    pub dev_mode: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let identity_mode = match env_or(
            "SYNC_IDENTITY_MODE",
            "oidc",
        )
        .to_ascii_lowercase()
        .as_str()
        {
            "oidc" => IdentityModeConfig::Oidc,
            "symmetric" => IdentityModeConfig::Symmetric,
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "SYNC_IDENTITY_MODE".into(),
                    reason: format!("expected `oidc` or `symmetric`, got `{other}`"),
                })
            }
        };

        let dev_mode = env_bool("SYNC_DEV_MODE", false)?;

        if identity_mode == IdentityModeConfig::Oidc && env::var("SYNC_IDENTITY_JWKS_URL").is_err() && !dev_mode {
            return Err(ConfigError::MissingEnv("SYNC_IDENTITY_JWKS_URL".into()));
        }
        if identity_mode == IdentityModeConfig::Symmetric && env::var("SYNC_IDENTITY_SYMMETRIC_SECRET").is_err() {
            return Err(ConfigError::MissingEnv("SYNC_IDENTITY_SYMMETRIC_SECRET".into()));
        }

        Ok(AppConfig {
            storage_dsn: required("SYNC_STORAGE_DSN")?,
            bind_rest: env_or("SYNC_BIND_REST", "0.0.0.0:8080"),
            bind_rpc: env_or("SYNC_BIND_RPC", "0.0.0.0:8081"),

            identity_mode,
            identity_issuer: env_or("SYNC_IDENTITY_ISSUER", ""),
            identity_jwks_url: env::var("SYNC_IDENTITY_JWKS_URL").ok(),
            identity_audience: env::var("SYNC_IDENTITY_AUDIENCE").ok(),
            identity_enforce_audience: env_bool("SYNC_IDENTITY_ENFORCE_AUDIENCE", true)?,
            identity_symmetric_secret: env::var("SYNC_IDENTITY_SYMMETRIC_SECRET").ok(),

            default_tenant_id: env_or("SYNC_DEFAULT_TENANT_ID", "default-b2c"),
            default_tenant_name: env_or("SYNC_DEFAULT_TENANT_NAME", "Default"),
            org_directory_base_url: env::var("SYNC_ORG_DIRECTORY_BASE_URL").ok(),
            org_directory_api_key: env::var("SYNC_ORG_DIRECTORY_API_KEY").ok(),

            dev_mode,
        })
    }
}

fn required(key: &str) -> Result<String> {
    env::var(key).map_err(|_| ConfigError::MissingEnv(key.to_string()))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match env::var(key) {
        Err(_) => Ok(default),
        Ok(v) => match v.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            other => Err(ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("expected a boolean, got `{other}`"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_sync_env() {
        for (key, _) in env::vars() {
            if key.starts_with("SYNC_") {
                env::remove_var(key);
            }
        }
    }

    #[test]
    fn missing_storage_dsn_is_an_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_sync_env();
        env::set_var("SYNC_IDENTITY_MODE", "symmetric");
        env::set_var("SYNC_IDENTITY_SYMMETRIC_SECRET", "secret");

        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(k) if k == "SYNC_STORAGE_DSN"));
    }

    #[test]
    fn symmetric_mode_requires_secret() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_sync_env();
        env::set_var("SYNC_STORAGE_DSN", "sqlite::memory:");
        env::set_var("SYNC_IDENTITY_MODE", "symmetric");

        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(k) if k == "SYNC_IDENTITY_SYMMETRIC_SECRET"));
    }

    #[test]
    fn loads_a_complete_symmetric_config() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_sync_env();
        env::set_var("SYNC_STORAGE_DSN", "sqlite::memory:");
        env::set_var("SYNC_IDENTITY_MODE", "symmetric");
        env::set_var("SYNC_IDENTITY_SYMMETRIC_SECRET", "secret");

        let config = AppConfig::from_env().unwrap();
        assert_eq!(config.identity_mode, IdentityModeConfig::Symmetric);
        assert_eq!(config.default_tenant_id, "default-b2c");
        assert!(!config.dev_mode);
    }

    #[test]
    fn rejects_unknown_identity_mode() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_sync_env();
        env::set_var("SYNC_STORAGE_DSN", "sqlite::memory:");
        env::set_var("SYNC_IDENTITY_MODE", "bogus");

        let err = AppConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
