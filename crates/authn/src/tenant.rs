use std::sync::Arc;

use sync_domain::Error;

use crate::directory::OrgDirectory;

#[derive(Debug, Clone)]
pub struct TenantOption {
    pub tenant_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub struct TenantResolution {
    pub tenants: Vec<TenantOption>,
    pub requires_selection: bool,
}

/// Resolves and authorizes the `(tenant_id, user)` pair. If no directory is
/// configured, authorization is fail-closed: only the default tenant is
/// ever accepted, so a misconfigured deployment never silently widens
/// access.
#[derive(Clone)]
pub struct TenantResolver {
    directory: Option<Arc<dyn OrgDirectory>>,
    default_tenant_id: String,
    default_tenant_name: String,
}

impl TenantResolver {
    pub fn new(
        directory: Option<Arc<dyn OrgDirectory>>,
        default_tenant_id: impl Into<String>,
        default_tenant_name: impl Into<String>,
    ) -> Self {
        TenantResolver {
            directory,
            default_tenant_id: default_tenant_id.into(),
            default_tenant_name: default_tenant_name.into(),
        }
    }

    fn default_option(&self) -> TenantOption {
        TenantOption {
            tenant_id: self.default_tenant_id.clone(),
            display_name: self.default_tenant_name.clone(),
        }
    }

    /// Backs `GET /v1/auth/tenant`.
    pub async fn resolve(&self, subject: &str) -> Result<TenantResolution, Error> {
        let Some(directory) = &self.directory else {
            return Ok(TenantResolution {
                tenants: vec![self.default_option()],
                requires_selection: false,
            });
        };

        let memberships = directory.memberships(subject).await?;
        match memberships.len() {
            0 => Ok(TenantResolution {
                tenants: vec![self.default_option()],
                requires_selection: false,
            }),
            1 => {
                let m = &memberships[0];
                Ok(TenantResolution {
                    tenants: vec![TenantOption {
                        tenant_id: m.tenant_id.clone(),
                        display_name: m.display_name.clone(),
                    }],
                    requires_selection: false,
                })
            }
            _ => Ok(TenantResolution {
                tenants: memberships
                    .into_iter()
                    .map(|m| TenantOption {
                        tenant_id: m.tenant_id,
                        display_name: m.display_name,
                    })
                    .collect(),
                requires_selection: true,
            }),
        }
    }

    /// Authorizes a declared tenant on a data-plane request.
    pub async fn authorize(&self, subject: &str, declared_tenant: &str) -> Result<(), Error> {
        let Some(directory) = &self.directory else {
            return if declared_tenant == self.default_tenant_id {
                Ok(())
            } else {
                Err(Error::Forbidden {
                    tenant: declared_tenant.to_string(),
                })
            };
        };

        if declared_tenant == self.default_tenant_id {
            return Ok(());
        }

        let memberships = directory.memberships(subject).await?;
        if memberships.iter().any(|m| m.tenant_id == declared_tenant) {
            Ok(())
        } else {
            Err(Error::Forbidden {
                tenant: declared_tenant.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::{FakeOrgDirectory, TenantMembership};

    fn resolver_with(memberships: Vec<TenantMembership>) -> TenantResolver {
        TenantResolver::new(
            Some(Arc::new(FakeOrgDirectory { memberships })),
            "default-b2c",
            "Default",
        )
    }

    #[tokio::test]
    async fn zero_memberships_resolves_to_default_without_selection() {
        let resolver = resolver_with(vec![]);
        let resolution = resolver.resolve("alice").await.unwrap();
        assert!(!resolution.requires_selection);
        assert_eq!(resolution.tenants[0].tenant_id, "default-b2c");
    }

    #[tokio::test]
    async fn single_membership_resolves_without_selection() {
        let resolver = resolver_with(vec![TenantMembership {
            tenant_id: "acme".into(),
            display_name: "Acme".into(),
        }]);
        let resolution = resolver.resolve("alice").await.unwrap();
        assert!(!resolution.requires_selection);
        assert_eq!(resolution.tenants[0].tenant_id, "acme");
    }

    #[tokio::test]
    async fn multiple_memberships_require_selection() {
        let resolver = resolver_with(vec![
            TenantMembership { tenant_id: "acme".into(), display_name: "Acme".into() },
            TenantMembership { tenant_id: "globex".into(), display_name: "Globex".into() },
        ]);
        let resolution = resolver.resolve("alice").await.unwrap();
        assert!(resolution.requires_selection);
        assert_eq!(resolution.tenants.len(), 2);
    }

    #[tokio::test]
    async fn authorize_accepts_default_tenant_even_without_membership() {
        let resolver = resolver_with(vec![]);
        assert!(resolver.authorize("alice", "default-b2c").await.is_ok());
    }

    #[tokio::test]
    async fn authorize_rejects_unlisted_tenant() {
        let resolver = resolver_with(vec![TenantMembership {
            tenant_id: "acme".into(),
            display_name: "Acme".into(),
        }]);
        assert!(resolver.authorize("alice", "globex").await.is_err());
    }

    #[tokio::test]
    async fn fail_closed_when_directory_unconfigured() {
        let resolver = TenantResolver::new(None, "default-b2c", "Default");
        assert!(resolver.authorize("alice", "default-b2c").await.is_ok());
        assert!(resolver.authorize("alice", "anything-else").await.is_err());
    }
}
