use async_trait::async_trait;

use sync_domain::Error;

#[derive(Debug, Clone)]
pub struct TenantMembership {
    pub tenant_id: String,
    pub display_name: String,
}

/// The external organization-membership service. Represented as a trait
/// behind a single owner so tests can substitute a fake and a future
/// deployment can swap transports without touching the resolver/authorizer.
#[async_trait]
pub trait OrgDirectory: Send + Sync {
    async fn memberships(&self, subject: &str) -> Result<Vec<TenantMembership>, Error>;
}

/// Real directory client, consulted over HTTP.
pub struct HttpOrgDirectory {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl HttpOrgDirectory {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        HttpOrgDirectory {
            base_url: base_url.into(),
            api_key: api_key.into(),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("reqwest client builds with static config"),
        }
    }
}

#[derive(serde::Deserialize)]
struct MembershipsResponse {
    memberships: Vec<MembershipEntry>,
}

#[derive(serde::Deserialize)]
struct MembershipEntry {
    #[serde(rename = "tenantId")]
    tenant_id: String,
    #[serde(rename = "displayName")]
    display_name: String,
}

#[async_trait]
impl OrgDirectory for HttpOrgDirectory {
    async fn memberships(&self, subject: &str) -> Result<Vec<TenantMembership>, Error> {
        let url = format!("{}/subjects/{subject}/memberships", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| Error::internal(format!("org directory request failed: {e}")))?;

        let body: MembershipsResponse = response
            .json()
            .await
            .map_err(|e| Error::internal(format!("org directory response malformed: {e}")))?;

        Ok(body
            .memberships
            .into_iter()
            .map(|m| TenantMembership {
                tenant_id: m.tenant_id,
                display_name: m.display_name,
            })
            .collect())
    }
}

#[cfg(test)]
pub struct FakeOrgDirectory {
    pub memberships: Vec<TenantMembership>,
}

#[cfg(test)]
#[async_trait]
impl OrgDirectory for FakeOrgDirectory {
    async fn memberships(&self, _subject: &str) -> Result<Vec<TenantMembership>, Error> {
        Ok(self.memberships.clone())
    }
}
