use serde::Deserialize;

/// Claims pulled from the identity token. The server only cares about
/// `sub` (provisioning key), `iss` and `aud` (validated per mode); any
/// other claim is the token issuer's business, not ours.
#[derive(Debug, Clone, Deserialize)]
pub struct IdentityClaims {
    pub sub: String,
    #[serde(default)]
    pub iss: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
}
