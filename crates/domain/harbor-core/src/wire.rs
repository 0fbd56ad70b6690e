use serde::{Deserialize, Serialize};

/// Payload of the devSessionCreate/devSessionUpdate mutations. `assets_url`
/// is the signed URL the bundle archive was uploaded to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevSessionPayload {
    pub shop_fqdn: String,
    pub app_id: String,
    pub assets_url: String,
}

/// Structured validation failure returned inside an otherwise successful
/// remote response, as opposed to a transport-level error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<Vec<String>>,
    pub category: String,
}

impl UserError {
    pub fn is_validation(&self) -> bool {
        self.category == "validation"
    }
}

/// Outcome of one bundle-and-upload attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevSessionResult {
    Updated,
    Created,
    /// Superseded by a newer generation. Not a failure; logged at debug
    /// level only.
    Aborted,
    /// The remote service accepted the request but rejected its content.
    RemoteError(Vec<UserError>),
    /// An error that matched no recognized transport shape. The session
    /// stays alive and keeps listening for changes.
    UnknownError(String),
}
