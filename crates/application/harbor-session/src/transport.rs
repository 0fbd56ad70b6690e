use async_trait::async_trait;
use harbor_core::{DevSessionPayload, UserError};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;

/// Parameters for requesting a signed upload URL. The platform keys the
/// upload slot on the app, so the app id doubles as both `api_key` and `id`.
#[derive(Debug, Clone)]
pub struct UploadTargetParams {
    pub api_key: String,
    pub organization_id: String,
    pub id: String,
}

/// Result of a create/update mutation. An empty `user_errors` means the
/// session was accepted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationOutcome {
    #[serde(default)]
    pub user_errors: Vec<UserError>,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Raw HTTP failure, e.g. an expired token rejected with 401 before the
    /// request reached the mutation layer.
    #[error("platform request failed with status {status}")]
    Http { status: u16 },
    /// Structured client error carrying the platform's response body.
    #[error("platform client error {status}")]
    Client { status: u16, body: String },
    #[error("{0}")]
    Other(String),
}

/// Remote operations the dev session relies on. Implemented over the
/// platform API; faked in tests.
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Request a signed, time-limited URL the bundle archive can be PUT to.
    async fn upload_target(&self, params: UploadTargetParams) -> Result<String, TransportError>;

    async fn dev_session_create(
        &self,
        payload: DevSessionPayload,
    ) -> Result<MutationOutcome, TransportError>;

    async fn dev_session_update(
        &self,
        payload: DevSessionPayload,
    ) -> Result<MutationOutcome, TransportError>;

    /// Recovery action for expired credentials; the next call is expected
    /// to succeed afterwards.
    async fn refresh_token(&self) -> Result<(), TransportError>;
}

#[derive(Debug, Deserialize)]
struct UploadTargetResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
}

/// HTTP implementation of `SessionTransport` against the developer platform.
///
/// Holds the current bearer token behind a lock so `refresh_token` can swap
/// it while calls are in flight.
pub struct HttpSessionTransport {
    client: Client,
    base_url: String,
    token_url: String,
    token: RwLock<String>,
}

impl HttpSessionTransport {
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        token_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token_url: token_url.into(),
            token: RwLock::new(token.into()),
        }
    }

    async fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::Response, TransportError> {
        let token = self.token.read().await.clone();
        let url = format!("{}/{path}", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        Self::check_status(resp).await
    }

    /// Map non-success responses into the error taxonomy: a bare 401 is the
    /// "token expired" shape; other 4xx carry their body as a client error;
    /// everything else stays generic.
    async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, TransportError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::UNAUTHORIZED {
            return Err(TransportError::Http { status: 401 });
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_client_error() {
            return Err(TransportError::Client {
                status: status.as_u16(),
                body,
            });
        }
        Err(TransportError::Other(format!(
            "platform responded with status {status}"
        )))
    }

    async fn mutation(
        &self,
        path: &str,
        payload: &DevSessionPayload,
    ) -> Result<MutationOutcome, TransportError> {
        let resp = self.post_json(path, payload).await?;
        resp.json::<MutationOutcome>()
            .await
            .map_err(|e| TransportError::Other(format!("malformed mutation response: {e}")))
    }
}

#[async_trait]
impl SessionTransport for HttpSessionTransport {
    async fn upload_target(&self, params: UploadTargetParams) -> Result<String, TransportError> {
        let body = serde_json::json!({
            "apiKey": params.api_key,
            "organizationId": params.organization_id,
            "id": params.id,
        });
        let resp = self.post_json("upload-targets", &body).await?;
        let target: UploadTargetResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Other(format!("malformed upload target response: {e}")))?;
        Ok(target.url)
    }

    async fn dev_session_create(
        &self,
        payload: DevSessionPayload,
    ) -> Result<MutationOutcome, TransportError> {
        self.mutation("dev-sessions/create", &payload).await
    }

    async fn dev_session_update(
        &self,
        payload: DevSessionPayload,
    ) -> Result<MutationOutcome, TransportError> {
        self.mutation("dev-sessions/update", &payload).await
    }

    async fn refresh_token(&self) -> Result<(), TransportError> {
        debug!("refreshing platform token");
        let resp = self
            .client
            .post(&self.token_url)
            .send()
            .await
            .map_err(|e| TransportError::Other(e.to_string()))?;
        let resp = Self::check_status(resp).await?;
        let refreshed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| TransportError::Other(format!("malformed token response: {e}")))?;
        *self.token.write().await = refreshed.token;
        Ok(())
    }
}
