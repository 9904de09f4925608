//! HTTP remote container.
//!
//! Talks to a record service over HTTP with CBOR bodies. The actual HTTP
//! client is abstracted via a trait so any library (reqwest, hyper, a
//! platform SDK bridge) can be plugged in.

use crate::error::{SyncError, SyncResult};
use crate::memory::InMemoryContainer;
use crate::remote::RemoteContainer;
use async_trait::async_trait;
use gtdsync_records::{
    AccountStatus, AccountStatusResponse, ChangeNotification, ChangePage, ContainerRequest,
    ErrorBody, FetchRequest, ItemOutcome, RecordRef, RemoteRecord, SubmitRequest, SubmitResponse,
    WireMessage,
};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const ACCOUNT_STATUS: &str = "/account/status";
const ENSURE_CONTAINER: &str = "/container/ensure";
const SUBMIT: &str = "/records/submit";
const FETCH: &str = "/records/fetch";

/// Error code the service sends with a 404 for a missing container.
pub const CONTAINER_MISSING_CODE: &str = "container_missing";

/// A raw HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// A `200 OK` response.
    pub fn ok(body: Vec<u8>) -> Self {
        Self { status: 200, body }
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (DNS, TLS, reset
/// connection) and is treated as a network failure.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Sends a POST request.
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String>;
}

/// Remote container backed by an HTTP record service.
pub struct HttpContainer<C: HttpClient> {
    base_url: String,
    container_id: String,
    client: C,
    notifications: broadcast::Sender<ChangeNotification>,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpContainer<C> {
    /// Creates a container client for `container_id` at `base_url`.
    pub fn new(base_url: impl Into<String>, container_id: impl Into<String>, client: C) -> Self {
        let (notifications, _) = broadcast::channel(64);
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            container_id: container_id.into(),
            client,
            notifications,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport or service error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Forwards a platform push notification to subscribers.
    pub fn notify_remote_change(&self) {
        let _ = self.notifications.send(ChangeNotification {
            container_id: self.container_id.clone(),
        });
    }

    fn container_request(&self) -> ContainerRequest {
        ContainerRequest {
            container_id: self.container_id.clone(),
        }
    }

    async fn send<Req: WireMessage>(&self, endpoint: &str, request: &Req) -> SyncResult<Vec<u8>> {
        let body = request.encode()?;
        let url = format!("{}{}", self.base_url, endpoint);

        let response = match self.client.post(&url, body).await {
            Ok(response) => response,
            Err(message) => {
                *self.last_error.write() = Some(message.clone());
                return Err(SyncError::NetworkFailure(message));
            }
        };

        if response.is_success() {
            *self.last_error.write() = None;
            return Ok(response.body);
        }

        let error = status_error(&response);
        debug!(endpoint, status = response.status, %error, "request failed");
        *self.last_error.write() = Some(error.to_string());
        Err(error)
    }

    async fn call<Req: WireMessage, Res: WireMessage>(
        &self,
        endpoint: &str,
        request: &Req,
    ) -> SyncResult<Res> {
        let body = self.send(endpoint, request).await?;
        Ok(Res::decode(&body)?)
    }
}

/// Maps a non-success response to the engine's error taxonomy.
pub fn status_error(response: &HttpResponse) -> SyncError {
    let body = ErrorBody::decode(&response.body).ok();
    let message = body
        .as_ref()
        .map(|body| body.message.clone())
        .unwrap_or_else(|| format!("HTTP {}", response.status));

    match response.status {
        401 => SyncError::AccountUnavailable(AccountStatus::NoAccount),
        403 => SyncError::AccountUnavailable(AccountStatus::Restricted),
        404 if body
            .as_ref()
            .is_some_and(|body| body.code == CONTAINER_MISSING_CODE) =>
        {
            SyncError::ContainerMissing
        }
        410 => SyncError::CursorExpired,
        429 | 503 => SyncError::QuotaExceeded {
            retry_after: body
                .and_then(|body| body.retry_after_secs)
                .map(Duration::from_secs),
        },
        500..=599 => SyncError::NetworkFailure(message),
        _ => SyncError::Unknown(message),
    }
}

#[async_trait]
impl<C: HttpClient> RemoteContainer for HttpContainer<C> {
    async fn account_status(&self) -> SyncResult<AccountStatus> {
        let response: AccountStatusResponse = self
            .call(ACCOUNT_STATUS, &self.container_request())
            .await?;
        Ok(response.status)
    }

    async fn ensure_container_exists(&self) -> SyncResult<()> {
        self.send(ENSURE_CONTAINER, &self.container_request())
            .await?;
        Ok(())
    }

    async fn submit_changes(
        &self,
        upserts: Vec<RemoteRecord>,
        deletes: Vec<RecordRef>,
    ) -> SyncResult<Vec<ItemOutcome>> {
        let request = SubmitRequest {
            container_id: self.container_id.clone(),
            upserts,
            deletes,
        };
        let response: SubmitResponse = self.call(SUBMIT, &request).await?;
        Ok(response.outcomes)
    }

    async fn fetch_changes(&self, cursor: Option<Vec<u8>>) -> SyncResult<ChangePage> {
        let request = FetchRequest {
            container_id: self.container_id.clone(),
            cursor,
        };
        self.call(FETCH, &request).await
    }

    fn register_for_change_notifications(&self) -> broadcast::Receiver<ChangeNotification> {
        self.notifications.subscribe()
    }
}

/// A loopback HTTP client that serves requests from an in-memory container.
///
/// Useful for exercising the HTTP container without a network. Container
/// errors are turned back into the status codes the service would send.
pub struct LoopbackClient {
    container: Arc<InMemoryContainer>,
}

impl LoopbackClient {
    /// Creates a client serving from `container`.
    pub fn new(container: Arc<InMemoryContainer>) -> Self {
        Self { container }
    }

    async fn route(&self, path: &str, body: &[u8]) -> SyncResult<Vec<u8>> {
        let container = self.container.as_ref();
        let encoded = match path {
            ACCOUNT_STATUS => {
                ContainerRequest::decode(body)?;
                AccountStatusResponse {
                    status: container.account_status().await?,
                }
                .encode()?
            }
            ENSURE_CONTAINER => {
                let request = ContainerRequest::decode(body)?;
                container.ensure_container_exists().await?;
                request.encode()?
            }
            SUBMIT => {
                let request = SubmitRequest::decode(body)?;
                let outcomes = container
                    .submit_changes(request.upserts, request.deletes)
                    .await?;
                SubmitResponse { outcomes }.encode()?
            }
            FETCH => {
                let request = FetchRequest::decode(body)?;
                container.fetch_changes(request.cursor).await?.encode()?
            }
            other => return Err(SyncError::Unknown(format!("no route for {other}"))),
        };
        Ok(encoded)
    }
}

#[async_trait]
impl HttpClient for LoopbackClient {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<HttpResponse, String> {
        let path = [ACCOUNT_STATUS, ENSURE_CONTAINER, SUBMIT, FETCH]
            .into_iter()
            .find(|endpoint| url.ends_with(endpoint))
            .unwrap_or(url);

        match self.route(path, &body).await {
            Ok(body) => Ok(HttpResponse::ok(body)),
            Err(SyncError::NetworkFailure(message)) => Err(message),
            Err(error) => {
                let (status, code, retry_after_secs) = match &error {
                    SyncError::AccountUnavailable(AccountStatus::NoAccount) => {
                        (401, "no_account", None)
                    }
                    SyncError::AccountUnavailable(_) => (403, "restricted", None),
                    SyncError::ContainerMissing => (404, CONTAINER_MISSING_CODE, None),
                    SyncError::CursorExpired => (410, "cursor_expired", None),
                    SyncError::QuotaExceeded { retry_after } => {
                        (429, "quota_exceeded", retry_after.map(|delay| delay.as_secs()))
                    }
                    _ => (400, "bad_request", None),
                };
                let body = ErrorBody {
                    code: code.to_string(),
                    message: error.to_string(),
                    retry_after_secs,
                };
                let body = body.encode().unwrap_or_else(|encode_error| {
                    warn!(%encode_error, "failed to encode error body");
                    Vec::new()
                });
                Ok(HttpResponse { status, body })
            }
        }
    }
}
