//! Authenticated request pipeline.
//!
//! Every outbound portal call goes through `dispatch`: calls under the
//! role's protected namespaces get the access credential attached as a
//! bearer token, a 401 triggers one credential renewal followed by one
//! replay of the original call, and unrecoverable authorization failures
//! tear the session down. Calls outside the protected namespaces pass
//! through untouched, so the same pipeline can serve public endpoints.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::envelope::{raw_value, Payload};
use crate::api::error::{ApiError, SessionEndReason};
use crate::api::transport::{HttpTransport, Transport, TransportRequest, TransportResponse};
use crate::auth::session::{SessionEnd, SessionManager};
use crate::auth::store::{CredentialPair, CredentialStore, FileStore, KeyringStore};
use crate::config::{ClientConfig, RoleProfile};

/// Per-call options: extra headers, query parameters, timeout override.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A request awaiting dispatch.
///
/// The `retried` flag is per logical call and transitions false -> true at
/// most once; a call that has already been replayed never re-enters the
/// renewal protocol, whatever the replay's outcome.
#[derive(Debug, Clone)]
struct PendingCall {
    method: Method,
    path: String,
    body: Option<Value>,
    options: RequestOptions,
    retried: bool,
}

/// Authenticated request pipeline for one portal role.
/// Clone is cheap; the transport and session are shared.
#[derive(Clone)]
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    session: Arc<SessionManager>,
}

impl RequestPipeline {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        profile: RoleProfile,
    ) -> Self {
        let session = Arc::new(SessionManager::new(Arc::clone(&transport), store, profile));
        Self { transport, session }
    }

    /// Pipeline sharing an existing session manager.
    pub fn with_session(transport: Arc<dyn Transport>, session: Arc<SessionManager>) -> Self {
        Self { transport, session }
    }

    /// Pipeline over the real HTTP transport and the role's file store.
    pub fn open(profile: RoleProfile) -> anyhow::Result<Self> {
        let store = Arc::new(FileStore::open(&profile.storage_namespace)?);
        Ok(Self::new(Arc::new(http_transport()?), store, profile))
    }

    /// Pipeline over the real HTTP transport and the OS keychain store.
    pub fn open_secure(profile: RoleProfile) -> anyhow::Result<Self> {
        let store = Arc::new(KeyringStore::new(&profile.storage_namespace));
        Ok(Self::new(Arc::new(http_transport()?), store, profile))
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// Whether a complete credential pair is currently held.
    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Subscribe to session teardown; see [`SessionManager::subscribe`].
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionEnd>> {
        self.session.subscribe()
    }

    /// Hand the pipeline a freshly issued pair from the external login flow.
    pub fn store_session(&self, pair: CredentialPair) -> anyhow::Result<()> {
        self.session.store_session(pair)
    }

    /// Explicit logout; see [`SessionManager::logout`].
    pub async fn logout(&self) {
        self.session.logout().await;
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::GET, path, None, options).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::POST, path, Some(encode_body(body)?), options)
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::PUT, path, Some(encode_body(body)?), options)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        self.request(Method::DELETE, path, None, options).await
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<T, ApiError> {
        let value = self
            .dispatch(PendingCall {
                method,
                path: path.to_string(),
                body,
                options,
                retried: false,
            })
            .await?;
        serde_json::from_value(value).map_err(|err| {
            ApiError::InvalidResponse(format!("failed to decode response from {}: {}", path, err))
        })
    }

    async fn dispatch(&self, mut call: PendingCall) -> Result<Value, ApiError> {
        let profile = self.session.profile();

        if !profile.is_protected(&call.path) {
            // Public surface: no credential, no renewal handling, body
            // passthrough.
            debug!(path = %call.path, "dispatching outside protected namespace");
            let response = self.send(&call, None).await?;
            if !response.status.is_success() {
                return Err(ApiError::from_status(response.status, &response.body));
            }
            return Ok(raw_value(&response.body));
        }

        let mut access = self.session.store().read_access();
        loop {
            let response = self.send(&call, access.clone()).await?;

            if response.status.is_success() {
                return Payload::parse(&response.body).into_result();
            }

            if response.status != StatusCode::UNAUTHORIZED {
                return Err(ApiError::from_status(response.status, &response.body));
            }

            // The access credential was rejected.
            if profile.is_renewal_path(&call.path) {
                warn!(path = %call.path, "renewal endpoint rejected the credential");
                self.session.end_session(SessionEndReason::RenewalRejected);
                return Err(ApiError::SessionEnded(SessionEndReason::RenewalRejected));
            }
            if call.retried {
                warn!(path = %call.path, "credential rejected again after renewal");
                self.session.end_session(SessionEndReason::RetryRejected);
                return Err(ApiError::SessionEnded(SessionEndReason::RetryRejected));
            }
            if self.session.store().read_renewal().is_none() {
                // There is no session to renew; surface the rejection as-is.
                debug!(path = %call.path, "unauthorized with no renewal credential");
                return Err(ApiError::Unauthorized);
            }

            let pair = self
                .session
                .renew(access.as_deref())
                .await
                .map_err(|err| ApiError::SessionEnded(SessionEndReason::RenewalFailed(err)))?;
            debug!(path = %call.path, "credential renewed, replaying call");
            call.retried = true;
            // The replay carries the credential issued by this renewal, not
            // whatever the store holds by the time it is sent.
            access = Some(pair.access);
        }
    }

    async fn send(
        &self,
        call: &PendingCall,
        bearer: Option<String>,
    ) -> Result<TransportResponse, ApiError> {
        let request = TransportRequest::new(
            call.method.clone(),
            self.session.profile().url_for(&call.path),
        )
        .bearer(bearer)
        .body(call.body.clone())
        .query(call.options.query.clone())
        .headers(call.options.headers.clone())
        .timeout(call.options.timeout);
        Ok(self.transport.send(request).await?)
    }
}

fn encode_body<B: Serialize>(body: &B) -> Result<Value, ApiError> {
    serde_json::to_value(body)
        .map_err(|err| ApiError::InvalidBody(format!("failed to encode request body: {}", err)))
}

/// Real transport honoring the persisted client configuration.
fn http_transport() -> anyhow::Result<HttpTransport> {
    let config = ClientConfig::load().unwrap_or_default();
    let transport = match config.request_timeout() {
        Some(timeout) => HttpTransport::with_timeout(timeout)?,
        None => HttpTransport::new()?,
    };
    Ok(transport)
}
