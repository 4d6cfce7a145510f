//! Session lifecycle for one portal role.
//!
//! `SessionManager` owns the credential renewal protocol: it exchanges the
//! renewal credential for a fresh pair, serializes concurrent renewal
//! attempts behind a single shared in-flight exchange, and tears the session
//! down when renewal fails. It also carries the explicit logout flow and the
//! signal the embedding application watches to route the user back to the
//! login surface.

use std::sync::Arc;

use anyhow::Result;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use reqwest::Method;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::api::envelope::{Payload, TokenGrant};
use crate::api::error::{ApiError, RenewError, SessionEndReason};
use crate::api::transport::{Transport, TransportRequest};
use crate::auth::store::{CredentialPair, CredentialStore};
use crate::config::RoleProfile;

/// Broadcast when the session is torn down. Carries the route the embedding
/// application should navigate to.
#[derive(Debug, Clone)]
pub struct SessionEnd {
    pub reason: SessionEndReason,
    pub login_route: String,
}

type RenewFlight = Shared<BoxFuture<'static, Result<CredentialPair, RenewError>>>;

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    profile: RoleProfile,
    ended_tx: watch::Sender<Option<SessionEnd>>,
    /// At most one renewal exchange is in flight at a time; late arrivals
    /// await the shared result instead of issuing their own.
    flight: Mutex<Option<RenewFlight>>,
}

impl SessionManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<dyn CredentialStore>,
        profile: RoleProfile,
    ) -> Self {
        let (ended_tx, _) = watch::channel(None);
        Self {
            transport,
            store,
            profile,
            ended_tx,
            flight: Mutex::new(None),
        }
    }

    pub fn profile(&self) -> &RoleProfile {
        &self.profile
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Whether a complete credential pair is currently held.
    /// Recomputed from the store on every call, never cached.
    pub fn is_authenticated(&self) -> bool {
        self.store.is_authenticated()
    }

    /// Subscribe to session teardown. Receivers see `Some(..)` once the
    /// session has ended and should navigate to the login surface.
    pub fn subscribe(&self) -> watch::Receiver<Option<SessionEnd>> {
        self.ended_tx.subscribe()
    }

    /// Hand the library a freshly issued pair from the external login flow.
    pub fn store_session(&self, pair: CredentialPair) -> Result<()> {
        self.store.store(pair)?;
        self.ended_tx.send_replace(None);
        debug!(role = self.profile.role.as_str(), "session stored");
        Ok(())
    }

    /// Exchange the renewal credential for a fresh pair.
    ///
    /// `observed_access` is the access credential the caller last attached.
    /// If the store has already moved past it, a sibling call renewed in the
    /// meantime and the current pair is returned without touching the
    /// network. Otherwise the caller either joins the in-flight exchange or
    /// starts one; a single failed exchange is terminal for the session.
    pub async fn renew(
        &self,
        observed_access: Option<&str>,
    ) -> Result<CredentialPair, RenewError> {
        let flight = {
            let mut slot = self.flight.lock().await;
            let live = slot
                .as_ref()
                .filter(|flight| flight.peek().is_none())
                .cloned();
            match live {
                Some(flight) => {
                    debug!(role = self.profile.role.as_str(), "joining in-flight renewal");
                    flight
                }
                None => {
                    if let Some(pair) = self.store.read_pair() {
                        if observed_access != Some(pair.access.as_str()) {
                            debug!(
                                role = self.profile.role.as_str(),
                                "credentials already renewed by a sibling call"
                            );
                            return Ok(pair);
                        }
                    }
                    let Some(renewal) = self.store.read_renewal() else {
                        warn!(
                            role = self.profile.role.as_str(),
                            "renewal requested with no renewal credential"
                        );
                        self.signal_end(SessionEndReason::RenewalFailed(
                            RenewError::MissingCredential,
                        ));
                        return Err(RenewError::MissingCredential);
                    };
                    let flight = self.spawn_renewal(renewal);
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let result = flight.await;

        // Drop the completed flight so a later expiry can renew again.
        let mut slot = self.flight.lock().await;
        if slot.as_ref().is_some_and(|flight| flight.peek().is_some()) {
            *slot = None;
        }
        drop(slot);

        result
    }

    /// Explicit logout: best-effort server-side invalidation, then local
    /// cleanup. A failed notify call never blocks the cleanup.
    pub async fn logout(&self) {
        if let Some(renewal) = self.store.read_renewal() {
            let request = TransportRequest::new(
                Method::POST,
                self.profile.url_for(&self.profile.logout_path),
            )
            .bearer(self.store.read_access())
            .body(Some(json!({ "refresh_token": renewal })));

            match self.transport.send(request).await {
                Ok(response) if response.status.is_success() => {
                    debug!(
                        role = self.profile.role.as_str(),
                        "server-side logout acknowledged"
                    );
                }
                Ok(response) => {
                    warn!(
                        role = self.profile.role.as_str(),
                        status = %response.status,
                        "server-side logout returned an error, continuing local cleanup"
                    );
                }
                Err(err) => {
                    warn!(
                        role = self.profile.role.as_str(),
                        error = %err,
                        "server-side logout failed, continuing local cleanup"
                    );
                }
            }
        }
        self.end_session(SessionEndReason::LoggedOut);
    }

    /// Clear the store and broadcast the teardown.
    pub(crate) fn end_session(&self, reason: SessionEndReason) {
        self.store.clear();
        self.signal_end(reason);
    }

    fn signal_end(&self, reason: SessionEndReason) {
        info!(role = self.profile.role.as_str(), reason = %reason, "session ended");
        self.ended_tx.send_replace(Some(SessionEnd {
            reason,
            login_route: self.profile.login_route.clone(),
        }));
    }

    /// Run the exchange on a detached task: a caller dropped mid-renewal must
    /// not abort the exchange for the siblings awaiting it.
    fn spawn_renewal(&self, renewal: String) -> RenewFlight {
        let transport = Arc::clone(&self.transport);
        let store = Arc::clone(&self.store);
        let profile = self.profile.clone();
        let ended_tx = self.ended_tx.clone();

        let task = tokio::spawn(async move {
            let result = exchange(transport.as_ref(), store.as_ref(), &profile, renewal).await;
            if let Err(ref err) = result {
                warn!(
                    role = profile.role.as_str(),
                    error = %err,
                    "credential renewal failed, ending session"
                );
                store.clear();
                ended_tx.send_replace(Some(SessionEnd {
                    reason: SessionEndReason::RenewalFailed(err.clone()),
                    login_route: profile.login_route.clone(),
                }));
            }
            result
        });

        task.map(|joined| match joined {
            Ok(result) => result,
            Err(err) => Err(RenewError::Network(format!("renewal task failed: {}", err))),
        })
        .boxed()
        .shared()
    }
}

/// One renewal exchange against the renewal endpoint. No internal retry.
async fn exchange(
    transport: &dyn Transport,
    store: &dyn CredentialStore,
    profile: &RoleProfile,
    renewal: String,
) -> Result<CredentialPair, RenewError> {
    debug!(role = profile.role.as_str(), "exchanging renewal credential");

    let request = TransportRequest::new(Method::POST, profile.url_for(&profile.renewal_path))
        .body(Some(json!({ "refresh_token": renewal })));
    let response = transport
        .send(request)
        .await
        .map_err(|err| RenewError::Network(err.to_string()))?;

    if !response.status.is_success() {
        return Err(RenewError::Rejected(format!("status {}", response.status)));
    }

    let grant = TokenGrant::from_payload(Payload::parse(&response.body)).map_err(|err| {
        match err {
            ApiError::Application { message, .. } => RenewError::Rejected(message),
            other => RenewError::Malformed(other.to_string()),
        }
    })?;

    let pair = CredentialPair::new(grant.access_token, grant.refresh_token);
    store
        .store(pair.clone())
        .map_err(|err| RenewError::Storage(err.to_string()))?;

    debug!(role = profile.role.as_str(), "credential pair renewed");
    Ok(pair)
}
