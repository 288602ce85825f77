use std::{sync::Arc, time::Duration};

use {
    chatrelay_bus::{EventBus, EventHandler, Subscription, handler_fn},
    chatrelay_common::{
        ChangeSource, ControlAction, Event, EventKind, OutboundResponse, Platform, StatusKind,
    },
    chatrelay_config::SupervisorConfig,
    chatrelay_oauth::{Credential, CredentialStore, RefreshError, TokenRefresher},
    chrono::Utc,
    tokio::{
        sync::{
            mpsc::{self, error::TrySendError},
            watch,
        },
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use chatrelay_metrics::{
    chat as chat_metrics, counter, gauge, labels, supervisor as supervisor_metrics,
};

use crate::{
    backoff::Backoff,
    connector::{Connector, Session},
    error::ConnectorError,
    outbound::spawn_sender,
    state::SupervisorState,
};

/// Keeps one platform connected.
///
/// Wraps a [`Connector`] in a retry/backoff/refresh state machine and
/// reports every transition on the bus as a `platform-status` event. One
/// supervisor serves one run: the control plane builds a fresh one for each
/// start, so consecutive-failure counts never carry over a restart.
pub struct Supervisor {
    platform: Platform,
    connector: Arc<dyn Connector>,
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    bus: EventBus,
    config: SupervisorConfig,
    state: watch::Sender<SupervisorState>,
}

/// How one connect cycle ended.
enum Outcome {
    /// Cancellation observed.
    Stopped,
    /// Sit in this state until cancelled.
    Park(SupervisorState, String),
    /// Transient failure; back off and try again.
    Retry(String),
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn Connector>,
        store: Arc<dyn CredentialStore>,
        refresher: Arc<dyn TokenRefresher>,
        bus: EventBus,
        config: SupervisorConfig,
    ) -> Self {
        let (state, _) = watch::channel(SupervisorState::Stopped);
        Self {
            platform: connector.platform(),
            connector,
            store,
            refresher,
            bus,
            config,
            state,
        }
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Observe state changes without going through the bus.
    pub fn watch_state(&self) -> watch::Receiver<SupervisorState> {
        self.state.subscribe()
    }

    /// Drive the state machine until `cancel` fires.
    ///
    /// Always ends in [`SupervisorState::Stopped`], with the live transport
    /// closed and the outbound queue discarded.
    pub async fn run(self, cancel: CancellationToken) {
        let platform = self.platform;
        let _settings = self.watch_settings();
        let mut backoff = Backoff::from_config(&self.config);
        info!(%platform, "supervisor started");

        loop {
            match self.cycle(&cancel, &mut backoff).await {
                Outcome::Stopped => break,
                Outcome::Park(state, reason) => {
                    self.transition(state, Some(reason));
                    cancel.cancelled().await;
                    break;
                },
                Outcome::Retry(reason) => {
                    #[cfg(feature = "metrics")]
                    counter!(supervisor_metrics::CONNECT_FAILURES_TOTAL, labels::PLATFORM => platform.as_str())
                        .increment(1);
                    self.transition(SupervisorState::Disconnected, Some(reason));

                    let Some(delay) = backoff.next_delay() else {
                        let reason = format!(
                            "giving up after {} consecutive failures",
                            backoff.failures()
                        );
                        self.transition(SupervisorState::Disabled, Some(reason));
                        cancel.cancelled().await;
                        break;
                    };
                    info!(
                        %platform,
                        attempt = backoff.failures(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying after backoff"
                    );
                    self.publish_status(
                        StatusKind::Waiting,
                        Some(format!("retrying in {}s", delay.as_secs())),
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
            }
        }

        self.transition(SupervisorState::Stopped, None);
        info!(%platform, "supervisor stopped");
    }

    /// Load, refresh if needed, connect, then pump inbound messages until the
    /// connection ends.
    async fn cycle(&self, cancel: &CancellationToken, backoff: &mut Backoff) -> Outcome {
        let platform = self.platform;

        let mut credential = None;
        if self.connector.requires_credential() {
            match self.store.load(platform).await {
                Ok(Some(found)) => credential = Some(found),
                Ok(None) => {
                    return Outcome::Park(SupervisorState::Disabled, "no credential stored".into());
                },
                Err(e) => {
                    warn!(%platform, error = %e, "failed to load credential");
                    return Outcome::Park(
                        SupervisorState::Disabled,
                        format!("credential unavailable: {e}"),
                    );
                },
            }
        }

        self.transition(SupervisorState::Connecting, None);

        if let Some(current) = credential.as_ref()
            && current.expires_within(self.refresh_margin(), Utc::now())
        {
            let refreshed = match self.refresh(cancel, current).await {
                Ok(refreshed) => refreshed,
                Err(outcome) => return outcome,
            };
            credential = Some(refreshed);
            self.transition(
                SupervisorState::Connecting,
                Some("credential refreshed".into()),
            );
        }

        #[cfg(feature = "metrics")]
        counter!(supervisor_metrics::CONNECT_ATTEMPTS_TOTAL, labels::PLATFORM => platform.as_str())
            .increment(1);
        debug!(%platform, "connecting");
        let result = tokio::select! {
            _ = cancel.cancelled() => return Outcome::Stopped,
            result = self.connector.connect(credential) => result,
        };
        let session = match result {
            Ok(session) => session,
            Err(e) => return self.on_error(e).await,
        };

        backoff.reset();
        let mut live = self.go_live(session, cancel);
        self.transition(SupervisorState::Connected, None);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                next = live.session.recv() => Some(next),
            };
            let Some(next) = next else {
                live.close().await;
                return Outcome::Stopped;
            };
            match next {
                Ok(Some(message)) => {
                    #[cfg(feature = "metrics")]
                    counter!(chat_metrics::MESSAGES_RECEIVED_TOTAL, labels::PLATFORM => platform.as_str())
                        .increment(1);
                    self.bus.publish(Event::ChatMessageReceived(message));
                },
                Ok(None) => {
                    live.close().await;
                    return Outcome::Retry("connection closed by platform".into());
                },
                Err(e) => {
                    live.close().await;
                    return self.on_error(e).await;
                },
            }
        }
    }

    fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.config.refresh_margin_secs)
    }

    async fn refresh(
        &self,
        cancel: &CancellationToken,
        current: &Credential,
    ) -> Result<Credential, Outcome> {
        let platform = self.platform;
        info!(%platform, expires_at = ?current.expires_at, "credential expiring, refreshing");
        #[cfg(feature = "metrics")]
        counter!(supervisor_metrics::TOKEN_REFRESH_TOTAL, labels::PLATFORM => platform.as_str())
            .increment(1);

        let result = tokio::select! {
            _ = cancel.cancelled() => return Err(Outcome::Stopped),
            result = self.refresher.refresh(platform, current) => result,
        };

        match result {
            Ok(refreshed) => {
                if let Err(e) = self
                    .store
                    .save(platform, &refreshed, ChangeSource::Supervisor(platform))
                    .await
                {
                    warn!(%platform, error = %e, "failed to persist refreshed credential");
                }
                Ok(refreshed)
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(supervisor_metrics::TOKEN_REFRESH_FAILURES_TOTAL, labels::PLATFORM => platform.as_str())
                    .increment(1);
                warn!(%platform, error = %e, "credential refresh failed");
                Err(match e {
                    RefreshError::Auth(reason) => {
                        self.reject_credential(format!("token refresh rejected: {reason}"))
                            .await
                    },
                    RefreshError::Transient(reason) => {
                        Outcome::Retry(format!("token refresh failed: {reason}"))
                    },
                    RefreshError::NotConfigured(p) => Outcome::Park(
                        SupervisorState::Disabled,
                        format!("no oauth client configured for {p}"),
                    ),
                })
            },
        }
    }

    async fn on_error(&self, error: ConnectorError) -> Outcome {
        match error {
            ConnectorError::Transient(reason) => Outcome::Retry(reason),
            ConnectorError::Auth(reason) => self.reject_credential(reason).await,
            ConnectorError::Config(reason) => {
                warn!(platform = %self.platform, reason, "connector misconfigured");
                Outcome::Park(SupervisorState::Disabled, reason)
            },
        }
    }

    /// Drop the rejected credential so it is never retried.
    async fn reject_credential(&self, reason: String) -> Outcome {
        let platform = self.platform;
        warn!(%platform, reason, "credential rejected, clearing it");
        if self.connector.requires_credential()
            && let Err(e) = self
                .store
                .clear(platform, ChangeSource::Supervisor(platform))
                .await
        {
            warn!(%platform, error = %e, "failed to clear rejected credential");
        }
        Outcome::Park(SupervisorState::AuthError, reason)
    }

    fn go_live(&self, session: Box<dyn Session>, cancel: &CancellationToken) -> LiveConnection {
        let outbound_cancel = cancel.child_token();
        let (tx, sender_task) = spawn_sender(
            self.platform,
            session.sender(),
            self.connector.limits(),
            self.config.outbound_queue,
            outbound_cancel.clone(),
        );
        let subscription = self
            .bus
            .subscribe_scoped(EventKind::SendResponse, outbound_handler(self.platform, tx));
        LiveConnection {
            session,
            outbound_cancel,
            sender_task: Some(sender_task),
            _outbound: subscription,
        }
    }

    /// Turn relevant settings changes into a restart request. Changes this
    /// supervisor wrote itself are ignored.
    fn watch_settings(&self) -> Subscription {
        let platform = self.platform;
        let bus = self.bus.clone();
        let handler = handler_fn(format!("{platform}-settings"), move |event: Arc<Event>| {
            let bus = bus.clone();
            async move {
                let Event::SettingsChanged(change) = event.as_ref() else {
                    return Ok(());
                };
                if change.source == ChangeSource::Supervisor(platform) {
                    return Ok(());
                }
                if let Some(key) = change.keys.iter().find(|k| platform.is_relevant_key(k)) {
                    info!(%platform, key, "relevant setting changed, requesting restart");
                    bus.publish(Event::control(platform, ControlAction::Restart));
                }
                Ok(())
            }
        });
        self.bus.subscribe_scoped(EventKind::SettingsChanged, handler)
    }

    fn transition(&self, state: SupervisorState, message: Option<String>) {
        let platform = self.platform;
        let previous = self.state.send_replace(state);
        match state {
            SupervisorState::AuthError | SupervisorState::Disabled => {
                warn!(%platform, from = %previous, to = %state, message = ?message, "supervisor state changed");
            },
            _ => {
                info!(%platform, from = %previous, to = %state, message = ?message, "supervisor state changed");
            },
        }
        #[cfg(feature = "metrics")]
        gauge!(supervisor_metrics::CONNECTED, labels::PLATFORM => platform.as_str()).set(
            if state == SupervisorState::Connected {
                1.0
            } else {
                0.0
            },
        );
        self.publish_status(state.status(), message);
    }

    fn publish_status(&self, status: StatusKind, message: Option<String>) {
        self.bus
            .publish(Event::status(self.platform, status, message));
    }
}

/// Forwards this platform's `send-response` events into the outbound queue.
fn outbound_handler(
    platform: Platform,
    tx: mpsc::Sender<OutboundResponse>,
) -> Arc<dyn EventHandler> {
    handler_fn(format!("{platform}-outbound"), move |event: Arc<Event>| {
        let tx = tx.clone();
        async move {
            let Event::SendResponse(response) = event.as_ref() else {
                return Ok(());
            };
            if response.platform != platform {
                return Ok(());
            }
            match tx.try_send(response.clone()) {
                Ok(()) => {},
                Err(TrySendError::Full(_)) => {
                    #[cfg(feature = "metrics")]
                    counter!(chat_metrics::SEND_DROPPED_TOTAL, labels::PLATFORM => platform.as_str())
                        .increment(1);
                    warn!(%platform, channel = %response.channel, "outbound queue full, response dropped");
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(%platform, "outbound queue closed, response dropped");
                },
            }
            Ok(())
        }
    })
}

/// The live transport plus everything tied to its lifetime.
///
/// Dropping it cancels the sender loop and unsubscribes from outbound
/// events; [`LiveConnection::close`] additionally waits for the sender and
/// shuts the transport down gracefully.
struct LiveConnection {
    session: Box<dyn Session>,
    outbound_cancel: CancellationToken,
    sender_task: Option<JoinHandle<()>>,
    _outbound: Subscription,
}

impl LiveConnection {
    async fn close(mut self) {
        self.outbound_cancel.cancel();
        if let Some(task) = self.sender_task.take()
            && let Err(e) = task.await
        {
            warn!(error = %e, "outbound sender ended abnormally");
        }
        self.session.close().await;
    }
}

impl Drop for LiveConnection {
    fn drop(&mut self) {
        self.outbound_cancel.cancel();
    }
}
