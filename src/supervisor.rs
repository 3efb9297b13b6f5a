//! Keeps the observe-state stream of one session open.
//!
//! ```text
//!            ┌──────────────────────────────────────────────┐
//!            ▼                                              │
//!  ┌──────────────┐  opened   ┌───────────┐  ended/transient │ backoff
//!  │   Opening    │──────────▶│ Streaming │──────────────────┤
//!  └──────────────┘           └───────────┘  expired:        │
//!     │ fatal                   │ fatal      refresh first ──┘
//!     ▼                         ▼
//!  ┌──────────────────────────────┐
//!  │          Terminated          │   cancellation exits quietly
//!  └──────────────────────────────┘
//! ```
//!
//! Every reopened stream starts with a full snapshot, so no event-level
//! replay is needed.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::ResubscribeBackoff;
use crate::error::{ClientError, ErrorKind, TransportError};
use crate::retry::RetryPolicy;
use crate::state::connection::SubscriptionTracker;
use crate::state::game::{ChangeEvent, SessionId};
use crate::state::player::Identity;
use crate::transport::{EventStream, GameTransport};

const LOG_TARGET: &str = "jinrou_sync::supervisor";

/// Receives events pulled off the stream, in order.
pub trait EventSink: Send + 'static {
    /// Returns `false` once the receiving side is gone.
    fn deliver(&self, event: ChangeEvent) -> bool;
}

impl EventSink for mpsc::UnboundedSender<ChangeEvent> {
    fn deliver(&self, event: ChangeEvent) -> bool {
        self.send(event).is_ok()
    }
}

enum PumpEnd {
    Cancelled,
    SinkClosed,
    Ended,
    Failed(TransportError),
}

/// Owns the stream subscription for one session.
pub struct Supervisor {
    transport: Arc<dyn GameTransport>,
    policy: RetryPolicy,
    session_id: SessionId,
    backoff: ResubscribeBackoff,
    tracker: Arc<Mutex<SubscriptionTracker>>,
}

impl Supervisor {
    pub fn new(
        transport: Arc<dyn GameTransport>,
        policy: RetryPolicy,
        session_id: SessionId,
        backoff: ResubscribeBackoff,
        tracker: Arc<Mutex<SubscriptionTracker>>,
    ) -> Self {
        Self {
            transport,
            policy,
            session_id,
            backoff,
            tracker,
        }
    }

    /// Run until cancelled, the sink closes, or a fatal error occurs.
    ///
    /// Returns `Ok(())` on cancellation or a closed sink, and the fatal error
    /// otherwise. Recoverable failures, including the authority closing the
    /// stream, only cause a reopen.
    pub async fn run<S: EventSink>(
        self,
        sink: S,
        cancel: CancellationToken,
    ) -> Result<(), ClientError> {
        info!(target: LOG_TARGET, session_id = %self.session_id, "supervising session stream");

        // set when the last stream failed on expiry and the tokens were refreshed
        let mut refreshed_for_reopen = false;
        loop {
            let attempt = self.tracker.lock().opening();
            debug!(target: LOG_TARGET, session_id = %self.session_id, attempt, "opening stream");

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    self.stopped();
                    return Ok(());
                }
                opened = self.open(refreshed_for_reopen) => opened,
            };
            refreshed_for_reopen = false;

            let reason = match opened {
                Ok((stream, generation)) => {
                    self.tracker.lock().opened();
                    match self.pump(stream, &sink, &cancel).await {
                        PumpEnd::Cancelled => {
                            self.stopped();
                            return Ok(());
                        }
                        PumpEnd::SinkClosed => {
                            debug!(
                                target: LOG_TARGET,
                                session_id = %self.session_id,
                                "event sink closed"
                            );
                            return Ok(());
                        }
                        PumpEnd::Ended => "stream ended".to_string(),
                        PumpEnd::Failed(err) if err.kind() == ErrorKind::CredentialsExpired => {
                            let refreshed = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => {
                                    self.stopped();
                                    return Ok(());
                                }
                                refreshed = self.policy.identity().refresh(generation) => refreshed,
                            };
                            match refreshed {
                                Ok(_) => {
                                    refreshed_for_reopen = true;
                                    "credentials expired".to_string()
                                }
                                Err(err) if err.is_recoverable() => err.to_string(),
                                Err(err) => return Err(self.fatal(err)),
                            }
                        }
                        PumpEnd::Failed(err) => {
                            let err = ClientError::from(err);
                            if !err.is_recoverable() {
                                return Err(self.fatal(err));
                            }
                            err.to_string()
                        }
                    }
                }
                Err(err) if err.is_recoverable() => err.to_string(),
                Err(err) => return Err(self.fatal(err)),
            };

            let delay = {
                let mut tracker = self.tracker.lock();
                tracker.interrupted(reason.clone());
                self.backoff.delay(tracker.consecutive_failures)
            };
            warn!(
                target: LOG_TARGET,
                session_id = %self.session_id,
                reason = %reason,
                delay_ms = delay.as_millis() as u64,
                "resubscribing"
            );

            if !delay.is_zero() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        self.stopped();
                        return Ok(());
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }

    /// Open the stream. Right after a refresh an expiry is fatal instead of
    /// refreshing again.
    async fn open(&self, after_refresh: bool) -> Result<(EventStream, u64), ClientError> {
        let transport = self.transport.clone();
        let session_id = self.session_id.clone();
        let observe = |identity: Identity| {
            let transport = transport.clone();
            let session_id = session_id.clone();
            async move {
                transport
                    .observe_state(&session_id, &identity.access_token)
                    .await
            }
        };
        if after_refresh {
            self.policy.call_leased_after_refresh(observe).await
        } else {
            self.policy.call_leased(observe).await
        }
    }

    async fn pump<S: EventSink>(
        &self,
        mut stream: EventStream,
        sink: &S,
        cancel: &CancellationToken,
    ) -> PumpEnd {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PumpEnd::Cancelled,
                item = stream.next() => match item {
                    Some(Ok(event)) => {
                        self.tracker.lock().event_received();
                        if !sink.deliver(event) {
                            return PumpEnd::SinkClosed;
                        }
                    }
                    Some(Err(err)) => return PumpEnd::Failed(err),
                    None => return PumpEnd::Ended,
                },
            }
        }
    }

    fn stopped(&self) {
        debug!(target: LOG_TARGET, session_id = %self.session_id, "stream cancelled");
    }

    fn fatal(&self, err: ClientError) -> ClientError {
        error!(
            target: LOG_TARGET,
            session_id = %self.session_id,
            error = %err,
            "session stream terminated"
        );
        self.tracker.lock().terminated(err.to_string());
        err
    }
}
