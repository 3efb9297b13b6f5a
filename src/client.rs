//! The engine handle and its actor task.
//!
//! ```text
//!   GameClient (handle)                       engine task
//!  ┌──────────────────────┐   commands    ┌───────────────────────┐
//!  │ start_new_game, join │──────────────▶│ Reconciler            │
//!  │ leave, sign_out      │               │  begin / apply /      │
//!  │ vote, eliminate, ... │──┐            │  resolve_roles        │
//!  └──────────────────────┘  │            └──────────┬────────────┘
//!            ▲               │ dispatch              │ publish
//!            │               ▼                       ▼
//!            │        GameTransport        summaries (broadcast)
//!            │               ▲             errors    (broadcast)
//!            │               │ observe     roster, my player,
//!            │        ┌──────┴─────┐       status    (watch)
//!            └────────│ Supervisor │── events ──▶ engine task
//!                     └────────────┘
//! ```
//!
//! All session state is owned by the engine task and mutated in the order
//! commands arrive. Actions are sent from the caller's task; their outcome
//! comes back through the session stream.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ResubscribeBackoff};
use crate::credentials::IdentityCell;
use crate::dispatch::{ActionDispatcher, Target};
use crate::error::{ClientError, Result};
use crate::retry::RetryPolicy;
use crate::state::connection::SubscriptionTracker;
use crate::state::engine::{PendingSummary, Reconciler, Reconciliation, SessionStatus};
use crate::state::game::{ChangeEvent, GameConfig, GameSummary, Phase, Session, SessionId};
use crate::state::player::{Identity, Player, PlayerId, Role};
use crate::supervisor::{EventSink, Supervisor};
use crate::tokio_tools::spawn_named_task;
use crate::transport::{AuthService, CredentialStore, GameTransport};

const LOG_TARGET: &str = "jinrou_sync::client";

/// The session actions are currently aimed at.
#[derive(Debug, Clone)]
struct SessionBinding {
    id: SessionId,
    /// Cancelled when the session is left, replaced or the client shuts down
    cancel: CancellationToken,
    tracker: Arc<Mutex<SubscriptionTracker>>,
}

enum Command {
    Begin {
        session: Session,
        local_player: Option<PlayerId>,
        done: oneshot::Sender<()>,
    },
    Event {
        session_id: SessionId,
        event: ChangeEvent,
    },
    StreamTerminated {
        session_id: SessionId,
        error: ClientError,
    },
    Reset {
        done: oneshot::Sender<()>,
    },
}

/// Forwards stream events into the engine's command queue.
struct CommandSink {
    session_id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
}

impl EventSink for CommandSink {
    fn deliver(&self, event: ChangeEvent) -> bool {
        self.commands
            .send(Command::Event {
                session_id: self.session_id.clone(),
                event,
            })
            .is_ok()
    }
}

/// Presentation channels shared by the handle and the engine task.
struct Outputs {
    summaries: broadcast::Sender<GameSummary>,
    errors: broadcast::Sender<ClientError>,
    latest: watch::Sender<Option<GameSummary>>,
    roster: watch::Sender<Vec<Player>>,
    my_player: watch::Sender<Option<Player>>,
    status: watch::Sender<SessionStatus>,
    session: watch::Sender<Option<SessionBinding>>,
}

impl Outputs {
    fn new(config: &ClientConfig) -> Self {
        let (summaries, _) = broadcast::channel(config.summary_channel_capacity.max(1));
        let (errors, _) = broadcast::channel(config.error_channel_capacity.max(1));
        Self {
            summaries,
            errors,
            latest: watch::channel(None).0,
            roster: watch::channel(Vec::new()).0,
            my_player: watch::channel(None).0,
            status: watch::channel(SessionStatus::NoSession).0,
            session: watch::channel(None).0,
        }
    }

    fn report(&self, err: &ClientError) {
        if err.is_cancelled() {
            return;
        }
        warn!(target: LOG_TARGET, error = %err, "reporting error");
        // no subscribers is fine
        let _ = self.errors.send(err.clone());
    }

    fn publish_summary(&self, summary: GameSummary) {
        info!(
            target: LOG_TARGET,
            session_id = %summary.session_id,
            phase = %summary.phase,
            day = summary.day,
            "publishing summary"
        );
        self.latest.send_replace(Some(summary.clone()));
        let _ = self.summaries.send(summary);
    }

    fn publish_state(&self, reconciler: &Reconciler) {
        replace_if_changed(&self.roster, reconciler.roster().to_vec());
        replace_if_changed(&self.my_player, reconciler.my_player().cloned());
        replace_if_changed(&self.status, reconciler.status());
    }
}

fn replace_if_changed<T: PartialEq>(sender: &watch::Sender<T>, value: T) {
    sender.send_if_modified(|current| {
        if *current == value {
            return false;
        }
        *current = value;
        true
    });
}

struct EngineActor {
    reconciler: Reconciler,
    transport: Arc<dyn GameTransport>,
    policy: RetryPolicy,
    backoff: ResubscribeBackoff,
    outputs: Arc<Outputs>,
    commands: mpsc::UnboundedSender<Command>,
    shutdown: CancellationToken,
    active: Option<SessionBinding>,
}

impl EngineActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        info!(target: LOG_TARGET, "engine started");
        loop {
            let command = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            self.handle(command).await;
        }
        self.end_session();
        info!(target: LOG_TARGET, "engine stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::Begin {
                session,
                local_player,
                done,
            } => {
                self.begin(session, local_player).await;
                let _ = done.send(());
            }
            Command::Event { session_id, event } => {
                if !self.is_active(&session_id) {
                    debug!(
                        target: LOG_TARGET,
                        session_id = %session_id,
                        kind = event.kind.as_str(),
                        "dropping event from a replaced stream"
                    );
                    return;
                }
                let outcome = self.reconciler.apply(event);
                self.settle(outcome).await;
            }
            Command::StreamTerminated { session_id, error } => {
                if self.is_active(&session_id) {
                    self.outputs.report(&error);
                }
            }
            Command::Reset { done } => {
                self.end_session();
                self.reconciler.reset();
                self.outputs.latest.send_replace(None);
                self.outputs.publish_state(&self.reconciler);
                let _ = done.send(());
            }
        }
    }

    async fn begin(&mut self, session: Session, local_player: Option<PlayerId>) {
        self.end_session();

        let binding = SessionBinding {
            id: session.id.clone(),
            cancel: self.shutdown.child_token(),
            tracker: Arc::new(Mutex::new(SubscriptionTracker::new())),
        };
        info!(
            target: LOG_TARGET,
            session_id = %binding.id,
            phase = %session.phase,
            day = session.day,
            "session started"
        );

        let outcome = self.reconciler.begin(session, local_player);
        self.outputs.latest.send_replace(None);
        self.outputs.session.send_replace(Some(binding.clone()));
        self.spawn_supervisor(&binding);
        self.active = Some(binding);

        self.settle(outcome).await;
    }

    fn spawn_supervisor(&self, binding: &SessionBinding) {
        let supervisor = Supervisor::new(
            self.transport.clone(),
            self.policy.clone(),
            binding.id.clone(),
            self.backoff,
            binding.tracker.clone(),
        );
        let sink = CommandSink {
            session_id: binding.id.clone(),
            commands: self.commands.clone(),
        };
        let commands = self.commands.clone();
        let session_id = binding.id.clone();
        let cancel = binding.cancel.clone();

        spawn_named_task(format!("session-stream-{}", binding.id), async move {
            if let Err(error) = supervisor.run(sink, cancel).await {
                let _ = commands.send(Command::StreamTerminated { session_id, error });
            }
        });
    }

    fn end_session(&mut self) {
        if let Some(binding) = self.active.take() {
            debug!(target: LOG_TARGET, session_id = %binding.id, "ending session");
            binding.cancel.cancel();
            self.outputs.session.send_replace(None);
        }
    }

    fn is_active(&self, session_id: &SessionId) -> bool {
        self.active.as_ref().is_some_and(|b| &b.id == session_id)
    }

    async fn settle(&mut self, outcome: Reconciliation) {
        match outcome {
            Reconciliation::Absorbed => self.outputs.publish_state(&self.reconciler),
            Reconciliation::Ignored(reason) => {
                debug!(target: LOG_TARGET, reason = %reason, "event ignored");
            }
            Reconciliation::Publish(summary) => {
                self.outputs.publish_state(&self.reconciler);
                self.outputs.publish_summary(summary);
            }
            Reconciliation::AwaitRoles(pending) => self.reveal_roles(pending).await,
        }
    }

    /// Fetch the first-night role mapping, then release the held summary.
    /// On failure nothing is published; the next first-night event retries.
    async fn reveal_roles(&mut self, pending: PendingSummary) {
        let Some(cancel) = self.active.as_ref().map(|b| b.cancel.clone()) else {
            return;
        };
        let session_id = pending.session_id().clone();

        let fetched = {
            let transport = self.transport.clone();
            let fetch = self.policy.call(|identity| {
                let transport = transport.clone();
                let session_id = session_id.clone();
                async move {
                    transport
                        .fetch_roles(&session_id, &identity.access_token)
                        .await
                }
            });
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                fetched = fetch => fetched,
            }
        };

        match fetched {
            Ok(roles) => self.apply_roles(pending, &roles),
            Err(err) => {
                warn!(
                    target: LOG_TARGET,
                    session_id = %session_id,
                    error = %err,
                    "role fetch failed, first-night summary withheld"
                );
                self.outputs.report(&err);
            }
        }
    }

    fn apply_roles(&mut self, pending: PendingSummary, roles: &HashMap<PlayerId, Role>) {
        let session_id = pending.session_id().clone();
        match self.reconciler.resolve_roles(pending, roles) {
            Some(summary) => {
                info!(
                    target: LOG_TARGET,
                    session_id = %session_id,
                    revealed = roles.len(),
                    "roles revealed"
                );
                self.outputs.publish_state(&self.reconciler);
                self.outputs.publish_summary(summary);
            }
            None => debug!(
                target: LOG_TARGET,
                session_id = %session_id,
                "session changed while roles were fetched"
            ),
        }
    }
}

/// Handle to a running engine.
///
/// Dropping the handle stops the engine task and every stream it owns.
pub struct GameClient {
    commands: mpsc::UnboundedSender<Command>,
    transport: Arc<dyn GameTransport>,
    identity: Arc<IdentityCell>,
    policy: RetryPolicy,
    dispatcher: ActionDispatcher,
    outputs: Arc<Outputs>,
    config: ClientConfig,
    shutdown: CancellationToken,
    engine: Option<JoinHandle<()>>,
}

impl GameClient {
    /// Load the stored identity and spawn the engine task.
    pub async fn start(
        transport: Arc<dyn GameTransport>,
        auth: Arc<dyn AuthService>,
        store: Arc<dyn CredentialStore>,
        config: ClientConfig,
    ) -> Result<Self> {
        let identity = Arc::new(IdentityCell::new(store, auth));
        identity.load().await?;

        let policy = RetryPolicy::new(identity.clone());
        let dispatcher = ActionDispatcher::new(transport.clone(), policy.clone());
        let outputs = Arc::new(Outputs::new(&config));
        let shutdown = CancellationToken::new();
        let (commands, receiver) = mpsc::unbounded_channel();

        let actor = EngineActor {
            reconciler: Reconciler::new(),
            transport: transport.clone(),
            policy: policy.clone(),
            backoff: config.resubscribe_backoff,
            outputs: outputs.clone(),
            commands: commands.clone(),
            shutdown: shutdown.clone(),
            active: None,
        };
        let engine = spawn_named_task("game-engine", actor.run(receiver));

        Ok(Self {
            commands,
            transport,
            identity,
            policy,
            dispatcher,
            outputs,
            config,
            shutdown,
            engine: Some(engine),
        })
    }

    /// Summary notifications, one per user-visible transition.
    pub fn subscribe(&self) -> broadcast::Receiver<GameSummary> {
        self.outputs.summaries.subscribe()
    }

    pub fn subscribe_errors(&self) -> broadcast::Receiver<ClientError> {
        self.outputs.errors.subscribe()
    }

    /// Roster ordered by seat index.
    pub fn roster(&self) -> watch::Receiver<Vec<Player>> {
        self.outputs.roster.subscribe()
    }

    pub fn my_player(&self) -> watch::Receiver<Option<Player>> {
        self.outputs.my_player.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.outputs.status.subscribe()
    }

    pub fn latest_summary(&self) -> Option<GameSummary> {
        self.outputs.latest.borrow().clone()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.outputs.session.borrow().as_ref().map(|b| b.id.clone())
    }

    /// Stream health for the active session.
    pub fn subscription_stats(&self) -> Option<SubscriptionTracker> {
        self.outputs
            .session
            .borrow()
            .as_ref()
            .map(|b| b.tracker.lock().clone())
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.identity.current().await
    }

    pub async fn register(&self, display_name: &str) -> Result<Identity> {
        let result = self.identity.register(display_name).await;
        self.reported(result)
    }

    /// Leave any active session locally and forget the identity.
    pub async fn sign_out(&self) -> Result<()> {
        self.reset().await?;
        let result = self.identity.sign_out().await;
        self.reported(result)
    }

    /// Create a session and start tracking it.
    pub async fn start_new_game(&self, config: GameConfig) -> Result<SessionId> {
        if self.config.validate_game_config {
            if let Err(err) = config.validate() {
                return self.reported(Err(err.into()));
            }
        }

        let transport = self.transport.clone();
        let created = self
            .policy
            .call(|identity| {
                let transport = transport.clone();
                async move {
                    transport
                        .create_session(config, &identity.access_token)
                        .await
                }
            })
            .await;
        let session = self.reported(created)?;
        self.begin(session).await
    }

    /// Join an existing session and start tracking it.
    pub async fn join(&self, session_id: impl Into<SessionId>) -> Result<SessionId> {
        let session_id = session_id.into();
        let transport = self.transport.clone();
        let joined = self
            .policy
            .call(|identity| {
                let transport = transport.clone();
                let session_id = session_id.clone();
                async move {
                    transport
                        .join_session(&session_id, &identity.access_token)
                        .await
                }
            })
            .await;
        let session = self.reported(joined)?;
        self.begin(session).await
    }

    /// Leave the active session. Local state is only dropped once the
    /// authority accepted the request.
    pub async fn leave(&self) -> Result<()> {
        let binding = self.binding()?;
        let transport = self.transport.clone();
        let left = self
            .policy
            .call(|identity| {
                let transport = transport.clone();
                let session_id = binding.id.clone();
                async move {
                    transport
                        .leave_session(&session_id, &identity.access_token)
                        .await
                }
            })
            .await;
        self.reported(left)?;
        info!(target: LOG_TARGET, session_id = %binding.id, "left session");
        self.reset().await
    }

    pub async fn vote(&self, target: impl Into<Target>) -> Result<()> {
        let binding = self.binding()?;
        let result = self
            .dispatcher
            .vote(&binding.id, target.into(), &binding.cancel)
            .await;
        self.reported(result)
    }

    pub async fn eliminate(&self, target: impl Into<Target>) -> Result<()> {
        let binding = self.binding()?;
        let result = self
            .dispatcher
            .eliminate(&binding.id, target.into(), &binding.cancel)
            .await;
        self.reported(result)
    }

    pub async fn advance(&self) -> Result<()> {
        let binding = self.binding()?;
        let result = self.dispatcher.advance(&binding.id, &binding.cancel).await;
        self.reported(result)
    }

    /// Wait for the first summary whose clock differs from `(phase, day)`.
    ///
    /// The comparison starts with the cached latest summary, so a stale
    /// `(phase, day)` resolves at once with that summary rather than the next
    /// transition.
    pub async fn wait_for_transition(&self, phase: Phase, day: u32) -> Result<GameSummary> {
        let mut latest = self.outputs.latest.subscribe();
        loop {
            {
                let current = latest.borrow_and_update();
                if let Some(summary) = current.as_ref().filter(|s| s.moved_from(phase, day)) {
                    return Ok(summary.clone());
                }
            }
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(ClientError::Closed),
                changed = latest.changed() => changed.map_err(|_| ClientError::Closed)?,
            }
        }
    }

    /// Stop the engine and wait for it to finish.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(engine) = self.engine.take() {
            if let Err(err) = engine.await {
                warn!(target: LOG_TARGET, error = %err, "engine task failed");
            }
        }
    }

    async fn begin(&self, session: Session) -> Result<SessionId> {
        let session_id = session.id.clone();
        let local_player = self.identity.current().await.map(|i| i.player_id);
        let (done, finished) = oneshot::channel();
        self.commands
            .send(Command::Begin {
                session,
                local_player,
                done,
            })
            .map_err(|_| ClientError::Closed)?;
        finished.await.map_err(|_| ClientError::Closed)?;
        Ok(session_id)
    }

    async fn reset(&self) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.commands
            .send(Command::Reset { done })
            .map_err(|_| ClientError::Closed)?;
        finished.await.map_err(|_| ClientError::Closed)
    }

    fn binding(&self) -> Result<SessionBinding> {
        self.outputs
            .session
            .borrow()
            .clone()
            .ok_or(ClientError::NoSession)
    }

    fn reported<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.outputs.report(err);
        }
        result
    }
}

impl Drop for GameClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StatusCode, TransportError};
    use crate::state::player::Faction;
    use crate::test_support::{eventually, full_session, within, Harness, Op, ME, SESSION};
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast::error::TryRecvError;

    fn night_one() -> ChangeEvent {
        ChangeEvent::snapshot(full_session(Phase::Night, 1))
    }

    /// Join the fixture session, consuming the start summary.
    async fn joined(harness: &Harness, summaries: &mut broadcast::Receiver<GameSummary>) {
        harness.client.join(SESSION).await.unwrap();
        let start = within(summaries.recv()).await.unwrap();
        assert_eq!((start.phase, start.day), (Phase::Start, 0));
    }

    #[tokio::test]
    async fn test_create_publishes_start_summary() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        let mut summaries = harness.client.subscribe();

        let id = harness
            .client
            .start_new_game(GameConfig::new(5, 1))
            .await
            .unwrap();

        assert_eq!(id, SessionId::new(SESSION));
        let summary = within(summaries.recv()).await.unwrap();
        assert_eq!(summary.phase, Phase::Start);
        assert_eq!(summary.config, GameConfig::new(5, 1));
        assert_eq!(*harness.client.status().borrow(), SessionStatus::Active);
        assert_eq!(harness.client.roster().borrow().len(), 5);
        assert_eq!(harness.client.my_player().borrow().as_ref().unwrap().id, ME);
        assert_eq!(harness.transport.calls_for(Op::Create)[0].token, "access-0");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_locally() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        let mut errors = harness.client.subscribe_errors();

        let err = harness
            .client
            .start_new_game(GameConfig::new(4, 2))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::InvalidConfig(_)));
        assert_eq!(within(errors.recv()).await.unwrap(), err);
        assert_eq!(harness.transport.count(Op::Create), 0);
        assert_eq!(harness.client.session_id(), None);
    }

    #[tokio::test]
    async fn test_first_night_reveals_roles_before_publishing() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        harness.transport.set_roles([(ME, Role::Special)]);
        let stream = harness.transport.push_stream();
        let mut summaries = harness.client.subscribe();
        joined(&harness, &mut summaries).await;

        stream.send(Ok(night_one())).unwrap();

        let summary = within(summaries.recv()).await.unwrap();
        assert_eq!((summary.phase, summary.day), (Phase::Night, 1));
        assert_eq!(harness.transport.count(Op::FetchRoles), 1);

        let me = harness.client.my_player().borrow().clone().unwrap();
        assert_eq!(me.role, Role::Special);
        assert_eq!(me.faction, Faction::Special);
        let roster = harness.client.roster().borrow().clone();
        assert!(roster.iter().all(|p| p.role.is_known()));
        assert_eq!(roster.iter().filter(|p| p.role == Role::Special).count(), 1);
        let indices: Vec<_> = roster.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_role_fetch_failure_withholds_summary() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        harness
            .transport
            .fail_next(Op::FetchRoles, TransportError::unavailable("roles offline"));
        harness.transport.set_roles([(ME, Role::Ordinary)]);
        let stream = harness.transport.push_stream();
        let mut summaries = harness.client.subscribe();
        let mut errors = harness.client.subscribe_errors();
        joined(&harness, &mut summaries).await;

        stream.send(Ok(night_one())).unwrap();
        let err = within(errors.recv()).await.unwrap();
        assert!(err.is_recoverable());
        assert_eq!(summaries.try_recv().unwrap_err(), TryRecvError::Empty);

        // a repeated first-night snapshot retries the fetch
        stream.send(Ok(night_one())).unwrap();
        let summary = within(summaries.recv()).await.unwrap();
        assert_eq!((summary.phase, summary.day), (Phase::Night, 1));
        assert_eq!(harness.transport.count(Op::FetchRoles), 2);
    }

    #[tokio::test]
    async fn test_expired_token_on_vote_refreshes() {
        let harness = Harness::start(full_session(Phase::Noon, 1)).await;
        let mut summaries = harness.client.subscribe();
        harness.client.join(SESSION).await.unwrap();
        within(summaries.recv()).await.unwrap();
        let transport = harness.transport.clone();
        assert!(eventually(|| transport.count(Op::Observe) == 1).await);
        harness.transport.expire_token("access-0");

        harness.client.vote(PlayerId(3)).await.unwrap();

        let tokens: Vec<_> = harness
            .transport
            .calls_for(Op::Vote)
            .into_iter()
            .map(|c| c.token)
            .collect();
        assert_eq!(tokens, vec!["access-0", "access-1"]);
        assert_eq!(harness.auth.refresh_calls(), 1);
        assert_eq!(harness.store.snapshot().unwrap().access_token, "access-1");
    }

    #[tokio::test]
    async fn test_abstain_sends_sentinel() {
        let harness = Harness::start(full_session(Phase::Noon, 1)).await;
        harness.client.join(SESSION).await.unwrap();

        harness.client.vote(Target::Abstain).await.unwrap();
        harness.client.eliminate(None::<PlayerId>).await.unwrap();

        assert_eq!(
            harness.transport.calls_for(Op::Vote)[0].target,
            Some(PlayerId::NONE)
        );
        assert_eq!(
            harness.transport.calls_for(Op::Eliminate)[0].target,
            Some(PlayerId::NONE)
        );
    }

    #[tokio::test]
    async fn test_resync_after_stream_drop() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        harness.transport.set_roles([(ME, Role::Special)]);
        let first = harness.transport.push_stream();
        let second = harness.transport.push_stream();
        let mut summaries = harness.client.subscribe();
        joined(&harness, &mut summaries).await;

        first.send(Ok(night_one())).unwrap();
        within(summaries.recv()).await.unwrap();
        drop(first);

        let mut noon = full_session(Phase::Noon, 1);
        if let Some(player) = noon.roster.get_mut(&PlayerId(3)) {
            player.eliminate();
        }
        second.send(Ok(ChangeEvent::snapshot(noon))).unwrap();

        let summary = within(summaries.recv()).await.unwrap();
        assert_eq!((summary.phase, summary.day), (Phase::Noon, 1));
        assert_eq!(harness.transport.count(Op::Observe), 2);
        assert_eq!(harness.transport.count(Op::FetchRoles), 1);

        let me = harness.client.my_player().borrow().clone().unwrap();
        assert_eq!(me.role, Role::Special);
        let roster = harness.client.roster().borrow().clone();
        assert!(roster.iter().any(|p| p.id == PlayerId(3) && p.is_eliminated));
    }

    #[tokio::test]
    async fn test_elimination_names_player() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        harness.transport.set_roles([(ME, Role::Ordinary)]);
        let stream = harness.transport.push_stream();
        let mut summaries = harness.client.subscribe();
        joined(&harness, &mut summaries).await;

        stream.send(Ok(night_one())).unwrap();
        within(summaries.recv()).await.unwrap();

        let mut noon = full_session(Phase::Noon, 1);
        if let Some(player) = noon.roster.get_mut(&PlayerId(2)) {
            player.eliminate();
        }
        stream
            .send(Ok(ChangeEvent::player_eliminated(PlayerId(2), noon, Phase::Night)))
            .unwrap();

        let summary = within(summaries.recv()).await.unwrap();
        assert_eq!(summary.eliminated_player.map(|p| p.name), Some("Bob".to_string()));
    }

    #[tokio::test]
    async fn test_membership_changes_do_not_notify() {
        let lobby = full_session(Phase::Start, 0);
        let mut smaller = lobby.clone();
        smaller.roster.remove(&PlayerId(5));
        let harness = Harness::start(smaller).await;
        let stream = harness.transport.push_stream();
        let mut summaries = harness.client.subscribe();
        joined(&harness, &mut summaries).await;
        assert_eq!(harness.client.roster().borrow().len(), 4);

        stream
            .send(Ok(ChangeEvent::player_joined(PlayerId(5), lobby.clone())))
            .unwrap();
        stream.send(Ok(night_one())).unwrap();

        // the first summary after the join is the first night
        let summary = within(summaries.recv()).await.unwrap();
        assert_eq!(summary.phase, Phase::Night);
        assert_eq!(harness.client.roster().borrow().len(), 5);
    }

    #[tokio::test]
    async fn test_game_end_reports_win() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        harness.transport.set_roles([(ME, Role::Special)]);
        let stream = harness.transport.push_stream();
        let mut summaries = harness.client.subscribe();
        joined(&harness, &mut summaries).await;

        stream.send(Ok(night_one())).unwrap();
        within(summaries.recv()).await.unwrap();
        stream
            .send(Ok(ChangeEvent::game_ended(
                Faction::Special,
                full_session(Phase::End, 2),
                Phase::Night,
            )))
            .unwrap();

        let summary = within(summaries.recv()).await.unwrap();
        assert_eq!(summary.winning_faction, Some(Faction::Special));
        assert_eq!(summary.local_won, Some(true));
        assert!(summary.is_final());
        assert_eq!(*harness.client.status().borrow(), SessionStatus::Ended);
    }

    #[tokio::test]
    async fn test_fatal_stream_error_is_reported() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        let stream = harness.transport.push_stream();
        let mut errors = harness.client.subscribe_errors();
        harness.client.join(SESSION).await.unwrap();

        stream
            .send(Err(TransportError::new(StatusCode::NotFound, "game closed")))
            .unwrap();

        let err = within(errors.recv()).await.unwrap();
        assert_eq!(err, ClientError::SessionGone("game closed".into()));
        let stats = harness.client.subscription_stats().unwrap();
        assert!(stats.status.is_terminated());
    }

    #[tokio::test]
    async fn test_remote_cancel_resubscribes() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        harness.transport.set_roles([(ME, Role::Ordinary)]);
        let first = harness.transport.push_stream();
        let second = harness.transport.push_stream();
        let mut summaries = harness.client.subscribe();
        let mut errors = harness.client.subscribe_errors();
        joined(&harness, &mut summaries).await;

        first
            .send(Err(TransportError::new(StatusCode::Cancelled, "rst by proxy")))
            .unwrap();
        second.send(Ok(night_one())).unwrap();

        let summary = within(summaries.recv()).await.unwrap();
        assert_eq!((summary.phase, summary.day), (Phase::Night, 1));
        assert_eq!(harness.transport.count(Op::Observe), 2);
        let stats = harness.client.subscription_stats().unwrap();
        assert!(!stats.status.is_terminated());
        assert_eq!(errors.try_recv().unwrap_err(), TryRecvError::Empty);
    }

    #[tokio::test]
    async fn test_leave_tears_down_session() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        harness.client.join(SESSION).await.unwrap();

        harness.client.leave().await.unwrap();

        assert_eq!(harness.client.session_id(), None);
        assert_eq!(harness.client.latest_summary(), None);
        assert_eq!(*harness.client.status().borrow(), SessionStatus::NoSession);
        assert!(harness.client.roster().borrow().is_empty());
        assert_eq!(harness.client.advance().await, Err(ClientError::NoSession));
    }

    #[tokio::test]
    async fn test_actions_need_a_session() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        assert_eq!(
            harness.client.vote(PlayerId(2)).await,
            Err(ClientError::NoSession)
        );
        assert_eq!(harness.client.leave().await, Err(ClientError::NoSession));
    }

    #[tokio::test]
    async fn test_wait_for_transition() {
        let harness = Harness::start(full_session(Phase::Noon, 1)).await;
        let stream = harness.transport.push_stream();
        harness.client.join(SESSION).await.unwrap();

        let waiter = harness.client.wait_for_transition(Phase::Noon, 1);
        stream
            .send(Ok(ChangeEvent::snapshot(full_session(Phase::Night, 2))))
            .unwrap();

        let summary = within(waiter).await.unwrap();
        assert_eq!((summary.phase, summary.day), (Phase::Night, 2));
    }

    #[tokio::test]
    async fn test_wait_for_transition_with_stale_clock_returns_cached() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        let mut summaries = harness.client.subscribe();
        joined(&harness, &mut summaries).await;

        let summary = within(harness.client.wait_for_transition(Phase::Night, 3))
            .await
            .unwrap();
        assert_eq!((summary.phase, summary.day), (Phase::Start, 0));
    }

    #[tokio::test]
    async fn test_sign_out_clears_identity() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        harness.client.join(SESSION).await.unwrap();

        harness.client.sign_out().await.unwrap();

        assert_eq!(harness.store.snapshot(), None);
        assert_eq!(harness.client.session_id(), None);
        assert_eq!(
            harness.client.join(SESSION).await,
            Err(ClientError::NoIdentity)
        );

        let identity = harness.client.register("Zed").await.unwrap();
        assert_eq!(harness.client.identity().await, Some(identity));
    }

    #[tokio::test]
    async fn test_shutdown_stops_engine() {
        let harness = Harness::start(full_session(Phase::Start, 0)).await;
        harness.client.join(SESSION).await.unwrap();
        let transport = harness.transport.clone();

        within(harness.client.shutdown()).await;
        assert_eq!(transport.count(Op::Join), 1);
    }
}
