//! Scripted fakes for the transport and auth seams.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::client::GameClient;
use crate::config::{ClientConfig, ResubscribeBackoff};
use crate::credentials::InMemoryCredentialStore;
use crate::error::TransportError;
use crate::state::game::{ChangeEvent, GameConfig, Session, SessionId};
use crate::state::player::{Identity, Player, PlayerId, Role, TokenPair};
use crate::transport::{AuthService, EventStream, GameTransport};

pub(crate) const ME: PlayerId = PlayerId(1);

pub(crate) const SESSION: &str = "s-1";

pub(crate) fn identity() -> Identity {
    Identity::new(ME, "Alice", TokenPair::new("access-0", "refresh-0"))
}

/// A 5-player, 1-special session with every seat taken, at `(phase, day)`.
pub(crate) fn full_session(phase: crate::state::game::Phase, day: u32) -> Session {
    ["Alice", "Bob", "Carol", "Dave", "Eve"]
        .iter()
        .zip(1u64..)
        .fold(
            Session::new(SESSION, GameConfig::new(5, 1)).with_clock(phase, day),
            |session, (name, id)| session.with_player(Player::new(id, *name, id as u32)),
        )
}

/// Poll `condition` until it holds or a second has passed.
pub(crate) async fn eventually<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub(crate) async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

/// Auth service handing out `access-N`/`refresh-N` pairs.
#[derive(Debug, Default)]
pub(crate) struct FakeAuth {
    issued: AtomicU64,
    refresh_calls: AtomicUsize,
    failures: Mutex<VecDeque<TransportError>>,
    delay: Option<Duration>,
}

impl FakeAuth {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn fail_next_refresh(&self, err: TransportError) {
        self.failures.lock().push_back(err);
    }

    pub(crate) fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn register(&self, name: &str) -> Result<Identity, TransportError> {
        Ok(Identity::new(
            ME,
            name,
            TokenPair::new("access-0", "refresh-0"),
        ))
    }

    async fn refresh(&self, _refresh_token: &str) -> Result<TokenPair, TransportError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.failures.lock().pop_front() {
            return Err(err);
        }
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TokenPair::new(format!("access-{n}"), format!("refresh-{n}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Op {
    Create,
    Join,
    Leave,
    Vote,
    Eliminate,
    Advance,
    FetchRoles,
    Observe,
}

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Call {
    pub op: Op,
    pub token: String,
    pub target: Option<PlayerId>,
}

type StreamItem = Result<ChangeEvent, TransportError>;

/// In-process authority with scripted responses.
///
/// Calls presenting an expired token fail with "Token is expired"; other
/// scripted failures are consumed per operation before calls succeed.
/// Every call yields once first, so concurrent callers interleave.
#[derive(Debug)]
pub(crate) struct FakeTransport {
    session: Mutex<Session>,
    roles: Mutex<HashMap<PlayerId, Role>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<Op, VecDeque<TransportError>>>,
    expired_tokens: Mutex<HashSet<String>>,
    expire_all: AtomicBool,
    streams: Mutex<VecDeque<mpsc::UnboundedReceiver<StreamItem>>>,
}

impl FakeTransport {
    pub(crate) fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            roles: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            expired_tokens: Mutex::new(HashSet::new()),
            expire_all: AtomicBool::new(false),
            streams: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn set_roles(&self, roles: impl IntoIterator<Item = (PlayerId, Role)>) {
        *self.roles.lock() = roles.into_iter().collect();
    }

    pub(crate) fn fail_next(&self, op: Op, err: TransportError) {
        self.failures.lock().entry(op).or_default().push_back(err);
    }

    pub(crate) fn expire_token(&self, token: &str) {
        self.expired_tokens.lock().insert(token.to_string());
    }

    pub(crate) fn expire_all_tokens(&self) {
        self.expire_all.store(true, Ordering::SeqCst);
    }

    /// Queue a stream for the next successful `observe_state`. Dropping the
    /// sender ends the stream cleanly.
    pub(crate) fn push_stream(&self) -> mpsc::UnboundedSender<StreamItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().push_back(rx);
        tx
    }

    pub(crate) fn calls_for(&self, op: Op) -> Vec<Call> {
        self.calls.lock().iter().filter(|c| c.op == op).cloned().collect()
    }

    pub(crate) fn count(&self, op: Op) -> usize {
        self.calls.lock().iter().filter(|c| c.op == op).count()
    }

    async fn enter(
        &self,
        op: Op,
        token: &str,
        target: Option<PlayerId>,
    ) -> Result<(), TransportError> {
        tokio::task::yield_now().await;
        self.calls.lock().push(Call {
            op,
            token: token.to_string(),
            target,
        });
        if self.expire_all.load(Ordering::SeqCst) || self.expired_tokens.lock().contains(token) {
            return Err(TransportError::token_expired());
        }
        if let Some(err) = self.failures.lock().get_mut(&op).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl GameTransport for FakeTransport {
    async fn create_session(
        &self,
        config: GameConfig,
        token: &str,
    ) -> Result<Session, TransportError> {
        self.enter(Op::Create, token, None).await?;
        let mut session = self.session.lock().clone();
        session.config = config;
        Ok(session)
    }

    async fn join_session(&self, _id: &SessionId, token: &str) -> Result<Session, TransportError> {
        self.enter(Op::Join, token, None).await?;
        Ok(self.session.lock().clone())
    }

    async fn leave_session(&self, _id: &SessionId, token: &str) -> Result<Session, TransportError> {
        self.enter(Op::Leave, token, None).await?;
        Ok(self.session.lock().clone())
    }

    async fn vote(
        &self,
        _id: &SessionId,
        target: PlayerId,
        token: &str,
    ) -> Result<(), TransportError> {
        self.enter(Op::Vote, token, Some(target)).await
    }

    async fn eliminate(
        &self,
        _id: &SessionId,
        target: PlayerId,
        token: &str,
    ) -> Result<(), TransportError> {
        self.enter(Op::Eliminate, token, Some(target)).await
    }

    async fn advance_phase(&self, _id: &SessionId, token: &str) -> Result<(), TransportError> {
        self.enter(Op::Advance, token, None).await
    }

    async fn fetch_roles(
        &self,
        _id: &SessionId,
        token: &str,
    ) -> Result<HashMap<PlayerId, Role>, TransportError> {
        self.enter(Op::FetchRoles, token, None).await?;
        Ok(self.roles.lock().clone())
    }

    async fn observe_state(
        &self,
        _id: &SessionId,
        token: &str,
    ) -> Result<EventStream, TransportError> {
        self.enter(Op::Observe, token, None).await?;
        match self.streams.lock().pop_front() {
            Some(rx) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            None => Ok(futures::stream::pending().boxed()),
        }
    }
}

/// A started client over fresh fakes, signed in as [`ME`].
pub(crate) struct Harness {
    pub transport: Arc<FakeTransport>,
    pub auth: Arc<FakeAuth>,
    pub store: Arc<InMemoryCredentialStore>,
    pub client: GameClient,
}

impl Harness {
    pub(crate) async fn start(session: Session) -> Self {
        let transport = Arc::new(FakeTransport::new(session));
        let auth = Arc::new(FakeAuth::new());
        let store = Arc::new(InMemoryCredentialStore::with_identity(identity()));
        let config = ClientConfig::default().with_resubscribe_backoff(ResubscribeBackoff::immediate());
        let client = GameClient::start(transport.clone(), auth.clone(), store.clone(), config)
            .await
            .expect("client starts");
        Self {
            transport,
            auth,
            store,
            client,
        }
    }
}
