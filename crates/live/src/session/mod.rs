//! Preview sessions.
//!
//! [`LivePreview`] is the entry point: construct it with a config and a
//! client factory, call [`initialize`](LivePreview::initialize) once, then
//! [`subscribe`](LivePreview::subscribe) to queries. Each [`LiveQuery`]
//! yields the current result immediately and then every change to it.

mod engine;

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use sightline_worker::{ActorEventReceiver, ActorHandle, ActorPort, ActorSpec, ShutdownMode, TaskClass};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

pub use self::engine::{DocumentsInUse, EntryInfo, PreviewEvent};
use self::engine::{EngineCmd, EngineParts, PreviewEngine, Subscription};
use crate::client::ClientFactory;
use crate::config::{ClientConfig, PreviewConfig};
use crate::error::{ConfigError, PreviewError, Result};
use crate::key::QueryKey;
use crate::projector::Projector;
use crate::revalidate::{RevalidateState, Visibility};
use crate::store::DocumentStore;

/// How long [`LivePreview::shutdown`] lets the session drain queued work.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

struct Session {
	actor: ActorHandle<EngineCmd, PreviewEvent>,
	client_config: ClientConfig,
	revalidate: watch::Receiver<RevalidateState>,
	documents_in_use: watch::Receiver<DocumentsInUse>,
}

impl Session {
	fn send(&self, cmd: EngineCmd) -> Result<()> {
		if self.actor.send(cmd) {
			Ok(())
		} else {
			Err(PreviewError::ShutDown)
		}
	}

	async fn request<T>(&self, cmd: impl FnOnce(oneshot::Sender<T>) -> EngineCmd) -> Result<T> {
		let (tx, rx) = oneshot::channel();
		self.send(cmd(tx))?;
		rx.await.map_err(|_| PreviewError::ShutDown)
	}
}

enum SessionState {
	Uninitialized,
	Running(Arc<Session>),
	ShutDown,
}

/// Live preview over one project and dataset.
pub struct LivePreview {
	config: PreviewConfig,
	factory: Arc<dyn ClientFactory>,
	state: Mutex<SessionState>,
}

impl LivePreview {
	/// Validates `config`; nothing runs until [`initialize`](Self::initialize).
	pub fn new(config: PreviewConfig, factory: impl ClientFactory + 'static) -> Result<Self> {
		config.validate()?;
		Ok(Self {
			config,
			factory: Arc::new(factory),
			state: Mutex::new(SessionState::Uninitialized),
		})
	}

	pub fn config(&self) -> &PreviewConfig {
		&self.config
	}

	/// Builds the client for `token` (empty for anonymous access) and starts
	/// the session. Calling it again while running only logs a warning.
	///
	/// # Errors
	///
	/// [`PreviewError::NoRuntime`] outside a tokio runtime; the session stays
	/// uninitialized and can be initialized again from inside one.
	pub fn initialize(&self, token: &str) -> Result<()> {
		let mut state = self.state.lock();
		match &*state {
			SessionState::Running(_) => {
				warn!("live preview is already initialized");
				return Ok(());
			}
			SessionState::ShutDown => return Err(PreviewError::ShutDown),
			SessionState::Uninitialized => {}
		}
		if tokio::runtime::Handle::try_current().is_err() {
			return Err(PreviewError::NoRuntime);
		}

		let client_config = self.config.client_config(token);
		let client = self.factory.create(&client_config);
		let capacity = NonZeroUsize::new(self.config.document_cache_capacity)
			.ok_or_else(|| ConfigError::Invalid("document_cache_capacity must be at least 1".to_owned()))?;
		let (revalidate_tx, revalidate) = watch::channel(RevalidateState::Hit);
		let (documents_tx, documents_in_use) = watch::channel(DocumentsInUse::new());

		let engine = PreviewEngine::new(EngineParts {
			client,
			listen_filter: self.config.listen_filter.clone(),
			refresh_interval: self.config.refresh_interval(),
			store: DocumentStore::new(capacity),
			projector: Projector::new(&client_config.project_id, &client_config.dataset, client_config.perspective),
			revalidate: revalidate_tx,
			documents_in_use: documents_tx,
		});
		let actor = ActorSpec::new("live-preview", TaskClass::Interactive, engine).spawn();
		info!(
			project_id = %client_config.project_id,
			dataset = %client_config.dataset,
			perspective = client_config.perspective.as_str(),
			authenticated = client_config.token.is_some(),
			"live preview initialized"
		);

		*state = SessionState::Running(Arc::new(Session {
			actor,
			client_config,
			revalidate,
			documents_in_use,
		}));
		Ok(())
	}

	pub fn is_initialized(&self) -> bool {
		matches!(*self.state.lock(), SessionState::Running(_))
	}

	fn session(&self) -> Result<Arc<Session>> {
		match &*self.state.lock() {
			SessionState::Running(session) => Ok(Arc::clone(session)),
			SessionState::Uninitialized => Err(PreviewError::NotInitialized),
			SessionState::ShutDown => Err(PreviewError::ShutDown),
		}
	}

	/// Subscribes to `query` with `params`.
	///
	/// The first subscriber of a query seeds its snapshot with `initial`
	/// (or `null`) and triggers a fetch; later subscribers share the entry
	/// and see its current value.
	///
	/// # Errors
	///
	/// [`PreviewError::NotInitialized`] before [`initialize`](Self::initialize),
	/// without waiting on anything.
	pub async fn subscribe(&self, query: &str, params: Value, initial: Option<Value>) -> Result<LiveQuery> {
		let session = self.session()?;
		let subscription = session
			.request(|reply| EngineCmd::Subscribe {
				query: query.to_owned(),
				params,
				initial,
				reply,
			})
			.await?;
		Ok(LiveQuery::new(subscription, session.actor.port()))
	}

	/// Refetches every live query now, cancelling any refresh in flight.
	pub fn revalidate(&self) -> Result<()> {
		self.session()?.send(EngineCmd::Revalidate)
	}

	/// Window focus: marks content stale when it is fresh.
	pub fn notify_focus(&self) -> Result<()> {
		self.session()?.send(EngineCmd::Focus)
	}

	pub fn set_online(&self, online: bool) -> Result<()> {
		self.session()?.send(EngineCmd::SetOnline(online))
	}

	pub fn set_visibility(&self, visibility: Visibility) -> Result<()> {
		self.session()?.send(EngineCmd::SetVisibility(visibility))
	}

	pub fn revalidate_state(&self) -> Result<watch::Receiver<RevalidateState>> {
		Ok(self.session()?.revalidate.clone())
	}

	/// Documents the session's live queries are built from.
	pub fn documents_in_use(&self) -> Result<watch::Receiver<DocumentsInUse>> {
		Ok(self.session()?.documents_in_use.clone())
	}

	pub fn events(&self) -> Result<ActorEventReceiver<PreviewEvent>> {
		Ok(self.session()?.actor.subscribe())
	}

	/// Effective configuration the client was built with.
	pub fn client_config(&self) -> Result<ClientConfig> {
		Ok(self.session()?.client_config.clone())
	}

	/// Registry entry for `(query, params)`, if one is live.
	pub async fn entry_info(&self, query: &str, params: &Value) -> Result<Option<EntryInfo>> {
		let key = QueryKey::new(query, params);
		self.session()?.request(|reply| EngineCmd::Inspect { key, reply }).await
	}

	/// Cached copy of document `id`, without touching its recency.
	pub async fn cached_document(&self, id: &str) -> Result<Option<Value>> {
		let id = id.to_owned();
		self.session()?.request(|reply| EngineCmd::CachedDocument { id, reply }).await
	}

	/// Stops the session. Live queries end; later calls fail with
	/// [`PreviewError::ShutDown`].
	pub async fn shutdown(&self) {
		let previous = std::mem::replace(&mut *self.state.lock(), SessionState::ShutDown);
		let SessionState::Running(session) = previous else {
			return;
		};
		let report = session.actor.shutdown(ShutdownMode::Graceful { timeout: SHUTDOWN_GRACE }).await;
		debug!(exit = ?report.exit(), timed_out = report.timed_out(), "live preview shut down");
	}
}

/// One subscriber's view of a live query.
///
/// Dropping it releases the subscription.
pub struct LiveQuery {
	key: QueryKey,
	generation: u64,
	receiver: watch::Receiver<Value>,
	port: ActorPort<EngineCmd>,
	primed: bool,
}

impl LiveQuery {
	fn new(subscription: Subscription, port: ActorPort<EngineCmd>) -> Self {
		Self {
			key: subscription.key,
			generation: subscription.generation,
			receiver: subscription.receiver,
			port,
			primed: false,
		}
	}

	pub fn key(&self) -> &QueryKey {
		&self.key
	}

	/// Latest value, without waiting.
	pub fn current(&self) -> Value {
		self.receiver.borrow().clone()
	}

	/// The current value on the first call, then the next changed value.
	///
	/// Returns `None` once the session is gone. Values that are replaced
	/// before they are read are skipped.
	pub async fn next(&mut self) -> Option<Value> {
		if !self.primed {
			self.primed = true;
			return Some(self.receiver.borrow_and_update().clone());
		}
		self.receiver.changed().await.ok()?;
		Some(self.receiver.borrow_and_update().clone())
	}

	pub fn into_stream(self) -> impl Stream<Item = Value> + Send + 'static {
		futures::stream::unfold(self, |mut query| async move {
			let value = query.next().await?;
			Some((value, query))
		})
	}
}

impl std::fmt::Debug for LiveQuery {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("LiveQuery")
			.field("key", &self.key)
			.field("generation", &self.generation)
			.finish_non_exhaustive()
	}
}

impl Drop for LiveQuery {
	fn drop(&mut self) {
		self.port.send(EngineCmd::Unsubscribe {
			key: self.key.clone(),
			generation: self.generation,
		});
	}
}
