//! Single-owner actors.
//!
//! An actor owns its state outright; everything else talks to it through
//! commands queued on an unbounded mailbox and observes it through broadcast
//! events. Commands are handled one at a time, in arrival order, so handlers
//! never need locks around actor state.
//!
//! The mailbox is unbounded so that [`ActorPort::send`] never blocks and can be
//! called from `Drop` impls and from inside other handlers.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::TaskClass;

/// Capacity of each actor's event broadcast.
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Continuation directive from one actor command handling step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorFlow {
	/// Continue processing commands.
	Continue,
	/// Stop this actor.
	Stop,
}

/// Why an actor loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActorExit {
	Stopped,
	MailboxClosed,
	Cancelled,
	StartupFailed(String),
	HandlerFailed(String),
	Panicked,
	JoinFailed(String),
}

impl ActorExit {
	pub fn is_failure(&self) -> bool {
		matches!(
			self,
			Self::StartupFailed(_) | Self::HandlerFailed(_) | Self::Panicked | Self::JoinFailed(_)
		)
	}
}

/// Shutdown mode for actors.
#[derive(Debug, Clone, Copy)]
pub enum ShutdownMode {
	/// Stop after the command currently being handled.
	Immediate,
	/// Drain commands already queued, then stop; force after `timeout`.
	Graceful { timeout: Duration },
}

/// Shutdown report for one actor.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
	timed_out: bool,
	exit: Option<ActorExit>,
}

impl ShutdownReport {
	pub fn completed(&self) -> bool {
		!self.timed_out && self.exit.is_some()
	}

	pub fn timed_out(&self) -> bool {
		self.timed_out
	}

	pub fn exit(&self) -> Option<&ActorExit> {
		self.exit.as_ref()
	}
}

/// Actor trait executed by [`ActorSpec::spawn`].
#[async_trait]
pub trait Actor: Send + 'static {
	type Cmd: Send + 'static;
	type Evt: Clone + Send + 'static;

	async fn on_start(&mut self, _ctx: &mut ActorContext<Self::Cmd, Self::Evt>) -> Result<(), String> {
		Ok(())
	}

	async fn on_stop(&mut self, _ctx: &mut ActorContext<Self::Cmd, Self::Evt>) {}

	async fn handle(&mut self, cmd: Self::Cmd, ctx: &mut ActorContext<Self::Cmd, Self::Evt>) -> Result<ActorFlow, String>;
}

/// Cloneable, non-blocking enqueue port into one actor's mailbox.
pub struct ActorPort<Cmd> {
	tx: mpsc::UnboundedSender<Cmd>,
}

impl<Cmd> Clone for ActorPort<Cmd> {
	fn clone(&self) -> Self {
		Self { tx: self.tx.clone() }
	}
}

impl<Cmd> std::fmt::Debug for ActorPort<Cmd> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ActorPort").field("closed", &self.tx.is_closed()).finish()
	}
}

impl<Cmd> ActorPort<Cmd> {
	/// Enqueues one command. Returns `false` once the actor has exited.
	pub fn send(&self, cmd: Cmd) -> bool {
		self.tx.send(cmd).is_ok()
	}

	/// Returns whether the actor has exited.
	pub fn is_closed(&self) -> bool {
		self.tx.is_closed()
	}
}

/// Actor execution context: event emitter, own port, and the actor's lifetime token.
pub struct ActorContext<Cmd, Evt> {
	events: broadcast::Sender<Evt>,
	port: ActorPort<Cmd>,
	cancel: CancellationToken,
}

impl<Cmd, Evt> ActorContext<Cmd, Evt>
where
	Evt: Clone + Send + 'static,
{
	/// Emits one actor event to subscribers.
	pub fn emit(&self, evt: Evt) {
		let _ = self.events.send(evt);
	}

	/// Port back into this actor's own mailbox, for tasks that report results.
	pub fn port(&self) -> ActorPort<Cmd> {
		self.port.clone()
	}

	/// Token cancelled when the actor stops; child tokens die with the actor.
	pub fn lifetime(&self) -> &CancellationToken {
		&self.cancel
	}
}

/// Builder spec for one actor.
pub struct ActorSpec<A>
where
	A: Actor,
{
	name: String,
	class: TaskClass,
	actor: A,
}

impl<A> ActorSpec<A>
where
	A: Actor,
{
	pub fn new(name: impl Into<String>, class: TaskClass, actor: A) -> Self {
		Self {
			name: name.into(),
			class,
			actor,
		}
	}

	/// Starts the actor loop on the current runtime.
	pub fn spawn(self) -> ActorHandle<A::Cmd, A::Evt> {
		let (tx, rx) = mpsc::unbounded_channel();
		let (events, _) = broadcast::channel(DEFAULT_EVENT_BUFFER);
		let cancel = CancellationToken::new();
		let drain = CancellationToken::new();
		let port = ActorPort { tx };

		let ctx = ActorContext {
			events: events.clone(),
			port: port.clone(),
			cancel: cancel.child_token(),
		};
		let name = self.name.clone();
		let task = crate::spawn(
			self.class,
			run_actor(self.actor, rx, ctx, cancel.clone(), drain.clone(), name),
		);

		ActorHandle {
			name: self.name,
			class: self.class,
			port,
			events,
			cancel,
			drain,
			join: Mutex::new(JoinState::Running(task)),
		}
	}
}

enum JoinState {
	Running(JoinHandle<ActorExit>),
	Finished(ActorExit),
}

/// Handle for one running actor.
pub struct ActorHandle<Cmd, Evt> {
	name: String,
	class: TaskClass,
	port: ActorPort<Cmd>,
	events: broadcast::Sender<Evt>,
	cancel: CancellationToken,
	drain: CancellationToken,
	join: Mutex<JoinState>,
}

impl<Cmd, Evt> Drop for ActorHandle<Cmd, Evt> {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

impl<Cmd, Evt> ActorHandle<Cmd, Evt>
where
	Cmd: Send + 'static,
	Evt: Clone + Send + 'static,
{
	pub fn name(&self) -> &str {
		&self.name
	}

	pub const fn class(&self) -> TaskClass {
		self.class
	}

	/// Subscribes to actor events.
	pub fn subscribe(&self) -> crate::ActorEventReceiver<Evt> {
		self.events.subscribe()
	}

	/// Enqueues one command. Returns `false` once the actor has exited.
	pub fn send(&self, cmd: Cmd) -> bool {
		self.port.send(cmd)
	}

	/// Returns a cloneable enqueue port.
	pub fn port(&self) -> ActorPort<Cmd> {
		self.port.clone()
	}

	/// Shuts down this actor. Idempotent: later calls return the recorded exit.
	pub async fn shutdown(&self, mode: ShutdownMode) -> ShutdownReport {
		let mut join = self.join.lock().await;
		let handle = match &mut *join {
			JoinState::Finished(exit) => {
				return ShutdownReport {
					timed_out: false,
					exit: Some(exit.clone()),
				};
			}
			JoinState::Running(handle) => handle,
		};

		let mut timed_out = false;
		let joined = match mode {
			ShutdownMode::Immediate => {
				self.cancel.cancel();
				handle.await
			}
			ShutdownMode::Graceful { timeout } => {
				self.drain.cancel();
				match tokio::time::timeout(timeout, &mut *handle).await {
					Ok(joined) => joined,
					Err(_) => {
						tracing::warn!(actor = %self.name, "graceful shutdown timed out; forcing immediate");
						timed_out = true;
						self.cancel.cancel();
						handle.await
					}
				}
			}
		};

		let exit = match joined {
			Ok(exit) => exit,
			Err(err) if err.is_panic() => ActorExit::Panicked,
			Err(err) if err.is_cancelled() => ActorExit::Cancelled,
			Err(err) => ActorExit::JoinFailed(err.to_string()),
		};
		*join = JoinState::Finished(exit.clone());
		ShutdownReport {
			timed_out,
			exit: Some(exit),
		}
	}
}

async fn run_actor<A>(
	mut actor: A,
	mut rx: mpsc::UnboundedReceiver<A::Cmd>,
	mut ctx: ActorContext<A::Cmd, A::Evt>,
	cancel: CancellationToken,
	drain: CancellationToken,
	name: String,
) -> ActorExit
where
	A: Actor,
{
	let started = tokio::select! {
		biased;
		_ = cancel.cancelled() => Ok(false),
		res = actor.on_start(&mut ctx) => res.map(|()| true),
	};
	match started {
		Ok(true) => {}
		Ok(false) => return ActorExit::Cancelled,
		Err(err) => {
			ctx.cancel.cancel();
			return ActorExit::StartupFailed(err);
		}
	}

	let exit = loop {
		let cmd = tokio::select! {
			biased;
			_ = cancel.cancelled() => break ActorExit::Cancelled,
			_ = drain.cancelled() => match rx.try_recv() {
				Ok(cmd) => cmd,
				Err(_) => break ActorExit::Stopped,
			},
			msg = rx.recv() => {
				let Some(cmd) = msg else {
					break ActorExit::MailboxClosed;
				};
				cmd
			}
		};

		match actor.handle(cmd, &mut ctx).await {
			Ok(ActorFlow::Continue) => {}
			Ok(ActorFlow::Stop) => break ActorExit::Stopped,
			Err(err) => break ActorExit::HandlerFailed(err),
		}
	};

	actor.on_stop(&mut ctx).await;
	ctx.cancel.cancel();
	tracing::debug!(actor = %name, exit = ?exit, "worker.actor.exit");
	exit
}
