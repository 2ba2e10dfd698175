//! The session actor.
//!
//! One task owns the registry, the document cache, the revalidation machine
//! and the turbo-id bookkeeping. Fetches, document loads, the mutation feed
//! and the interval timer run as separate tasks and report back through the
//! actor's port, so every piece of state has exactly one writer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use sightline_csm::{ContentSourceMap, CsmDocument};
use sightline_worker::{Actor, ActorContext, ActorFlow, ActorPort, GenerationToken, TaskClass};
use tokio::sync::{oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client::{ContentClient, MutationEvent, QueryResponse};
use crate::error::ClientError;
use crate::key::QueryKey;
use crate::listener::{PatchOutcome, apply_mutation, forward_mutations};
use crate::loader::{MissingDocuments, TurboIds, store_documents};
use crate::projector::Projector;
use crate::registry::{FetchTicket, Registry, Released};
use crate::revalidate::{RefreshTicket, RevalidateMachine, RevalidateState, Visibility};
use crate::store::DocumentStore;

/// Documents referenced by any source map seen this session, by id.
pub type DocumentsInUse = IndexMap<String, CsmDocument>;

/// Broadcast notifications about what the session did.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum PreviewEvent {
	EntryCreated { key: QueryKey },
	EntryEvicted { key: QueryKey },
	/// A fetch result was accepted for `key`; `published` is false when the
	/// projected value equalled what subscribers already had.
	FetchApplied { key: QueryKey, published: bool },
	FetchFailed { key: QueryKey, error: ClientError },
	SnapshotPublished { key: QueryKey },
	DocumentPatched { document_id: String },
	PatchRejected { document_id: String },
	DocumentsLoaded { count: usize },
	RefreshStarted { cycle: u64 },
	RefreshFinished { cycle: u64 },
}

/// Registry entry summary returned by inspection queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryInfo {
	pub ref_count: usize,
	pub generation: u64,
	pub has_source_map: bool,
}

pub(crate) struct Subscription {
	pub key: QueryKey,
	pub generation: u64,
	pub receiver: watch::Receiver<Value>,
}

pub(crate) struct FetchSettled {
	key: QueryKey,
	seq: u64,
	generation: u64,
	cycle: Option<u64>,
	outcome: Result<QueryResponse, ClientError>,
}

pub(crate) enum EngineCmd {
	Subscribe {
		query: String,
		params: Value,
		initial: Option<Value>,
		reply: oneshot::Sender<Subscription>,
	},
	Unsubscribe {
		key: QueryKey,
		generation: u64,
	},
	FetchSettled(FetchSettled),
	Mutation(MutationEvent),
	DocumentsLoaded {
		ids: Vec<String>,
		outcome: Result<Vec<Option<Value>>, ClientError>,
	},
	Focus,
	TimerFired,
	SetOnline(bool),
	SetVisibility(Visibility),
	Revalidate,
	Inspect {
		key: QueryKey,
		reply: oneshot::Sender<Option<EntryInfo>>,
	},
	CachedDocument {
		id: String,
		reply: oneshot::Sender<Option<Value>>,
	},
}

type Ctx = ActorContext<EngineCmd, PreviewEvent>;

struct RefreshCycle {
	ticket: RefreshTicket,
	pending: usize,
	fetches: Vec<GenerationToken>,
}

pub(crate) struct EngineParts {
	pub client: Arc<dyn ContentClient>,
	pub listen_filter: String,
	pub refresh_interval: Option<Duration>,
	pub store: DocumentStore,
	pub projector: Projector,
	pub revalidate: watch::Sender<RevalidateState>,
	pub documents_in_use: watch::Sender<DocumentsInUse>,
}

pub(crate) struct PreviewEngine {
	client: Arc<dyn ContentClient>,
	listen_filter: String,
	refresh_interval: Option<Duration>,
	registry: Registry,
	store: DocumentStore,
	projector: Projector,
	turbo: TurboIds,
	missing: MissingDocuments,
	machine: RevalidateMachine,
	cycles: HashMap<u64, RefreshCycle>,
	next_cycle: u64,
	revalidate: watch::Sender<RevalidateState>,
	documents_in_use: watch::Sender<DocumentsInUse>,
	lifetime: CancellationToken,
}

impl PreviewEngine {
	pub(crate) fn new(parts: EngineParts) -> Self {
		Self {
			client: parts.client,
			listen_filter: parts.listen_filter,
			refresh_interval: parts.refresh_interval,
			registry: Registry::new(),
			store: parts.store,
			projector: parts.projector,
			turbo: TurboIds::default(),
			missing: MissingDocuments::default(),
			machine: RevalidateMachine::new(),
			cycles: HashMap::new(),
			next_cycle: 0,
			revalidate: parts.revalidate,
			documents_in_use: parts.documents_in_use,
			lifetime: CancellationToken::new(),
		}
	}

	fn subscribe(&mut self, query: String, params: Value, initial: Option<Value>, reply: oneshot::Sender<Subscription>, ctx: &Ctx) {
		let key = QueryKey::new(&query, &params);
		let acquired = self.registry.acquire(key.clone(), &query, &params, initial, &self.lifetime);
		if acquired.created {
			debug!(key = %key, generation = acquired.generation, "preview.entry.created");
			ctx.emit(PreviewEvent::EntryCreated { key: key.clone() });
			self.start_fetch(&key, None, ctx);
		}

		let generation = acquired.generation;
		let subscription = Subscription {
			key: key.clone(),
			generation,
			receiver: acquired.receiver,
		};
		if reply.send(subscription).is_err() {
			trace!(key = %key, "subscriber went away before its subscription was delivered");
			self.unsubscribe(&key, generation, ctx);
		}
	}

	fn unsubscribe(&mut self, key: &QueryKey, generation: u64, ctx: &Ctx) {
		match self.registry.release(key, generation) {
			Released::Evicted => {
				debug!(key = %key, generation, "preview.entry.evicted");
				ctx.emit(PreviewEvent::EntryEvicted { key: key.clone() });
			}
			Released::Remaining(count) => trace!(key = %key, count, "subscriber released"),
			Released::Unknown => trace!(key = %key, generation, "release for unknown entry"),
		}
	}

	/// Starts a fetch for `key`, counted against `cycle` when given.
	fn start_fetch(&mut self, key: &QueryKey, cycle: Option<u64>, ctx: &Ctx) {
		let Some(entry) = self.registry.get_mut(key) else {
			return;
		};
		let ticket = entry.begin_fetch();
		let query = entry.query().to_owned();
		let params = entry.params().clone();

		if let Some(refresh) = cycle.and_then(|id| self.cycles.get_mut(&id)) {
			refresh.pending += 1;
			refresh.fetches.push(ticket.cancel.clone());
		}
		spawn_fetch(self.client.clone(), key.clone(), query, params, ticket, cycle, ctx.port());
	}

	fn fetch_settled(&mut self, settled: FetchSettled, ctx: &Ctx) {
		let FetchSettled {
			key,
			seq,
			generation,
			cycle,
			outcome,
		} = settled;

		match outcome {
			Ok(response) => self.apply_fetch(key, seq, generation, response, ctx),
			Err(error) if error.is_cancelled() => trace!(key = %key, seq, "fetch cancelled"),
			Err(error) => {
				warn!(key = %key, %error, "query fetch failed; keeping last result");
				ctx.emit(PreviewEvent::FetchFailed { key, error });
			}
		}

		if let Some(id) = cycle {
			if let Some(refresh) = self.cycles.get_mut(&id) {
				refresh.pending = refresh.pending.saturating_sub(1);
			}
			self.finish_cycle_if_settled(id, ctx);
		}
	}

	fn apply_fetch(&mut self, key: QueryKey, seq: u64, generation: u64, response: QueryResponse, ctx: &Ctx) {
		let QueryResponse { result, source_map } = response;
		let accepted = self
			.registry
			.get_mut(&key)
			.is_some_and(|entry| entry.accept(seq, generation, result, source_map));
		if !accepted {
			trace!(key = %key, seq, generation, "discarding superseded fetch result");
			return;
		}

		let source_map = self.registry.get(&key).and_then(|entry| entry.source_map()).cloned();
		if let Some(csm) = &source_map {
			self.track_documents(csm);
		}
		let published = self.publish_projection(&key, ctx);
		ctx.emit(PreviewEvent::FetchApplied { key, published });
		self.load_missing(ctx);
	}

	fn track_documents(&mut self, csm: &ContentSourceMap) {
		if !csm.has_documents() {
			return;
		}
		let added = self.turbo.extend_from(csm);
		if added > 0 {
			trace!(added, total = self.turbo.len(), "turbo ids grew");
		}
		self.documents_in_use.send_if_modified(|in_use| {
			let mut changed = false;
			for doc in &csm.documents {
				if in_use.get(&doc.id) != Some(doc) {
					in_use.insert(doc.id.clone(), doc.clone());
					changed = true;
				}
			}
			changed
		});
	}

	/// Re-projects one entry from its raw result and publishes the value if it changed.
	fn publish_projection(&mut self, key: &QueryKey, ctx: &Ctx) -> bool {
		let Some(entry) = self.registry.get(key) else {
			return false;
		};
		let projected = self.projector.project(entry.raw(), entry.source_map(), &mut self.store);
		let published = entry.publish(projected);
		if published {
			ctx.emit(PreviewEvent::SnapshotPublished { key: key.clone() });
		}
		published
	}

	fn reproject_all(&mut self, ctx: &Ctx) {
		let keys: Vec<QueryKey> = self
			.registry
			.iter()
			.filter(|(_, entry)| entry.has_source_documents())
			.map(|(key, _)| key.clone())
			.collect();
		let published = keys.iter().filter(|key| self.publish_projection(key, ctx)).count();
		trace!(entries = keys.len(), published, "re-projected live snapshots");
	}

	fn load_missing(&mut self, ctx: &Ctx) {
		let projector = &self.projector;
		let ids = self.missing.take_missing(&self.turbo, &self.store, |id| projector.document_key(id));
		if ids.is_empty() {
			return;
		}
		debug!(count = ids.len(), "loading documents missing from the cache");

		let client = self.client.clone();
		let port = ctx.port();
		let cancel = self.lifetime.child_token();
		sightline_worker::spawn(TaskClass::Network, async move {
			let outcome = tokio::select! {
				biased;
				_ = cancel.cancelled() => Err(ClientError::Cancelled),
				docs = client.get_documents(&ids) => docs,
			};
			port.send(EngineCmd::DocumentsLoaded { ids, outcome });
		});
	}

	fn documents_loaded(&mut self, ids: Vec<String>, outcome: Result<Vec<Option<Value>>, ClientError>, ctx: &Ctx) {
		self.missing.finish(&ids);
		match outcome {
			Ok(docs) => {
				let projector = &self.projector;
				let count = store_documents(&mut self.store, docs, |id| projector.document_key(id));
				debug!(requested = ids.len(), count, "documents cached");
				ctx.emit(PreviewEvent::DocumentsLoaded { count });
				if count > 0 {
					self.reproject_all(ctx);
				}
			}
			Err(error) if error.is_cancelled() => {}
			Err(error) => warn!(%error, count = ids.len(), "failed to load missing documents"),
		}
	}

	fn mutation(&mut self, event: MutationEvent, ctx: &Ctx) {
		let key = self.projector.document_key(&event.document_id);
		match apply_mutation(&mut self.store, &key, &event) {
			PatchOutcome::Patched => {
				trace!(document_id = %event.document_id, "cached document patched");
				ctx.emit(PreviewEvent::DocumentPatched {
					document_id: event.document_id.clone(),
				});
				if self.turbo.contains(&event.document_id) {
					self.reproject_all(ctx);
				}
			}
			PatchOutcome::NotCached | PatchOutcome::NoEffects => {}
			PatchOutcome::Rejected(error) => {
				warn!(document_id = %event.document_id, %error, "dropping malformed patch");
				ctx.emit(PreviewEvent::PatchRejected {
					document_id: event.document_id,
				});
			}
		}
	}

	fn transition(&mut self, next: Option<RevalidateState>, ctx: &Ctx) {
		let Some(state) = next else {
			return;
		};
		self.publish_state();
		if state.wants_refresh() {
			self.begin_cycle(ctx);
		}
	}

	/// Cancels whatever refresh is running and starts a new one.
	fn revalidate(&mut self, ctx: &Ctx) {
		for refresh in self.cycles.values() {
			for fetch in &refresh.fetches {
				fetch.cancel();
			}
		}
		self.begin_cycle(ctx);
	}

	fn begin_cycle(&mut self, ctx: &Ctx) {
		let ticket = self.machine.start_refresh();
		self.publish_state();
		self.next_cycle += 1;
		let id = self.next_cycle;
		self.cycles.insert(
			id,
			RefreshCycle {
				ticket,
				pending: 0,
				fetches: Vec::new(),
			},
		);
		ctx.emit(PreviewEvent::RefreshStarted { cycle: id });

		let keys: Vec<QueryKey> = self.registry.iter().map(|(key, _)| key.clone()).collect();
		debug!(cycle = id, entries = keys.len(), "preview.refresh.start");
		for key in &keys {
			self.start_fetch(key, Some(id), ctx);
		}
		self.finish_cycle_if_settled(id, ctx);
	}

	fn finish_cycle_if_settled(&mut self, id: u64, ctx: &Ctx) {
		if !self.cycles.get(&id).is_some_and(|refresh| refresh.pending == 0) {
			return;
		}
		let Some(refresh) = self.cycles.remove(&id) else {
			return;
		};
		self.machine.finish_refresh(refresh.ticket);
		self.publish_state();
		debug!(cycle = id, state = self.machine.state().as_str(), "preview.refresh.finish");
		ctx.emit(PreviewEvent::RefreshFinished { cycle: id });
	}

	fn publish_state(&self) {
		let state = self.machine.state();
		self.revalidate.send_if_modified(|current| {
			if *current == state {
				return false;
			}
			*current = state;
			true
		});
	}

	fn inspect(&self, key: &QueryKey) -> Option<EntryInfo> {
		self.registry.get(key).map(|entry| EntryInfo {
			ref_count: entry.ref_count(),
			generation: entry.generation(),
			has_source_map: entry.source_map().is_some(),
		})
	}
}

#[async_trait]
impl Actor for PreviewEngine {
	type Cmd = EngineCmd;
	type Evt = PreviewEvent;

	async fn on_start(&mut self, ctx: &mut Ctx) -> Result<(), String> {
		self.lifetime = ctx.lifetime().clone();

		let port = ctx.port();
		let feed_port = port.clone();
		sightline_worker::spawn(
			TaskClass::Network,
			forward_mutations(self.client.clone(), self.listen_filter.clone(), self.lifetime.child_token(), move |event| {
				feed_port.send(EngineCmd::Mutation(event))
			}),
		);

		if let Some(period) = self.refresh_interval {
			sightline_worker::spawn(TaskClass::Background, run_interval(period, port, self.lifetime.child_token()));
		}
		Ok(())
	}

	async fn on_stop(&mut self, _ctx: &mut Ctx) {
		self.cycles.clear();
		self.registry.clear();
	}

	async fn handle(&mut self, cmd: EngineCmd, ctx: &mut Ctx) -> Result<ActorFlow, String> {
		match cmd {
			EngineCmd::Subscribe {
				query,
				params,
				initial,
				reply,
			} => self.subscribe(query, params, initial, reply, ctx),
			EngineCmd::Unsubscribe { key, generation } => self.unsubscribe(&key, generation, ctx),
			EngineCmd::FetchSettled(settled) => self.fetch_settled(settled, ctx),
			EngineCmd::Mutation(event) => self.mutation(event, ctx),
			EngineCmd::DocumentsLoaded { ids, outcome } => self.documents_loaded(ids, outcome, ctx),
			EngineCmd::Focus => {
				let next = self.machine.on_focus();
				self.transition(next, ctx);
			}
			EngineCmd::TimerFired => {
				let next = self.machine.on_timer();
				self.transition(next, ctx);
			}
			EngineCmd::SetOnline(online) => {
				let next = self.machine.set_online(online);
				self.transition(next, ctx);
			}
			EngineCmd::SetVisibility(visibility) => {
				let next = self.machine.set_visibility(visibility);
				self.transition(next, ctx);
			}
			EngineCmd::Revalidate => self.revalidate(ctx),
			EngineCmd::Inspect { key, reply } => {
				let _ = reply.send(self.inspect(&key));
			}
			EngineCmd::CachedDocument { id, reply } => {
				let key = self.projector.document_key(&id);
				let _ = reply.send(self.store.peek(&key).cloned());
			}
		}
		Ok(ActorFlow::Continue)
	}
}

/// Reports a fetch back to the actor exactly once, even when the task is
/// cancelled or dropped before the fetch finishes.
struct SettleGuard {
	port: ActorPort<EngineCmd>,
	pending: Option<FetchSettled>,
}

impl SettleGuard {
	fn complete(mut self, outcome: Result<QueryResponse, ClientError>) {
		if let Some(mut settled) = self.pending.take() {
			settled.outcome = outcome;
			self.port.send(EngineCmd::FetchSettled(settled));
		}
	}
}

impl Drop for SettleGuard {
	fn drop(&mut self) {
		if let Some(settled) = self.pending.take() {
			self.port.send(EngineCmd::FetchSettled(settled));
		}
	}
}

fn spawn_fetch(
	client: Arc<dyn ContentClient>,
	key: QueryKey,
	query: String,
	params: Value,
	ticket: FetchTicket,
	cycle: Option<u64>,
	port: ActorPort<EngineCmd>,
) {
	let generation = ticket.generation();
	let FetchTicket { seq, cancel } = ticket;
	let guard = SettleGuard {
		port,
		pending: Some(FetchSettled {
			key,
			seq,
			generation,
			cycle,
			outcome: Err(ClientError::Cancelled),
		}),
	};
	sightline_worker::spawn(TaskClass::Network, async move {
		let outcome = tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(ClientError::Cancelled),
			response = client.fetch(&query, &params) => response,
		};
		guard.complete(outcome);
	});
}

async fn run_interval(period: Duration, port: ActorPort<EngineCmd>, cancel: CancellationToken) {
	let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
	ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
	loop {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			_ = ticks.tick() => {
				if !port.send(EngineCmd::TimerFired) {
					break;
				}
			}
		}
	}
}
