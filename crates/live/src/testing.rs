//! In-memory [`ContentClient`] for tests and demos.
//!
//! Responses are scripted per `(query, params)` and served in order; once
//! the queue runs dry the last response served keeps being returned. A gate can hold every fetch until the
//! test opens it, and mutations are pushed into the feed by hand.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::client::{ClientFactory, ContentClient, MutationEvent, MutationStream, QueryResponse};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::key::QueryKey;

type FeedItem = Result<MutationEvent, ClientError>;
type Response = Result<QueryResponse, ClientError>;

#[derive(Default)]
struct Script {
	queue: VecDeque<Response>,
	last: Option<Response>,
}

impl Script {
	fn next(&mut self) -> Option<Response> {
		if let Some(response) = self.queue.pop_front() {
			self.last = Some(response);
		}
		self.last.clone()
	}
}

#[derive(Default)]
struct Scripts {
	responses: HashMap<QueryKey, Script>,
	fetches: HashMap<QueryKey, usize>,
	documents: HashMap<String, Value>,
	document_requests: Vec<Vec<String>>,
	configs: Vec<ClientConfig>,
}

pub struct MemoryClient {
	scripts: Mutex<Scripts>,
	gate: watch::Sender<bool>,
	feed_tx: mpsc::UnboundedSender<FeedItem>,
	feed_rx: Mutex<Option<mpsc::UnboundedReceiver<FeedItem>>>,
}

impl Default for MemoryClient {
	fn default() -> Self {
		let (feed_tx, feed_rx) = mpsc::unbounded_channel();
		Self {
			scripts: Mutex::default(),
			gate: watch::Sender::new(true),
			feed_tx,
			feed_rx: Mutex::new(Some(feed_rx)),
		}
	}
}

impl MemoryClient {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Factory handing out this client and recording every config it is built with.
	pub fn factory(self: &Arc<Self>) -> impl ClientFactory + 'static {
		let client = Arc::clone(self);
		move |config: &ClientConfig| -> Arc<dyn ContentClient> {
			client.scripts.lock().configs.push(config.clone());
			client.clone()
		}
	}

	/// Queues a response for the next fetch of `(query, params)`.
	pub fn respond(&self, query: &str, params: &Value, response: QueryResponse) {
		self.push(query, params, Ok(response));
	}

	/// Queues a plain result without a source map.
	pub fn respond_with(&self, query: &str, params: &Value, result: Value) {
		self.respond(query, params, QueryResponse { result, source_map: None });
	}

	/// Queues a failure for the next fetch of `(query, params)`.
	pub fn fail(&self, query: &str, params: &Value, error: ClientError) {
		self.push(query, params, Err(error));
	}

	fn push(&self, query: &str, params: &Value, response: Response) {
		self.scripts
			.lock()
			.responses
			.entry(QueryKey::new(query, params))
			.or_default()
			.queue
			.push_back(response);
	}

	/// Makes `doc` available to `get_documents`.
	pub fn insert_document(&self, doc: Value) {
		if let Some(id) = doc.get("_id").and_then(Value::as_str) {
			self.scripts.lock().documents.insert(id.to_owned(), doc.clone());
		}
	}

	/// Holds every fetch until [`open_gate`](Self::open_gate).
	pub fn close_gate(&self) {
		self.gate.send_replace(false);
	}

	pub fn open_gate(&self) {
		self.gate.send_replace(true);
	}

	pub fn push_mutation(&self, event: MutationEvent) {
		let _ = self.feed_tx.send(Ok(event));
	}

	pub fn push_feed_error(&self, error: ClientError) {
		let _ = self.feed_tx.send(Err(error));
	}

	/// Fetches started for `(query, params)`, including ones still held at the gate.
	pub fn fetch_count(&self, query: &str, params: &Value) -> usize {
		self.scripts
			.lock()
			.fetches
			.get(&QueryKey::new(query, params))
			.copied()
			.unwrap_or(0)
	}

	/// Id batches passed to `get_documents`, in call order.
	pub fn document_requests(&self) -> Vec<Vec<String>> {
		self.scripts.lock().document_requests.clone()
	}

	pub fn configs(&self) -> Vec<ClientConfig> {
		self.scripts.lock().configs.clone()
	}
}

#[async_trait]
impl ContentClient for MemoryClient {
	async fn fetch(&self, query: &str, params: &Value) -> Result<QueryResponse, ClientError> {
		let key = QueryKey::new(query, params);
		*self.scripts.lock().fetches.entry(key.clone()).or_default() += 1;

		let mut gate = self.gate.subscribe();
		if gate.wait_for(|open| *open).await.is_err() {
			return Err(ClientError::Cancelled);
		}

		let next = self.scripts.lock().responses.get_mut(&key).and_then(Script::next);
		next.unwrap_or_else(|| Err(ClientError::Request(format!("no response scripted for {key}"))))
	}

	async fn listen(&self, _filter: &str) -> Result<MutationStream, ClientError> {
		let Some(rx) = self.feed_rx.lock().take() else {
			return Err(ClientError::Transport("mutation feed already taken".to_owned()));
		};
		let feed = futures::stream::unfold(rx, |mut rx| async move {
			let item = rx.recv().await?;
			Some((item, rx))
		});
		Ok(feed.boxed())
	}

	async fn get_documents(&self, ids: &[String]) -> Result<Vec<Option<Value>>, ClientError> {
		let mut scripts = self.scripts.lock();
		scripts.document_requests.push(ids.to_vec());
		Ok(ids.iter().map(|id| scripts.documents.get(id).cloned()).collect())
	}
}
