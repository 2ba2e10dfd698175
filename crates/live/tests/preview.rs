use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use rstest::rstest;
use serde_json::{Value, json};
use sightline_live::testing::MemoryClient;
use sightline_live::{
	ClientError, LivePreview, MutationEffects, MutationEvent, Perspective, PreviewConfig, PreviewError, PreviewEvent,
	QueryKey, QueryResponse, RevalidateState, Visibility,
};
use tokio::sync::broadcast;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);
const QUERY: &str = "*[_type == 'post'][0]{title}";
const MARK: &str = "\u{200B}\u{200C}\u{200D}\u{FEFF}";

fn preview(config: PreviewConfig) -> (LivePreview, Arc<MemoryClient>) {
	let _ = tracing_subscriber::fmt::try_init();
	let client = MemoryClient::new();
	let preview = LivePreview::new(config, client.factory()).unwrap();
	(preview, client)
}

fn started() -> (LivePreview, Arc<MemoryClient>, broadcast::Receiver<PreviewEvent>) {
	let (preview, client) = preview(PreviewConfig::new("p", "d"));
	preview.initialize("").unwrap();
	let events = preview.events().unwrap();
	(preview, client, events)
}

fn params() -> Value {
	json!({"slug": "hello"})
}

async fn wait_for(events: &mut broadcast::Receiver<PreviewEvent>, mut pred: impl FnMut(&PreviewEvent) -> bool) -> PreviewEvent {
	timeout(WAIT, async {
		loop {
			match events.recv().await {
				Ok(event) if pred(&event) => return event,
				Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
				Err(broadcast::error::RecvError::Closed) => panic!("preview event stream closed"),
			}
		}
	})
	.await
	.expect("timed out waiting for preview event")
}

async fn applied(events: &mut broadcast::Receiver<PreviewEvent>, key: &QueryKey) -> bool {
	match wait_for(events, |event| matches!(event, PreviewEvent::FetchApplied { key: k, .. } if k == key)).await {
		PreviewEvent::FetchApplied { published, .. } => published,
		_ => unreachable!(),
	}
}

async fn refresh_finished(events: &mut broadcast::Receiver<PreviewEvent>, cycle: u64) {
	wait_for(events, |event| *event == PreviewEvent::RefreshFinished { cycle }).await;
}

/// Waits until `count` fetches of the test query have reached the client.
async fn fetches_started(client: &MemoryClient, count: usize) {
	timeout(WAIT, async {
		while client.fetch_count(QUERY, &params()) < count {
			tokio::task::yield_now().await;
		}
	})
	.await
	.expect("timed out waiting for fetches to start");
}

fn title_source_map(doc_id: &str) -> QueryResponse {
	serde_json::from_value(json!({
		"result": {"title": format!("{MARK}Hello")},
		"resultSourceMap": {
			"documents": [{"_id": doc_id, "_type": "post"}],
			"paths": ["$['title']"],
			"mappings": {
				"$['title']": {"type": "value", "source": {"type": "documentValue", "document": 0, "path": 0}}
			}
		}
	}))
	.unwrap()
}

fn mutation(document_id: &str, patch: Value) -> MutationEvent {
	MutationEvent {
		document_id: document_id.to_owned(),
		effects: Some(MutationEffects {
			apply: patch.as_array().cloned().unwrap_or_default(),
		}),
	}
}

#[tokio::test]
async fn snapshot_follows_fetches_and_skips_identical_results() {
	let (preview, client, mut events) = started();
	client.close_gate();

	let mut live = preview.subscribe(QUERY, params(), Some(json!({"title": "initial"}))).await.unwrap();
	let key = live.key().clone();
	assert_eq!(live.next().await, Some(json!({"title": "initial"})));

	client.respond_with(QUERY, &params(), json!({"title": "A"}));
	client.open_gate();
	assert!(applied(&mut events, &key).await);
	assert_eq!(live.next().await, Some(json!({"title": "A"})));

	client.respond_with(QUERY, &params(), json!({"title": "B"}));
	preview.revalidate().unwrap();
	assert!(applied(&mut events, &key).await);
	assert_eq!(live.next().await, Some(json!({"title": "B"})));

	preview.revalidate().unwrap();
	assert!(!applied(&mut events, &key).await);
	assert!(timeout(Duration::from_millis(50), live.next()).await.is_err());
	assert_eq!(client.fetch_count(QUERY, &params()), 3);
}

#[tokio::test]
async fn subscribers_share_one_entry_until_the_last_leaves() {
	let (preview, client, mut events) = started();
	client.close_gate();

	let mut first = preview.subscribe(QUERY, params(), None).await.unwrap();
	let mut second = preview.subscribe(QUERY, params(), None).await.unwrap();
	let key = first.key().clone();
	assert_eq!(first.next().await, Some(Value::Null));
	assert_eq!(second.next().await, Some(Value::Null));

	client.respond_with(QUERY, &params(), json!({"title": "A"}));
	client.open_gate();
	assert_eq!(timeout(WAIT, first.next()).await.unwrap(), Some(json!({"title": "A"})));
	assert_eq!(timeout(WAIT, second.next()).await.unwrap(), Some(json!({"title": "A"})));
	applied(&mut events, &key).await;

	let info = preview.entry_info(QUERY, &params()).await.unwrap().unwrap();
	assert_eq!(info.ref_count, 2);
	assert_eq!(client.fetch_count(QUERY, &params()), 1);
	assert_eq!(first.current(), second.current());

	drop(second);
	let info = preview.entry_info(QUERY, &params()).await.unwrap().unwrap();
	assert_eq!(info.ref_count, 1);

	client.respond_with(QUERY, &params(), json!({"title": "B"}));
	preview.revalidate().unwrap();
	assert_eq!(timeout(WAIT, first.next()).await.unwrap(), Some(json!({"title": "B"})));

	let generation = info.generation;
	drop(first);
	wait_for(&mut events, |event| *event == PreviewEvent::EntryEvicted { key: key.clone() }).await;
	assert_eq!(preview.entry_info(QUERY, &params()).await.unwrap(), None);

	let again = preview.subscribe(QUERY, params(), None).await.unwrap();
	let info = preview.entry_info(QUERY, &params()).await.unwrap().unwrap();
	assert!(info.generation > generation);
	assert_eq!(info.ref_count, 1);
	applied(&mut events, again.key()).await;
	assert_eq!(again.current(), json!({"title": "B"}));
}

#[tokio::test]
async fn different_params_are_different_entries() {
	let (preview, client, mut events) = started();
	client.respond_with(QUERY, &json!({"slug": "a"}), json!({"title": "A"}));
	client.respond_with(QUERY, &json!({"slug": "b"}), json!({"title": "B"}));

	let a = preview.subscribe(QUERY, json!({"slug": "a"}), None).await.unwrap();
	let b = preview.subscribe(QUERY, json!({"slug": "b"}), None).await.unwrap();
	assert_ne!(a.key(), b.key());
	applied(&mut events, a.key()).await;

	drop(b);
	client.respond_with(QUERY, &json!({"slug": "a"}), json!({"title": "A2"}));
	preview.revalidate().unwrap();
	applied(&mut events, a.key()).await;
	assert_eq!(a.current(), json!({"title": "A2"}));
}

#[tokio::test]
async fn edits_are_patched_into_results_keeping_stega_markers() {
	let (preview, client, mut events) = started();
	client.insert_document(json!({"_id": "post-1", "_type": "post", "title": "Hello"}));
	client.respond(QUERY, &params(), title_source_map("post-1"));

	let mut live = preview.subscribe(QUERY, params(), None).await.unwrap();
	wait_for(&mut events, |event| *event == PreviewEvent::DocumentsLoaded { count: 1 }).await;
	assert_eq!(live.next().await, Some(json!({"title": format!("{MARK}Hello")})));
	assert_eq!(client.document_requests(), vec![vec!["post-1".to_owned()]]);
	assert!(preview.documents_in_use().unwrap().borrow().contains_key("post-1"));

	client.push_mutation(mutation("post-1", json!([1, 17, "Hello World", "title"])));
	wait_for(&mut events, |event| matches!(event, PreviewEvent::DocumentPatched { .. })).await;
	assert_eq!(timeout(WAIT, live.next()).await.unwrap(), Some(json!({"title": format!("{MARK}Hello World")})));
	assert_eq!(
		preview.cached_document("post-1").await.unwrap(),
		Some(json!({"_id": "post-1", "_type": "post", "title": "Hello World"}))
	);
	assert_eq!(client.fetch_count(QUERY, &params()), 1);
}

#[tokio::test]
async fn mutations_for_uncached_documents_are_ignored() {
	let (preview, client, mut events) = started();
	client.insert_document(json!({"_id": "post-1", "title": "Hello"}));
	client.respond(QUERY, &params(), title_source_map("post-1"));

	let live = preview.subscribe(QUERY, params(), None).await.unwrap();
	wait_for(&mut events, |event| *event == PreviewEvent::DocumentsLoaded { count: 1 }).await;
	let before = live.current();

	client.push_mutation(mutation("ghost", json!([1, 17, "boo", "title"])));
	client.push_mutation(mutation("post-1", json!([99])));
	let mut seen = Vec::new();
	wait_for(&mut events, |event| {
		seen.push(event.clone());
		matches!(event, PreviewEvent::PatchRejected { .. })
	})
	.await;

	assert!(!seen.iter().any(|event| matches!(event, PreviewEvent::DocumentPatched { .. })));
	assert_eq!(live.current(), before);
	assert_eq!(preview.cached_document("ghost").await.unwrap(), None);
}

#[tokio::test]
async fn revalidate_supersedes_the_refresh_in_flight() {
	let (preview, client, mut events) = started();
	client.respond_with(QUERY, &params(), json!({"title": "A"}));
	let live = preview.subscribe(QUERY, params(), None).await.unwrap();
	applied(&mut events, live.key()).await;

	let state = preview.revalidate_state().unwrap();
	client.close_gate();
	preview.revalidate().unwrap();
	fetches_started(&client, 2).await;
	preview.revalidate().unwrap();

	refresh_finished(&mut events, 1).await;
	assert_eq!(*state.borrow(), RevalidateState::Inflight);

	client.respond_with(QUERY, &params(), json!({"title": "B"}));
	client.open_gate();
	refresh_finished(&mut events, 2).await;
	assert_eq!(*state.borrow(), RevalidateState::Hit);
	assert_eq!(live.current(), json!({"title": "B"}));
	assert_eq!(client.fetch_count(QUERY, &params()), 3);
}

#[tokio::test]
async fn focus_starts_a_refresh_cycle() {
	let (preview, client, mut events) = started();
	client.respond_with(QUERY, &params(), json!({"title": "A"}));
	let live = preview.subscribe(QUERY, params(), None).await.unwrap();
	applied(&mut events, live.key()).await;

	preview.notify_focus().unwrap();
	wait_for(&mut events, |event| *event == PreviewEvent::RefreshStarted { cycle: 1 }).await;
	refresh_finished(&mut events, 1).await;
	assert_eq!(client.fetch_count(QUERY, &params()), 2);
	assert_eq!(*preview.revalidate_state().unwrap().borrow(), RevalidateState::Hit);
}

#[tokio::test]
async fn pausing_refetches_and_resuming_fresh_content_does_not() {
	let (preview, client, mut events) = started();
	client.respond_with(QUERY, &params(), json!({"title": "A"}));
	let live = preview.subscribe(QUERY, params(), None).await.unwrap();
	applied(&mut events, live.key()).await;

	let state = preview.revalidate_state().unwrap();
	preview.set_visibility(Visibility::Hidden).unwrap();
	wait_for(&mut events, |event| *event == PreviewEvent::RefreshStarted { cycle: 1 }).await;
	refresh_finished(&mut events, 1).await;
	assert_eq!(client.fetch_count(QUERY, &params()), 2);
	assert_eq!(*state.borrow(), RevalidateState::Hit);

	preview.set_online(false).unwrap();
	preview.set_visibility(Visibility::Visible).unwrap();
	preview.set_online(true).unwrap();
	// Round trip through the actor so every input above has been handled.
	assert_eq!(preview.entry_info(QUERY, &params()).await.unwrap().map(|info| info.ref_count), Some(1));
	assert!(std::iter::from_fn(|| events.try_recv().ok()).all(|event| !matches!(event, PreviewEvent::RefreshStarted { .. })));
	assert_eq!(client.fetch_count(QUERY, &params()), 2);
	assert_eq!(*state.borrow(), RevalidateState::Hit);
}

#[tokio::test(start_paused = true)]
async fn refresh_interval_revalidates_periodically() {
	let config = PreviewConfig {
		refresh_interval_ms: 1_000,
		..PreviewConfig::new("p", "d")
	};
	let (preview, client) = preview(config);
	preview.initialize("").unwrap();
	let mut events = preview.events().unwrap();
	client.respond_with(QUERY, &params(), json!({"title": "A"}));
	let live = preview.subscribe(QUERY, params(), None).await.unwrap();
	applied(&mut events, live.key()).await;
	assert_eq!(client.fetch_count(QUERY, &params()), 1);

	client.respond_with(QUERY, &params(), json!({"title": "B"}));
	tokio::time::advance(Duration::from_millis(1_000)).await;
	wait_for(&mut events, |event| *event == PreviewEvent::RefreshStarted { cycle: 1 }).await;
	refresh_finished(&mut events, 1).await;
	assert_eq!(client.fetch_count(QUERY, &params()), 2);
	assert_eq!(live.current(), json!({"title": "B"}));
	assert_eq!(*preview.revalidate_state().unwrap().borrow(), RevalidateState::Hit);
}

#[tokio::test]
async fn failed_fetch_keeps_the_last_result() {
	let (preview, client, mut events) = started();
	client.respond_with(QUERY, &params(), json!({"title": "A"}));
	let live = preview.subscribe(QUERY, params(), None).await.unwrap();
	applied(&mut events, live.key()).await;

	client.fail(QUERY, &params(), ClientError::Request("boom".to_owned()));
	preview.revalidate().unwrap();
	let failed = wait_for(&mut events, |event| matches!(event, PreviewEvent::FetchFailed { .. })).await;
	assert_eq!(
		failed,
		PreviewEvent::FetchFailed {
			key: live.key().clone(),
			error: ClientError::Request("boom".to_owned()),
		}
	);
	refresh_finished(&mut events, 1).await;
	assert_eq!(live.current(), json!({"title": "A"}));
	assert_eq!(*preview.revalidate_state().unwrap().borrow(), RevalidateState::Hit);
}

#[tokio::test]
async fn calls_before_initialize_fail_fast() {
	let (preview, client) = preview(PreviewConfig::new("p", "d"));
	assert!(!preview.is_initialized());
	assert!(matches!(preview.subscribe(QUERY, params(), None).await, Err(PreviewError::NotInitialized)));
	assert!(matches!(preview.revalidate(), Err(PreviewError::NotInitialized)));
	assert!(matches!(preview.events(), Err(PreviewError::NotInitialized)));
	assert!(client.configs().is_empty());
}

#[test]
fn initialize_outside_a_runtime_is_an_error() {
	let (preview, client) = preview(PreviewConfig::new("p", "d"));
	assert!(matches!(preview.initialize(""), Err(PreviewError::NoRuntime)));
	assert!(!preview.is_initialized());
	assert!(client.configs().is_empty());
}

#[tokio::test]
async fn initialize_twice_keeps_the_first_session() {
	let (preview, client) = preview(PreviewConfig::new("p", "d"));
	preview.initialize("first").unwrap();
	preview.initialize("second").unwrap();
	assert!(preview.is_initialized());
	assert_eq!(client.configs().len(), 1);
	assert_eq!(preview.client_config().unwrap().token.as_deref(), Some("first"));
}

#[rstest]
#[case::anonymous("", Perspective::Published, true, None)]
#[case::authenticated("secret", Perspective::PreviewDrafts, false, Some("secret"))]
#[tokio::test]
async fn token_decides_the_client_defaults(
	#[case] token: &str,
	#[case] perspective: Perspective,
	#[case] use_cdn: bool,
	#[case] expected_token: Option<&str>,
) {
	let config = PreviewConfig {
		perspective: Perspective::Published,
		..PreviewConfig::new("p", "d")
	};
	let (preview, client) = preview(config);
	preview.initialize(token).unwrap();

	let effective = preview.client_config().unwrap();
	assert_eq!(client.configs(), vec![effective.clone()]);
	assert_eq!(effective.perspective, perspective);
	assert_eq!(effective.use_cdn, use_cdn);
	assert_eq!(effective.token.as_deref(), expected_token);
	assert_eq!(effective.request_tag_prefix, "sanity.preview-kit");
}

#[tokio::test]
async fn shutdown_ends_live_queries() {
	let (preview, client, mut events) = started();
	client.respond_with(QUERY, &params(), json!({"title": "A"}));
	let mut live = preview.subscribe(QUERY, params(), None).await.unwrap();
	applied(&mut events, live.key()).await;
	assert_eq!(live.next().await, Some(json!({"title": "A"})));

	preview.shutdown().await;
	assert_eq!(timeout(WAIT, live.next()).await.unwrap(), None);
	assert!(!preview.is_initialized());
	assert!(matches!(preview.subscribe(QUERY, params(), None).await, Err(PreviewError::ShutDown)));
	assert!(matches!(preview.initialize(""), Err(PreviewError::ShutDown)));
}

#[tokio::test]
async fn mutation_feed_errors_do_not_stop_the_session() {
	let (preview, client, mut events) = started();
	client.insert_document(json!({"_id": "post-1", "title": "Hello"}));
	client.respond(QUERY, &params(), title_source_map("post-1"));
	let live = preview.subscribe(QUERY, params(), None).await.unwrap();
	wait_for(&mut events, |event| *event == PreviewEvent::DocumentsLoaded { count: 1 }).await;

	client.push_feed_error(ClientError::Transport("reset".to_owned()));
	client.push_mutation(mutation("post-1", json!([1, 17, "Again", "title"])));
	wait_for(&mut events, |event| matches!(event, PreviewEvent::SnapshotPublished { .. })).await;
	assert_eq!(live.current(), json!({"title": format!("{MARK}Again")}));
}
