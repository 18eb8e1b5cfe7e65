use std::{
	future::IntoFuture,
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
};

use axum::{
	Json, Router,
	extract::{Path, Query, State},
	http::{StatusCode, header},
	response::IntoResponse,
	routing,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{
	net::TcpListener,
	sync::{oneshot, oneshot::Sender},
};

use gdd_domain::Domain;
use gdd_notion::{
	CacheSettings, ContextFetcher, Error, FetchSettings, Namespace, NotionApi, NotionCache,
	NotionClient, Source, client,
};

const CHARACTERS_DB: &str = "11111111-1111-1111-1111-111111111111";
const BROKEN_DB: &str = "22222222-2222-2222-2222-222222222222";
const THROTTLED_DB: &str = "33333333-3333-3333-3333-333333333333";
const KAEL: &str = "aaaaaaaa-aaaa-aaaa-aaaa-aaaaaaaaaaaa";
const MORWEN: &str = "bbbbbbbb-bbbb-bbbb-bbbb-bbbbbbbbbbbb";
const MISSING: &str = "cccccccc-cccc-cccc-cccc-cccccccccccc";

#[derive(Default)]
struct FakeNotion {
	query_calls: AtomicUsize,
	page_calls: AtomicUsize,
	children_calls: AtomicUsize,
	created: Mutex<Vec<Value>>,
	appended: Mutex<Vec<usize>>,
}

#[derive(Deserialize)]
struct ChildrenQuery {
	start_cursor: Option<String>,
}

async fn start_server(state: Arc<FakeNotion>) -> (String, Sender<()>) {
	let app = Router::new()
		.route("/v1/databases/{id}/query", routing::post(query_handler))
		.route("/v1/pages/{id}", routing::get(page_handler))
		.route("/v1/pages", routing::post(create_handler))
		.route(
			"/v1/blocks/{id}/children",
			routing::get(children_handler).patch(append_handler),
		)
		.with_state(state);
	let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind Notion server.");
	let addr = listener.local_addr().expect("Failed to read Notion server address.");
	let (tx, rx) = oneshot::channel();
	let server = axum::serve(listener, app).with_graceful_shutdown(async move {
		let _ = rx.await;
	});

	tokio::spawn(async move {
		let _ = server.into_future().await;
	});

	(format!("http://{addr}"), tx)
}

fn page_json(id: &str, title: &str) -> Value {
	json!({
		"object": "page",
		"id": id,
		"url": format!("https://www.notion.so/{}", id.replace('-', "")),
		"last_edited_time": "2025-01-01T00:00:00.000Z",
		"parent": { "type": "database_id", "database_id": CHARACTERS_DB },
		"properties": {
			"Nom": { "type": "title", "title": [{ "plain_text": title }] },
			"Rôle": { "type": "select", "select": { "name": "PNJ" } }
		}
	})
}

fn paragraph(id: &str, text: &str, has_children: bool) -> Value {
	json!({
		"object": "block",
		"id": id,
		"type": "paragraph",
		"has_children": has_children,
		"paragraph": { "rich_text": [{ "plain_text": text }] }
	})
}

fn not_found() -> axum::response::Response {
	(
		StatusCode::NOT_FOUND,
		Json(json!({ "object": "error", "status": 404, "code": "object_not_found", "message": "Nope." })),
	)
		.into_response()
}

async fn query_handler(
	State(state): State<Arc<FakeNotion>>,
	Path(id): Path<String>,
	Json(body): Json<Value>,
) -> axum::response::Response {
	state.query_calls.fetch_add(1, Ordering::SeqCst);

	match id.as_str() {
		CHARACTERS_DB => {
			if body.get("start_cursor").is_none() {
				Json(json!({
					"results": [page_json(KAEL, "Kael Drunmor")],
					"has_more": true,
					"next_cursor": "cursor-2"
				}))
				.into_response()
			} else {
				Json(json!({
					"results": [
						page_json(MORWEN, "Morwen la Grise"),
						{ "id": MISSING, "archived": true, "properties": {} }
					],
					"has_more": false,
					"next_cursor": null
				}))
				.into_response()
			}
		},
		THROTTLED_DB => (
			StatusCode::TOO_MANY_REQUESTS,
			[(header::RETRY_AFTER, "0")],
			Json(json!({ "object": "error", "status": 429, "code": "rate_limited", "message": "Slow down." })),
		)
			.into_response(),
		_ => not_found(),
	}
}

async fn page_handler(
	State(state): State<Arc<FakeNotion>>,
	Path(id): Path<String>,
) -> axum::response::Response {
	state.page_calls.fetch_add(1, Ordering::SeqCst);

	match id.as_str() {
		KAEL => Json(page_json(KAEL, "Kael Drunmor")).into_response(),
		_ => not_found(),
	}
}

async fn children_handler(
	State(state): State<Arc<FakeNotion>>,
	Path(id): Path<String>,
	Query(query): Query<ChildrenQuery>,
) -> axum::response::Response {
	state.children_calls.fetch_add(1, Ordering::SeqCst);

	match (id.as_str(), query.start_cursor.as_deref()) {
		(KAEL, None) => Json(json!({
			"results": [
				{
					"id": "h-1",
					"type": "heading_2",
					"has_children": false,
					"heading_2": { "rich_text": [{ "plain_text": "Histoire" }] }
				},
				paragraph("p-1", "Cartographe exilé de Port-Sel.", false)
			],
			"has_more": true,
			"next_cursor": "blocks-2"
		}))
		.into_response(),
		(KAEL, Some(_)) => Json(json!({
			"results": [paragraph("p-2", "Il garde un secret.", true)],
			"has_more": false,
			"next_cursor": null
		}))
		.into_response(),
		("p-2", _) => Json(json!({
			"results": [paragraph("p-3", "Il a trahi l'Ordre.", false)],
			"has_more": false,
			"next_cursor": null
		}))
		.into_response(),
		_ => not_found(),
	}
}

async fn create_handler(
	State(state): State<Arc<FakeNotion>>,
	Json(body): Json<Value>,
) -> axum::response::Response {
	if let Ok(mut created) = state.created.lock() {
		created.push(body);
	}

	Json(json!({ "object": "page", "id": KAEL, "url": "https://www.notion.so/new" })).into_response()
}

async fn append_handler(
	State(state): State<Arc<FakeNotion>>,
	Path(_id): Path<String>,
	Json(body): Json<Value>,
) -> axum::response::Response {
	let count = body.get("children").and_then(Value::as_array).map(Vec::len).unwrap_or(0);

	if let Ok(mut appended) = state.appended.lock() {
		appended.push(count);
	}

	Json(json!({ "results": [], "has_more": false, "next_cursor": null })).into_response()
}

fn notion_config(api_base: String) -> gdd_config::Notion {
	gdd_config::Notion {
		api_base,
		api_key: "secret_test".to_string(),
		version: "2022-06-28".to_string(),
		timeout_ms: 5_000,
		page_size: 2,
		max_block_depth: 3,
		databases: Default::default(),
	}
}

fn cache() -> Arc<NotionCache> {
	Arc::new(NotionCache::new(CacheSettings {
		enabled: true,
		list_ttl: time::Duration::seconds(60),
		preview_ttl: time::Duration::seconds(60),
		full_ttl: time::Duration::seconds(60),
		max_payload_bytes: None,
	}))
}

fn fetcher(api_base: String) -> ContextFetcher {
	let client = NotionClient::new(&notion_config(api_base)).expect("Failed to build client.");

	ContextFetcher::new(
		Arc::new(client),
		cache(),
		FetchSettings { preview_chars: 24, max_block_depth: 3 },
	)
}

#[tokio::test]
async fn lists_all_pages_once_then_serves_from_cache() {
	let state = Arc::new(FakeNotion::default());
	let (api_base, shutdown) = start_server(state.clone()).await;
	let fetcher = fetcher(api_base);
	let pages = fetcher.list_pages(&CHARACTERS_DB.replace('-', "")).await.expect("List failed.");
	let again = fetcher.list_pages(CHARACTERS_DB).await.expect("Cached list failed.");

	let _ = shutdown.send(());

	assert_eq!(pages.len(), 2);
	assert_eq!(pages[0].title, "Kael Drunmor");
	assert_eq!(pages[1].database_id.as_deref(), Some(CHARACTERS_DB));
	assert_eq!(again, pages);
	assert_eq!(state.query_calls.load(Ordering::SeqCst), 2);

	let stats = fetcher.cache().stats().namespaces[&Namespace::List];

	assert_eq!((stats.hits, stats.entries), (1, 1));
}

#[tokio::test]
async fn full_page_follows_pagination_and_nested_blocks() {
	let state = Arc::new(FakeNotion::default());
	let (api_base, shutdown) = start_server(state.clone()).await;
	let fetcher = fetcher(api_base);
	let content = fetcher.full(KAEL).await.expect("Full fetch failed.");
	let preview = fetcher.preview(KAEL).await.expect("Preview fetch failed.");

	let _ = shutdown.send(());

	assert_eq!(content.summary.title, "Kael Drunmor");
	assert_eq!(content.properties.get("Rôle").map(String::as_str), Some("PNJ"));
	assert_eq!(
		content.body,
		"## Histoire\nCartographe exilé de Port-Sel.\nIl garde un secret.\n  Il a trahi l'Ordre."
	);
	assert!(preview.excerpt.chars().count() <= 24);
	assert!(preview.excerpt.starts_with("## Histoire"));
	// The preview tier was filled by the full fetch.
	assert_eq!(state.page_calls.load(Ordering::SeqCst), 1);
	assert_eq!(state.children_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn refresh_page_bypasses_cache() {
	let state = Arc::new(FakeNotion::default());
	let (api_base, shutdown) = start_server(state.clone()).await;
	let fetcher = fetcher(api_base);

	fetcher.full(KAEL).await.expect("Full fetch failed.");
	fetcher.refresh_page(KAEL).await.expect("Refresh failed.");

	let _ = shutdown.send(());

	assert_eq!(state.page_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn maps_missing_pages_and_rate_limits() {
	let state = Arc::new(FakeNotion::default());
	let (api_base, shutdown) = start_server(state.clone()).await;
	let fetcher = fetcher(api_base);
	let missing = fetcher.full(MISSING).await.expect_err("Expected missing page.");
	let throttled = fetcher.list_pages(THROTTLED_DB).await.expect_err("Expected rate limit.");

	let _ = shutdown.send(());

	assert!(matches!(missing, Error::NotFound { .. }), "{missing}");
	assert!(matches!(throttled, Error::RateLimited { retry_after: Some(0) }), "{throttled}");
	assert_eq!(state.query_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn list_domains_skips_failing_sources() {
	let state = Arc::new(FakeNotion::default());
	let (api_base, shutdown) = start_server(state).await;
	let fetcher = fetcher(api_base);
	let pages = fetcher
		.list_domains(&[
			Source { domain: Domain::Personnages, database_id: CHARACTERS_DB.to_string() },
			Source { domain: Domain::Lieux, database_id: BROKEN_DB.to_string() },
		])
		.await
		.expect("Aggregated list failed.");
	let all_broken = fetcher
		.list_domains(&[Source { domain: Domain::Lieux, database_id: BROKEN_DB.to_string() }])
		.await;

	let _ = shutdown.send(());

	assert_eq!(pages.len(), 2);
	assert!(pages.iter().all(|page| page.domain == Domain::Personnages));
	assert!(all_broken.is_err());
}

#[tokio::test]
async fn writes_pages_and_block_batches() {
	let state = Arc::new(FakeNotion::default());
	let (api_base, shutdown) = start_server(state.clone()).await;
	let client = NotionClient::new(&notion_config(api_base)).expect("Failed to build client.");
	let created = client
		.create_page(&json!({ "parent": { "database_id": CHARACTERS_DB }, "properties": {} }))
		.await
		.expect("Create failed.");
	let children: Vec<Value> = (0..3).map(|i| paragraph(&format!("n-{i}"), "x", false)).collect();

	client.append_block_children(KAEL, &children).await.expect("Append failed.");

	let too_many: Vec<Value> = (0..101).map(|i| paragraph(&format!("n-{i}"), "x", false)).collect();
	let rejected = client.append_block_children(KAEL, &too_many).await;

	let _ = shutdown.send(());

	assert_eq!(created["id"], KAEL);
	assert_eq!(state.created.lock().expect("Lock poisoned.").len(), 1);
	assert_eq!(*state.appended.lock().expect("Lock poisoned."), vec![3]);
	assert!(rejected.is_err());
}

#[test]
fn normalizes_notion_urls() {
	assert_eq!(
		client::normalize_id("https://www.notion.so/Kael-aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa")
			.expect("Failed to normalize."),
		KAEL
	);
}
