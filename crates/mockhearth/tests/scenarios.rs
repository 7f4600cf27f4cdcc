//! End-to-end coverage of the literal scenarios: spins up a real server over
//! a temporary scenario root and drives it with `reqwest`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use mockhearth::generation::{self, GenerationCell};
use mockhearth::http::{self, ServerHandles, ServerTimeouts};
use mockhearth::ratelimiter::RateLimiterStore;
use mockhearth::template::DefaultTemplateRegistry;
use mockhearth::trace::RingBuffer;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

struct TestServer {
    base_url: String,
    _dir: TempDir,
    generation: Arc<GenerationCell>,
    shutdown: CancellationToken,
    root: std::path::PathBuf,
}

impl TestServer {
    async fn start(dir: TempDir) -> Self {
        let registry = DefaultTemplateRegistry;
        let gen = generation::build_generation(dir.path(), &registry, None).unwrap();
        let generation = Arc::new(GenerationCell::new(gen));
        let rate_limiter = RateLimiterStore::new(Duration::from_secs(300));
        let trace = Arc::new(RingBuffer::new(100));
        let shutdown = CancellationToken::new();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let handles = ServerHandles {
            generation: Arc::clone(&generation),
            rate_limiter,
            trace,
        };

        let timeouts = ServerTimeouts {
            idle: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
        };
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            http::serve(listener, handles, server_shutdown, timeouts).await.unwrap();
        });

        // Give the spawned accept loop a moment to start serving.
        tokio::time::sleep(Duration::from_millis(20)).await;

        TestServer {
            base_url: format!("http://127.0.0.1:{port}"),
            root: dir.path().to_path_buf(),
            _dir: dir,
            generation,
            shutdown,
        }
    }

    fn reload(&self) {
        let registry = DefaultTemplateRegistry;
        let gen = generation::build_generation(&self.root, &registry, None).unwrap();
        self.generation.publish(gen);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn write(dir: &Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

#[tokio::test]
async fn priority_wins_and_id_breaks_ties() {
    let dir = tempdir().unwrap();
    write(dir.path(), "a.yaml", "id: a\npriority: 10\nwhen: { method: GET, path: /x }\nresponse: { body: from-a }\n");
    write(dir.path(), "b.yaml", "id: b\npriority: 10\nwhen: { method: GET, path: /x }\nresponse: { body: from-b }\n");
    write(dir.path(), "c.yaml", "id: c\npriority: 20\nwhen: { method: GET, path: /x }\nresponse: { body: from-c }\n");
    let server = TestServer::start(dir).await;

    let client = reqwest::Client::new();
    let body = client.get(format!("{}/x", server.base_url)).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "from-c");

    std::fs::remove_file(server.root.join("c.yaml")).unwrap();
    server.reload();

    let body = client.get(format!("{}/x", server.base_url)).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "from-a");
}

#[tokio::test]
async fn header_exact_vs_regex() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "exact.yaml",
        "id: exact\nwhen: { method: GET, path: /h, headers: { Content-Type: \"=application/json\" } }\nresponse: { body: matched }\n",
    );
    let server = TestServer::start(dir).await;
    let client = reqwest::Client::new();

    let resp = client
        .get(format!("{}/h", server.base_url))
        .header("Content-Type", "application/json; charset=utf-8")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let dir2 = tempdir().unwrap();
    write(
        dir2.path(),
        "pattern.yaml",
        "id: pattern\nwhen: { method: GET, path: /h, headers: { Content-Type: \"application/json.*\" } }\nresponse: { body: matched }\n",
    );
    let server2 = TestServer::start(dir2).await;
    let resp2 = client
        .get(format!("{}/h", server2.base_url))
        .header("Content-Type", "application/json; charset=utf-8")
        .send()
        .await
        .unwrap();
    assert_eq!(resp2.status(), 200);
    assert_eq!(resp2.text().await.unwrap(), "matched");
}

#[tokio::test]
async fn body_all_clause_requires_every_condition() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "all.yaml",
        r#"id: all
when:
  method: POST
  path: /b
  body:
    all:
      - conditions: [{ extractor: "$.a", matcher: "=1" }]
      - conditions: [{ extractor: "$.b", matcher: "=2" }]
response: { body: matched }
"#,
    );
    let server = TestServer::start(dir).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/b", server.base_url))
        .body(r#"{"a":1,"b":2}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{}/b", server.base_url))
        .body(r#"{"a":1,"b":3}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn rate_limit_denies_then_recovers() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "rl.yaml",
        r#"id: rl
when: { method: GET, path: /rl }
response: { body: ok }
policy:
  rate_limit: { rate: 1.0, burst: 2, key: "global" }
"#,
    );
    let server = TestServer::start(dir).await;
    let client = reqwest::Client::new();

    let r1 = client.get(format!("{}/rl", server.base_url)).send().await.unwrap();
    let r2 = client.get(format!("{}/rl", server.base_url)).send().await.unwrap();
    let r3 = client.get(format!("{}/rl", server.base_url)).send().await.unwrap();
    assert_eq!(r1.status(), 200);
    assert_eq!(r2.status(), 200);
    assert_eq!(r3.status(), 429);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    let r4 = client.get(format!("{}/rl", server.base_url)).send().await.unwrap();
    assert_eq!(r4.status(), 200);
}

#[tokio::test]
async fn template_renders_path_param() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "tmpl.yaml",
        r#"id: tmpl
when: { method: GET, path: /hi/{name} }
response:
  engine: expr
  body: "${\"hello \" + path_params.name}"
"#,
    );
    let server = TestServer::start(dir).await;
    let client = reqwest::Client::new();
    let body = client
        .get(format!("{}/hi/world", server.base_url))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hello world");
}

#[tokio::test]
async fn pagination_page_size_envelope() {
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "list.yaml",
        r#"id: list
when: { method: GET, path: /list }
response:
  body: '{"items":[1,2,3,4,5]}'
  content_type: application/json
policy:
  pagination: { style: page_size, default_size: 2, max_size: 10, data_path: "$.items" }
"#,
    );
    let server = TestServer::start(dir).await;
    let client = reqwest::Client::new();
    let value: serde_json::Value = client
        .get(format!("{}/list?page=2", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(value["data"], serde_json::json!([3, 4]));
    assert_eq!(value["page"], serde_json::json!(2));
    assert_eq!(value["size"], serde_json::json!(2));
    assert_eq!(value["total_items"], serde_json::json!(5));
    assert_eq!(value["total_pages"], serde_json::json!(3));
    assert_eq!(value["has_next"], serde_json::json!(true));
    assert_eq!(value["has_previous"], serde_json::json!(true));
}

#[tokio::test]
async fn pagination_applies_to_templated_body_with_no_content_type_field() {
    // A scenario whose body comes from the `expr` engine and sets no
    // `content_type:` field still renders JSON; pagination must key off the
    // actual rendered bytes, not a content-type heuristic computed from the
    // unrendered template source.
    let dir = tempdir().unwrap();
    write(
        dir.path(),
        "list.yaml",
        r#"id: list
when: { method: GET, path: /list }
response:
  engine: expr
  body: '${"[1,2,3,4,5]"}'
policy:
  pagination: { style: page_size, default_size: 2, max_size: 10, data_path: "$" }
"#,
    );
    let server = TestServer::start(dir).await;
    let client = reqwest::Client::new();
    let value: serde_json::Value = client
        .get(format!("{}/list?page=2", server.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(value["data"], serde_json::json!([3, 4]));
    assert_eq!(value["total_items"], serde_json::json!(5));
}

#[tokio::test]
async fn hot_reload_swaps_generation_without_downtime() {
    let dir = tempdir().unwrap();
    write(dir.path(), "v.yaml", "id: v\nwhen: { method: GET, path: /v }\nresponse: { body: v1 }\n");
    let server = TestServer::start(dir).await;
    let client = reqwest::Client::new();

    let body = client.get(format!("{}/v", server.base_url)).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "v1");

    write(&server.root, "v.yaml", "id: v\nwhen: { method: GET, path: /v }\nresponse: { body: v2 }\n");
    server.reload();

    let body = client.get(format!("{}/v", server.base_url)).send().await.unwrap().text().await.unwrap();
    assert_eq!(body, "v2");
}
