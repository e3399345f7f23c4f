use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use parolier::lexicon::StaticLexicon;
use parolier::model::testing::{EchoLoader, FailingLoader, FlakyLoader};
use parolier::model::{GenerationParams, ModelLoader, ModelSlot};
use parolier::pipeline::InferencePipeline;
use parolier::server::{self, AppState};
use parolier::task::{
    InMemoryTaskStore, RetryController, RetryPolicy, TaskId, TaskQueue, TaskState, TaskStore,
    Worker,
};

struct TestServer {
    base_url: String,
    store: Arc<InMemoryTaskStore>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Full production stack over test doubles: real router, store, queue,
    /// worker and retry controller, bound to an ephemeral port.
    async fn spawn(loader: Arc<dyn ModelLoader>, policy: RetryPolicy) -> Self {
        Self::spawn_with_budget(loader, policy, 256).await
    }

    async fn spawn_with_budget(
        loader: Arc<dyn ModelLoader>,
        policy: RetryPolicy,
        input_token_budget: usize,
    ) -> Self {
        let store = Arc::new(InMemoryTaskStore::new());
        let dyn_store: Arc<dyn TaskStore> = store.clone();
        let queue = TaskQueue::new();
        let slot = Arc::new(ModelSlot::new(loader.clone()));
        let pipeline = Arc::new(InferencePipeline::new(
            loader,
            slot.clone(),
            GenerationParams::default(),
            input_token_budget,
        ));
        let controller =
            RetryController::new(dyn_store.clone(), queue.clone(), pipeline, policy);
        let worker = Worker::new(queue.clone(), controller, slot, 0);
        tokio::spawn(worker.run());

        let app = server::router(AppState {
            store: dyn_store,
            queue,
            lexicon: Arc::new(StaticLexicon::french()),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            handle,
        }
    }

    fn record(&self, task_id: &str) -> parolier::task::Task {
        let id = TaskId::parse(task_id).expect("response task_id is not a uuid");
        self.store.get(id).expect("task record missing")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn submit_lyric(
    client: &reqwest::Client,
    base_url: &str,
    lyric: &str,
) -> String {
    let res = client
        .post(format!("{}/api/generate-context", base_url))
        .json(&json!({ "lyric": lyric }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    let task_id = body["task_id"].as_str().expect("task_id missing").to_string();
    assert!(TaskId::parse(&task_id).is_some());
    task_id
}

/// Polls until the service stops reporting pending.
async fn poll_until_terminal(
    client: &reqwest::Client,
    base_url: &str,
    task_id: &str,
) -> (StatusCode, serde_json::Value) {
    for _ in 0..400 {
        let res = client
            .get(format!("{}/api/get-context-result/{}", base_url, task_id))
            .send()
            .await
            .unwrap();
        let status = res.status();
        let body: serde_json::Value = res.json().await.unwrap();
        if body["status"] != "pending" {
            return (status, body);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task did not reach a terminal state within timeout");
}

#[tokio::test]
async fn submitted_lyric_completes_and_serves_its_context() {
    let loader = Arc::new(EchoLoader::new());
    let srv = TestServer::spawn(loader, RetryPolicy::new(3, Duration::from_millis(25))).await;
    let client = reqwest::Client::new();

    let task_id = submit_lyric(&client, &srv.base_url, "Bonjour le monde").await;

    let (status, body) = poll_until_terminal(&client, &srv.base_url, &task_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    let context = body["context"].as_str().unwrap();
    assert!(context.contains("Bonjour"));
    assert!(body.get("error").is_none());

    let record = srv.record(&task_id);
    assert_eq!(record.state, TaskState::Succeeded);
    assert_eq!(record.attempts, 1);
}

#[tokio::test]
async fn empty_lyric_is_rejected_without_creating_a_task() {
    let loader = Arc::new(EchoLoader::new());
    let srv = TestServer::spawn(loader, RetryPolicy::default()).await;
    let client = reqwest::Client::new();

    for body in [json!({ "lyric": "" }), json!({ "lyric": "   " }), json!({})] {
        let res = client
            .post(format!("{}/api/generate-context", srv.base_url))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = res.json().await.unwrap();
        assert_eq!(body["error"], "Lyric is required");
    }

    assert!(srv.store.is_empty());
}

#[tokio::test]
async fn transient_failure_recovers_on_a_later_attempt() {
    let loader = Arc::new(FlakyLoader::failing_first(1));
    let srv = TestServer::spawn(
        loader.clone(),
        RetryPolicy::new(3, Duration::from_millis(300)),
    )
    .await;
    let client = reqwest::Client::new();

    let task_id = submit_lyric(&client, &srv.base_url, "La mer qu'on voit danser").await;

    // The first attempt fails fast, after which the task sits in backoff.
    let res = client
        .get(format!("{}/api/get-context-result/{}", srv.base_url, task_id))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "pending");

    let (status, body) = poll_until_terminal(&client, &srv.base_url, &task_id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");

    let record = srv.record(&task_id);
    assert_eq!(record.attempts, 2);
    assert_eq!(loader.model_attempts(), 2);
}

#[tokio::test]
async fn persistent_failure_exhausts_attempts_then_reports_failed() {
    let loader = Arc::new(FailingLoader::new("mt5 weights unavailable"));
    let srv = TestServer::spawn(
        loader.clone(),
        RetryPolicy::new(3, Duration::from_millis(25)),
    )
    .await;
    let client = reqwest::Client::new();

    let task_id = submit_lyric(&client, &srv.base_url, "Non, rien de rien").await;

    let (status, body) = poll_until_terminal(&client, &srv.base_url, &task_id).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["status"], "failed");
    assert_eq!(body["error"], "dependency error: mt5 weights unavailable");
    assert!(body.get("context").is_none());

    let record = srv.record(&task_id);
    assert_eq!(record.state, TaskState::Failed);
    assert_eq!(record.attempts, 3);
    assert_eq!(loader.model_attempts(), 3);

    // Terminal means terminal: nothing schedules a fourth attempt.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(srv.record(&task_id).attempts, 3);
    assert_eq!(loader.model_attempts(), 3);
}

#[tokio::test]
async fn unknown_and_missing_task_ids_are_rejected() {
    let loader = Arc::new(EchoLoader::new());
    let srv = TestServer::spawn(loader, RetryPolicy::default()).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!(
            "{}/api/get-context-result/{}",
            srv.base_url,
            TaskId::new()
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unknown task id");

    let res = client
        .get(format!(
            "{}/api/get-context-result/not-a-task-id",
            srv.base_url
        ))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(format!("{}/api/get-context-result", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "task_id is required");
}

#[tokio::test]
async fn match_words_returns_the_known_words_as_a_bare_array() {
    let loader = Arc::new(EchoLoader::new());
    let srv = TestServer::spawn(loader, RetryPolicy::default()).await;
    let client = reqwest::Client::new();

    let res = client
        .post(format!("{}/api/match-words", srv.base_url))
        .json(&json!({ "lyrics": "Le soleil et la mer" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let matched: Vec<String> = res.json().await.unwrap();
    assert_eq!(matched, vec!["le", "soleil", "et", "la", "mer"]);

    let res = client
        .post(format!("{}/api/match-words", srv.base_url))
        .json(&json!({ "lyrics": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "Lyrics are required");
}

#[tokio::test]
async fn long_input_is_truncated_before_generation() {
    let loader = Arc::new(EchoLoader::new());
    let srv = TestServer::spawn_with_budget(
        loader,
        RetryPolicy::new(3, Duration::from_millis(25)),
        8,
    )
    .await;
    let client = reqwest::Client::new();

    let lyric = "paroles ".repeat(40);
    let task_id = submit_lyric(&client, &srv.base_url, lyric.trim()).await;

    let (status, body) = poll_until_terminal(&client, &srv.base_url, &task_id).await;
    assert_eq!(status, StatusCode::OK);
    let context = body["context"].as_str().unwrap();
    // The echo backend reflects exactly what survived truncation.
    assert_eq!(context.split_whitespace().count(), 8);
    assert!(context.starts_with("Translate and explain"));
}
