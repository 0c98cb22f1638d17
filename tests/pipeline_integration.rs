//! End-to-end tests for the answer pipeline, the evaluation harness, and the
//! HTTP API, with scripted generators in place of a real model.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use health_rag::config::{parse_config, Config};
use health_rag::context::AppContext;
use health_rag::embedding::HashingEmbedder;
use health_rag::eval::{
    run_evaluation, Criterion, EvalInput, EvalItem, EvalReference, Judge, JudgeCase, LlmJudge, Verdict,
};
use health_rag::orchestrator::TurnRequest;
use health_rag::server;
use health_rag::sessions::{archive_session, InMemorySessionStore, SessionStore};
use health_rag_core::fusion::HybridRetriever;
use health_rag_core::generation::{GenerationRequest, Generator};
use health_rag_core::models::{Document, DocumentMetadata, Role};
use health_rag_core::RagError;

// ============ Fixtures ============

fn doc(title: &str, url: &str, text: &str) -> Document {
    Document {
        page_content: text.to_string(),
        metadata: DocumentMetadata {
            title: title.to_string(),
            source_url: url.to_string(),
            ..Default::default()
        },
    }
}

fn corpus() -> Vec<Document> {
    vec![
        doc(
            "당뇨병 식사요법",
            "https://example.org/diabetes-diet",
            "당뇨병 환자는 잡곡밥과 채소 위주의 식단으로 혈당을 관리합니다. 단순당이 많은 음료는 피합니다.",
        ),
        doc(
            "Hypertension Diet",
            "https://example.org/hypertension",
            "Hypertension patients should limit sodium intake. Potassium-rich vegetables help lower blood pressure.",
        ),
        doc(
            "Knee Exercises",
            "https://example.org/knee",
            "Knee osteoarthritis improves with gentle quadriceps strengthening exercises and weight control.",
        ),
    ]
}

fn test_config(bind: &str) -> Config {
    let text = format!(
        r#"
[index]
chunk_size = 120
overlap = 20
top_k = 2
embedding_model_id = "hash-128"
generation_model_id = "scripted"

[embedding]
provider = "hashing"
dims = 128

[generation]
turn_timeout_secs = 5

[server]
bind = "{}"
"#,
        bind
    );
    parse_config(&text, PathBuf::from(".")).unwrap()
}

async fn build_retriever(config: &Config) -> HybridRetriever {
    let embedder = Arc::new(HashingEmbedder::new(
        config.index.embedding_model_id.clone(),
        config.embedding.dims.unwrap(),
    ));
    HybridRetriever::build(
        &corpus(),
        config.index.chunk_size,
        config.index.overlap,
        embedder,
        config.embedding.batch_size,
    )
    .await
    .unwrap()
}

/// Answers `answer N` and records every request; can be switched to fail.
#[derive(Default)]
struct ScriptedGenerator {
    calls: AtomicUsize,
    fail: AtomicBool,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    fn system_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.messages[0].content.clone())
            .collect()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, RagError> {
        self.requests.lock().unwrap().push(request.clone());
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail.load(Ordering::SeqCst) {
            return Err(RagError::Generation("upstream unavailable".into()));
        }
        Ok(format!("answer {}", n))
    }
}

async fn build_context(bind: &str) -> (Arc<AppContext>, Arc<ScriptedGenerator>, Arc<InMemorySessionStore>) {
    let config = test_config(bind);
    let retriever = build_retriever(&config).await;
    let generator = Arc::new(ScriptedGenerator::default());
    let store = Arc::new(InMemorySessionStore::new());
    let ctx = AppContext::from_parts(config, retriever, generator.clone(), store.clone()).unwrap();
    (Arc::new(ctx), generator, store)
}

// ============ Orchestrator ============

#[tokio::test]
async fn test_korean_query_with_failed_generation_leaves_memory_unchanged() {
    let (ctx, generator, _) = build_context("127.0.0.1:0").await;
    let orchestrator = &ctx.orchestrator;

    let ok = orchestrator
        .respond(&TurnRequest::new(Some("s1".into()), "당뇨병 환자는 어떤 식단이 좋나요"))
        .await
        .unwrap();
    assert_eq!(ok.response, "answer 1");
    assert!(!ok.context.is_empty());
    assert_eq!(orchestrator.memory().to_prompt_history("s1").len(), 2);

    generator.set_failing(true);
    let err = orchestrator
        .respond(&TurnRequest::new(Some("s1".into()), "단순당 음료는 왜 피하나요"))
        .await
        .unwrap_err();
    assert!(matches!(err, RagError::Generation(_)));

    let history = orchestrator.memory().to_prompt_history("s1");
    assert_eq!(history.len(), 2, "failed turn must not be recorded");
    assert_eq!(history[1].content, "answer 1");
}

#[tokio::test]
async fn test_second_turn_sees_first_exchange_in_order() {
    let (ctx, generator, _) = build_context("127.0.0.1:0").await;
    let orchestrator = &ctx.orchestrator;

    orchestrator
        .respond(&TurnRequest::new(Some("s2".into()), "무릎 운동을 알려주세요"))
        .await
        .unwrap();
    orchestrator
        .respond(&TurnRequest::new(Some("s2".into()), "하루에 몇 번 하나요"))
        .await
        .unwrap();

    let prompts = generator.system_prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("(none)"));
    let second = &prompts[1];
    let q = second.find("user: 무릎 운동을 알려주세요").expect("first question in history");
    let a = second.find("assistant: answer 1").expect("first answer in history");
    assert!(q < a);
    assert!(!second.contains("user: 하루에 몇 번 하나요"));

    let history = orchestrator.memory().to_prompt_history("s2");
    let roles: Vec<Role> = history.iter().map(|t| t.role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant, Role::User, Role::Assistant]);
    let seqs: Vec<u64> = history.iter().map(|t| t.sequence_no).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (ctx, _, _) = build_context("127.0.0.1:0").await;
    let orchestrator = &ctx.orchestrator;

    orchestrator
        .respond(&TurnRequest::new(Some("a".into()), "혈압 관리"))
        .await
        .unwrap();
    orchestrator
        .respond(&TurnRequest::new(Some("b".into()), "knee pain"))
        .await
        .unwrap();

    let a = orchestrator.memory().to_prompt_history("a");
    let b = orchestrator.memory().to_prompt_history("b");
    assert_eq!(a.len(), 2);
    assert_eq!(b.len(), 2);
    assert_eq!(a[0].content, "혈압 관리");
    assert_eq!(b[0].content, "knee pain");
}

#[tokio::test]
async fn test_archive_moves_conversation_into_store() {
    let (ctx, _, store) = build_context("127.0.0.1:0").await;

    ctx.orchestrator
        .respond(&TurnRequest::new(Some("s3".into()), "당뇨병 식단"))
        .await
        .unwrap();

    let id = archive_session(store.as_ref(), ctx.memory(), "alice", "s3")
        .await
        .unwrap();
    assert_eq!(id, Some(1));
    assert!(ctx.memory().to_prompt_history("s3").is_empty());

    let titles = store.get_chat_titles("alice").await.unwrap();
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].title, "당뇨병 식단");

    let log = store.get_session_chat("alice", 1).await.unwrap();
    let senders: Vec<&str> = log.iter().map(|e| e.sender.as_str()).collect();
    assert_eq!(senders, vec!["user", "assistant"]);
}

// ============ Evaluation ============

/// Correctness passes when the response mentions the reference label;
/// groundedness passes when any facts were retrieved.
struct KeywordJudge;

#[async_trait]
impl Judge for KeywordJudge {
    async fn judge(&self, criterion: Criterion, case: &JudgeCase<'_>) -> Result<Verdict, RagError> {
        let verdict = match criterion {
            Criterion::Correctness => case.response.contains(case.reference),
            Criterion::Groundedness => !case.facts.is_empty(),
            _ => return Err(RagError::Generation("judge offline".into())),
        };
        Ok(Verdict {
            explanation: format!("{} checked", criterion),
            verdict,
        })
    }
}

fn item(text: &str, label: &str) -> EvalItem {
    EvalItem {
        input: EvalInput { text: text.to_string() },
        reference: EvalReference {
            label: label.to_string(),
        },
    }
}

#[tokio::test]
async fn test_evaluation_tallies_grades_and_failures() {
    let (ctx, _, _) = build_context("127.0.0.1:0").await;
    let dataset = vec![
        item("당뇨병 식단", "answer 1"),
        item("knee exercises", "잡곡밥"),
        item("   ", "anything"),
    ];

    let report = run_evaluation(
        &ctx.orchestrator,
        &KeywordJudge,
        &dataset,
        &[Criterion::Correctness, Criterion::Groundedness],
    )
    .await;

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.failed_items, 1);
    let correctness = &report.summary.criteria[&Criterion::Correctness];
    assert_eq!((correctness.passed, correctness.graded, correctness.errors), (1, 2, 0));
    let grounded = &report.summary.criteria[&Criterion::Groundedness];
    assert_eq!((grounded.passed, grounded.graded), (2, 2));

    assert_eq!(report.items.len(), 3);
    assert!(report.items[2].error.is_some());
    assert!(report.items[2].response.is_none());
    assert!(!report.items[0].context_chunk_ids.is_empty());

    // history-free target path never writes memory
    assert_eq!(ctx.memory().session_count(), 0);
}

#[tokio::test]
async fn test_judge_errors_are_counted_per_criterion() {
    let (ctx, _, _) = build_context("127.0.0.1:0").await;
    let report = run_evaluation(
        &ctx.orchestrator,
        &KeywordJudge,
        &[item("혈압", "answer")],
        &[Criterion::Relevance],
    )
    .await;

    let relevance = &report.summary.criteria[&Criterion::Relevance];
    assert_eq!((relevance.graded, relevance.errors), (0, 1));
    assert_eq!(report.summary.failed_items, 1);
    assert_eq!(report.items[0].grades[0].passed, None);
}

/// Replies with a fixed judge output and counts calls.
struct CannedGenerator {
    reply: &'static str,
    temperatures: Mutex<Vec<Option<f32>>>,
}

#[async_trait]
impl Generator for CannedGenerator {
    fn model_name(&self) -> &str {
        "canned"
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, RagError> {
        self.temperatures.lock().unwrap().push(request.temperature);
        Ok(self.reply.to_string())
    }
}

#[tokio::test]
async fn test_llm_judge_parses_wrapped_json_at_zero_temperature() {
    let generator = Arc::new(CannedGenerator {
        reply: "Here is my grading:\n{\"explanation\": \"matches the reference\", \"verdict\": true}\n",
        temperatures: Mutex::new(Vec::new()),
    });
    let judge = LlmJudge::new(generator.clone());
    let facts = vec!["잡곡밥과 채소 위주의 식단".to_string()];
    let case = JudgeCase {
        question: "당뇨병 식단",
        reference: "잡곡밥",
        response: "잡곡밥을 드세요",
        facts: &facts,
    };

    for criterion in Criterion::ALL {
        let verdict = judge.judge(criterion, &case).await.unwrap();
        assert!(verdict.verdict);
        assert_eq!(verdict.explanation, "matches the reference");
    }
    let temps = generator.temperatures.lock().unwrap();
    assert_eq!(temps.len(), Criterion::ALL.len());
    assert!(temps.iter().all(|t| *t == Some(0.0)));
}

#[tokio::test]
async fn test_llm_judge_rejects_non_json() {
    let judge = LlmJudge::new(Arc::new(CannedGenerator {
        reply: "looks fine to me",
        temperatures: Mutex::new(Vec::new()),
    }));
    let case = JudgeCase {
        question: "q",
        reference: "r",
        response: "a",
        facts: &[],
    };
    assert!(judge.judge(Criterion::Correctness, &case).await.is_err());
}

// ============ HTTP API ============

/// Find a free TCP port by binding to port 0.
fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Poll /health until the server is ready.
async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        if client.get(&url).send().await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("Server did not start within 5 seconds on port {}", port);
}

async fn start_server() -> (String, Arc<ScriptedGenerator>, Arc<InMemorySessionStore>) {
    let port = find_free_port();
    let (ctx, generator, store) = build_context(&format!("127.0.0.1:{}", port)).await;
    tokio::spawn(server::run_server(ctx));
    wait_for_server(port).await;
    (format!("http://127.0.0.1:{}", port), generator, store)
}

#[tokio::test]
async fn test_http_health_reports_chunks() {
    let (base, _, _) = start_server().await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["chunks"].as_u64().unwrap() >= 3);
}

#[tokio::test]
async fn test_http_chat_history_reset_flow() {
    let (base, _, _) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/v1/chat", base))
        .json(&serde_json::json!({
            "session_id": "web-1",
            "query": "당뇨병 식단",
            "include_context": true
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["response"], "answer 1");
    let context = body["context"].as_array().unwrap();
    assert!(!context.is_empty());
    assert!(context[0]["title"].is_string());
    assert!(context[0]["source_url"].as_str().unwrap().starts_with("https://"));

    let history: serde_json::Value = client
        .get(format!("{}/v1/sessions/web-1/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let turns = history["turns"].as_array().unwrap();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0]["role"], "user");
    assert_eq!(turns[0]["content"], "당뇨병 식단");
    assert_eq!(turns[1]["content"], "answer 1");

    let reset = client
        .post(format!("{}/v1/sessions/web-1/reset", base))
        .send()
        .await
        .unwrap();
    assert_eq!(reset.status(), 200);

    let history: serde_json::Value = client
        .get(format!("{}/v1/sessions/web-1/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(history["turns"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_http_chat_without_session_omits_context_and_writes_nothing() {
    let (base, _, _) = start_server().await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/v1/chat", base))
        .json(&serde_json::json!({ "query": "knee exercises" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["response"], "answer 1");
    assert!(body.get("context").is_none());
}

#[tokio::test]
async fn test_http_error_contract() {
    let (base, generator, _) = start_server().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{}/v1/chat", base))
        .json(&serde_json::json!({ "session_id": "x", "query": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "config");

    let resp = client
        .get(format!("{}/v1/sessions/never-seen/history", base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "unknown_session");

    generator.set_failing(true);
    let resp = client
        .post(format!("{}/v1/chat", base))
        .json(&serde_json::json!({ "session_id": "x", "query": "혈압" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 502);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "generation");

    let history: serde_json::Value = client
        .get(format!("{}/v1/sessions/x/history", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(history["turns"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_http_search_and_archive() {
    let (base, _, store) = start_server().await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client
        .post(format!("{}/v1/search", base))
        .json(&serde_json::json!({ "query": "quadriceps strengthening", "top_k": 1 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = body["results"].as_array().unwrap();
    assert!((1..=2).contains(&results.len()));
    assert_eq!(results[0]["title"], "Knee Exercises");

    client
        .post(format!("{}/v1/chat", base))
        .json(&serde_json::json!({ "session_id": "web-2", "query": "무릎 운동" }))
        .send()
        .await
        .unwrap();

    let body: serde_json::Value = client
        .post(format!("{}/v1/sessions/web-2/archive", base))
        .json(&serde_json::json!({ "user_id": "bob" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["archived_session_id"], 1);

    let titles = store.get_chat_titles("bob").await.unwrap();
    assert_eq!(titles.len(), 1);
    assert_eq!(titles[0].title, "무릎 운동");

    // archived twice: nothing left to move
    let body: serde_json::Value = client
        .post(format!("{}/v1/sessions/web-2/archive", base))
        .json(&serde_json::json!({ "user_id": "bob" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body["archived_session_id"].is_null());
}
