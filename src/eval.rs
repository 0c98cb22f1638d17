//! Offline evaluation harness.
//!
//! Runs each dataset question through the history-free orchestrator path
//! and grades the answer with a [`Judge`] on one or more [`Criterion`]s.
//!
//! # Dataset
//!
//! ```json
//! [{ "input": { "text": "question" }, "reference": { "label": "expected answer" } }]
//! ```
//!
//! # Criteria
//!
//! | Criterion | Judged from |
//! |-----------|-------------|
//! | `correctness` | question, reference answer, response |
//! | `relevance` | question, response |
//! | `groundedness` | retrieved chunk texts (FACTS), response |
//! | `retrieval_relevance` | retrieved chunk texts (FACTS), question |
//!
//! A failing item (generation error, judge error) is recorded in the
//! report and counted; it never aborts the run.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use health_rag_core::generation::{ChatMessage, GenerationRequest, Generator};
use health_rag_core::{RagError, Result};

use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalInput {
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalReference {
    pub label: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalItem {
    pub input: EvalInput,
    pub reference: EvalReference,
}

pub fn load_dataset(path: &Path) -> Result<Vec<EvalItem>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| RagError::Config(format!("failed to read dataset {}: {}", path.display(), e)))?;
    serde_json::from_str(&content)
        .map_err(|e| RagError::Config(format!("invalid dataset {}: {}", path.display(), e)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    Correctness,
    Relevance,
    Groundedness,
    RetrievalRelevance,
}

impl Criterion {
    pub const ALL: [Criterion; 4] = [
        Criterion::Correctness,
        Criterion::Relevance,
        Criterion::Groundedness,
        Criterion::RetrievalRelevance,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Criterion::Correctness => "correctness",
            Criterion::Relevance => "relevance",
            Criterion::Groundedness => "groundedness",
            Criterion::RetrievalRelevance => "retrieval_relevance",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Criterion {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        Criterion::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                RagError::Config(format!(
                    "unknown criterion '{}'; expected correctness, relevance, groundedness, or retrieval_relevance",
                    s
                ))
            })
    }
}

/// Everything a judge may look at for one answer.
#[derive(Debug, Clone)]
pub struct JudgeCase<'a> {
    pub question: &'a str,
    pub reference: &'a str,
    pub response: &'a str,
    pub facts: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub explanation: String,
    pub verdict: bool,
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, criterion: Criterion, case: &JudgeCase<'_>) -> Result<Verdict>;
}

// ============ LLM judge ============

const JSON_CONTRACT: &str = "Reason step by step before deciding; do not open with the verdict. \
Reply with a single JSON object and nothing else: \
{\"explanation\": \"<your reasoning>\", \"verdict\": true | false}";

const CORRECTNESS_RUBRIC: &str = "You grade a student's answer against a reference answer.\n\
You receive a QUESTION, a REFERENCE ANSWER, and a STUDENT ANSWER.\n\
Criteria:\n\
(1) Judge only factual accuracy relative to the reference answer.\n\
(2) The student answer must not contradict itself.\n\
(3) Extra information is acceptable if it is accurate relative to the reference.\n\
verdict = true only if every criterion holds.";

const RELEVANCE_RUBRIC: &str = "You grade whether a student's answer addresses the question.\n\
You receive a QUESTION and a STUDENT ANSWER.\n\
Criteria:\n\
(1) The answer is concise and on topic.\n\
(2) The answer helps resolve the question.\n\
verdict = true only if every criterion holds.";

const GROUNDEDNESS_RUBRIC: &str = "You grade whether a student's answer is supported by source material.\n\
You receive FACTS and a STUDENT ANSWER.\n\
Criteria:\n\
(1) The answer is grounded in the FACTS.\n\
(2) The answer adds no information outside the scope of the FACTS.\n\
verdict = true only if every criterion holds.";

const RETRIEVAL_RELEVANCE_RUBRIC: &str = "You grade whether retrieved material relates to a question.\n\
You receive FACTS and a QUESTION.\n\
Criteria:\n\
(1) Look for FACTS that are completely unrelated to the QUESTION.\n\
(2) Any shared keyword or meaning makes the FACTS relevant.\n\
(3) Some unrelated content is acceptable as long as (2) holds.\n\
verdict = true if the FACTS are relevant, false if they are entirely unrelated.";

/// Grades with a chat model at temperature 0.
pub struct LlmJudge {
    generator: Arc<dyn Generator>,
}

impl LlmJudge {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self { generator }
    }

    fn messages(criterion: Criterion, case: &JudgeCase<'_>) -> Vec<ChatMessage> {
        let facts = case.facts.join("\n\n");
        let (rubric, body) = match criterion {
            Criterion::Correctness => (
                CORRECTNESS_RUBRIC,
                format!(
                    "QUESTION: {}\nREFERENCE ANSWER: {}\nSTUDENT ANSWER: {}",
                    case.question, case.reference, case.response
                ),
            ),
            Criterion::Relevance => (
                RELEVANCE_RUBRIC,
                format!("QUESTION: {}\nSTUDENT ANSWER: {}", case.question, case.response),
            ),
            Criterion::Groundedness => (
                GROUNDEDNESS_RUBRIC,
                format!("FACTS: {}\nSTUDENT ANSWER: {}", facts, case.response),
            ),
            Criterion::RetrievalRelevance => (
                RETRIEVAL_RELEVANCE_RUBRIC,
                format!("FACTS: {}\nQUESTION: {}", facts, case.question),
            ),
        };
        vec![
            ChatMessage::system(format!("{}\n\n{}", rubric, JSON_CONTRACT)),
            ChatMessage::user(body),
        ]
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, criterion: Criterion, case: &JudgeCase<'_>) -> Result<Verdict> {
        let request = GenerationRequest {
            messages: Self::messages(criterion, case),
            temperature: Some(0.0),
        };
        let raw = self.generator.generate(&request).await?;
        parse_verdict(&raw)
    }
}

/// Parse the judge's JSON reply, tolerating prose or code fences around it.
pub fn parse_verdict(raw: &str) -> Result<Verdict> {
    let start = raw.find('{');
    let end = raw.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if s < e => serde_json::from_str(&raw[s..=e])
            .map_err(|err| RagError::Generation(format!("judge returned malformed verdict: {}", err))),
        _ => Err(RagError::Generation("judge reply contains no JSON object".into())),
    }
}

// ============ Runner ============

#[derive(Debug, Clone, Serialize)]
pub struct Grade {
    pub criterion: Criterion,
    /// `None` when the judge itself failed.
    pub passed: Option<bool>,
    pub explanation: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalRecord {
    pub query: String,
    pub reference: String,
    pub response: Option<String>,
    pub context_chunk_ids: Vec<String>,
    pub grades: Vec<Grade>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CriterionSummary {
    pub passed: usize,
    pub graded: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalSummary {
    pub total: usize,
    pub failed_items: usize,
    pub criteria: BTreeMap<Criterion, CriterionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub items: Vec<EvalRecord>,
    pub summary: EvalSummary,
}

/// Answer and grade every item, sequentially.
pub async fn run_evaluation(
    orchestrator: &Orchestrator,
    judge: &dyn Judge,
    dataset: &[EvalItem],
    criteria: &[Criterion],
) -> EvalReport {
    let run_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let mut items = Vec::with_capacity(dataset.len());
    let mut summary = EvalSummary {
        total: dataset.len(),
        failed_items: 0,
        criteria: criteria.iter().map(|c| (*c, CriterionSummary::default())).collect(),
    };

    for (i, item) in dataset.iter().enumerate() {
        let question = item.input.text.as_str();
        let target = match orchestrator.target(question).await {
            Ok(t) => t,
            Err(e) => {
                warn!(item = i, error = %e, "evaluation target failed");
                summary.failed_items += 1;
                items.push(EvalRecord {
                    query: question.to_string(),
                    reference: item.reference.label.clone(),
                    response: None,
                    context_chunk_ids: Vec::new(),
                    grades: Vec::new(),
                    error: Some(e.to_string()),
                });
                continue;
            }
        };

        let facts: Vec<String> = target.context.iter().map(|r| r.chunk.text.clone()).collect();
        let case = JudgeCase {
            question,
            reference: &item.reference.label,
            response: &target.response,
            facts: &facts,
        };

        let mut grades = Vec::with_capacity(criteria.len());
        let mut item_failed = false;
        for criterion in criteria {
            let tally = summary.criteria.entry(*criterion).or_default();
            match judge.judge(*criterion, &case).await {
                Ok(v) => {
                    tally.graded += 1;
                    if v.verdict {
                        tally.passed += 1;
                    }
                    grades.push(Grade {
                        criterion: *criterion,
                        passed: Some(v.verdict),
                        explanation: v.explanation,
                    });
                }
                Err(e) => {
                    warn!(item = i, criterion = %criterion, error = %e, "judge failed");
                    tally.errors += 1;
                    item_failed = true;
                    grades.push(Grade {
                        criterion: *criterion,
                        passed: None,
                        explanation: e.to_string(),
                    });
                }
            }
        }
        if item_failed {
            summary.failed_items += 1;
        }

        items.push(EvalRecord {
            query: question.to_string(),
            reference: item.reference.label.clone(),
            response: Some(target.response),
            context_chunk_ids: target.context.iter().map(|r| r.chunk_id.clone()).collect(),
            grades,
            error: None,
        });
    }

    info!(
        run_id = %run_id,
        total = summary.total,
        failed = summary.failed_items,
        "evaluation finished"
    );
    EvalReport {
        run_id,
        started_at,
        items,
        summary,
    }
}

/// Parse `--criteria` values; an empty list means all criteria.
pub fn parse_criteria(names: &[String]) -> Result<Vec<Criterion>> {
    if names.is_empty() {
        return Ok(Criterion::ALL.to_vec());
    }
    let mut out = Vec::new();
    for name in names.iter().flat_map(|n| n.split(',')) {
        let c: Criterion = name.trim().parse()?;
        if !out.contains(&c) {
            out.push(c);
        }
    }
    Ok(out)
}

/// `hrag eval`: answer and grade a dataset, optionally writing the full report.
pub async fn run_eval(
    config: crate::config::Config,
    dataset_path: &Path,
    criteria: &[String],
    out: Option<&Path>,
) -> anyhow::Result<()> {
    let criteria = parse_criteria(criteria)?;
    let dataset = load_dataset(dataset_path)?;
    let ctx = crate::context::AppContext::build(config).await?;
    let judge = LlmJudge::new(ctx.orchestrator.generator());

    let report = run_evaluation(&ctx.orchestrator, &judge, &dataset, &criteria).await;
    if let Some(path) = out {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&report)?)?;
        println!("Report written to {}", path.display());
    }
    print_summary(&report);
    Ok(())
}

pub fn print_summary(report: &EvalReport) {
    println!("Evaluation {}", report.run_id);
    println!(
        "  Items:       {} ({} with errors)",
        report.summary.total, report.summary.failed_items
    );
    println!();
    println!("  {:<22} {:>7} {:>7} {:>7}", "CRITERION", "PASSED", "GRADED", "ERRORS");
    println!("  {}", "-".repeat(46));
    for (criterion, s) in &report.summary.criteria {
        println!(
            "  {:<22} {:>7} {:>7} {:>7}",
            criterion.as_str(),
            s.passed,
            s.graded,
            s.errors
        );
    }
    println!();
}
