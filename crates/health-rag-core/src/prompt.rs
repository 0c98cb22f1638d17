//! Versioned prompt templates and prompt assembly.
//!
//! A template is a system prompt with three placeholders: `{chat_history}`,
//! `{query}`, and `{context}`. Placeholders are filled in a single pass, so
//! braces inside user text or retrieved chunks are never re-expanded.

use crate::error::{RagError, Result};
use crate::generation::ChatMessage;
use crate::models::{ChatTurn, RetrievalResult};

const TEMPLATE_V1_KO: &str = "\
당신은 공신력 있는 의료 기관의 자료를 근거로 건강 정보를 안내하는 상담 챗봇입니다.

답변 원칙:
1. 모든 정보는 아래 <<< 관련 근거자료 >>>에 있는 내용만 사용하고, 근거가 없으면 모른다고 답하세요.
2. 답변에 사용한 자료의 출처를 제목과 source_url로 밝히세요. 예: '출처: 서울아산병원 (link)'
3. 사용자의 나이, 성별, 질환 등 맥락이 주어지면 그에 맞춰 구체적으로 조언하세요.
4. 전문적이되 따뜻하고 공감하는 어조를 유지하세요.
5. 정보가 많으면 번호와 소제목으로 구조화하고, 마지막에 사용자의 상황을 더 알기 위한 질문을 하나 덧붙이세요.
6. 진단이나 처방을 대신하지 말고, 필요하면 담당 의사나 영양사와 상의하도록 권하세요.

<<< 과거 사용자 채팅 내용 >>>
{chat_history}

<<< 사용자 입력 >>>
{query}

<<< 관련 근거자료 >>>
{context}
";

const TEMPLATE_V1_EN: &str = "\
You are a health information assistant. Answer only from the reference material below and \
cite each source by title and source_url. If the material does not cover the question, say so. \
Do not diagnose or prescribe; suggest consulting a clinician when appropriate.

<<< Previous conversation >>>
{chat_history}

<<< User question >>>
{query}

<<< Reference material >>>
{context}
";

const EMPTY_HISTORY: &str = "(none)";
const EMPTY_CONTEXT: &str = "(no reference material found)";

/// Template versions accepted by [`PromptTemplate::for_version`].
pub const TEMPLATE_VERSIONS: &[&str] = &["1.0", "1.0-en"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    version: &'static str,
    text: &'static str,
}

impl PromptTemplate {
    /// Look up a template by version string.
    pub fn for_version(version: &str) -> Result<Self> {
        let (version, text) = match version {
            "1.0" => ("1.0", TEMPLATE_V1_KO),
            "1.0-en" => ("1.0-en", TEMPLATE_V1_EN),
            other => {
                return Err(RagError::Config(format!(
                    "unknown prompt_template_version '{}'; expected one of {:?}",
                    other, TEMPLATE_VERSIONS
                )))
            }
        };
        Ok(Self { version, text })
    }

    pub fn version(&self) -> &str {
        self.version
    }

    /// Fill the template and return the messages for one generation call:
    /// the rendered system prompt followed by the user's query.
    pub fn render(&self, history: &[ChatTurn], query: &str, context: &[RetrievalResult]) -> Vec<ChatMessage> {
        let history_text = format_history(history);
        let context_text = format_context(context);
        let system = fill(
            self.text,
            &[
                ("chat_history", history_text.as_str()),
                ("query", query),
                ("context", context_text.as_str()),
            ],
        );
        vec![ChatMessage::system(system), ChatMessage::user(query)]
    }
}

/// One line per turn: `role: content`.
pub fn format_history(history: &[ChatTurn]) -> String {
    if history.is_empty() {
        return EMPTY_HISTORY.to_string();
    }
    history
        .iter()
        .map(|t| format!("{}: {}", t.role, t.content))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Numbered context blocks with title and source for citation.
pub fn format_context(context: &[RetrievalResult]) -> String {
    if context.is_empty() {
        return EMPTY_CONTEXT.to_string();
    }
    context
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let src = &r.chunk.source_document_ref;
            format!(
                "[{}] {} (source_url: {})\n{}",
                i + 1,
                src.title,
                src.source_url,
                r.chunk.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let replaced = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });
        match replaced {
            Some((value, close)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
