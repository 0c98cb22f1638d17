//! Generation orchestrator: one question in, one grounded answer out.
//!
//! # Turn Lifecycle
//!
//! ```text
//! Idle ─▶ ContextRetrieved ─▶ Generating ─▶ Completed
//!                                   └──────▶ Failed
//! ```
//!
//! 1. Reject a blank query before doing any work.
//! 2. Retrieve fused context. A retrieval failure degrades to empty context.
//! 3. Render the versioned prompt with the session history (empty in
//!    history-free mode), the query, and the context.
//! 4. Call the generator exactly once.
//! 5. On success, append the user and assistant turns as one adjacent pair.
//!    On failure nothing is written, so a failed turn leaves no trace.
//!
//! The orchestrator is the only component that appends to
//! [`SessionMemory`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use health_rag_core::fusion::HybridRetriever;
use health_rag_core::generation::{GenerationRequest, Generator};
use health_rag_core::memory::SessionMemory;
use health_rag_core::models::{ChatTurn, RetrievalResult};
use health_rag_core::prompt::PromptTemplate;
use health_rag_core::{RagError, Result};

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    Idle,
    ContextRetrieved,
    Generating,
    Completed,
    Failed,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TurnState::Idle => "idle",
            TurnState::ContextRetrieved => "context_retrieved",
            TurnState::Generating => "generating",
            TurnState::Completed => "completed",
            TurnState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One question. `session_id = None` runs without history and writes nothing.
#[derive(Debug, Clone, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    pub query: String,
}

impl TurnRequest {
    pub fn new(session_id: Option<String>, query: impl Into<String>) -> Self {
        Self {
            session_id,
            query: query.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnResponse {
    pub response: String,
    pub context: Vec<RetrievalResult>,
}

/// History-free answer used by the evaluation harness.
#[derive(Debug, Clone, Serialize)]
pub struct EvalTarget {
    pub response: String,
    pub context: Vec<RetrievalResult>,
}

pub struct Orchestrator {
    retriever: Arc<HybridRetriever>,
    memory: Arc<SessionMemory>,
    generator: Arc<dyn Generator>,
    template: PromptTemplate,
    top_k: usize,
    temperature: Option<f32>,
}

impl Orchestrator {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        memory: Arc<SessionMemory>,
        generator: Arc<dyn Generator>,
        template: PromptTemplate,
        top_k: usize,
        temperature: Option<f32>,
    ) -> Self {
        Self {
            retriever,
            memory,
            generator,
            template,
            top_k,
            temperature,
        }
    }

    /// Wire an orchestrator from validated config.
    pub fn from_config(
        config: &Config,
        retriever: Arc<HybridRetriever>,
        memory: Arc<SessionMemory>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        let template = PromptTemplate::for_version(&config.index.prompt_template_version)?;
        Ok(Self::new(
            retriever,
            memory,
            generator,
            template,
            config.index.top_k,
            config.generation.temperature,
        ))
    }

    pub fn retriever(&self) -> &HybridRetriever {
        &self.retriever
    }

    pub fn memory(&self) -> &SessionMemory {
        &self.memory
    }

    pub fn generator(&self) -> Arc<dyn Generator> {
        Arc::clone(&self.generator)
    }

    /// Answer one turn.
    ///
    /// # Errors
    ///
    /// - [`RagError::Config`] for a blank query.
    /// - [`RagError::Generation`] when the generator fails; memory is unchanged.
    pub async fn respond(&self, request: &TurnRequest) -> Result<TurnResponse> {
        let query = request.query.trim();
        if query.is_empty() {
            return Err(RagError::Config("query must not be empty".into()));
        }
        let session = request.session_id.as_deref();
        let mut state = TurnState::Idle;

        let context = match self.retriever.search(query, self.top_k).await {
            Ok(results) => results,
            Err(e) => {
                warn!(session = session.unwrap_or("-"), error = %e, "retrieval failed, answering without context");
                Vec::new()
            }
        };
        transition(&mut state, TurnState::ContextRetrieved, session);

        let history = match session {
            Some(id) => {
                self.memory.get_or_create(id);
                self.memory.to_prompt_history(id)
            }
            None => Vec::new(),
        };
        let generation = GenerationRequest {
            messages: self.template.render(&history, query, &context),
            temperature: self.temperature,
        };

        transition(&mut state, TurnState::Generating, session);
        let response = match self.generator.generate(&generation).await {
            Ok(text) => text,
            Err(e) => {
                transition(&mut state, TurnState::Failed, session);
                return Err(match e {
                    RagError::Generation(_) => e,
                    other => RagError::Generation(other.to_string()),
                });
            }
        };

        if let Some(id) = session {
            self.memory
                .append_exchange(id, ChatTurn::user(query), ChatTurn::assistant(response.clone()))?;
        }
        transition(&mut state, TurnState::Completed, session);
        info!(
            session = session.unwrap_or("-"),
            context = context.len(),
            history = history.len(),
            "turn completed"
        );

        Ok(TurnResponse { response, context })
    }

    /// [`respond`](Self::respond) bounded by a wall-clock limit.
    ///
    /// Expiry cancels the turn before any memory write and reports
    /// [`RagError::Generation`].
    pub async fn respond_within(&self, request: &TurnRequest, limit: Duration) -> Result<TurnResponse> {
        match tokio::time::timeout(limit, self.respond(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    session = request.session_id.as_deref().unwrap_or("-"),
                    limit_secs = limit.as_secs(),
                    "turn timed out"
                );
                Err(RagError::Generation(format!("timed out after {}s", limit.as_secs())))
            }
        }
    }

    /// History-free answer for evaluation. Reads and writes no session memory.
    pub async fn target(&self, query: &str) -> Result<EvalTarget> {
        let turn = self.respond(&TurnRequest::new(None, query)).await?;
        Ok(EvalTarget {
            response: turn.response,
            context: turn.context,
        })
    }
}

fn transition(state: &mut TurnState, next: TurnState, session: Option<&str>) {
    debug!(session = session.unwrap_or("-"), from = %state, to = %next, "turn state");
    *state = next;
}
