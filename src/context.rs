//! Explicit application context.
//!
//! Everything a request handler or CLI command needs, built once at
//! startup and passed down by `Arc`. There is no global state.

use std::sync::Arc;

use health_rag_core::fusion::HybridRetriever;
use health_rag_core::generation::Generator;
use health_rag_core::memory::SessionMemory;
use health_rag_core::Result;

use crate::config::Config;
use crate::corpus;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::orchestrator::Orchestrator;
use crate::sessions::{SessionStore, SqliteSessionStore};

pub struct AppContext {
    pub config: Arc<Config>,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn SessionStore>,
}

impl AppContext {
    /// Build the index, connect providers, and open the session archive.
    ///
    /// Any failure here is a startup failure.
    pub async fn build(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config)?;
        let generator = create_generator(&config)?;
        let retriever = corpus::build_retriever(&config, embedder).await?;
        let store = SqliteSessionStore::open(&config.sessions_db_path()).await?;
        Self::from_parts(config, retriever, generator, Arc::new(store))
    }

    /// Assemble a context from prebuilt parts.
    pub fn from_parts(
        config: Config,
        retriever: HybridRetriever,
        generator: Arc<dyn Generator>,
        store: Arc<dyn SessionStore>,
    ) -> Result<Self> {
        let orchestrator = Orchestrator::from_config(
            &config,
            Arc::new(retriever),
            Arc::new(SessionMemory::new()),
            generator,
        )?;
        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            store,
        })
    }

    pub fn memory(&self) -> &SessionMemory {
        self.orchestrator.memory()
    }

    pub fn retriever(&self) -> &HybridRetriever {
        self.orchestrator.retriever()
    }
}
