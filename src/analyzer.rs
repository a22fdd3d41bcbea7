//! # Case analysis pipeline
//!
//! ```text
//! raw text ─▶ InputNormalizer ─▶ retrieve_knowledge ─▶ 4 × AnalysisAgent ─▶ DecisionSynthesizer
//! ```
//!
//! The four dimension agents run concurrently. Any completion error from an agent or
//! from the decision step aborts the analysis; the input step never fails. Retrieval
//! embeds the query and may wait on a rebuild lock, so it runs on the blocking pool.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::agents::decision::{DecisionSynthesizer, DimensionAnalyses};
use crate::agents::input::InputNormalizer;
use crate::agents::{AnalysisAgent, AnalysisDimension};
use crate::embedding::EmbeddingProvider;
use crate::error::KnowledgeError;
use crate::knowledge::KnowledgeEngine;
use crate::llm::{Completion, LlmError};
use crate::records::RetrievedItem;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("knowledge retrieval failed: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("knowledge retrieval task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Everything the pipeline produced for one case.
#[derive(Debug, Clone, Serialize)]
pub struct CaseReport {
    pub input: String,
    pub structured: Value,
    pub knowledge: Vec<RetrievedItem>,
    pub analyses: DimensionAnalyses,
    pub decision: String,
}

pub struct CaseAnalyzer<E, C> {
    engine: Arc<KnowledgeEngine<E>>,
    llm: C,
    top_k: usize,
}

impl<E: EmbeddingProvider + 'static, C: Completion> CaseAnalyzer<E, C> {
    pub fn new(engine: Arc<KnowledgeEngine<E>>, llm: C, top_k: usize) -> Self {
        Self { engine, llm, top_k }
    }

    pub fn engine(&self) -> &KnowledgeEngine<E> {
        &self.engine
    }

    pub async fn analyze(&self, raw: &str) -> Result<CaseReport, AnalysisError> {
        let structured = InputNormalizer::new(&self.llm).process(raw).await;

        let knowledge = {
            let engine = Arc::clone(&self.engine);
            let query = structured.clone();
            let top_k = self.top_k;
            tokio::task::spawn_blocking(move || engine.retrieve_knowledge(query, top_k)).await??
        };
        info!("Retrieved {} knowledge items", knowledge.len());

        let [subject, behavior, scenario, result] =
            AnalysisDimension::ALL.map(|dimension| AnalysisAgent::new(dimension, &self.llm));
        let (subject, behavior, scenario, result) = futures::try_join!(
            subject.analyze(&structured, &knowledge),
            behavior.analyze(&structured, &knowledge),
            scenario.analyze(&structured, &knowledge),
            result.analyze(&structured, &knowledge),
        )?;
        let analyses = DimensionAnalyses {
            subject,
            behavior,
            scenario,
            result,
        };

        let decision = DecisionSynthesizer::new(&self.llm)
            .decide(&structured, &knowledge, &analyses)
            .await?;

        Ok(CaseReport {
            input: raw.to_string(),
            structured,
            knowledge,
            analyses,
            decision,
        })
    }
}
