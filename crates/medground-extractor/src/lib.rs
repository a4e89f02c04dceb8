//! MedGround Extractor - Structured triple extraction
//!
//! Turns raw clinical text into validated [`Triple`]s by asking the oracle
//! for schema-shaped JSON and validating every candidate against the closed
//! vocabulary. A single malformed fact never invalidates the batch.

use std::sync::Arc;

use medground_core::{LlmClient, PromptSpec, Result, Triple};
use serde::Serialize;

pub mod parse;
pub mod prompt;

pub use parse::parse_response;
pub use prompt::{build_extraction_prompt, EXTRACTION_SYSTEM_PROMPT};

/// A candidate fact that failed validation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Position of the candidate in the oracle's list
    pub index: usize,
    /// Why it was dropped
    pub reason: String,
}

/// Accepted triples in oracle order, plus the candidates that were dropped
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExtractionOutcome {
    pub triples: Vec<Triple>,
    pub rejected: Vec<Rejection>,
}

/// Oracle-backed triple extractor
pub struct StructuredExtractor {
    llm_client: Arc<dyn LlmClient>,
    temperature: f32,
}

impl StructuredExtractor {
    /// Create a new extractor
    pub fn new(llm_client: Arc<dyn LlmClient>) -> Self {
        Self {
            llm_client,
            temperature: 0.0,
        }
    }

    /// Set sampling temperature for extraction requests
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Build the oracle request for `source_text`
    pub fn build_request(&self, source_text: &str) -> PromptSpec {
        PromptSpec::new(build_extraction_prompt(source_text))
            .with_system(EXTRACTION_SYSTEM_PROMPT)
            .json()
            .with_temperature(self.temperature)
    }

    /// Extract validated triples from `source_text`
    ///
    /// The caller guarantees `source_text` is non-empty after trimming.
    pub async fn extract(&self, source_text: &str) -> Result<Vec<Triple>> {
        Ok(self.extract_detailed(source_text).await?.triples)
    }

    /// Extract triples and report the candidates that were dropped
    pub async fn extract_detailed(&self, source_text: &str) -> Result<ExtractionOutcome> {
        tracing::info!(
            "Extracting triples from {} chars via {}",
            source_text.len(),
            self.llm_client.name()
        );

        let request = self.build_request(source_text);
        let response = self.llm_client.generate(&request).await?;
        tracing::debug!("Extraction response received: {} chars", response.len());

        let outcome = parse_response(&response).inspect_err(|e| {
            tracing::warn!("Extraction output rejected: {e}");
        })?;

        for rejection in &outcome.rejected {
            tracing::debug!(
                "Dropped candidate #{}: {}",
                rejection.index,
                rejection.reason
            );
        }
        tracing::info!(
            kept = outcome.triples.len(),
            dropped = outcome.rejected.len(),
            "Extraction completed"
        );

        Ok(outcome)
    }
}

// ============================================================================
// Tests
// ============================================================================
