//! MedGround RAG - Grounded synthesis and verified generation
//!
//! This crate implements the two oracle-backed stages that follow
//! extraction:
//! - [`ContextSynthesizer`] turns a question and a fact set into a short
//!   narrative built only from those facts
//! - [`VerifiedResponder`] answers the question from that narrative alone
//!
//! The responder never sees the raw facts or anything else, so an answer can
//! only assert what the narrative already contains.
//!
//! Author: hephaex@gmail.com

use std::sync::Arc;

use medground_core::{GroundingConfig, GroundingError, LlmClient, PromptSpec, Result, Triple};

pub mod llm;

pub use llm::{create_llm_client, OllamaClient, OpenAiClient};

/// Context line used when the fact set is empty
pub const NO_FACTS_CONTEXT: &str = "No facts are available.";

/// Reply the responder must give when the narrative does not cover the question
pub const INSUFFICIENT_INFORMATION: &str =
    "I don't have sufficient information in the provided context to answer this question.";

const SYNTHESIZER_SYSTEM: &str = "You are a medical knowledge summarizer. \
You turn a list of structured facts into a short, accurate narrative. \
You never add information that is not in the facts.";

const RESPONDER_SYSTEM: &str = "You are a careful medical expert answering clinical questions. \
You answer strictly from the context you are given and never from your own knowledge. \
When the context does not contain the answer you say so plainly.";

// ============================================================================
// Context Synthesizer
// ============================================================================

/// Builds a narrative from a fact set
pub struct ContextSynthesizer {
    llm_client: Arc<dyn LlmClient>,
    max_context_length: usize,
}

impl ContextSynthesizer {
    /// Create a new synthesizer
    pub fn new(llm_client: Arc<dyn LlmClient>) -> Self {
        Self {
            llm_client,
            max_context_length: GroundingConfig::default().max_context_length,
        }
    }

    /// Create from config
    pub fn from_config(llm_client: Arc<dyn LlmClient>, config: &GroundingConfig) -> Self {
        Self::new(llm_client).with_max_context_length(config.max_context_length)
    }

    /// Limit the rendered fact context (characters)
    pub fn with_max_context_length(mut self, max_context_length: usize) -> Self {
        self.max_context_length = max_context_length;
        self
    }

    /// Build the oracle request for `query` over `facts`
    pub fn build_request(&self, query: &str, facts: &[Triple]) -> PromptSpec {
        let builder = PromptBuilder::new()
            .system(SYNTHESIZER_SYSTEM)
            .question(query);

        if facts.is_empty() {
            return builder
                .add_context(NO_FACTS_CONTEXT)
                .add_instruction("No facts are available for this question.")
                .add_instruction(
                    "Write one sentence stating that no relevant facts were found in the knowledge base.",
                )
                .add_instruction(
                    "Do not state any medical fact, diagnosis, treatment, or trial from general knowledge.",
                )
                .build();
        }

        builder
            .add_context(self.render_facts(facts))
            .add_instruction("Use only the facts listed in the context.")
            .add_instruction("Write one short, coherent paragraph relevant to the question.")
            .add_instruction(
                "Where the facts do not address the question, say so explicitly instead of guessing.",
            )
            .add_instruction(
                "Do not add entities, relationships, numbers, or trial identifiers that are not in the facts.",
            )
            .build()
    }

    /// Numbered fact lines, truncated to the configured context length
    fn render_facts(&self, facts: &[Triple]) -> String {
        let mut rendered = String::new();
        let mut rendered_chars = 0;
        let mut included = 0;

        for (i, fact) in facts.iter().enumerate() {
            let line = format!("[{}] {}\n", i + 1, fact);
            let line_chars = line.chars().count();
            if included > 0 && rendered_chars + line_chars > self.max_context_length {
                break;
            }
            rendered.push_str(&line);
            rendered_chars += line_chars;
            included += 1;
        }

        if included < facts.len() {
            tracing::warn!(
                "Fact context truncated: {} of {} facts included",
                included,
                facts.len()
            );
        }

        rendered.trim_end().to_string()
    }

    /// Synthesize a narrative for `query` from `facts` only
    pub async fn synthesize(&self, query: &str, facts: &[Triple]) -> Result<String> {
        tracing::info!("Synthesizing narrative from {} facts", facts.len());

        let request = self.build_request(query, facts);
        tracing::debug!("Synthesis prompt length: {} chars", request.prompt.len());

        let narrative = self.llm_client.generate(&request).await?;
        let narrative = non_empty_completion(narrative, "synthesis")?;
        tracing::info!("Narrative received: {} chars", narrative.len());

        Ok(narrative)
    }
}

// ============================================================================
// Verified Responder
// ============================================================================

/// Answers a question from a narrative and nothing else
pub struct VerifiedResponder {
    llm_client: Arc<dyn LlmClient>,
}

impl VerifiedResponder {
    /// Create a new responder
    pub fn new(llm_client: Arc<dyn LlmClient>) -> Self {
        Self { llm_client }
    }

    /// Build the oracle request for `query` grounded on `narrative`
    pub fn build_request(&self, query: &str, narrative: &str) -> PromptSpec {
        PromptBuilder::new()
            .system(RESPONDER_SYSTEM)
            .add_context(narrative)
            .question(query)
            .add_instruction("Answer strictly from the context above.")
            .add_instruction(format!(
                "If the context does not address the question, reply exactly: \"{INSUFFICIENT_INFORMATION}\""
            ))
            .add_instruction("Copy clinical-trial identifiers (e.g. NCT01778491) verbatim.")
            .add_instruction("Do not give personal medical advice beyond what the context states.")
            .build()
    }

    /// Generate the final answer
    pub async fn respond(&self, query: &str, narrative: &str) -> Result<String> {
        tracing::info!("Generating verified answer");

        let request = self.build_request(query, narrative);
        let answer = self.llm_client.generate(&request).await?;
        let answer = non_empty_completion(answer, "generation")?;
        tracing::info!("Answer received: {} chars", answer.len());

        Ok(answer)
    }
}

/// A blank completion is a failed call, not an answer
fn non_empty_completion(text: String, stage: &str) -> Result<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(GroundingError::OracleUnavailable(format!(
            "empty completion during {stage}"
        )));
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// Prompt Builder
// ============================================================================

/// Builder for constructing grounded prompts
pub struct PromptBuilder {
    system_instruction: String,
    context_sections: Vec<String>,
    question: String,
    instructions: Vec<String>,
}

impl PromptBuilder {
    /// Create a new prompt builder
    pub fn new() -> Self {
        Self {
            system_instruction: String::new(),
            context_sections: Vec::new(),
            question: String::new(),
            instructions: Vec::new(),
        }
    }

    /// Set system instruction
    pub fn system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = instruction.into();
        self
    }

    /// Add a context section
    pub fn add_context(mut self, context: impl Into<String>) -> Self {
        self.context_sections.push(context.into());
        self
    }

    /// Set the question
    pub fn question(mut self, q: impl Into<String>) -> Self {
        self.question = q.into();
        self
    }

    /// Add an instruction
    pub fn add_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instructions.push(instruction.into());
        self
    }

    /// Build the final request
    pub fn build(self) -> PromptSpec {
        let mut prompt = String::new();

        if !self.context_sections.is_empty() {
            prompt.push_str("<context>\n");
            for section in &self.context_sections {
                prompt.push_str(section);
                prompt.push_str("\n\n");
            }
            prompt.push_str("</context>\n\n");
        }

        if !self.question.is_empty() {
            prompt.push_str("<question>\n");
            prompt.push_str(&self.question);
            prompt.push_str("\n</question>\n\n");
        }

        if !self.instructions.is_empty() {
            prompt.push_str("<instructions>\n");
            for (i, inst) in self.instructions.iter().enumerate() {
                prompt.push_str(&format!("{}. {}\n", i + 1, inst));
            }
            prompt.push_str("</instructions>\n");
        }

        let spec = PromptSpec::new(prompt);
        if self.system_instruction.is_empty() {
            spec
        } else {
            spec.with_system(self.system_instruction)
        }
    }
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Tests
// ============================================================================
