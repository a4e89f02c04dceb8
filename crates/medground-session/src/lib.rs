//! MedGround Session - Orchestrates the grounding pipeline for one user
//!
//! A [`Session`] owns two independent lanes:
//! - the extraction lane, which replaces the held fact set from source text
//! - the assistant lane, which runs synthesis then verified generation for a
//!   query and appends to the chat transcript
//!
//! Each lane admits at most one request at a time; a request submitted while
//! its lane is busy is rejected, never queued. Lane state lives behind short
//! synchronous locks that are never held across an oracle call.
//!
//! Author: hephaex@gmail.com

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use medground_core::{default_facts, ChatTurn, GroundingConfig, LlmClient, Result, Triple};
use medground_extractor::StructuredExtractor;
use medground_rag::{ContextSynthesizer, VerifiedResponder};
use serde::Serialize;

pub mod lane;

pub use lane::{AssistantEvent, AssistantPhase, ExtractionEvent, ExtractionPhase};

/// Assistant reply appended when synthesis or generation fails
pub const FALLBACK_MESSAGE: &str =
    "I'm sorry, I couldn't generate an answer right now. Please try again in a moment.";

/// Why a submission was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitRejection {
    /// The text or query was empty after trimming
    EmptyInput,
    /// The lane already has a request in flight
    Busy,
}

/// Result of an accepted or rejected extraction submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSubmission {
    /// The held fact set was replaced with `count` triples
    Replaced { count: usize },
    Rejected(SubmitRejection),
}

/// Result of a query submission
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutcome {
    /// A grounded answer was appended
    Answered(ChatTurn),
    /// A stage failed and the fallback reply was appended
    FellBack(ChatTurn),
    /// Nothing was appended and no oracle call was made
    Rejected(SubmitRejection),
}

impl QueryOutcome {
    /// The assistant turn appended by this submission, if any
    pub fn turn(&self) -> Option<&ChatTurn> {
        match self {
            Self::Answered(turn) | Self::FellBack(turn) => Some(turn),
            Self::Rejected(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct ExtractionLane {
    phase: ExtractionPhase,
    facts: Vec<Triple>,
}

#[derive(Debug, Default)]
struct AssistantLane {
    phase: AssistantPhase,
    transcript: Vec<ChatTurn>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Session
// ============================================================================

/// One interactive grounding session
pub struct Session {
    extractor: StructuredExtractor,
    synthesizer: ContextSynthesizer,
    responder: VerifiedResponder,
    default_facts: Vec<Triple>,
    extraction: Mutex<ExtractionLane>,
    assistant: Mutex<AssistantLane>,
}

impl Session {
    /// Create a session with default grounding settings
    pub fn new(llm_client: Arc<dyn LlmClient>) -> Self {
        Self::with_config(llm_client, &GroundingConfig::default())
    }

    /// Create a session from grounding config
    pub fn with_config(llm_client: Arc<dyn LlmClient>, config: &GroundingConfig) -> Self {
        Self {
            extractor: StructuredExtractor::new(llm_client.clone())
                .with_temperature(config.extraction_temperature),
            synthesizer: ContextSynthesizer::from_config(llm_client.clone(), config),
            responder: VerifiedResponder::new(llm_client),
            default_facts: default_facts(),
            extraction: Mutex::new(ExtractionLane::default()),
            assistant: Mutex::new(AssistantLane::default()),
        }
    }

    // ------------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------------

    /// The chat transcript, oldest first
    pub fn transcript(&self) -> Vec<ChatTurn> {
        lock(&self.assistant).transcript.clone()
    }

    /// The held extraction result (empty until an extraction succeeds)
    pub fn facts(&self) -> Vec<Triple> {
        lock(&self.extraction).facts.clone()
    }

    /// The facts the next query would be grounded on
    pub fn grounding_facts(&self) -> Vec<Triple> {
        let held = self.facts();
        if held.is_empty() {
            self.default_facts.clone()
        } else {
            held
        }
    }

    pub fn extraction_phase(&self) -> ExtractionPhase {
        lock(&self.extraction).phase
    }

    pub fn assistant_phase(&self) -> AssistantPhase {
        lock(&self.assistant).phase
    }

    pub fn is_extracting(&self) -> bool {
        !self.extraction_phase().is_idle()
    }

    pub fn is_answering(&self) -> bool {
        !self.assistant_phase().is_idle()
    }

    // ------------------------------------------------------------------------
    // Extraction lane
    // ------------------------------------------------------------------------

    /// Extract facts from `text` and replace the held fact set
    ///
    /// On failure the held facts are left unchanged and the error is returned
    /// as-is; the lane is idle again either way.
    pub async fn submit_extraction(&self, text: &str) -> Result<ExtractionSubmission> {
        if text.trim().is_empty() {
            tracing::debug!("Extraction rejected: empty text");
            return Ok(ExtractionSubmission::Rejected(SubmitRejection::EmptyInput));
        }

        if !lock(&self.extraction).phase.apply(ExtractionEvent::Submit) {
            tracing::debug!("Extraction rejected: lane busy");
            return Ok(ExtractionSubmission::Rejected(SubmitRejection::Busy));
        }
        let mut in_flight = ExtractionInFlight {
            lane: &self.extraction,
            resolved: false,
        };

        match self.extractor.extract(text).await {
            Ok(triples) => {
                let count = triples.len();
                in_flight.resolve(Some(triples));
                tracing::info!("Held fact set replaced with {} triples", count);
                Ok(ExtractionSubmission::Replaced { count })
            }
            Err(e) => {
                in_flight.resolve(None);
                tracing::warn!("Extraction failed, keeping previous facts: {e}");
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Assistant lane
    // ------------------------------------------------------------------------

    /// Answer `query` from the current fact set
    ///
    /// The user turn is appended before any oracle call. Exactly one
    /// assistant turn follows every accepted query.
    pub async fn submit_query(&self, query: &str) -> QueryOutcome {
        if query.trim().is_empty() {
            tracing::debug!("Query rejected: empty query");
            return QueryOutcome::Rejected(SubmitRejection::EmptyInput);
        }

        {
            let mut lane = lock(&self.assistant);
            if !lane.phase.apply(AssistantEvent::Submit) {
                tracing::debug!("Query rejected: assistant busy ({:?})", lane.phase);
                return QueryOutcome::Rejected(SubmitRejection::Busy);
            }
            lane.transcript.push(ChatTurn::user(query));
        }
        let mut in_flight = AssistantInFlight {
            lane: &self.assistant,
            finished: false,
        };

        let facts = self.grounding_facts();
        tracing::info!("Query accepted, grounding on {} facts", facts.len());

        match self.answer(query, &facts).await {
            Ok((answer, narrative)) => {
                let turn = ChatTurn::assistant(answer, Some(narrative));
                in_flight.finish(AssistantEvent::Answered, turn.clone());
                QueryOutcome::Answered(turn)
            }
            Err(e) => {
                tracing::warn!("Answer generation failed, using fallback: {e}");
                let turn = ChatTurn::assistant(FALLBACK_MESSAGE, None);
                in_flight.finish(AssistantEvent::Failed, turn.clone());
                QueryOutcome::FellBack(turn)
            }
        }
    }

    /// Synthesis then generation; returns (answer, narrative)
    async fn answer(&self, query: &str, facts: &[Triple]) -> Result<(String, String)> {
        let narrative = self.synthesizer.synthesize(query, facts).await?;
        lock(&self.assistant)
            .phase
            .apply(AssistantEvent::Synthesized);

        let answer = self.responder.respond(query, &narrative).await?;
        Ok((answer, narrative))
    }
}

// ============================================================================
// In-flight guards
// ============================================================================

/// Returns the extraction lane to idle even if the request future is dropped
struct ExtractionInFlight<'a> {
    lane: &'a Mutex<ExtractionLane>,
    resolved: bool,
}

impl ExtractionInFlight<'_> {
    /// Go idle, replacing the held facts when `facts` is given
    fn resolve(&mut self, facts: Option<Vec<Triple>>) {
        let mut lane = lock(self.lane);
        lane.phase.apply(ExtractionEvent::Resolved);
        if let Some(facts) = facts {
            lane.facts = facts;
        }
        self.resolved = true;
    }
}

impl Drop for ExtractionInFlight<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.resolve(None);
        }
    }
}

/// Guarantees an accepted query ends with one assistant turn and an idle lane
struct AssistantInFlight<'a> {
    lane: &'a Mutex<AssistantLane>,
    finished: bool,
}

impl AssistantInFlight<'_> {
    fn finish(&mut self, event: AssistantEvent, turn: ChatTurn) {
        let mut lane = lock(self.lane);
        lane.phase.apply(event);
        lane.transcript.push(turn);
        self.finished = true;
    }
}

impl Drop for AssistantInFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("Query cancelled in flight, appending fallback");
            self.finish(
                AssistantEvent::Failed,
                ChatTurn::assistant(FALLBACK_MESSAGE, None),
            );
        }
    }
}
