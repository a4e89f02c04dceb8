//! Session orchestrator integration tests
//!
//! All oracle traffic goes through `ScriptedLlm`; `GatedLlm` additionally
//! holds every call until the test releases it, which lets a test observe
//! the session while a request is in flight.
//!
//! Author: hephaex@gmail.com

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use medground_core::testing::ScriptedLlm;
use medground_core::{
    EntityType, GroundingError, LlmClient, PromptSpec, RelationType, Result, Role, Triple,
};
use medground_session::{
    AssistantPhase, ExtractionPhase, ExtractionSubmission, QueryOutcome, Session,
    SubmitRejection, FALLBACK_MESSAGE,
};
use tokio::sync::Semaphore;

const SMOKING_JSON: &str = r#"[{"subject": "Smoking", "subject_type": "risk_factor", "predicate": "aggravate", "object": "AMD progression", "object_type": "progression"}]"#;

const NARRATIVE: &str = "Smoking aggravates AMD progression. The available facts do not directly describe vision loss.";

const ANSWER: &str = "Smoking aggravates the progression of AMD; the facts do not state a direct link to vision loss.";

/// Oracle whose calls block until permits are released
struct GatedLlm {
    inner: ScriptedLlm,
    gate: Semaphore,
    entered: AtomicUsize,
}

impl GatedLlm {
    fn new(inner: ScriptedLlm) -> Self {
        Self {
            inner,
            gate: Semaphore::new(0),
            entered: AtomicUsize::new(0),
        }
    }

    fn release(&self, calls: usize) {
        self.gate.add_permits(calls);
    }

    fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    async fn wait_until_entered(&self, calls: usize) {
        while self.entered() < calls {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait::async_trait]
impl LlmClient for GatedLlm {
    async fn generate(&self, request: &PromptSpec) -> Result<String> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|e| GroundingError::OracleUnavailable(e.to_string()))?;
        permit.forget();
        self.inner.generate(request).await
    }

    fn name(&self) -> &str {
        "gated"
    }
}

fn smoking_triple() -> Triple {
    Triple::new(
        "Smoking",
        EntityType::RiskFactor,
        RelationType::Aggravate,
        "AMD progression",
        EntityType::Progression,
    )
    .unwrap()
}

// =============================================================================
// Extraction lane
// =============================================================================

#[tokio::test]
async fn test_extraction_replaces_held_facts() {
    let llm = Arc::new(ScriptedLlm::new().reply(SMOKING_JSON));
    let session = Session::new(llm.clone());

    let result = session
        .submit_extraction("Smoking aggravates AMD progression.")
        .await
        .unwrap();

    assert_eq!(result, ExtractionSubmission::Replaced { count: 1 });
    assert_eq!(session.facts(), vec![smoking_triple()]);
    assert_eq!(session.extraction_phase(), ExtractionPhase::Idle);
}

#[tokio::test]
async fn test_extraction_replaces_rather_than_merges() {
    let second = r#"[{"subject": "Anti-VEGF", "subject_type": "treatment", "predicate": "treat", "object": "Wet AMD", "object_type": "disease"}]"#;
    let llm = Arc::new(ScriptedLlm::new().reply(SMOKING_JSON).reply(second));
    let session = Session::new(llm);

    session.submit_extraction("first text").await.unwrap();
    session.submit_extraction("second text").await.unwrap();

    let facts = session.facts();
    assert_eq!(facts.len(), 1);
    assert_eq!(facts[0].subject(), "Anti-VEGF");
}

#[tokio::test]
async fn test_malformed_extraction_keeps_previous_facts() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .reply(SMOKING_JSON)
            .reply("I'm not able to produce JSON today."),
    );
    let session = Session::new(llm);

    session.submit_extraction("first text").await.unwrap();
    let result = session.submit_extraction("second text").await;

    assert!(matches!(
        result,
        Err(GroundingError::MalformedExtractionOutput(_))
    ));
    assert_eq!(session.facts(), vec![smoking_triple()]);
    assert!(!session.is_extracting());
}

#[tokio::test]
async fn test_extraction_oracle_failure_returns_to_idle() {
    let llm = Arc::new(ScriptedLlm::new().unavailable("connection refused"));
    let session = Session::new(llm);

    let result = session.submit_extraction("text").await;

    assert!(matches!(result, Err(GroundingError::OracleUnavailable(_))));
    assert!(session.facts().is_empty());
    assert_eq!(session.extraction_phase(), ExtractionPhase::Idle);
}

#[tokio::test]
async fn test_empty_extraction_text_is_not_sent() {
    let llm = Arc::new(ScriptedLlm::new());
    let session = Session::new(llm.clone());

    let result = session.submit_extraction("   \n").await.unwrap();

    assert_eq!(
        result,
        ExtractionSubmission::Rejected(SubmitRejection::EmptyInput)
    );
    assert_eq!(llm.call_count(), 0);
}

// =============================================================================
// Assistant lane
// =============================================================================

#[tokio::test]
async fn test_query_grounds_on_default_facts_before_extraction() {
    let llm = Arc::new(ScriptedLlm::new().reply(NARRATIVE).reply(ANSWER));
    let session = Session::new(llm.clone());

    let outcome = session.submit_query("What is NCT01778491 used for?").await;
    assert!(matches!(outcome, QueryOutcome::Answered(_)));

    let synthesis_prompt = &llm.requests()[0].prompt;
    assert!(synthesis_prompt.contains("Age-related Macular Degeneration"));
    assert!(synthesis_prompt.contains("Smoking (risk_factor) —aggravate→ AMD Progression"));
    assert!(synthesis_prompt.contains("NCT01778491 (test/diagnostic) —diagnose→ AMD Subtypes"));
}

#[tokio::test]
async fn test_end_to_end_smoking_scenario() {
    let llm = Arc::new(
        ScriptedLlm::new()
            .reply(SMOKING_JSON)
            .reply(NARRATIVE)
            .reply(ANSWER)
            .reply(NARRATIVE)
            .unavailable("rate limited"),
    );
    let session = Session::new(llm.clone());

    session
        .submit_extraction("Smoking aggravates AMD progression.")
        .await
        .unwrap();
    assert_eq!(session.facts(), vec![smoking_triple()]);

    // Grounded answer
    let outcome = session.submit_query("Does smoking affect vision loss?").await;
    let QueryOutcome::Answered(turn) = outcome else {
        panic!("expected an answer, got {outcome:?}");
    };
    assert_eq!(turn.content(), ANSWER);
    assert_eq!(turn.grounding_context(), Some(NARRATIVE));

    let requests = llm.requests();
    let synthesis = &requests[1].prompt;
    assert!(synthesis.contains("Smoking (risk_factor) —aggravate→ AMD progression (progression)"));
    assert!(!synthesis.contains("Age-related Macular Degeneration"));

    // The responder only sees the narrative
    let generation = &requests[2].prompt;
    assert!(generation.contains(NARRATIVE));
    assert!(!generation.contains("risk_factor"));

    // Generation fails: exactly one fallback turn, no grounding context
    let outcome = session.submit_query("Does smoking affect vision loss?").await;
    let QueryOutcome::FellBack(turn) = outcome else {
        panic!("expected the fallback, got {outcome:?}");
    };
    assert_eq!(turn.content(), FALLBACK_MESSAGE);
    assert_eq!(turn.grounding_context(), None);

    let transcript = session.transcript();
    let roles: Vec<Role> = transcript.iter().map(|t| t.role()).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::User, Role::Assistant]
    );
    assert_eq!(transcript[3].content(), FALLBACK_MESSAGE);
    assert!(session.assistant_phase().is_idle());
}

#[tokio::test]
async fn test_synthesis_failure_skips_generation() {
    let llm = Arc::new(ScriptedLlm::new().unavailable("timeout").reply(ANSWER));
    let session = Session::new(llm.clone());

    let outcome = session.submit_query("Does smoking affect vision loss?").await;

    assert!(matches!(outcome, QueryOutcome::FellBack(_)));
    assert_eq!(llm.call_count(), 1);
    assert_eq!(session.transcript().len(), 2);
}

#[tokio::test]
async fn test_empty_query_has_no_effect() {
    let llm = Arc::new(ScriptedLlm::new());
    let session = Session::new(llm.clone());

    let outcome = session.submit_query("  ").await;

    assert_eq!(outcome, QueryOutcome::Rejected(SubmitRejection::EmptyInput));
    assert!(session.transcript().is_empty());
    assert_eq!(llm.call_count(), 0);
}

#[tokio::test]
async fn test_second_query_rejected_while_in_flight() {
    let llm = Arc::new(GatedLlm::new(ScriptedLlm::new().reply(NARRATIVE).reply(ANSWER)));
    let session = Arc::new(Session::new(llm.clone()));

    let first = tokio::spawn({
        let session = session.clone();
        async move { session.submit_query("Does smoking affect vision loss?").await }
    });

    llm.wait_until_entered(1).await;
    assert_eq!(session.assistant_phase(), AssistantPhase::Synthesizing);
    assert!(session.is_answering());

    let second = session.submit_query("Is AMD hereditary?").await;
    assert_eq!(second, QueryOutcome::Rejected(SubmitRejection::Busy));
    assert_eq!(session.transcript().len(), 1);
    assert_eq!(llm.entered(), 1);

    // Let synthesis finish; the lane stays busy while generating
    llm.release(1);
    llm.wait_until_entered(2).await;
    assert_eq!(session.assistant_phase(), AssistantPhase::Generating);

    let third = session.submit_query("Can diet slow AMD?").await;
    assert_eq!(third, QueryOutcome::Rejected(SubmitRejection::Busy));
    assert_eq!(session.transcript().len(), 1);
    assert_eq!(llm.entered(), 2);

    llm.release(1);
    let outcome = first.await.unwrap();

    assert!(matches!(outcome, QueryOutcome::Answered(_)));
    assert_eq!(llm.entered(), 2);
    let transcript = session.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].content(), "Does smoking affect vision loss?");
    assert!(!session.is_answering());
}

#[tokio::test]
async fn test_cancelled_query_still_yields_one_assistant_turn() {
    let llm = Arc::new(GatedLlm::new(ScriptedLlm::new().reply(NARRATIVE)));
    let session = Session::new(llm.clone());

    let result = tokio::time::timeout(
        Duration::from_millis(20),
        session.submit_query("Does smoking affect vision loss?"),
    )
    .await;
    assert!(result.is_err());

    let transcript = session.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[1].content(), FALLBACK_MESSAGE);
    assert_eq!(session.assistant_phase(), AssistantPhase::Idle);
}

// =============================================================================
// Lane independence
// =============================================================================

#[tokio::test]
async fn test_lanes_run_concurrently() {
    let llm = Arc::new(GatedLlm::new(
        ScriptedLlm::new()
            .reply(SMOKING_JSON)
            .reply(NARRATIVE)
            .reply(ANSWER),
    ));
    let session = Arc::new(Session::new(llm.clone()));

    let extraction = tokio::spawn({
        let session = session.clone();
        async move {
            session
                .submit_extraction("Smoking aggravates AMD progression.")
                .await
        }
    });
    llm.wait_until_entered(1).await;
    assert!(session.is_extracting());

    // A second extraction is rejected while the first is in flight
    let busy = session.submit_extraction("more text").await.unwrap();
    assert_eq!(busy, ExtractionSubmission::Rejected(SubmitRejection::Busy));

    // The assistant lane is unaffected
    let query = tokio::spawn({
        let session = session.clone();
        async move { session.submit_query("Does smoking affect vision loss?").await }
    });
    llm.wait_until_entered(2).await;
    assert!(session.is_answering());
    assert_eq!(session.transcript().len(), 1);

    llm.release(1);
    let replaced = extraction.await.unwrap().unwrap();
    assert_eq!(replaced, ExtractionSubmission::Replaced { count: 1 });
    assert!(!session.is_extracting());

    llm.release(2);
    let outcome = query.await.unwrap();
    assert!(matches!(outcome, QueryOutcome::Answered(_)));

    // The in-flight query was grounded on the facts held when it started
    let requests = llm.inner.requests();
    assert!(requests[1]
        .prompt
        .contains("Age-related Macular Degeneration"));
}
