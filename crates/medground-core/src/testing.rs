//! Test utilities: a scripted oracle that replays canned responses
//!
//! Enabled for downstream crates through the `test-utils` feature.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::{GroundingError, LlmClient, PromptSpec, Result};

/// One scripted oracle outcome
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Unavailable(String),
}

/// Oracle that answers requests from a fixed script and records every request
#[derive(Debug, Default)]
pub struct ScriptedLlm {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<PromptSpec>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a successful completion
    pub fn reply(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Reply(text.into()));
        self
    }

    /// Queue an `OracleUnavailable` failure
    pub fn unavailable(self, reason: impl Into<String>) -> Self {
        self.push(Scripted::Unavailable(reason.into()));
        self
    }

    pub fn push(&self, outcome: Scripted) {
        self.script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<PromptSpec> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait::async_trait]
impl LlmClient for ScriptedLlm {
    async fn generate(&self, request: &PromptSpec) -> Result<String> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match next {
            Some(Scripted::Reply(text)) => Ok(text),
            Some(Scripted::Unavailable(reason)) => Err(GroundingError::OracleUnavailable(reason)),
            None => Err(GroundingError::OracleUnavailable(
                "script exhausted".to_string(),
            )),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_in_order_and_records() {
        let llm = ScriptedLlm::new().reply("first").unavailable("down");

        let first = tokio_test::block_on(llm.generate(&PromptSpec::new("a"))).unwrap();
        assert_eq!(first, "first");

        let second = tokio_test::block_on(llm.generate(&PromptSpec::new("b")));
        assert!(matches!(second, Err(GroundingError::OracleUnavailable(_))));

        let third = tokio_test::block_on(llm.generate(&PromptSpec::new("c")));
        assert!(third.is_err());

        let prompts: Vec<String> = llm.requests().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["a", "b", "c"]);
    }
}
