//! MedGround Core - Vocabulary, triples, and shared types
//!
//! This crate defines the core abstractions used throughout MedGround:
//! - The closed medical vocabulary (entity and relation types)
//! - Validated subject-predicate-object triples and the default fact set
//! - Chat transcript turns
//! - The oracle (LLM) boundary trait and prompt specification
//! - Common error types
//! - Configuration management
//! - Clinical-trial identifier formatting

pub mod config;
pub mod trial;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{AppConfig, ConfigError, GroundingConfig, LlmConfig, LlmProvider, LoggingConfig};
pub use trial::{AnnotatedToken, TrialFormatter};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for grounding operations
#[derive(Error, Debug)]
pub enum GroundingError {
    #[error("Oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Malformed extraction output: {0}")]
    MalformedExtractionOutput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Vocabulary(#[from] VocabularyError),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ConfigError> for GroundingError {
    fn from(err: ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GroundingError>;

/// A value fell outside the closed vocabulary or a required field was empty
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VocabularyError {
    #[error("Unknown entity type: {0:?}")]
    UnknownEntityType(String),

    #[error("Unknown relation type: {0:?}")]
    UnknownRelationType(String),

    #[error("Field `{0}` must not be empty")]
    EmptyField(&'static str),
}

// ============================================================================
// Vocabulary
// ============================================================================

/// Medical entity types an extracted fact may refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum EntityType {
    #[serde(rename = "disease")]
    Disease,
    #[serde(rename = "symptom")]
    Symptom,
    #[serde(rename = "treatment")]
    Treatment,
    #[serde(rename = "risk_factor")]
    RiskFactor,
    #[serde(rename = "test/diagnostic")]
    TestDiagnostic,
    #[serde(rename = "gene")]
    Gene,
    #[serde(rename = "biomarker")]
    Biomarker,
    #[serde(rename = "complication")]
    Complication,
    #[serde(rename = "prognosis")]
    Prognosis,
    #[serde(rename = "comorbidity")]
    Comorbidity,
    #[serde(rename = "progression")]
    Progression,
    #[serde(rename = "body_part")]
    BodyPart,
}

impl EntityType {
    /// Every entity type, in vocabulary order
    pub const ALL: [EntityType; 12] = [
        Self::Disease,
        Self::Symptom,
        Self::Treatment,
        Self::RiskFactor,
        Self::TestDiagnostic,
        Self::Gene,
        Self::Biomarker,
        Self::Complication,
        Self::Prognosis,
        Self::Comorbidity,
        Self::Progression,
        Self::BodyPart,
    ];

    /// Wire name of the entity type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disease => "disease",
            Self::Symptom => "symptom",
            Self::Treatment => "treatment",
            Self::RiskFactor => "risk_factor",
            Self::TestDiagnostic => "test/diagnostic",
            Self::Gene => "gene",
            Self::Biomarker => "biomarker",
            Self::Complication => "complication",
            Self::Prognosis => "prognosis",
            Self::Comorbidity => "comorbidity",
            Self::Progression => "progression",
            Self::BodyPart => "body_part",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = VocabularyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| VocabularyError::UnknownEntityType(s.to_string()))
    }
}

impl TryFrom<String> for EntityType {
    type Error = VocabularyError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

/// Relation types linking two medical entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum RelationType {
    Cause,
    Treat,
    Present,
    Diagnose,
    Aggravate,
    Prevent,
    Improve,
    Affect,
}

impl RelationType {
    /// Every relation type, in vocabulary order
    pub const ALL: [RelationType; 8] = [
        Self::Cause,
        Self::Treat,
        Self::Present,
        Self::Diagnose,
        Self::Aggravate,
        Self::Prevent,
        Self::Improve,
        Self::Affect,
    ];

    /// Wire name of the relation type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cause => "cause",
            Self::Treat => "treat",
            Self::Present => "present",
            Self::Diagnose => "diagnose",
            Self::Aggravate => "aggravate",
            Self::Prevent => "prevent",
            Self::Improve => "improve",
            Self::Affect => "affect",
        }
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelationType {
    type Err = VocabularyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| VocabularyError::UnknownRelationType(s.to_string()))
    }
}

impl TryFrom<String> for RelationType {
    type Error = VocabularyError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

// ============================================================================
// Knowledge Triples
// ============================================================================

/// A typed subject-predicate-object fact
///
/// A `Triple` only exists in a valid state: both endpoints are non-empty and
/// every type belongs to the closed vocabulary. Deserialization goes through
/// the same checks as [`Triple::new`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TripleFields")]
pub struct Triple {
    subject: String,
    subject_type: EntityType,
    predicate: RelationType,
    object: String,
    object_type: EntityType,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<String>,
}

impl Triple {
    /// Create a new triple, rejecting empty endpoints
    pub fn new(
        subject: impl Into<String>,
        subject_type: EntityType,
        predicate: RelationType,
        object: impl Into<String>,
        object_type: EntityType,
    ) -> std::result::Result<Self, VocabularyError> {
        let subject = non_empty(subject.into(), "subject")?;
        let object = non_empty(object.into(), "object")?;

        Ok(Self {
            subject,
            subject_type,
            predicate,
            object,
            object_type,
            source: None,
        })
    }

    /// Attach the text the fact was extracted from; blank sources are ignored
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        let source = source.into();
        let trimmed = source.trim();
        self.source = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn subject_type(&self) -> EntityType {
        self.subject_type
    }

    pub fn predicate(&self) -> RelationType {
        self.predicate
    }

    pub fn object(&self) -> &str {
        &self.object
    }

    pub fn object_type(&self) -> EntityType {
        self.object_type
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }
}

impl std::fmt::Display for Triple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} ({}) —{}→ {} ({})",
            self.subject, self.subject_type, self.predicate, self.object, self.object_type
        )
    }
}

/// Unvalidated triple shape as it appears on the wire
#[derive(Debug, Deserialize)]
struct TripleFields {
    subject: String,
    subject_type: EntityType,
    predicate: RelationType,
    object: String,
    object_type: EntityType,
    #[serde(default)]
    source: Option<String>,
}

impl TryFrom<TripleFields> for Triple {
    type Error = VocabularyError;

    fn try_from(fields: TripleFields) -> std::result::Result<Self, Self::Error> {
        let triple = Triple::new(
            fields.subject,
            fields.subject_type,
            fields.predicate,
            fields.object,
            fields.object_type,
        )?;

        Ok(match fields.source {
            Some(source) => triple.with_source(source),
            None => triple,
        })
    }
}

fn non_empty(value: String, field: &'static str) -> std::result::Result<String, VocabularyError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(VocabularyError::EmptyField(field));
    }
    Ok(trimmed.to_string())
}

/// Facts used to ground queries before anything has been extracted
const DEFAULT_FACTS: [(&str, EntityType, RelationType, &str, EntityType); 3] = [
    (
        "Age-related Macular Degeneration",
        EntityType::Disease,
        RelationType::Cause,
        "Central Vision Impairment",
        EntityType::Symptom,
    ),
    (
        "Smoking",
        EntityType::RiskFactor,
        RelationType::Aggravate,
        "AMD Progression",
        EntityType::Progression,
    ),
    (
        "NCT01778491",
        EntityType::TestDiagnostic,
        RelationType::Diagnose,
        "AMD Subtypes",
        EntityType::Disease,
    ),
];

/// The zero-state knowledge base
pub fn default_facts() -> Vec<Triple> {
    DEFAULT_FACTS
        .iter()
        .map(
            |&(subject, subject_type, predicate, object, object_type)| Triple {
                subject: subject.to_string(),
                subject_type,
                predicate,
                object: object.to_string(),
                object_type,
                source: None,
            },
        )
        .collect()
}

// ============================================================================
// Chat Transcript
// ============================================================================

/// Author of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the chat transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    id: Uuid,
    role: Role,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    grounding_context: Option<String>,
    created_at: DateTime<Utc>,
}

impl ChatTurn {
    /// A user question
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content.into(), None)
    }

    /// An assistant answer, optionally with the narrative it was grounded on
    pub fn assistant(content: impl Into<String>, grounding_context: Option<String>) -> Self {
        Self::new(Role::Assistant, content.into(), grounding_context)
    }

    fn new(role: Role, content: String, grounding_context: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content,
            grounding_context,
            created_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn grounding_context(&self) -> Option<&str> {
        self.grounding_context.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Tokens for display; only assistant content gets trial links
    pub fn render(&self, formatter: &TrialFormatter) -> Vec<AnnotatedToken> {
        match self.role {
            Role::Assistant => formatter.format(&self.content),
            Role::User if self.content.is_empty() => Vec::new(),
            Role::User => vec![AnnotatedToken::Text(self.content.clone())],
        }
    }
}

// ============================================================================
// Oracle Boundary
// ============================================================================

/// Output shape requested from the oracle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// Structured output; the oracle is asked for JSON but not trusted to comply
    Json,
}

/// A single request to the oracle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptSpec {
    /// System instruction / persona
    pub system: Option<String>,

    /// User prompt
    pub prompt: String,

    /// Requested output format
    pub format: ResponseFormat,

    /// Sampling temperature override
    pub temperature: Option<f32>,
}

impl PromptSpec {
    /// Create a plain-text request
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Set the system instruction
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Request structured JSON output
    pub fn json(mut self) -> Self {
        self.format = ResponseFormat::Json;
        self
    }

    /// Override temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Trait for LLM clients (the generative text oracle)
#[async_trait::async_trait]
pub trait LlmClient: Send + Sync {
    /// Generate a completion; transport failures map to `OracleUnavailable`
    async fn generate(&self, request: &PromptSpec) -> Result<String>;

    /// Client name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================
