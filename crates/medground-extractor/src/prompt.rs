//! Prompt construction for triple extraction

use medground_core::{EntityType, RelationType};

/// Persona for the extraction request
pub const EXTRACTION_SYSTEM_PROMPT: &str = include_str!("prompts/extraction_system.txt");

/// Build the extraction prompt, spelling out the exact vocabulary
pub fn build_extraction_prompt(source_text: &str) -> String {
    let entity_types: Vec<&str> = EntityType::ALL.iter().map(|t| t.as_str()).collect();
    let relation_types: Vec<&str> = RelationType::ALL.iter().map(|r| r.as_str()).collect();

    format!(
        r#"Identify the causal and medical relationships stated in the text below.

SCHEMA:
{{
  "triples": [
    {{"subject": "...", "subject_type": "...", "predicate": "...", "object": "...", "object_type": "...", "source": "sentence the fact comes from"}}
  ]
}}

RULES:
- subject_type and object_type must be exactly one of: {entities}
- predicate must be exactly one of: {relations}
- subject and object are short noun phrases copied from the text
- Omit any relationship that does not fit the vocabulary
- Output ONLY the JSON object; output {{"triples": []}} if there are no relationships

TEXT:
{source_text}

JSON OUTPUT:"#,
        entities = entity_types.join(", "),
        relations = relation_types.join(", "),
    )
}
