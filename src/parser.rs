use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Free-text fields are capped at this many characters after tag stripping.
const MAX_TEXT_CHARS: usize = 1000;

const PHASES: [&str; 2] = ["write", "edit"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid JSON data")]
    InvalidJsonData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectMetadata {
    pub title: String,
    pub description: String,
    pub current_tab: String,
    pub instructor_instructions: String,
}

impl Default for ProjectMetadata {
    fn default() -> Self {
        Self {
            title: String::new(),
            description: String::new(),
            current_tab: "plan".to_string(),
            instructor_instructions: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedIdea {
    pub id: String,
    pub content: String,
    pub location: String,
    pub section_id: Option<String>,
    pub ai_generated: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutlineSection {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Opaque nested structure carried through untouched.
    pub bubbles: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseContent {
    /// Phase bodies keep their markup; only the plan/chat text fields are
    /// sanitized.
    pub content: String,
    pub word_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChatMessage {
    pub role: String,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedProject {
    pub metadata: ProjectMetadata,
    pub ideas: Vec<ParsedIdea>,
    pub outline: Vec<ParsedOutlineSection>,
    pub content: BTreeMap<String, PhaseContent>,
    pub chat: Vec<ParsedChatMessage>,
}

/// Reshapes a legacy free-form project document into the normalized record
/// groups. Total over any object input: malformed leaves are defaulted and
/// entries missing an identifying field are dropped, never reported. The only
/// failure is a top-level value that is non-empty and not an object.
pub fn parse(json_data: &Value) -> Result<ParsedProject, ParseError> {
    if is_empty_value(json_data) {
        return Ok(ParsedProject::default());
    }
    let Some(obj) = json_data.as_object() else {
        return Err(ParseError::InvalidJsonData);
    };

    let plan = obj.get("plan").and_then(Value::as_object);

    Ok(ParsedProject {
        metadata: parse_metadata(obj.get("metadata")),
        ideas: parse_ideas(plan.and_then(|p| p.get("ideas"))),
        outline: parse_outline(plan.and_then(|p| p.get("outline"))),
        content: parse_phase_content(obj),
        chat: parse_chat(obj.get("chatHistory")),
    })
}

fn parse_metadata(value: Option<&Value>) -> ProjectMetadata {
    let Some(meta) = value.and_then(Value::as_object) else {
        return ProjectMetadata::default();
    };
    ProjectMetadata {
        title: sanitize_content(meta.get("title")),
        description: sanitize_content(meta.get("description")),
        current_tab: validate_tab(meta.get("currentTab")),
        instructor_instructions: sanitize_content(meta.get("instructorInstructions")),
    }
}

fn parse_ideas(value: Option<&Value>) -> Vec<ParsedIdea> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items.iter().filter_map(parse_idea).collect()
}

fn parse_idea(value: &Value) -> Option<ParsedIdea> {
    let idea = value.as_object()?;
    // An idea without an id or content is unusable downstream; drop it.
    let id = identifying_string(idea.get("id"))?;
    if field_missing(idea.get("content")) {
        return None;
    }
    Some(ParsedIdea {
        id,
        content: sanitize_content(idea.get("content")),
        location: validate_location(idea.get("location")),
        section_id: identifying_string(idea.get("sectionId")),
        ai_generated: idea
            .get("aiGenerated")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

fn parse_outline(value: Option<&Value>) -> Vec<ParsedOutlineSection> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items.iter().filter_map(parse_outline_section).collect()
}

fn parse_outline_section(value: &Value) -> Option<ParsedOutlineSection> {
    let section = value.as_object()?;
    let id = identifying_string(section.get("id"))?;
    Some(ParsedOutlineSection {
        id,
        title: sanitize_content(section.get("title")),
        description: sanitize_content(section.get("description")),
        bubbles: section.get("bubbles").cloned().unwrap_or(Value::Null),
    })
}

fn parse_phase_content(obj: &Map<String, Value>) -> BTreeMap<String, PhaseContent> {
    let mut out = BTreeMap::new();
    for phase in PHASES {
        let Some(section) = obj.get(phase).and_then(Value::as_object) else {
            continue;
        };
        let Some(body) = section.get("content").and_then(Value::as_str) else {
            continue;
        };
        if body.is_empty() {
            continue;
        }
        let word_count = section
            .get("wordCount")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0);
        out.insert(
            phase.to_string(),
            PhaseContent {
                content: body.to_string(),
                word_count,
            },
        );
    }
    out
}

fn parse_chat(value: Option<&Value>) -> Vec<ParsedChatMessage> {
    let Some(items) = value.and_then(Value::as_array) else {
        return Vec::new();
    };
    items.iter().filter_map(parse_chat_message).collect()
}

fn parse_chat_message(value: &Value) -> Option<ParsedChatMessage> {
    let msg = value.as_object()?;
    // Missing role or content drops the message; a role that is present but
    // unrecognized is coerced instead. Keep that distinction as-is.
    if field_missing(msg.get("role")) || field_missing(msg.get("content")) {
        return None;
    }
    let timestamp = match msg.get("timestamp").and_then(Value::as_str) {
        Some(ts) if !ts.is_empty() => ts.to_string(),
        _ => Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    Some(ParsedChatMessage {
        role: validate_role(msg.get("role")),
        content: sanitize_content(msg.get("content")),
        timestamp,
    })
}

/// Strips markup tags, caps length, and trims surrounding whitespace.
/// Anything that is not a string comes back as the empty string.
fn sanitize_content(value: Option<&Value>) -> String {
    let Some(text) = value.and_then(Value::as_str) else {
        return String::new();
    };
    let stripped = strip_tags(text);
    let capped: String = stripped.chars().take(MAX_TEXT_CHARS).collect();
    capped.trim().to_string()
}

fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for ch in text.chars() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    // An unterminated '<' swallows the rest of the string, like the legacy
    // sanitizer did.
    out
}

fn validate_tab(value: Option<&Value>) -> String {
    pick_enum(value, &["plan", "write", "edit"], "plan")
}

fn validate_location(value: Option<&Value>) -> String {
    pick_enum(value, &["brainstorm", "outline"], "brainstorm")
}

fn validate_role(value: Option<&Value>) -> String {
    pick_enum(value, &["user", "assistant"], "user")
}

fn pick_enum(value: Option<&Value>, allowed: &[&str], default: &str) -> String {
    match value.and_then(Value::as_str) {
        Some(v) if allowed.contains(&v) => v.to_string(),
        _ => default.to_string(),
    }
}

/// The legacy engine's loose emptiness test: absent, null, false, 0, "" and
/// [] all count as empty.
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(_) => false,
    }
}

fn field_missing(value: Option<&Value>) -> bool {
    value.map_or(true, is_empty_value)
}

/// Identifying fields accept strings or numbers; numbers are stringified.
fn identifying_string(value: Option<&Value>) -> Option<String> {
    let v = value?;
    if is_empty_value(v) {
        return None;
    }
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
