//! Parsing of the supervisor model's free-form reply.

use std::fmt;

use serde_json::{Map, Value};

use crate::research::AgentKind;
use crate::utils::json_extraction::{try_extract_json_object, JsonExtractionResult};

/// A decision successfully read from model output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDecision {
    pub next_agent: AgentKind,
    pub reason: String,
    pub instructions: String,
    pub should_continue: bool,
}

/// Why model output could not be read as a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseFailure {
    /// No JSON object in the reply.
    NoJson,
    /// A JSON object was started but is malformed or truncated.
    InvalidJson(String),
    /// The reply is valid JSON but not an object.
    NotAnObject,
    /// `nextAgent` is absent, null or blank.
    MissingNextAgent,
    /// `nextAgent` is not one of the six agent tokens.
    InvalidNextAgent(String),
}

impl fmt::Display for ParseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseFailure::NoJson => write!(f, "no JSON object in response"),
            ParseFailure::InvalidJson(detail) => write!(f, "invalid JSON: {}", detail),
            ParseFailure::NotAnObject => write!(f, "response JSON is not an object"),
            ParseFailure::MissingNextAgent => write!(f, "nextAgent is missing"),
            ParseFailure::InvalidNextAgent(value) => {
                write!(f, "nextAgent '{}' is not a known agent", value)
            }
        }
    }
}

/// Outcome of parsing a supervisor reply.
#[derive(Debug, Clone, PartialEq)]
pub enum DecisionParse {
    Parsed(ParsedDecision),
    Failure(ParseFailure),
}

/// JSON truthiness: `null`, `false`, `0`, `0.0` and `""` are falsy; every
/// other value is truthy, including the string `"false"`, `[]` and `{}`.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn lookup<'a>(object: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    object.get(camel).or_else(|| object.get(snake))
}

fn text_field(object: &Map<String, Value>, camel: &str, snake: &str) -> String {
    match lookup(object, camel, snake) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn locate_object(text: &str) -> Result<Map<String, Value>, ParseFailure> {
    // A reply that is entirely JSON is judged as-is, so `[...]` or a bare
    // string is reported as not-an-object instead of being searched.
    if let Ok(value) = serde_json::from_str::<Value>(text.trim()) {
        return match value {
            Value::Object(object) => Ok(object),
            _ => Err(ParseFailure::NotAnObject),
        };
    }

    match try_extract_json_object(text) {
        JsonExtractionResult::Success(json) => match serde_json::from_str::<Value>(&json) {
            Ok(Value::Object(object)) => Ok(object),
            Ok(_) => Err(ParseFailure::NotAnObject),
            Err(e) => Err(ParseFailure::InvalidJson(e.to_string())),
        },
        JsonExtractionResult::Truncated {
            unclosed_braces, ..
        } => Err(ParseFailure::InvalidJson(format!(
            "truncated with {} unclosed braces",
            unclosed_braces
        ))),
        JsonExtractionResult::NotFound => Err(ParseFailure::NoJson),
    }
}

/// Parses a supervisor reply, tolerating prose and code fences around the
/// JSON object. Accepts both `nextAgent` and `next_agent` spellings.
pub fn parse_decision(text: &str) -> DecisionParse {
    let object = match locate_object(text) {
        Ok(object) => object,
        Err(failure) => return DecisionParse::Failure(failure),
    };

    let next_agent = match lookup(&object, "nextAgent", "next_agent") {
        None | Some(Value::Null) => return DecisionParse::Failure(ParseFailure::MissingNextAgent),
        Some(Value::String(s)) if s.trim().is_empty() => {
            return DecisionParse::Failure(ParseFailure::MissingNextAgent)
        }
        Some(Value::String(s)) => match s.parse::<AgentKind>() {
            Ok(agent) => agent,
            Err(_) => return DecisionParse::Failure(ParseFailure::InvalidNextAgent(s.clone())),
        },
        Some(other) => {
            return DecisionParse::Failure(ParseFailure::InvalidNextAgent(other.to_string()))
        }
    };

    let should_continue = match lookup(&object, "shouldContinue", "should_continue") {
        Some(value) => is_truthy(value),
        None => next_agent != AgentKind::Done,
    };

    DecisionParse::Parsed(ParsedDecision {
        next_agent,
        reason: text_field(&object, "reason", "reason"),
        instructions: text_field(&object, "instructions", "instructions"),
        should_continue,
    })
}
