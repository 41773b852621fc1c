//! Structural validation of raw completion requests.
//!
//! [`validate_and_sanitize_request`] checks an untrusted JSON body and, only
//! if every check passes, sanitizes each message's content. An invalid
//! request is never partially sanitized.

use std::fmt;

use boardwright_llm::types::{Message, ModelRequest, Role};
use serde_json::Value;

use crate::sanitize::sanitize_prompt_input;

pub const MAX_MESSAGES: usize = 100;
pub const MAX_CONTENT_CHARS: usize = 50_000;
pub const MAX_TOKENS_LIMIT: u64 = 4096;
pub const MAX_TEMPERATURE: f64 = 2.0;

/// One failed check, located by a dotted path (`messages.0.content`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Every issue found in a request, reported together as
/// `path: message, path: message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<Issue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// A validated, sanitized completion request. `model` is optional here;
/// the orchestrator fills in its primary model.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionInput {
    pub messages: Vec<Message>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl CompletionInput {
    /// Build the request sent to the orchestrator.
    pub fn into_request(self, default_model: &str) -> ModelRequest {
        let model = self.model.unwrap_or_else(|| default_model.to_owned());
        let mut request = ModelRequest::new(model, self.messages);
        request.max_tokens = self.max_tokens;
        request.temperature = self.temperature;
        request
    }
}

#[derive(Default)]
struct Issues(Vec<Issue>);

impl Issues {
    fn push(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.0.push(Issue {
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate `raw` and return the sanitized request.
pub fn validate_and_sanitize_request(raw: &Value) -> Result<CompletionInput, ValidationError> {
    let mut issues = Issues::default();

    let Some(body) = raw.as_object() else {
        return Err(ValidationError {
            issues: vec![Issue {
                path: "body".into(),
                message: "expected an object".into(),
            }],
        });
    };

    let messages = check_messages(body.get("messages"), &mut issues);

    let max_tokens = match body.get("maxTokens") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_u64().filter(|n| (1..=MAX_TOKENS_LIMIT).contains(n)) {
            Some(n) => u32::try_from(n).ok(),
            None => {
                issues.push(
                    "maxTokens",
                    format!("must be an integer between 1 and {MAX_TOKENS_LIMIT}"),
                );
                None
            }
        },
    };

    let temperature = match body.get("temperature") {
        None | Some(Value::Null) => None,
        Some(v) => match v.as_f64().filter(|t| (0.0..=MAX_TEMPERATURE).contains(t)) {
            Some(t) => Some(t),
            None => {
                issues.push("temperature", format!("must be a number between 0 and {MAX_TEMPERATURE}"));
                None
            }
        },
    };

    let model = match body.get("model") {
        None | Some(Value::Null) => None,
        Some(Value::String(m)) => Some(m.clone()),
        Some(_) => {
            issues.push("model", "must be a string");
            None
        }
    };

    if !issues.0.is_empty() {
        return Err(ValidationError { issues: issues.0 });
    }

    // Validation passed; only now touch content.
    let messages = messages
        .into_iter()
        .map(|(role, content)| Message::new(role, sanitize_prompt_input(content)))
        .collect();

    Ok(CompletionInput {
        messages,
        model,
        max_tokens,
        temperature,
    })
}

fn check_messages<'a>(value: Option<&'a Value>, issues: &mut Issues) -> Vec<(Role, &'a str)> {
    let Some(list) = value.and_then(Value::as_array) else {
        issues.push("messages", "expected an array of messages");
        return Vec::new();
    };
    if list.is_empty() {
        issues.push("messages", "must contain at least 1 message");
        return Vec::new();
    }
    if list.len() > MAX_MESSAGES {
        issues.push("messages", format!("must contain at most {MAX_MESSAGES} messages"));
        return Vec::new();
    }

    let mut out = Vec::with_capacity(list.len());
    for (idx, item) in list.iter().enumerate() {
        let role = match item.get("role").and_then(Value::as_str).and_then(Role::parse) {
            Some(role) => Some(role),
            None => {
                issues.push(
                    format!("messages.{idx}.role"),
                    "must be one of user, assistant, system",
                );
                None
            }
        };
        let content = match item.get("content").and_then(Value::as_str) {
            Some(c) if (1..=MAX_CONTENT_CHARS).contains(&c.chars().count()) => Some(c),
            Some(_) => {
                issues.push(
                    format!("messages.{idx}.content"),
                    format!("must be between 1 and {MAX_CONTENT_CHARS} characters"),
                );
                None
            }
            None => {
                issues.push(format!("messages.{idx}.content"), "expected a string");
                None
            }
        };
        if let (Some(role), Some(content)) = (role, content) {
            out.push((role, content));
        }
    }
    out
}
