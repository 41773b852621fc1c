//! Text sanitizers.
//!
//! All functions are total: they never fail and return an empty string for
//! empty input.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

/// Hard cap on prompt length, in characters.
pub const MAX_PROMPT_CHARS: usize = 50_000;

/// Known prompt-injection signatures, matched case-insensitively.
const INJECTION_PATTERNS: &[&str] = &[
    r"ignore\s+previous\s+instructions",
    r"ignore\s+all\s+previous",
    r"system\s*:\s*you\s+are",
    r"assistant\s*:\s*sure",
    r"\[INST\]",
    r"<\|im_start\|>",
];

// Patterns are compile-time constants.
static INJECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(&format!("(?i){}", INJECTION_PATTERNS.join("|"))).expect("valid injection regex")
});

static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>").expect("valid script regex"));

static EVENT_HANDLER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bon\w+\s*=\s*["'][^"']*["']"#).expect("valid event-handler regex")
});

static JS_SCHEME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)javascript:").expect("valid scheme regex"));

static CREDENTIALS: LazyLock<[(Regex, &'static str); 3]> = LazyLock::new(|| {
    [
        (r"(?i)api[_-]?key[:\s=]+\S+", "API_KEY=***"),
        (r"(?i)token[:\s=]+\S+", "TOKEN=***"),
        (r"(?i)password[:\s=]+\S+", "PASSWORD=***"),
    ]
    .map(|(pattern, replacement)| {
        (
            Regex::new(pattern).expect("valid credential regex"),
            replacement,
        )
    })
});

/// Clean untrusted prompt text.
///
/// Strips ASCII control characters, cuts to [`MAX_PROMPT_CHARS`], wraps
/// any injection signature as `[SANITIZED: <match>]`, then trims.
pub fn sanitize_prompt_input(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let cleaned: String = text
        .chars()
        .filter(|c| !matches!(*c, '\u{00}'..='\u{1F}' | '\u{7F}'))
        .take(MAX_PROMPT_CHARS)
        .collect();

    let wrapped = INJECTION.replace_all(&cleaned, |caps: &regex::Captures<'_>| {
        let matched = &caps[0];
        warn!(pattern = %matched, "prompt injection pattern detected");
        format!("[SANITIZED: {matched}]")
    });

    wrapped.trim().to_owned()
}

/// Entity-escape `& < > " ' /`. Ampersands go first so existing escapes
/// are not double-processed by later replacements.
pub fn sanitize_html_output(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
        .replace('/', "&#x2F;")
}

/// Remove script blocks, inline event handlers and `javascript:` schemes.
/// Everything else passes through untouched.
pub fn sanitize_markdown_output(text: &str) -> String {
    let text = SCRIPT_BLOCK.replace_all(text, "");
    let text = EVENT_HANDLER.replace_all(&text, "");
    JS_SCHEME.replace_all(&text, "").into_owned()
}

/// Redact credential-shaped substrings before a message reaches a client.
pub fn sanitize_error_message(message: &str) -> String {
    CREDENTIALS
        .iter()
        .fold(message.to_owned(), |acc, (re, replacement)| {
            re.replace_all(&acc, *replacement).into_owned()
        })
}

/// `ratelimit:<namespace>:<identifier>` with the identifier reduced to
/// `[A-Za-z0-9_-]`.
pub fn generate_rate_limit_key(identifier: &str, namespace: Option<&str>) -> String {
    let cleaned: String = identifier
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    format!("ratelimit:{}:{cleaned}", namespace.unwrap_or("api"))
}
