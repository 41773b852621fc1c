//! Sanitization and validation of untrusted text.
//!
//! - [`sanitize`] -- prompt input, HTML/markdown output, client-facing
//!   error messages, rate-limit keys
//! - [`validate`] -- structural validation of raw completion requests,
//!   followed by prompt sanitization of every message

pub mod sanitize;
pub mod validate;

pub use sanitize::{
    MAX_PROMPT_CHARS, generate_rate_limit_key, sanitize_error_message, sanitize_html_output,
    sanitize_markdown_output, sanitize_prompt_input,
};
pub use validate::{CompletionInput, ValidationError, validate_and_sanitize_request};
