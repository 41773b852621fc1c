//! Token accounting.
//!
//! [`TokenAccountant`] counts tokens for text and message lists, checks
//! counts against per-model context windows, and truncates text or
//! conversations to a budget.
//!
//! Counting goes through the [`Tokenizer`] trait. Known model families use a
//! BPE encoding from `tiktoken-rs`; anything else (or any tokenizer that
//! cannot produce a count) falls back to `ceil(chars / 4)`. Counting never
//! fails. The numbers are good enough for budget enforcement, not billing.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use thiserror::Error;
use tiktoken_rs::CoreBPE;

use crate::types::{Message, Role};

/// Fixed per-message framing cost.
pub const MESSAGE_OVERHEAD: usize = 4;

/// Fixed per-conversation framing cost.
pub const CONVERSATION_OVERHEAD: usize = 2;

/// Context window used for models missing from the table.
pub const DEFAULT_CONTEXT_WINDOW: usize = 4096;

/// Suffix appended by [`TokenAccountant::truncate_to_token_limit`] by default.
pub const DEFAULT_TRUNCATION_SUFFIX: &str = "...";

const CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("claude-3-5-sonnet-20241022", 200_000),
    ("claude-3-opus-20240229", 200_000),
    ("gpt-4-turbo-preview", 128_000),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
];

/// Something that can turn text into a token count.
pub trait Tokenizer: Send + Sync {
    /// Encoding name, for logs.
    fn name(&self) -> &str;

    /// Token count for `text`, or `None` when this tokenizer cannot count it.
    fn count(&self, text: &str) -> Option<usize>;
}

/// A `tiktoken-rs` BPE encoding.
pub struct BpeTokenizer {
    name: &'static str,
    bpe: CoreBPE,
}

impl BpeTokenizer {
    pub fn cl100k() -> Option<Self> {
        tiktoken_rs::cl100k_base().ok().map(|bpe| Self {
            name: "cl100k_base",
            bpe,
        })
    }

    pub fn o200k() -> Option<Self> {
        tiktoken_rs::o200k_base().ok().map(|bpe| Self {
            name: "o200k_base",
            bpe,
        })
    }
}

impl Tokenizer for BpeTokenizer {
    fn name(&self) -> &str {
        self.name
    }

    fn count(&self, text: &str) -> Option<usize> {
        Some(self.bpe.encode_with_special_tokens(text).len())
    }
}

// Encodings are large; load each once per process.
static CL100K: LazyLock<Option<Arc<dyn Tokenizer>>> =
    LazyLock::new(|| BpeTokenizer::cl100k().map(|t| Arc::new(t) as Arc<dyn Tokenizer>));
static O200K: LazyLock<Option<Arc<dyn Tokenizer>>> =
    LazyLock::new(|| BpeTokenizer::o200k().map(|t| Arc::new(t) as Arc<dyn Tokenizer>));

/// `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Context window for `model`, or [`DEFAULT_CONTEXT_WINDOW`].
pub fn context_window(model: &str) -> usize {
    CONTEXT_WINDOWS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, limit)| *limit)
        .unwrap_or(DEFAULT_CONTEXT_WINDOW)
}

/// A token count above the effective ceiling for a model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("token count ({count}) exceeds limit ({limit}) for model {model}")]
pub struct TokenLimitExceeded {
    pub count: usize,
    pub limit: usize,
    pub model: String,
}

/// Token counting and budget truncation.
///
/// Tokenizers are selected by longest matching model-name prefix.
#[derive(Clone)]
pub struct TokenAccountant {
    tokenizers: HashMap<String, Arc<dyn Tokenizer>>,
}

impl Default for TokenAccountant {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TokenAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut families: Vec<_> = self
            .tokenizers
            .iter()
            .map(|(prefix, t)| format!("{prefix}={}", t.name()))
            .collect();
        families.sort();
        f.debug_struct("TokenAccountant")
            .field("tokenizers", &families)
            .finish()
    }
}

impl TokenAccountant {
    /// Accountant with the built-in model families: `gpt-4o`, `o1` and `o3`
    /// use `o200k_base`; other `gpt-` and `claude-` models use `cl100k_base`.
    pub fn new() -> Self {
        let mut accountant = Self::heuristic();
        if let Some(cl100k) = CL100K.as_ref() {
            for prefix in ["gpt-", "claude-", "text-embedding-"] {
                accountant = accountant.with_tokenizer(prefix, Arc::clone(cl100k));
            }
        }
        if let Some(o200k) = O200K.as_ref() {
            for prefix in ["gpt-4o", "o1", "o3"] {
                accountant = accountant.with_tokenizer(prefix, Arc::clone(o200k));
            }
        }
        accountant
    }

    /// Accountant that always uses the length heuristic.
    pub fn heuristic() -> Self {
        Self {
            tokenizers: HashMap::new(),
        }
    }

    /// Register `tokenizer` for every model starting with `prefix`.
    pub fn with_tokenizer(mut self, prefix: impl Into<String>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizers.insert(prefix.into(), tokenizer);
        self
    }

    fn tokenizer_for(&self, model: &str) -> Option<&dyn Tokenizer> {
        self.tokenizers
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, t)| t.as_ref())
    }

    /// Tokens in `text` under `model`'s encoding.
    pub fn count_tokens(&self, text: &str, model: &str) -> usize {
        self.tokenizer_for(model)
            .and_then(|t| t.count(text))
            .unwrap_or_else(|| estimate_tokens(text))
    }

    fn message_cost(&self, message: &Message, model: &str) -> usize {
        MESSAGE_OVERHEAD
            + self.count_tokens(message.role.as_str(), model)
            + self.count_tokens(&message.content, model)
    }

    /// Tokens for a whole conversation including framing overhead.
    pub fn count_message_tokens(&self, messages: &[Message], model: &str) -> usize {
        messages
            .iter()
            .map(|m| self.message_cost(m, model))
            .sum::<usize>()
            + CONVERSATION_OVERHEAD
    }

    /// Longest prefix of `text` that fits `max_tokens` together with `suffix`.
    ///
    /// Returns `text` unchanged when it already fits.
    pub fn truncate_to_token_limit(
        &self,
        text: &str,
        max_tokens: usize,
        model: &str,
        suffix: &str,
    ) -> String {
        if self.count_tokens(text, model) <= max_tokens {
            return text.to_owned();
        }

        let target = max_tokens.saturating_sub(self.count_tokens(suffix, model));
        let boundaries: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();

        // boundaries[k] is the byte offset after k chars.
        let (mut lo, mut hi) = (0, boundaries.len() - 1);
        let mut best = 0;
        while lo <= hi {
            let mid = lo + (hi - lo) / 2;
            if self.count_tokens(&text[..boundaries[mid]], model) <= target {
                best = mid;
                lo = mid + 1;
            } else if mid == 0 {
                break;
            } else {
                hi = mid - 1;
            }
        }

        let mut out = String::with_capacity(boundaries[best] + suffix.len());
        out.push_str(&text[..boundaries[best]]);
        out.push_str(suffix);
        out
    }

    /// Drop the oldest non-system messages until the conversation fits.
    ///
    /// System messages are always kept. Non-system messages are taken from
    /// the most recent backwards and the walk stops at the first one that
    /// does not fit. Conversation order is preserved in the result.
    pub fn truncate_messages(&self, messages: &[Message], max_tokens: usize, model: &str) -> Vec<Message> {
        if self.count_message_tokens(messages, model) <= max_tokens {
            return messages.to_vec();
        }

        let mut keep: Vec<bool> = messages.iter().map(|m| m.role == Role::System).collect();
        let mut used = CONVERSATION_OVERHEAD
            + messages
                .iter()
                .filter(|m| m.role == Role::System)
                .map(|m| self.message_cost(m, model))
                .sum::<usize>();

        for (idx, message) in messages.iter().enumerate().rev() {
            if message.role == Role::System {
                continue;
            }
            let cost = self.message_cost(message, model);
            if used + cost > max_tokens {
                break;
            }
            used += cost;
            keep[idx] = true;
        }

        messages
            .iter()
            .zip(keep)
            .filter_map(|(m, kept)| kept.then(|| m.clone()))
            .collect()
    }

    /// Check `count` against `min(max_tokens, context_window(model))`.
    ///
    /// A `max_tokens` of `None` or `Some(0)` means "no caller cap".
    pub fn validate_token_count(
        &self,
        count: usize,
        model: &str,
        max_tokens: Option<usize>,
    ) -> Result<(), TokenLimitExceeded> {
        let window = context_window(model);
        let limit = match max_tokens.filter(|&m| m > 0) {
            Some(cap) => cap.min(window),
            None => window,
        };
        if count > limit {
            return Err(TokenLimitExceeded {
                count,
                limit,
                model: model.to_owned(),
            });
        }
        Ok(())
    }
}
