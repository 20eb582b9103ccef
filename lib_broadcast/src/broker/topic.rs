//! # Topic Names
//!
//! A `Topic` is a subject on the broker, validated once at construction so the
//! rest of the crate can pass it around without re-checking.
//!
//! ## Naming rules (NATS subjects):
//! - non-empty, no whitespace or control characters;
//! - tokens separated by `.`, none of them empty;
//! - `*` stands for exactly one token;
//! - `>` stands for one or more trailing tokens and must be the last token.

use std::fmt;

use crate::error::BroadcastError;

/// A validated broker subject such as `feedback.create`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    /// Validates `name` and wraps it.
    pub fn new(name: impl Into<String>) -> Result<Self, BroadcastError> {
        let name = name.into();
        let reject = |reason: &str| BroadcastError::InvalidTopic {
            topic: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() {
            return Err(reject("topic is empty"));
        }
        if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(reject("topic contains whitespace"));
        }

        let tokens: Vec<&str> = name.split('.').collect();
        for (idx, token) in tokens.iter().enumerate() {
            if token.is_empty() {
                return Err(reject("topic contains an empty token"));
            }
            if token.len() > 1 && (token.contains('*') || token.contains('>')) {
                return Err(reject("wildcards must be whole tokens"));
            }
            if *token == ">" && idx != tokens.len() - 1 {
                return Err(reject("'>' is only allowed as the last token"));
            }
        }

        Ok(Self(name))
    }

    /// The raw subject text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the topic contains `*` or `>` tokens.
    pub fn is_wildcard(&self) -> bool {
        self.0.split('.').any(|t| t == "*" || t == ">")
    }

    /// Whether a concrete subject (as published) is delivered to this topic.
    pub fn matches(&self, subject: &str) -> bool {
        let mut pattern = self.0.split('.');
        let mut concrete = subject.split('.');

        loop {
            match (pattern.next(), concrete.next()) {
                (Some(">"), Some(_)) => return true,
                (Some("*"), Some(_)) => continue,
                (Some(p), Some(s)) if p == s => continue,
                (None, None) => return true,
                _ => return false,
            }
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Topic {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Topic {
    type Error = BroadcastError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Topic::new(value)
    }
}

impl TryFrom<String> for Topic {
    type Error = BroadcastError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::new(value)
    }
}
