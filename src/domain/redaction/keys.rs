//! Sensitive key matching.
//!
//! Keys are compared after normalization: lower-cased with separators
//! removed, so `api_key`, `apiKey` and `X-Api-Key` all normalize to a string
//! containing `apikey`. Short names that would otherwise hit unrelated words
//! (`otp` inside `footprint`) are matched as whole words instead.

use std::collections::BTreeSet;

/// One entry of a key deny list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyPattern {
    /// Matches when the normalized key contains the fragment.
    Fragment(String),
    /// Matches when any word of the key equals the given word.
    Word(String),
}

impl KeyPattern {
    pub fn fragment(fragment: &str) -> Self {
        KeyPattern::Fragment(normalize_key(fragment))
    }

    pub fn word(word: &str) -> Self {
        KeyPattern::Word(normalize_key(word))
    }

    fn matches(&self, normalized: &str, words: &[String]) -> bool {
        match self {
            KeyPattern::Fragment(fragment) => normalized.contains(fragment.as_str()),
            KeyPattern::Word(word) => words.iter().any(|w| w == word),
        }
    }
}

/// Deny/allow policy deciding which object keys are redacted wholesale.
#[derive(Debug, Clone)]
pub struct KeyPolicy {
    deny: Vec<KeyPattern>,
    allow: BTreeSet<String>,
}

impl KeyPolicy {
    /// A policy with no patterns at all.
    pub fn empty() -> Self {
        Self {
            deny: Vec::new(),
            allow: BTreeSet::new(),
        }
    }

    /// Add a deny pattern.
    pub fn deny(mut self, pattern: KeyPattern) -> Self {
        self.deny.push(pattern);
        self
    }

    /// Exempt an exact key (compared after normalization) from redaction.
    ///
    /// ```
    /// use donation_guard::domain::redaction::KeyPolicy;
    ///
    /// let policy = KeyPolicy::default().allow("token_type");
    /// assert!(!policy.is_sensitive("tokenType"));
    /// assert!(policy.is_sensitive("access_token"));
    /// ```
    pub fn allow(mut self, key: &str) -> Self {
        self.allow.insert(normalize_key(key));
        self
    }

    /// Check whether a key names sensitive data.
    pub fn is_sensitive(&self, key: &str) -> bool {
        let normalized = normalize_key(key);
        if self.allow.contains(&normalized) {
            return false;
        }
        let words = split_words(key);
        self.deny
            .iter()
            .any(|pattern| pattern.matches(&normalized, &words))
    }
}

impl Default for KeyPolicy {
    fn default() -> Self {
        let fragments = [
            "password",
            "passwd",
            "token",
            "secret",
            "authorization",
            "cookie",
            "session",
            "privatekey",
            "apikey",
            "email",
            "phone",
            "mobile",
        ];
        let words = ["otp", "jwt", "pin", "auth"];

        let policy = fragments
            .iter()
            .fold(KeyPolicy::empty(), |p, f| p.deny(KeyPattern::fragment(f)));
        words
            .iter()
            .fold(policy, |p, w| p.deny(KeyPattern::word(w)))
    }
}

/// Lower-case a key and drop everything that is not alphanumeric.
pub fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Split a key into lower-case words on separators and camelCase boundaries.
fn split_words(key: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;

    for c in key.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase() || c.is_numeric();
        current.extend(c.to_lowercase());
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}
