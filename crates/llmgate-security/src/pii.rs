//! PII detection, redaction, and tokenization.
//!
//! The detector runs a set of named regex patterns over prompt text and
//! returns non-overlapping matches (earliest start wins, longest match on
//! ties). Credit-card candidates must pass a Luhn checksum and IP-address
//! candidates an octet-range check before they count.
//!
//! The redactor replaces matched spans according to a configured strategy.
//! The `tokenize` strategy assigns a stable opaque token per distinct value
//! held in a process-lifetime map that is never written to any sink.

use crate::fingerprint;
use dashmap::DashMap;
use llmgate_core::config::{PiiPatternConfig, RedactionStrategy};
use llmgate_core::{BackendDescriptor, GatewayError, Result};
use rand::RngCore;
use regex::Regex;
use std::sync::Arc;

/// PII type names the engine recognizes. Configured patterns naming
/// anything else are rejected at load.
pub const KNOWN_PII_TYPES: &[&str] = &[
    "email",
    "phone",
    "ssn",
    "credit_card",
    "ip_address",
    "passport",
    "iban",
];

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// A single detected PII span.
///
/// Carries byte offsets into the scanned text and an audit-safe placeholder;
/// the raw matched value is never stored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PiiMatch {
    pub pii_type: String,
    pub start: usize,
    pub end: usize,
    /// Audit-safe placeholder, e.g. `[REDACTED:EMAIL]`.
    pub value_redacted: String,
}

/// Result of a PII scan.
#[derive(Debug, Clone, Default)]
pub struct PiiReport {
    pub has_pii: bool,
    /// Distinct detected type names, sorted.
    pub types: Vec<String>,
    pub matches: Vec<PiiMatch>,
}

impl PiiReport {
    /// True when the report blocks routing to the given backend.
    pub fn blocks_backend(&self, backend: &BackendDescriptor) -> bool {
        self.has_pii && !backend.pii_allowed
    }
}

// ---------------------------------------------------------------------------
// PiiEngine
// ---------------------------------------------------------------------------

/// A compiled named pattern.
struct CompiledPattern {
    pii_type: String,
    regex: Regex,
}

/// Regex-based PII detector over prompt text. Pure and stateless.
pub struct PiiEngine {
    patterns: Vec<CompiledPattern>,
}

impl PiiEngine {
    /// Compile the engine from configured patterns, or the built-in set
    /// when the configuration is empty.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown PII type name or an invalid regex.
    pub fn new(configured: &[PiiPatternConfig]) -> Result<Self> {
        let defs: Vec<(String, String)> = if configured.is_empty() {
            builtin_patterns()
                .iter()
                .map(|(t, p)| (t.to_string(), p.to_string()))
                .collect()
        } else {
            configured
                .iter()
                .map(|c| (c.pii_type.clone(), c.pattern.clone()))
                .collect()
        };

        let mut patterns = Vec::with_capacity(defs.len());
        for (pii_type, pattern) in defs {
            if !KNOWN_PII_TYPES.contains(&pii_type.as_str()) {
                return Err(GatewayError::Config(format!(
                    "Unknown PII type '{pii_type}' in pattern configuration"
                )));
            }
            let regex = Regex::new(&pattern).map_err(|e| {
                GatewayError::Config(format!("Invalid PII pattern for '{pii_type}': {e}"))
            })?;
            patterns.push(CompiledPattern { pii_type, regex });
        }

        Ok(Self { patterns })
    }

    /// Engine with the built-in pattern set.
    pub fn with_defaults() -> Result<Self> {
        Self::new(&[])
    }

    /// Scan text and return all non-overlapping matches.
    pub fn detect(&self, text: &str) -> PiiReport {
        let mut candidates: Vec<(usize, usize, &str)> = Vec::new();

        for pattern in &self.patterns {
            for mat in pattern.regex.find_iter(text) {
                let value = mat.as_str();
                let valid = match pattern.pii_type.as_str() {
                    "credit_card" => luhn_valid(value),
                    "ip_address" => ip_octets_valid(value),
                    _ => true,
                };
                if valid {
                    candidates.push((mat.start(), mat.end(), &pattern.pii_type));
                }
            }
        }

        // Earliest start wins; longest match breaks ties.
        candidates.sort_by(|a, b| a.0.cmp(&b.0).then((b.1 - b.0).cmp(&(a.1 - a.0))));

        let mut matches: Vec<PiiMatch> = Vec::new();
        let mut last_end = 0usize;
        for (start, end, pii_type) in candidates {
            if !matches.is_empty() && start < last_end {
                continue;
            }
            matches.push(PiiMatch {
                pii_type: pii_type.to_string(),
                start,
                end,
                value_redacted: redact_placeholder(pii_type),
            });
            last_end = end;
        }

        let mut types: Vec<String> = matches.iter().map(|m| m.pii_type.clone()).collect();
        types.sort();
        types.dedup();

        PiiReport {
            has_pii: !matches.is_empty(),
            types,
            matches,
        }
    }
}

/// Built-in pattern table: `(type, regex)`.
fn builtin_patterns() -> &'static [(&'static str, &'static str)] {
    &[
        (
            "email",
            r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
        ),
        // US phone with optional country code and separators
        (
            "phone",
            r"\b(?:\+?1[-.\s]?)?\(?\d{3}\)?[-.\s]\d{3}[-.\s]?\d{4}\b",
        ),
        ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
        // 16 digits with optional separators; Luhn-validated afterwards
        (
            "credit_card",
            r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b",
        ),
        ("ip_address", r"\b(?:\d{1,3}\.){3}\d{1,3}\b"),
        ("passport", r"\b[A-Z]{1,2}\d{7,9}\b"),
        ("iban", r"\b[A-Z]{2}\d{2}[A-Z0-9]{10,30}\b"),
    ]
}

/// The audit-safe placeholder for a PII type.
fn redact_placeholder(pii_type: &str) -> String {
    format!("[REDACTED:{}]", pii_type.to_uppercase())
}

/// Luhn checksum over the digits of a candidate card number.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let mut checksum = 0u32;
    for (i, digit) in digits.iter().rev().enumerate() {
        let mut d = *digit;
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        checksum += d;
    }
    checksum % 10 == 0
}

/// All four octets in `0..=255`.
fn ip_octets_valid(candidate: &str) -> bool {
    let parts: Vec<&str> = candidate.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| p.parse::<u16>().map(|v| v <= 255).unwrap_or(false))
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

/// Process-lifetime reversible tokenization map.
///
/// The forward and reverse maps live only in memory and are cleared on
/// shutdown; nothing here is ever written to audit or storage sinks.
pub struct Tokenizer {
    forward: DashMap<String, String>,
    reverse: DashMap<String, String>,
    token_regex: Regex,
}

impl Tokenizer {
    pub fn new() -> Self {
        Self {
            forward: DashMap::new(),
            reverse: DashMap::new(),
            // Token shape must stay in sync with `mint_token`.
            token_regex: Regex::new(r"TOK_[0-9a-f]{16}").expect("static token regex"),
        }
    }

    /// Return the stable token for a value, minting one on first sight.
    pub fn tokenize(&self, value: &str) -> String {
        if let Some(existing) = self.forward.get(value) {
            return existing.clone();
        }
        let token = mint_token();
        self.forward.insert(value.to_string(), token.clone());
        self.reverse.insert(token.clone(), value.to_string());
        token
    }

    /// Replace every token in `text` with its original value.
    pub fn detokenize(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut cursor = 0;
        for mat in self.token_regex.find_iter(text) {
            result.push_str(&text[cursor..mat.start()]);
            match self.reverse.get(mat.as_str()) {
                Some(original) => result.push_str(&original),
                None => result.push_str(mat.as_str()),
            }
            cursor = mat.end();
        }
        result.push_str(&text[cursor..]);
        result
    }

    /// Number of distinct values currently mapped.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

impl Default for Tokenizer {
    fn default() -> Self {
        Self::new()
    }
}

/// Mint an opaque token: `TOK_` plus 16 hex chars of randomness.
fn mint_token() -> String {
    let mut bytes = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("TOK_{}", hex::encode(bytes))
}

// ---------------------------------------------------------------------------
// Redactor
// ---------------------------------------------------------------------------

/// Applies a redaction strategy to detected PII spans.
pub struct Redactor {
    strategy: RedactionStrategy,
    tokenizer: Arc<Tokenizer>,
}

impl Redactor {
    pub fn new(strategy: RedactionStrategy, tokenizer: Arc<Tokenizer>) -> Self {
        Self {
            strategy,
            tokenizer,
        }
    }

    pub fn strategy(&self) -> RedactionStrategy {
        self.strategy
    }

    /// Replace each matched span in `text` according to the strategy.
    ///
    /// Matches must be non-overlapping and ordered by start, which is what
    /// [`PiiEngine::detect`] produces. Replacement runs right-to-left so
    /// earlier byte offsets stay valid.
    pub fn apply(&self, text: &str, matches: &[PiiMatch]) -> String {
        let mut result = text.to_string();
        for m in matches.iter().rev() {
            let value = &text[m.start..m.end];
            let replacement = match self.strategy {
                RedactionStrategy::Redact => m.value_redacted.clone(),
                RedactionStrategy::Mask => "****".to_string(),
                RedactionStrategy::Hash => {
                    format!("[{}:{}]", m.pii_type.to_uppercase(), &fingerprint(value)[..8])
                }
                RedactionStrategy::Tokenize => self.tokenizer.tokenize(value),
            };
            result.replace_range(m.start..m.end, &replacement);
        }
        result
    }

    /// Restore tokenized values. Only meaningful for the `tokenize`
    /// strategy; other strategies are not reversible.
    pub fn detokenize(&self, text: &str) -> String {
        self.tokenizer.detokenize(text)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
