// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Regex bank for structured PII.
//!
//! Patterns are compiled once at construction and applied in a fixed order.
//! Where a pattern labels its payload (e.g. `Routing: 123456789`), capture
//! group 1 narrows the reported span to the payload itself.

use regex::Regex;

use super::{PiiEntity, PiiKind, PiiSource};

/// Structured patterns carry a fixed high confidence
const REGEX_CONFIDENCE: f32 = 0.95;

struct PatternSpec {
    kind: PiiKind,
    regex: Regex,
}

/// Ordered bank of compiled structured-PII detectors
pub struct PatternBank {
    patterns: Vec<PatternSpec>,
}

impl PatternBank {
    pub fn new() -> Self {
        // The Rust regex crate has no lookaround; boundary anchors replace
        // the original lookbehind/lookahead guards. Overlapping matches
        // (ZIP inside ZIP+4, account digits inside card numbers) are left
        // to conflict resolution, where the longer span wins.
        let table: &[(PiiKind, &str)] = &[
            (PiiKind::Ssn, r"\b\d{3}-\d{2}-\d{4}\b"),
            (PiiKind::Ssn, r"\b\d{3} \d{2} \d{4}\b"),
            (PiiKind::Ssn, r"(?i)\bSSN:?\s*(\d{3}-\d{2}-\d{4})\b"),
            (PiiKind::CreditCard, r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b"),
            (PiiKind::CreditCard, r"\b\d{13,19}\b"),
            (PiiKind::PhoneNumber, r"\(\d{3}\)\s*\d{3}[-\s]?\d{4}"),
            (PiiKind::PhoneNumber, r"\b\d{3}-\d{3}-\d{4}\b"),
            (PiiKind::PhoneNumber, r"\b\d{3}\.\d{3}\.\d{4}\b"),
            (PiiKind::PhoneNumber, r"\+1\s?\d{3}[-.\s]?\d{3}[-.\s]?\d{4}"),
            (
                PiiKind::Email,
                r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            ),
            (PiiKind::DriverLicense, r"\b[A-Z]\d{7,18}\b"),
            (PiiKind::DriverLicense, r"(?i)\bDL:?\s*([A-Z0-9]{4,18})\b"),
            (
                PiiKind::DriverLicense,
                r"(?i)\bDriver\s*License:?\s*([A-Z0-9]{4,18})\b",
            ),
            (PiiKind::BankAccount, r"(?i)\bRouting:?\s*(\d{9})\b"),
            (PiiKind::BankAccount, r"(?i)\bAcct:?\s*(\d{8,20})\b"),
            (PiiKind::BankAccount, r"(?i)\bAccount:?\s*(\d{8,20})\b"),
            (
                PiiKind::StreetAddress,
                r"\b\d{1,6} [A-Za-z0-9 .-]+(?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Circle|Cir|Way|Terrace|Ter|Place|Pl|Plaza|Pkwy|Parkway)\b",
            ),
            (PiiKind::StreetAddress, r"(?i)\bP\.?O\.?\s*Box \d+\b"),
            (PiiKind::PostalCode, r"\b\d{5}-\d{4}\b"),
            (PiiKind::PostalCode, r"\b\d{5}\b"),
            (PiiKind::Passport, r"\b[A-Z]\d{8}\b"),
            (
                PiiKind::Passport,
                r"(?i)\bpassport\s+number:?\s*([A-Z0-9]{6,12})\b",
            ),
        ];

        let patterns = table
            .iter()
            .map(|(kind, pattern)| PatternSpec {
                kind: *kind,
                regex: Regex::new(pattern).expect("pattern bank regex is valid"),
            })
            .collect();

        Self { patterns }
    }

    /// Run every pattern over the text, in bank order.
    pub fn detect(&self, text: &str) -> Vec<PiiEntity> {
        let mut entities = Vec::new();

        for spec in &self.patterns {
            for caps in spec.regex.captures_iter(text) {
                // Group 1 is the payload when the pattern labels it
                let m = caps.get(1).unwrap_or_else(|| {
                    caps.get(0).expect("group 0 always present")
                });
                entities.push(PiiEntity {
                    kind: spec.kind,
                    start: m.start(),
                    end: m.end(),
                    text: m.as_str().to_string(),
                    source: PiiSource::Regex,
                    confidence: REGEX_CONFIDENCE,
                });
            }
        }

        entities
    }
}

impl Default for PatternBank {
    fn default() -> Self {
        Self::new()
    }
}
