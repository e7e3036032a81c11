// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! PII span resolution: regex bank + statistical NER, conflict resolution,
//! and the redaction renderer.

pub mod ner;
pub mod patterns;
pub mod resolve;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

pub use ner::{NamedEntityRecognizer, NerSpan, OnnxNerModel};
pub use patterns::PatternBank;
pub use resolve::{render_redacted, resolve_conflicts};

/// Entity categories the resolver can redact
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiKind {
    Ssn,
    CreditCard,
    PhoneNumber,
    Email,
    DriverLicense,
    BankAccount,
    StreetAddress,
    PostalCode,
    Passport,
    Person,
    Organization,
    Location,
    DateTime,
    Money,
}

impl PiiKind {
    /// Uppercase wire/report name
    pub fn name(&self) -> &'static str {
        match self {
            PiiKind::Ssn => "SSN",
            PiiKind::CreditCard => "CREDIT_CARD",
            PiiKind::PhoneNumber => "PHONE_NUMBER",
            PiiKind::Email => "EMAIL",
            PiiKind::DriverLicense => "DRIVER_LICENSE",
            PiiKind::BankAccount => "BANK_ACCOUNT",
            PiiKind::StreetAddress => "STREET_ADDRESS",
            PiiKind::PostalCode => "POSTAL_CODE",
            PiiKind::Passport => "PASSPORT",
            PiiKind::Person => "PERSON",
            PiiKind::Organization => "ORGANIZATION",
            PiiKind::Location => "LOCATION",
            PiiKind::DateTime => "DATE_TIME",
            PiiKind::Money => "MONEY",
        }
    }

    /// Placeholder token substituted for the entity's span
    pub fn placeholder(&self) -> String {
        format!("<{}>", self.name())
    }
}

/// Which stage produced an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PiiSource {
    Regex,
    Ner,
}

/// A detected PII span; `start < end <= text.len()`, byte offsets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiEntity {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub source: PiiSource,
    pub confidence: f32,
}

/// Ordered, non-overlapping kept entities plus per-kind counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionReport {
    pub entities: Vec<PiiEntity>,
    pub counts: BTreeMap<String, usize>,
}

impl RedactionReport {
    pub fn total(&self) -> usize {
        self.entities.len()
    }
}

/// Two-stage PII scanner with span conflict resolution.
///
/// Runs regex-only when no recognizer is configured; NER is additive and a
/// per-call recognizer failure degrades the scan rather than failing it.
pub struct PiiResolver {
    patterns: PatternBank,
    ner: Option<Arc<dyn NamedEntityRecognizer>>,
}

impl PiiResolver {
    pub fn new(ner: Option<Arc<dyn NamedEntityRecognizer>>) -> Self {
        Self { patterns: PatternBank::new(), ner }
    }

    /// Scan the text and return the resolved entity report.
    pub fn scan(&self, text: &str) -> RedactionReport {
        let mut entities = self.patterns.detect(text);

        if let Some(ner) = &self.ner {
            match ner.recognize(text) {
                Ok(spans) => {
                    entities.extend(spans.into_iter().filter_map(|s| {
                        let slice = text.get(s.start..s.end)?;
                        Some(PiiEntity {
                            kind: s.kind,
                            start: s.start,
                            end: s.end,
                            text: slice.to_string(),
                            source: PiiSource::Ner,
                            confidence: s.confidence,
                        })
                    }));
                }
                Err(e) => warn!("NER stage failed, continuing with regex only: {}", e),
            }
        }

        // Enforce the span invariant before resolution
        entities.retain(|e| e.start < e.end && e.end <= text.len());

        let entities = resolve_conflicts(entities);
        let mut counts = BTreeMap::new();
        for entity in &entities {
            *counts.entry(entity.kind.name().to_string()).or_insert(0) += 1;
        }

        RedactionReport { entities, counts }
    }

    /// Render the redacted text for a previously produced report.
    pub fn redact(&self, text: &str, report: &RedactionReport) -> String {
        render_redacted(text, &report.entities)
    }
}
