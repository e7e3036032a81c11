// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Core types for the geo cue-detection pipeline

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A textual description of a location-revealing object to look for
/// (e.g. "street name sign").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CuePhrase {
    /// Processing/display order; 1 is most critical. Not required to be
    /// contiguous or unique.
    pub priority: u32,
    /// Short phrase driving open-vocabulary detection
    pub phrase: String,
    /// Why removing this cue obscures the location
    pub rationale: String,
}

/// Geographic coordinates returned by the gazetteer lookup
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    /// Latitude in decimal degrees
    pub lat: f64,
    /// Longitude in decimal degrees
    pub lon: f64,
}

/// Ranked location guess produced once per image by the hypothesis model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationGuess {
    /// Model confidence in [0, 1]
    pub confidence: f32,
    pub country: String,
    pub city: String,
    /// Most specific named place the model could infer
    pub region_label: String,
    /// Gazetteer query string (core geographic identifiers only)
    pub query_string: String,
    /// Cue phrases in priority order
    pub cues: Vec<CuePhrase>,
    /// Attached by the orchestrator when the gazetteer lookup succeeds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

impl LocationGuess {
    /// Attach gazetteer coordinates, consuming the guess.
    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    /// Cue phrases ordered by ascending priority (1 first).
    pub fn phrases_by_priority(&self) -> Vec<String> {
        let mut cues: Vec<&CuePhrase> = self.cues.iter().collect();
        cues.sort_by_key(|c| c.priority);
        cues.into_iter().map(|c| c.phrase.clone()).collect()
    }
}

/// A bounding box in fractional image coordinates, origin top-left.
///
/// Serialized as the 4-array `[cx, cy, w, h]` so the wire format is
/// resolution-independent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct NormalizedBox {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
}

impl NormalizedBox {
    pub fn new(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self { cx, cy, w, h }
    }

    /// Fraction of total image area this box covers
    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// Centers must sit inside the image and sizes must be positive.
    pub fn is_valid(&self) -> bool {
        (0.0..=1.0).contains(&self.cx)
            && (0.0..=1.0).contains(&self.cy)
            && self.w > 0.0
            && self.h > 0.0
    }

    /// Convert to an integer pixel rectangle against an image of the given
    /// dimensions. Edges are clamped to [0, 1] before scaling, floored on
    /// the near side and ceiled on the far side. Returns `None` when the
    /// clamped rectangle is degenerate.
    pub fn to_pixel_rect(&self, width: u32, height: u32) -> Option<PixelRect> {
        let x0 = (self.cx - self.w / 2.0).clamp(0.0, 1.0);
        let y0 = (self.cy - self.h / 2.0).clamp(0.0, 1.0);
        let x1 = (self.cx + self.w / 2.0).clamp(0.0, 1.0);
        let y1 = (self.cy + self.h / 2.0).clamp(0.0, 1.0);

        let x0 = (x0 * width as f32).floor() as u32;
        let y0 = (y0 * height as f32).floor() as u32;
        let x1 = ((x1 * width as f32).ceil() as u32).min(width);
        let y1 = ((y1 * height as f32).ceil() as u32).min(height);

        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(PixelRect { x0, y0, x1, y1 })
    }
}

impl From<[f32; 4]> for NormalizedBox {
    fn from(v: [f32; 4]) -> Self {
        Self { cx: v[0], cy: v[1], w: v[2], h: v[3] }
    }
}

impl From<NormalizedBox> for [f32; 4] {
    fn from(b: NormalizedBox) -> Self {
        [b.cx, b.cy, b.w, b.h]
    }
}

/// Half-open pixel rectangle: `x0 <= x < x1`, `y0 <= y < y1`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }
}

/// Raw candidate from the open-vocabulary detector, before domain filtering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawCandidate {
    /// The phrase this candidate was matched against
    pub phrase: String,
    /// Candidate box in normalized coordinates
    #[serde(rename = "box")]
    pub bbox: NormalizedBox,
    /// Localization confidence in [0, 1]
    pub score: f32,
    /// How well the box content matches the phrase text, in [0, 1].
    /// Independent of localization confidence.
    pub text_score: f32,
}

/// A kept detection: the best-scoring surviving box for one phrase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredBox {
    #[serde(rename = "box")]
    pub bbox: NormalizedBox,
    pub score: f32,
}

/// Filtered detections keyed by phrase, plus the resized reference frame
/// the boxes were normalized against. Immutable once returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionBundle {
    /// At most one detection per phrase
    pub detections: BTreeMap<String, ScoredBox>,
    /// JPEG bytes of the reference frame (base64 on the wire)
    #[serde(with = "base64_bytes")]
    pub reference_image: Vec<u8>,
}

impl DetectionBundle {
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }
}

/// Pipeline stage an error is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Hypothesis,
    Detection,
    Geocode,
    Masking,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Hypothesis => "geo hypothesis",
            Stage::Detection => "cue detection",
            Stage::Geocode => "geocode lookup",
            Stage::Masking => "masking",
        };
        write!(f, "{}", name)
    }
}

/// Errors surfaced by the cue-detection and masking pipeline
#[derive(Debug, Error)]
pub enum PipelineError {
    /// External model/service unreachable or erroring after retries.
    /// Surfaced to the caller as retryable.
    #[error("{stage} unavailable: {message}")]
    UpstreamUnavailable { stage: Stage, message: String },

    /// External model returned data violating its contract. Non-retryable;
    /// retrying an already-malformed response pairing rarely helps.
    #[error("{stage} returned a malformed response: {reason}")]
    MalformedResponse { stage: Stage, reason: String },

    /// Input failed basic sanity checks; the caller must fix the input.
    #[error("invalid input: {reason}")]
    Validation { reason: String },
}

impl PipelineError {
    pub fn upstream(stage: Stage, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable { stage, message: message.into() }
    }

    pub fn malformed(stage: Stage, reason: impl Into<String>) -> Self {
        Self::MalformedResponse { stage, reason: reason.into() }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    /// Only upstream-unavailable failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::UpstreamUnavailable { .. })
    }
}

/// Serde helper: `Vec<u8>` as standard base64
pub mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
