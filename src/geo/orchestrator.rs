// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Cue orchestration: resize to the reference frame, hypothesis, detection,
//! best-effort geocode, bundle assembly.

use std::sync::Arc;

use tracing::{info, warn};

use super::detector::CueDetector;
use super::hypothesis::{with_backoff, GeoHypothesis, RetryPolicy};
use super::lookup::Geocoder;
use super::types::{DetectionBundle, LocationGuess, PipelineError, Stage};
use crate::imaging;

/// Reference frame the pipeline normalizes against
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub reference_width: u32,
    pub reference_height: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self { reference_width: 720, reference_height: 540 }
    }
}

/// Composes hypothesis → detection → geocode for one image scan.
///
/// The three external calls are sequential and data-dependent; parallelism
/// exists only across requests.
pub struct CueOrchestrator {
    hypothesis: Arc<dyn GeoHypothesis>,
    detector: CueDetector,
    geocoder: Arc<dyn Geocoder>,
    retry: RetryPolicy,
    config: OrchestratorConfig,
}

impl CueOrchestrator {
    pub fn new(
        hypothesis: Arc<dyn GeoHypothesis>,
        detector: CueDetector,
        geocoder: Arc<dyn Geocoder>,
        retry: RetryPolicy,
        config: OrchestratorConfig,
    ) -> Self {
        Self { hypothesis, detector, geocoder, retry, config }
    }

    /// Run the full scan. All boxes in the returned bundle are normalized
    /// against the resized reference frame, not the original image.
    ///
    /// A hypothesis failure fails the request: there is no meaningful
    /// detection without cue phrases. An empty detection bundle and a
    /// missing geocode result are both valid outcomes.
    pub async fn run(
        &self,
        raw_image: &[u8],
    ) -> Result<(LocationGuess, DetectionBundle), PipelineError> {
        let resized = imaging::resize_to_reference(
            raw_image,
            self.config.reference_width,
            self.config.reference_height,
        )
        .map_err(|e| PipelineError::validation(e.to_string()))?;

        let guess = with_backoff(&self.retry, Stage::Hypothesis, || {
            self.hypothesis.guess(&resized)
        })
        .await?;
        info!(
            "geo hypothesis: {} / {} (confidence {:.2}, {} cues)",
            guess.city,
            guess.country,
            guess.confidence,
            guess.cues.len()
        );

        let phrases = guess.phrases_by_priority();
        let bundle = self.detector.detect(&resized, &phrases).await?;
        if bundle.is_empty() {
            info!("no cues detected above thresholds");
        }

        // One best-effort lookup per run, never fan-out per cue
        let guess = if guess.query_string.trim().is_empty() {
            guess
        } else {
            match self.geocoder.resolve(&guess.query_string).await {
                Some(coordinates) => guess.with_coordinates(coordinates),
                None => {
                    warn!("geocode lookup yielded nothing for '{}'", guess.query_string);
                    guess
                }
            }
        };

        Ok((guess, bundle))
    }
}
