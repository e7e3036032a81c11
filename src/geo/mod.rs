// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Geo cue-detection pipeline: hypothesis, open-vocabulary detection,
//! best-effort geocoding, and their orchestration.

pub mod detector;
pub mod hypothesis;
pub mod lookup;
pub mod orchestrator;
pub mod types;

pub use detector::{CueDetector, FilterConfig, GroundingSidecarClient, OpenVocabDetector};
pub use hypothesis::{GeoHypothesis, RetryPolicy, VlmGeoClient};
pub use lookup::{GeocodeThrottle, Geocoder, NominatimClient};
pub use orchestrator::{CueOrchestrator, OrchestratorConfig};
pub use types::{
    Coordinates, CuePhrase, DetectionBundle, LocationGuess, NormalizedBox, PipelineError,
    PixelRect, RawCandidate, ScoredBox, Stage,
};
