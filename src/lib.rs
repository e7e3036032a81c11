// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
pub mod api;
pub mod config;
pub mod geo;
pub mod imaging;
pub mod mask;
pub mod pii;
pub mod version;

// Re-export main types
pub use api::{build_router, start_server, AppState};
pub use config::Settings;
pub use geo::{
    CueDetector, CueOrchestrator, DetectionBundle, FilterConfig, GeoHypothesis, GeocodeThrottle,
    Geocoder, GroundingSidecarClient, LocationGuess, NominatimClient, NormalizedBox,
    OpenVocabDetector, OrchestratorConfig, PipelineError, RetryPolicy, ScoredBox, Stage,
    VlmGeoClient,
};
pub use mask::{MaskConfig, MaskingEngine};
pub use pii::{
    NamedEntityRecognizer, OnnxNerModel, PiiEntity, PiiKind, PiiResolver, PiiSource,
    RedactionReport,
};
