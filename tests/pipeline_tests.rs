// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! End-to-end orchestration tests against fake model sidecars.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use geoprivacy_node::geo::types::{
    Coordinates, CuePhrase, LocationGuess, NormalizedBox, PipelineError, RawCandidate, Stage,
};
use geoprivacy_node::geo::{
    CueDetector, CueOrchestrator, FilterConfig, GeoHypothesis, GeocodeThrottle, Geocoder,
    NominatimClient, OpenVocabDetector, OrchestratorConfig, RetryPolicy,
};

fn test_image() -> Vec<u8> {
    let img = image::RgbImage::from_fn(96, 72, |x, y| {
        image::Rgb([(x * 2) as u8, (y * 3) as u8, 64])
    });
    let mut buffer = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buffer, image::ImageFormat::Png)
        .unwrap();
    buffer.into_inner()
}

fn guess_with_cues(cues: &[(&str, u32)], query: &str) -> LocationGuess {
    LocationGuess {
        confidence: 0.66,
        country: "Singapore".to_string(),
        city: "Singapore".to_string(),
        region_label: "Chinatown".to_string(),
        query_string: query.to_string(),
        cues: cues
            .iter()
            .map(|(phrase, priority)| CuePhrase {
                priority: *priority,
                phrase: phrase.to_string(),
                rationale: "identifies the block".to_string(),
            })
            .collect(),
        coordinates: None,
    }
}

struct StaticHypothesis {
    guess: LocationGuess,
}

#[async_trait]
impl GeoHypothesis for StaticHypothesis {
    async fn guess(&self, _image: &[u8]) -> Result<LocationGuess, PipelineError> {
        Ok(self.guess.clone())
    }
}

struct FlakyHypothesis {
    guess: LocationGuess,
    failures: AtomicU32,
}

#[async_trait]
impl GeoHypothesis for FlakyHypothesis {
    async fn guess(&self, _image: &[u8]) -> Result<LocationGuess, PipelineError> {
        if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            if n > 0 { Some(n - 1) } else { None }
        })
        .is_ok()
        {
            return Err(PipelineError::upstream(Stage::Hypothesis, "502 bad gateway"));
        }
        Ok(self.guess.clone())
    }
}

struct StaticDetector {
    candidates: Vec<RawCandidate>,
    phrases_seen: std::sync::Mutex<Vec<String>>,
    calls: AtomicU32,
}

impl StaticDetector {
    fn new(candidates: Vec<RawCandidate>) -> Self {
        Self {
            candidates,
            phrases_seen: std::sync::Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl OpenVocabDetector for StaticDetector {
    async fn detect_raw(
        &self,
        _image: &[u8],
        phrases: &[String],
    ) -> Result<Vec<RawCandidate>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.phrases_seen.lock().unwrap() = phrases.to_vec();
        Ok(self.candidates.clone())
    }
}

struct NullGeocoder;

#[async_trait]
impl Geocoder for NullGeocoder {
    async fn resolve(&self, _query: &str) -> Option<Coordinates> {
        None
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        attempt_timeout: Duration::from_secs(5),
    }
}

fn candidate(phrase: &str, score: f32) -> RawCandidate {
    RawCandidate {
        phrase: phrase.to_string(),
        bbox: NormalizedBox::new(0.4, 0.3, 0.12, 0.08),
        score,
        text_score: 0.6,
    }
}

#[tokio::test]
async fn scan_returns_filtered_bundle_with_priority_ordered_phrases() {
    let detector = Arc::new(StaticDetector::new(vec![
        candidate("street name sign", 0.81),
        candidate("red post box", 0.12), // below box threshold
    ]));

    let orchestrator = CueOrchestrator::new(
        Arc::new(StaticHypothesis {
            guess: guess_with_cues(&[("red post box", 2), ("street name sign", 1)], ""),
        }),
        CueDetector::new(Arc::clone(&detector) as Arc<dyn OpenVocabDetector>, FilterConfig::default()),
        Arc::new(NullGeocoder),
        fast_retry(),
        OrchestratorConfig::default(),
    );

    let (_, bundle) = orchestrator.run(&test_image()).await.unwrap();

    // Batched: exactly one detector call, phrases in priority order
    assert_eq!(detector.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        *detector.phrases_seen.lock().unwrap(),
        vec!["street name sign".to_string(), "red post box".to_string()]
    );

    // Sub-threshold candidate filtered out
    assert_eq!(bundle.len(), 1);
    let kept = &bundle.detections["street name sign"];
    assert!(kept.score >= 0.37);
    assert!(kept.bbox.area() <= 0.25);
}

#[tokio::test]
async fn scan_with_no_detectable_phrases_yields_empty_bundle_not_error() {
    let orchestrator = CueOrchestrator::new(
        Arc::new(StaticHypothesis {
            guess: guess_with_cues(&[("street name sign", 1)], ""),
        }),
        CueDetector::new(
            Arc::new(StaticDetector::new(vec![])) as Arc<dyn OpenVocabDetector>,
            FilterConfig::default(),
        ),
        Arc::new(NullGeocoder),
        fast_retry(),
        OrchestratorConfig::default(),
    );

    let (guess, bundle) = orchestrator.run(&test_image()).await.unwrap();
    assert!(bundle.is_empty());
    assert_eq!(guess.city, "Singapore");
}

#[tokio::test]
async fn transient_hypothesis_failures_are_retried_within_budget() {
    let hypothesis = Arc::new(FlakyHypothesis {
        guess: guess_with_cues(&[("street name sign", 1)], ""),
        failures: AtomicU32::new(2),
    });

    let orchestrator = CueOrchestrator::new(
        Arc::clone(&hypothesis) as Arc<dyn GeoHypothesis>,
        CueDetector::new(
            Arc::new(StaticDetector::new(vec![])) as Arc<dyn OpenVocabDetector>,
            FilterConfig::default(),
        ),
        Arc::new(NullGeocoder),
        fast_retry(),
        OrchestratorConfig::default(),
    );

    assert!(orchestrator.run(&test_image()).await.is_ok());
}

#[tokio::test]
async fn exhausted_retries_surface_upstream_unavailable() {
    let orchestrator = CueOrchestrator::new(
        Arc::new(FlakyHypothesis {
            guess: guess_with_cues(&[("street name sign", 1)], ""),
            failures: AtomicU32::new(10),
        }),
        CueDetector::new(
            Arc::new(StaticDetector::new(vec![])) as Arc<dyn OpenVocabDetector>,
            FilterConfig::default(),
        ),
        Arc::new(NullGeocoder),
        fast_retry(),
        OrchestratorConfig::default(),
    );

    let err = orchestrator.run(&test_image()).await.unwrap_err();
    assert!(matches!(err, PipelineError::UpstreamUnavailable { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn throttled_second_geocode_returns_none_within_bounded_time() {
    // Unreachable endpoint: the first call claims the slot and misses, the
    // second is gated by the shared throttle. Neither may block or crash.
    let throttle = Arc::new(GeocodeThrottle::new(Duration::from_secs(60)));
    let client = NominatimClient::new("http://127.0.0.1:59999", Arc::clone(&throttle));

    let started = Instant::now();
    assert!(client.resolve("Budapest Hungary").await.is_none());
    assert!(client.resolve("Budapest Hungary").await.is_none());
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn boxes_are_normalized_against_the_reference_frame() {
    let detector = Arc::new(StaticDetector::new(vec![candidate("street name sign", 0.8)]));

    let orchestrator = CueOrchestrator::new(
        Arc::new(StaticHypothesis {
            guess: guess_with_cues(&[("street name sign", 1)], ""),
        }),
        CueDetector::new(Arc::clone(&detector) as Arc<dyn OpenVocabDetector>, FilterConfig::default()),
        Arc::new(NullGeocoder),
        fast_retry(),
        OrchestratorConfig { reference_width: 720, reference_height: 540 },
    );

    let (_, bundle) = orchestrator.run(&test_image()).await.unwrap();

    // The bundle carries the resized frame the boxes refer to, not the input
    let (frame, info) = geoprivacy_node::imaging::decode_image_bytes(&bundle.reference_image).unwrap();
    assert_eq!(frame.width(), 720);
    assert_eq!(frame.height(), 540);
    assert_eq!(info.format, image::ImageFormat::Jpeg);
}
