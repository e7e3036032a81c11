// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Open-vocabulary cue detection: one batched sidecar call, then domain
//! filtering down to at most one kept box per phrase.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::{
    base64_bytes, DetectionBundle, PipelineError, RawCandidate, ScoredBox, Stage,
};

/// Capability interface for the open-vocabulary detector.
///
/// One call carries the full phrase set (batched, never one call per
/// phrase) and returns unfiltered candidates. Flakiness handling is the
/// implementation's concern, not this layer's.
#[async_trait]
pub trait OpenVocabDetector: Send + Sync {
    async fn detect_raw(
        &self,
        image: &[u8],
        phrases: &[String],
    ) -> Result<Vec<RawCandidate>, PipelineError>;
}

/// Candidate filtering thresholds
#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// Localization confidence floor; below this, detections are noise
    pub box_threshold: f32,
    /// Phrase-match confidence floor, independent of localization
    pub text_threshold: f32,
    /// Maximum box area as a fraction of image area. Oversized boxes mean
    /// the detector matched a broad scene region, and masking them would
    /// destroy most of the image.
    pub max_area_frac: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            box_threshold: 0.37,
            text_threshold: 0.25,
            max_area_frac: 0.25,
        }
    }
}

/// Pure filtering pass over raw detector candidates.
///
/// Drops sub-threshold scores, oversized boxes, weak phrase matches, and
/// boxes violating the normalized-box invariants; keeps the highest-scoring
/// survivor per phrase. Phrases with zero survivors are absent from the
/// result.
pub fn filter_candidates(
    candidates: Vec<RawCandidate>,
    config: &FilterConfig,
) -> BTreeMap<String, ScoredBox> {
    let mut kept: BTreeMap<String, ScoredBox> = BTreeMap::new();

    for candidate in candidates {
        if !candidate.bbox.is_valid() {
            continue;
        }
        if candidate.score < config.box_threshold {
            continue;
        }
        if candidate.bbox.area() > config.max_area_frac {
            continue;
        }
        if candidate.text_score < config.text_threshold {
            continue;
        }

        match kept.get(&candidate.phrase) {
            Some(existing) if existing.score >= candidate.score => {}
            _ => {
                kept.insert(
                    candidate.phrase,
                    ScoredBox { bbox: candidate.bbox, score: candidate.score },
                );
            }
        }
    }

    kept
}

/// Cue detector: composes the external detector call with domain filtering
pub struct CueDetector {
    detector: Arc<dyn OpenVocabDetector>,
    config: FilterConfig,
}

impl CueDetector {
    pub fn new(detector: Arc<dyn OpenVocabDetector>, config: FilterConfig) -> Self {
        Self { detector, config }
    }

    /// Detect the given phrases in the image and return the filtered
    /// bundle. An empty bundle is a valid (if low-value) result.
    pub async fn detect(
        &self,
        image: &[u8],
        phrases: &[String],
    ) -> Result<DetectionBundle, PipelineError> {
        if phrases.is_empty() {
            return Ok(DetectionBundle {
                detections: BTreeMap::new(),
                reference_image: image.to_vec(),
            });
        }

        let raw = self.detector.detect_raw(image, phrases).await?;
        let detections = filter_candidates(raw, &self.config);
        debug!("cue detection kept {} of {} phrases", detections.len(), phrases.len());

        Ok(DetectionBundle { detections, reference_image: image.to_vec() })
    }
}

// --- Sidecar wire structs ---

#[derive(Serialize)]
struct DetectRequest<'a> {
    #[serde(with = "base64_bytes")]
    image: Vec<u8>,
    phrases: &'a [String],
}

#[derive(Deserialize)]
struct DetectResponse {
    candidates: Vec<RawCandidate>,
}

/// HTTP client for the open-vocabulary detection sidecar.
///
/// Flakiness handling lives here, not in `CueDetector`: transient upstream
/// failures are retried under the same bounded backoff as the hypothesis
/// call, so the filter layer above sees exactly one logical call.
pub struct GroundingSidecarClient {
    client: Client,
    endpoint: String,
    retry: super::hypothesis::RetryPolicy,
}

impl GroundingSidecarClient {
    pub fn new(
        endpoint: &str,
        retry: super::hypothesis::RetryPolicy,
    ) -> Result<Self, PipelineError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| PipelineError::upstream(Stage::Detection, e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            retry,
        })
    }

    async fn call_once(
        &self,
        image: &[u8],
        phrases: &[String],
    ) -> Result<Vec<RawCandidate>, PipelineError> {
        let request = DetectRequest { image: image.to_vec(), phrases };

        let response = self
            .client
            .post(format!("{}/v1/detect", self.endpoint))
            .json(&request)
            .send()
            .await
            .map_err(|e| PipelineError::upstream(Stage::Detection, e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(PipelineError::upstream(
                Stage::Detection,
                format!("upstream returned {}", status),
            ));
        }
        if !status.is_success() {
            return Err(PipelineError::malformed(
                Stage::Detection,
                format!("upstream rejected request with {}", status),
            ));
        }

        let body: DetectResponse = response.json().await.map_err(|e| {
            PipelineError::malformed(Stage::Detection, format!("undecodable body: {}", e))
        })?;

        Ok(body.candidates)
    }
}

#[async_trait]
impl OpenVocabDetector for GroundingSidecarClient {
    async fn detect_raw(
        &self,
        image: &[u8],
        phrases: &[String],
    ) -> Result<Vec<RawCandidate>, PipelineError> {
        super::hypothesis::with_backoff(&self.retry, Stage::Detection, || {
            self.call_once(image, phrases)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::types::NormalizedBox;

    fn candidate(phrase: &str, score: f32, text_score: f32, w: f32, h: f32) -> RawCandidate {
        RawCandidate {
            phrase: phrase.to_string(),
            bbox: NormalizedBox::new(0.5, 0.5, w, h),
            score,
            text_score,
        }
    }

    #[test]
    fn test_filter_drops_below_box_threshold() {
        let kept = filter_candidates(
            vec![candidate("sign", 0.36, 0.9, 0.1, 0.1)],
            &FilterConfig::default(),
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn test_filter_keeps_at_box_threshold() {
        let kept = filter_candidates(
            vec![candidate("sign", 0.37, 0.9, 0.1, 0.1)],
            &FilterConfig::default(),
        );
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn test_filter_drops_oversized_boxes() {
        // 0.6 * 0.5 = 0.30 > 0.25
        let kept = filter_candidates(
            vec![candidate("sign", 0.9, 0.9, 0.6, 0.5)],
            &FilterConfig::default(),
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn test_filter_drops_weak_phrase_match() {
        let kept = filter_candidates(
            vec![candidate("sign", 0.9, 0.24, 0.1, 0.1)],
            &FilterConfig::default(),
        );
        assert!(kept.is_empty());
    }

    #[test]
    fn test_filter_keeps_best_per_phrase() {
        let kept = filter_candidates(
            vec![
                candidate("sign", 0.60, 0.9, 0.1, 0.1),
                candidate("sign", 0.85, 0.9, 0.12, 0.1),
                candidate("sign", 0.41, 0.9, 0.05, 0.1),
            ],
            &FilterConfig::default(),
        );
        assert_eq!(kept.len(), 1);
        assert!((kept["sign"].score - 0.85).abs() < 1e-6);
    }

    #[test]
    fn test_filter_drops_invalid_boxes() {
        let mut bad = candidate("sign", 0.9, 0.9, 0.1, 0.1);
        bad.bbox = NormalizedBox::new(1.3, 0.5, 0.1, 0.1);
        let kept = filter_candidates(vec![bad], &FilterConfig::default());
        assert!(kept.is_empty());
    }

    #[test]
    fn test_filter_invariants_hold_for_survivors() {
        let config = FilterConfig::default();
        let candidates = vec![
            candidate("a", 0.2, 0.9, 0.1, 0.1),
            candidate("b", 0.8, 0.9, 0.9, 0.9),
            candidate("c", 0.5, 0.1, 0.1, 0.1),
            candidate("d", 0.7, 0.6, 0.3, 0.2),
            candidate("d", 0.9, 0.6, 0.2, 0.2),
        ];

        let kept = filter_candidates(candidates, &config);
        for scored in kept.values() {
            assert!(scored.score >= config.box_threshold);
            assert!(scored.bbox.area() <= config.max_area_frac);
        }
        assert_eq!(kept.len(), 1); // only "d" survives, once
    }

    struct StaticDetector {
        candidates: Vec<RawCandidate>,
    }

    #[async_trait]
    impl OpenVocabDetector for StaticDetector {
        async fn detect_raw(
            &self,
            _image: &[u8],
            _phrases: &[String],
        ) -> Result<Vec<RawCandidate>, PipelineError> {
            Ok(self.candidates.clone())
        }
    }

    #[tokio::test]
    async fn test_detect_empty_result_is_not_an_error() {
        let detector = CueDetector::new(
            Arc::new(StaticDetector { candidates: vec![] }),
            FilterConfig::default(),
        );
        let bundle = detector
            .detect(&[1, 2, 3], &["street name sign".to_string()])
            .await
            .unwrap();
        assert!(bundle.is_empty());
        assert_eq!(bundle.reference_image, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_detect_skips_call_for_empty_phrase_set() {
        struct PanicDetector;

        #[async_trait]
        impl OpenVocabDetector for PanicDetector {
            async fn detect_raw(
                &self,
                _image: &[u8],
                _phrases: &[String],
            ) -> Result<Vec<RawCandidate>, PipelineError> {
                panic!("should not be called");
            }
        }

        let detector = CueDetector::new(Arc::new(PanicDetector), FilterConfig::default());
        let bundle = detector.detect(&[0u8; 4], &[]).await.unwrap();
        assert!(bundle.is_empty());
    }

    #[test]
    fn test_detect_request_serializes_image_as_base64() {
        let phrases = vec!["sign".to_string()];
        let request = DetectRequest { image: vec![1, 2, 3], phrases: &phrases };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["image"], "AQID");
        assert_eq!(json["phrases"][0], "sign");
    }

    #[test]
    fn test_detect_response_deserialization() {
        let json = r#"{
            "candidates": [
                {"phrase": "street name sign", "box": [0.4, 0.3, 0.1, 0.05],
                 "score": 0.81, "text_score": 0.62}
            ]
        }"#;
        let response: DetectResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.candidates.len(), 1);
        assert_eq!(response.candidates[0].phrase, "street name sign");
    }
}
