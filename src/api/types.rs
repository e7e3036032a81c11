// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Request and response shapes for the HTTP surface

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::geo::types::{base64_bytes, DetectionBundle, LocationGuess, ScoredBox};
use crate::pii::RedactionReport;

/// `POST /api/scan/image` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanImageResponse {
    pub location_guess: LocationGuess,
    pub detections: DetectionBundle,
}

/// `POST /api/scan/text` request
#[derive(Debug, Clone, Deserialize)]
pub struct ScanTextRequest {
    pub text: String,
}

/// `POST /api/scan/text` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanTextResponse {
    pub redacted_text: String,
    pub report: RedactionReport,
}

/// `POST /api/mask/image` request: the reference frame plus the caller's
/// selection of boxes to pixelate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskImageRequest {
    #[serde(with = "base64_bytes")]
    pub reference_image: Vec<u8>,
    pub selected: BTreeMap<String, ScoredBox>,
}

/// `POST /api/mask/image` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaskImageResponse {
    #[serde(with = "base64_bytes")]
    pub masked_image: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::types::NormalizedBox;

    #[test]
    fn test_mask_request_wire_shape() {
        let json = r#"{
            "reference_image": "AQID",
            "selected": {
                "street name sign": {"box": [0.4, 0.3, 0.1, 0.05], "score": 0.81}
            }
        }"#;
        let request: MaskImageRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.reference_image, vec![1, 2, 3]);
        let scored = &request.selected["street name sign"];
        assert_eq!(scored.bbox, NormalizedBox::new(0.4, 0.3, 0.1, 0.05));
    }

    #[test]
    fn test_mask_response_encodes_base64() {
        let response = MaskImageResponse { masked_image: vec![1, 2, 3] };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["masked_image"], "AQID");
    }

    #[test]
    fn test_scan_text_request_shape() {
        let request: ScanTextRequest =
            serde_json::from_str(r#"{"text": "My SSN is 123-45-6789"}"#).unwrap();
        assert!(request.text.contains("SSN"));
    }
}
