// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Masking engine: metadata-stripping re-encode plus adaptive region
//! pixelation over caller-selected boxes.

pub mod pixelate;

use std::collections::BTreeMap;

use tracing::debug;

use crate::geo::types::{NormalizedBox, PipelineError, Stage};
use crate::imaging;

pub use pixelate::{adaptive_block_edge, pixelate_region};

/// Masking tunables
#[derive(Debug, Clone)]
pub struct MaskConfig {
    /// Floor for the adaptive pixelation block edge. Guarantees a minimum
    /// anti-recovery strength even on small boxes.
    pub min_block_px: u32,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self { min_block_px: 12 }
    }
}

/// Applies the strip-then-pixelate masking pass.
pub struct MaskingEngine {
    config: MaskConfig,
}

impl MaskingEngine {
    pub fn new(config: MaskConfig) -> Self {
        Self { config }
    }

    /// Mask the selected regions of the image.
    ///
    /// Metadata stripping happens before pixelation: stripping after would
    /// leave a window where an identifiable buffer still carries metadata
    /// if the scrub is skipped on error. Boxes are rescaled against the
    /// image actually being masked (which may differ from the detection
    /// reference frame) and clamped to its bounds before any pixel is
    /// touched.
    pub fn mask(
        &self,
        image_bytes: &[u8],
        selected: &BTreeMap<String, NormalizedBox>,
    ) -> Result<Vec<u8>, PipelineError> {
        for (phrase, bbox) in selected {
            if !bbox.is_valid() {
                return Err(PipelineError::validation(format!(
                    "box for '{}' violates normalized-box invariants",
                    phrase
                )));
            }
        }

        let stripped = imaging::strip_metadata(image_bytes)
            .map_err(|e| PipelineError::validation(e.to_string()))?;

        if selected.is_empty() {
            return Ok(stripped);
        }

        let (img, info) = imaging::decode_image_bytes(&stripped)
            .map_err(|e| PipelineError::validation(e.to_string()))?;
        let mut pixels = img.to_rgb8();

        for (phrase, bbox) in selected {
            match bbox.to_pixel_rect(info.width, info.height) {
                Some(rect) => {
                    let edge = adaptive_block_edge(&rect, self.config.min_block_px);
                    debug!(
                        "masking '{}': {}x{} region, block edge {}",
                        phrase,
                        rect.width(),
                        rect.height(),
                        edge
                    );
                    pixelate_region(&mut pixels, rect, self.config.min_block_px);
                }
                None => {
                    debug!("box for '{}' clamps to an empty region, skipping", phrase);
                }
            }
        }

        imaging::encode_jpeg(&image::DynamicImage::ImageRgb8(pixels))
            .map_err(|e| PipelineError::upstream(Stage::Masking, e.to_string()))
    }
}
