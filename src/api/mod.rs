// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! HTTP surface for the privacy-scrub pipeline. The transport layer is a
//! thin collaborator; all decisions live in the geo, mask, and pii modules.

pub mod errors;
pub mod http_server;
pub mod types;

pub use errors::{ApiError, ErrorResponse};
pub use http_server::{build_router, start_server, AppState};
pub use types::{
    MaskImageRequest, MaskImageResponse, ScanImageResponse, ScanTextRequest, ScanTextResponse,
};
