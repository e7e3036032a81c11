// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geo::types::PipelineError;
use crate::imaging::ImageError;

/// JSON error envelope returned by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorResponse {
    pub error_type: String,
    pub message: String,
    pub request_id: Option<String>,
    /// Whether the caller may retry the same request
    pub retryable: bool,
}

#[derive(Debug, Clone)]
pub enum ApiError {
    NotFound(String),
    InvalidRequest(String),
    /// External model/service failed after retries; retryable
    ServiceUnavailable(String),
    /// External model violated its response contract; not retryable
    UpstreamContract(String),
    InternalError(String),
}

impl ApiError {
    pub fn to_response(&self, request_id: Option<String>) -> ErrorResponse {
        let (error_type, message, retryable) = match self {
            ApiError::NotFound(msg) => ("not_found", msg.clone(), false),
            ApiError::InvalidRequest(msg) => ("invalid_request", msg.clone(), false),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg.clone(), true),
            ApiError::UpstreamContract(msg) => ("upstream_contract", msg.clone(), false),
            ApiError::InternalError(msg) => ("internal_error", msg.clone(), false),
        };

        ErrorResponse {
            error_type: error_type.to_string(),
            message,
            request_id,
            retryable,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::NotFound(_) => 404,
            ApiError::InvalidRequest(_) => 400,
            ApiError::ServiceUnavailable(_) => 503,
            ApiError::UpstreamContract(_) => 502,
            ApiError::InternalError(_) => 500,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match &e {
            PipelineError::UpstreamUnavailable { .. } => {
                ApiError::ServiceUnavailable(e.to_string())
            }
            PipelineError::MalformedResponse { .. } => ApiError::UpstreamContract(e.to_string()),
            PipelineError::Validation { .. } => ApiError::InvalidRequest(e.to_string()),
        }
    }
}

impl From<ImageError> for ApiError {
    fn from(e: ImageError) -> Self {
        ApiError::InvalidRequest(e.to_string())
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            ApiError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            ApiError::UpstreamContract(msg) => write!(f, "Upstream contract violation: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}
