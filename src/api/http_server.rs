use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::{collections::BTreeMap, net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::errors::ApiError;
use super::types::{
    MaskImageRequest, MaskImageResponse, ScanImageResponse, ScanTextRequest, ScanTextResponse,
};
use crate::geo::orchestrator::CueOrchestrator;
use crate::mask::MaskingEngine;
use crate::pii::PiiResolver;

/// Uploads are bounded to the pipeline's own image size cap plus headroom
const MAX_UPLOAD_BYTES: usize = 12 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<CueOrchestrator>,
    pub masking: Arc<MaskingEngine>,
    pub pii: Arc<PiiResolver>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<CueOrchestrator>,
        masking: Arc<MaskingEngine>,
        pii: Arc<PiiResolver>,
    ) -> Self {
        Self { orchestrator, masking, pii }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/api/health", get(health_handler))
        // Image scan: hypothesis + cue detection + best-effort geocode
        .route("/api/scan/image", post(scan_image_handler))
        // Text scan: PII detection + redaction
        .route("/api/scan/text", post(scan_text_handler))
        // Masking of caller-selected boxes
        .route("/api/mask/image", post(mask_image_handler))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

pub async fn start_server(
    state: AppState,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_handler() -> StatusCode {
    StatusCode::OK
}

async fn scan_image_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<ScanImageResponse>, ApiErrorResponse> {
    let mut image: Option<Vec<u8>> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidRequest(format!("bad multipart payload: {}", e)))?
    {
        if field.name() == Some("image") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::InvalidRequest(format!("unreadable image field: {}", e)))?;
            image = Some(bytes.to_vec());
        }
    }

    let image = image
        .ok_or_else(|| ApiError::InvalidRequest("multipart field 'image' is required".into()))?;

    let (location_guess, detections) = state.orchestrator.run(&image).await?;
    Ok(Json(ScanImageResponse { location_guess, detections }))
}

async fn scan_text_handler(
    State(state): State<AppState>,
    Json(request): Json<ScanTextRequest>,
) -> Result<Json<ScanTextResponse>, ApiErrorResponse> {
    let text = request.text.trim().to_string();
    if text.is_empty() {
        return Err(ApiError::InvalidRequest("text input is required".into()).into());
    }

    // Regex + NER are CPU-bound; keep them off the async executor
    let pii = Arc::clone(&state.pii);
    let (redacted_text, report) = tokio::task::spawn_blocking(move || {
        let report = pii.scan(&text);
        let redacted = pii.redact(&text, &report);
        (redacted, report)
    })
    .await
    .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(Json(ScanTextResponse { redacted_text, report }))
}

async fn mask_image_handler(
    State(state): State<AppState>,
    Json(request): Json<MaskImageRequest>,
) -> Result<Json<MaskImageResponse>, ApiErrorResponse> {
    let selected: BTreeMap<_, _> = request
        .selected
        .into_iter()
        .map(|(phrase, scored)| (phrase, scored.bbox))
        .collect();

    let masking = Arc::clone(&state.masking);
    let masked_image = tokio::task::spawn_blocking(move || {
        masking.mask(&request.reference_image, &selected)
    })
    .await
    .map_err(|e| ApiError::InternalError(e.to_string()))??;

    Ok(Json(MaskImageResponse { masked_image }))
}

// Error response wrapper
pub struct ApiErrorResponse(ApiError);

impl<E: Into<ApiError>> From<E> for ApiErrorResponse {
    fn from(e: E) -> Self {
        Self(e.into())
    }
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let request_id = Uuid::new_v4().to_string();
        tracing::warn!("request {} failed: {}", request_id, self.0);
        let body = self.0.to_response(Some(request_id));

        (status, Json(body)).into_response()
    }
}
