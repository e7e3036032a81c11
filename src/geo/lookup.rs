// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Best-effort gazetteer lookup, throttled process-wide.
//!
//! The external service's rate policy is a strict minimum gap between
//! calls, so the throttle is a single shared last-call timestamp behind a
//! lock rather than a windowed quota. A gated call degrades to `None`
//! immediately; geocoding must never block or fail the pipeline.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use super::types::Coordinates;

/// Capability interface for the gazetteer lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Resolve a query string to coordinates, or `None` on miss/throttle.
    async fn resolve(&self, query: &str) -> Option<Coordinates>;
}

/// Process-wide minimum-interval gate over the external lookup.
///
/// Shared across all concurrent requests; the lock serializes access to the
/// last-call timestamp for the process lifetime.
pub struct GeocodeThrottle {
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl GeocodeThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last_call: Mutex::new(None) }
    }

    /// Claim a call slot. Returns `false` without blocking when the minimum
    /// interval since the previous claim has not elapsed.
    pub fn try_acquire(&self) -> bool {
        let mut last = self.last_call.lock().unwrap();
        let now = Instant::now();
        match *last {
            Some(prev) if now.duration_since(prev) < self.min_interval => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
}

/// Nominatim-style gazetteer client
pub struct NominatimClient {
    client: Client,
    endpoint: String,
    throttle: Arc<GeocodeThrottle>,
}

/// The lookup service requires an identifying agent header.
const LOOKUP_USER_AGENT: &str = "geoprivacy-node/0.1";

impl NominatimClient {
    pub fn new(endpoint: &str, throttle: Arc<GeocodeThrottle>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(LOOKUP_USER_AGENT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            throttle,
        }
    }
}

#[async_trait]
impl Geocoder for NominatimClient {
    async fn resolve(&self, query: &str) -> Option<Coordinates> {
        if query.trim().is_empty() {
            return None;
        }
        if !self.throttle.try_acquire() {
            debug!("geocode lookup throttled for query '{}'", query);
            return None;
        }

        let response = match self
            .client
            .get(format!("{}/search", self.endpoint))
            .query(&[("q", query), ("format", "json"), ("limit", "1")])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("geocode lookup failed for '{}': {}", query, e);
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("geocode lookup returned {} for '{}'", response.status(), query);
            return None;
        }

        let places: Vec<NominatimPlace> = match response.json().await {
            Ok(places) => places,
            Err(e) => {
                warn!("geocode lookup payload undecodable: {}", e);
                return None;
            }
        };

        let place = places.first()?;
        let lat: f64 = place.lat.parse().ok()?;
        let lon: f64 = place.lon.parse().ok()?;
        if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
            warn!("geocode lookup returned out-of-range coordinates for '{}'", query);
            return None;
        }

        Some(Coordinates { lat, lon })
    }
}
