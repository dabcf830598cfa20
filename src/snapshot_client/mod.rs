//! SnapshotClient - Snapshot Source Adapter
//!
//! ## Responsibilities
//!
//! - Pull still JPEG frames from the snapshot source, one per request
//! - Camera discovery via the source's stream listing
//!
//! The source is an external collaborator; every call has a bounded timeout
//! and failures surface as recoverable errors.

use crate::error::{Error, Result};
use std::time::Duration;

/// Default per-request timeout for frame fetches
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// SnapshotClient instance
pub struct SnapshotClient {
    client: reqwest::Client,
    base_url: String,
}

impl SnapshotClient {
    /// Create new SnapshotClient
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, base_url }
    }

    /// Fetch one JPEG frame for a camera.
    pub async fn fetch_frame(&self, camera_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/api/frame.jpeg?src={}", self.base_url, camera_id);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "snapshot source returned {} for camera {}",
                resp.status(),
                camera_id
            )));
        }

        let bytes = resp.bytes().await?;
        if bytes.is_empty() {
            return Err(Error::Internal(format!(
                "snapshot source returned empty frame for camera {}",
                camera_id
            )));
        }

        tracing::debug!(
            camera_id = %camera_id,
            size = bytes.len(),
            "Snapshot fetched"
        );

        Ok(bytes.to_vec())
    }

    /// Discover camera ids from the source's stream listing.
    pub async fn list_cameras(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/streams", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "snapshot source streams API returned {}",
                resp.status()
            )));
        }

        let streams: serde_json::Value = resp.json().await?;
        let mut cameras: Vec<String> = streams
            .as_object()
            .map(|obj| obj.keys().cloned().collect())
            .unwrap_or_default();
        cameras.sort();

        Ok(cameras)
    }

    /// Fetch an arbitrary image URL (used by stream analysis requests).
    pub async fn fetch_url(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            return Err(Error::Internal(format!(
                "stream fetch returned {}",
                resp.status()
            )));
        }
        let bytes = resp.bytes().await?;
        Ok(bytes.to_vec())
    }
}
