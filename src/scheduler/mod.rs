//! RoundRobinScheduler - Camera Polling
//!
//! ## Design
//!
//! - One camera per tick, cursor advancing round-robin
//! - Snapshot fetch bounded by the tick interval; failures log and the
//!   cursor still advances
//! - Zones of the current camera are analyzed sequentially; a zone that
//!   errors (dimension mismatch, detector failure) is skipped, not fatal
//! - Optional running-mean background maintenance after each tick
//!
//! `start` while running replaces the configuration: the generation counter
//! bumps and the superseded loop exits at its next check.

use crate::analysis::AnalysisPipeline;
use crate::imaging;
use crate::snapshot_client::SnapshotClient;
use crate::zone_store::ZoneStore;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Default tick interval
pub const DEFAULT_INTERVAL_MS: u64 = 5000;

#[derive(Debug, Default)]
struct SchedulerState {
    enabled: bool,
    cameras: Vec<String>,
    interval_ms: u64,
    cursor: usize,
    generation: u64,
    /// Camera visited by the most recent tick
    last_camera: Option<String>,
}

/// Status snapshot for the admin API
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub enabled: bool,
    pub cameras: Vec<String>,
    pub current_camera: Option<String>,
    pub interval_ms: u64,
}

/// RoundRobinScheduler instance
pub struct RoundRobinScheduler {
    state: Arc<RwLock<SchedulerState>>,
    zones: Arc<ZoneStore>,
    snapshots: Arc<SnapshotClient>,
    pipeline: Arc<AnalysisPipeline>,
    /// Running-mean coefficient for background maintenance (0 disables)
    background_alpha: f64,
}

impl RoundRobinScheduler {
    /// Create new scheduler (stopped)
    pub fn new(
        zones: Arc<ZoneStore>,
        snapshots: Arc<SnapshotClient>,
        pipeline: Arc<AnalysisPipeline>,
        background_alpha: f64,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(SchedulerState::default())),
            zones,
            snapshots,
            pipeline,
            background_alpha,
        }
    }

    /// Replace the configuration and reset the cursor. Returns the new
    /// generation; any loop running an older generation exits.
    async fn apply_config(&self, cameras: Vec<String>, interval_ms: u64) -> u64 {
        let mut st = self.state.write().await;
        st.enabled = true;
        st.cameras = cameras;
        st.interval_ms = interval_ms.max(1);
        st.cursor = 0;
        st.last_camera = None;
        st.generation += 1;
        st.generation
    }

    /// Start (or reconfigure) the polling loop.
    ///
    /// Ticks once immediately, then on the configured interval.
    pub async fn start(self: Arc<Self>, cameras: Vec<String>, interval_ms: u64) {
        let generation = self.apply_config(cameras.clone(), interval_ms).await;

        tracing::info!(
            cameras = ?cameras,
            interval_ms = interval_ms,
            generation = generation,
            "Round-robin scheduler started"
        );

        let this = self;
        tokio::spawn(async move {
            loop {
                {
                    let st = this.state.read().await;
                    if !st.enabled || st.generation != generation {
                        break;
                    }
                }

                this.tick(generation).await;

                let interval_ms = this.state.read().await.interval_ms;
                tokio::time::sleep(Duration::from_millis(interval_ms)).await;
            }
            tracing::info!(generation = generation, "Polling loop stopped");
        });
    }

    /// Halt before the next tick; an in-flight tick completes.
    pub async fn stop(&self) {
        let mut st = self.state.write().await;
        st.enabled = false;
        tracing::info!("Round-robin scheduler stopping");
    }

    /// Status snapshot.
    pub async fn status(&self) -> SchedulerStatus {
        let st = self.state.read().await;
        SchedulerStatus {
            enabled: st.enabled,
            cameras: st.cameras.clone(),
            current_camera: st.last_camera.clone(),
            interval_ms: st.interval_ms,
        }
    }

    /// One tick: analyze the camera at the cursor, then advance.
    async fn tick(&self, generation: u64) {
        let (camera, interval_ms) = {
            let st = self.state.read().await;
            if !st.enabled || st.generation != generation || st.cameras.is_empty() {
                return;
            }
            (st.cameras[st.cursor % st.cameras.len()].clone(), st.interval_ms)
        };

        if let Err(e) = self.poll_camera(&camera, interval_ms).await {
            tracing::warn!(camera_id = %camera, error = %e, "Tick failed for camera");
        }

        // The cursor advances whether or not the tick's work succeeded.
        let mut st = self.state.write().await;
        if st.generation == generation && !st.cameras.is_empty() {
            st.cursor = (st.cursor + 1) % st.cameras.len();
            st.last_camera = Some(camera);
        }
    }

    /// Fetch one frame and run every zone of the camera through the
    /// analysis pipeline.
    async fn poll_camera(&self, camera: &str, interval_ms: u64) -> crate::error::Result<()> {
        let frame_jpeg = match tokio::time::timeout(
            Duration::from_millis(interval_ms),
            self.snapshots.fetch_frame(camera),
        )
        .await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(crate::error::Error::Internal(format!(
                    "snapshot fetch timeout ({}ms) for camera {}",
                    interval_ms, camera
                )))
            }
        };

        let frame_gray = imaging::to_gray(&frame_jpeg)?;

        let zones = self.zones.zones_for_camera(camera).await;
        let background = match self.zones.get_background(camera).await {
            Ok(bg) => bg,
            Err(e) => {
                tracing::warn!(camera_id = %camera, error = %e, "Background load failed");
                None
            }
        };

        for zone in &zones {
            match self
                .pipeline
                .analyze_zone(zone, &frame_jpeg, &frame_gray, background.as_ref(), false)
                .await
            {
                Ok(analysis) => {
                    tracing::debug!(
                        camera_id = %camera,
                        zone_id = %zone.id,
                        count = analysis.count,
                        alarm = analysis.alarm,
                        inference_ms = analysis.inference_ms,
                        "Zone analyzed"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        camera_id = %camera,
                        zone_id = %zone.id,
                        error = %e,
                        "Zone analysis skipped"
                    );
                }
            }
        }

        self.maintain_background(camera, &frame_gray, background).await;

        Ok(())
    }

    /// Keep the camera's background tracking the scene with a running mean.
    async fn maintain_background(
        &self,
        camera: &str,
        frame_gray: &imaging::GrayPlane,
        background: Option<imaging::GrayPlane>,
    ) {
        if self.background_alpha <= 0.0 {
            return;
        }

        let updated = match background {
            Some(bg) => match imaging::running_mean_update(&bg, frame_gray, self.background_alpha) {
                Ok(plane) => plane,
                Err(e) => {
                    tracing::warn!(
                        camera_id = %camera,
                        error = %e,
                        "Background update skipped"
                    );
                    return;
                }
            },
            // First frame seeds the background without averaging
            None => frame_gray.clone(),
        };

        if let Err(e) = self.zones.save_background(camera, &updated).await {
            tracing::warn!(camera_id = %camera, error = %e, "Background save failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectorEngine;
    use crate::event_log::EventLogService;
    use crate::occupancy::OccupancyTracker;
    use crate::realtime_hub::RealtimeHub;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn scheduler() -> Arc<RoundRobinScheduler> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_schema(&pool).await.unwrap();

        let hub = Arc::new(RealtimeHub::new());
        let zones = Arc::new(ZoneStore::new(pool.clone()).await.unwrap());
        let detector = Arc::new(DetectorEngine::new(
            "http://127.0.0.1:9".to_string(),
            hub.clone(),
        ));
        let occupancy = Arc::new(OccupancyTracker::new());
        let event_log = Arc::new(EventLogService::new(pool.clone(), hub.clone()));
        let pipeline = Arc::new(AnalysisPipeline::new(
            detector,
            occupancy,
            event_log,
            hub.clone(),
        ));
        // Port 9 (discard) refuses connections, so every fetch fails fast;
        // cursor behavior is what these tests observe.
        let snapshots = Arc::new(SnapshotClient::new("http://127.0.0.1:9".to_string()));
        Arc::new(RoundRobinScheduler::new(zones, snapshots, pipeline, 0.0))
    }

    #[tokio::test]
    async fn cursor_wraps_round_robin() {
        let s = scheduler().await;
        let generation = s
            .apply_config(vec!["a".into(), "b".into(), "c".into()], 200)
            .await;

        for _ in 0..7 {
            s.tick(generation).await;
        }

        let status = s.status().await;
        // Ticks visit a,b,c,a,b,c,a; the 8th would visit b
        assert_eq!(status.current_camera.as_deref(), Some("a"));
        assert_eq!(s.state.read().await.cursor, 1);
    }

    #[tokio::test]
    async fn tick_is_noop_when_stopped() {
        let s = scheduler().await;
        let generation = s
            .apply_config(vec!["a".into(), "b".into()], 200)
            .await;
        s.stop().await;

        s.tick(generation).await;
        assert_eq!(s.status().await.current_camera, None);
        assert_eq!(s.state.read().await.cursor, 0);
    }

    #[tokio::test]
    async fn tick_is_noop_with_empty_camera_list() {
        let s = scheduler().await;
        let generation = s.apply_config(vec![], 200).await;
        s.tick(generation).await;
        assert_eq!(s.status().await.current_camera, None);
    }

    #[tokio::test]
    async fn stale_generation_does_not_advance() {
        let s = scheduler().await;
        let old = s.apply_config(vec!["a".into()], 200).await;
        let _new = s.apply_config(vec!["x".into(), "y".into()], 200).await;

        s.tick(old).await;
        assert_eq!(s.status().await.current_camera, None);
        assert_eq!(s.state.read().await.cursor, 0);
    }
}
