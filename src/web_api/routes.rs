//! API Routes

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, patch, post},
    Json, Router,
};
use axum::body::Bytes;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;

use crate::analysis::ZoneAnalysis;
use crate::detector::DetectionMode;
use crate::error::{Error, Result};
use crate::event_log::{EventKind, EventQuery, ParkingEvent};
use crate::imaging::{self, GrayPlane};
use crate::realtime_hub::{
    HubMessage, InitialStateMessage, ZoneDeletedMessage, ZoneMessage, ZoneStateSummary,
};
use crate::renderer::{self, ZoneOverlay};
use crate::scheduler::DEFAULT_INTERVAL_MS;
use crate::state::AppState;
use crate::zone_store::{CreateZoneRequest, UpdateZoneRequest, Zone};

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health & detection modes
        .route("/health", get(super::health_check))
        .route("/detection/modes", get(list_detection_modes))
        .route("/detection/mode", get(get_detection_mode))
        .route("/detection/mode", post(set_detection_mode))
        // Zones
        .route("/zones", get(list_zones))
        .route("/zones", post(create_zone))
        .route("/zones/:id", get(get_zone))
        .route("/zones/:id", patch(update_zone))
        .route("/zones/:id", delete(delete_zone))
        .route("/zones/:id/count", get(zone_count))
        .route("/zones/:id/history", get(zone_history))
        // Analysis
        .route("/analyze", post(analyze))
        .route("/analyze-stream", post(analyze_stream))
        .route("/background", post(set_background))
        .route("/backgrounds/capture-all", post(capture_all_backgrounds))
        // Occupancy & frames
        .route("/occupancy", get(occupancy))
        .route("/frame/:camera_id", get(annotated_frame))
        // Events
        .route("/events", get(list_events))
        .route("/events/stats", get(event_stats))
        // Cameras & scheduler
        .route("/cameras", get(list_cameras))
        .route("/round-robin/start", post(round_robin_start))
        .route("/round-robin/stop", post(round_robin_stop))
        .route("/round-robin/status", get(round_robin_status))
        // Live channel
        .route("/ws", get(ws_attach))
        .with_state(state)
}

// ========================================
// Detection Mode Handlers
// ========================================

async fn list_detection_modes(State(state): State<AppState>) -> impl IntoResponse {
    let current = state.detector.current_mode().await;
    let external_ok = state.detector.external_available().await;

    let modes: Vec<_> = DetectionMode::all()
        .iter()
        .map(|m| {
            json!({
                "mode": m.as_str(),
                "name": m.display_name(),
                "description": m.description(),
                "active": *m == current,
                "available": *m == DetectionMode::Blob || external_ok,
            })
        })
        .collect();

    Json(json!({
        "current_mode": current.as_str(),
        "external_detector_available": external_ok,
        "modes": modes,
    }))
}

async fn get_detection_mode(State(state): State<AppState>) -> impl IntoResponse {
    let mode = state.detector.current_mode().await;
    Json(json!({ "mode": mode.as_str() }))
}

#[derive(Deserialize)]
struct SetModeRequest {
    mode: String,
}

async fn set_detection_mode(
    State(state): State<AppState>,
    Json(req): Json<SetModeRequest>,
) -> Result<impl IntoResponse> {
    let mode: DetectionMode = req.mode.parse()?;
    let applied = state.detector.set_mode(mode).await?;
    Ok(Json(json!({ "mode": applied.as_str() })))
}

// ========================================
// Zone Handlers
// ========================================

async fn list_zones(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let zones = state.zones.list().await?;
    Ok(Json(zones))
}

async fn create_zone(
    State(state): State<AppState>,
    Json(req): Json<CreateZoneRequest>,
) -> Result<impl IntoResponse> {
    let zone = state.zones.create(req).await?;
    state
        .realtime
        .broadcast(HubMessage::ZoneCreated(ZoneMessage { zone: zone.clone() }))
        .await;
    Ok((StatusCode::CREATED, Json(zone)))
}

async fn get_zone(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let zone = state
        .zones
        .get(&id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("zone {}", id)))?;
    Ok(Json(zone))
}

async fn update_zone(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UpdateZoneRequest>,
) -> Result<impl IntoResponse> {
    let zone = state.zones.update(&id, req).await?;
    state
        .realtime
        .broadcast(HubMessage::ZoneUpdated(ZoneMessage { zone: zone.clone() }))
        .await;
    Ok(Json(zone))
}

async fn delete_zone(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let removed = state.zones.delete(&id).await?;
    if !removed {
        return Err(Error::NotFound(format!("zone {}", id)));
    }
    state.occupancy.remove_zone(&id).await;
    state
        .realtime
        .broadcast(HubMessage::ZoneDeleted(ZoneDeletedMessage {
            zone_id: id.clone(),
        }))
        .await;
    Ok(Json(json!({ "deleted": true, "zone_id": id })))
}

async fn zone_count(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse> {
    let zone = state
        .zones
        .get(&id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("zone {}", id)))?;

    let body = match state.occupancy.get(&id).await {
        Some(entry) => json!({
            "zone_id": entry.zone_id,
            "zone_name": entry.zone_name,
            "count": entry.count,
            "alarm": entry.alarm,
            "last_updated": entry.last_updated,
        }),
        None => json!({
            "zone_id": zone.id,
            "zone_name": zone.name,
            "count": 0,
            "alarm": false,
            "last_updated": null,
        }),
    };
    Ok(Json(body))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn zone_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse> {
    if state.zones.get(&id).await?.is_none() {
        return Err(Error::NotFound(format!("zone {}", id)));
    }
    let limit = query.limit.unwrap_or(50).clamp(1, 1000);
    let events = state.event_log.history(&id, limit).await?;
    Ok(Json(json!({ "zone_id": id, "events": events })))
}

// ========================================
// Analysis Handlers
// ========================================

#[derive(Deserialize)]
struct AnalyzeBody {
    image: String,
    zone_ids: Option<Vec<String>>,
    camera_id: Option<String>,
}

#[derive(Deserialize)]
struct AnalyzeQuery {
    camera_id: Option<String>,
    /// Comma-separated zone ids for raw-body requests
    zone_ids: Option<String>,
}

/// Analyze a pushed frame. JSON bodies carry a base64 image; any other
/// content type is treated as the raw image with parameters in the query.
async fn analyze(
    State(state): State<AppState>,
    Query(query): Query<AnalyzeQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let (image, zone_ids, camera_id) = if is_json(&headers) {
        let req: AnalyzeBody =
            serde_json::from_slice(&body).map_err(|e| Error::Validation(e.to_string()))?;
        let image = decode_base64_image(&req.image)?;
        (image, req.zone_ids, req.camera_id)
    } else {
        let zone_ids = query
            .zone_ids
            .map(|s| s.split(',').map(|z| z.trim().to_string()).collect());
        (body.to_vec(), zone_ids, query.camera_id)
    };

    let results = analyze_frame(&state, &image, zone_ids, camera_id).await?;
    Ok(Json(json!({ "results": results })))
}

#[derive(Deserialize)]
struct AnalyzeStreamRequest {
    stream_url: String,
    camera_id: Option<String>,
    zone_ids: Option<Vec<String>>,
}

async fn analyze_stream(
    State(state): State<AppState>,
    Json(req): Json<AnalyzeStreamRequest>,
) -> Result<impl IntoResponse> {
    let image = state.snapshots.fetch_url(&req.stream_url).await?;
    let results = analyze_frame(&state, &image, req.zone_ids, req.camera_id).await?;
    Ok(Json(json!({ "results": results })))
}

/// Shared selection + pipeline flow for the analyze endpoints.
async fn analyze_frame(
    state: &AppState,
    image: &[u8],
    zone_ids: Option<Vec<String>>,
    camera_id: Option<String>,
) -> Result<Vec<ZoneAnalysis>> {
    let frame_gray = imaging::to_gray(image)?;

    let zones: Vec<Zone> = match (&zone_ids, &camera_id) {
        (Some(ids), _) => {
            let mut selected = Vec::with_capacity(ids.len());
            for id in ids {
                let zone = state
                    .zones
                    .get(id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("zone {}", id)))?;
                selected.push(zone);
            }
            selected
        }
        (None, Some(camera)) => state.zones.zones_for_camera_with_unassigned(camera).await,
        (None, None) => state.zones.cached_zones().await,
    };

    let background: Option<GrayPlane> = match &camera_id {
        Some(camera) => state.zones.get_background(camera).await?,
        None => None,
    };

    let mut results = Vec::with_capacity(zones.len());
    for zone in &zones {
        let analysis = state
            .analysis
            .analyze_zone(zone, image, &frame_gray, background.as_ref(), true)
            .await?;
        results.push(analysis);
    }
    Ok(results)
}

#[derive(Deserialize)]
struct BackgroundBody {
    image: String,
    camera_id: String,
}

#[derive(Deserialize)]
struct BackgroundQuery {
    camera_id: Option<String>,
}

/// Set a camera's background frame (JSON base64 or raw image body).
async fn set_background(
    State(state): State<AppState>,
    Query(query): Query<BackgroundQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let (image, camera_id) = if is_json(&headers) {
        let req: BackgroundBody =
            serde_json::from_slice(&body).map_err(|e| Error::Validation(e.to_string()))?;
        (decode_base64_image(&req.image)?, req.camera_id)
    } else {
        let camera_id = query
            .camera_id
            .ok_or_else(|| Error::Validation("camera_id query parameter required".to_string()))?;
        (body.to_vec(), camera_id)
    };

    let plane = imaging::to_gray(&image)?;
    state.zones.save_background(&camera_id, &plane).await?;

    Ok(Json(json!({ "success": true, "camera_id": camera_id })))
}

/// Seed or refresh every discovered camera's background.
async fn capture_all_backgrounds(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let cameras = state.snapshots.list_cameras().await?;
    let alpha = state.config.background_alpha;

    let mut results = Vec::with_capacity(cameras.len());
    for camera_id in cameras {
        let outcome = capture_background(&state, &camera_id, alpha).await;
        match outcome {
            Ok(()) => results.push(json!({ "camera_id": camera_id, "success": true })),
            Err(e) => {
                tracing::warn!(camera_id = %camera_id, error = %e, "Background capture failed");
                results.push(json!({
                    "camera_id": camera_id,
                    "success": false,
                    "error": e.to_string(),
                }));
            }
        }
    }

    Ok(Json(json!({ "results": results })))
}

async fn capture_background(state: &AppState, camera_id: &str, alpha: f64) -> Result<()> {
    let frame = state.snapshots.fetch_frame(camera_id).await?;
    let current = imaging::to_gray(&frame)?;

    let plane = match state.zones.get_background(camera_id).await? {
        Some(existing) if alpha > 0.0 => imaging::running_mean_update(&existing, &current, alpha)?,
        _ => current,
    };
    state.zones.save_background(camera_id, &plane).await
}

// ========================================
// Occupancy & Frame Handlers
// ========================================

async fn occupancy(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.occupancy.snapshot().await)
}

async fn annotated_frame(
    State(state): State<AppState>,
    Path(camera_id): Path<String>,
) -> Result<impl IntoResponse> {
    let jpeg = state.snapshots.fetch_frame(&camera_id).await?;
    let zones = state.zones.zones_for_camera_with_unassigned(&camera_id).await;

    let mut overlays = Vec::with_capacity(zones.len());
    for zone in &zones {
        let entry = state.occupancy.get(&zone.id).await;
        let (count, alarm, blobs) = match entry {
            Some(e) => (e.count, e.alarm, e.blobs),
            None => (0, false, Vec::new()),
        };
        overlays.push(ZoneOverlay {
            polygon: zone.polygon.clone(),
            label: format!("{}: {}", zone.name, count),
            alarm,
            blobs,
        });
    }

    let annotated = renderer::annotate(&jpeg, &overlays)?;
    Ok(([(header::CONTENT_TYPE, "image/jpeg")], annotated))
}

// ========================================
// Event Handlers
// ========================================

#[derive(Deserialize)]
struct EventsQuery {
    limit: Option<i64>,
    offset: Option<i64>,
    zone_id: Option<String>,
    camera_id: Option<String>,
    event_type: Option<String>,
    since: Option<String>,
    until: Option<String>,
}

async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse> {
    let event_type = match query.event_type.as_deref() {
        Some(s) => Some(s.parse::<EventKind>()?),
        None => None,
    };

    let filters = EventQuery {
        limit: query.limit.unwrap_or(100).clamp(1, 1000),
        offset: query.offset.unwrap_or(0).max(0),
        zone_id: query.zone_id,
        camera_id: query.camera_id,
        event_type,
        since: parse_timestamp(query.since.as_deref())?,
        until: parse_timestamp(query.until.as_deref())?,
    };

    let (events, total): (Vec<ParkingEvent>, i64) = state.event_log.query(&filters).await?;
    Ok(Json(json!({ "events": events, "total": total })))
}

#[derive(Deserialize)]
struct StatsQuery {
    since: Option<String>,
}

async fn event_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<impl IntoResponse> {
    let since = parse_timestamp(query.since.as_deref())?;
    let current_occupied = state.occupancy.occupied_count().await;
    let stats = state.event_log.stats(since, current_occupied).await?;
    Ok(Json(stats))
}

// ========================================
// Camera & Scheduler Handlers
// ========================================

async fn list_cameras(State(state): State<AppState>) -> Result<impl IntoResponse> {
    let cameras = state.snapshots.list_cameras().await?;
    Ok(Json(json!({ "cameras": cameras })))
}

#[derive(Deserialize, Default)]
struct StartRequest {
    cameras: Option<Vec<String>>,
    interval_ms: Option<u64>,
}

async fn round_robin_start(
    State(state): State<AppState>,
    body: Option<Json<StartRequest>>,
) -> Result<impl IntoResponse> {
    let req = body.map(|Json(r)| r).unwrap_or_default();

    let cameras = match req.cameras {
        Some(cameras) if !cameras.is_empty() => cameras,
        _ => state.snapshots.list_cameras().await?,
    };
    let interval_ms = req.interval_ms.unwrap_or(DEFAULT_INTERVAL_MS);

    state.scheduler.clone().start(cameras, interval_ms).await;
    Ok(Json(state.scheduler.status().await))
}

async fn round_robin_stop(State(state): State<AppState>) -> impl IntoResponse {
    state.scheduler.stop().await;
    Json(state.scheduler.status().await)
}

async fn round_robin_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.scheduler.status().await)
}

// ========================================
// Live Channel
// ========================================

async fn ws_attach(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (id, mut rx) = state.realtime.register().await;

    // Initial state: every known zone with its current count
    let zones = state.zones.cached_zones().await;
    let mut summaries = Vec::with_capacity(zones.len());
    for zone in &zones {
        let entry = state.occupancy.get(&zone.id).await;
        summaries.push(ZoneStateSummary {
            zone_id: zone.id.clone(),
            zone_name: zone.name.clone(),
            count: entry.as_ref().map(|e| e.count).unwrap_or(0),
            last_updated: entry.map(|e| e.last_updated),
        });
    }
    state
        .realtime
        .send_to(
            &id,
            HubMessage::InitialState(InitialStateMessage { zones: summaries }),
        )
        .await;

    let (mut sender, mut receiver) = socket.split();

    let forward = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if sender.send(Message::Text(msg)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }

    state.realtime.unregister(&id).await;
    forward.abort();
}

// ========================================
// Helpers
// ========================================

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("application/json"))
        .unwrap_or(false)
}

fn decode_base64_image(encoded: &str) -> Result<Vec<u8>> {
    // Data-URL prefixes are tolerated
    let payload = encoded.rsplit(',').next().unwrap_or(encoded);
    base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| Error::Validation(format!("invalid base64 image: {}", e)))
}

fn parse_timestamp(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::Validation(format!("invalid timestamp {:?}: {}", s, e)))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_decoding_tolerates_data_urls() {
        let raw = b"jpegdata";
        let plain = base64::engine::general_purpose::STANDARD.encode(raw);
        assert_eq!(decode_base64_image(&plain).unwrap(), raw);

        let data_url = format!("data:image/jpeg;base64,{}", plain);
        assert_eq!(decode_base64_image(&data_url).unwrap(), raw);

        assert!(decode_base64_image("!!not base64!!").is_err());
    }

    #[test]
    fn timestamps_parse_rfc3339() {
        let parsed = parse_timestamp(Some("2026-08-02T10:00:00Z")).unwrap().unwrap();
        assert_eq!(parsed.timezone(), Utc);
        assert!(parse_timestamp(Some("yesterday")).is_err());
        assert!(parse_timestamp(None).unwrap().is_none());
    }
}
