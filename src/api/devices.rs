use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use tracing::info;

use super::AppState;
use crate::{
    models::{Device, DeviceListQuery, DeviceUpdate},
    Result, TelemetryError,
};

pub async fn create_device(
    State(state): State<AppState>,
    payload: std::result::Result<Json<Device>, JsonRejection>,
) -> Result<Json<Device>> {
    let Json(device) = payload.map_err(bad_body)?;
    info!(device_id = %device.device_id, "Creating device");

    let device = state.registry.create(device).await?;
    Ok(Json(device))
}

pub async fn read_devices(
    State(state): State<AppState>,
    Query(params): Query<DeviceListQuery>,
) -> Result<Json<Vec<Device>>> {
    let devices = match params.device_id {
        Some(device_id) => vec![state.registry.get(&device_id).await?],
        None => state.registry.list(params.offset, params.limit).await?,
    };
    Ok(Json(devices))
}

pub async fn update_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    payload: std::result::Result<Json<DeviceUpdate>, JsonRejection>,
) -> Result<Json<Device>> {
    let Json(update) = payload.map_err(bad_body)?;
    info!(%device_id, "Updating device");

    let device = state.registry.update(&device_id, update).await?;
    Ok(Json(device))
}

pub async fn delete_device(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<Json<Value>> {
    info!(%device_id, "Deleting device");
    state.registry.delete(&device_id).await?;
    Ok(Json(json!({ "ok": true })))
}

fn bad_body(rejection: JsonRejection) -> TelemetryError {
    TelemetryError::BadRequest(rejection.body_text())
}
