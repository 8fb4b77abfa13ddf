//! Class lifecycle, admission and replay over HTTP.

use axum::{
    extract::{rejection::JsonRejection, Extension, Json, Path},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::{
    admission::{AdmitOutcome, Admission},
    error::{bad, not_found, AppResult},
    models::{Room, RoomEvent},
    replay,
    store::RoomStore,
};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateInput {
    name: Option<String>,
    #[serde(alias = "capacity")]
    max_participants: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreatedJson {
    message: &'static str,
    class_id: String,
}

#[derive(Deserialize)]
struct IdentityInput {
    identity: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JoinJson {
    admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<usize>,
    message: String,
}

#[derive(Serialize)]
struct MessageJson {
    message: &'static str,
}

pub fn router() -> Router {
    Router::new()
        .route("/classes", post(create_class))
        .route("/classes/:id", get(get_class))
        .route("/classes/:id/join", post(join_class))
        .route("/classes/:id/leave", post(leave_class))
        .route("/classes/:id/start", post(start_class))
        .route("/classes/:id/stop", post(stop_class))
        .route("/classes/:id/events", get(class_events))
}

/* ---------------- Create ---------------- */
#[instrument(skip_all)]
async fn create_class(
    Extension(store): Extension<RoomStore>,
    payload: Result<Json<CreateInput>, JsonRejection>,
) -> AppResult<(StatusCode, Json<CreatedJson>)> {
    let Json(p) = payload.map_err(bad)?;
    let name = p.name.as_deref().map(str::trim).unwrap_or_default();
    let max = match (name.is_empty(), p.max_participants) {
        (false, Some(max)) => max,
        _ => return Err(bad("name and maxParticipants are required")),
    };
    let capacity = u32::try_from(max)
        .ok()
        .filter(|c| *c > 0)
        .ok_or_else(|| bad("maxParticipants must be a positive integer"))?;

    let room = store.create_room(name, capacity).await?;
    info!(room_id = %room.id, capacity, "class created");
    Ok((
        StatusCode::CREATED,
        Json(CreatedJson { message: "Class created", class_id: room.id }),
    ))
}

/* ---------------- Snapshot ---------------- */
async fn get_class(
    Extension(store): Extension<RoomStore>,
    Path(id): Path<String>,
) -> AppResult<Json<Room>> {
    store
        .find_room(&id)
        .await?
        .map(Json)
        .ok_or_else(|| not_found("class not found"))
}

/* ---------------- Join / Leave ---------------- */
async fn join_class(
    Extension(admission): Extension<Admission>,
    Path(id): Path<String>,
    payload: Result<Json<IdentityInput>, JsonRejection>,
) -> AppResult<Json<JoinJson>> {
    let Json(p) = payload.map_err(bad)?;
    let identity = p.identity.unwrap_or_default();

    let body = match admission.admit(&id, &identity).await? {
        AdmitOutcome::Admitted(cred) => JoinJson {
            admitted: true,
            credential: Some(cred.token),
            expires_at: Some(cred.expires_at),
            position: None,
            message: "Joined class".into(),
        },
        AdmitOutcome::Waitlisted { position } => JoinJson {
            admitted: false,
            credential: None,
            expires_at: None,
            position: Some(position),
            message: format!("Class is full, you are number {position} on the waitlist"),
        },
    };
    Ok(Json(body))
}

async fn leave_class(
    Extension(admission): Extension<Admission>,
    Path(id): Path<String>,
    payload: Result<Json<IdentityInput>, JsonRejection>,
) -> AppResult<Json<MessageJson>> {
    let Json(p) = payload.map_err(bad)?;
    admission.leave(&id, &p.identity.unwrap_or_default()).await?;
    Ok(Json(MessageJson { message: "Left class" }))
}

/* ---------------- Start / Stop ---------------- */
async fn start_class(
    Extension(store): Extension<RoomStore>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageJson>> {
    store.set_active(&id, true).await?;
    info!(room_id = %id, "class started");
    Ok(Json(MessageJson { message: "Class started" }))
}

async fn stop_class(
    Extension(store): Extension<RoomStore>,
    Path(id): Path<String>,
) -> AppResult<Json<MessageJson>> {
    store.set_active(&id, false).await?;
    info!(room_id = %id, "class stopped");
    Ok(Json(MessageJson { message: "Class stopped" }))
}

/* ---------------- Replay ---------------- */
async fn class_events(
    Extension(store): Extension<RoomStore>,
    Path(id): Path<String>,
) -> AppResult<Json<Vec<RoomEvent>>> {
    replay::replay(&store, &id).await.map(Json)
}
