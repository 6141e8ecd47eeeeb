//! Administrative triggers that push a connected reader into another state.

use axum::{
    Json,
    extract::{Path, State},
};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::domain::models::{CardId, ReaderId, UserId};
use crate::server::{AppState, errors::AppError};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollNfcCardRequest {
    pub reader_id: ReaderId,
    pub user_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetNfcCardRequest {
    pub reader_id: ReaderId,
    pub user_id: UserId,
    pub card_id: CardId,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TriggerResponse {
    pub message: String,
}

impl TriggerResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

#[instrument(skip(state))]
pub async fn enroll_nfc_card(
    State(state): State<AppState>,
    Json(request): Json<EnrollNfcCardRequest>,
) -> Result<Json<TriggerResponse>, AppError> {
    state
        .gateway
        .start_enrollment(request.reader_id, request.user_id)
        .await?;
    Ok(TriggerResponse::new("Enrollment started"))
}

#[instrument(skip(state))]
pub async fn reset_nfc_card(
    State(state): State<AppState>,
    Json(request): Json<ResetNfcCardRequest>,
) -> Result<Json<TriggerResponse>, AppError> {
    state
        .gateway
        .start_reset(request.reader_id, request.user_id, request.card_id)
        .await?;
    Ok(TriggerResponse::new("Reset started"))
}

#[instrument(skip(state))]
pub async fn restart_reader(
    State(state): State<AppState>,
    Path(reader_id): Path<ReaderId>,
) -> Result<Json<TriggerResponse>, AppError> {
    state.gateway.restart_reader(reader_id).await?;
    Ok(TriggerResponse::new("Reader restarted"))
}
