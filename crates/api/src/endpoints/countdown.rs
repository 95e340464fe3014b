//! Countdown endpoint.

use axum::{
    Json,
    extract::{Query, State, rejection::QueryRejection},
};
use roomsvc_common::AppResult;
use roomsvc_core::CountdownView;
use serde::Deserialize;

use crate::{extractors::Ctx, middleware::AppState};

#[derive(Debug, Default, Deserialize)]
pub struct CountdownParams {
    #[serde(rename = "currentTimeIso")]
    current_time_iso: Option<String>,
}

pub async fn countdown(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    params: Result<Query<CountdownParams>, QueryRejection>,
) -> AppResult<Json<CountdownView>> {
    let Query(params) = params?;
    let view = state
        .countdown_service
        .countdown(&ctx, params.current_time_iso.as_deref())?;
    Ok(Json(view))
}
