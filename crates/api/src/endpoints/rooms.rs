//! Room endpoints.

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    response::Response,
    routing::{get, post},
};
use roomsvc_common::AppResult;
use roomsvc_core::{RoomInput, RoomQuery, RoomView};
use serde::Deserialize;

use crate::{
    extractors::{Ctx, parse_badge, parse_badge_list},
    middleware::AppState,
    response::{API_PREFIX, created, no_content},
};

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    occupant_ids: Option<String>,
    min_size: Option<u32>,
    max_size: Option<i64>,
}

async fn list(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> AppResult<Json<Vec<RoomView>>> {
    let Query(params) = params?;
    let defaults = RoomQuery::default();
    let query = RoomQuery {
        occupant_ids: parse_badge_list(params.occupant_ids.as_deref())?,
        min_size: params.min_size.unwrap_or(defaults.min_size),
        max_size: params.max_size.unwrap_or(defaults.max_size),
    };

    let rooms = state.room_service.list_rooms(&ctx, query).await?;
    Ok(Json(rooms))
}

async fn create(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    input: Result<Json<RoomInput>, JsonRejection>,
) -> AppResult<Response> {
    let Json(input) = input?;
    let id = state.room_service.create_room(&ctx, input).await?;
    Ok(created(format!("{API_PREFIX}/rooms/{id}")))
}

async fn my(Ctx(ctx): Ctx, State(state): State<AppState>) -> AppResult<Json<RoomView>> {
    let room = state.room_service.get_my_room(&ctx).await?;
    Ok(Json(room))
}

async fn show(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> AppResult<Json<RoomView>> {
    let Path(id) = id?;
    let room = state.room_service.get_room(&ctx, &id).await?;
    Ok(Json(room))
}

async fn update(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    input: Result<Json<RoomInput>, JsonRejection>,
) -> AppResult<Response> {
    let Path(id) = id?;
    let Json(input) = input?;
    state.room_service.update_room(&ctx, &id, input).await?;
    Ok(no_content())
}

async fn delete(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> AppResult<Response> {
    let Path(id) = id?;
    state.room_service.delete_room(&ctx, &id).await?;
    Ok(no_content())
}

async fn add_occupant(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> AppResult<Response> {
    let Path((id, badge)) = path?;
    let badge = parse_badge(&badge)?;
    state.room_service.add_occupant(&ctx, &id, badge).await?;
    Ok(no_content())
}

async fn remove_occupant(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> AppResult<Response> {
    let Path((id, badge)) = path?;
    let badge = parse_badge(&badge)?;
    state.room_service.remove_occupant(&ctx, &id, badge).await?;
    Ok(no_content())
}

/// Create the rooms router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/my", get(my))
        .route("/{id}", get(show).put(update).delete(delete))
        .route(
            "/{id}/occupants/{badge}",
            post(add_occupant).delete(remove_occupant),
        )
}
