//! Group endpoints.

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
use roomsvc_core::{AddMemberOptions, GroupInput, GroupQuery, GroupView};
use serde::Deserialize;

use crate::{
    extractors::{Ctx, parse_badge, parse_badge_list},
    middleware::AppState,
    response::{API_PREFIX, created, no_content, no_content_at},
};

// ==================== Request Types ====================

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    member_ids: Option<String>,
    min_size: Option<u32>,
    max_size: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AddMemberParams {
    nickname: Option<String>,
    code: Option<String>,
    force: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RemoveMemberParams {
    autodeny: Option<bool>,
}

fn group_location(id: &str) -> String {
    format!("{API_PREFIX}/groups/{id}")
}

// ==================== Handlers ====================

async fn list(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> AppResult<Json<Vec<GroupView>>> {
    let Query(params) = params?;
    let defaults = GroupQuery::default();
    let query = GroupQuery {
        member_ids: parse_badge_list(params.member_ids.as_deref())?,
        min_size: params.min_size.unwrap_or(defaults.min_size),
        max_size: params.max_size.unwrap_or(defaults.max_size),
    };

    let groups = state.group_service.list_groups(&ctx, query).await?;
    Ok(Json(groups))
}

async fn create(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    input: Result<Json<GroupInput>, JsonRejection>,
) -> AppResult<Response> {
    let Json(input) = input?;
    let id = state.group_service.create_group(&ctx, input).await?;
    Ok(created(group_location(&id)))
}

async fn my(Ctx(ctx): Ctx, State(state): State<AppState>) -> AppResult<Json<GroupView>> {
    let group = state.group_service.find_my_group(&ctx).await?;
    Ok(Json(group))
}

async fn show(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> AppResult<Json<GroupView>> {
    let Path(id) = id?;
    let group = state.group_service.get_group(&ctx, &id).await?;
    Ok(Json(group))
}

async fn update(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
    input: Result<Json<GroupInput>, JsonRejection>,
) -> AppResult<Response> {
    let Path(id) = id?;
    let Json(input) = input?;
    state.group_service.update_group(&ctx, &id, input).await?;
    Ok(no_content())
}

async fn delete(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> AppResult<Response> {
    let Path(id) = id?;
    state.group_service.delete_group(&ctx, &id).await?;
    Ok(no_content())
}

async fn add_member(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
    params: Result<Query<AddMemberParams>, QueryRejection>,
) -> AppResult<Response> {
    let Path((id, badge)) = path?;
    let Query(params) = params?;
    let badge = parse_badge(&badge)?;

    let options = AddMemberOptions {
        nickname: params.nickname,
        code: params.code,
        force: params.force.unwrap_or(false),
    };
    let code = state
        .group_service
        .add_member(&ctx, &id, badge, options)
        .await?;

    let mut location = format!("{}/members/{badge}", group_location(&id));
    if let Some(code) = code {
        location.push_str("?code=");
        location.push_str(&code);
    }
    Ok(no_content_at(location))
}

async fn remove_member(
    Ctx(ctx): Ctx,
    State(state): State<AppState>,
    path: Result<Path<(String, String)>, PathRejection>,
    params: Result<Query<RemoveMemberParams>, QueryRejection>,
) -> AppResult<Response> {
    let Path((id, badge)) = path?;
    let Query(params) = params?;
    let badge = parse_badge(&badge)?;

    state
        .group_service
        .remove_member(&ctx, &id, badge, params.autodeny.unwrap_or(false))
        .await?;
    Ok(no_content())
}

/// Create the groups router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list).post(create))
        .route("/my", get(my))
        .route("/{id}", get(show).put(update).delete(delete))
        .route("/{id}/members/{badge}", post(add_member).delete(remove_member))
}
