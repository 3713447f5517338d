//! Read-only endpoints for the display page.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Serialize;

use crate::{
    error::AppError,
    settings::{self, CarouselImage},
    state::AppState,
    store::{Function, Group, display},
};

#[derive(Serialize)]
pub struct BoardResponse {
    pub incognito_level: i64,
    pub carousel_title: String,
    pub carousel_images: Vec<CarouselImage>,
    pub tree: Vec<display::DisplayGroup>,
    pub legend: Vec<Function>,
    pub detail_groups: Vec<Group>,
}

/// The whole board. The carousel is only exposed at incognito level 2+.
pub async fn board(State(state): State<Arc<AppState>>) -> Result<Json<BoardResponse>, AppError> {
    let incognito_level = settings::incognito_level(&state.pool).await?;

    let (carousel_title, carousel_images) = if incognito_level >= 2 {
        (
            settings::carousel_title(&state.pool).await?,
            settings::list_carousel(&state.pool).await?,
        )
    } else {
        (String::new(), Vec::new())
    };

    Ok(Json(BoardResponse {
        incognito_level,
        carousel_title,
        carousel_images,
        tree: display::list_for_display(&state.pool).await?,
        legend: display::legend(&state.pool).await?,
        detail_groups: display::detail_groups(&state.pool).await?,
    }))
}

pub async fn group_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<display::GroupDetail>, AppError> {
    Ok(Json(display::group_detail(&state.pool, id).await?))
}

#[derive(Serialize)]
pub struct LastUpdate {
    pub timestamp: String,
}

pub async fn last_update(
    State(state): State<Arc<AppState>>,
) -> Result<Json<LastUpdate>, AppError> {
    let timestamp = settings::last_update(&state.pool).await?.to_rfc3339();
    Ok(Json(LastUpdate { timestamp }))
}
