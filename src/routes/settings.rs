//! Display settings and carousel administration.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, State},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::require_upload;
use crate::{
    error::AppError,
    files::{self, CAROUSEL},
    settings::{self, CAROUSEL_TITLE, CarouselImage, INCOGNITO_LEVEL},
    state::AppState,
};

#[derive(Serialize)]
pub struct SettingsResponse {
    pub incognito_level: i64,
    pub carousel_title: String,
    pub carousel_images: Vec<CarouselImage>,
}

pub async fn fetch(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SettingsResponse>, AppError> {
    Ok(Json(SettingsResponse {
        incognito_level: settings::incognito_level(&state.pool).await?,
        carousel_title: settings::carousel_title(&state.pool).await?,
        carousel_images: settings::list_carousel(&state.pool).await?,
    }))
}

#[derive(Deserialize)]
pub struct SettingsBody {
    pub incognito_level: Option<i64>,
    pub carousel_title: Option<String>,
}

pub async fn save(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SettingsBody>,
) -> Result<Json<SettingsResponse>, AppError> {
    if let Some(level) = body.incognito_level {
        if !(0..=2).contains(&level) {
            return Err(AppError::Validation(
                "Incognito level must be 0, 1 or 2".to_string(),
            ));
        }
        settings::set(&state.pool, INCOGNITO_LEVEL, &level.to_string()).await?;
    }
    if let Some(title) = &body.carousel_title {
        settings::set(&state.pool, CAROUSEL_TITLE, title).await?;
    }

    settings::touch_last_update(&state.pool).await?;
    fetch(State(state)).await
}

pub async fn upload_carousel(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<CarouselImage>, AppError> {
    let upload = require_upload(multipart).await?;

    let ext = files::extension_of(&upload.file_name);
    let reference = state.files.save(CAROUSEL, &ext, &upload.data)?;
    let image = settings::add_carousel_image(&state.pool, &reference).await?;

    settings::touch_last_update(&state.pool).await?;
    Ok(Json(image))
}

pub async fn remove_carousel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    let reference = settings::delete_carousel_image(&state.pool, id).await?;
    state.files.delete(&reference);

    settings::touch_last_update(&state.pool).await?;
    Ok(Json(json!({ "deleted": id })))
}
