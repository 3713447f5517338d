//! Admin CRUD for groups, their images, and CSV import.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
};
use serde::Serialize;
use serde_json::{Value, json};

use super::{DeleteParams, next_upload, require_upload};
use crate::{
    error::AppError,
    files::{self, GROUPS},
    import::{GroupRow, ImportReport, parse_csv},
    settings,
    state::AppState,
    store::{Group, GroupImage, GroupInput, group},
};

#[derive(Serialize)]
pub struct GroupResponse {
    #[serde(flatten)]
    pub group: Group,
    pub images: Vec<GroupImage>,
}

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Group>>, AppError> {
    Ok(Json(group::list_groups(&state.pool).await?))
}

pub async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<GroupResponse>, AppError> {
    let found = group::get_group(&state.pool, id).await?;
    let images = group::list_group_images(&state.pool, id).await?;
    Ok(Json(GroupResponse {
        group: found,
        images,
    }))
}

pub async fn save(
    State(state): State<Arc<AppState>>,
    Json(input): Json<GroupInput>,
) -> Result<Json<Group>, AppError> {
    let saved = group::upsert_group(&state.pool, input).await?;
    settings::touch_last_update(&state.pool).await?;
    Ok(Json(saved))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<Value>, AppError> {
    let policy = params.policy(state.config.delete_policy);
    let outcome = group::delete_group(&state.pool, id, policy).await?;

    for reference in &outcome.orphaned_files {
        state.files.delete(reference);
    }
    for gid in &outcome.removed_group_ids {
        state.files.delete_dir(&format!("{GROUPS}/{gid}"));
    }

    settings::touch_last_update(&state.pool).await?;
    Ok(Json(json!({ "removed": outcome.removed_group_ids.len() })))
}

pub async fn import(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ImportReport>, AppError> {
    let upload = require_upload(multipart).await?;
    let rows = parse_csv::<GroupRow>(&upload.data, &["id", "name"])?;

    let report = group::import_groups(&state.pool, &rows).await?;
    settings::touch_last_update(&state.pool).await?;
    Ok(Json(report))
}

pub async fn upload_images(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    mut multipart: Multipart,
) -> Result<Json<Vec<GroupImage>>, AppError> {
    // Resolve the group before touching the filesystem.
    group::get_group(&state.pool, id).await?;

    let mut stored = Vec::new();
    while let Some(upload) = next_upload(&mut multipart).await? {
        let ext = files::extension_of(&upload.file_name);
        let reference = state
            .files
            .save(&format!("{GROUPS}/{id}"), &ext, &upload.data)?;
        stored.push(group::add_group_image(&state.pool, id, &reference).await?);
    }

    if stored.is_empty() {
        return Err(AppError::MalformedPayload("Missing file upload".to_string()));
    }

    settings::touch_last_update(&state.pool).await?;
    Ok(Json(stored))
}

pub async fn remove_image(
    State(state): State<Arc<AppState>>,
    Path((id, image_id)): Path<(i64, i64)>,
) -> Result<Json<Value>, AppError> {
    let reference = group::delete_group_image(&state.pool, id, image_id).await?;
    state.files.delete(&reference);

    settings::touch_last_update(&state.pool).await?;
    Ok(Json(json!({ "deleted": image_id })))
}
