//! Admin CRUD for helpers, their photos, and bulk imports.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, State},
};
use serde_json::{Value, json};
use sqlx::SqlitePool;
use tracing::warn;

use super::require_upload;
use crate::{
    error::AppError,
    files::{self, FileStore, PHOTOS},
    import::{HelperRow, ImportReport, parse_csv, parse_photo_archive},
    settings,
    state::AppState,
    store::{Helper, HelperInput, helper},
};

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Helper>>, AppError> {
    Ok(Json(helper::list_helpers(&state.pool).await?))
}

pub async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<helper::HelperDetail>, AppError> {
    Ok(Json(helper::get_helper(&state.pool, id).await?))
}

pub async fn save(
    State(state): State<Arc<AppState>>,
    Json(input): Json<HelperInput>,
) -> Result<Json<Helper>, AppError> {
    let saved = helper::upsert_helper(&state.pool, input).await?;
    settings::touch_last_update(&state.pool).await?;
    Ok(Json(saved))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, AppError> {
    if let Some(photo) = helper::delete_helper(&state.pool, id).await? {
        state.files.delete(&photo);
    }

    settings::touch_last_update(&state.pool).await?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn upload_photo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<helper::HelperDetail>, AppError> {
    let upload = require_upload(multipart).await?;

    let detail = store_photo(&state.pool, &state.files, id, &upload.file_name, &upload.data).await?;

    settings::touch_last_update(&state.pool).await?;
    Ok(Json(detail))
}

/// Stores a photo for an existing helper. The helper is resolved before
/// anything is written, so a bad id never leaves an unreferenced file.
async fn store_photo(
    pool: &SqlitePool,
    store: &FileStore,
    id: i64,
    file_name: &str,
    data: &[u8],
) -> Result<helper::HelperDetail, AppError> {
    helper::get_helper(pool, id).await?;

    let ext = files::extension_of(file_name);
    let reference = store.save(PHOTOS, &ext, data)?;
    if let Some(old) = helper::set_helper_photo(pool, id, &reference).await? {
        store.delete(&old);
    }

    helper::get_helper(pool, id).await
}

pub async fn remove_photo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<helper::HelperDetail>, AppError> {
    if let Some(old) = helper::delete_helper_photo(&state.pool, id).await? {
        state.files.delete(&old);
        settings::touch_last_update(&state.pool).await?;
    }
    Ok(Json(helper::get_helper(&state.pool, id).await?))
}

pub async fn import(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ImportReport>, AppError> {
    let upload = require_upload(multipart).await?;
    let rows = parse_csv::<HelperRow>(
        &upload.data,
        &["first_name", "last_name", "group_id", "function_id"],
    )?;

    let report = helper::import_helpers(&state.pool, &rows).await?;
    settings::touch_last_update(&state.pool).await?;
    Ok(Json(report))
}

/// Bulk photo upload from a ZIP of `Last First.jpg` files. Each entry is
/// matched to a helper by name; unmatched or misnamed entries are reported
/// without failing the rest of the archive.
pub async fn import_photos(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ImportReport>, AppError> {
    let upload = require_upload(multipart).await?;
    let archive = parse_photo_archive(&upload.data)?;

    let mut report = ImportReport::new();

    for photo in &archive.photos {
        match find_by_name(&state.pool, &photo.first_name, &photo.last_name).await? {
            Some(id) => {
                let reference = state.files.save(PHOTOS, ".jpg", &photo.data)?;
                let previous = helper::set_helper_photo(&state.pool, id, &reference).await?;
                if let Some(old) = previous {
                    state.files.delete(&old);
                }
                report.updated(photo.entry, photo.file_name.clone());
            }
            None => {
                warn!(file = %photo.file_name, "No helper matches photo");
                report.failed(
                    photo.entry,
                    photo.file_name.clone(),
                    format!(
                        "No helper named '{} {}'",
                        photo.first_name, photo.last_name
                    ),
                );
            }
        }
    }
    for (entry, file_name, reason) in &archive.skipped {
        report.failed(*entry, file_name.clone(), reason.clone());
    }

    if report.updated > 0 {
        settings::touch_last_update(&state.pool).await?;
    }
    Ok(Json(report))
}

async fn find_by_name(
    pool: &SqlitePool,
    first_name: &str,
    last_name: &str,
) -> Result<Option<i64>, AppError> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM helpers
         WHERE lower(first_name) = lower(?) AND lower(last_name) = lower(?)",
    )
    .bind(first_name)
    .bind(last_name)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}
