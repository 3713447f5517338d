//! Admin CRUD for functions: emblems, ordering, CSV import.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::SqlitePool;

use super::{DeleteParams, require_upload};
use crate::{
    error::AppError,
    files::{self, EMBLEMS, FileStore},
    import::{FunctionRow, ImportReport, parse_csv},
    settings,
    state::AppState,
    store::{Function, FunctionInput, function},
};

pub async fn list(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Function>>, AppError> {
    Ok(Json(function::list_functions(&state.pool).await?))
}

pub async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Function>, AppError> {
    Ok(Json(function::get_function(&state.pool, id).await?))
}

pub async fn save(
    State(state): State<Arc<AppState>>,
    Json(input): Json<FunctionInput>,
) -> Result<Json<Function>, AppError> {
    let saved = function::upsert_function(&state.pool, input).await?;
    settings::touch_last_update(&state.pool).await?;
    Ok(Json(saved))
}

#[derive(Deserialize)]
pub struct ReorderBody {
    /// Function to slot in after; `None` moves to the front.
    pub after: Option<i64>,
}

pub async fn reorder(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<ReorderBody>,
) -> Result<Json<Function>, AppError> {
    let moved = function::reorder_function(&state.pool, id, body.after).await?;
    settings::touch_last_update(&state.pool).await?;
    Ok(Json(moved))
}

pub async fn remove(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Query(params): Query<DeleteParams>,
) -> Result<Json<Value>, AppError> {
    let policy = params.policy(state.config.delete_policy);
    let orphaned = function::delete_function(&state.pool, id, policy).await?;

    for reference in &orphaned {
        state.files.delete(reference);
    }

    settings::touch_last_update(&state.pool).await?;
    Ok(Json(json!({ "deleted": id })))
}

pub async fn upload_emblem(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    multipart: Multipart,
) -> Result<Json<Function>, AppError> {
    let upload = require_upload(multipart).await?;

    let saved = store_emblem(&state.pool, &state.files, id, &upload.file_name, &upload.data).await?;

    settings::touch_last_update(&state.pool).await?;
    Ok(Json(saved))
}

/// Stores an emblem for an existing function. The function and the file
/// type are checked before anything is written, so a rejected request never
/// leaves an unreferenced file.
async fn store_emblem(
    pool: &SqlitePool,
    store: &FileStore,
    id: i64,
    file_name: &str,
    data: &[u8],
) -> Result<Function, AppError> {
    function::get_function(pool, id).await?;

    let ext = files::extension_of(file_name);
    if ext != ".svg" {
        return Err(AppError::Validation("Emblem must be an SVG file".to_string()));
    }

    let reference = store.save(EMBLEMS, &ext, data)?;
    if let Some(old) = function::set_function_emblem(pool, id, &reference).await? {
        store.delete(&old);
    }

    function::get_function(pool, id).await
}

pub async fn remove_emblem(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Function>, AppError> {
    if let Some(old) = function::clear_function_emblem(&state.pool, id).await? {
        state.files.delete(&old);
        settings::touch_last_update(&state.pool).await?;
    }
    Ok(Json(function::get_function(&state.pool, id).await?))
}

pub async fn import(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ImportReport>, AppError> {
    let upload = require_upload(multipart).await?;
    let rows = parse_csv::<FunctionRow>(&upload.data, &["name"])?;

    let report = function::import_functions(&state.pool, &rows).await?;
    settings::touch_last_update(&state.pool).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use tempfile::TempDir;

    #[tokio::test]
    async fn rejected_emblem_uploads_store_nothing() {
        let pool = test_pool().await;
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        // Unknown function.
        let err = store_emblem(&pool, &store, 999, "medic.svg", b"<svg/>")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // Wrong file type.
        let medic = function::upsert_function(
            &pool,
            FunctionInput {
                name: "Medic".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let err = store_emblem(&pool, &store, medic.id, "medic.png", b"not svg")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);

        let saved = store_emblem(&pool, &store, medic.id, "medic.svg", b"<svg/>")
            .await
            .unwrap();
        assert!(saved.emblem_path.is_some());
    }
}
