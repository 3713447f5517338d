//! Helper operations: people with one primary and several secondary
//! functions.

use std::collections::HashSet;

use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;

use super::{Helper, HelperInput, group::group_exists};
use crate::{
    error::AppError,
    import::{CsvRow, HelperRow, ImportReport},
};

const HELPER_COLUMNS: &str = "id, first_name, last_name, photo_path, group_id, function_id";

/// A helper together with its secondary function ids, for admin editing.
#[derive(Debug, Serialize)]
pub struct HelperDetail {
    #[serde(flatten)]
    pub helper: Helper,
    pub secondary_ids: Vec<i64>,
}

pub async fn list_helpers(pool: &SqlitePool) -> Result<Vec<Helper>, AppError> {
    let helpers = sqlx::query_as::<_, Helper>(&format!(
        "SELECT {HELPER_COLUMNS} FROM helpers ORDER BY last_name ASC, first_name ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(helpers)
}

pub async fn get_helper(pool: &SqlitePool, id: i64) -> Result<HelperDetail, AppError> {
    let helper = sqlx::query_as::<_, Helper>(&format!(
        "SELECT {HELPER_COLUMNS} FROM helpers WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Helper {id} not found")))?;

    let secondary_ids = sqlx::query_scalar::<_, i64>(
        "SELECT function_id FROM helper_secondary_functions WHERE helper_id = ? ORDER BY function_id",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    Ok(HelperDetail {
        helper,
        secondary_ids,
    })
}

/// Creates or updates a helper. The group and primary function must exist;
/// the secondary set may not contain duplicates or the primary function.
pub async fn upsert_helper(pool: &SqlitePool, input: HelperInput) -> Result<Helper, AppError> {
    validate_references(pool, &input).await?;

    let mut tx = pool.begin().await?;

    let id = match input.id {
        Some(id) => {
            let updated = sqlx::query(
                "UPDATE helpers SET first_name = ?, last_name = ?, group_id = ?, function_id = ?
                 WHERE id = ?",
            )
            .bind(&input.first_name)
            .bind(&input.last_name)
            .bind(input.group_id)
            .bind(input.function_id)
            .bind(id)
            .execute(&mut *tx)
            .await?;

            if updated.rows_affected() == 0 {
                return Err(AppError::NotFound(format!("Helper {id} not found")));
            }
            id
        }
        None => sqlx::query(
            "INSERT INTO helpers (first_name, last_name, group_id, function_id) VALUES (?, ?, ?, ?)",
        )
        .bind(&input.first_name)
        .bind(&input.last_name)
        .bind(input.group_id)
        .bind(input.function_id)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid(),
    };

    sqlx::query("DELETE FROM helper_secondary_functions WHERE helper_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    for function_id in &input.secondary_ids {
        sqlx::query("INSERT INTO helper_secondary_functions (helper_id, function_id) VALUES (?, ?)")
            .bind(id)
            .bind(function_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    Ok(get_helper(pool, id).await?.helper)
}

/// Replaces the photo reference, returning the previous one so the caller
/// can delete the file.
pub async fn set_helper_photo(
    pool: &SqlitePool,
    id: i64,
    path: &str,
) -> Result<Option<String>, AppError> {
    let previous = get_helper(pool, id).await?.helper.photo_path;

    sqlx::query("UPDATE helpers SET photo_path = ? WHERE id = ?")
        .bind(path)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(previous)
}

/// Clears the photo reference; idempotent — clearing a helper without a
/// photo succeeds and returns `None`.
pub async fn delete_helper_photo(pool: &SqlitePool, id: i64) -> Result<Option<String>, AppError> {
    let previous = get_helper(pool, id).await?.helper.photo_path;

    sqlx::query("UPDATE helpers SET photo_path = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(previous)
}

/// Removes a helper, returning the photo reference for cleanup.
pub async fn delete_helper(pool: &SqlitePool, id: i64) -> Result<Option<String>, AppError> {
    let photo = get_helper(pool, id).await?.helper.photo_path;

    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM helper_secondary_functions WHERE helper_id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM helpers WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(helper = id, "Deleted helper");
    Ok(photo)
}

/// Bulk import from CSV rows. Existing helpers are matched by name
/// (case-insensitive) and updated; rows with dangling references are
/// reported, never silently skipped.
pub async fn import_helpers(
    pool: &SqlitePool,
    rows: &[CsvRow<HelperRow>],
) -> Result<ImportReport, AppError> {
    let mut report = ImportReport::new();

    for row in rows {
        let parsed = match &row.parsed {
            Ok(parsed) => parsed,
            Err(message) => {
                report.failed(row.line, "", message.clone());
                continue;
            }
        };
        let label = format!("{} {}", parsed.first_name, parsed.last_name);

        let existing = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM helpers
             WHERE lower(first_name) = lower(?) AND lower(last_name) = lower(?)",
        )
        .bind(&parsed.first_name)
        .bind(&parsed.last_name)
        .fetch_optional(pool)
        .await?;

        let input = HelperInput {
            id: existing,
            first_name: parsed.first_name.clone(),
            last_name: parsed.last_name.clone(),
            group_id: parsed.group_id,
            function_id: parsed.function_id,
            secondary_ids: parsed.secondary_ids(),
        };

        match upsert_helper(pool, input).await {
            Ok(_) if existing.is_some() => report.updated(row.line, label),
            Ok(_) => report.created(row.line, label),
            Err(AppError::NotFound(message) | AppError::Validation(message)) => {
                report.failed(row.line, label, message)
            }
            Err(other) => return Err(other),
        }
    }

    Ok(report)
}

async fn validate_references(pool: &SqlitePool, input: &HelperInput) -> Result<(), AppError> {
    if !group_exists(pool, input.group_id).await? {
        return Err(AppError::NotFound(format!(
            "Group {} not found",
            input.group_id
        )));
    }

    if !function_exists(pool, input.function_id).await? {
        return Err(AppError::NotFound(format!(
            "Function {} not found",
            input.function_id
        )));
    }

    let mut seen = HashSet::new();
    for &function_id in &input.secondary_ids {
        if function_id == input.function_id {
            return Err(AppError::Validation(
                "Primary function cannot also be a secondary function".to_string(),
            ));
        }
        if !seen.insert(function_id) {
            return Err(AppError::Validation(format!(
                "Duplicate secondary function {function_id}"
            )));
        }
        if !function_exists(pool, function_id).await? {
            return Err(AppError::NotFound(format!(
                "Function {function_id} not found"
            )));
        }
    }

    Ok(())
}

async fn function_exists(pool: &SqlitePool, id: i64) -> Result<bool, AppError> {
    let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM functions WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(found > 0)
}
