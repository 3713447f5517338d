//! Key/value settings and the global image carousel.
//!
//! `last_update` is bumped on every mutation and polled by the display page
//! to know when to reload.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{error::AppError, sort};

pub const LAST_UPDATE: &str = "last_update";
pub const INCOGNITO_LEVEL: &str = "incognito_level";
pub const CAROUSEL_TITLE: &str = "carousel_title";

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CarouselImage {
    pub id: i64,
    pub path: String,
    pub sort_order: i64,
}

pub async fn get(pool: &SqlitePool, key: &str) -> Result<Option<String>, AppError> {
    let value = sqlx::query_scalar::<_, String>("SELECT value FROM settings WHERE key = ?")
        .bind(key)
        .fetch_optional(pool)
        .await?;
    Ok(value)
}

pub async fn set(pool: &SqlitePool, key: &str, value: &str) -> Result<(), AppError> {
    sqlx::query(
        "INSERT INTO settings (key, value) VALUES (?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
    )
    .bind(key)
    .bind(value)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn touch_last_update(pool: &SqlitePool) -> Result<(), AppError> {
    set(pool, LAST_UPDATE, &Utc::now().to_rfc3339()).await
}

pub async fn last_update(pool: &SqlitePool) -> Result<DateTime<Utc>, AppError> {
    let stored = get(pool, LAST_UPDATE).await?;
    Ok(stored
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now))
}

/// How much the public page exposes. Unparseable or missing values fall back
/// to the most private level.
pub async fn incognito_level(pool: &SqlitePool) -> Result<i64, AppError> {
    let stored = get(pool, INCOGNITO_LEVEL).await?;
    Ok(stored.and_then(|s| s.parse().ok()).unwrap_or(0))
}

pub async fn carousel_title(pool: &SqlitePool) -> Result<String, AppError> {
    Ok(get(pool, CAROUSEL_TITLE).await?.unwrap_or_default())
}

pub async fn list_carousel(pool: &SqlitePool) -> Result<Vec<CarouselImage>, AppError> {
    let images = sqlx::query_as::<_, CarouselImage>(
        "SELECT id, path, sort_order FROM carousel_images ORDER BY sort_order ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(images)
}

pub async fn add_carousel_image(pool: &SqlitePool, path: &str) -> Result<CarouselImage, AppError> {
    let max = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(sort_order) FROM carousel_images")
        .fetch_one(pool)
        .await?;

    let id = sqlx::query("INSERT INTO carousel_images (path, sort_order) VALUES (?, ?)")
        .bind(path)
        .bind(sort::append_after(max))
        .execute(pool)
        .await?
        .last_insert_rowid();

    Ok(CarouselImage {
        id,
        path: path.to_string(),
        sort_order: sort::append_after(max),
    })
}

/// Removes a carousel image record, returning its file reference so the
/// caller can delete the file.
pub async fn delete_carousel_image(pool: &SqlitePool, id: i64) -> Result<String, AppError> {
    let path = sqlx::query_scalar::<_, String>("SELECT path FROM carousel_images WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Carousel image {id} not found")))?;

    sqlx::query("DELETE FROM carousel_images WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(path)
}
