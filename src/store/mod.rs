//! The hierarchy store: groups, functions, helpers and their integrity
//! rules. Operations are transport-independent and never touch the
//! filesystem; deletes hand orphaned file references back to the caller.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub mod display;
pub mod function;
pub mod group;
pub mod helper;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub sort_order: i64,
    pub detail_enabled: bool,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Function {
    pub id: i64,
    pub name: String,
    pub short_name: Option<String>,
    pub legend_name: Option<String>,
    pub emblem_path: Option<String>,
    pub sort_order: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Helper {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub photo_path: Option<String>,
    pub group_id: i64,
    pub function_id: i64,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct GroupImage {
    pub id: i64,
    pub group_id: i64,
    pub path: String,
    pub sort_order: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct GroupInput {
    pub id: Option<i64>,
    pub name: String,
    /// Raw parent reference; `""` and `"0"` mean "no parent".
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
    #[serde(default)]
    pub detail_enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct FunctionInput {
    pub id: Option<i64>,
    pub name: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub legend_name: Option<String>,
    #[serde(default)]
    pub sort_order: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HelperInput {
    pub id: Option<i64>,
    pub first_name: String,
    pub last_name: String,
    pub group_id: i64,
    /// Primary function.
    pub function_id: i64,
    #[serde(default)]
    pub secondary_ids: Vec<i64>,
}

/// Normalizes a raw parent reference. Empty and `"0"` inputs mean "root";
/// anything else must parse as an id.
pub fn normalize_parent(raw: Option<&str>) -> Result<Option<i64>, AppError> {
    let Some(raw) = raw else { return Ok(None) };

    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed == "0" {
        return Ok(None);
    }

    trimmed
        .parse()
        .map(Some)
        .map_err(|_| AppError::Validation(format!("Invalid parent id: {trimmed}")))
}
