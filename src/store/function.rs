//! Function operations: roles with emblems and gap-based ordering.

use std::collections::HashSet;

use sqlx::SqlitePool;
use tracing::info;

use super::{Function, FunctionInput};
use crate::{
    config::DeletePolicy,
    error::{AppError, map_unique},
    import::{CsvRow, FunctionRow, ImportReport},
    sort,
};

const FUNCTION_COLUMNS: &str = "id, name, short_name, legend_name, emblem_path, sort_order";

pub async fn list_functions(pool: &SqlitePool) -> Result<Vec<Function>, AppError> {
    let functions = sqlx::query_as::<_, Function>(&format!(
        "SELECT {FUNCTION_COLUMNS} FROM functions ORDER BY sort_order ASC, id ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(functions)
}

pub async fn get_function(pool: &SqlitePool, id: i64) -> Result<Function, AppError> {
    sqlx::query_as::<_, Function>(&format!(
        "SELECT {FUNCTION_COLUMNS} FROM functions WHERE id = ?"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Function {id} not found")))
}

/// Creates or updates a function. An absent short name is derived from the
/// name without colliding with existing short names; a name collision maps
/// the UNIQUE constraint to [`AppError::Duplicate`].
pub async fn upsert_function(pool: &SqlitePool, input: FunctionInput) -> Result<Function, AppError> {
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::Validation("Function name is required".to_string()));
    }

    let requested_short = input
        .short_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from);

    let duplicate_message = format!("Function '{name}' already exists");

    let id = match input.id {
        Some(id) => {
            let existing = get_function(pool, id).await?;

            let short_name = match requested_short.or(existing.short_name) {
                Some(short) => short,
                None => {
                    let taken = taken_short_names(pool, Some(id)).await?;
                    derive_short_name(&name, &taken)
                }
            };

            sqlx::query(
                "UPDATE functions SET name = ?, short_name = ?, legend_name = ?, sort_order = ?
                 WHERE id = ?",
            )
            .bind(&name)
            .bind(&short_name)
            .bind(&input.legend_name)
            .bind(input.sort_order.unwrap_or(existing.sort_order))
            .bind(id)
            .execute(pool)
            .await
            .map_err(|e| map_unique(e, &duplicate_message))?;

            id
        }
        None => {
            let short_name = match requested_short {
                Some(short) => short,
                None => {
                    let taken = taken_short_names(pool, None).await?;
                    derive_short_name(&name, &taken)
                }
            };

            let sort_order = match input.sort_order {
                Some(order) => order,
                None => sort::append_after(max_sort_order(pool).await?),
            };

            sqlx::query(
                "INSERT INTO functions (name, short_name, legend_name, sort_order)
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&name)
            .bind(&short_name)
            .bind(&input.legend_name)
            .bind(sort_order)
            .execute(pool)
            .await
            .map_err(|e| map_unique(e, &duplicate_message))?
            .last_insert_rowid()
        }
    };

    get_function(pool, id).await
}

/// Moves a function directly after `after` (or to the front for `None`).
/// The midpoint between the new neighbors is used when one exists; an
/// exhausted gap renumbers the whole set by 10 first.
pub async fn reorder_function(
    pool: &SqlitePool,
    id: i64,
    after: Option<i64>,
) -> Result<Function, AppError> {
    get_function(pool, id).await?;

    let siblings: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT id, sort_order FROM functions WHERE id != ? ORDER BY sort_order ASC, id ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let index = match after {
        None => 0,
        Some(after_id) => {
            siblings
                .iter()
                .position(|&(sid, _)| sid == after_id)
                .ok_or_else(|| AppError::NotFound(format!("Function {after_id} not found")))?
                + 1
        }
    };

    let lo = if index == 0 { 0 } else { siblings[index - 1].1 };
    let hi = siblings.get(index).map(|&(_, order)| order);

    let new_order = match hi {
        None => lo + sort::STEP,
        Some(hi) => match sort::midpoint(lo, hi) {
            Some(mid) => mid,
            None => {
                renumber_around(pool, id, &siblings, index).await?;
                return get_function(pool, id).await;
            }
        },
    };

    sqlx::query("UPDATE functions SET sort_order = ? WHERE id = ?")
        .bind(new_order)
        .bind(id)
        .execute(pool)
        .await?;

    get_function(pool, id).await
}

/// Renumbers the whole set 10, 20, 30, … with `id` inserted at `index`.
async fn renumber_around(
    pool: &SqlitePool,
    id: i64,
    siblings: &[(i64, i64)],
    index: usize,
) -> Result<(), AppError> {
    let mut order: Vec<i64> = siblings.iter().map(|&(sid, _)| sid).collect();
    order.insert(index, id);

    let mut tx = pool.begin().await?;
    for (fid, fresh) in order.iter().zip(sort::renumbered(order.len())) {
        sqlx::query("UPDATE functions SET sort_order = ? WHERE id = ?")
            .bind(fresh)
            .bind(fid)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    info!(moved = id, count = order.len(), "Renumbered function order");
    Ok(())
}

/// Replaces the emblem reference, returning the previous one.
pub async fn set_function_emblem(
    pool: &SqlitePool,
    id: i64,
    path: &str,
) -> Result<Option<String>, AppError> {
    let existing = get_function(pool, id).await?;

    sqlx::query("UPDATE functions SET emblem_path = ? WHERE id = ?")
        .bind(path)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(existing.emblem_path)
}

/// Clears the emblem reference; idempotent.
pub async fn clear_function_emblem(pool: &SqlitePool, id: i64) -> Result<Option<String>, AppError> {
    let existing = get_function(pool, id).await?;

    sqlx::query("UPDATE functions SET emblem_path = NULL WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(existing.emblem_path)
}

/// Deletes a function. Under [`DeletePolicy::Reject`] it must not be
/// assigned to any helper, primary or secondary. Cascade unlinks secondary
/// assignments and removes helpers whose primary function it was; their
/// photo references come back as orphaned files.
pub async fn delete_function(
    pool: &SqlitePool,
    id: i64,
    policy: DeletePolicy,
) -> Result<Vec<String>, AppError> {
    let existing = get_function(pool, id).await?;

    let references = sqlx::query_scalar::<_, i64>(
        "SELECT (SELECT COUNT(*) FROM helpers WHERE function_id = ?1)
              + (SELECT COUNT(*) FROM helper_secondary_functions WHERE function_id = ?1)",
    )
    .bind(id)
    .fetch_one(pool)
    .await?;

    if policy == DeletePolicy::Reject && references > 0 {
        return Err(AppError::Conflict(format!(
            "Function '{}' is still assigned to {references} helper reference(s)",
            existing.name
        )));
    }

    let mut orphaned_files: Vec<String> = existing.emblem_path.into_iter().collect();
    let mut tx = pool.begin().await?;

    if references > 0 {
        let photos = sqlx::query_scalar::<_, Option<String>>(
            "SELECT photo_path FROM helpers WHERE function_id = ?",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;
        orphaned_files.extend(photos.into_iter().flatten());

        sqlx::query(
            "DELETE FROM helper_secondary_functions
             WHERE function_id = ?1
                OR helper_id IN (SELECT id FROM helpers WHERE function_id = ?1)",
        )
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM helpers WHERE function_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query("DELETE FROM functions WHERE id = ?")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    info!(function = id, "Deleted function");
    Ok(orphaned_files)
}

/// Bulk creation from CSV rows. Every row gets an outcome; duplicates are
/// detected against the existing set and earlier rows in the batch, and
/// successes stand even when later rows fail.
pub async fn import_functions(
    pool: &SqlitePool,
    rows: &[CsvRow<FunctionRow>],
) -> Result<ImportReport, AppError> {
    let mut existing: HashSet<String> =
        sqlx::query_scalar::<_, String>("SELECT name FROM functions")
            .fetch_all(pool)
            .await?
            .into_iter()
            .collect();
    let mut taken = taken_short_names(pool, None).await?;
    let mut next_order = sort::append_after(max_sort_order(pool).await?);

    let mut report = ImportReport::new();

    for row in rows {
        let parsed = match &row.parsed {
            Ok(parsed) => parsed,
            Err(message) => {
                report.failed(row.line, "", message.clone());
                continue;
            }
        };

        let name = parsed.name.trim().to_string();
        if name.is_empty() {
            report.failed(row.line, "", "Name is required");
            continue;
        }

        if existing.contains(&name) {
            report.failed(
                row.line,
                &name,
                format!("Function '{name}' already exists"),
            );
            continue;
        }

        let short_name = match parsed
            .short_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(short) => short.to_string(),
            None => derive_short_name(&name, &taken),
        };

        let inserted = sqlx::query(
            "INSERT INTO functions (name, short_name, sort_order) VALUES (?, ?, ?)",
        )
        .bind(&name)
        .bind(&short_name)
        .bind(next_order)
        .execute(pool)
        .await
        .map_err(|e| map_unique(e, &format!("Function '{name}' already exists")));

        match inserted {
            Ok(_) => {
                report.created(row.line, &name);
                existing.insert(name);
                taken.insert(short_name.to_uppercase());
                next_order += sort::STEP;
            }
            Err(AppError::Duplicate(message)) => report.failed(row.line, &name, message),
            Err(other) => return Err(other),
        }
    }

    Ok(report)
}

async fn max_sort_order(pool: &SqlitePool) -> Result<Option<i64>, AppError> {
    let max = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(sort_order) FROM functions")
        .fetch_one(pool)
        .await?;
    Ok(max)
}

/// Short names already in use, uppercased: collisions are checked
/// case-insensitively so a manual `med` still blocks a derived `MED`.
async fn taken_short_names(
    pool: &SqlitePool,
    exclude: Option<i64>,
) -> Result<HashSet<String>, AppError> {
    let names = sqlx::query_scalar::<_, String>(
        "SELECT short_name FROM functions WHERE short_name IS NOT NULL AND id != ?",
    )
    .bind(exclude.unwrap_or(-1))
    .fetch_all(pool)
    .await?;
    Ok(names.into_iter().map(|n| n.to_uppercase()).collect())
}

/// Word initials (or a 3-letter prefix for single words), uppercased, with
/// a numeric suffix when the abbreviation is already taken. `taken` holds
/// uppercased names.
pub(crate) fn derive_short_name(name: &str, taken: &HashSet<String>) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();

    let base: String = if words.len() >= 2 {
        words
            .iter()
            .filter_map(|w| w.chars().next())
            .collect::<String>()
            .to_uppercase()
    } else {
        name.chars().take(3).collect::<String>().to_uppercase()
    };

    if !taken.contains(&base) {
        return base;
    }

    let mut suffix = 2;
    loop {
        let candidate = format!("{base}{suffix}");
        if !taken.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use crate::import::RowStatus;
    use crate::store::{GroupInput, HelperInput, group, helper};

    fn named(name: &str) -> FunctionInput {
        FunctionInput {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn short_names_are_derived_without_collisions() {
        let pool = test_pool().await;

        let first = upsert_function(&pool, named("First Aid")).await.unwrap();
        assert_eq!(first.short_name.as_deref(), Some("FA"));

        let second = upsert_function(&pool, named("Fire Alarm")).await.unwrap();
        assert_eq!(second.short_name.as_deref(), Some("FA2"));

        let single = upsert_function(&pool, named("Medic")).await.unwrap();
        assert_eq!(single.short_name.as_deref(), Some("MED"));
    }

    #[tokio::test]
    async fn short_name_collisions_ignore_case() {
        let pool = test_pool().await;

        upsert_function(
            &pool,
            FunctionInput {
                name: "Messenger".to_string(),
                short_name: Some("med".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let medic = upsert_function(&pool, named("Medic")).await.unwrap();
        assert_eq!(medic.short_name.as_deref(), Some("MED2"));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_by_the_database() {
        let pool = test_pool().await;

        upsert_function(&pool, named("Medic")).await.unwrap();
        let err = upsert_function(&pool, named("Medic")).await.unwrap_err();
        assert!(matches!(err, AppError::Duplicate(_)));
    }

    #[tokio::test]
    async fn sort_order_appends_in_steps_of_ten() {
        let pool = test_pool().await;

        let a = upsert_function(&pool, named("A")).await.unwrap();
        let b = upsert_function(&pool, named("B")).await.unwrap();
        assert_eq!(a.sort_order, 10);
        assert_eq!(b.sort_order, 20);
    }

    #[tokio::test]
    async fn midpoint_insertion_leaves_siblings_alone() {
        let pool = test_pool().await;

        let a = upsert_function(&pool, named("A")).await.unwrap();
        let b = upsert_function(&pool, named("B")).await.unwrap();
        let c = upsert_function(&pool, named("C")).await.unwrap();

        let moved = reorder_function(&pool, c.id, Some(a.id)).await.unwrap();
        assert_eq!(moved.sort_order, 15);

        assert_eq!(get_function(&pool, a.id).await.unwrap().sort_order, 10);
        assert_eq!(get_function(&pool, b.id).await.unwrap().sort_order, 20);
    }

    #[tokio::test]
    async fn exhausted_gap_renumbers_all_siblings() {
        let pool = test_pool().await;

        let a = upsert_function(
            &pool,
            FunctionInput {
                name: "A".to_string(),
                sort_order: Some(10),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let b = upsert_function(
            &pool,
            FunctionInput {
                name: "B".to_string(),
                sort_order: Some(11),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let c = upsert_function(&pool, named("C")).await.unwrap();

        let moved = reorder_function(&pool, c.id, Some(a.id)).await.unwrap();

        assert_eq!(get_function(&pool, a.id).await.unwrap().sort_order, 10);
        assert_eq!(moved.sort_order, 20);
        assert_eq!(get_function(&pool, b.id).await.unwrap().sort_order, 30);
    }

    #[tokio::test]
    async fn import_reports_batch_duplicates_per_row() {
        let pool = test_pool().await;

        let rows = vec![
            CsvRow::ok(
                2,
                FunctionRow {
                    name: "A".to_string(),
                    short_name: None,
                },
            ),
            CsvRow::ok(
                3,
                FunctionRow {
                    name: "A".to_string(),
                    short_name: None,
                },
            ),
        ];

        let report = import_functions(&pool, &rows).await.unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.rows[0].status, RowStatus::Created);
        assert_eq!(report.rows[1].status, RowStatus::Failed);

        // The first occurrence stands.
        assert_eq!(list_functions(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_is_blocked_while_referenced_then_succeeds() {
        let pool = test_pool().await;

        let squad = group::upsert_group(
            &pool,
            GroupInput {
                name: "Squad".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let medic = upsert_function(&pool, named("Medic")).await.unwrap();
        let driver = upsert_function(&pool, named("Driver")).await.unwrap();

        let person = helper::upsert_helper(
            &pool,
            HelperInput {
                first_name: "Jo".to_string(),
                last_name: "Doe".to_string(),
                group_id: squad.id,
                function_id: medic.id,
                secondary_ids: vec![driver.id],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        // Both primary and secondary references block a Reject delete.
        assert!(matches!(
            delete_function(&pool, medic.id, DeletePolicy::Reject).await,
            Err(AppError::Conflict(_))
        ));
        assert!(matches!(
            delete_function(&pool, driver.id, DeletePolicy::Reject).await,
            Err(AppError::Conflict(_))
        ));

        // Drop the secondary link, then the driver delete goes through.
        helper::upsert_helper(
            &pool,
            HelperInput {
                id: Some(person.id),
                first_name: "Jo".to_string(),
                last_name: "Doe".to_string(),
                group_id: squad.id,
                function_id: medic.id,
                secondary_ids: vec![],
                ..Default::default()
            },
        )
        .await
        .unwrap();

        delete_function(&pool, driver.id, DeletePolicy::Reject)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cascade_delete_removes_dependent_helpers() {
        let pool = test_pool().await;

        let squad = group::upsert_group(
            &pool,
            GroupInput {
                name: "Squad".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        let medic = upsert_function(&pool, named("Medic")).await.unwrap();

        let person = helper::upsert_helper(
            &pool,
            HelperInput {
                first_name: "Jo".to_string(),
                last_name: "Doe".to_string(),
                group_id: squad.id,
                function_id: medic.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        helper::set_helper_photo(&pool, person.id, "photos/jo.jpg")
            .await
            .unwrap();
        set_function_emblem(&pool, medic.id, "emblems/medic.svg")
            .await
            .unwrap();

        let orphaned = delete_function(&pool, medic.id, DeletePolicy::Cascade)
            .await
            .unwrap();

        assert!(orphaned.contains(&"emblems/medic.svg".to_string()));
        assert!(orphaned.contains(&"photos/jo.jpg".to_string()));
        assert!(helper::list_helpers(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn emblem_clear_is_idempotent() {
        let pool = test_pool().await;

        let medic = upsert_function(&pool, named("Medic")).await.unwrap();

        assert_eq!(clear_function_emblem(&pool, medic.id).await.unwrap(), None);

        set_function_emblem(&pool, medic.id, "emblems/a.svg")
            .await
            .unwrap();
        assert_eq!(
            clear_function_emblem(&pool, medic.id).await.unwrap(),
            Some("emblems/a.svg".to_string())
        );
        assert_eq!(clear_function_emblem(&pool, medic.id).await.unwrap(), None);
    }
}
