//! Group operations: the forest structure of the board.

use sqlx::SqlitePool;
use tracing::info;

use super::{Group, GroupImage, GroupInput, normalize_parent};
use crate::{
    config::DeletePolicy,
    error::AppError,
    import::{CsvRow, GroupRow, ImportReport},
    sort,
};

const GROUP_COLUMNS: &str = "id, name, description, parent_id, sort_order, detail_enabled";

/// What a group delete removed. The caller owns cleaning up the listed
/// files and the per-group upload directories.
#[derive(Debug)]
pub struct GroupDelete {
    pub removed_group_ids: Vec<i64>,
    pub orphaned_files: Vec<String>,
}

pub async fn list_groups(pool: &SqlitePool) -> Result<Vec<Group>, AppError> {
    let groups = sqlx::query_as::<_, Group>(&format!(
        "SELECT {GROUP_COLUMNS} FROM groups ORDER BY parent_id ASC, sort_order ASC, name ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(groups)
}

pub async fn get_group(pool: &SqlitePool, id: i64) -> Result<Group, AppError> {
    sqlx::query_as::<_, Group>(&format!("SELECT {GROUP_COLUMNS} FROM groups WHERE id = ?"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Group {id} not found")))
}

/// Creates or updates a group. Parent references are normalized, must
/// exist, and may not introduce a cycle.
pub async fn upsert_group(pool: &SqlitePool, input: GroupInput) -> Result<Group, AppError> {
    let parent_id = normalize_parent(input.parent_id.as_deref())?;

    if let Some(pid) = parent_id {
        if !group_exists(pool, pid).await? {
            return Err(AppError::NotFound(format!("Parent group {pid} not found")));
        }
    }

    let id = match input.id {
        Some(id) => {
            let existing = get_group(pool, id).await?;
            assert_no_cycle(pool, id, parent_id).await?;

            sqlx::query(
                "UPDATE groups
                 SET name = ?, description = ?, parent_id = ?, sort_order = ?, detail_enabled = ?
                 WHERE id = ?",
            )
            .bind(&input.name)
            .bind(&input.description)
            .bind(parent_id)
            .bind(input.sort_order.unwrap_or(existing.sort_order))
            .bind(input.detail_enabled)
            .bind(id)
            .execute(pool)
            .await?;

            id
        }
        None => {
            let sort_order = match input.sort_order {
                Some(order) => order,
                None => {
                    let max = sqlx::query_scalar::<_, Option<i64>>(
                        "SELECT MAX(sort_order) FROM groups WHERE parent_id IS ?",
                    )
                    .bind(parent_id)
                    .fetch_one(pool)
                    .await?;
                    sort::append_after(max)
                }
            };

            sqlx::query(
                "INSERT INTO groups (name, description, parent_id, sort_order, detail_enabled)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&input.name)
            .bind(&input.description)
            .bind(parent_id)
            .bind(sort_order)
            .bind(input.detail_enabled)
            .execute(pool)
            .await?
            .last_insert_rowid()
        }
    };

    get_group(pool, id).await
}

/// Deletes a group. Under [`DeletePolicy::Reject`] the group must have no
/// child groups and no helpers; [`DeletePolicy::Cascade`] removes the whole
/// subtree including its helpers.
pub async fn delete_group(
    pool: &SqlitePool,
    id: i64,
    policy: DeletePolicy,
) -> Result<GroupDelete, AppError> {
    if !group_exists(pool, id).await? {
        return Err(AppError::NotFound(format!("Group {id} not found")));
    }

    if policy == DeletePolicy::Reject {
        let children = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM groups WHERE parent_id = ?",
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        if children > 0 {
            return Err(AppError::Conflict(format!(
                "Group {id} still has {children} child group(s)"
            )));
        }

        let helpers =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM helpers WHERE group_id = ?")
                .bind(id)
                .fetch_one(pool)
                .await?;
        if helpers > 0 {
            return Err(AppError::Conflict(format!(
                "Group {id} still has {helpers} helper(s)"
            )));
        }
    }

    // Breadth-first over the subtree; under Reject this is just [id].
    let mut subtree = vec![id];
    let mut cursor = 0;
    while cursor < subtree.len() {
        let children = sqlx::query_scalar::<_, i64>("SELECT id FROM groups WHERE parent_id = ?")
            .bind(subtree[cursor])
            .fetch_all(pool)
            .await?;
        subtree.extend(children);
        cursor += 1;
    }

    let mut orphaned_files = Vec::new();
    let mut tx = pool.begin().await?;

    for &gid in &subtree {
        let photos = sqlx::query_scalar::<_, Option<String>>(
            "SELECT photo_path FROM helpers WHERE group_id = ?",
        )
        .bind(gid)
        .fetch_all(&mut *tx)
        .await?;
        orphaned_files.extend(photos.into_iter().flatten());

        let images =
            sqlx::query_scalar::<_, String>("SELECT path FROM group_images WHERE group_id = ?")
                .bind(gid)
                .fetch_all(&mut *tx)
                .await?;
        orphaned_files.extend(images);

        sqlx::query(
            "DELETE FROM helper_secondary_functions
             WHERE helper_id IN (SELECT id FROM helpers WHERE group_id = ?)",
        )
        .bind(gid)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM helpers WHERE group_id = ?")
            .bind(gid)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM group_images WHERE group_id = ?")
            .bind(gid)
            .execute(&mut *tx)
            .await?;
    }

    // Children before parents so the self-referencing FK stays satisfied.
    for &gid in subtree.iter().rev() {
        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(gid)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;

    info!(group = id, removed = subtree.len(), "Deleted group");
    Ok(GroupDelete {
        removed_group_ids: subtree,
        orphaned_files,
    })
}

pub async fn list_group_images(
    pool: &SqlitePool,
    group_id: i64,
) -> Result<Vec<GroupImage>, AppError> {
    let images = sqlx::query_as::<_, GroupImage>(
        "SELECT id, group_id, path, sort_order FROM group_images
         WHERE group_id = ? ORDER BY sort_order ASC",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await?;
    Ok(images)
}

pub async fn add_group_image(
    pool: &SqlitePool,
    group_id: i64,
    path: &str,
) -> Result<GroupImage, AppError> {
    if !group_exists(pool, group_id).await? {
        return Err(AppError::NotFound(format!("Group {group_id} not found")));
    }

    let max = sqlx::query_scalar::<_, Option<i64>>(
        "SELECT MAX(sort_order) FROM group_images WHERE group_id = ?",
    )
    .bind(group_id)
    .fetch_one(pool)
    .await?;
    let sort_order = sort::append_after(max);

    let id = sqlx::query("INSERT INTO group_images (group_id, path, sort_order) VALUES (?, ?, ?)")
        .bind(group_id)
        .bind(path)
        .bind(sort_order)
        .execute(pool)
        .await?
        .last_insert_rowid();

    Ok(GroupImage {
        id,
        group_id,
        path: path.to_string(),
        sort_order,
    })
}

/// Removes a group image record, returning the file reference.
pub async fn delete_group_image(
    pool: &SqlitePool,
    group_id: i64,
    image_id: i64,
) -> Result<String, AppError> {
    let path = sqlx::query_scalar::<_, String>(
        "SELECT path FROM group_images WHERE id = ? AND group_id = ?",
    )
    .bind(image_id)
    .bind(group_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound(format!("Image {image_id} not found")))?;

    sqlx::query("DELETE FROM group_images WHERE id = ?")
        .bind(image_id)
        .execute(pool)
        .await?;

    Ok(path)
}

/// Bulk import from CSV rows with explicit ids. Names are applied first so
/// parent references may point at groups that appear later in the batch;
/// parents are wired up in a second pass with the usual validation. A group
/// created by a row that then fails is removed again, so a `failed` row
/// never leaves anything behind in the database.
pub async fn import_groups(
    pool: &SqlitePool,
    rows: &[CsvRow<GroupRow>],
) -> Result<ImportReport, AppError> {
    enum Outcome {
        Created,
        Updated,
        Failed(String),
    }

    let mut outcomes: Vec<Outcome> = Vec::with_capacity(rows.len());
    let mut created_now = vec![false; rows.len()];

    for (i, row) in rows.iter().enumerate() {
        let parsed = match &row.parsed {
            Ok(parsed) => parsed,
            Err(message) => {
                outcomes.push(Outcome::Failed(message.clone()));
                continue;
            }
        };

        let name = parsed.name.trim();
        if name.is_empty() {
            outcomes.push(Outcome::Failed("Name is required".to_string()));
            continue;
        }

        if group_exists(pool, parsed.id).await? {
            sqlx::query("UPDATE groups SET name = ? WHERE id = ?")
                .bind(name)
                .bind(parsed.id)
                .execute(pool)
                .await?;
            outcomes.push(Outcome::Updated);
        } else {
            let max = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(sort_order) FROM groups")
                .fetch_one(pool)
                .await?;
            sqlx::query("INSERT INTO groups (id, name, sort_order) VALUES (?, ?, ?)")
                .bind(parsed.id)
                .bind(name)
                .bind(sort::append_after(max))
                .execute(pool)
                .await?;
            outcomes.push(Outcome::Created);
            created_now[i] = true;
        }
    }

    for (row, outcome) in rows.iter().zip(outcomes.iter_mut()) {
        if matches!(outcome, Outcome::Failed(_)) {
            continue;
        }
        let parsed = row.parsed.as_ref().expect("failed rows are skipped above");

        let parent_id = match normalize_parent(parsed.parent_id.as_deref()) {
            Ok(parent_id) => parent_id,
            Err(e) => {
                *outcome = Outcome::Failed(e.to_string());
                continue;
            }
        };

        if let Some(pid) = parent_id {
            if !group_exists(pool, pid).await? {
                *outcome = Outcome::Failed(format!("Parent group {pid} not found"));
                continue;
            }
            if let Err(e) = assert_no_cycle(pool, parsed.id, parent_id).await {
                *outcome = Outcome::Failed(e.to_string());
                continue;
            }
        }

        sqlx::query("UPDATE groups SET parent_id = ? WHERE id = ?")
            .bind(parent_id)
            .bind(parsed.id)
            .execute(pool)
            .await?;
    }

    // Roll back groups this batch created whose row failed. Rows that were
    // wired to a rolled-back parent fail along with it; an updated group
    // only loses the dangling parent edge.
    let mut rollback: Vec<usize> = (0..rows.len())
        .filter(|&i| created_now[i] && matches!(outcomes[i], Outcome::Failed(_)))
        .collect();

    while let Some(i) = rollback.pop() {
        let Ok(failed) = &rows[i].parsed else { continue };
        let gid = failed.id;

        for (j, row) in rows.iter().enumerate() {
            if matches!(outcomes[j], Outcome::Failed(_)) {
                continue;
            }
            let Ok(parsed) = &row.parsed else { continue };
            if !matches!(normalize_parent(parsed.parent_id.as_deref()), Ok(Some(p)) if p == gid) {
                continue;
            }

            outcomes[j] = Outcome::Failed(format!("Parent group {gid} was not imported"));
            if created_now[j] {
                rollback.push(j);
            }
        }

        // Detach dependents before the delete so the parent FK holds.
        sqlx::query("UPDATE groups SET parent_id = NULL WHERE parent_id = ?")
            .bind(gid)
            .execute(pool)
            .await?;
        sqlx::query("DELETE FROM groups WHERE id = ?")
            .bind(gid)
            .execute(pool)
            .await?;
    }

    let mut report = ImportReport::new();
    for (row, outcome) in rows.iter().zip(outcomes) {
        let label = row
            .parsed
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        match outcome {
            Outcome::Created => report.created(row.line, label),
            Outcome::Updated => report.updated(row.line, label),
            Outcome::Failed(message) => report.failed(row.line, label, message),
        }
    }

    Ok(report)
}

pub(crate) async fn group_exists(pool: &SqlitePool, id: i64) -> Result<bool, AppError> {
    let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM groups WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;
    Ok(found > 0)
}

/// Walks the prospective parent chain and rejects an edge that would make
/// `group_id` its own ancestor.
async fn assert_no_cycle(
    pool: &SqlitePool,
    group_id: i64,
    new_parent: Option<i64>,
) -> Result<(), AppError> {
    let mut seen = std::collections::HashSet::new();
    let mut current = new_parent;

    while let Some(pid) = current {
        if pid == group_id {
            return Err(AppError::Validation(format!(
                "Group {group_id} cannot be its own ancestor"
            )));
        }
        if !seen.insert(pid) {
            break;
        }
        current = sqlx::query_scalar::<_, Option<i64>>("SELECT parent_id FROM groups WHERE id = ?")
            .bind(pid)
            .fetch_optional(pool)
            .await?
            .flatten();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use crate::store::{HelperInput, function, helper};

    fn input(name: &str, parent: Option<&str>) -> GroupInput {
        GroupInput {
            name: name.to_string(),
            parent_id: parent.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn parent_normalization_creates_roots() {
        let pool = test_pool().await;

        for raw in ["", "0"] {
            let group = upsert_group(&pool, input("Root", Some(raw))).await.unwrap();
            assert_eq!(group.parent_id, None);
        }
    }

    #[tokio::test]
    async fn dangling_parent_is_not_found() {
        let pool = test_pool().await;

        let err = upsert_group(&pool, input("Orphan", Some("999")))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn cycles_are_rejected() {
        let pool = test_pool().await;

        let a = upsert_group(&pool, input("A", None)).await.unwrap();
        let b = upsert_group(&pool, input("B", Some(&a.id.to_string())))
            .await
            .unwrap();
        let c = upsert_group(&pool, input("C", Some(&b.id.to_string())))
            .await
            .unwrap();

        // A -> C would close the loop A -> C -> B -> A.
        let err = upsert_group(
            &pool,
            GroupInput {
                id: Some(a.id),
                name: "A".to_string(),
                parent_id: Some(c.id.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Self-parenting is the degenerate cycle.
        let err = upsert_group(
            &pool,
            GroupInput {
                id: Some(a.id),
                name: "A".to_string(),
                parent_id: Some(a.id.to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn sibling_sort_order_appends_in_steps() {
        let pool = test_pool().await;

        let first = upsert_group(&pool, input("First", None)).await.unwrap();
        let second = upsert_group(&pool, input("Second", None)).await.unwrap();
        assert_eq!(first.sort_order, 10);
        assert_eq!(second.sort_order, 20);
    }

    #[tokio::test]
    async fn reject_policy_blocks_referenced_groups() {
        let pool = test_pool().await;

        let root = upsert_group(&pool, input("Root", None)).await.unwrap();
        let child = upsert_group(&pool, input("Child", Some(&root.id.to_string())))
            .await
            .unwrap();

        let err = delete_group(&pool, root.id, DeletePolicy::Reject)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        delete_group(&pool, child.id, DeletePolicy::Reject)
            .await
            .unwrap();
        delete_group(&pool, root.id, DeletePolicy::Reject)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cascade_removes_subtree_and_reports_files() {
        let pool = test_pool().await;

        let root = upsert_group(&pool, input("Root", None)).await.unwrap();
        let child = upsert_group(&pool, input("Child", Some(&root.id.to_string())))
            .await
            .unwrap();

        let medic = function::upsert_function(
            &pool,
            crate::store::FunctionInput {
                name: "Medic".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let person = helper::upsert_helper(
            &pool,
            HelperInput {
                first_name: "Jo".to_string(),
                last_name: "Doe".to_string(),
                group_id: child.id,
                function_id: medic.id,
                ..Default::default()
            },
        )
        .await
        .unwrap();
        helper::set_helper_photo(&pool, person.id, "photos/jo.jpg")
            .await
            .unwrap();
        add_group_image(&pool, child.id, "groups/child.jpg")
            .await
            .unwrap();

        let outcome = delete_group(&pool, root.id, DeletePolicy::Cascade)
            .await
            .unwrap();
        assert_eq!(outcome.removed_group_ids.len(), 2);
        assert!(outcome.orphaned_files.contains(&"photos/jo.jpg".to_string()));
        assert!(
            outcome
                .orphaned_files
                .contains(&"groups/child.jpg".to_string())
        );

        assert!(list_groups(&pool).await.unwrap().is_empty());
        assert!(helper::list_helpers(&pool).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn import_supports_forward_parent_references() {
        use crate::import::{CsvRow, GroupRow, RowStatus};

        let pool = test_pool().await;

        let rows = vec![
            CsvRow::ok(
                2,
                GroupRow {
                    id: 2,
                    name: "Child".to_string(),
                    parent_id: Some("1".to_string()),
                },
            ),
            CsvRow::ok(
                3,
                GroupRow {
                    id: 1,
                    name: "Root".to_string(),
                    parent_id: Some("0".to_string()),
                },
            ),
            CsvRow::ok(
                4,
                GroupRow {
                    id: 3,
                    name: "Orphan".to_string(),
                    parent_id: Some("99".to_string()),
                },
            ),
        ];

        let report = import_groups(&pool, &rows).await.unwrap();
        assert_eq!(report.created, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.rows[2].status, RowStatus::Failed);

        let child = get_group(&pool, 2).await.unwrap();
        assert_eq!(child.parent_id, Some(1));
        let root = get_group(&pool, 1).await.unwrap();
        assert_eq!(root.parent_id, None);
    }

    #[tokio::test]
    async fn failed_import_rows_leave_nothing_behind() {
        use crate::import::{CsvRow, GroupRow};

        let pool = test_pool().await;

        let rows = vec![CsvRow::ok(
            2,
            GroupRow {
                id: 3,
                name: "Orphan".to_string(),
                parent_id: Some("99".to_string()),
            },
        )];

        let report = import_groups(&pool, &rows).await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(matches!(
            get_group(&pool, 3).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn rollback_of_a_failed_parent_fails_its_children() {
        use crate::import::{CsvRow, GroupRow};

        let pool = test_pool().await;

        // Child points at Orphan, which itself fails on a missing parent.
        let rows = vec![
            CsvRow::ok(
                2,
                GroupRow {
                    id: 1,
                    name: "Child".to_string(),
                    parent_id: Some("2".to_string()),
                },
            ),
            CsvRow::ok(
                3,
                GroupRow {
                    id: 2,
                    name: "Orphan".to_string(),
                    parent_id: Some("99".to_string()),
                },
            ),
        ];

        let report = import_groups(&pool, &rows).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.created, 0);
        assert!(list_groups(&pool).await.unwrap().is_empty());
    }
}
