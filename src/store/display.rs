//! Read models for the public display page.

use std::collections::HashMap;

use serde::Serialize;
use sqlx::SqlitePool;

use super::{Function, Group, GroupImage};
use crate::error::AppError;

/// A helper tile: only the primary function's emblem is shown publicly.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct DisplayHelper {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub photo_path: Option<String>,
    pub group_id: i64,
    pub function_id: i64,
    pub function_name: String,
    pub emblem_path: Option<String>,
}

/// One node of the board tree, children nested in display order.
#[derive(Debug, Serialize)]
pub struct DisplayGroup {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub sort_order: i64,
    pub detail_enabled: bool,
    pub helpers: Vec<DisplayHelper>,
    pub children: Vec<DisplayGroup>,
}

/// Helpers of one group bucketed by primary function, in function order.
#[derive(Debug, Serialize)]
pub struct FunctionSection {
    pub function: Function,
    pub helpers: Vec<DisplayHelper>,
}

#[derive(Debug, Serialize)]
pub struct GroupDetail {
    pub group: Group,
    pub images: Vec<GroupImage>,
    pub sections: Vec<FunctionSection>,
}

const HELPER_JOIN: &str = "SELECT h.id, h.first_name, h.last_name, h.photo_path, h.group_id,
        h.function_id, f.name AS function_name, f.emblem_path
 FROM helpers h JOIN functions f ON f.id = h.function_id";

/// The full group forest with attached helpers, every level in display
/// order. Row-wrapping of tiles is the display page's concern.
pub async fn list_for_display(pool: &SqlitePool) -> Result<Vec<DisplayGroup>, AppError> {
    let groups = sqlx::query_as::<_, Group>(
        "SELECT id, name, description, parent_id, sort_order, detail_enabled
         FROM groups ORDER BY sort_order ASC, name ASC",
    )
    .fetch_all(pool)
    .await?;

    let helpers = sqlx::query_as::<_, DisplayHelper>(&format!(
        "{HELPER_JOIN} ORDER BY f.sort_order ASC, h.last_name ASC, h.first_name ASC"
    ))
    .fetch_all(pool)
    .await?;

    let mut helpers_by_group: HashMap<i64, Vec<DisplayHelper>> = HashMap::new();
    for helper in helpers {
        helpers_by_group.entry(helper.group_id).or_default().push(helper);
    }

    let mut children_by_parent: HashMap<Option<i64>, Vec<Group>> = HashMap::new();
    for group in groups {
        children_by_parent
            .entry(group.parent_id)
            .or_default()
            .push(group);
    }

    Ok(build_level(None, &mut children_by_parent, &mut helpers_by_group))
}

fn build_level(
    parent: Option<i64>,
    children_by_parent: &mut HashMap<Option<i64>, Vec<Group>>,
    helpers_by_group: &mut HashMap<i64, Vec<DisplayHelper>>,
) -> Vec<DisplayGroup> {
    let Some(level) = children_by_parent.remove(&parent) else {
        return Vec::new();
    };

    level
        .into_iter()
        .map(|group| {
            let children = build_level(Some(group.id), children_by_parent, helpers_by_group);
            DisplayGroup {
                id: group.id,
                name: group.name,
                description: group.description,
                sort_order: group.sort_order,
                detail_enabled: group.detail_enabled,
                helpers: helpers_by_group.remove(&group.id).unwrap_or_default(),
                children,
            }
        })
        .collect()
}

/// Functions actually in use by helpers (primary or secondary) with a
/// positive sort order; this is the emblem legend on the display page.
pub async fn legend(pool: &SqlitePool) -> Result<Vec<Function>, AppError> {
    let functions = sqlx::query_as::<_, Function>(
        "SELECT id, name, short_name, legend_name, emblem_path, sort_order FROM functions
         WHERE sort_order > 0
           AND (id IN (SELECT function_id FROM helpers)
             OR id IN (SELECT function_id FROM helper_secondary_functions))
         ORDER BY sort_order ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(functions)
}

/// Groups that expose a public detail page, for navigation.
pub async fn detail_groups(pool: &SqlitePool) -> Result<Vec<Group>, AppError> {
    let groups = sqlx::query_as::<_, Group>(
        "SELECT id, name, description, parent_id, sort_order, detail_enabled
         FROM groups WHERE detail_enabled = 1 ORDER BY sort_order ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(groups)
}

/// Detail view of one group; only groups with `detail_enabled` are public.
pub async fn group_detail(pool: &SqlitePool, id: i64) -> Result<GroupDetail, AppError> {
    let group = super::group::get_group(pool, id).await?;
    if !group.detail_enabled {
        return Err(AppError::NotFound(format!("Group {id} not found")));
    }

    let images = super::group::list_group_images(pool, id).await?;

    let helpers = sqlx::query_as::<_, DisplayHelper>(&format!(
        "{HELPER_JOIN} WHERE h.group_id = ?
         ORDER BY f.sort_order ASC, h.last_name ASC, h.first_name ASC"
    ))
    .bind(id)
    .fetch_all(pool)
    .await?;

    let functions: HashMap<i64, Function> = super::function::list_functions(pool)
        .await?
        .into_iter()
        .map(|f| (f.id, f))
        .collect();

    let mut sections: Vec<FunctionSection> = Vec::new();
    for helper in helpers {
        match sections.last_mut() {
            Some(section) if section.function.id == helper.function_id => {
                section.helpers.push(helper);
            }
            _ => {
                let function = functions
                    .get(&helper.function_id)
                    .cloned()
                    .ok_or_else(|| {
                        AppError::NotFound(format!("Function {} not found", helper.function_id))
                    })?;
                sections.push(FunctionSection {
                    function,
                    helpers: vec![helper],
                });
            }
        }
    }

    Ok(GroupDetail {
        group,
        images,
        sections,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_pool;
    use crate::store::{FunctionInput, GroupInput, HelperInput, function, group, helper};

    async fn add_group(pool: &SqlitePool, name: &str, parent: Option<i64>) -> Group {
        group::upsert_group(
            pool,
            GroupInput {
                name: name.to_string(),
                parent_id: parent.map(|p| p.to_string()),
                detail_enabled: true,
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    async fn add_function(pool: &SqlitePool, name: &str) -> Function {
        function::upsert_function(
            pool,
            FunctionInput {
                name: name.to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
    }

    async fn add_helper(pool: &SqlitePool, first: &str, last: &str, group: i64, func: i64) {
        helper::upsert_helper(
            pool,
            HelperInput {
                first_name: first.to_string(),
                last_name: last.to_string(),
                group_id: group,
                function_id: func,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn tree_is_nested_and_ordered() {
        let pool = test_pool().await;

        let root = add_group(&pool, "Root", None).await;
        let beta = add_group(&pool, "Beta", Some(root.id)).await;
        let alpha = add_group(&pool, "Alpha", Some(root.id)).await;

        // Same sort order: names break the tie.
        group::upsert_group(
            &pool,
            GroupInput {
                id: Some(alpha.id),
                name: "Alpha".to_string(),
                parent_id: Some(root.id.to_string()),
                sort_order: Some(beta.sort_order),
                detail_enabled: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let chief = add_function(&pool, "Chief").await;
        let medic = add_function(&pool, "Medic").await;
        add_helper(&pool, "Zoe", "Young", root.id, medic.id).await;
        add_helper(&pool, "Amy", "Able", root.id, chief.id).await;

        let tree = list_for_display(&pool).await.unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].name, "Root");

        let children: Vec<&str> = tree[0].children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(children, vec!["Alpha", "Beta"]);

        // Chief sorts before Medic (function order beats helper name).
        let names: Vec<&str> = tree[0]
            .helpers
            .iter()
            .map(|h| h.last_name.as_str())
            .collect();
        assert_eq!(names, vec!["Able", "Young"]);
        assert_eq!(tree[0].helpers[0].function_name, "Chief");
    }

    #[tokio::test]
    async fn legend_only_lists_functions_in_use() {
        let pool = test_pool().await;

        let squad = add_group(&pool, "Squad", None).await;
        let used = add_function(&pool, "Used").await;
        add_function(&pool, "Unused").await;
        add_helper(&pool, "Jo", "Doe", squad.id, used.id).await;

        let legend = legend(&pool).await.unwrap();
        assert_eq!(legend.len(), 1);
        assert_eq!(legend[0].name, "Used");
    }

    #[tokio::test]
    async fn detail_view_groups_by_primary_function() {
        let pool = test_pool().await;

        let squad = add_group(&pool, "Squad", None).await;
        let chief = add_function(&pool, "Chief").await;
        let medic = add_function(&pool, "Medic").await;
        add_helper(&pool, "Amy", "Able", squad.id, chief.id).await;
        add_helper(&pool, "Jo", "Doe", squad.id, medic.id).await;
        add_helper(&pool, "Max", "Mild", squad.id, medic.id).await;

        let detail = group_detail(&pool, squad.id).await.unwrap();
        assert_eq!(detail.sections.len(), 2);
        assert_eq!(detail.sections[0].function.name, "Chief");
        assert_eq!(detail.sections[1].helpers.len(), 2);
    }

    #[tokio::test]
    async fn detail_view_requires_detail_enabled() {
        let pool = test_pool().await;

        let hidden = group::upsert_group(
            &pool,
            GroupInput {
                name: "Hidden".to_string(),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert!(matches!(
            group_detail(&pool, hidden.id).await,
            Err(AppError::NotFound(_))
        ));
    }
}
