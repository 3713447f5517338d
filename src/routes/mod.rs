use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::multipart::{Multipart, MultipartError},
    http::{HeaderValue, header},
    middleware,
    routing::{delete, get, post},
};
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer};

use crate::{error::AppError, state::AppState};

pub mod auth;
pub mod functions;
pub mod groups;
pub mod helpers;
pub mod public;
pub mod settings;

pub fn router(state: Arc<AppState>) -> Router {
    let public = Router::new()
        .route("/api/board", get(public::board))
        .route("/api/groups/{id}", get(public::group_detail))
        .route("/api/last_update", get(public::last_update));

    let admin = Router::new()
        .route("/admin/groups", get(groups::list).post(groups::save))
        .route("/admin/groups/import", post(groups::import))
        .route("/admin/groups/{id}", get(groups::fetch).delete(groups::remove))
        .route("/admin/groups/{id}/images", post(groups::upload_images))
        .route(
            "/admin/groups/{id}/images/{image_id}",
            delete(groups::remove_image),
        )
        .route("/admin/functions", get(functions::list).post(functions::save))
        .route("/admin/functions/import", post(functions::import))
        .route(
            "/admin/functions/{id}",
            get(functions::fetch).delete(functions::remove),
        )
        .route("/admin/functions/{id}/reorder", post(functions::reorder))
        .route(
            "/admin/functions/{id}/emblem",
            post(functions::upload_emblem).delete(functions::remove_emblem),
        )
        .route("/admin/helpers", get(helpers::list).post(helpers::save))
        .route("/admin/helpers/import", post(helpers::import))
        .route("/admin/helpers/import_photos", post(helpers::import_photos))
        .route(
            "/admin/helpers/{id}",
            get(helpers::fetch).delete(helpers::remove),
        )
        .route(
            "/admin/helpers/{id}/photo",
            post(helpers::upload_photo).delete(helpers::remove_photo),
        )
        .route("/admin/settings", get(settings::fetch).put(settings::save))
        .route("/admin/settings/carousel", post(settings::upload_carousel))
        .route(
            "/admin/settings/carousel/{id}",
            delete(settings::remove_carousel),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_admin,
        ));

    // Upload references are random, so the files themselves never change.
    let uploads = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("public, max-age=31536000, immutable"),
        ))
        .service(ServeDir::new(state.files.root()));

    Router::new()
        .merge(public)
        .merge(admin)
        .nest_service("/uploads", uploads)
        .with_state(state)
}

/// Delete endpoints accept an explicit `?cascade=` override of the
/// configured policy.
#[derive(serde::Deserialize)]
pub(crate) struct DeleteParams {
    pub cascade: Option<bool>,
}

impl DeleteParams {
    pub fn policy(&self, default: crate::config::DeletePolicy) -> crate::config::DeletePolicy {
        use crate::config::DeletePolicy;
        match self.cascade {
            Some(true) => DeletePolicy::Cascade,
            Some(false) => DeletePolicy::Reject,
            None => default,
        }
    }
}

pub(crate) struct Upload {
    pub file_name: String,
    pub data: Bytes,
}

/// Pulls the next file field out of a multipart body, skipping plain
/// fields.
pub(crate) async fn next_upload(multipart: &mut Multipart) -> Result<Option<Upload>, AppError> {
    while let Some(field) = multipart.next_field().await.map_err(bad_multipart)? {
        let Some(file_name) = field.file_name().map(String::from) else {
            continue;
        };
        let data = field.bytes().await.map_err(bad_multipart)?;
        return Ok(Some(Upload { file_name, data }));
    }
    Ok(None)
}

pub(crate) async fn require_upload(mut multipart: Multipart) -> Result<Upload, AppError> {
    next_upload(&mut multipart)
        .await?
        .ok_or_else(|| AppError::MalformedPayload("Missing file upload".to_string()))
}

fn bad_multipart(err: MultipartError) -> AppError {
    AppError::MalformedPayload(err.to_string())
}
