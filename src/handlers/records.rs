use axum::extract::{OriginalUri, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::Deserialize;
use validator::Validate;

use crate::db::{FileEntry, UploadRecord};
use crate::error::{AppError, Result};
use crate::state::AppState;

pub(crate) async fn all(State(state): State<AppState>) -> Result<Json<Vec<UploadRecord>>> {
    Ok(Json(state.db.all().await?))
}

pub(crate) async fn load(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<FileEntry>>> {
    Ok(Json(state.db.load_files(&user_id).await?))
}

pub(crate) async fn load_image(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(user_id): Path<String>,
) -> Result<Response> {
    // the image listing is only served from the /image subtree
    if !uri.path().split('/').any(|seg| seg == "image") {
        return Ok(StatusCode::NOT_FOUND.into_response());
    }
    Ok(Json(state.db.load_image_urls(&user_id).await?).into_response())
}

pub(crate) async fn create(
    State(state): State<AppState>,
    Json(record): Json<UploadRecord>,
) -> Result<(StatusCode, Json<u64>)> {
    record.validate()?;
    let rows = state.db.create(&record).await?;
    Ok((StatusCode::CREATED, Json(rows)))
}

pub(crate) async fn update(
    State(state): State<AppState>,
    Json(record): Json<UploadRecord>,
) -> Result<Json<u64>> {
    record.validate()?;
    Ok(Json(state.db.update(&record).await?))
}

#[derive(Debug, Deserialize)]
pub(crate) struct DeleteParams {
    #[serde(rename = "userId")]
    user_id: Option<String>,
    url: Option<String>,
}

impl DeleteParams {
    pub(crate) fn require(self) -> Result<(String, String)> {
        let user_id = self
            .user_id
            .filter(|s| !s.is_empty())
            .ok_or(AppError::MissingField("userId"))?;
        let url = self
            .url
            .filter(|s| !s.is_empty())
            .ok_or(AppError::MissingField("url"))?;
        Ok((user_id, url))
    }
}

pub(crate) async fn delete_entry(
    State(state): State<AppState>,
    Form(params): Form<DeleteParams>,
) -> Result<Json<u64>> {
    let (user_id, url) = params.require()?;
    Ok(Json(state.db.delete_entry(&user_id, &url).await?))
}
