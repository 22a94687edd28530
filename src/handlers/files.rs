use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::{Form, Json};

use super::records::DeleteParams;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Multipart upload: field `file` carries the payload, the optional field
/// `id` names the user (absent means the empty user id). The coarse
/// category stored on the entry is the major part of the content type.
pub(crate) async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<String>)> {
    let mut user_id = String::new();
    let mut payload: Option<(String, String, Vec<u8>)> = None;

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(|n| n.to_owned());
        match name.as_deref() {
            Some("id") => user_id = field.text().await?,
            Some("file") => {
                let file_name = field
                    .file_name()
                    .map(|f| f.to_owned())
                    .ok_or(AppError::MissingField("file"))?;
                let content_type = match field.content_type() {
                    Some(ct) if !ct.is_empty() => ct.to_owned(),
                    _ => mime_guess::from_path(&file_name)
                        .first_or_octet_stream()
                        .to_string(),
                };
                let bytes = field.bytes().await?.to_vec();
                payload = Some((file_name, content_type, bytes));
            }
            _ => (),
        }
    }

    let (file_name, content_type, bytes) = payload.ok_or(AppError::MissingField("file"))?;
    let category = content_type.split('/').next().unwrap_or_default().to_owned();

    tracing::info!(
        "uploading {file_name} ({content_type}, {} bytes) for user {user_id:?}",
        bytes.len()
    );
    let url = state
        .transfer
        .upload_file(&user_id, &category, &file_name, bytes, &content_type)
        .await?;

    Ok((StatusCode::CREATED, Json(url)))
}

pub(crate) async fn delete_file(
    State(state): State<AppState>,
    Form(params): Form<DeleteParams>,
) -> Result<Json<bool>> {
    let (user_id, url) = params.require()?;
    Ok(Json(state.transfer.delete_file(&user_id, &url).await?))
}
