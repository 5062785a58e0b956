//! Request handlers.

use apkrepo_core::{IndexState, UploadOutcome};
use apkrepo_schema::Arch;
use axum::Json;
use axum::extract::{Multipart, Query, State};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::{ApiError, ApiResult};
use super::state::AppState;

/// Multipart field carrying package files.
const FILE_FIELD: &str = "file";

#[derive(Debug, Deserialize)]
pub(super) struct ArchQuery {
    arch: Option<String>,
}

impl ArchQuery {
    fn resolve(&self, state: &AppState) -> ApiResult<Arch> {
        match self.arch.as_deref().filter(|a| !a.is_empty()) {
            None => Ok(state.repo.config().default_arch),
            Some(raw) => raw.parse().map_err(|_| {
                ApiError::BadRequest(format!(
                    "Invalid architecture! Options: {}. Default: {}",
                    Arch::options(),
                    state.repo.config().default_arch
                ))
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct Health {
    status: &'static str,
    driver: &'static str,
}

pub(super) async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        driver: state.repo.driver_name(),
    })
}

pub(super) async fn upload(
    State(state): State<AppState>,
    Query(query): Query<ArchQuery>,
    multipart: Multipart,
) -> ApiResult<String> {
    let arch = query.resolve(&state)?;
    let mut files = read_files(multipart).await?;
    files.truncate(1);
    let outcome = state.repo.add_packages(arch, files).await?;
    Ok(respond(&outcome))
}

pub(super) async fn bulk_upload(
    State(state): State<AppState>,
    Query(query): Query<ArchQuery>,
    multipart: Multipart,
) -> ApiResult<String> {
    let arch = query.resolve(&state)?;
    let files = read_files(multipart).await?;
    let outcome = state.repo.add_packages(arch, files).await?;
    Ok(respond(&outcome))
}

pub(super) async fn rebuild(
    State(state): State<AppState>,
    Query(query): Query<ArchQuery>,
) -> ApiResult<String> {
    let arch = query.resolve(&state)?;
    state.repo.rebuild_index(arch).await?;
    Ok("OK".to_string())
}

/// Collect every `file` part of the request in order.
async fn read_files(mut multipart: Multipart) -> ApiResult<Vec<(String, Bytes)>> {
    let mut files = Vec::new();
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(FILE_FIELD) {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(ApiError::BadRequest("No selected file".to_string()));
        }
        let data = field.bytes().await?;
        files.push((filename, data));
    }
    if files.is_empty() {
        return Err(ApiError::BadRequest("No file part".to_string()));
    }
    Ok(files)
}

fn respond(outcome: &UploadOutcome) -> String {
    match &outcome.index {
        IndexState::SigningFailed(reason) => format!("OK (index unsigned: {reason})"),
        IndexState::Signed | IndexState::Unsigned => "OK".to_string(),
    }
}
