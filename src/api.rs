use axum::{
    Json, Router,
    extract::{Multipart, Path, Query, Request, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use serde::Deserialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    app_state::AppState,
    vault::{CredentialFields, EntryPatch, VaultError},
};

#[derive(Deserialize)]
pub struct UnlockRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct SetupRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct DuressRequest {
    pub password: String,
}

#[derive(Deserialize)]
pub struct SecondFactorRequest {
    /// Base64-encoded opaque payload; interpreting it is a collaborator's job.
    pub payload: String,
}

#[derive(Deserialize)]
pub struct AddCredentialRequest {
    pub title: String,
    #[serde(flatten)]
    pub fields: CredentialFields,
}

#[derive(Deserialize)]
pub struct AddNoteRequest {
    pub title: String,
    pub content: String,
}

#[derive(Deserialize)]
pub struct SearchParams {
    pub q: Option<String>,
}

pub fn get_api_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/entries", get(list_or_search_entries))
        .route("/entries/credential", post(add_credential))
        .route("/entries/note", post(add_note))
        .route("/entries/file", post(add_file))
        .route("/entries/{id}", get(get_entry))
        .route("/entries/{id}", patch(update_entry))
        .route("/entries/{id}", delete(delete_entry))
        .route("/entries/{id}/file", get(download_file))
        .route("/entries/{id}/favorite", post(toggle_favorite))
        .route("/second-factor", post(set_second_factor))
        .route("/duress", post(configure_duress))
        .route("/stats", get(get_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/status", get(get_status))
        .route("/unlock", post(unlock_vault))
        .route("/setup", post(setup_vault))
        .route("/logout", post(logout))
        .route("/lock", post(lock_vault))
        .merge(protected_routes)
        .with_state(state)
}

async fn auth_middleware(
    State(state): State<AppState>,
    session: Session,
    request: Request,
    next: middleware::Next,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let is_authenticated = session
        .get::<bool>("authenticated")
        .await
        .unwrap_or(None)
        .unwrap_or(false);

    if !is_authenticated {
        return Err((StatusCode::UNAUTHORIZED, "Not authenticated".to_string()));
    }

    if !state.vault.is_unlocked() {
        return Err((StatusCode::FORBIDDEN, "Vault is locked".to_string()));
    }

    Ok(next.run(request).await)
}

fn map_error(err: VaultError) -> (StatusCode, String) {
    tracing::warn!(error = %err, "vault operation failed");
    let status = match &err {
        VaultError::NotFound(_) => StatusCode::NOT_FOUND,
        VaultError::Locked => StatusCode::FORBIDDEN,
        VaultError::Auth(_) => StatusCode::UNAUTHORIZED,
        VaultError::AlreadyInitialized | VaultError::Conflict => StatusCode::CONFLICT,
        VaultError::NotInitialized => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.public_message().to_string())
}

async fn get_status(State(state): State<AppState>, session: Session) -> impl IntoResponse {
    let is_authenticated = session
        .get("authenticated")
        .await
        .unwrap_or(None)
        .unwrap_or(false);

    Json(serde_json::json!({
        "initialized": state.vault.exists().await,
        "unlocked": state.vault.is_unlocked(),
        "duress": state.vault.is_duress(),
        "authenticated": is_authenticated,
    }))
}

async fn logout(session: Session) -> impl IntoResponse {
    session.flush().await.ok();
    (StatusCode::OK, "Logged out")
}

async fn lock_vault(State(state): State<AppState>, session: Session) -> impl IntoResponse {
    session.flush().await.ok();
    state.vault.lock();
    (StatusCode::OK, "Vault locked and logged out")
}

async fn setup_vault(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<SetupRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state.vault.init(&payload.password).await.map_err(map_error)?;

    session
        .insert("authenticated", true)
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string()))?;

    Ok((StatusCode::CREATED, "Vault initialized and unlocked"))
}

async fn unlock_vault(
    State(state): State<AppState>,
    session: Session,
    Json(payload): Json<UnlockRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state.vault.unlock(&payload.password).await.map_err(map_error)?;

    session
        .insert("authenticated", true)
        .await
        .map_err(|_| (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string()))?;

    Ok("Vault unlocked")
}

async fn configure_duress(
    State(state): State<AppState>,
    Json(payload): Json<DuressRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .vault
        .configure_duress(&payload.password)
        .await
        .map_err(map_error)?;
    Ok((StatusCode::OK, "Duress passphrase configured"))
}

async fn set_second_factor(
    State(state): State<AppState>,
    Json(payload): Json<SecondFactorRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let decoded = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &payload.payload)
        .map_err(|_| (StatusCode::BAD_REQUEST, "payload is not valid base64".to_string()))?;
    state
        .vault
        .set_second_factor_config(&decoded)
        .await
        .map_err(map_error)?;
    Ok((StatusCode::OK, "Second factor configured"))
}

async fn list_or_search_entries(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entries = match params.q {
        Some(query) if !query.trim().is_empty() => state.vault.search(&query).await,
        _ => state.vault.list().await,
    }
    .map_err(map_error)?;

    Ok(Json(entries))
}

async fn add_credential(
    State(state): State<AppState>,
    Json(payload): Json<AddCredentialRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state
        .vault
        .add_credential(&payload.title, payload.fields)
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn add_note(
    State(state): State<AppState>,
    Json(payload): Json<AddNoteRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state
        .vault
        .add_note(&payload.title, &payload.content)
        .await
        .map_err(map_error)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn add_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut title: Option<String> = None;
    let mut tmp_path: Option<std::path::PathBuf> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?
    {
        match field.name().unwrap_or_default() {
            "title" => {
                title = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?,
                );
            }
            "file" => {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
                let path = std::env::temp_dir().join(format!("slasshy-upload-{}", uuid::Uuid::new_v4()));
                tokio::fs::write(&path, &bytes)
                    .await
                    .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
                tmp_path = Some(path);
            }
            _ => {}
        }
    }

    let title = title.ok_or((StatusCode::BAD_REQUEST, "Missing title field".to_string()))?;
    let path = tmp_path.ok_or((StatusCode::BAD_REQUEST, "No file provided".to_string()))?;

    let result = state.vault.add_file(&title, &path, None).await;
    let _ = tokio::fs::remove_file(&path).await;
    let entry = result.map_err(map_error)?;

    Ok((StatusCode::CREATED, Json(entry)))
}

async fn get_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.vault.get(id).await.map_err(map_error)?;
    Ok(Json(entry))
}

async fn update_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<EntryPatch>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.vault.update(id, patch).await.map_err(map_error)?;
    Ok(Json(entry))
}

async fn toggle_favorite(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let entry = state.vault.toggle_favorite(id).await.map_err(map_error)?;
    Ok(Json(entry))
}

async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    state.vault.delete(id).await.map_err(map_error)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let meta = state.vault.get_file_meta(id).await.map_err(map_error)?;
    let bytes = state.vault.get_file_bytes(id).await.map_err(map_error)?;

    Ok((
        [
            (axum::http::header::CONTENT_TYPE, meta.mime_type),
            (
                axum::http::header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", meta.original_name),
            ),
        ],
        bytes,
    ))
}

async fn get_stats(State(state): State<AppState>) -> Result<impl IntoResponse, (StatusCode, String)> {
    let stats = state.vault.stats().await.map_err(map_error)?;
    Ok(Json(stats))
}
