//! HTTP layer: JSON API plus static serving of the app shell and library.

use crate::import::{run_import_sync, ImportRequest, ImportTracker};
use crate::library::{BookSummary, CategoryStore, LibraryError, LibraryManager, UserMetadata};
use axum::{
    body::Bytes,
    extract::{Path as UrlPath, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};
use uuid::Uuid;

/// Shared state injected into every handler.
#[derive(Clone)]
pub struct ApiState {
    pub tracker: ImportTracker,
    pub library: LibraryManager,
    pub categories: CategoryStore,
    pub library_root: PathBuf,
    pub upload_dir: PathBuf,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Build the router: API routes first, then static fallback — app shell
/// files, and under that the library root so extracted book content is
/// directly fetchable.
pub fn create_router(state: ApiState, app_shell_dir: PathBuf) -> Router {
    let static_files = ServeDir::new(app_shell_dir).fallback(ServeDir::new(&state.library_root));
    Router::new()
        .route("/api/books", get(list_books))
        .route("/api/books/:book_dir", delete(delete_book))
        .route("/api/upload", post(upload_archive))
        .route("/api/import/:task_id", get(poll_import))
        .route(
            "/api/user-metadata",
            get(get_user_metadata).post(set_user_metadata),
        )
        .fallback_service(static_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn list_books(State(state): State<ApiState>) -> Json<Vec<BookSummary>> {
    let library = state.library.clone();
    // Listing re-parses every descriptor; keep it off the async workers.
    let books = tokio::task::spawn_blocking(move || library.list_books())
        .await
        .unwrap_or_default();
    Json(books)
}

#[derive(Debug, Deserialize)]
struct UploadParams {
    /// Client-supplied file name; the book directory derives from it.
    name: String,
    /// Comma-separated category list.
    categories: Option<String>,
    /// Block until the import finishes instead of returning a task id.
    #[serde(default)]
    sync: bool,
}

#[derive(Debug, Serialize)]
struct UploadAccepted {
    success: bool,
    task_id: String,
}

#[derive(Debug, Serialize)]
struct UploadCompleted {
    success: bool,
    logs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    book_dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Accept an archive as the raw request body. Default mode saves it and
/// returns a task id for polling; `sync=true` is the compatibility path that
/// blocks until the import finishes and returns the full log list.
async fn upload_archive(
    State(state): State<ApiState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Response {
    if params.name.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing file name");
    }
    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Empty upload body");
    }

    if let Err(e) = tokio::fs::create_dir_all(&state.upload_dir).await {
        error!("Failed to create upload dir: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    let archive_path = state
        .upload_dir
        .join(format!("{}.zip", Uuid::new_v4().simple()));
    if let Err(e) = tokio::fs::write(&archive_path, &body).await {
        error!("Failed to save upload: {}", e);
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    info!("Saved upload {} ({} bytes)", params.name, body.len());

    let categories: Vec<String> = params
        .categories
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    let request = ImportRequest {
        archive_path,
        display_name: params.name,
        categories,
    };

    if params.sync {
        let library_root = state.library_root.clone();
        let category_store = state.categories.clone();
        let joined = tokio::task::spawn_blocking(move || {
            run_import_sync(&library_root, &category_store, &request)
        })
        .await;
        let Ok((logs, result)) = joined else {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Import worker panicked");
        };
        return match result {
            Ok(book_dir) => Json(UploadCompleted {
                success: true,
                logs,
                book_dir: Some(book_dir),
                error: None,
            })
            .into_response(),
            Err(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UploadCompleted {
                    success: false,
                    logs,
                    book_dir: None,
                    error: Some(e.to_string()),
                }),
            )
                .into_response(),
        };
    }

    let task_id = state.tracker.submit(request);
    Json(UploadAccepted {
        success: true,
        task_id,
    })
    .into_response()
}

#[derive(Debug, Deserialize)]
struct PollParams {
    /// Log cursor from the previous poll's `next_index`. Negative values are
    /// treated as zero.
    since: Option<i64>,
}

async fn poll_import(
    State(state): State<ApiState>,
    UrlPath(task_id): UrlPath<String>,
    Query(params): Query<PollParams>,
) -> impl IntoResponse {
    let since = params.since.unwrap_or(0).max(0) as usize;
    Json(state.tracker.poll(&task_id, since))
}

async fn get_user_metadata(State(state): State<ApiState>) -> Json<UserMetadata> {
    Json(state.categories.load())
}

#[derive(Debug, Deserialize)]
struct UserMetadataUpdate {
    book_dir: String,
    categories: Vec<String>,
}

#[derive(Debug, Serialize)]
struct UserMetadataUpdated {
    success: bool,
    categories: Vec<String>,
}

async fn set_user_metadata(
    State(state): State<ApiState>,
    Json(update): Json<UserMetadataUpdate>,
) -> Response {
    if update.book_dir.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Missing book_dir");
    }
    match state.categories.replace(&update.book_dir, &update.categories) {
        Ok(categories) => Json(UserMetadataUpdated {
            success: true,
            categories,
        })
        .into_response(),
        Err(e) => {
            error!("Failed to save user metadata: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct DeleteResponse {
    success: bool,
    message: String,
}

async fn delete_book(State(state): State<ApiState>, UrlPath(book_dir): UrlPath<String>) -> Response {
    match state.library.delete_book(&book_dir) {
        Ok(()) => Json(DeleteResponse {
            success: true,
            message: format!("Book \"{}\" deleted.", book_dir),
        })
        .into_response(),
        Err(LibraryError::InvalidBookDir(_)) => {
            error_response(StatusCode::BAD_REQUEST, "Invalid book directory provided.")
        }
        Err(LibraryError::NotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "Book not found.")
        }
        Err(e) => {
            error!("Failed to delete book {}: {}", book_dir, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}
