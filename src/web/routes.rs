use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use tokio_util::io::ReaderStream;

use super::AppState;
use crate::api::{
    DownloadRequest, DownloadResponse, ErrorResponse, PostsQuery, QueueAccepted, QueueRequest,
};
use crate::download::DownloadJob;
use crate::error::Error;

/// Create the router with all routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/posts", get(list_posts))
        .route("/api/post/:id", get(post_detail))
        .route("/api/download", post(download))
        .route("/api/queue", get(queue_status).post(start_queue))
        .route("/downloads/:filename", get(serve_download))
        .route("/healthz", get(health))
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

// ========== Upstream ==========

async fn list_posts(State(state): State<AppState>, Query(query): Query<PostsQuery>) -> Response {
    let offset = query.offset();
    match state.upstream.fetch_posts(offset).await {
        Ok(posts) => Json(posts).into_response(),
        Err(e) => {
            tracing::error!(offset, error = %e, "Failed to fetch posts");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch posts")
        }
    }
}

async fn post_detail(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.upstream.fetch_post_detail(&id).await {
        Ok(detail) => Json(detail).into_response(),
        Err(e @ Error::Validation { .. }) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            tracing::error!(post_id = %id, error = %e, "Failed to fetch post details");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to fetch post details",
            )
        }
    }
}

// ========== Downloads ==========

async fn download(
    State(state): State<AppState>,
    body: Result<Json<DownloadRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            tracing::debug!(error = %rejection, "Rejected download request body");
            return error_response(StatusCode::BAD_REQUEST, "URL and filename are required");
        }
    };

    let (Some(url), Some(filename)) = (
        request.url.filter(|u| !u.trim().is_empty()),
        request.filename.filter(|f| !f.trim().is_empty()),
    ) else {
        return error_response(StatusCode::BAD_REQUEST, "URL and filename are required");
    };

    let job = DownloadJob { url, filename };
    match state.cache.fetch(&job).await {
        Ok(stored) => Json(DownloadResponse {
            success: true,
            message: stored.message().to_string(),
            path: stored.filename,
        })
        .into_response(),
        Err(e @ Error::Validation { .. }) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            tracing::error!(url = %job.url, filename = %job.filename, error = %e, "Download failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to download file")
        }
    }
}

/// `Content-Disposition` value for `filename`, restricted to characters a
/// quoted header parameter can carry.
fn attachment_disposition(filename: &str) -> HeaderValue {
    let safe: String = filename
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

async fn serve_download(State(state): State<AppState>, Path(filename): Path<String>) -> Response {
    let path = match state.cache.stored_path(&filename).await {
        Ok(path) => path,
        Err(Error::NotFound(_)) => {
            return error_response(StatusCode::NOT_FOUND, "File not found");
        }
        Err(e) => {
            tracing::error!(filename = %filename, error = %e, "Failed to look up stored file");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file");
        }
    };

    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return error_response(StatusCode::NOT_FOUND, "File not found");
        }
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "Failed to open stored file");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file");
        }
    };

    let content_type = mime_guess::from_path(&path)
        .first_or_octet_stream()
        .to_string();
    let body = Body::from_stream(ReaderStream::new(file));

    (
        StatusCode::OK,
        [
            (
                header::CONTENT_TYPE,
                HeaderValue::from_str(&content_type)
                    .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
            ),
            (header::CONTENT_DISPOSITION, attachment_disposition(&filename)),
        ],
        body,
    )
        .into_response()
}

// ========== Queue ==========

async fn start_queue(
    State(state): State<AppState>,
    body: Result<Json<QueueRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let accepted = request.files.len();
    match state.queue.enqueue_all(request.files).await {
        Ok(_handle) => (StatusCode::ACCEPTED, Json(QueueAccepted { accepted })).into_response(),
        Err(e @ Error::QueueBusy) => error_response(StatusCode::CONFLICT, e.to_string()),
        Err(e) => {
            tracing::error!(error = %e, "Failed to start download run");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to start queue")
        }
    }
}

async fn queue_status(State(state): State<AppState>) -> Response {
    Json(state.queue.snapshot().await).into_response()
}

async fn health() -> &'static str {
    "OK"
}
