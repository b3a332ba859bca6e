//! Loopback HTTP transfer server for asset content.
//!
//! Binds an ephemeral port on `127.0.0.1` and advertises its base URL to
//! extensions through `state` messages. Two routes on `/assets/:hash`:
//!
//! - `GET` streams stored content with immutable caching headers
//!   (content under a hash never changes).
//! - `POST` streams the request body through a counting SHA-256 filter
//!   into a temp file, verifies the digest against the path, then
//!   commits it to the store. Re-posting a stored hash skips the bytes
//!   entirely and only refreshes metadata.
//!
//! Extensions frequently run inside browser contexts, so every response
//! carries permissive CORS headers and `OPTIONS` preflights are answered
//! directly.

// Rust guideline compliant 2026-08

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::{Path as UrlPath, Query, Request, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;

use super::store::AssetStore;
use super::{finish_hash, is_valid_hash, AssetRecord};
use crate::error::HubError;

/// Cache policy for downloads: content is addressed by hash, so it can
/// be cached forever.
const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";

#[derive(Clone)]
struct ServerState {
    store: AssetStore,
    max_upload_bytes: u64,
}

/// Running transfer server bound to an ephemeral loopback port.
#[derive(Debug)]
pub struct AssetServer {
    base_url: String,
    port: u16,
    serve_handle: JoinHandle<()>,
}

impl AssetServer {
    /// Bind `127.0.0.1:0` and start serving the store.
    ///
    /// The server drains gracefully when `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be bound.
    pub async fn start(
        store: AssetStore,
        max_upload_bytes: u64,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind asset server listener")?;
        let port = listener.local_addr()?.port();
        let base_url = format!("http://127.0.0.1:{port}");

        let state = ServerState {
            store,
            max_upload_bytes,
        };
        let app = Router::new()
            .route("/assets/:hash", get(download).post(upload))
            .layer(middleware::from_fn(cors))
            .with_state(state);

        log::info!("[AssetServer] Listening on {base_url}");

        let serve_handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(cancel.cancelled_owned())
                .await
            {
                log::error!("[AssetServer] Serve error: {e}");
            }
        });

        Ok(Self {
            base_url,
            port,
            serve_handle,
        })
    }

    /// Base URL advertised to extensions, e.g. `http://127.0.0.1:49213`.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Bound port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Force the serve task down. Prefer cancelling the token first so
    /// in-flight transfers can finish.
    pub fn shutdown(self) {
        self.serve_handle.abort();
    }

    /// Wait for the serve task to drain after its token was cancelled.
    pub async fn finished(self) {
        let _ = self.serve_handle.await;
    }
}

/// Optional upload metadata carried on the query string.
#[derive(Debug, Deserialize)]
struct UploadParams {
    mime: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Serialize)]
struct UploadOk {
    ok: bool,
    hash: String,
    size: u64,
}

#[derive(Debug, Serialize)]
struct TransferError {
    ok: bool,
    code: String,
    message: String,
}

/// `GET /assets/:hash` — stream an asset's content.
async fn download(State(state): State<ServerState>, UrlPath(hash): UrlPath<String>) -> Response {
    match state.store.open_stream(&hash).await {
        Ok(Some((file, record))) => {
            let body = Body::from_stream(ReaderStream::new(file));
            let built = Response::builder()
                .header(header::CONTENT_TYPE, record.mime.as_str())
                .header(header::CONTENT_LENGTH, record.size)
                .header(header::CACHE_CONTROL, IMMUTABLE_CACHE)
                .body(body);
            match built {
                Ok(response) => response,
                Err(e) => error_response(&HubError::Internal(e.to_string())),
            }
        }
        Ok(None) => not_found(&hash),
        Err(err) => error_response(&err),
    }
}

/// `POST /assets/:hash` — receive content for the given hash.
async fn upload(
    State(state): State<ServerState>,
    UrlPath(hash): UrlPath<String>,
    Query(params): Query<UploadParams>,
    request: Request,
) -> Response {
    // Validate the path segment before touching the filesystem.
    if !is_valid_hash(&hash) {
        return error_response(&HubError::InvalidHashFormat(hash));
    }
    let mime = params.mime.as_deref().map(sanitize_mime);

    // Idempotent re-upload: the bytes are already on disk, so only the
    // metadata moves. The body still has to be drained for HTTP hygiene.
    if let Some(record) =
        state
            .store
            .refresh_existing(&hash, mime.clone(), params.width, params.height)
    {
        drain_body(request).await;
        return upload_ok(&record);
    }

    let partial = state.store.partial_path();
    let file = match tokio::fs::File::create(&partial).await {
        Ok(file) => file,
        Err(e) => {
            return error_response(&HubError::Internal(format!(
                "failed to create upload file: {e}"
            )))
        }
    };
    // Remove the partial on any early exit; defused once the store has
    // renamed it into place.
    let cleanup = scopeguard::guard(partial.clone(), |path| {
        let _ = std::fs::remove_file(path);
    });

    let (computed, size) = match receive_body(request, file, state.max_upload_bytes).await {
        Ok(received) => received,
        Err(err) => return error_response(&err),
    };

    if size == 0 {
        return error_response(&HubError::UploadIncomplete("empty request body".to_string()));
    }
    if computed != hash {
        return error_response(&HubError::HashMismatch {
            claimed: hash,
            computed,
        });
    }

    let mime = mime.unwrap_or_else(|| "application/octet-stream".to_string());
    match state
        .store
        .commit_upload(&partial, hash, size, mime, params.width, params.height)
    {
        Ok(record) => {
            scopeguard::ScopeGuard::into_inner(cleanup);
            upload_ok(&record)
        }
        Err(e) => error_response(&HubError::Internal(e.to_string())),
    }
}

/// Stream the request body to `file`, hashing and counting as it goes.
async fn receive_body(
    request: Request,
    mut file: tokio::fs::File,
    limit: u64,
) -> Result<(String, u64), HubError> {
    let mut stream = request.into_body().into_data_stream();
    let mut hasher = Sha256::new();
    let mut size: u64 = 0;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| HubError::UploadIncomplete(e.to_string()))?;
        size += chunk.len() as u64;
        if size > limit {
            return Err(HubError::PayloadTooLarge { limit });
        }
        hasher.update(&chunk);
        file.write_all(&chunk)
            .await
            .map_err(|e| HubError::Internal(format!("upload write failed: {e}")))?;
    }
    file.flush()
        .await
        .map_err(|e| HubError::Internal(format!("upload flush failed: {e}")))?;

    Ok((finish_hash(hasher), size))
}

/// Consume and discard the rest of a request body.
async fn drain_body(request: Request) {
    let mut stream = request.into_body().into_data_stream();
    while let Some(chunk) = stream.next().await {
        if chunk.is_err() {
            break;
        }
    }
}

/// Keep MIME strings that are safe to echo into a header; anything odd
/// becomes `application/octet-stream`.
fn sanitize_mime(mime: &str) -> String {
    if mime.len() <= 127 && mime.contains('/') && mime.bytes().all(|b| b.is_ascii_graphic()) {
        mime.to_string()
    } else {
        "application/octet-stream".to_string()
    }
}

fn upload_ok(record: &AssetRecord) -> Response {
    let body = UploadOk {
        ok: true,
        hash: record.hash.clone(),
        size: record.size,
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn not_found(hash: &str) -> Response {
    let body = TransferError {
        ok: false,
        code: "ASSET_NOT_FOUND".to_string(),
        message: format!("no asset with hash {hash}"),
    };
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

fn error_response(err: &HubError) -> Response {
    let status = match err {
        HubError::InvalidHashFormat(_)
        | HubError::HashMismatch { .. }
        | HubError::UploadIncomplete(_)
        | HubError::InvalidArguments(_) => StatusCode::BAD_REQUEST,
        HubError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = TransferError {
        ok: false,
        code: err.code().to_string(),
        message: err.to_string(),
    };
    (status, Json(body)).into_response()
}

/// Permissive CORS for loopback browser clients.
async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response);
        return response;
    }
    let mut response = next.run(request).await;
    apply_cors_headers(&mut response);
    response
}

fn apply_cors_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("*"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::asset_hash;
    use std::time::Duration;

    const TTL: Duration = Duration::from_secs(3600);

    async fn start_server(tmp: &tempfile::TempDir, limit: u64) -> (AssetStore, AssetServer) {
        let store = AssetStore::open(tmp.path().join("assets"), TTL).unwrap();
        let server = AssetServer::start(store.clone(), limit, CancellationToken::new())
            .await
            .unwrap();
        (store, server)
    }

    fn asset_url(server: &AssetServer, hash: &str) -> String {
        format!("{}/assets/{hash}", server.base_url())
    }

    #[tokio::test]
    async fn test_upload_then_download_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, server) = start_server(&tmp, 1024 * 1024).await;
        let client = reqwest::Client::new();

        let payload = b"fake png bytes".to_vec();
        let hash = asset_hash(&payload);
        let response = client
            .post(format!("{}?mime=image/png&width=64&height=48", asset_url(&server, &hash)))
            .body(payload.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["hash"], hash);
        assert_eq!(body["size"], payload.len() as u64);

        assert_eq!(store.lookup(&hash).unwrap().width, Some(64));

        let download = client.get(asset_url(&server, &hash)).send().await.unwrap();
        assert_eq!(download.status(), 200);
        assert_eq!(
            download.headers()[header::CONTENT_TYPE].to_str().unwrap(),
            "image/png"
        );
        assert_eq!(
            download.headers()[header::CACHE_CONTROL].to_str().unwrap(),
            IMMUTABLE_CACHE
        );
        assert_eq!(
            download.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN]
                .to_str()
                .unwrap(),
            "*"
        );
        assert_eq!(download.bytes().await.unwrap().to_vec(), payload);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_download_unknown_hash_is_404() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (_store, server) = start_server(&tmp, 1024).await;

        let response = reqwest::get(asset_url(&server, &"a1".repeat(16))).await.unwrap();
        assert_eq!(response.status(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ok"], false);
        assert_eq!(body["code"], "ASSET_NOT_FOUND");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_malformed_hash_is_400_for_both_methods() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, server) = start_server(&tmp, 1024).await;
        let client = reqwest::Client::new();

        let response = client.get(asset_url(&server, "not-a-hash")).send().await.unwrap();
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "INVALID_HASH_FORMAT");

        let response = client
            .post(asset_url(&server, "not-a-hash"))
            .body(b"content".to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        assert!(store.is_empty());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_upload_over_limit_is_413_and_leaves_nothing() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, server) = start_server(&tmp, 64).await;

        let payload = vec![0u8; 1024];
        let response = reqwest::Client::new()
            .post(asset_url(&server, &asset_hash(&payload)))
            .body(payload)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 413);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "PAYLOAD_TOO_LARGE");

        assert!(store.is_empty());
        // Give the scopeguard a beat, then confirm no partials remain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        let partials = std::fs::read_dir(store.root())
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "part"))
            .count();
        assert_eq!(partials, 0);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_upload_hash_mismatch_is_400() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, server) = start_server(&tmp, 1024).await;

        let wrong = "d0".repeat(16);
        let response = reqwest::Client::new()
            .post(asset_url(&server, &wrong))
            .body(b"actual content".to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "HASH_MISMATCH");
        assert!(store.is_empty());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_empty_upload_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, server) = start_server(&tmp, 1024).await;

        let response = reqwest::Client::new()
            .post(asset_url(&server, &"b2".repeat(16)))
            .body(Vec::new())
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["code"], "UPLOAD_INCOMPLETE");
        assert!(store.is_empty());

        server.shutdown();
    }

    #[tokio::test]
    async fn test_reupload_skips_rewrite_and_updates_metadata() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, server) = start_server(&tmp, 1024).await;
        let client = reqwest::Client::new();

        let payload = b"upload once".to_vec();
        let hash = asset_hash(&payload);
        let first = client
            .post(format!("{}?mime=image/png", asset_url(&server, &hash)))
            .body(payload.clone())
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), 200);
        let created_at = store.lookup(&hash).unwrap().created_at;

        // Re-post with different bytes: the fast path never hashes them,
        // so only the metadata changes.
        let second = client
            .post(format!("{}?mime=image/jpeg&width=9", asset_url(&server, &hash)))
            .body(b"completely different".to_vec())
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), 200);

        assert_eq!(store.len(), 1);
        let record = store.lookup(&hash).unwrap();
        assert_eq!(record.mime, "image/jpeg");
        assert_eq!(record.width, Some(9));
        assert_eq!(record.created_at, created_at);
        assert!(store.root().join(record.file_name()).exists());

        // The original bytes are still what gets served.
        let download = client.get(asset_url(&server, &hash)).send().await.unwrap();
        assert_eq!(download.bytes().await.unwrap().to_vec(), payload);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_unsupported_method_is_405() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (_store, server) = start_server(&tmp, 1024).await;

        let response = reqwest::Client::new()
            .delete(asset_url(&server, &"a1".repeat(16)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 405);

        server.shutdown();
    }

    #[tokio::test]
    async fn test_options_preflight_is_answered() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (_store, server) = start_server(&tmp, 1024).await;

        let response = reqwest::Client::new()
            .request(
                reqwest::Method::OPTIONS,
                asset_url(&server, &"a1".repeat(16)),
            )
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 204);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_METHODS]
                .to_str()
                .unwrap(),
            "GET, POST, OPTIONS"
        );

        server.shutdown();
    }

    #[tokio::test]
    async fn test_weird_mime_falls_back_to_octet_stream() {
        let tmp = tempfile::TempDir::new().unwrap();
        let (store, server) = start_server(&tmp, 1024).await;

        let payload = b"payload".to_vec();
        let hash = asset_hash(&payload);
        let response = reqwest::Client::new()
            .post(format!("{}?mime=nonsense", asset_url(&server, &hash)))
            .body(payload)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(store.lookup(&hash).unwrap().mime, "application/octet-stream");

        server.shutdown();
    }

    #[tokio::test]
    async fn test_graceful_shutdown_on_cancel() {
        let tmp = tempfile::TempDir::new().unwrap();
        let store = AssetStore::open(tmp.path().join("assets"), TTL).unwrap();
        let cancel = CancellationToken::new();
        let server = AssetServer::start(store, 1024, cancel.clone()).await.unwrap();
        let base_url = server.base_url().to_string();

        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let result = reqwest::Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap()
            .get(format!("{base_url}/assets/{}", "a1".repeat(16)))
            .send()
            .await;
        assert!(result.is_err(), "server should refuse connections after cancel");
    }
}
