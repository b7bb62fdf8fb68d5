//! HTTP API
//!
//! Routes:
//!   POST /transfers                  — store a sealed upload
//!   GET  /transfers/{code}           — metadata only (no key material)
//!   POST /transfers/{code}?includeKey=1 — ciphertext body, key material in headers
//!   POST /cleanup                    — purge expired transfers (bearer-gated)
//!
//! Every failure is a JSON `{ok: false, error}` body whose `error` text is one
//! of a fixed set of reasons; internal detail only goes to the log.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use codedrop_core::types::{
    CIPHERTEXT_CONTENT_TYPE, HEADER_ENCRYPTED_FILE_KEY, HEADER_FILE_IV, HEADER_KDF_ITERATIONS,
    HEADER_KEY_IV, HEADER_SALT,
};
use codedrop_core::{TransferError, TransferSummary, UploadPayload, ValidationError};
use codedrop_crypto::TAG_SIZE;
use codedrop_transfer::{RetentionSweeper, SweepReport, TransferService};

use crate::metrics::TransferMetrics;

/// Room for the JSON field names, file name and key material around the
/// base64 ciphertext.
const ENVELOPE_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct ApiState {
    pub service: TransferService,
    pub sweeper: RetentionSweeper,
    pub cleanup_secret: Option<Arc<SecretString>>,
    pub metrics: TransferMetrics,
}

pub fn router(state: ApiState) -> Router {
    let limit = body_limit(state.service.policy().max_file_size_bytes);
    Router::new()
        .route("/transfers", post(create_transfer))
        .route(
            "/transfers/{code}",
            get(describe_transfer).post(fetch_transfer),
        )
        .route("/cleanup", post(cleanup))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Largest upload body: base64 of the biggest allowed ciphertext plus overhead.
pub fn body_limit(max_file_size_bytes: u64) -> usize {
    let ciphertext = usize::try_from(max_file_size_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(TAG_SIZE);
    ciphertext
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(ENVELOPE_OVERHEAD)
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    ok: bool,
    error: String,
}

#[derive(Debug)]
pub enum ApiError {
    Transfer {
        source: TransferError,
        /// Reason shown for 500s
        failure: &'static str,
    },
    Unauthorized,
}

impl ApiError {
    fn upload(source: TransferError) -> Self {
        Self::Transfer {
            source,
            failure: "Upload failed",
        }
    }
}

impl From<TransferError> for ApiError {
    fn from(source: TransferError) -> Self {
        Self::Transfer {
            source,
            failure: "Storage failure",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            Self::Transfer { source, failure } => match source {
                TransferError::Validation(v) => (StatusCode::BAD_REQUEST, v.to_string()),
                TransferError::NotFound => (StatusCode::NOT_FOUND, "Not found".into()),
                TransferError::Expired => (StatusCode::GONE, "Expired".into()),
                TransferError::CodeInUse => (StatusCode::CONFLICT, "Code in use".into()),
                other => {
                    error!("request failed: {other}");
                    (StatusCode::INTERNAL_SERVER_ERROR, failure.to_string())
                }
            },
        };
        (
            status,
            Json(ErrorBody {
                ok: false,
                error: reason,
            }),
        )
            .into_response()
    }
}

/// Metric label for a request outcome.
fn outcome<T>(result: &Result<T, TransferError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(TransferError::Validation(_)) => "invalid",
        Err(TransferError::NotFound) => "not_found",
        Err(TransferError::Expired) => "expired",
        Err(TransferError::CodeInUse) => "code_in_use",
        Err(_) => "error",
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CreatedBody {
    ok: bool,
}

/// POST /transfers
///
/// The body is parsed by hand so malformed JSON gets the same
/// `Invalid payload` reason as a structurally wrong upload.
async fn create_transfer(
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<CreatedBody>, ApiError> {
    let result = match serde_json::from_slice::<UploadPayload>(&body) {
        Ok(payload) => state.service.create(payload).await,
        Err(e) => {
            debug!("upload body rejected: {e}");
            Err(ValidationError::payload(e.to_string()).into())
        }
    };
    state.metrics.record("create", outcome(&result));

    match result {
        Ok(_) => {
            state.metrics.record_created();
            Ok(Json(CreatedBody { ok: true }))
        }
        Err(e) => Err(ApiError::upload(e)),
    }
}

/// GET /transfers/{code}
async fn describe_transfer(
    State(state): State<ApiState>,
    Path(code): Path<String>,
) -> Result<Json<TransferSummary>, ApiError> {
    let result = state.service.describe(&code).await;
    state.metrics.record("describe", outcome(&result));
    Ok(Json(result?))
}

#[derive(Debug, Default, Deserialize)]
struct FetchQuery {
    #[serde(rename = "includeKey")]
    include_key: Option<String>,
}

impl FetchQuery {
    fn reveal_key(&self) -> bool {
        matches!(self.include_key.as_deref(), Some("1" | "true"))
    }
}

/// POST /transfers/{code}[?includeKey=1]
///
/// Streams the ciphertext straight from storage. With `includeKey`, the four
/// key-material fields ride in headers so the body stays raw bytes.
async fn fetch_transfer(
    State(state): State<ApiState>,
    Path(code): Path<String>,
    Query(query): Query<FetchQuery>,
) -> Result<Response, ApiError> {
    let result = state.service.fetch(&code, query.reveal_key()).await;
    state.metrics.record("fetch", outcome(&result));
    let fetched = result?;

    let mut headers = HeaderMap::new();
    let content_type = HeaderValue::from_str(&fetched.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static(CIPHERTEXT_CONTENT_TYPE));
    headers.insert(header::CONTENT_TYPE, content_type);
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(fetched.content_length),
    );

    if let Some(material) = &fetched.key_material {
        let encoded = material.encode();
        for (name, value) in [
            (HEADER_ENCRYPTED_FILE_KEY, encoded.wrapped_content_key),
            (HEADER_FILE_IV, encoded.file_nonce),
            (HEADER_KEY_IV, encoded.key_wrap_nonce),
            (HEADER_SALT, encoded.kek_salt),
        ] {
            let value = HeaderValue::from_str(&value).map_err(TransferError::storage)?;
            headers.insert(HeaderName::from_static(name), value);
        }
        headers.insert(
            HeaderName::from_static(HEADER_KDF_ITERATIONS),
            HeaderValue::from(encoded.kdf_iterations),
        );
    }

    Ok((headers, Body::from_stream(fetched.body)).into_response())
}

#[derive(Serialize)]
struct CleanupBody {
    ok: bool,
    #[serde(flatten)]
    report: SweepReport,
}

/// POST /cleanup
async fn cleanup(
    State(state): State<ApiState>,
    headers: HeaderMap,
) -> Result<Json<CleanupBody>, ApiError> {
    if let Some(secret) = &state.cleanup_secret {
        if !bearer_matches(&headers, secret) {
            warn!("cleanup rejected: missing or wrong bearer token");
            state.metrics.record("cleanup", "unauthorized");
            return Err(ApiError::Unauthorized);
        }
    }

    let result = state.sweeper.purge_expired().await;
    state.metrics.record("cleanup", outcome(&result));
    Ok(Json(CleanupBody {
        ok: true,
        report: result?,
    }))
}

fn bearer_matches(headers: &HeaderMap, secret: &SecretString) -> bool {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| {
            bool::from(token.as_bytes().ct_eq(secret.expose_secret().as_bytes()))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use axum::http::Request;
    use base64::{engine::general_purpose::STANDARD as B64, Engine};
    use chrono::{DateTime, TimeDelta, Utc};
    use codedrop_core::config::TransferConfig;
    use codedrop_storage::{memory_operator, OpendalStore};
    use codedrop_transfer::Clock;
    use std::sync::Mutex;
    use tower::ServiceExt;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-10-19T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    struct Harness {
        state: ApiState,
        now: Arc<Mutex<DateTime<Utc>>>,
    }

    impl Harness {
        fn new(secret: Option<&str>) -> Self {
            let now = Arc::new(Mutex::new(t0()));
            let reader = now.clone();
            let clock: Clock = Arc::new(move || *reader.lock().unwrap());

            let store = Arc::new(OpendalStore::new(memory_operator().unwrap()));
            let service =
                TransferService::new(store, TransferConfig::default()).with_clock(clock);
            let state = ApiState {
                sweeper: service.sweeper(),
                service,
                cleanup_secret: secret.map(|s| Arc::new(SecretString::from(s))),
                metrics: TransferMetrics::default(),
            };
            Self { state, now }
        }

        fn advance(&self, secs: i64) {
            *self.now.lock().unwrap() += TimeDelta::seconds(secs);
        }

        async fn send(&self, req: Request<Body>) -> Response {
            router(self.state.clone()).oneshot(req).await.unwrap()
        }
    }

    fn upload_json(code: &str, size: usize, ttl_secs: i64) -> serde_json::Value {
        serde_json::json!({
            "code": code,
            "fileName": "report.pdf",
            "fileType": "application/pdf",
            "fileSize": size,
            "expiresAt": (t0() + TimeDelta::seconds(ttl_secs)).to_rfc3339(),
            "encryptedFile": B64.encode(vec![9u8; size + TAG_SIZE]),
            "encryptedFileKey": B64.encode([1u8; 48]),
            "fileIv": B64.encode([2u8; 12]),
            "keyIv": B64.encode([3u8; 12]),
            "salt": B64.encode([4u8; 16]),
        })
    }

    fn post_json(uri: &str, body: &serde_json::Value) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn empty(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_describe() {
        let h = Harness::new(None);
        let resp = h.send(post_json("/transfers", &upload_json("482913", 10, 600))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await, serde_json::json!({"ok": true}));

        let resp = h.send(empty("GET", "/transfers/482913")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["fileName"], "report.pdf");
        assert_eq!(body["fileType"], "application/pdf");
        assert_eq!(body["fileSize"], 10);
        assert!(body.get("encryptedFileKeyBase64").is_none());
        assert!(body.get("fileKey").is_none());
    }

    #[tokio::test]
    async fn test_fetch_with_key_headers() {
        let h = Harness::new(None);
        h.send(post_json("/transfers", &upload_json("482913", 10, 600))).await;

        let resp = h
            .send(empty("POST", "/transfers/482913?includeKey=1"))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers().clone();
        assert_eq!(headers[header::CONTENT_LENGTH], "26");
        assert_eq!(headers[header::CONTENT_TYPE], CIPHERTEXT_CONTENT_TYPE);
        assert_eq!(headers[HEADER_ENCRYPTED_FILE_KEY], B64.encode([1u8; 48]).as_str());
        assert_eq!(headers[HEADER_FILE_IV], B64.encode([2u8; 12]).as_str());
        assert_eq!(headers[HEADER_KEY_IV], B64.encode([3u8; 12]).as_str());
        assert_eq!(headers[HEADER_SALT], B64.encode([4u8; 16]).as_str());
        // no kdfIterations in the upload: sealed with the default count
        assert_eq!(headers[HEADER_KDF_ITERATIONS], "210000");

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(bytes.as_ref(), &[9u8; 26][..]);
    }

    #[tokio::test]
    async fn test_fetch_reports_sender_iteration_count() {
        let h = Harness::new(None);
        let mut upload = upload_json("482913", 10, 600);
        upload["kdfIterations"] = serde_json::json!(600_000);
        let resp = h.send(post_json("/transfers", &upload)).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = h
            .send(empty("POST", "/transfers/482913?includeKey=1"))
            .await;
        assert_eq!(resp.headers()[HEADER_KDF_ITERATIONS], "600000");
    }

    #[tokio::test]
    async fn test_fetch_without_include_key_omits_headers() {
        let h = Harness::new(None);
        h.send(post_json("/transfers", &upload_json("482913", 10, 600))).await;

        let resp = h.send(empty("POST", "/transfers/482913")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(HEADER_ENCRYPTED_FILE_KEY).is_none());
        assert!(resp.headers().get(HEADER_SALT).is_none());
        assert!(resp.headers().get(HEADER_KDF_ITERATIONS).is_none());
    }

    #[tokio::test]
    async fn test_not_found_and_expired() {
        let h = Harness::new(None);
        h.send(post_json("/transfers", &upload_json("482913", 10, 60))).await;

        let resp = h.send(empty("GET", "/transfers/000000")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["error"], "Not found");

        h.advance(61);
        let resp = h.send(empty("GET", "/transfers/482913")).await;
        assert_eq!(resp.status(), StatusCode::GONE);
        let resp = h
            .send(empty("POST", "/transfers/482913?includeKey=1"))
            .await;
        assert_eq!(resp.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn test_create_rejections() {
        let h = Harness::new(None);

        let resp = h.send(post_json("/transfers", &upload_json("12", 10, 600))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "Invalid code");

        let resp = h.send(post_json("/transfers", &upload_json("482913", 10, -5))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "Invalid expiry");

        let mut missing = upload_json("482913", 10, 600);
        missing.as_object_mut().unwrap().remove("salt");
        let resp = h.send(post_json("/transfers", &missing)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "Invalid payload");

        let resp = h
            .send(
                Request::post("/transfers")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "Invalid payload");
    }

    #[tokio::test]
    async fn test_create_oversized_declared_size() {
        let h = Harness::new(None);
        let mut big = upload_json("482913", 10, 600);
        big["fileSize"] = serde_json::json!(30 * 1024 * 1024 + 1);
        let resp = h.send(post_json("/transfers", &big)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "File too large");
    }

    #[tokio::test]
    async fn test_live_code_collision_is_conflict() {
        let h = Harness::new(None);
        h.send(post_json("/transfers", &upload_json("482913", 10, 600))).await;
        let resp = h.send(post_json("/transfers", &upload_json("482913", 12, 600))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(resp).await["error"], "Code in use");
    }

    #[tokio::test]
    async fn test_cleanup_requires_bearer_when_configured() {
        let h = Harness::new(Some("s3cret"));

        let resp = h.send(empty("POST", "/cleanup")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let wrong = Request::post("/cleanup")
            .header(header::AUTHORIZATION, "Bearer nope")
            .body(Body::empty())
            .unwrap();
        assert_eq!(h.send(wrong).await.status(), StatusCode::UNAUTHORIZED);

        h.send(post_json("/transfers", &upload_json("482913", 10, 60))).await;
        h.advance(61);
        let right = Request::post("/cleanup")
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .body(Body::empty())
            .unwrap();
        let resp = h.send(right).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            json_body(resp).await,
            serde_json::json!({"ok": true, "checked": 1, "deleted": 1, "failed": 0})
        );

        let resp = h.send(empty("GET", "/transfers/482913")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cleanup_open_without_secret() {
        let h = Harness::new(None);
        let resp = h.send(empty("POST", "/cleanup")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["deleted"], 0);
    }

    #[test]
    fn test_body_limit_covers_base64_ciphertext() {
        let max = 30 * 1024 * 1024;
        let encoded = (max as usize + TAG_SIZE).div_ceil(3) * 4;
        assert!(body_limit(max) > encoded);
        assert_eq!(body_limit(u64::MAX), usize::MAX);
    }

    #[test]
    fn test_include_key_flag() {
        let q = |v: Option<&str>| FetchQuery {
            include_key: v.map(String::from),
        };
        assert!(q(Some("1")).reveal_key());
        assert!(q(Some("true")).reveal_key());
        assert!(!q(Some("0")).reveal_key());
        assert!(!q(None).reveal_key());
    }
}
