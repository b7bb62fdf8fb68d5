//! Thin HTTP client for the codedropd API

use anyhow::{Context, Result};
use reqwest::{header::HeaderMap, Response, StatusCode};
use serde::Deserialize;

use codedrop_core::types::{
    HEADER_ENCRYPTED_FILE_KEY, HEADER_FILE_IV, HEADER_KDF_ITERATIONS, HEADER_KEY_IV, HEADER_SALT,
};
use codedrop_core::{TransferCode, TransferSummary, UploadPayload};
use codedrop_crypto::{EncodedKeyMaterial, KeyMaterial, DEFAULT_ITERATIONS};

/// A non-2xx answer from the server, with its stated reason.
#[derive(Debug, thiserror::Error)]
#[error("server answered {status}: {reason}")]
pub struct ServerError {
    pub status: StatusCode,
    pub reason: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Counts returned by `POST /cleanup`.
#[derive(Debug, Deserialize)]
pub struct CleanupReport {
    pub checked: usize,
    pub deleted: usize,
    pub failed: usize,
}

pub struct Downloaded {
    pub ciphertext: Vec<u8>,
    pub key_material: KeyMaterial,
}

pub struct ApiClient {
    http: reqwest::Client,
    base: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("codedrop/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("building HTTP client")?;
        Ok(Self {
            http,
            base: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub async fn create(&self, payload: &UploadPayload) -> Result<()> {
        let resp = self
            .http
            .post(self.url("/transfers"))
            .json(payload)
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.base))?;
        check(resp).await.map(|_| ())
    }

    pub async fn describe(&self, code: &TransferCode) -> Result<TransferSummary> {
        let resp = self
            .http
            .get(self.url(&format!("/transfers/{}", code.as_str())))
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.base))?;
        check(resp)
            .await?
            .json()
            .await
            .context("decoding transfer summary")
    }

    pub async fn download(&self, code: &TransferCode) -> Result<Downloaded> {
        let resp = self
            .http
            .post(self.url(&format!("/transfers/{}?includeKey=1", code.as_str())))
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.base))?;
        let resp = check(resp).await?;

        let key_material = key_material_from_headers(resp.headers())?;
        let ciphertext = resp
            .bytes()
            .await
            .context("reading ciphertext body")?
            .to_vec();
        Ok(Downloaded {
            ciphertext,
            key_material,
        })
    }

    pub async fn cleanup(&self, secret: Option<&str>) -> Result<CleanupReport> {
        let mut req = self.http.post(self.url("/cleanup"));
        if let Some(secret) = secret {
            req = req.bearer_auth(secret);
        }
        let resp = req
            .send()
            .await
            .with_context(|| format!("connecting to {}", self.base))?;
        check(resp)
            .await?
            .json()
            .await
            .context("decoding cleanup report")
    }
}

/// Pass 2xx responses through; turn anything else into a [`ServerError`].
async fn check(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let reason = resp
        .json::<ErrorBody>()
        .await
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
    Err(ServerError { status, reason }.into())
}

pub fn key_material_from_headers(headers: &HeaderMap) -> Result<KeyMaterial> {
    let field = |name: &str| -> Result<String> {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .with_context(|| format!("response is missing the {name} header"))
    };
    // Older servers do not send the iteration count; those transfers used the default.
    let kdf_iterations = match headers.get(HEADER_KDF_ITERATIONS) {
        Some(value) => value
            .to_str()
            .ok()
            .and_then(|v| v.trim().parse::<u32>().ok())
            .with_context(|| format!("malformed {HEADER_KDF_ITERATIONS} header"))?,
        None => DEFAULT_ITERATIONS,
    };
    let encoded = EncodedKeyMaterial {
        wrapped_content_key: field(HEADER_ENCRYPTED_FILE_KEY)?,
        file_nonce: field(HEADER_FILE_IV)?,
        key_wrap_nonce: field(HEADER_KEY_IV)?,
        kek_salt: field(HEADER_SALT)?,
        kdf_iterations,
    };
    encoded.decode().context("decoding key material headers")
}

/// The server's status for a failed call, if the failure came from it.
pub fn server_status(err: &anyhow::Error) -> Option<StatusCode> {
    err.downcast_ref::<ServerError>().map(|e| e.status)
}
