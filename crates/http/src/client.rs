//! Upload server client.
//!
//! Async HTTP client using `reqwest`. Chunk bodies are streamed in small
//! pieces so upload progress can be observed as the connection consumes
//! them.

use std::time::Duration;

use chunkup_protocol::constants::{MERGE_PATH, UPLOAD_PATH, VERIFY_PATH, form};
use chunkup_protocol::{MergeRequest, VerifyRequest, VerifyResponse};
use chunkup_session::{
    ChunkTransport, ChunkUpload, ClientError, ClientFuture, MergeClient, VerificationClient,
};
use bytes::Bytes;
use chunkup_transfer::ChunkProgress;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default upload server address.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3001";

/// Size of the pieces a chunk body is streamed in.
const STREAM_PIECE_SIZE: usize = 64 * 1024;

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Per-request timeout; `None` waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: None,
        }
    }
}

/// HTTP implementation of the upload server collaborators.
pub struct HttpUploadClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpUploadClient {
    /// Creates a client for the server at `config.base_url`.
    pub fn new(config: &HttpConfig) -> Result<Self, ClientError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let http = builder.build().map_err(request_error)?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Asks whether the file still needs uploading.
    pub async fn verify_file(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyResponse, ClientError> {
        debug!(file_hash = %request.file_hash, "POST verify");
        let resp = self
            .http
            .post(self.url(VERIFY_PATH))
            .json(request)
            .send()
            .await
            .map_err(request_error)?;
        let body = read_body(resp).await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Asks the server to assemble the stored chunks.
    pub async fn merge_file(&self, request: &MergeRequest) -> Result<(), ClientError> {
        debug!(file_hash = %request.file_hash, size = request.size, "POST merge");
        let resp = self
            .http
            .post(self.url(MERGE_PATH))
            .json(request)
            .send()
            .await
            .map_err(request_error)?;
        read_body(resp).await?;
        Ok(())
    }

    /// Uploads one chunk as a multipart form.
    ///
    /// `progress` receives the cumulative number of payload bytes handed to
    /// the connection.
    pub async fn upload_chunk(
        &self,
        upload: ChunkUpload,
        progress: ChunkProgress,
    ) -> Result<(), ClientError> {
        let total = upload.payload.len() as u64;
        debug!(index = upload.index, key = %upload.key, bytes = total, "POST chunk");

        let body = reqwest::Body::wrap_stream(progress_stream(upload.payload, progress));
        let part = Part::stream_with_length(body, total).file_name(upload.key.clone());
        let form = Form::new()
            .part(form::CHUNK, part)
            .text(form::HASH, upload.key)
            .text(form::FILENAME, upload.filename)
            .text(form::FILE_HASH, upload.file_hash);

        let resp = self
            .http
            .post(self.url(UPLOAD_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(request_error)?;
        read_body(resp).await?;
        Ok(())
    }
}

impl VerificationClient for HttpUploadClient {
    fn verify(&self, request: VerifyRequest) -> ClientFuture<'_, VerifyResponse> {
        Box::pin(async move { self.verify_file(&request).await })
    }
}

impl MergeClient for HttpUploadClient {
    fn merge(&self, request: MergeRequest) -> ClientFuture<'_, ()> {
        Box::pin(async move { self.merge_file(&request).await })
    }
}

impl ChunkTransport for HttpUploadClient {
    fn transfer_chunk(
        &self,
        upload: ChunkUpload,
        progress: ChunkProgress,
    ) -> ClientFuture<'_, ()> {
        Box::pin(self.upload_chunk(upload, progress))
    }
}

fn request_error(e: reqwest::Error) -> ClientError {
    ClientError::Request(e.to_string())
}

/// Returns the body of a successful response.
async fn read_body(resp: reqwest::Response) -> Result<Vec<u8>, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.bytes().await.map_err(request_error)?.to_vec())
}

/// Splits `payload` into pieces, reporting progress as each piece is taken.
///
/// Pieces are views into the one payload buffer.
fn progress_stream(
    payload: Vec<u8>,
    progress: ChunkProgress,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send + Sync + 'static {
    let payload = Bytes::from(payload);
    let len = payload.len();
    let total = len as u64;

    stream::iter((0..len).step_by(STREAM_PIECE_SIZE)).map(move |start| {
        let end = (start + STREAM_PIECE_SIZE).min(len);
        progress.report(end as u64, total);
        Ok(payload.slice(start..end))
    })
}
