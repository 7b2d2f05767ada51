//! A completion engine for OpenAI-compatible chat completion APIs.

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mime::Mime;
use reqwest::{Client, StatusCode, header};
use toolchat_model::{
    CompletionEngine, CompletionRequest, EngineError, EngineSession, ErrorKind,
    SessionLoaded,
};

pub use config::{OpenAIConfig, OpenAIConfigBuilder};
use io::{Chunks, Sse};
pub use response::OpenAIResponse;

/// Error type for [`OpenAIEngine`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl EngineError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

fn status_kind(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimitExceeded,
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ErrorKind::InvalidInput
        }
        StatusCode::NOT_FOUND | StatusCode::SERVICE_UNAVAILABLE => {
            ErrorKind::ContextUnavailable
        }
        _ => ErrorKind::Other,
    }
}

fn request_error(err: reqwest::Error) -> Error {
    let kind = if err.is_connect() {
        ErrorKind::ContextUnavailable
    } else {
        ErrorKind::Other
    };
    Error::new(format!("{err}"), kind)
}

/// The server only accepts a bare file name for slot files.
fn slot_filename(path: &Path) -> Result<String, Error> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| {
            Error::new(
                format!("Invalid session file name: {}", path.display()),
                ErrorKind::InvalidInput,
            )
        })
}

fn is_event_stream(content_type: Option<&str>) -> bool {
    content_type
        .and_then(|v| v.parse().ok())
        .map(|m: Mime| {
            m.type_() == mime::TEXT && m.subtype().as_str() == "event-stream"
        })
        .unwrap_or(false)
}

/// OpenAI-compatible completion engine.
///
/// Works with hosted endpoints and local servers that speak the same
/// protocol (llama.cpp server, vLLM, Ollama).
#[derive(Clone, Debug)]
pub struct OpenAIEngine {
    client: Client,
    config: Arc<OpenAIConfig>,
    stop_epoch: Arc<AtomicU64>,
}

impl OpenAIEngine {
    /// Creates a new `OpenAIEngine` with the given configuration.
    #[inline]
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
            stop_epoch: Default::default(),
        }
    }

    fn slot_action(
        &self,
        action: &'static str,
        path: &Path,
    ) -> impl Future<Output = Result<proto::SlotReply, Error>> + Send + 'static
    {
        let filename = slot_filename(path);
        let client = self.client.clone();
        let config = self.config.clone();

        async move {
            let filename = filename?;
            let resp = client
                .post(config.slot_endpoint(action))
                .header(
                    header::AUTHORIZATION,
                    format!("Bearer {}", config.api_key),
                )
                .json(&proto::SlotRequest {
                    filename: &filename,
                })
                .send()
                .await
                .map_err(request_error)?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                warn!(%status, action, "slot action rejected");
                return Err(Error::new(
                    format!("HTTP {status}: {body}"),
                    status_kind(status),
                ));
            }
            resp.json()
                .await
                .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))
        }
    }
}

impl CompletionEngine for OpenAIEngine {
    type Error = Error;
    type Response = OpenAIResponse;

    fn send_request(
        &self,
        req: &CompletionRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let openai_req = proto::create_request(req, &self.config);
        let resp_fut = self
            .client
            .post(self.config.endpoint())
            .header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.config.api_key),
            )
            .header(header::ACCEPT, "text/event-stream")
            .json(&openai_req)
            .send();
        let stop_epoch = self.stop_epoch.clone();

        async move {
            let resp = resp_fut.await.map_err(request_error)?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                warn!(%status, "completion request rejected");
                return Err(Error::new(
                    format!("HTTP {status}: {body}"),
                    status_kind(status),
                ));
            }

            let content_type = resp
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok());
            if !is_event_stream(content_type) {
                return Err(Error::new(
                    format!("Unexpected content type: {content_type:?}"),
                    ErrorKind::Other,
                ));
            }

            // Here we got a successful response.
            let chunks = Chunks::from_response(resp);
            let sse = Sse::new(chunks);
            Ok(OpenAIResponse::from_sse(sse, stop_epoch))
        }
    }

    fn stop(&self) {
        self.stop_epoch.fetch_add(1, Ordering::AcqRel);
    }
}

/// Saves and restores the KV cache of slot 0 on a llama.cpp server.
///
/// The server must run with `--slot-save-path`; only the file name of
/// `path` is sent and the file lives on the server.
impl EngineSession for OpenAIEngine {
    fn save_session(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'static {
        let reply = self.slot_action("save", path);
        async move { Ok(reply.await?.n_saved.unwrap_or_default()) }
    }

    fn load_session(
        &self,
        path: &Path,
    ) -> impl Future<Output = Result<SessionLoaded, Self::Error>> + Send + 'static
    {
        let reply = self.slot_action("restore", path);
        async move {
            Ok(SessionLoaded {
                tokens_loaded: reply.await?.n_restored.unwrap_or_default(),
            })
        }
    }
}
