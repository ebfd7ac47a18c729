use banter_observability::redact_text;
use banter_types::Attachment;
use bytes::Bytes;
use futures::Stream;
use reqwest::header::HeaderMap;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Header carrying the session token, both directions. The server sets it on
/// responses; the client echoes it on every request once it holds one.
pub const SESSION_HEADER: &str = "x-banter-session";

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {code}")]
    Status { code: StatusCode },

    #[error("invalid base URL: {0}")]
    InvalidBaseUrl(String),
}

/// One file attached to an outbound turn. Only the bytes and descriptive
/// metadata travel here; encoding beyond multipart framing is out of scope.
#[derive(Debug, Clone)]
pub struct OutboundAttachment {
    pub filename: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl OutboundAttachment {
    pub fn descriptor(&self) -> Attachment {
        Attachment {
            filename: self.filename.clone(),
            mime: self.mime.clone(),
            size_bytes: self.bytes.len() as u64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub text: String,
    pub attachments: Vec<OutboundAttachment>,
}

impl TurnRequest {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attachments: Vec::new(),
        }
    }
}

#[derive(Serialize)]
struct ChatBody<'a> {
    text: &'a str,
}

/// Thin HTTP client for the chat endpoints. Streaming-friendly: no overall
/// request timeout (a turn may run indefinitely), keep-alive on so long
/// streams survive quiet stretches.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let base_url = base_url.into();
        let trimmed = base_url.trim_end_matches('/').to_string();
        if !trimmed.starts_with("http://") && !trimmed.starts_with("https://") {
            return Err(ClientError::InvalidBaseUrl(base_url));
        }

        let http = Client::builder()
            .tcp_keepalive(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            base_url: trimmed,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Send a user turn and open its event stream.
    ///
    /// Resolves as soon as the response headers are in — the session token is
    /// extracted from them before the first body byte is decoded. Plain JSON
    /// for text-only turns, multipart when attachments ride along; everything
    /// downstream is agnostic to which.
    pub async fn open_turn(
        &self,
        request: &TurnRequest,
        session: Option<&str>,
    ) -> Result<(HeaderMap, impl Stream<Item = Result<Bytes, reqwest::Error>>), ClientError> {
        let url = format!("{}/api/chat", self.base_url);
        tracing::debug!(
            attachments = request.attachments.len(),
            text = %redact_text(&request.text),
            "opening turn"
        );

        let response = self.shape_turn(&url, request, session)?.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status { code: status });
        }

        let headers = response.headers().clone();
        Ok((headers, response.bytes_stream()))
    }

    /// Build the turn request: session header when a token is held, then a
    /// JSON body for text-only turns or a multipart form (`text` field plus
    /// one `files` part per attachment) when files ride along.
    fn shape_turn(
        &self,
        url: &str,
        request: &TurnRequest,
        session: Option<&str>,
    ) -> Result<reqwest::RequestBuilder, ClientError> {
        let mut builder = self.http.post(url);
        if let Some(token) = session {
            builder = builder.header(SESSION_HEADER, token);
        }

        if request.attachments.is_empty() {
            Ok(builder.json(&ChatBody {
                text: &request.text,
            }))
        } else {
            let mut form = reqwest::multipart::Form::new().text("text", request.text.clone());
            for attachment in &request.attachments {
                let part = reqwest::multipart::Part::bytes(attachment.bytes.clone())
                    .file_name(attachment.filename.clone())
                    .mime_str(&attachment.mime)?;
                form = form.part("files", part);
            }
            Ok(builder.multipart(form))
        }
    }

    /// Best-effort request to drop server-held progress buffers for the
    /// session. Fire-and-forget: the response is ignored and every failure
    /// is swallowed with a debug log. Used on shutdown/unload.
    pub async fn release_progress(&self, session: Option<&str>) {
        let Some(token) = session else {
            return;
        };
        let url = format!("{}/api/progress/release", self.base_url);
        let result = self
            .http
            .post(&url)
            .header(SESSION_HEADER, token)
            .timeout(Duration::from_secs(2))
            .send()
            .await;
        if let Err(err) = result {
            tracing::debug!(%err, "progress release failed; ignoring");
        }
    }
}
