use banter_types::{ImageRef, ProgressStep};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no `type` discriminator")]
    MissingKind,

    #[error("bad `{kind}` payload: {source}")]
    Payload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Tool invoked, or its input revised. The same `tool_use_id` may arrive more
/// than once before the matching result; later events carry the revised input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseEvent {
    pub tool_use_id: String,
    pub name: String,
    pub input: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultEvent {
    pub tool_use_id: String,
    pub result: Value,
    #[serde(default)]
    pub images: Vec<ImageRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolProgressEvent {
    pub tool_id: String,
    pub session_id: String,
    pub step: ProgressStep,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolProgressEvent {
    /// Executor label for the progress grouping key. The wire shape has no
    /// dedicated field; producers that run several executors per tool put the
    /// label in `metadata.executor`.
    pub fn executor(&self) -> &str {
        self.metadata
            .as_ref()
            .and_then(|meta| meta.get("executor"))
            .and_then(Value::as_str)
            .unwrap_or("default")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisEvent {
    pub session_id: String,
    pub tool_use_id: String,
    pub text: String,
}

/// One decoded stream event. Closed union: anything the decoder does not
/// recognize lands in `Unknown` with its payload intact, so older or
/// alternate servers degrade through the fallback handler instead of
/// breaking the stream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Turn started, model "thinking". Two wire names (`init`, `thinking`),
    /// one meaning.
    Thinking,
    /// Ephemeral chain-of-thought fragment; each one supersedes the last.
    Reasoning { text: String },
    /// Assistant text fragment, appended in arrival order.
    Response { text: String },
    ToolUse(ToolUseEvent),
    ToolResult(ToolResultEvent),
    ToolProgress(ToolProgressEvent),
    /// Turn finished; may carry final images.
    Complete { images: Vec<ImageRef> },
    /// Turn failed server-side.
    Error { message: String },
    /// Analysis sub-stream text fragment.
    Analysis(AnalysisEvent),
    /// Analysis sub-stream finished for one key.
    AnalysisComplete {
        session_id: String,
        tool_use_id: String,
    },
    /// Unrecognized event shape, routed to the fallback handler.
    Unknown { kind: String, payload: Value },
}

fn payload<T: serde::de::DeserializeOwned>(kind: &str, value: &Value) -> Result<T, DecodeError> {
    serde_json::from_value(value.clone()).map_err(|source| DecodeError::Payload {
        kind: kind.to_string(),
        source,
    })
}

fn text_field(kind: &str, value: &Value, field: &str) -> Result<String, DecodeError> {
    use serde::de::Error as _;
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DecodeError::Payload {
            kind: kind.to_string(),
            source: serde_json::Error::custom(format!("missing or non-string `{field}`")),
        })
}

/// Decode one `data:` frame body into a typed event.
///
/// Dispatch is a manual match on the `type` discriminator rather than a serde
/// tag so that `init`/`thinking` can alias to one variant and unrecognized
/// kinds can fall through to `Unknown` with their payload preserved.
pub fn decode_frame(data: &str) -> Result<StreamEvent, DecodeError> {
    let value: Value = serde_json::from_str(data)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingKind)?
        .to_string();

    match kind.as_str() {
        "init" | "thinking" => Ok(StreamEvent::Thinking),
        "reasoning" => Ok(StreamEvent::Reasoning {
            text: text_field(&kind, &value, "text")?,
        }),
        "response" => Ok(StreamEvent::Response {
            text: text_field(&kind, &value, "text")?,
        }),
        "tool_use" => Ok(StreamEvent::ToolUse(payload(&kind, &value)?)),
        "tool_result" => Ok(StreamEvent::ToolResult(payload(&kind, &value)?)),
        "tool_progress" => Ok(StreamEvent::ToolProgress(payload(&kind, &value)?)),
        "complete" => {
            #[derive(Deserialize)]
            struct CompletePayload {
                #[serde(default)]
                images: Vec<ImageRef>,
            }
            let body: CompletePayload = payload(&kind, &value)?;
            Ok(StreamEvent::Complete {
                images: body.images,
            })
        }
        "error" => Ok(StreamEvent::Error {
            message: text_field(&kind, &value, "message")?,
        }),
        "analysis" => Ok(StreamEvent::Analysis(payload(&kind, &value)?)),
        "analysis_complete" => {
            #[derive(Deserialize)]
            #[serde(rename_all = "camelCase")]
            struct AnalysisCompletePayload {
                session_id: String,
                tool_use_id: String,
            }
            let body: AnalysisCompletePayload = payload(&kind, &value)?;
            Ok(StreamEvent::AnalysisComplete {
                session_id: body.session_id,
                tool_use_id: body.tool_use_id,
            })
        }
        _ => Ok(StreamEvent::Unknown {
            kind,
            payload: value,
        }),
    }
}
