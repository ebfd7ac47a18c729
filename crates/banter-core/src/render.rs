use crate::analysis::AnalysisView;
use crate::ledger::ToolExecution;
use crate::transcript::TurnGroup;
use banter_types::{Attachment, ImageRef, MessageId, ProgressStep, Sender};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RenderBody {
    Text { text: String },
    /// Resolved from the live ledger first, then the sealed archive. `None`
    /// only on a bookkeeping miss, which the projection logs.
    Tool {
        execution: Option<ToolExecution>,
    },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub body: RenderBody,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
    pub images: Vec<ImageRef>,
    pub is_streaming: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressItem {
    pub executor: String,
    pub session_id: String,
    pub step: ProgressStep,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    pub timestamp: DateTime<Utc>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressGroup {
    pub context: String,
    pub entries: Vec<ProgressItem>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct ProgressPanel {
    pub visible: bool,
    pub groups: Vec<ProgressGroup>,
}

/// Snapshot handed to the embedding UI after each applied batch. A pure
/// projection of engine state: rendering twice from unchanged state yields
/// identical output.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RenderModel {
    pub messages: Vec<RenderMessage>,
    pub turns: Vec<TurnGroup>,
    pub typing: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub progress: ProgressPanel,
    pub analysis: AnalysisView,
    pub connectivity: bool,
}

impl Default for RenderModel {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            turns: Vec::new(),
            typing: false,
            reasoning: None,
            progress: ProgressPanel::default(),
            analysis: AnalysisView::Idle,
            connectivity: true,
        }
    }
}
