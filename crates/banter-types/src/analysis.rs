use serde::{Deserialize, Serialize};

/// Compound key addressing one analysis stream: the session it belongs to
/// plus the tool execution that produced it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AnalysisKey {
    pub session_id: String,
    pub tool_use_id: String,
}

impl AnalysisKey {
    pub fn new(session_id: impl Into<String>, tool_use_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            tool_use_id: tool_use_id.into(),
        }
    }
}
