use serde::{Deserialize, Serialize};

/// Step name of a tool-progress notification. The well-known names drive
/// panel visibility and expiry; unknown names are preserved verbatim so newer
/// servers can add steps without breaking older clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum ProgressStep {
    Connecting,
    Fetching,
    Processing,
    Completed,
    Error,
    Other(String),
}

impl ProgressStep {
    /// A terminal step ends the entry's active life; the entry is purged
    /// after the grace period.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressStep::Completed | ProgressStep::Error)
    }

    /// The three steps that make the progress panel visible.
    pub fn is_activity(&self) -> bool {
        matches!(
            self,
            ProgressStep::Connecting | ProgressStep::Fetching | ProgressStep::Processing
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProgressStep::Connecting => "connecting",
            ProgressStep::Fetching => "fetching",
            ProgressStep::Processing => "processing",
            ProgressStep::Completed => "completed",
            ProgressStep::Error => "error",
            ProgressStep::Other(name) => name,
        }
    }
}

impl From<String> for ProgressStep {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "connecting" => ProgressStep::Connecting,
            "fetching" => ProgressStep::Fetching,
            "processing" => ProgressStep::Processing,
            "completed" => ProgressStep::Completed,
            "error" => ProgressStep::Error,
            _ => ProgressStep::Other(raw),
        }
    }
}

impl From<ProgressStep> for String {
    fn from(step: ProgressStep) -> Self {
        step.as_str().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_steps_round_trip() {
        for name in ["connecting", "fetching", "processing", "completed", "error"] {
            let step = ProgressStep::from(name.to_string());
            assert_eq!(step.as_str(), name);
            assert!(!matches!(step, ProgressStep::Other(_)));
        }
    }

    #[test]
    fn unknown_step_is_preserved() {
        let step = ProgressStep::from("indexing".to_string());
        assert_eq!(step, ProgressStep::Other("indexing".to_string()));
        assert!(!step.is_terminal());
        assert!(!step.is_activity());
    }

    #[test]
    fn terminal_and_activity_partition() {
        assert!(ProgressStep::Completed.is_terminal());
        assert!(ProgressStep::Error.is_terminal());
        assert!(ProgressStep::Connecting.is_activity());
        assert!(!ProgressStep::Completed.is_activity());
    }
}
