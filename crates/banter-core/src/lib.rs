mod analysis;
mod engine;
mod ledger;
mod progress;
mod render;
mod transcript;

pub use analysis::{
    AnalysisHub, AnalysisView, Artifact, ArtifactKind, ArtifactStore, NullArtifactStore, Segment,
};
pub use engine::{EngineStats, FallbackHandler, LogOnlyFallback, TurnEngine};
pub use ledger::{CompleteOutcome, ToolExecution, ToolLedger, UpsertOutcome};
pub use progress::{ProgressBoard, ProgressEntry, PROGRESS_GRACE};
pub use render::{
    ProgressGroup, ProgressItem, ProgressPanel, RenderBody, RenderMessage, RenderModel,
};
pub use transcript::{group_turns, DisplayMessage, MessageBody, Transcript, TurnGroup};
