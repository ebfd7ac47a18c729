mod analysis;
mod message;
mod progress;

pub use analysis::AnalysisKey;
pub use message::{Attachment, ImageRef, MessageId, Sender};
pub use progress::ProgressStep;
