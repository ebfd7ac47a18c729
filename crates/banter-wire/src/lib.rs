mod decoder;
mod event;

pub use decoder::{DecodeStats, FrameDecoder};
pub use event::{
    decode_frame, AnalysisEvent, DecodeError, StreamEvent, ToolProgressEvent, ToolResultEvent,
    ToolUseEvent,
};
