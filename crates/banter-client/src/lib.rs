mod client;
mod conversation;
mod pump;
mod session;

pub use client::{ChatClient, ClientError, OutboundAttachment, TurnRequest, SESSION_HEADER};
pub use conversation::Conversation;
pub use pump::{pump_turn, TurnOutcome};
pub use session::{MemorySessionStore, SessionStore, SessionTracker, SessionUpdate};
