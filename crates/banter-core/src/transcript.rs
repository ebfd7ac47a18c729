use banter_types::{Attachment, ImageRef, MessageId, Sender};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    /// Placeholder for one tool execution; the record itself lives in the
    /// ledger (or the sealed archive once the turn closes) and is resolved
    /// at render time.
    Tool { tool_use_id: String },
    Error { message: String },
}

/// One entry of the visible conversation. Owned exclusively by the
/// [`Transcript`]; no other component mutates messages.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DisplayMessage {
    pub id: MessageId,
    pub sender: Sender,
    pub body: MessageBody,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<Attachment>,
    pub images: Vec<ImageRef>,
    pub is_streaming: bool,
}

/// A maximal run of same-role consecutive messages. Derived, never stored.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TurnGroup {
    pub sender: Sender,
    pub message_ids: Vec<MessageId>,
}

/// Pure grouping of the message list into display turns: every user message
/// starts a new group; a run of consecutive assistant messages is one
/// assistant turn. Recomputing from the same list always yields the same
/// groups.
pub fn group_turns(messages: &[DisplayMessage]) -> Vec<TurnGroup> {
    let mut groups: Vec<TurnGroup> = Vec::new();
    for message in messages {
        match (message.sender, groups.last_mut()) {
            (Sender::Assistant, Some(last)) if last.sender == Sender::Assistant => {
                last.message_ids.push(message.id);
            }
            (sender, _) => groups.push(TurnGroup {
                sender,
                message_ids: vec![message.id],
            }),
        }
    }
    groups
}

/// Ordered message list plus the turn-scoped ephemeral slots (typing
/// indicator, reasoning). The turn state machine of the engine drives it;
/// messages only ever grow except on [`Transcript::clear`].
#[derive(Debug, Default)]
pub struct Transcript {
    messages: Vec<DisplayMessage>,
    next_id: u64,
    typing: bool,
    reasoning: Option<String>,
    streaming: Option<MessageId>,
    turn_start: usize,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> &[DisplayMessage] {
        &self.messages
    }

    pub fn typing(&self) -> bool {
        self.typing
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.reasoning.as_deref()
    }

    fn alloc_id(&mut self) -> MessageId {
        let id = MessageId(self.next_id);
        self.next_id += 1;
        id
    }

    pub fn push_user_message(&mut self, text: String, attachments: Vec<Attachment>) -> MessageId {
        self.turn_start = self.messages.len();
        let id = self.alloc_id();
        self.messages.push(DisplayMessage {
            id,
            sender: Sender::User,
            body: MessageBody::Text { text },
            timestamp: Utc::now(),
            attachments,
            images: Vec::new(),
            is_streaming: false,
        });
        id
    }

    pub fn set_typing(&mut self, typing: bool) {
        self.typing = typing;
    }

    /// Each reasoning fragment supersedes the previous one; the slot is not
    /// a message and is cleared by the first response text.
    pub fn set_reasoning(&mut self, text: String) {
        self.reasoning = Some(text);
    }

    /// Append a response fragment to the active streaming message, creating
    /// it on first text. Concatenation in arrival order; never merge-by-key.
    pub fn append_response(&mut self, fragment: &str) -> MessageId {
        self.reasoning = None;
        if let Some(id) = self.streaming {
            if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
                if let MessageBody::Text { text } = &mut message.body {
                    text.push_str(fragment);
                }
                return id;
            }
        }
        let id = self.alloc_id();
        self.messages.push(DisplayMessage {
            id,
            sender: Sender::Assistant,
            body: MessageBody::Text {
                text: fragment.to_string(),
            },
            timestamp: Utc::now(),
            attachments: Vec::new(),
            images: Vec::new(),
            is_streaming: true,
        });
        self.streaming = Some(id);
        id
    }

    /// Insert the tool message for a newly seen tool-use id, at the position
    /// it first appears so interleaved tool calls stay chronological.
    pub fn push_tool_message(&mut self, tool_use_id: &str) -> MessageId {
        let id = self.alloc_id();
        self.messages.push(DisplayMessage {
            id,
            sender: Sender::Assistant,
            body: MessageBody::Tool {
                tool_use_id: tool_use_id.to_string(),
            },
            timestamp: Utc::now(),
            attachments: Vec::new(),
            images: Vec::new(),
            is_streaming: false,
        });
        id
    }

    /// Close the turn normally: clear `is_streaming` exactly once and attach
    /// the completion's images. With no streaming message the images go to
    /// the last assistant text message of the turn; failing that they are
    /// dropped with a warning (messages are only created by text arrival,
    /// tool starts, or errors).
    pub fn complete_turn(&mut self, images: Vec<ImageRef>) {
        let target = self.streaming.take().or_else(|| {
            self.messages[self.turn_start..]
                .iter()
                .rev()
                .find(|m| m.sender == Sender::Assistant && matches!(m.body, MessageBody::Text { .. }))
                .map(|m| m.id)
        });
        match target {
            Some(id) => {
                if let Some(message) = self.messages.iter_mut().find(|m| m.id == id) {
                    message.is_streaming = false;
                    message.images.extend(images);
                }
            }
            None => {
                if !images.is_empty() {
                    tracing::warn!(
                        count = images.len(),
                        "completion carried images but the turn has no assistant text message; dropping"
                    );
                }
            }
        }
        self.typing = false;
        self.reasoning = None;
    }

    /// Close the turn with a server-reported failure: one new non-streaming
    /// error message, then the same cleanup as completion.
    pub fn error_turn(&mut self, message: String) {
        if let Some(id) = self.streaming.take() {
            if let Some(active) = self.messages.iter_mut().find(|m| m.id == id) {
                active.is_streaming = false;
            }
        }
        let id = self.alloc_id();
        self.messages.push(DisplayMessage {
            id,
            sender: Sender::Assistant,
            body: MessageBody::Error { message },
            timestamp: Utc::now(),
            attachments: Vec::new(),
            images: Vec::new(),
            is_streaming: false,
        });
        self.typing = false;
        self.reasoning = None;
    }

    /// Quiet close for a cancelled turn: text that already committed stays,
    /// the streaming flag clears, and no message is appended.
    pub fn abort_turn(&mut self) {
        if let Some(id) = self.streaming.take() {
            if let Some(active) = self.messages.iter_mut().find(|m| m.id == id) {
                active.is_streaming = false;
            }
        }
        self.typing = false;
        self.reasoning = None;
    }

    pub fn clear(&mut self) {
        *self = Transcript::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grouping_is_idempotent_and_deterministic() {
        let mut t = Transcript::new();
        t.push_user_message("hi".into(), Vec::new());
        t.append_response("hello");
        t.push_tool_message("t-1");
        t.complete_turn(Vec::new());
        t.push_user_message("more".into(), Vec::new());
        t.append_response("sure");

        let first = group_turns(t.messages());
        let second = group_turns(t.messages());
        assert_eq!(first, second);
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].sender, Sender::User);
        assert_eq!(first[1].sender, Sender::Assistant);
        assert_eq!(first[1].message_ids.len(), 2);
        assert_eq!(first[2].sender, Sender::User);
    }

    #[test]
    fn response_fragments_concatenate_in_arrival_order() {
        let mut t = Transcript::new();
        t.push_user_message("q".into(), Vec::new());
        let id = t.append_response("Hel");
        assert_eq!(t.append_response("lo, "), id);
        assert_eq!(t.append_response("world"), id);

        let message = t.messages().iter().find(|m| m.id == id).unwrap();
        assert_eq!(
            message.body,
            MessageBody::Text {
                text: "Hello, world".to_string()
            }
        );
        assert!(message.is_streaming);
    }

    #[test]
    fn reasoning_slot_is_superseded_and_cleared_by_text() {
        let mut t = Transcript::new();
        t.set_reasoning("step 1".into());
        t.set_reasoning("step 2".into());
        assert_eq!(t.reasoning(), Some("step 2"));
        t.append_response("answer");
        assert_eq!(t.reasoning(), None);
    }

    #[test]
    fn complete_clears_streaming_and_attaches_images() {
        let mut t = Transcript::new();
        t.push_user_message("q".into(), Vec::new());
        let id = t.append_response("done");
        t.complete_turn(vec![ImageRef {
            id: "img-1".into(),
            mime: "image/png".into(),
            alt: None,
        }]);

        let message = t.messages().iter().find(|m| m.id == id).unwrap();
        assert!(!message.is_streaming);
        assert_eq!(message.images.len(), 1);
    }

    #[test]
    fn abort_keeps_committed_text_without_error_message() {
        let mut t = Transcript::new();
        t.push_user_message("q".into(), Vec::new());
        t.append_response("partial answ");
        t.abort_turn();

        assert_eq!(t.messages().len(), 2);
        let last = t.messages().last().unwrap();
        assert!(!last.is_streaming);
        assert!(matches!(last.body, MessageBody::Text { .. }));
        assert!(!t.typing());
    }

    #[test]
    fn error_appends_one_non_streaming_message() {
        let mut t = Transcript::new();
        t.push_user_message("q".into(), Vec::new());
        t.set_typing(true);
        t.error_turn("model overloaded".into());

        let last = t.messages().last().unwrap();
        assert_eq!(last.sender, Sender::Assistant);
        assert!(matches!(last.body, MessageBody::Error { .. }));
        assert!(!last.is_streaming);
        assert!(!t.typing());
    }

    #[test]
    fn message_ids_ascend_with_insertion_order() {
        let mut t = Transcript::new();
        let a = t.push_user_message("one".into(), Vec::new());
        let b = t.push_tool_message("t-1");
        let c = t.append_response("text");
        assert!(a < b && b < c);
    }
}
