use crate::analysis::{AnalysisHub, ArtifactStore, NullArtifactStore};
use crate::ledger::{CompleteOutcome, ToolExecution, ToolLedger, UpsertOutcome};
use crate::progress::ProgressBoard;
use crate::render::{
    ProgressGroup, ProgressItem, ProgressPanel, RenderBody, RenderMessage, RenderModel,
};
use crate::transcript::{group_turns, MessageBody, Transcript};
use banter_types::{Attachment, MessageId};
use banter_wire::StreamEvent;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;

/// Hook for event shapes the decoder does not recognize. A handler may
/// translate the payload into a known event, which re-enters the engine;
/// returning `None` counts the event and moves on. This is how older or
/// alternate servers degrade gracefully instead of breaking the stream.
pub trait FallbackHandler: Send + Sync {
    fn on_unknown(&self, kind: &str, payload: &Value) -> Option<StreamEvent>;
}

/// Default fallback: log at debug and translate nothing.
pub struct LogOnlyFallback;

impl FallbackHandler for LogOnlyFallback {
    fn on_unknown(&self, kind: &str, _payload: &Value) -> Option<StreamEvent> {
        tracing::debug!(kind, "no translation for unknown event");
        None
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct EngineStats {
    pub decode_dropped: u64,
    pub protocol_violations: u64,
    pub unknown_events: u64,
}

/// The single consumer of one conversation's decoded events.
///
/// Everything here is synchronous and single-threaded: the async layer owns
/// the engine and applies events in arrival order, then publishes
/// [`RenderModel`] snapshots downstream. Nothing in the engine returns
/// `Err` — every failure degrades to "this turn failed" with prior turns and
/// session identity intact.
pub struct TurnEngine {
    transcript: Transcript,
    ledger: ToolLedger,
    progress: ProgressBoard,
    analysis: AnalysisHub,
    /// Executions of closed turns, so the transcript keeps rendering them
    /// after the live ledger resets.
    archive: HashMap<String, ToolExecution>,
    fallback: Box<dyn FallbackHandler>,
    artifacts: Box<dyn ArtifactStore>,
    stats: EngineStats,
    connectivity: bool,
    turn_open: bool,
}

impl Default for TurnEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnEngine {
    pub fn new() -> Self {
        Self {
            transcript: Transcript::new(),
            ledger: ToolLedger::new(),
            progress: ProgressBoard::new(),
            analysis: AnalysisHub::new(),
            archive: HashMap::new(),
            fallback: Box::new(LogOnlyFallback),
            artifacts: Box::new(NullArtifactStore),
            stats: EngineStats::default(),
            connectivity: true,
            turn_open: false,
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn FallbackHandler>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_artifact_store(mut self, artifacts: Box<dyn ArtifactStore>) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    pub fn turn_open(&self) -> bool {
        self.turn_open
    }

    pub fn connectivity(&self) -> bool {
        self.connectivity
    }

    pub fn analysis(&mut self) -> &mut AnalysisHub {
        &mut self.analysis
    }

    /// Synchronous ledger read for the open turn.
    pub fn ledger(&self) -> &ToolLedger {
        &self.ledger
    }

    /// Open a turn with the user's message. Any user action also restores
    /// connectivity; the previous failure belongs to the previous turn.
    pub fn begin_user_turn(&mut self, text: String, attachments: Vec<Attachment>) -> MessageId {
        self.connectivity = true;
        self.turn_open = true;
        self.transcript.push_user_message(text, attachments)
    }

    /// Apply one chunk's worth of decoded events. Tool events go first so
    /// tool state never lags the response text that describes its outcome;
    /// relative order within each class is preserved.
    pub fn apply_batch(&mut self, events: Vec<StreamEvent>, now: Instant) {
        let (tools, rest): (Vec<_>, Vec<_>) = events.into_iter().partition(|event| {
            matches!(event, StreamEvent::ToolUse(_) | StreamEvent::ToolResult(_))
        });
        for event in tools {
            self.apply(event, now);
        }
        for event in rest {
            self.apply(event, now);
        }
    }

    pub fn apply(&mut self, event: StreamEvent, now: Instant) {
        match event {
            StreamEvent::Thinking => self.transcript.set_typing(true),
            StreamEvent::Reasoning { text } => self.transcript.set_reasoning(text),
            StreamEvent::Response { text } => {
                self.transcript.append_response(&text);
            }
            StreamEvent::ToolUse(ev) => {
                if self.ledger.upsert(&ev) == UpsertOutcome::Created {
                    self.transcript.push_tool_message(&ev.tool_use_id);
                }
            }
            StreamEvent::ToolResult(ev) => {
                let id = ev.tool_use_id.clone();
                match self.ledger.complete(ev) {
                    CompleteOutcome::Completed => {}
                    CompleteOutcome::UnmatchedResult => {
                        self.stats.protocol_violations += 1;
                        tracing::warn!(tool_use_id = %id, "tool result with no matching tool use; ignoring");
                    }
                    CompleteOutcome::AlreadyComplete => {
                        self.stats.protocol_violations += 1;
                        tracing::warn!(tool_use_id = %id, "second result for a completed tool use; ignoring");
                    }
                }
            }
            StreamEvent::ToolProgress(ev) => self.progress.apply(&ev, now),
            StreamEvent::Complete { images } => {
                if !self.turn_open {
                    self.stats.protocol_violations += 1;
                    tracing::warn!("completion with no open turn; ignoring");
                    return;
                }
                self.transcript.complete_turn(images);
                self.close_turn();
            }
            StreamEvent::Error { message } => {
                if !self.turn_open {
                    self.stats.protocol_violations += 1;
                    tracing::warn!("error event with no open turn; ignoring");
                    return;
                }
                self.transcript.error_turn(message);
                self.close_turn();
            }
            StreamEvent::Analysis(ev) => self.analysis.append(&ev),
            StreamEvent::AnalysisComplete {
                session_id,
                tool_use_id,
            } => self
                .analysis
                .seal(&banter_types::AnalysisKey::new(session_id, tool_use_id)),
            StreamEvent::Unknown { kind, payload } => {
                match self.fallback.on_unknown(&kind, &payload) {
                    Some(StreamEvent::Unknown { kind, .. }) => {
                        // A translation must land on a known variant.
                        self.stats.unknown_events += 1;
                        tracing::warn!(kind, "fallback returned another unknown event; dropping");
                    }
                    Some(translated) => self.apply(translated, now),
                    None => {
                        self.stats.unknown_events += 1;
                        tracing::debug!(kind, "unhandled stream event");
                    }
                }
            }
        }
    }

    /// Fold newly observed decode drops into the running total. Callers
    /// report the delta since their last call; decoders reset per stream,
    /// but the engine's counter spans the conversation.
    pub fn note_decode_dropped(&mut self, dropped: u64) {
        self.stats.decode_dropped += dropped;
    }

    /// Cooperative cancel: committed content stays, nothing half-formed is
    /// added, and no error message appears.
    pub fn abort_turn(&mut self) {
        if !self.turn_open {
            return;
        }
        self.transcript.abort_turn();
        self.close_turn();
    }

    /// Unrecoverable transport failure: exactly one synthetic error message,
    /// connectivity flipped off. No automatic retry; the next user action
    /// re-establishes connectivity.
    pub fn fail_turn(&mut self, detail: String) {
        self.connectivity = false;
        if !self.turn_open {
            return;
        }
        self.transcript.error_turn(detail);
        self.close_turn();
    }

    /// Session token replaced mid-flight: in-flight ledger, progress and
    /// analysis state tied to the old token is invalidated. Transcript
    /// history survives; finished executions move to the archive so closed
    /// turns keep rendering.
    pub fn on_session_changed(&mut self, old: Option<&str>, new: &str) {
        tracing::info!(
            old = old.unwrap_or("<none>"),
            new,
            "session token changed; invalidating in-flight state"
        );
        for execution in self.ledger.drain() {
            self.archive.insert(execution.id.clone(), execution);
        }
        self.progress.reset();
        if let Some(old) = old {
            self.analysis.drop_session(old);
        }
    }

    /// Explicit conversation-clear: everything goes, counters included.
    pub fn clear(&mut self) {
        *self = TurnEngine::new()
            .with_fallback(std::mem::replace(
                &mut self.fallback,
                Box::new(LogOnlyFallback),
            ))
            .with_artifact_store(std::mem::replace(
                &mut self.artifacts,
                Box::new(NullArtifactStore),
            ));
    }

    fn close_turn(&mut self) {
        self.turn_open = false;
        for execution in self.ledger.drain() {
            self.archive.insert(execution.id.clone(), execution);
        }
        self.progress.reset();
        self.analysis.seal_all();
    }

    fn resolve_execution(&self, tool_use_id: &str) -> Option<ToolExecution> {
        self.ledger
            .get(tool_use_id)
            .or_else(|| self.archive.get(tool_use_id))
            .cloned()
    }

    /// Project current state into a render snapshot.
    pub fn render(&self, now: Instant) -> RenderModel {
        let messages = self
            .transcript
            .messages()
            .iter()
            .map(|message| {
                let body = match &message.body {
                    MessageBody::Text { text } => RenderBody::Text { text: text.clone() },
                    MessageBody::Tool { tool_use_id } => {
                        let execution = self.resolve_execution(tool_use_id);
                        if execution.is_none() {
                            tracing::warn!(%tool_use_id, "tool message with no execution record");
                        }
                        RenderBody::Tool { execution }
                    }
                    MessageBody::Error { message } => RenderBody::Error {
                        message: message.clone(),
                    },
                };
                RenderMessage {
                    id: message.id,
                    sender: message.sender,
                    body,
                    timestamp: message.timestamp,
                    attachments: message.attachments.clone(),
                    images: message.images.clone(),
                    is_streaming: message.is_streaming,
                }
            })
            .collect();

        let groups = self
            .progress
            .grouped()
            .into_iter()
            .map(|(context, entries)| ProgressGroup {
                context: context.to_string(),
                entries: entries
                    .into_iter()
                    .map(|entry| ProgressItem {
                        executor: entry.executor.clone(),
                        session_id: entry.session_id.clone(),
                        step: entry.step.clone(),
                        message: entry.message.clone(),
                        progress: entry.progress,
                        timestamp: entry.timestamp,
                        is_active: entry.is_active(),
                    })
                    .collect(),
            })
            .collect();

        RenderModel {
            messages,
            turns: group_turns(self.transcript.messages()),
            typing: self.transcript.typing(),
            reasoning: self.transcript.reasoning().map(str::to_string),
            progress: ProgressPanel {
                visible: self.progress.visible(now),
                groups,
            },
            analysis: self.analysis.view(self.artifacts.as_ref()),
            connectivity: self.connectivity,
        }
    }

    /// Drop entries whose grace period has elapsed; called on a UI tick.
    pub fn tick(&mut self, now: Instant) {
        self.progress.purge_expired(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use banter_types::Sender;
    use banter_wire::{ToolResultEvent, ToolUseEvent};
    use serde_json::json;

    fn tool_use(id: &str, input: Value) -> StreamEvent {
        StreamEvent::ToolUse(ToolUseEvent {
            tool_use_id: id.to_string(),
            name: "search".to_string(),
            input,
        })
    }

    fn tool_result(id: &str, result: Value) -> StreamEvent {
        StreamEvent::ToolResult(ToolResultEvent {
            tool_use_id: id.to_string(),
            result,
            images: Vec::new(),
        })
    }

    fn render(engine: &TurnEngine) -> RenderModel {
        engine.render(Instant::now())
    }

    #[test]
    fn same_tick_tool_events_are_both_visible() {
        // Two tool events inside one batch: the second must see the first
        // through the synchronous ledger, not through rendered state.
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        engine.apply_batch(
            vec![
                tool_use("t-1", json!({"q": 1})),
                tool_result("t-1", json!("ok")),
            ],
            Instant::now(),
        );

        let execution = engine.ledger().get("t-1").unwrap();
        assert!(execution.is_complete);
        assert_eq!(execution.tool_result, Some(json!("ok")));
    }

    #[test]
    fn tool_events_apply_before_response_in_a_batch() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        engine.apply_batch(
            vec![
                StreamEvent::Response {
                    text: "the tool finished".into(),
                },
                tool_use("t-1", json!({})),
                tool_result("t-1", json!("done")),
            ],
            Instant::now(),
        );
        // The text that describes the outcome must not outrun the ledger.
        assert!(engine.ledger().get("t-1").unwrap().is_complete);

        // Message order still reflects what the reducer appended: the tool
        // message enters when its event is applied.
        let model = render(&engine);
        assert!(matches!(model.messages[1].body, RenderBody::Tool { .. }));
        assert!(matches!(model.messages[2].body, RenderBody::Text { .. }));
    }

    #[test]
    fn out_of_order_results_keep_first_seen_message_order() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        let now = Instant::now();
        engine.apply(tool_use("t-1", json!(1)), now);
        engine.apply(tool_use("t-2", json!(2)), now);
        engine.apply(tool_result("t-2", json!("second")), now);
        engine.apply(tool_result("t-1", json!("first")), now);

        let model = render(&engine);
        let tool_ids: Vec<String> = model
            .messages
            .iter()
            .filter_map(|m| match &m.body {
                RenderBody::Tool {
                    execution: Some(execution),
                } => Some(execution.id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(tool_ids, vec!["t-1", "t-2"]);
        assert_eq!(
            engine.ledger().get("t-1").unwrap().tool_result,
            Some(json!("first"))
        );
        assert_eq!(
            engine.ledger().get("t-2").unwrap().tool_result,
            Some(json!("second"))
        );
    }

    #[test]
    fn unmatched_result_is_counted_not_fatal() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        engine.apply(tool_result("ghost", json!(null)), Instant::now());
        assert_eq!(engine.stats().protocol_violations, 1);
        assert!(engine.turn_open());
    }

    #[test]
    fn double_complete_is_a_protocol_error() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        let now = Instant::now();
        engine.apply(StreamEvent::Complete { images: vec![] }, now);
        assert!(!engine.turn_open());
        engine.apply(StreamEvent::Complete { images: vec![] }, now);
        assert_eq!(engine.stats().protocol_violations, 1);
    }

    #[test]
    fn closed_turns_keep_rendering_their_executions() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        let now = Instant::now();
        engine.apply(tool_use("t-1", json!({})), now);
        engine.apply(tool_result("t-1", json!("ok")), now);
        engine.apply(StreamEvent::Complete { images: vec![] }, now);

        assert!(engine.ledger().is_empty());
        let model = render(&engine);
        assert!(model.messages.iter().any(|m| matches!(
            &m.body,
            RenderBody::Tool { execution: Some(e) } if e.id == "t-1" && e.is_complete
        )));
    }

    #[test]
    fn fail_turn_adds_one_message_and_flips_connectivity() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        engine.apply(
            StreamEvent::Response {
                text: "partial".into(),
            },
            Instant::now(),
        );
        engine.fail_turn("connection reset".into());

        let model = render(&engine);
        assert!(!model.connectivity);
        let errors = model
            .messages
            .iter()
            .filter(|m| matches!(m.body, RenderBody::Error { .. }))
            .count();
        assert_eq!(errors, 1);

        // The next user turn restores connectivity.
        engine.begin_user_turn("again".into(), Vec::new());
        assert!(render(&engine).connectivity);
    }

    #[test]
    fn abort_leaves_no_error_message() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        engine.apply(
            StreamEvent::Response {
                text: "partial".into(),
            },
            Instant::now(),
        );
        engine.abort_turn();

        let model = render(&engine);
        assert!(model.connectivity);
        assert!(!model
            .messages
            .iter()
            .any(|m| matches!(m.body, RenderBody::Error { .. })));
        assert!(model.messages.iter().all(|m| !m.is_streaming));
    }

    #[test]
    fn unknown_event_translation_re_enters_apply() {
        struct LegacyText;
        impl FallbackHandler for LegacyText {
            fn on_unknown(&self, kind: &str, payload: &Value) -> Option<StreamEvent> {
                (kind == "text_delta").then(|| StreamEvent::Response {
                    text: payload["delta"].as_str().unwrap_or_default().to_string(),
                })
            }
        }

        let mut engine = TurnEngine::new().with_fallback(Box::new(LegacyText));
        engine.begin_user_turn("go".into(), Vec::new());
        engine.apply(
            StreamEvent::Unknown {
                kind: "text_delta".into(),
                payload: json!({"delta": "translated"}),
            },
            Instant::now(),
        );
        engine.apply(
            StreamEvent::Unknown {
                kind: "usage".into(),
                payload: json!({}),
            },
            Instant::now(),
        );

        let model = render(&engine);
        assert!(model.messages.iter().any(
            |m| matches!(&m.body, RenderBody::Text { text } if text == "translated")
        ));
        assert_eq!(engine.stats().unknown_events, 1);
    }

    #[test]
    fn session_change_invalidates_in_flight_state_but_not_history() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        let now = Instant::now();
        engine.apply(tool_use("t-1", json!({})), now);
        engine.apply(
            StreamEvent::ToolProgress(banter_wire::ToolProgressEvent {
                tool_id: "t-1".into(),
                session_id: "s-old".into(),
                step: banter_types::ProgressStep::Fetching,
                message: "downloading".into(),
                progress: None,
                metadata: None,
            }),
            now,
        );

        engine.on_session_changed(Some("s-old"), "s-new");

        let model = render(&engine);
        assert!(!model.progress.visible);
        assert!(model.progress.groups.is_empty());
        assert_eq!(model.messages.len(), 2);
        assert_eq!(model.messages[0].sender, Sender::User);
    }

    #[test]
    fn render_is_pure() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        let now = Instant::now();
        engine.apply(tool_use("t-1", json!({})), now);
        engine.apply(
            StreamEvent::Response {
                text: "answer".into(),
            },
            now,
        );

        let first = engine.render(now);
        let second = engine.render(now);
        assert_eq!(first, second);
    }

    #[test]
    fn clear_resets_everything() {
        let mut engine = TurnEngine::new();
        engine.begin_user_turn("go".into(), Vec::new());
        engine.apply(
            StreamEvent::Response {
                text: "answer".into(),
            },
            Instant::now(),
        );
        engine.clear();

        let model = render(&engine);
        assert!(model.messages.is_empty());
        assert!(model.turns.is_empty());
        assert!(!engine.turn_open());
    }
}
