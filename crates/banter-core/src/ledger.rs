use banter_types::ImageRef;
use banter_wire::{ToolResultEvent, ToolUseEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;

/// One tool invocation, merged from its `tool_use`/`tool_result` events.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolExecution {
    pub id: String,
    pub tool_name: String,
    pub tool_input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<Value>,
    pub images: Vec<ImageRef>,
    pub is_complete: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First event for this id; the caller owes it a tool message.
    Created,
    /// Input revision for a known id.
    Revised,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteOutcome {
    Completed,
    /// Result with no matching use: protocol violation, logged and ignored.
    UnmatchedResult,
    /// Second result for an already-complete id: an id never reopens.
    AlreadyComplete,
}

/// Keyed collection of in-flight and finished tool executions for the open
/// turn, in first-seen order.
///
/// The ledger is mutated and read synchronously in the same tick an event is
/// applied. Published render state is a downstream projection of it, never
/// the source of truth: two tool events decoded from one chunk must both be
/// visible to whoever builds the next message, which a read-the-last-rendered
/// policy would silently lose.
#[derive(Debug, Default)]
pub struct ToolLedger {
    executions: HashMap<String, ToolExecution>,
    order: Vec<String>,
}

impl ToolLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, event: &ToolUseEvent) -> UpsertOutcome {
        match self.executions.get_mut(&event.tool_use_id) {
            Some(existing) => {
                // Input revision only. Completion state never regresses.
                existing.tool_input = event.input.clone();
                UpsertOutcome::Revised
            }
            None => {
                self.order.push(event.tool_use_id.clone());
                self.executions.insert(
                    event.tool_use_id.clone(),
                    ToolExecution {
                        id: event.tool_use_id.clone(),
                        tool_name: event.name.clone(),
                        tool_input: event.input.clone(),
                        tool_result: None,
                        images: Vec::new(),
                        is_complete: false,
                    },
                );
                UpsertOutcome::Created
            }
        }
    }

    pub fn complete(&mut self, event: ToolResultEvent) -> CompleteOutcome {
        let Some(execution) = self.executions.get_mut(&event.tool_use_id) else {
            return CompleteOutcome::UnmatchedResult;
        };
        if execution.is_complete {
            return CompleteOutcome::AlreadyComplete;
        }
        execution.tool_result = Some(event.result);
        execution.images = event.images;
        execution.is_complete = true;
        CompleteOutcome::Completed
    }

    pub fn get(&self, tool_use_id: &str) -> Option<&ToolExecution> {
        self.executions.get(tool_use_id)
    }

    /// Executions in first-seen order of their ids.
    pub fn executions(&self) -> impl Iterator<Item = &ToolExecution> {
        self.order.iter().filter_map(|id| self.executions.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Empty the ledger, yielding the executions in first-seen order. Called
    /// on turn close to move the turn's records into the sealed archive.
    pub fn drain(&mut self) -> Vec<ToolExecution> {
        let order = std::mem::take(&mut self.order);
        let mut executions = std::mem::take(&mut self.executions);
        order
            .into_iter()
            .filter_map(|id| executions.remove(&id))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn use_event(id: &str, input: Value) -> ToolUseEvent {
        ToolUseEvent {
            tool_use_id: id.to_string(),
            name: "search".to_string(),
            input,
        }
    }

    fn result_event(id: &str, result: Value) -> ToolResultEvent {
        ToolResultEvent {
            tool_use_id: id.to_string(),
            result,
            images: Vec::new(),
        }
    }

    #[test]
    fn revision_updates_input_without_duplicating() {
        let mut ledger = ToolLedger::new();
        assert_eq!(
            ledger.upsert(&use_event("t-1", json!({"q": "rust"}))),
            UpsertOutcome::Created
        );
        assert_eq!(
            ledger.upsert(&use_event("t-1", json!({"q": "rust lang"}))),
            UpsertOutcome::Revised
        );
        assert_eq!(ledger.len(), 1);
        assert_eq!(
            ledger.get("t-1").unwrap().tool_input,
            json!({"q": "rust lang"})
        );
    }

    #[test]
    fn last_input_wins_and_complete_iff_one_result() {
        let mut ledger = ToolLedger::new();
        ledger.upsert(&use_event("t-1", json!(1)));
        ledger.upsert(&use_event("t-1", json!(2)));
        ledger.upsert(&use_event("t-1", json!(3)));
        assert_eq!(
            ledger.complete(result_event("t-1", json!("done"))),
            CompleteOutcome::Completed
        );

        let execution = ledger.get("t-1").unwrap();
        assert!(execution.is_complete);
        assert_eq!(execution.tool_input, json!(3));
        assert_eq!(execution.tool_result, Some(json!("done")));
    }

    #[test]
    fn completed_id_never_reopens() {
        let mut ledger = ToolLedger::new();
        ledger.upsert(&use_event("t-1", json!(1)));
        ledger.complete(result_event("t-1", json!("first")));
        assert_eq!(
            ledger.complete(result_event("t-1", json!("second"))),
            CompleteOutcome::AlreadyComplete
        );
        assert_eq!(ledger.get("t-1").unwrap().tool_result, Some(json!("first")));
    }

    #[test]
    fn unmatched_result_is_reported_not_recorded() {
        let mut ledger = ToolLedger::new();
        assert_eq!(
            ledger.complete(result_event("ghost", json!(null))),
            CompleteOutcome::UnmatchedResult
        );
        assert!(ledger.is_empty());
    }

    #[test]
    fn executions_keep_first_seen_order_despite_completion_order() {
        let mut ledger = ToolLedger::new();
        ledger.upsert(&use_event("t-1", json!(1)));
        ledger.upsert(&use_event("t-2", json!(2)));
        ledger.complete(result_event("t-2", json!("second")));
        ledger.complete(result_event("t-1", json!("first")));

        let ids: Vec<&str> = ledger.executions().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["t-1", "t-2"]);
        assert!(ledger.executions().all(|e| e.is_complete));
    }

    #[test]
    fn drain_empties_in_first_seen_order() {
        let mut ledger = ToolLedger::new();
        ledger.upsert(&use_event("t-2", json!(1)));
        ledger.upsert(&use_event("t-1", json!(2)));
        let drained = ledger.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].id, "t-2");
        assert!(ledger.is_empty());
    }
}
