use banter_types::ProgressStep;
use banter_wire::ToolProgressEvent;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};

/// Grace period a finished entry stays visible, measured from the instant of
/// its terminal transition.
pub const PROGRESS_GRACE: Duration = Duration::from_secs(3);

/// Latest known state of one `(context, executor, session)` progress line.
/// A new event for the key replaces the entry in place; entries are never
/// appended per step.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEntry {
    pub context: String,
    pub executor: String,
    pub session_id: String,
    pub step: ProgressStep,
    pub message: String,
    pub progress: Option<f32>,
    pub timestamp: DateTime<Utc>,
    finished_at: Option<Instant>,
}

impl ProgressEntry {
    pub fn is_active(&self) -> bool {
        !self.step.is_terminal()
    }
}

/// Transient side-panel model for tool progress. Expiry is measured from
/// each entry's terminal transition instant, not from wall-clock polling, so
/// a late render never extends an entry's life.
#[derive(Debug, Default)]
pub struct ProgressBoard {
    entries: Vec<ProgressEntry>,
    hide_after: Option<Instant>,
    engaged: bool,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[ProgressEntry] {
        &self.entries
    }

    pub fn apply(&mut self, event: &ToolProgressEvent, now: Instant) {
        let executor = event.executor().to_string();
        let terminal = event.step.is_terminal();
        if event.step.is_activity() {
            self.engaged = true;
        }

        let existing = self.entries.iter_mut().find(|entry| {
            entry.context == event.tool_id
                && entry.executor == executor
                && entry.session_id == event.session_id
        });
        match existing {
            Some(entry) => {
                // Replace in place: position in the visible ordering is kept.
                let was_terminal = !entry.is_active();
                entry.step = event.step.clone();
                entry.message = event.message.clone();
                entry.progress = event.progress;
                entry.timestamp = Utc::now();
                entry.finished_at = match (terminal, was_terminal) {
                    (true, true) => entry.finished_at,
                    (true, false) => Some(now),
                    (false, _) => None,
                };
            }
            None => self.entries.push(ProgressEntry {
                context: event.tool_id.clone(),
                executor,
                session_id: event.session_id.clone(),
                step: event.step.clone(),
                message: event.message.clone(),
                progress: event.progress,
                timestamp: Utc::now(),
                finished_at: terminal.then_some(now),
            }),
        }

        self.reschedule_hide();
    }

    fn reschedule_hide(&mut self) {
        // A hide is only pending while nothing is active; any new active
        // entry cancels it.
        if self.entries.iter().any(ProgressEntry::is_active) {
            self.hide_after = None;
        } else {
            self.hide_after = self
                .entries
                .iter()
                .filter_map(|entry| entry.finished_at)
                .max()
                .map(|finished| finished + PROGRESS_GRACE);
        }
    }

    /// Panel visibility: shown once an activity step (`connecting`,
    /// `fetching`, `processing`) has appeared, hidden 3 s after the last
    /// entry turned terminal.
    pub fn visible(&self, now: Instant) -> bool {
        if !self.engaged {
            return false;
        }
        if self.entries.iter().any(ProgressEntry::is_active) {
            return true;
        }
        self.hide_after.is_some_and(|deadline| now < deadline)
    }

    /// Remove entries whose grace period has elapsed.
    pub fn purge_expired(&mut self, now: Instant) {
        self.entries.retain(|entry| match entry.finished_at {
            Some(finished) => now < finished + PROGRESS_GRACE,
            None => true,
        });
        if self.entries.is_empty() && self.hide_after.is_some_and(|deadline| now >= deadline) {
            self.engaged = false;
            self.hide_after = None;
        }
    }

    /// Entries grouped by context in first-seen order; within a context the
    /// `(executor, session)` sub-keys keep their first-seen order too.
    pub fn grouped(&self) -> Vec<(&str, Vec<&ProgressEntry>)> {
        let mut groups: Vec<(&str, Vec<&ProgressEntry>)> = Vec::new();
        for entry in &self.entries {
            match groups.iter_mut().find(|(context, _)| *context == entry.context) {
                Some((_, members)) => members.push(entry),
                None => groups.push((entry.context.as_str(), vec![entry])),
            }
        }
        groups
    }

    pub fn reset(&mut self) {
        *self = ProgressBoard::new();
    }
}
