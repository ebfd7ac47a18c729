use banter_types::AnalysisKey;
use banter_wire::AnalysisEvent;
use serde::Serialize;
use std::collections::HashMap;

const FINAL_RESPONSE_OPEN: &str = "<final_response>";
const FINAL_RESPONSE_CLOSE: &str = "</final_response>";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Chart,
    Image,
}

/// Resolved auxiliary artifact (a chart or image produced alongside the
/// analysis text).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Artifact {
    pub id: String,
    pub mime: String,
    pub uri: String,
}

/// Lookup into the external artifact store. Resolution is keyed by the full
/// `(session, tool use, artifact)` triple; the store itself is out of scope.
pub trait ArtifactStore: Send + Sync {
    fn resolve(&self, key: &AnalysisKey, artifact_id: &str) -> Option<Artifact>;
}

/// Store that resolves nothing; every inline token renders a placeholder.
pub struct NullArtifactStore;

impl ArtifactStore for NullArtifactStore {
    fn resolve(&self, _key: &AnalysisKey, _artifact_id: &str) -> Option<Artifact> {
        None
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Segment {
    Text { text: String },
    Chart { artifact: Artifact },
    Image { artifact: Artifact },
    /// Unresolvable inline token. A miss is a placeholder, never an error
    /// that blocks the rest of the content.
    Missing {
        token_kind: ArtifactKind,
        artifact_id: String,
    },
}

/// What the analysis panel may render right now.
#[derive(Debug, Clone, Serialize, PartialEq, Default)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AnalysisView {
    #[default]
    Idle,
    /// Stream still open: nothing from the buffer is rendered. The flag only
    /// says whether the opening delimiter has fully appeared, to pick a
    /// loading treatment.
    Streaming { opening_seen: bool },
    Ready { segments: Vec<Segment> },
}

#[derive(Debug, Default)]
struct AnalysisBuffer {
    text: String,
    sealed: bool,
}

/// Per-key accumulating buffers for the analysis sub-stream, plus the one
/// key currently open for viewing.
///
/// The buffer is append-only and untrusted for rendering: it may end in a
/// half-written delimiter tag. Content is exposed only once a complete
/// `<final_response>` pair exists or the stream for the key is sealed,
/// whichever happens first.
#[derive(Debug, Default)]
pub struct AnalysisHub {
    buffers: HashMap<AnalysisKey, AnalysisBuffer>,
    active: Option<AnalysisKey>,
}

impl AnalysisHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: &AnalysisEvent) {
        let key = AnalysisKey::new(event.session_id.clone(), event.tool_use_id.clone());
        let buffer = self.buffers.entry(key).or_default();
        if buffer.sealed {
            tracing::warn!(
                tool_use_id = %event.tool_use_id,
                "analysis text after completion; ignoring"
            );
            return;
        }
        buffer.text.push_str(&event.text);
    }

    pub fn seal(&mut self, key: &AnalysisKey) {
        self.buffers.entry(key.clone()).or_default().sealed = true;
    }

    /// Seal every open buffer. Used when the turn's stream ends or is
    /// aborted: no more text can arrive, so extraction may run instead of
    /// leaving views loading forever.
    pub fn seal_all(&mut self) {
        for buffer in self.buffers.values_mut() {
            buffer.sealed = true;
        }
    }

    /// Switch the rendered key. The view derives from the new key's buffer
    /// alone; a previously open key's partial content never bleeds in.
    pub fn open(&mut self, key: AnalysisKey) {
        self.active = Some(key);
    }

    pub fn close(&mut self) {
        self.active = None;
    }

    pub fn active(&self) -> Option<&AnalysisKey> {
        self.active.as_ref()
    }

    /// Drop all buffers belonging to one session. Called when the session
    /// token is replaced mid-flight.
    pub fn drop_session(&mut self, session_id: &str) {
        self.buffers.retain(|key, _| key.session_id != session_id);
        if self
            .active
            .as_ref()
            .is_some_and(|key| key.session_id == session_id)
        {
            self.active = None;
        }
    }

    pub fn view(&self, store: &dyn ArtifactStore) -> AnalysisView {
        let Some(key) = &self.active else {
            return AnalysisView::Idle;
        };
        let Some(buffer) = self.buffers.get(key) else {
            return AnalysisView::Streaming {
                opening_seen: false,
            };
        };

        if buffer.sealed || complete_pair(&buffer.text).is_some() {
            let content = extract_content(&buffer.text);
            return AnalysisView::Ready {
                segments: segment_content(content, key, store),
            };
        }
        AnalysisView::Streaming {
            opening_seen: buffer.text.contains(FINAL_RESPONSE_OPEN),
        }
    }

    pub fn clear(&mut self) {
        *self = AnalysisHub::new();
    }
}

/// Byte range of the inner text of a matched delimiter pair, if one exists.
fn complete_pair(text: &str) -> Option<(usize, usize)> {
    let open = text.find(FINAL_RESPONSE_OPEN)?;
    let inner_start = open + FINAL_RESPONSE_OPEN.len();
    let close = text[inner_start..].find(FINAL_RESPONSE_CLOSE)?;
    Some((inner_start, inner_start + close))
}

/// Delimiter extraction, run only once the buffer is safe to expose.
///
/// Matched pair wins; otherwise fall back to the first Markdown heading
/// onward for producers that omit the delimiter. Neither present is a known
/// ambiguity: log it and show everything rather than guess.
fn extract_content(text: &str) -> &str {
    if let Some((start, end)) = complete_pair(text) {
        return text[start..end].trim_matches('\n');
    }
    if let Some(open) = text.find(FINAL_RESPONSE_OPEN) {
        // Opening tag with no close: the stream ended inside the delimited
        // region. Everything after the tag is the intended content.
        return text[open + FINAL_RESPONSE_OPEN.len()..].trim_matches('\n');
    }
    if let Some(heading) = text.find("\n#") {
        return &text[heading + 1..];
    }
    if text.starts_with('#') {
        return text;
    }
    tracing::debug!(
        len = text.len(),
        "analysis content has neither delimiter pair nor heading; rendering as-is"
    );
    text
}

/// Split exposed content around inline `[[chart:<id>]]` / `[[image:<id>]]`
/// tokens, resolving each against the artifact store.
fn segment_content(content: &str, key: &AnalysisKey, store: &dyn ArtifactStore) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = content;

    loop {
        let chart = rest.find("[[chart:");
        let image = rest.find("[[image:");
        let (start, token_kind) = match (chart, image) {
            (Some(c), Some(i)) if c < i => (c, ArtifactKind::Chart),
            (Some(_), Some(i)) => (i, ArtifactKind::Image),
            (Some(c), None) => (c, ArtifactKind::Chart),
            (None, Some(i)) => (i, ArtifactKind::Image),
            (None, None) => break,
        };

        let id_start = start + "[[chart:".len();
        let Some(id_len) = rest[id_start..].find("]]") else {
            // Unterminated token: treat the remainder as plain text.
            break;
        };

        if start > 0 {
            segments.push(Segment::Text {
                text: rest[..start].to_string(),
            });
        }
        let artifact_id = rest[id_start..id_start + id_len].to_string();
        match store.resolve(key, &artifact_id) {
            Some(artifact) => segments.push(match token_kind {
                ArtifactKind::Chart => Segment::Chart { artifact },
                ArtifactKind::Image => Segment::Image { artifact },
            }),
            None => segments.push(Segment::Missing {
                token_kind,
                artifact_id,
            }),
        }
        rest = &rest[id_start + id_len + 2..];
    }

    if !rest.is_empty() {
        segments.push(Segment::Text {
            text: rest.to_string(),
        });
    }
    segments
}
