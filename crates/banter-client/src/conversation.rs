use crate::client::{ChatClient, ClientError, OutboundAttachment, TurnRequest};
use crate::pump::{pump_turn, TurnOutcome};
use crate::session::{SessionTracker, SessionUpdate};
use banter_core::{RenderModel, TurnEngine};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

struct ActiveTurn {
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<TurnOutcome>,
}

/// Cancel and await the pump in `slot`, if any. Callers hold the slot lock,
/// which is what makes turn replacement atomic.
async fn abort_active(slot: &mut Option<ActiveTurn>) {
    let Some(active) = slot.take() else {
        return;
    };
    active.cancel.cancel();
    let _ = active.task.await;
}

/// The surface an embedding UI talks to: one conversation, one engine, one
/// session identity, at most one outbound stream at a time.
///
/// Render snapshots are published through a watch channel after every applied
/// batch; the UI subscribes and draws whatever the latest snapshot says.
pub struct Conversation {
    engine: Arc<Mutex<TurnEngine>>,
    client: ChatClient,
    session: Arc<SessionTracker>,
    render_tx: watch::Sender<RenderModel>,
    active: Mutex<Option<ActiveTurn>>,
}

impl Conversation {
    pub fn new(client: ChatClient, engine: TurnEngine) -> Self {
        let (render_tx, _) = watch::channel(RenderModel::default());
        Self {
            engine: Arc::new(Mutex::new(engine)),
            client,
            session: Arc::new(SessionTracker::in_memory()),
            render_tx,
            active: Mutex::new(None),
        }
    }

    pub fn with_session(mut self, session: SessionTracker) -> Self {
        self.session = Arc::new(session);
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<RenderModel> {
        self.render_tx.subscribe()
    }

    pub fn snapshot(&self) -> RenderModel {
        self.render_tx.borrow().clone()
    }

    pub fn session(&self) -> &SessionTracker {
        &self.session
    }

    /// Send a user turn. Any still-open previous stream is aborted first —
    /// silently, per the cancellation contract — then the new turn's stream
    /// is opened and pumped in a background task.
    ///
    /// The turn slot stays locked for the whole hand-over, so overlapping
    /// `send` calls serialize: the second cannot spawn its pump until the
    /// first has stored (or failed) its own, and no pump is ever dropped
    /// from the slot without being cancelled and awaited.
    pub async fn send(
        &self,
        text: String,
        attachments: Vec<OutboundAttachment>,
    ) -> Result<(), ClientError> {
        let mut active = self.active.lock().await;
        abort_active(&mut active).await;

        let descriptors = attachments.iter().map(|a| a.descriptor()).collect();
        {
            let mut engine = self.engine.lock().await;
            engine.begin_user_turn(text.clone(), descriptors);
            self.render_tx.send_replace(engine.render(std::time::Instant::now()));
        }

        let request = TurnRequest { text, attachments };
        let token = self.session.get();
        let opened = self.client.open_turn(&request, token.as_deref()).await;

        let (headers, stream) = match opened {
            Ok(opened) => opened,
            Err(err) => {
                let mut engine = self.engine.lock().await;
                engine.fail_turn(format!("request failed: {err}"));
                self.render_tx.send_replace(engine.render(std::time::Instant::now()));
                return Err(err);
            }
        };

        // Token negotiation happens on the headers, before any body decode.
        if let SessionUpdate::Replaced { old, new } = self.session.update_from_response(&headers) {
            let mut engine = self.engine.lock().await;
            engine.on_session_changed(Some(&old), &new);
        }

        let turn_id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let engine = Arc::clone(&self.engine);
            let render_tx = self.render_tx.clone();
            let cancel = cancel.clone();
            async move {
                let outcome = pump_turn(stream, engine, render_tx, cancel).await;
                tracing::debug!(%turn_id, ?outcome, "turn finished");
                outcome
            }
        });

        *active = Some(ActiveTurn { cancel, task });
        Ok(())
    }

    /// Abort the in-flight turn, if any, and wait for the pump to wind down.
    pub async fn cancel(&self) {
        abort_active(&mut *self.active.lock().await).await;
    }

    /// Explicit conversation-clear: abort, wipe the engine, drop the session
    /// token, and ask the server to release its buffers for it.
    pub async fn clear(&self) {
        self.cancel().await;
        let token = self.session.get();
        self.client.release_progress(token.as_deref()).await;
        self.session.reset();
        let mut engine = self.engine.lock().await;
        engine.clear();
        self.render_tx.send_replace(engine.render(std::time::Instant::now()));
    }

    /// Page-unload path: abort anything in flight and fire the best-effort
    /// server-side cleanup. Never blocks on the server's answer.
    pub async fn shutdown(&self) {
        self.cancel().await;
        let token = self.session.get();
        self.client.release_progress(token.as_deref()).await;
    }
}
