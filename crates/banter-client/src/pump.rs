use banter_core::{RenderModel, TurnEngine};
use banter_wire::FrameDecoder;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Stream delivered `complete` or `error` and then ended cleanly.
    Completed,
    /// Cancelled cooperatively. Not an error: no message was added.
    Aborted,
    /// Transport failure (stream error, or EOF before the turn closed).
    Failed,
}

/// Drive one turn's byte stream into the engine until it closes.
///
/// Generic over the chunk stream so tests feed in-memory sequences through
/// the exact code path the network uses. Decoding checks for cancellation
/// between chunks and stops cleanly, discarding the decoder's partial buffer
/// rather than committing anything half-formed.
pub async fn pump_turn<S, E>(
    stream: S,
    engine: Arc<Mutex<TurnEngine>>,
    render_tx: watch::Sender<RenderModel>,
    cancel: CancellationToken,
) -> TurnOutcome
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Display,
{
    let mut decoder = FrameDecoder::new();
    let mut dropped_seen = 0u64;
    futures::pin_mut!(stream);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                decoder.discard_partial();
                let mut engine = engine.lock().await;
                engine.abort_turn();
                render_tx.send_replace(engine.render(Instant::now()));
                tracing::debug!("turn aborted");
                return TurnOutcome::Aborted;
            }
            maybe = stream.next() => {
                match maybe {
                    Some(Ok(chunk)) => {
                        let events = decoder.push(&chunk);
                        let mut engine = engine.lock().await;
                        let now = Instant::now();
                        engine.apply_batch(events, now);
                        let dropped = decoder.stats().dropped;
                        engine.note_decode_dropped(dropped - dropped_seen);
                        dropped_seen = dropped;
                        engine.tick(now);
                        render_tx.send_replace(engine.render(now));
                        if !engine.turn_open() {
                            // `complete` or `error` has been applied; drain
                            // nothing further.
                            return TurnOutcome::Completed;
                        }
                    }
                    Some(Err(err)) => {
                        let mut engine = engine.lock().await;
                        engine.fail_turn(format!("stream error: {err}"));
                        render_tx.send_replace(engine.render(Instant::now()));
                        tracing::warn!(%err, "turn stream failed");
                        return TurnOutcome::Failed;
                    }
                    None => {
                        // EOF. Normal after the turn closed; before that it
                        // is a dropped connection.
                        let mut engine = engine.lock().await;
                        if engine.turn_open() {
                            engine.fail_turn("connection closed before the turn completed".to_string());
                            render_tx.send_replace(engine.render(Instant::now()));
                            return TurnOutcome::Failed;
                        }
                        return TurnOutcome::Completed;
                    }
                }
            }
        }
    }
}
