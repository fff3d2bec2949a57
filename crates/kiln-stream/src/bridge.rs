//! Streaming bridge
//!
//! Turns a backend byte stream into canonical events, one-for-one and in
//! arrival order. Malformed records are logged and skipped; they never end
//! the stream. A record cut off by end of input or a transport error is
//! dropped, so a truncated `done` can never look like a success.

use crate::canonical::CanonicalEvent;
use crate::decoder::{FrameDecoder, FrameError, RawFrame};
use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;

/// Counters describing one bridged stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Events emitted
    pub emitted: u64,
    /// Records skipped as malformed
    pub skipped: u64,
}

/// Errors that end a bridged stream
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The underlying byte stream failed
    #[error("transport error: {0}")]
    Transport(String),
}

/// Stateful bridge for push-style use
#[derive(Debug, Default)]
pub struct StreamBridge {
    decoder: FrameDecoder,
    stats: BridgeStats,
}

impl StreamBridge {
    /// Bridge with default limits
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bridge with a custom decoder (e.g. a different frame size limit)
    #[inline]
    #[must_use]
    pub fn with_decoder(decoder: FrameDecoder) -> Self {
        Self {
            decoder,
            stats: BridgeStats::default(),
        }
    }

    /// Feed one read; returns the events it completed, in order
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<CanonicalEvent> {
        let frames = self.decoder.push(chunk);
        frames.into_iter().filter_map(|f| self.accept(f)).collect()
    }

    /// End of input: drop the unterminated tail, if any
    pub fn finish(&mut self) {
        if let Some(error) = self.decoder.finish() {
            self.stats.skipped += 1;
            tracing::warn!(%error, "discarding incomplete stream frame");
        }
    }

    /// Counters so far
    #[inline]
    #[must_use]
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    fn accept(&mut self, frame: Result<RawFrame, FrameError>) -> Option<CanonicalEvent> {
        match frame.and_then(|raw| raw.decode()) {
            Ok(event) => {
                self.stats.emitted += 1;
                Some(event)
            }
            Err(error) => {
                self.stats.skipped += 1;
                tracing::warn!(%error, skipped = self.stats.skipped, "skipping malformed stream frame");
                None
            }
        }
    }
}

struct BridgeState<S> {
    input: S,
    bridge: StreamBridge,
    pending: VecDeque<Result<CanonicalEvent, BridgeError>>,
    done: bool,
}

/// Bridge a byte stream into a stream of canonical events
///
/// A transport error is yielded once as `Err` and ends the stream; events
/// completed before the error are delivered first, a partial record is not.
pub fn bridge<S, E>(input: S) -> impl Stream<Item = Result<CanonicalEvent, BridgeError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin,
    E: Display + Send,
{
    let state = BridgeState {
        input,
        bridge: StreamBridge::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.input.next().await {
                Some(Ok(chunk)) => {
                    let events = state.bridge.feed(&chunk);
                    state.pending.extend(events.into_iter().map(Ok));
                }
                Some(Err(error)) => {
                    state.done = true;
                    state.bridge.finish();
                    state
                        .pending
                        .push_back(Err(BridgeError::Transport(error.to_string())));
                }
                None => {
                    state.done = true;
                    state.bridge.finish();
                }
            }
        }
    })
}
