//! Keyboard pipeline: raw input chunks in, key and signal events out
//!
//! Bytes that cannot be decoded yet (a CSI prefix, half of a UTF-8
//! character, a trailing ESC) are buffered and retried when the next chunk
//! arrives. A buffered lone ESC is only reported as the `escape` key once
//! the escape timeout has passed without a follow-up byte, or on
//! [`KeyboardPipeline::flush`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::event::{InputEvent, KeyEvent, SignalKind};
use crate::handler::Handler;
use crate::keybindings::{BindingId, BindingOptions, KeyBindingRegistry};
use crate::sequence::{self, Decoded, ESC};

/// Default time a trailing ESC waits for the rest of its sequence.
pub const DEFAULT_ESCAPE_TIMEOUT: Duration = Duration::from_millis(50);

const DEFAULT_SIGNAL_BINDINGS: [(&str, SignalKind, &str); 3] = [
    ("ctrl+c", SignalKind::Interrupt, "Interrupt"),
    ("ctrl+z", SignalKind::Suspend, "Suspend"),
    ("ctrl+d", SignalKind::Eof, "End of input"),
];

/// Receives failures of asynchronous binding handlers.
#[derive(Clone)]
pub struct ErrorSink(Arc<dyn Fn(String) + Send + Sync>);

impl ErrorSink {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn report(&self, message: String) {
        (self.0)(message)
    }
}

impl fmt::Debug for ErrorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ErrorSink")
    }
}

/// Decodes raw terminal input and dispatches key bindings.
#[derive(Debug)]
pub struct KeyboardPipeline {
    registry: KeyBindingRegistry,
    pending: Vec<u8>,
    pending_since: Option<Instant>,
    escape_timeout: Duration,
    signal_tx: mpsc::UnboundedSender<SignalKind>,
    signal_rx: mpsc::UnboundedReceiver<SignalKind>,
    error_sink: Option<ErrorSink>,
}

impl Default for KeyboardPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardPipeline {
    /// Create a pipeline with the default interrupt/suspend/eof bindings.
    pub fn new() -> Self {
        Self::with_escape_timeout(DEFAULT_ESCAPE_TIMEOUT)
    }

    pub fn with_escape_timeout(escape_timeout: Duration) -> Self {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let mut pipeline = Self {
            registry: KeyBindingRegistry::new(),
            pending: Vec::new(),
            pending_since: None,
            escape_timeout,
            signal_tx,
            signal_rx,
            error_sink: None,
        };
        pipeline.register_default_bindings();
        pipeline
    }

    fn register_default_bindings(&mut self) {
        for (pattern, signal, description) in DEFAULT_SIGNAL_BINDINGS {
            let tx = self.signal_tx.clone();
            self.registry.bind(
                pattern,
                Handler::new(move |_| tx.send(signal).map_err(|e| e.to_string().into())),
                BindingOptions::default()
                    .global()
                    .with_description(description),
            );
        }
    }

    pub fn registry(&self) -> &KeyBindingRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut KeyBindingRegistry {
        &mut self.registry
    }

    pub fn escape_timeout(&self) -> Duration {
        self.escape_timeout
    }

    /// Route failures of spawned asynchronous bindings to `sink` instead of
    /// only logging them.
    pub fn set_error_sink(&mut self, sink: ErrorSink) {
        self.error_sink = Some(sink);
    }

    /// Whether undecoded bytes are waiting for more input.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Register one binding per pattern in `keymap` that sends its command
    /// name through `tx` when pressed.
    pub fn bind_keymap(
        &mut self,
        keymap: &BTreeMap<String, Vec<String>>,
        tx: &mpsc::UnboundedSender<String>,
    ) -> Vec<BindingId> {
        let mut ids = Vec::new();
        for (command, patterns) in keymap {
            for pattern in patterns {
                let tx = tx.clone();
                let name = command.clone();
                let id = self.registry.bind(
                    pattern.as_str(),
                    Handler::new(move |_| tx.send(name.clone()).map_err(|e| e.to_string().into())),
                    BindingOptions::default().with_description(command.as_str()),
                );
                ids.push(id);
            }
        }
        debug!(bindings = ids.len(), "Registered keymap");
        ids
    }

    /// Decode a chunk of input, dispatching bindings for each key.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<InputEvent> {
        self.pending.extend_from_slice(chunk);
        let buf = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            let rest = &buf[offset..];
            // a trailing ESC may be the first byte of a split sequence
            if rest.len() == 1 && rest[0] == ESC {
                break;
            }
            match sequence::decode(&buf, offset) {
                Some(decoded) => {
                    offset += decoded.consumed();
                    self.emit(&decoded, &mut events);
                }
                None if sequence::is_partial_sequence(rest) => break,
                None => {
                    // an unknown CSI is dropped whole, not replayed as literal keys
                    let skip = sequence::csi_length(rest).unwrap_or(1);
                    debug!(byte = rest[0], bytes = skip, "Skipping undecodable input");
                    offset += skip;
                }
            }
        }

        self.set_pending(buf[offset..].to_vec(), offset > 0);
        events
    }

    /// Flush buffered bytes if they have waited longer than the escape timeout.
    pub fn flush_expired(&mut self, now: Instant) -> Vec<InputEvent> {
        match self.pending_since {
            Some(since) if now.saturating_duration_since(since) >= self.escape_timeout => {
                self.flush()
            }
            _ => Vec::new(),
        }
    }

    /// Decode whatever is buffered without waiting for more input.
    ///
    /// A lone ESC becomes the `escape` key; the ESC of an unfinished
    /// sequence is reported as `escape` and the remaining bytes are decoded
    /// on their own.
    pub fn flush(&mut self) -> Vec<InputEvent> {
        let buf = std::mem::take(&mut self.pending);
        self.pending_since = None;
        let mut events = Vec::new();
        let mut offset = 0;

        while offset < buf.len() {
            match sequence::decode(&buf, offset) {
                Some(decoded) => {
                    offset += decoded.consumed();
                    self.emit(&decoded, &mut events);
                }
                None if buf[offset] == ESC => {
                    if let Some(cc) = sequence::control_character(ESC) {
                        self.emit(&Decoded::Control(cc), &mut events);
                    }
                    offset += 1;
                }
                None => {
                    debug!(byte = buf[offset], "Dropping incomplete input byte on flush");
                    offset += 1;
                }
            }
        }
        events
    }

    fn set_pending(&mut self, tail: Vec<u8>, progressed: bool) {
        if tail.is_empty() {
            self.pending_since = None;
        } else if progressed || self.pending_since.is_none() {
            self.pending_since = Some(Instant::now());
        }
        if !tail.is_empty() {
            trace!(bytes = tail.len(), "Buffering partial input");
        }
        self.pending = tail;
    }

    fn emit(&mut self, decoded: &Decoded, events: &mut Vec<InputEvent>) {
        let Some(event) = decoded.to_key_event() else {
            trace!(?decoded, "Decoded unit without key");
            return;
        };
        self.dispatch(&event);
        events.push(InputEvent::Key(event));
        while let Ok(signal) = self.signal_rx.try_recv() {
            events.push(InputEvent::Signal(signal));
        }
    }

    /// Run every matching binding in priority order. A failing handler is
    /// logged and does not stop the remaining ones. Returns how many ran.
    pub fn dispatch(&self, event: &KeyEvent) -> usize {
        let bindings = self.registry.find_matching(event);
        for binding in &bindings {
            let result = match &self.error_sink {
                Some(sink) => {
                    let sink = sink.clone();
                    let keys = binding.keys.clone();
                    binding.handler.call_now_or_else(event, move |error| {
                        sink.report(format!("key binding '{}' failed: {}", keys, error));
                    })
                }
                None => binding.handler.call_now(event, &binding.keys),
            };
            if let Err(error) = result {
                warn!(
                    binding = binding.id.0,
                    keys = %binding.keys,
                    %error,
                    "Key binding handler failed"
                );
            }
        }
        bindings.len()
    }

    /// Like [`dispatch`](Self::dispatch), awaiting asynchronous handlers in order.
    pub async fn dispatch_async(&self, event: &KeyEvent) -> usize {
        let bindings = self.registry.find_matching(event);
        for binding in &bindings {
            if let Err(error) = binding.handler.call(event).await {
                warn!(
                    binding = binding.id.0,
                    keys = %binding.keys,
                    %error,
                    "Key binding handler failed"
                );
            }
        }
        bindings.len()
    }
}
