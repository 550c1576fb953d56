//! Key and signal event types produced by the input pipeline

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

bitflags! {
    /// Keyboard modifier flags.
    ///
    /// The bit layout is the xterm CSI modifier encoding
    /// (`param = 1 + bitmask`), so a decoded parameter maps directly.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
    pub struct Modifiers: u8 {
        const SHIFT = 0b0001;
        const ALT   = 0b0010;
        const CTRL  = 0b0100;
        const META  = 0b1000;
    }
}

impl Modifiers {
    /// Decode the 4-bit mask from a CSI modifier parameter (`N - 1`).
    pub fn from_csi_param(param: u16) -> Self {
        let mask = param.saturating_sub(1) & 0x0F;
        // mask is at most 0x0F, the cast never truncates meaningful bits
        Self::from_bits_truncate(mask as u8)
    }
}

/// A decoded key press.
///
/// `key` is a normalized lowercase identifier such as `"a"`, `"up"` or
/// `"f5"`. Events are never mutated after the pipeline emits them.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyEvent {
    /// Normalized key name
    pub key: String,
    /// Modifier flags held during the press
    pub modifiers: Modifiers,
    /// When the pipeline decoded the key
    pub timestamp: Instant,
    /// Free-form extra data (raw sequence, source, ...)
    pub metadata: Option<serde_json::Value>,
}

impl KeyEvent {
    /// Create a key event stamped with the current time.
    pub fn new(key: impl Into<String>, modifiers: Modifiers) -> Self {
        Self {
            key: key.into(),
            modifiers,
            timestamp: Instant::now(),
            metadata: None,
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn ctrl(&self) -> bool {
        self.modifiers.contains(Modifiers::CTRL)
    }

    pub fn alt(&self) -> bool {
        self.modifiers.contains(Modifiers::ALT)
    }

    pub fn shift(&self) -> bool {
        self.modifiers.contains(Modifiers::SHIFT)
    }

    pub fn meta(&self) -> bool {
        self.modifiers.contains(Modifiers::META)
    }

    /// Render as a binding pattern, e.g. `"ctrl+shift+a"`.
    pub fn to_pattern(&self) -> String {
        let mut parts = Vec::with_capacity(5);
        if self.ctrl() {
            parts.push("ctrl");
        }
        if self.alt() {
            parts.push("alt");
        }
        if self.shift() {
            parts.push("shift");
        }
        if self.meta() {
            parts.push("meta");
        }
        parts.push(&self.key);
        parts.join("+")
    }
}

/// Process-level or chord-derived signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    /// SIGINT or ctrl+c
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGWINCH
    Resize,
    /// ctrl+z
    Suspend,
    /// ctrl+d
    Eof,
}

impl SignalKind {
    /// Signals that stop the application loop.
    pub fn stops_loop(self) -> bool {
        matches!(self, SignalKind::Interrupt | SignalKind::Terminate)
    }

    pub fn name(self) -> &'static str {
        match self {
            SignalKind::Interrupt => "interrupt",
            SignalKind::Terminate => "terminate",
            SignalKind::Resize => "resize",
            SignalKind::Suspend => "suspend",
            SignalKind::Eof => "eof",
        }
    }
}

/// Output of the keyboard pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// A decoded key press
    Key(KeyEvent),
    /// A signal raised by a default chord binding
    Signal(SignalKind),
}
