//! Test utilities for tui-pulse applications
//!
//! - [`key`]: build a [`KeyEvent`] from a binding pattern (`key("ctrl+p")`)
//! - [`RecordingView`]: a [`View`] that logs its lifecycle calls
//! - [`BusRecorder`]: a bus subscriber that keeps every message it sees
//! - [`RenderHarness`]: render into an in-memory buffer and read it back
//! - Assertion macros for checking emitted events
//!
//! # Example
//!
//! ```ignore
//! use tui_pulse::testing::{key, BusRecorder};
//!
//! let bus = EventBus::default();
//! let recorder = BusRecorder::new();
//! recorder.attach(&bus, "recorder");
//! bus.publish("saved", json!({}), PublishOptions::new());
//! assert_eq!(recorder.types(), vec!["saved"]);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use ratatui::backend::TestBackend;
use ratatui::buffer::Buffer;
use ratatui::layout::Rect;
use ratatui::widgets::Paragraph;
use ratatui::{Frame, Terminal};
use serde_json::Value;

use crate::bus::{BusMessage, EventBus, SubscriberId};
use crate::error::ViewError;
use crate::event::{KeyEvent, Modifiers};
use crate::handler::Handler;
use crate::keybindings::parse_key_pattern;
use crate::view::{View, ViewContext, ViewKeyBinding};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a `KeyEvent` from a binding pattern.
///
/// # Examples
///
/// ```
/// use tui_pulse_core::testing::key;
///
/// let k = key("ctrl+p");
/// assert_eq!(k.key, "p");
/// assert!(k.ctrl());
///
/// assert_eq!(key("esc").key, "escape");
/// ```
///
/// # Panics
///
/// Panics if the pattern names only modifiers.
pub fn key(pattern: &str) -> KeyEvent {
    let parsed = parse_key_pattern(pattern);
    assert!(
        !parsed.key.is_empty(),
        "Key pattern has no key: {:?}",
        pattern
    );
    KeyEvent::new(parsed.key, parsed.modifiers)
}

/// Parse whitespace-separated patterns into key events.
pub fn keys(patterns: &str) -> Vec<KeyEvent> {
    patterns.split_whitespace().map(key).collect()
}

/// A character key as the decoder reports it: uppercase letters become
/// lowercase with shift, space becomes `"space"`.
pub fn char_key(c: char) -> KeyEvent {
    if c == ' ' {
        KeyEvent::new("space", Modifiers::empty())
    } else if c.is_uppercase() {
        KeyEvent::new(c.to_lowercase().to_string(), Modifiers::SHIFT)
    } else {
        KeyEvent::new(c.to_string(), Modifiers::empty())
    }
}

pub fn ctrl_key(c: char) -> KeyEvent {
    KeyEvent::new(c.to_ascii_lowercase().to_string(), Modifiers::CTRL)
}

pub fn alt_key(c: char) -> KeyEvent {
    KeyEvent::new(c.to_ascii_lowercase().to_string(), Modifiers::ALT)
}

/// Shared lifecycle log, entries look like `"home:mount"`.
#[derive(Debug, Clone, Default)]
pub struct ViewLog(Arc<Mutex<Vec<String>>>);

impl ViewLog {
    pub fn push(&self, entry: String) {
        lock(&self.0).push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.0).clone()
    }

    /// Return and clear the log.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *lock(&self.0))
    }
}

/// Handles into a [`RecordingView`] that stay usable after the view is
/// registered.
#[derive(Debug, Clone)]
pub struct ViewProbe {
    log: ViewLog,
    state: Arc<Mutex<Value>>,
    context: Arc<Mutex<Option<ViewContext>>>,
}

impl ViewProbe {
    pub fn log(&self) -> &ViewLog {
        &self.log
    }

    /// Current view state.
    pub fn state(&self) -> Value {
        lock(&self.state).clone()
    }

    /// Overwrite the view state, as user interaction would.
    pub fn set_state(&self, state: Value) {
        *lock(&self.state) = state;
    }

    /// Context received on the last mount.
    pub fn context(&self) -> Option<ViewContext> {
        lock(&self.context).clone()
    }
}

/// View that records lifecycle calls and renders its name.
#[derive(Debug)]
pub struct RecordingView {
    name: String,
    probe: ViewProbe,
    bindings: Vec<ViewKeyBinding>,
    fail_mount: bool,
}

impl RecordingView {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_log(name, ViewLog::default())
    }

    /// Record into a log shared with other views.
    pub fn with_log(name: impl Into<String>, log: ViewLog) -> Self {
        Self {
            name: name.into(),
            probe: ViewProbe {
                log,
                state: Arc::new(Mutex::new(Value::Null)),
                context: Arc::new(Mutex::new(None)),
            },
            bindings: Vec::new(),
            fail_mount: false,
        }
    }

    pub fn with_bindings(mut self, bindings: Vec<ViewKeyBinding>) -> Self {
        self.bindings = bindings;
        self
    }

    /// Make every mount fail.
    pub fn failing_mount(mut self) -> Self {
        self.fail_mount = true;
        self
    }

    pub fn probe(&self) -> ViewProbe {
        self.probe.clone()
    }

    fn record(&self, what: &str) {
        self.probe.log.push(format!("{}:{}", self.name, what));
    }
}

#[async_trait]
impl View for RecordingView {
    async fn mount(&mut self, ctx: ViewContext) -> Result<(), ViewError> {
        if self.fail_mount {
            return Err(format!("{} refused to mount", self.name).into());
        }
        self.record("mount");
        *lock(&self.probe.context) = Some(ctx);
        Ok(())
    }

    async fn unmount(&mut self) -> Result<(), ViewError> {
        self.record("unmount");
        Ok(())
    }

    fn resize(&mut self, width: u16, height: u16) {
        self.record(&format!("resize {}x{}", width, height));
    }

    fn save_state(&self) -> Value {
        self.record("save");
        self.probe.state()
    }

    fn restore_state(&mut self, state: Value) {
        self.record("restore");
        self.probe.set_state(state);
    }

    fn render(&mut self, frame: &mut Frame, area: Rect) {
        frame.render_widget(Paragraph::new(self.name.as_str()), area);
    }

    fn key_bindings(&self) -> Vec<ViewKeyBinding> {
        self.bindings.clone()
    }
}

/// Bus subscriber that keeps every message it receives.
#[derive(Debug, Clone, Default)]
pub struct BusRecorder {
    messages: Arc<Mutex<Vec<BusMessage>>>,
}

impl BusRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handler(&self) -> Handler<BusMessage> {
        let messages = self.messages.clone();
        Handler::new(move |message: &BusMessage| {
            lock(&messages).push(message.clone());
            Ok(())
        })
    }

    /// Subscribe to every message on `bus`.
    pub fn attach(&self, bus: &EventBus, name: &str) -> SubscriberId {
        bus.subscribe(name, self.handler(), None)
    }

    pub fn messages(&self) -> Vec<BusMessage> {
        lock(&self.messages).clone()
    }

    /// Message types in delivery order.
    pub fn types(&self) -> Vec<String> {
        lock(&self.messages)
            .iter()
            .map(|m| m.message_type.clone())
            .collect()
    }

    pub fn drain(&self) -> Vec<BusMessage> {
        std::mem::take(&mut *lock(&self.messages))
    }

    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Renders into a ratatui [`TestBackend`].
pub struct RenderHarness {
    terminal: Terminal<TestBackend>,
}

impl RenderHarness {
    /// # Panics
    ///
    /// Panics if the test terminal cannot be created.
    pub fn new(width: u16, height: u16) -> Self {
        let terminal = Terminal::new(TestBackend::new(width, height))
            .unwrap_or_else(|e| panic!("Cannot create test terminal: {}", e));
        Self { terminal }
    }

    /// Draw one frame and return the resulting buffer.
    pub fn render<F>(&mut self, render: F) -> &Buffer
    where
        F: FnOnce(&mut Frame),
    {
        self.terminal
            .draw(render)
            .unwrap_or_else(|e| panic!("Test render failed: {}", e));
        self.terminal.backend().buffer()
    }

    /// Draw one frame and return its text, one line per row.
    pub fn render_to_string_plain<F>(&mut self, render: F) -> String
    where
        F: FnOnce(&mut Frame),
    {
        buffer_to_string_plain(self.render(render))
    }
}

/// Buffer text without styling, rows joined by newlines.
pub fn buffer_to_string_plain(buffer: &Buffer) -> String {
    let width = usize::from(buffer.area.width).max(1);
    buffer
        .content()
        .chunks(width)
        .map(|row| row.iter().map(|cell| cell.symbol()).collect::<String>())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Pause tokio time for the current runtime.
#[cfg(feature = "testing-time")]
pub fn pause_time() {
    tokio::time::pause();
}

/// Resume tokio time for the current runtime.
#[cfg(feature = "testing-time")]
pub fn resume_time() {
    tokio::time::resume();
}

/// Advance paused tokio time.
#[cfg(feature = "testing-time")]
pub async fn advance_time(duration: std::time::Duration) {
    tokio::time::advance(duration).await;
}

/// Assert that an event matching a pattern was emitted.
///
/// # Example
///
/// ```ignore
/// let events = pipeline.feed(b"\x03");
/// assert_emitted!(events, InputEvent::Signal(SignalKind::Interrupt));
/// ```
#[macro_export]
macro_rules! assert_emitted {
    ($events:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            $events.iter().any(|e| matches!(e, $pattern $(if $guard)?)),
            "Expected event matching `{}` to be emitted, but got: {:?}",
            stringify!($pattern),
            $events
        );
    };
}

/// Assert that no event matching a pattern was emitted.
#[macro_export]
macro_rules! assert_not_emitted {
    ($events:expr, $pattern:pat $(if $guard:expr)?) => {
        assert!(
            !$events.iter().any(|e| matches!(e, $pattern $(if $guard)?)),
            "Expected event matching `{}` NOT to be emitted, but it was: {:?}",
            stringify!($pattern),
            $events
        );
    };
}

/// Find the first event matching a pattern.
#[macro_export]
macro_rules! find_emitted {
    ($events:expr, $pattern:pat $(if $guard:expr)?) => {
        $events.iter().find(|e| matches!(e, $pattern $(if $guard)?))
    };
}

/// Count events matching a pattern.
///
/// ```ignore
/// assert_eq!(count_emitted!(events, LoopEvent::Key(_)), 3);
/// ```
#[macro_export]
macro_rules! count_emitted {
    ($events:expr, $pattern:pat $(if $guard:expr)?) => {
        $events.iter().filter(|e| matches!(e, $pattern $(if $guard)?)).count()
    };
}
