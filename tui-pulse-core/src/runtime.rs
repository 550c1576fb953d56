//! Frame-paced application loop
//!
//! The loop owns the keyboard pipeline and drives three things: frames at
//! `1 / target_fps` intervals, input bytes forwarded through a
//! [`LoopHandle`], and host signals. Everything it observes is reported as
//! a [`LoopEvent`] to subscribers and, when attached, to an [`EventBus`].
//!
//! ```ignore
//! let mut app = AppLoop::new(&RuntimeConfig::default());
//! app.on_render(|frame| { draw(frame); Ok(()) });
//! let cancel = CancellationToken::new();
//! spawn_input_reader(app.handle(), cancel.clone());
//! app.run().await;
//! cancel.cancel();
//! ```

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, PublishOptions};
use crate::config::{clamp_fps, RuntimeConfig};
use crate::error::{panic_message, HandlerResult, LoopError};
use crate::event::{InputEvent, KeyEvent, SignalKind};
use crate::keyboard::{ErrorSink, KeyboardPipeline};
use crate::terminal::{RawModeGuard, TerminalCapabilities};

/// Bus source used for loop notifications.
pub const LOOP_SOURCE: &str = "app-loop";

/// Time between frames at `fps` (after clamping).
pub fn frame_interval(fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(clamp_fps(fps)))
}

/// Read-only snapshot of the loop's state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopState {
    pub running: bool,
    pub frame_count: u64,
    /// Start of the most recent frame
    pub last_frame_time: Option<Instant>,
    pub target_fps: u32,
    /// Derived from the time between the last two frames
    pub actual_fps: f64,
}

/// Frame timing counters. Accumulate until [`reset`](Self::reset).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub total_frames: u64,
    pub total_render_time: Duration,
    pub average_frame_time: Duration,
    pub max_frame_time: Duration,
    /// `Duration::MAX` until the first frame is recorded
    pub min_frame_time: Duration,
    /// Frames whose render time exceeded the frame interval
    pub dropped_frames: u64,
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self {
            total_frames: 0,
            total_render_time: Duration::ZERO,
            average_frame_time: Duration::ZERO,
            max_frame_time: Duration::ZERO,
            min_frame_time: Duration::MAX,
            dropped_frames: 0,
        }
    }
}

impl PerformanceMetrics {
    /// Record one frame. Returns whether it counts as dropped.
    pub fn record_frame(&mut self, render_time: Duration, interval: Duration) -> bool {
        self.total_frames += 1;
        self.total_render_time += render_time;
        self.max_frame_time = self.max_frame_time.max(render_time);
        self.min_frame_time = self.min_frame_time.min(render_time);
        self.average_frame_time = self.total_render_time.div_f64(self.total_frames as f64);

        let dropped = render_time > interval;
        if dropped {
            self.dropped_frames += 1;
        }
        dropped
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Notification emitted by the loop.
#[derive(Debug, Clone)]
pub enum LoopEvent {
    Started,
    Stopped,
    PreRender { frame: u64 },
    PostRender { frame: u64, render_time: Duration },
    Key(KeyEvent),
    Signal(SignalKind),
    Resize { width: u16, height: u16 },
    Error(Arc<LoopError>),
}

impl LoopEvent {
    /// Bus message type for this notification.
    pub fn message_type(&self) -> &'static str {
        match self {
            LoopEvent::Started => "loop.started",
            LoopEvent::Stopped => "loop.stopped",
            LoopEvent::PreRender { .. } => "loop.pre_render",
            LoopEvent::PostRender { .. } => "loop.post_render",
            LoopEvent::Key(_) => "loop.key",
            LoopEvent::Signal(_) => "loop.signal",
            LoopEvent::Resize { .. } => "loop.resize",
            LoopEvent::Error(_) => "loop.error",
        }
    }

    pub fn payload(&self) -> Value {
        match self {
            LoopEvent::Started | LoopEvent::Stopped => Value::Null,
            LoopEvent::PreRender { frame } => json!({ "frame": frame }),
            LoopEvent::PostRender { frame, render_time } => json!({
                "frame": frame,
                "render_time_us": render_time.as_micros() as u64,
            }),
            LoopEvent::Key(key) => json!({
                "key": key.key,
                "pattern": key.to_pattern(),
            }),
            LoopEvent::Signal(signal) => json!({ "signal": signal }),
            LoopEvent::Resize { width, height } => json!({ "width": width, "height": height }),
            LoopEvent::Error(error) => json!({ "error": error.to_string() }),
        }
    }

    fn is_frame(&self) -> bool {
        matches!(self, LoopEvent::PreRender { .. } | LoopEvent::PostRender { .. })
    }
}

/// Work sent to the loop from other tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopCommand {
    Input(Vec<u8>),
    Signal(SignalKind),
    Resize { width: u16, height: u16 },
    SetTargetFps(u32),
    /// A failure in a background task
    Error(String),
    Stop,
}

/// Cloneable control surface for a running [`AppLoop`].
///
/// Every method returns `false` once the loop has been dropped.
#[derive(Debug, Clone)]
pub struct LoopHandle {
    tx: mpsc::UnboundedSender<LoopCommand>,
}

impl LoopHandle {
    pub fn send(&self, command: LoopCommand) -> bool {
        self.tx.send(command).is_ok()
    }

    pub fn send_input(&self, bytes: &[u8]) -> bool {
        self.send(LoopCommand::Input(bytes.to_vec()))
    }

    pub fn signal(&self, kind: SignalKind) -> bool {
        self.send(LoopCommand::Signal(kind))
    }

    pub fn resize(&self, width: u16, height: u16) -> bool {
        self.send(LoopCommand::Resize { width, height })
    }

    pub fn set_target_fps(&self, fps: u32) -> bool {
        self.send(LoopCommand::SetTargetFps(fps))
    }

    pub fn report_error(&self, message: String) -> bool {
        self.send(LoopCommand::Error(message))
    }

    pub fn stop(&self) -> bool {
        self.send(LoopCommand::Stop)
    }
}

/// What woke the loop up.
#[derive(Debug)]
pub enum Tick {
    /// The next frame is due
    Frame,
    Command(LoopCommand),
}

type RenderCallback = Box<dyn FnMut(u64) -> HandlerResult + Send>;
type InputCallback = Box<dyn FnMut(&InputEvent) -> HandlerResult + Send>;
type ResizeCallback = Box<dyn FnMut(u16, u16) + Send>;
type ErrorCallback = Box<dyn FnMut(&LoopError) + Send>;

/// Frame-paced application loop.
pub struct AppLoop {
    running: bool,
    frame_count: u64,
    last_frame_time: Option<Instant>,
    target_fps: u32,
    actual_fps: f64,
    frame_interval: Duration,
    next_frame_at: Instant,
    metrics: PerformanceMetrics,
    keyboard: KeyboardPipeline,
    capabilities: TerminalCapabilities,
    startup_error: Option<LoopError>,
    raw_mode: bool,
    raw_guard: Option<RawModeGuard>,
    on_render: Option<RenderCallback>,
    on_input: Option<InputCallback>,
    on_resize: Option<ResizeCallback>,
    on_error: Option<ErrorCallback>,
    listeners: Vec<mpsc::UnboundedSender<LoopEvent>>,
    bus: Option<Arc<EventBus>>,
    command_tx: mpsc::UnboundedSender<LoopCommand>,
    command_rx: mpsc::UnboundedReceiver<LoopCommand>,
}

impl std::fmt::Debug for AppLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppLoop")
            .field("state", &self.state())
            .field("metrics", &self.metrics)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl AppLoop {
    /// Create a loop for the current terminal.
    ///
    /// Capability detection failures fall back to safe defaults and are
    /// reported through the error path once the loop starts.
    pub fn new(config: &RuntimeConfig) -> Self {
        let (capabilities, startup_error) = TerminalCapabilities::detect_or_fallback();
        let mut app = Self::with_capabilities(config, capabilities);
        app.startup_error = startup_error;
        app
    }

    /// Create a loop with explicit capabilities, skipping detection.
    pub fn with_capabilities(config: &RuntimeConfig, capabilities: TerminalCapabilities) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let target_fps = config.effective_fps();

        let mut keyboard = KeyboardPipeline::with_escape_timeout(config.escape_timeout());
        let error_tx = command_tx.clone();
        keyboard.set_error_sink(ErrorSink::new(move |message| {
            let _ = error_tx.send(LoopCommand::Error(message));
        }));

        Self {
            running: false,
            frame_count: 0,
            last_frame_time: None,
            target_fps,
            actual_fps: 0.0,
            frame_interval: frame_interval(target_fps),
            next_frame_at: Instant::now(),
            metrics: PerformanceMetrics::default(),
            keyboard,
            capabilities,
            startup_error: None,
            raw_mode: config.raw_mode,
            raw_guard: None,
            on_render: None,
            on_input: None,
            on_resize: None,
            on_error: None,
            listeners: Vec::new(),
            bus: None,
            command_tx,
            command_rx,
        }
    }

    /// Also publish notifications (except per-frame ones) to `bus`.
    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn on_render<F>(&mut self, f: F)
    where
        F: FnMut(u64) -> HandlerResult + Send + 'static,
    {
        self.on_render = Some(Box::new(f));
    }

    pub fn on_input<F>(&mut self, f: F)
    where
        F: FnMut(&InputEvent) -> HandlerResult + Send + 'static,
    {
        self.on_input = Some(Box::new(f));
    }

    pub fn on_resize<F>(&mut self, f: F)
    where
        F: FnMut(u16, u16) + Send + 'static,
    {
        self.on_resize = Some(Box::new(f));
    }

    pub fn on_error<F>(&mut self, f: F)
    where
        F: FnMut(&LoopError) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
    }

    /// Receive every notification from now on.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<LoopEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.push(tx);
        rx
    }

    pub fn handle(&self) -> LoopHandle {
        LoopHandle {
            tx: self.command_tx.clone(),
        }
    }

    pub fn keyboard(&self) -> &KeyboardPipeline {
        &self.keyboard
    }

    pub fn keyboard_mut(&mut self) -> &mut KeyboardPipeline {
        &mut self.keyboard
    }

    pub fn capabilities(&self) -> TerminalCapabilities {
        self.capabilities
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn state(&self) -> LoopState {
        LoopState {
            running: self.running,
            frame_count: self.frame_count,
            last_frame_time: self.last_frame_time,
            target_fps: self.target_fps,
            actual_fps: self.actual_fps,
        }
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }

    /// Transition to running. Returns `false` if already running.
    pub fn start(&mut self) -> bool {
        if self.running {
            return false;
        }
        self.running = true;
        self.last_frame_time = None;
        self.next_frame_at = Instant::now();

        if let Some(error) = self.startup_error.take() {
            self.report_error(error);
        }
        if self.raw_mode && self.capabilities.is_tty {
            match RawModeGuard::enable() {
                Ok(guard) => self.raw_guard = Some(guard),
                Err(e) => self.report_error(LoopError::Capability(format!(
                    "cannot enable raw mode: {}",
                    e
                ))),
            }
        }

        info!(
            target_fps = self.target_fps,
            width = self.capabilities.width,
            height = self.capabilities.height,
            tty = self.capabilities.is_tty,
            "Application loop started"
        );
        self.emit(LoopEvent::Started);
        true
    }

    /// Transition to stopped. Returns `false` if already stopped.
    pub fn stop(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.running = false;
        self.raw_guard = None;
        info!(frames = self.frame_count, "Application loop stopped");
        self.emit(LoopEvent::Stopped);
        true
    }

    /// Change the frame rate (clamped to 1..=120). The new interval applies
    /// to the next scheduled frame.
    pub fn set_target_fps(&mut self, fps: u32) {
        self.target_fps = clamp_fps(fps);
        self.frame_interval = frame_interval(self.target_fps);
        if let Some(last) = self.last_frame_time {
            self.next_frame_at = last + self.frame_interval;
        }
        debug!(target_fps = self.target_fps, "Target FPS changed");
    }

    /// Run one frame with the registered render callback.
    pub fn render_frame(&mut self) {
        let mut callback = self.on_render.take();
        self.render_frame_with(|frame| match callback.as_mut() {
            Some(render) => render(frame),
            None => Ok(()),
        });
        if self.on_render.is_none() {
            self.on_render = callback;
        }
    }

    /// Run one frame with an ad-hoc render function instead of the
    /// registered callback. Failures and panics go to the error path.
    pub fn render_frame_with<F>(&mut self, render: F)
    where
        F: FnOnce(u64) -> HandlerResult,
    {
        let frame = self.frame_count + 1;
        let start = Instant::now();

        self.emit(LoopEvent::PreRender { frame });
        let result = catch_unwind(AssertUnwindSafe(|| render(frame)));
        let render_time = start.elapsed();

        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => self.report_error(LoopError::Render {
                frame,
                message: error.to_string(),
            }),
            Err(payload) => self.report_error(LoopError::RenderPanic {
                frame,
                message: panic_message(payload.as_ref()),
            }),
        }
        self.emit(LoopEvent::PostRender { frame, render_time });

        if self.metrics.record_frame(render_time, self.frame_interval) {
            debug!(
                frame,
                render_ms = render_time.as_secs_f64() * 1000.0,
                "Frame exceeded its interval"
            );
        }
        if let Some(previous) = self.last_frame_time {
            let elapsed = start.saturating_duration_since(previous).as_secs_f64();
            if elapsed > 0.0 {
                self.actual_fps = 1.0 / elapsed;
            }
        }
        self.last_frame_time = Some(start);
        self.frame_count = frame;
        self.next_frame_at = start + self.frame_interval;
    }

    /// Flush a timed-out ESC, then render a frame.
    pub fn frame(&mut self) {
        self.flush_input();
        self.render_frame();
    }

    /// Flush a timed-out ESC, then render with `render`.
    pub fn frame_with<F>(&mut self, render: F)
    where
        F: FnOnce(u64) -> HandlerResult,
    {
        self.flush_input();
        self.render_frame_with(render);
    }

    fn flush_input(&mut self) {
        let flushed = self.keyboard.flush_expired(Instant::now());
        self.route_input(&flushed);
    }

    /// Feed input bytes through the keyboard pipeline. Ignored while stopped.
    pub fn handle_input(&mut self, bytes: &[u8]) -> Vec<InputEvent> {
        if !self.running {
            debug!(bytes = bytes.len(), "Ignoring input while stopped");
            return Vec::new();
        }
        let events = self.keyboard.feed(bytes);
        self.route_input(&events);
        events
    }

    fn route_input(&mut self, events: &[InputEvent]) {
        for event in events {
            if let InputEvent::Key(key) = event {
                self.emit(LoopEvent::Key(key.clone()));
            }
            if let Some(callback) = self.on_input.as_mut() {
                let result = catch_unwind(AssertUnwindSafe(|| callback(event)));
                let failure = match result {
                    Ok(Ok(())) => None,
                    Ok(Err(error)) => Some(error.to_string()),
                    Err(payload) => Some(format!(
                        "input callback panicked: {}",
                        panic_message(payload.as_ref())
                    )),
                };
                if let Some(message) = failure {
                    self.report_error(LoopError::Task(message));
                }
            }
            if let InputEvent::Signal(signal) = event {
                self.handle_signal(*signal);
            }
        }
    }

    /// React to a signal. Interrupt and terminate stop the loop; resize
    /// re-reads the terminal size.
    pub fn handle_signal(&mut self, signal: SignalKind) {
        debug!(signal = signal.name(), "Handling signal");
        self.emit(LoopEvent::Signal(signal));
        match signal {
            SignalKind::Interrupt | SignalKind::Terminate => {
                self.stop();
            }
            SignalKind::Resize => {
                if self.capabilities.is_tty {
                    match self.capabilities.refresh_size() {
                        Ok((width, height)) => self.handle_resize(width, height),
                        Err(error) => self.report_error(error),
                    }
                } else {
                    let (width, height) = (self.capabilities.width, self.capabilities.height);
                    self.handle_resize(width, height);
                }
            }
            SignalKind::Suspend | SignalKind::Eof => {}
        }
    }

    pub fn handle_resize(&mut self, width: u16, height: u16) {
        self.capabilities.width = width;
        self.capabilities.height = height;
        self.emit(LoopEvent::Resize { width, height });
        if let Some(callback) = self.on_resize.as_mut() {
            callback(width, height);
        }
    }

    /// Route a failure to the error callback and notifications.
    pub fn report_error(&mut self, error: LoopError) {
        warn!(%error, "Application loop error");
        if let Some(callback) = self.on_error.as_mut() {
            callback(&error);
        }
        self.emit(LoopEvent::Error(Arc::new(error)));
    }

    pub fn apply(&mut self, command: LoopCommand) {
        match command {
            LoopCommand::Input(bytes) => {
                self.handle_input(&bytes);
            }
            LoopCommand::Signal(signal) => self.handle_signal(signal),
            LoopCommand::Resize { width, height } => self.handle_resize(width, height),
            LoopCommand::SetTargetFps(fps) => self.set_target_fps(fps),
            LoopCommand::Error(message) => self.report_error(LoopError::Task(message)),
            LoopCommand::Stop => {
                self.stop();
            }
        }
    }

    /// Wait until the next frame is due or a command arrives. Queued
    /// commands win over a due frame, so a stop is never followed by one
    /// more render.
    pub async fn next_tick(&mut self) -> Tick {
        let deadline = self.next_frame_at;
        tokio::select! {
            biased;
            Some(command) = self.command_rx.recv() => Tick::Command(command),
            _ = tokio::time::sleep_until(deadline) => Tick::Frame,
        }
    }

    /// Start and drive the loop with the registered callbacks until stopped.
    pub async fn run(&mut self) {
        self.start();
        while self.running {
            match self.next_tick().await {
                Tick::Frame => self.frame(),
                Tick::Command(command) => self.apply(command),
            }
        }
    }

    fn emit(&mut self, event: LoopEvent) {
        if let Some(bus) = &self.bus {
            if !event.is_frame() {
                bus.publish(
                    event.message_type(),
                    event.payload(),
                    PublishOptions::new().source(LOOP_SOURCE),
                );
            }
        }
        self.listeners.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::HistoryFilter;
    use crate::handler::Handler;
    use crate::keybindings::BindingOptions;
    use std::sync::Mutex;

    fn test_loop() -> AppLoop {
        AppLoop::with_capabilities(&RuntimeConfig::default(), TerminalCapabilities::fallback())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<LoopEvent>) -> Vec<LoopEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_start_stop_are_idempotent() {
        let mut app = test_loop();
        let mut rx = app.subscribe();

        assert!(app.start());
        assert!(!app.start());
        assert!(app.is_running());
        assert!(app.stop());
        assert!(!app.stop());

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], LoopEvent::Started));
        assert!(matches!(events[1], LoopEvent::Stopped));
    }

    #[test]
    fn test_target_fps_clamped_and_interval_recomputed() {
        let mut app = test_loop();
        assert_eq!(app.frame_interval(), Duration::from_nanos(16_666_666));

        app.set_target_fps(0);
        assert_eq!(app.state().target_fps, 1);
        assert_eq!(app.frame_interval(), Duration::from_secs(1));

        app.set_target_fps(1000);
        assert_eq!(app.state().target_fps, 120);
        assert_eq!(app.frame_interval(), Duration::from_nanos(8_333_333));
    }

    #[test]
    fn test_metrics_record_frame() {
        let mut metrics = PerformanceMetrics::default();
        assert_eq!(metrics.min_frame_time, Duration::MAX);

        let interval = Duration::from_millis(16);
        assert!(!metrics.record_frame(Duration::from_millis(4), interval));
        assert!(metrics.record_frame(Duration::from_millis(20), interval));
        assert!(!metrics.record_frame(Duration::from_millis(6), interval));

        assert_eq!(metrics.total_frames, 3);
        assert_eq!(metrics.dropped_frames, 1);
        assert_eq!(metrics.min_frame_time, Duration::from_millis(4));
        assert_eq!(metrics.max_frame_time, Duration::from_millis(20));
        assert_eq!(metrics.total_render_time, Duration::from_millis(30));
        assert_eq!(metrics.average_frame_time, Duration::from_millis(10));

        metrics.reset();
        assert_eq!(metrics, PerformanceMetrics::default());
    }

    #[test]
    fn test_slow_render_counts_one_dropped_frame() {
        let mut app = test_loop();
        app.on_render(|_| {
            std::thread::sleep(Duration::from_millis(25));
            Ok(())
        });
        app.render_frame();
        assert_eq!(app.metrics().dropped_frames, 1);

        app.on_render(|_| Ok(()));
        app.render_frame();
        assert_eq!(app.metrics().dropped_frames, 1);
        assert_eq!(app.metrics().total_frames, 2);
        assert_eq!(app.state().frame_count, 2);
    }

    #[test]
    fn test_render_failures_are_reported_not_propagated() {
        let mut app = test_loop();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        app.on_error(move |error| e.lock().unwrap().push(error.to_string()));
        let mut rx = app.subscribe();

        app.render_frame_with(|_| Err("no canvas".into()));
        app.render_frame_with(|frame| {
            assert!(frame > 5, "frame too early");
            Ok(())
        });
        app.render_frame();

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("no canvas"));
        assert!(errors[1].contains("frame too early"));
        assert_eq!(app.state().frame_count, 3);

        let events = drain(&mut rx);
        assert!(matches!(events[0], LoopEvent::PreRender { frame: 1 }));
        assert!(matches!(events[1], LoopEvent::Error(_)));
        assert!(matches!(events[2], LoopEvent::PostRender { frame: 1, .. }));
    }

    #[test]
    fn test_input_routed_to_callback_and_events() {
        let mut app = test_loop();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        app.on_input(move |event| {
            if let InputEvent::Key(key) = event {
                s.lock().unwrap().push(key.to_pattern());
            }
            Ok(())
        });

        assert!(app.handle_input(b"a").is_empty());

        let mut rx = app.subscribe();
        app.start();
        let events = app.handle_input(b"a\x1b[1;5A");
        assert_eq!(events.len(), 2);
        assert_eq!(*seen.lock().unwrap(), vec!["a", "ctrl+up"]);

        let keys = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, LoopEvent::Key(_)))
            .count();
        assert_eq!(keys, 2);
    }

    #[test]
    fn test_ctrl_c_stops_loop() {
        let mut app = test_loop();
        let mut rx = app.subscribe();
        app.start();

        app.handle_input(&[0x03]);
        assert!(!app.is_running());

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, LoopEvent::Signal(SignalKind::Interrupt))));
        assert!(matches!(events.last(), Some(LoopEvent::Stopped)));
    }

    #[test]
    fn test_signals() {
        let mut app = test_loop();
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let s = sizes.clone();
        app.on_resize(move |w, h| s.lock().unwrap().push((w, h)));
        app.start();

        app.handle_signal(SignalKind::Resize);
        app.apply(LoopCommand::Resize {
            width: 100,
            height: 30,
        });
        assert_eq!(*sizes.lock().unwrap(), vec![(80, 24), (100, 30)]);
        assert_eq!(app.capabilities().width, 100);

        app.handle_signal(SignalKind::Suspend);
        assert!(app.is_running());
        app.handle_signal(SignalKind::Terminate);
        assert!(!app.is_running());
    }

    #[test]
    fn test_input_callback_failure_is_isolated() {
        let mut app = test_loop();
        let errors = Arc::new(Mutex::new(0));
        let e = errors.clone();
        app.on_error(move |_| *e.lock().unwrap() += 1);
        app.on_input(|_| Err("bad input".into()));
        app.start();

        app.handle_input(b"xy");
        assert_eq!(*errors.lock().unwrap(), 2);
        assert!(app.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_stopped() {
        let mut app = test_loop();
        let frames = Arc::new(Mutex::new(0u64));
        let f = frames.clone();
        app.on_render(move |_| {
            *f.lock().unwrap() += 1;
            Ok(())
        });

        let handle = app.handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.stop();
        });
        app.run().await;

        let frames = *frames.lock().unwrap();
        assert!((6..=8).contains(&frames), "rendered {} frames", frames);
        assert!(!app.is_running());
        assert!(app.state().actual_fps > 50.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_escape_flushed_on_frame() {
        let mut app = test_loop();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        app.on_input(move |event| {
            if let InputEvent::Key(key) = event {
                s.lock().unwrap().push(key.key.clone());
            }
            Ok(())
        });
        app.start();

        app.handle_input(b"\x1b");
        app.frame();
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::advance(Duration::from_millis(60)).await;
        app.frame();
        assert_eq!(*seen.lock().unwrap(), vec!["escape"]);
    }

    #[tokio::test]
    async fn test_notifications_published_to_bus() {
        let bus = Arc::new(EventBus::default());
        let mut app = test_loop().with_bus(bus.clone());
        app.start();
        app.render_frame();
        app.handle_input(b"q");
        app.stop();

        let history = bus.message_history(&HistoryFilter {
            source: Some(LOOP_SOURCE.to_string()),
            ..HistoryFilter::default()
        });
        let types: Vec<&str> = history.iter().map(|m| m.message_type.as_str()).collect();
        assert_eq!(types, vec!["loop.started", "loop.key", "loop.stopped"]);
        assert_eq!(history[1].data["key"], "q");
    }

    #[tokio::test]
    async fn test_queued_stop_wins_over_due_frame() {
        for _ in 0..50 {
            let mut app = test_loop();
            app.start();
            assert!(app.handle().stop());

            let tick = app.next_tick().await;
            assert!(
                matches!(tick, Tick::Command(LoopCommand::Stop)),
                "got {:?}",
                tick
            );
        }
    }

    #[tokio::test]
    async fn test_failing_async_binding_reaches_error_path() {
        let mut app = test_loop();
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        app.on_error(move |error| e.lock().unwrap().push(error.to_string()));
        app.keyboard_mut().registry_mut().bind(
            "x",
            Handler::from_async(|_| async { Err("async boom".into()) }),
            BindingOptions::default(),
        );
        let mut rx = app.subscribe();
        app.start();

        app.handle_input(b"x");
        let command = app.command_rx.recv().await.expect("command channel open");
        app.apply(command);

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("async boom"), "{}", errors[0]);
        assert!(drain(&mut rx)
            .iter()
            .any(|e| matches!(e, LoopEvent::Error(_))));
        assert!(app.is_running());
    }

    #[test]
    fn test_handle_commands() {
        let mut app = test_loop();
        let handle = app.handle();
        app.start();

        assert!(handle.set_target_fps(30));
        assert!(handle.stop());
        while let Ok(command) = app.command_rx.try_recv() {
            app.apply(command);
        }
        assert_eq!(app.state().target_fps, 30);
        assert!(!app.is_running());
    }
}
