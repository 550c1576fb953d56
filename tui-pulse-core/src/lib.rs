//! Core runtime for tui-pulse
//!
//! This crate provides the building blocks of a terminal application runtime:
//!
//! - **Sequence decoding**: raw terminal bytes to keys ([`sequence`])
//! - **Key bindings**: pattern-based registry with priorities ([`keybindings`])
//! - **Keyboard pipeline**: chunked input, tail buffering, binding dispatch ([`keyboard`])
//! - **Event bus**: prioritized pub/sub with TTL, batching and history ([`bus`])
//! - **Application loop**: frame pacing, metrics, signals ([`runtime`])
//! - **Navigation**: view stack, tabs and layouts ([`navigation`], [`view`])
//!
//! # Basic Example
//!
//! ```ignore
//! use tui_pulse_core::prelude::*;
//!
//! let config = RuntimeConfig::default();
//! let bus = Arc::new(EventBus::new(config.bus.clone()));
//! let mut app = AppLoop::new(&config).with_bus(bus.clone());
//!
//! app.keyboard_mut().registry_mut().bind(
//!     "ctrl+s",
//!     Handler::new(|_| { save(); Ok(()) }),
//!     BindingOptions::default().with_description("Save"),
//! );
//!
//! app.on_render(|_frame| Ok(()));
//! app.run().await;
//! ```
//!
//! # Views
//!
//! Views implement [`View`] and are owned by a [`ViewManager`]. A view that
//! needs to navigate keeps the [`ViewContext`] it is given on mount and
//! queues [`NavigationRequest`]s through it; the application applies them
//! with [`ViewManager::process_requests`].
//!
//! ```ignore
//! let mut views = ViewManager::new();
//! views.register_view("home", HomeView::default())?;
//! views.register_view("logs", LogsView::default())?;
//! views.initialize(width, height);
//! views.add_tab("home", "Home").await?;
//! views.add_tab("logs", "Logs").await?;
//! views.next_tab().await?;
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod keybindings;
pub mod keyboard;
pub mod navigation;
pub mod runtime;
pub mod sequence;
pub mod terminal;
pub mod testing;
pub mod view;

// Event exports
pub use event::{InputEvent, KeyEvent, Modifiers, SignalKind};
pub use handler::Handler;

// Decoder and keyboard exports
pub use keybindings::{
    format_key_for_display, matches_pattern, parse_key_pattern, BindingId, BindingOptions,
    KeyBinding, KeyBindingRegistry, KeyPattern,
};
pub use keyboard::{ErrorSink, KeyboardPipeline, DEFAULT_ESCAPE_TIMEOUT};
pub use sequence::{
    control_character, csi_length, decode, is_partial_sequence, ControlCharacter, Decoded,
    ParsedSequence,
};

// Bus exports
pub use bus::{
    message_filter, BusConfig, BusMessage, BusStats, Channel, EventBus, HistoryFilter,
    MessageFilter, MessageId, PublishOptions, SubscriberId, SubscriberInfo,
};

// Loop exports
pub use runtime::{
    AppLoop, LoopCommand, LoopEvent, LoopHandle, LoopState, PerformanceMetrics, Tick,
};
pub use terminal::{spawn_input_reader, spawn_signal_listener, RawModeGuard, TerminalCapabilities};

// Navigation exports
pub use navigation::ViewManager;
pub use view::{
    LayoutType, NavigationEntry, NavigationRequest, Tab, View, ViewContext, ViewKeyBinding,
};

// Config and error exports
pub use config::RuntimeConfig;
pub use error::{
    ConfigError, HandlerError, HandlerResult, LoopError, NavigationError, RuntimeError, ViewError,
};

// Re-export ratatui types for convenience
pub use ratatui::{layout::Rect, Frame};

// Testing exports
pub use testing::{
    alt_key, buffer_to_string_plain, char_key, ctrl_key, key, keys, BusRecorder, RecordingView,
    RenderHarness, ViewLog, ViewProbe,
};

#[cfg(feature = "testing-time")]
pub use testing::{advance_time, pause_time, resume_time};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::bus::{
        message_filter, BusConfig, BusMessage, Channel, EventBus, HistoryFilter, PublishOptions,
    };
    pub use crate::config::RuntimeConfig;
    pub use crate::error::{HandlerResult, LoopError, NavigationError, ViewError};
    pub use crate::event::{InputEvent, KeyEvent, Modifiers, SignalKind};
    pub use crate::handler::Handler;
    pub use crate::keybindings::{format_key_for_display, BindingOptions, KeyBindingRegistry};
    pub use crate::keyboard::KeyboardPipeline;
    pub use crate::navigation::ViewManager;
    pub use crate::runtime::{AppLoop, LoopCommand, LoopEvent, LoopHandle, Tick};
    pub use crate::terminal::{spawn_input_reader, spawn_signal_listener, TerminalCapabilities};
    pub use crate::view::{LayoutType, View, ViewContext, ViewKeyBinding};

    // Re-export ratatui types
    pub use ratatui::{layout::Rect, Frame};
}
