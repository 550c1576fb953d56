//! tui-pulse: a runtime engine for terminal applications
//!
//! Raw terminal input is decoded into key events and dispatched to
//! prioritized key bindings, components talk through a prioritized event
//! bus, a frame-paced loop drives rendering, and a view manager handles
//! navigation stacks, tabs and layouts.
//!
//! # Example
//! ```ignore
//! use tui_pulse::prelude::*;
//!
//! let config = RuntimeConfig::from_path("pulse.json")?;
//! let bus = Arc::new(EventBus::new(config.bus.clone()));
//! let mut app = AppLoop::new(&config).with_bus(bus.clone());
//!
//! let tasks = bus.channel("tasks");
//! tasks.subscribe(Handler::new(|msg| { println!("{:?}", msg.data); Ok(()) }), None);
//!
//! app.run().await;
//! ```

// Re-export everything from core
pub use tui_pulse_core::*;

/// Prelude for convenient imports
pub mod prelude {
    // Input
    pub use tui_pulse_core::{
        format_key_for_display, BindingOptions, Handler, InputEvent, KeyBindingRegistry,
        KeyEvent, KeyboardPipeline, Modifiers, SignalKind,
    };

    // Event bus
    pub use tui_pulse_core::{
        message_filter, BusConfig, BusMessage, Channel, EventBus, HistoryFilter, PublishOptions,
    };

    // Application loop
    pub use tui_pulse_core::{
        spawn_input_reader, spawn_signal_listener, AppLoop, LoopCommand, LoopEvent, LoopHandle,
        TerminalCapabilities, Tick,
    };

    // Navigation
    pub use tui_pulse_core::{LayoutType, View, ViewContext, ViewKeyBinding, ViewManager};

    // Config and errors
    pub use tui_pulse_core::{HandlerResult, LoopError, NavigationError, RuntimeConfig, ViewError};

    // Ratatui re-exports
    pub use tui_pulse_core::{Frame, Rect};
}
