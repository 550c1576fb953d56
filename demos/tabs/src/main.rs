//! Tabs - tui-pulse navigation demo
//!
//! Three tabs backed by views, a detail screen pushed over them, key
//! bindings from a JSON keymap and an activity tab fed by the event bus.
//!
//! Keys: tab/l = next tab, shift+tab/h = previous tab, j/k = move, enter = open,
//! escape = back, q = quit
//!
//! Usage: `tabs [config.json]`. Logs go to `tabs.log` (filter with `RUST_LOG`).

use std::fs::File;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use crossterm::{
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Terminal,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tui_pulse::prelude::*;
use tui_pulse::{ConfigError, NavigationError, RuntimeError};

const ACTION_MESSAGE: &str = "view.action";
const HELP_TEXT: &str = "tab/h/l: tabs  j/k: move  enter: open  esc: back  q: quit";

// ============================================================================
// Views
// ============================================================================

/// Selection and navigation capability shared with the view's bus subscriber.
#[derive(Default)]
struct ListShared {
    selected: AtomicUsize,
    context: Mutex<Option<ViewContext>>,
}

/// A selectable list. Actions arrive as bus messages targeted at the view id.
struct ListView {
    title: String,
    items: Vec<String>,
    shared: Arc<ListShared>,
}

impl ListView {
    fn new(id: &str, title: &str, items: &[&str], bus: &EventBus, subject: Subject) -> Self {
        let shared = Arc::new(ListShared::default());
        let items: Vec<String> = items.iter().map(|s| s.to_string()).collect();

        let handler_shared = shared.clone();
        let handler_items = items.clone();
        bus.subscribe(
            id,
            Handler::new(move |message: &BusMessage| {
                let len = handler_items.len();
                let current = handler_shared.selected.load(Ordering::Relaxed);
                match message.data["action"].as_str() {
                    Some("down") if len > 0 => {
                        handler_shared
                            .selected
                            .store((current + 1) % len, Ordering::Relaxed);
                    }
                    Some("up") if len > 0 => {
                        handler_shared
                            .selected
                            .store((current + len - 1) % len, Ordering::Relaxed);
                    }
                    Some("open") => {
                        if let Some(item) = handler_items.get(current) {
                            subject.set(item);
                        }
                        let context = handler_shared
                            .context
                            .lock()
                            .map_err(|e| e.to_string())?;
                        if let Some(ctx) = context.as_ref() {
                            ctx.push("detail");
                        }
                    }
                    _ => {}
                }
                Ok(())
            }),
            Some(message_filter(|m| m.message_type == ACTION_MESSAGE)),
        );

        Self {
            title: title.to_string(),
            items,
            shared,
        }
    }
}

#[async_trait]
impl View for ListView {
    async fn mount(&mut self, ctx: ViewContext) -> Result<(), ViewError> {
        *self.shared.context.lock().map_err(|e| e.to_string())? = Some(ctx);
        Ok(())
    }

    async fn unmount(&mut self) -> Result<(), ViewError> {
        *self.shared.context.lock().map_err(|e| e.to_string())? = None;
        Ok(())
    }

    fn save_state(&self) -> Value {
        json!({ "selected": self.shared.selected.load(Ordering::Relaxed) })
    }

    fn restore_state(&mut self, state: Value) {
        if let Some(selected) = state["selected"].as_u64() {
            let selected = usize::try_from(selected).unwrap_or(0);
            self.shared.selected.store(selected, Ordering::Relaxed);
        }
    }

    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = self
            .items
            .iter()
            .map(|i| ListItem::new(i.as_str()))
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .title(format!(" {} ", self.title))
                    .borders(Borders::ALL),
            )
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        let selected = self.shared.selected.load(Ordering::Relaxed);
        let mut state = ListState::default().with_selected(Some(selected));
        frame.render_stateful_widget(list, area, &mut state);
    }

    fn key_bindings(&self) -> Vec<ViewKeyBinding> {
        vec![
            ViewKeyBinding::new("j", "Move down", "down"),
            ViewKeyBinding::new("down", "Move down", "down"),
            ViewKeyBinding::new("k", "Move up", "up"),
            ViewKeyBinding::new("up", "Move up", "up"),
            ViewKeyBinding::new("enter", "Open", "open"),
        ]
    }
}

/// The item a detail screen shows.
#[derive(Clone, Default)]
struct Subject(Arc<Mutex<String>>);

impl Subject {
    fn set(&self, value: &str) {
        if let Ok(mut subject) = self.0.lock() {
            *subject = value.to_string();
        }
    }

    fn get(&self) -> String {
        self.0.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

struct DetailView {
    subject: Subject,
    size: (u16, u16),
}

#[async_trait]
impl View for DetailView {
    async fn mount(&mut self, ctx: ViewContext) -> Result<(), ViewError> {
        self.size = ctx.size();
        Ok(())
    }

    fn resize(&mut self, width: u16, height: u16) {
        self.size = (width, height);
    }

    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let text = format!(
            "{}\n\nterminal: {}x{}\n\nescape: back",
            self.subject.get(),
            self.size.0,
            self.size.1
        );
        let block = Block::default()
            .title(" Detail ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan));
        frame.render_widget(Paragraph::new(text).block(block), area);
    }
}

/// Most recent bus traffic.
struct ActivityView {
    bus: Arc<EventBus>,
}

#[async_trait]
impl View for ActivityView {
    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let history = self.bus.message_history(&HistoryFilter {
            limit: Some(usize::from(area.height.saturating_sub(2))),
            ..Default::default()
        });
        let items: Vec<ListItem> = history
            .iter()
            .rev()
            .map(|m| {
                ListItem::new(format!(
                    "{:<18} {:<10} {}",
                    m.message_type, m.source, m.data
                ))
            })
            .collect();
        let block = Block::default().title(" Activity ").borders(Borders::ALL);
        frame.render_widget(List::new(items).block(block), area);
    }
}

// ============================================================================
// Application
// ============================================================================

struct App {
    views: ViewManager,
    bus: Arc<EventBus>,
}

impl App {
    async fn new(bus: Arc<EventBus>, width: u16, height: u16) -> Result<Self, NavigationError> {
        let subject = Subject::default();
        let mut views = ViewManager::new();
        views.register_view(
            "inbox",
            ListView::new(
                "inbox",
                "Inbox",
                &["Build failed on main", "Review requested", "Weekly digest"],
                &bus,
                subject.clone(),
            ),
        )?;
        views.register_view(
            "archive",
            ListView::new(
                "archive",
                "Archive",
                &["Release notes", "Meeting minutes"],
                &bus,
                subject.clone(),
            ),
        )?;
        views.register_view("activity", ActivityView { bus: bus.clone() })?;
        views.register_view(
            "detail",
            DetailView {
                subject,
                size: (width, height),
            },
        )?;

        views.initialize(width, height);
        views.add_tab("inbox", "Inbox").await?;
        views.add_tab("archive", "Archive").await?;
        views.add_tab("activity", "Activity").await?;
        views.switch_tab("inbox").await?;
        Ok(Self { views, bus })
    }

    /// Keymap commands from the global bindings.
    async fn apply_command(
        &mut self,
        command: &str,
        app: &mut AppLoop,
    ) -> Result<(), NavigationError> {
        match command {
            "quit" => {
                app.stop();
            }
            "next_tab" if self.views.layout().is_tabbed() => self.views.next_tab().await?,
            "previous_tab" if self.views.layout().is_tabbed() => self.views.previous_tab().await?,
            "back" if !self.views.layout().is_tabbed() => {
                self.views.pop().await?;
            }
            _ => {}
        }
        self.sync_layout().await
    }

    /// Forward a key to the current view as a targeted bus message.
    fn dispatch_key(&self, key: &KeyEvent) {
        let Some(view) = self.views.current_view_id().map(str::to_string) else {
            return;
        };
        if let Some(action) = self.views.dispatch_key(key) {
            self.bus.publish(
                ACTION_MESSAGE,
                json!({ "action": action }),
                PublishOptions::new().source("app").target(view),
            );
        }
    }

    /// Screens pushed on the stack cover the tabs until popped.
    async fn sync_layout(&mut self) -> Result<(), NavigationError> {
        let covered = !self.views.stack().is_empty();
        match (covered, self.views.layout()) {
            (true, LayoutType::Tabbed) => self.views.set_layout(LayoutType::Single).await,
            (false, LayoutType::Single) => self.views.set_layout(LayoutType::Tabbed).await,
            _ => Ok(()),
        }
    }
}

fn default_keymap(config: &mut RuntimeConfig) {
    if !config.keymap.is_empty() {
        return;
    }
    let entries: [(&str, &[&str]); 4] = [
        ("quit", &["q"]),
        ("next_tab", &["tab", "l"]),
        ("previous_tab", &["h", "shift+tab"]),
        ("back", &["escape", "backspace"]),
    ];
    for (command, patterns) in entries {
        config.keymap.insert(
            command.to_string(),
            patterns.iter().map(|p| p.to_string()).collect(),
        );
    }
}

fn load_config() -> Result<RuntimeConfig, ConfigError> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => RuntimeConfig::from_path(path)?,
        None => RuntimeConfig::default(),
    };
    default_keymap(&mut config);
    config.validate()?;
    Ok(config)
}

fn init_logging() -> io::Result<()> {
    let file = File::create("tabs.log")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tui_pulse_core=debug,tabs=info")),
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), RuntimeError> {
    init_logging()?;
    let config = load_config()?;

    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, config).await;

    // Raw mode is released when the loop stops
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    config: RuntimeConfig,
) -> Result<(), RuntimeError> {
    let bus = Arc::new(EventBus::new(config.bus.clone()));
    let mut app = AppLoop::new(&config).with_bus(bus.clone());
    let caps = app.capabilities();
    info!(?caps, "Terminal capabilities");

    let mut state = App::new(bus.clone(), caps.width, caps.height)
        .await
        .map_err(io::Error::other)?;

    let (command_tx, mut command_rx) = mpsc::unbounded_channel::<String>();
    app.keyboard_mut().bind_keymap(&config.keymap, &command_tx);

    let (key_tx, mut key_rx) = mpsc::unbounded_channel::<KeyEvent>();
    app.on_input(move |event| {
        if let InputEvent::Key(key) = event {
            key_tx.send(key.clone()).map_err(|e| e.to_string())?;
        }
        Ok(())
    });
    app.on_error(|error| warn!(%error, "Loop error"));
    let mut loop_events = app.subscribe();

    let cancel = CancellationToken::new();
    let _input = spawn_input_reader(app.handle(), cancel.clone());
    let _signals = spawn_signal_listener(app.handle(), cancel.clone());

    app.start();
    while app.is_running() {
        match app.next_tick().await {
            Tick::Frame => {
                let views = &mut state.views;
                app.frame_with(|_| {
                    terminal
                        .draw(|frame| {
                            let area = frame.area();
                            let [body, help] =
                                Layout::vertical([Constraint::Min(0), Constraint::Length(1)])
                                    .areas(area);
                            views.render(frame, body);
                            frame.render_widget(
                                Paragraph::new(HELP_TEXT)
                                    .style(Style::default().fg(Color::DarkGray)),
                                help,
                            );
                        })
                        .map(|_| ())
                        .map_err(Into::into)
                });
            }
            Tick::Command(command) => app.apply(command),
        }

        while let Ok(event) = loop_events.try_recv() {
            if let LoopEvent::Resize { width, height } = event {
                state.views.resize(width, height);
            }
        }
        while let Ok(key) = key_rx.try_recv() {
            state.dispatch_key(&key);
        }
        while let Ok(command) = command_rx.try_recv() {
            if let Err(error) = state.apply_command(&command, &mut app).await {
                warn!(%error, command = %command, "Command failed");
            }
        }
        if let Err(error) = state.views.process_requests().await {
            warn!(%error, "Navigation request failed");
        }
        if let Err(error) = state.sync_layout().await {
            warn!(%error, "Layout change failed");
        }
    }

    cancel.cancel();
    info!(metrics = ?app.metrics(), "Demo finished");
    Ok(())
}
