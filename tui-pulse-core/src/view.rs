//! View abstraction and navigation types

use async_trait::async_trait;
use ratatui::layout::Rect;
use ratatui::Frame;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::ViewError;

/// A key binding a view advertises: pressing `key` yields `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewKeyBinding {
    /// Binding pattern, e.g. `"ctrl+s"`
    pub key: String,
    pub description: String,
    /// Action name handed back by `ViewManager::dispatch_key`
    pub action: String,
}

impl ViewKeyBinding {
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            action: action.into(),
        }
    }
}

/// A screen managed by the navigation system.
///
/// Views are owned by the `ViewManager` and addressed by id. A view that
/// wants to navigate keeps the [`ViewContext`] it receives on mount.
#[async_trait]
pub trait View: Send {
    /// Called when the view becomes current.
    async fn mount(&mut self, ctx: ViewContext) -> Result<(), ViewError> {
        let _ = ctx;
        Ok(())
    }

    /// Called when the view stops being current.
    async fn unmount(&mut self) -> Result<(), ViewError> {
        Ok(())
    }

    fn resize(&mut self, width: u16, height: u16) {
        let _ = (width, height);
    }

    /// Snapshot taken before the view is unmounted.
    fn save_state(&self) -> Value {
        Value::Null
    }

    /// Receives the last snapshot when the view is mounted again.
    fn restore_state(&mut self, state: Value) {
        let _ = state;
    }

    fn render(&mut self, frame: &mut Frame, area: Rect);

    fn key_bindings(&self) -> Vec<ViewKeyBinding> {
        Vec::new()
    }
}

/// Navigation a view asks for through its [`ViewContext`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationRequest {
    Push { view_id: String, can_go_back: bool },
    Pop,
    Replace(String),
    GoBack,
    SwitchTab(String),
    NextTab,
    PreviousTab,
}

/// Capability handed to a view on mount.
///
/// Requests are queued and applied by `ViewManager::process_requests`.
#[derive(Debug, Clone)]
pub struct ViewContext {
    view_id: String,
    width: u16,
    height: u16,
    requests: mpsc::UnboundedSender<NavigationRequest>,
}

impl ViewContext {
    pub fn new(
        view_id: impl Into<String>,
        width: u16,
        height: u16,
        requests: mpsc::UnboundedSender<NavigationRequest>,
    ) -> Self {
        Self {
            view_id: view_id.into(),
            width,
            height,
            requests,
        }
    }

    pub fn view_id(&self) -> &str {
        &self.view_id
    }

    /// Terminal size at mount time.
    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Queue a request. Returns `false` once the manager is gone.
    pub fn request(&self, request: NavigationRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    pub fn push(&self, view_id: impl Into<String>) -> bool {
        self.request(NavigationRequest::Push {
            view_id: view_id.into(),
            can_go_back: true,
        })
    }

    pub fn pop(&self) -> bool {
        self.request(NavigationRequest::Pop)
    }

    pub fn replace(&self, view_id: impl Into<String>) -> bool {
        self.request(NavigationRequest::Replace(view_id.into()))
    }

    pub fn go_back(&self) -> bool {
        self.request(NavigationRequest::GoBack)
    }

    pub fn switch_tab(&self, view_id: impl Into<String>) -> bool {
        self.request(NavigationRequest::SwitchTab(view_id.into()))
    }
}

/// Which container decides the current view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutType {
    /// Top of the navigation stack
    #[default]
    Single,
    /// Top two stack views side by side
    SplitVertical,
    /// Top two stack views one above the other
    SplitHorizontal,
    /// The active tab
    Tabbed,
}

impl LayoutType {
    pub fn is_tabbed(self) -> bool {
        self == LayoutType::Tabbed
    }

    pub fn is_split(self) -> bool {
        matches!(self, LayoutType::SplitVertical | LayoutType::SplitHorizontal)
    }
}

/// One level of the navigation stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NavigationEntry {
    pub view_id: String,
    /// Snapshot captured when another view was pushed over this one
    pub state: Option<Value>,
    /// Whether `go_back` may leave this entry
    pub can_go_back: bool,
}

impl NavigationEntry {
    pub fn new(view_id: impl Into<String>, can_go_back: bool) -> Self {
        Self {
            view_id: view_id.into(),
            state: None,
            can_go_back,
        }
    }
}

/// A tab referencing a registered view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tab {
    pub view_id: String,
    pub title: String,
    pub is_active: bool,
}
