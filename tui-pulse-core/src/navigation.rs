//! View manager: navigation stack, tab list and layout
//!
//! The stack and the tab list are independent containers. [`LayoutType`]
//! decides which one names the current view: the active tab in
//! [`LayoutType::Tabbed`], the stack top otherwise.
//!
//! Every change of current view saves the outgoing view's state, unmounts
//! it, mounts the incoming view and restores whatever was saved for it.

use std::collections::HashMap;

use ratatui::layout::{Constraint, Layout, Rect};
use ratatui::style::{Modifier, Style};
use ratatui::widgets::Tabs;
use ratatui::Frame;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::NavigationError;
use crate::event::KeyEvent;
use crate::keybindings::matches_pattern;
use crate::terminal::{FALLBACK_HEIGHT, FALLBACK_WIDTH};
use crate::view::{
    LayoutType, NavigationEntry, NavigationRequest, Tab, View, ViewContext, ViewKeyBinding,
};

/// Owns registered views and decides which one is current.
pub struct ViewManager {
    views: HashMap<String, Box<dyn View>>,
    stack: Vec<NavigationEntry>,
    tabs: Vec<Tab>,
    active_tab: Option<String>,
    layout: LayoutType,
    saved_states: HashMap<String, Value>,
    initialized: bool,
    width: u16,
    height: u16,
    request_tx: mpsc::UnboundedSender<NavigationRequest>,
    request_rx: mpsc::UnboundedReceiver<NavigationRequest>,
}

impl std::fmt::Debug for ViewManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut views: Vec<&String> = self.views.keys().collect();
        views.sort();
        f.debug_struct("ViewManager")
            .field("views", &views)
            .field("stack", &self.stack)
            .field("tabs", &self.tabs)
            .field("layout", &self.layout)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

impl Default for ViewManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewManager {
    pub fn new() -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        Self {
            views: HashMap::new(),
            stack: Vec::new(),
            tabs: Vec::new(),
            active_tab: None,
            layout: LayoutType::Single,
            saved_states: HashMap::new(),
            initialized: false,
            width: FALLBACK_WIDTH,
            height: FALLBACK_HEIGHT,
            request_tx,
            request_rx,
        }
    }

    /// Enable navigation. Views may be registered before this.
    pub fn initialize(&mut self, width: u16, height: u16) {
        self.initialized = true;
        self.width = width;
        self.height = height;
        debug!(width, height, "View manager initialized");
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn register_view<V>(&mut self, id: impl Into<String>, view: V) -> Result<(), NavigationError>
    where
        V: View + 'static,
    {
        let id = id.into();
        if self.views.contains_key(&id) {
            return Err(NavigationError::DuplicateView(id));
        }
        debug!(view = %id, "View registered");
        self.views.insert(id, Box::new(view));
        Ok(())
    }

    pub fn has_view(&self, id: &str) -> bool {
        self.views.contains_key(id)
    }

    pub fn layout(&self) -> LayoutType {
        self.layout
    }

    pub fn stack(&self) -> &[NavigationEntry] {
        &self.stack
    }

    pub fn tabs(&self) -> &[Tab] {
        &self.tabs
    }

    pub fn active_tab(&self) -> Option<&str> {
        self.active_tab.as_deref()
    }

    /// Last state saved for `id` when it was switched away from.
    pub fn saved_state(&self, id: &str) -> Option<&Value> {
        self.saved_states.get(id)
    }

    pub fn size(&self) -> (u16, u16) {
        (self.width, self.height)
    }

    /// Sender for queuing requests from outside a view.
    pub fn requests(&self) -> mpsc::UnboundedSender<NavigationRequest> {
        self.request_tx.clone()
    }

    pub fn current_view_id(&self) -> Option<&str> {
        if self.layout.is_tabbed() {
            self.active_tab.as_deref()
        } else {
            self.stack.last().map(|e| e.view_id.as_str())
        }
    }

    /// Whether `go_back` would succeed.
    pub fn can_go_back(&self) -> bool {
        self.stack.len() > 1 && self.stack.last().is_some_and(|e| e.can_go_back)
    }

    fn ensure_initialized(&self) -> Result<(), NavigationError> {
        if self.initialized {
            Ok(())
        } else {
            Err(NavigationError::NotInitialized)
        }
    }

    fn ensure_view(&self, id: &str) -> Result<(), NavigationError> {
        self.ensure_initialized()?;
        if self.views.contains_key(id) {
            Ok(())
        } else {
            Err(NavigationError::UnknownView(id.to_string()))
        }
    }

    fn tab_index(&self, view_id: &str) -> Option<usize> {
        self.tabs.iter().position(|t| t.view_id == view_id)
    }

    fn stack_top(&self) -> Option<String> {
        self.stack.last().map(|e| e.view_id.clone())
    }

    async fn deactivate(&mut self, id: &str) -> Result<Value, NavigationError> {
        let view = self
            .views
            .get_mut(id)
            .ok_or_else(|| NavigationError::UnknownView(id.to_string()))?;
        let state = view.save_state();
        self.saved_states.insert(id.to_string(), state.clone());
        view.unmount()
            .await
            .map_err(|e| NavigationError::lifecycle(id, "unmount", e))?;
        debug!(view = id, "View unmounted");
        Ok(state)
    }

    async fn activate(&mut self, id: &str) -> Result<(), NavigationError> {
        let ctx = ViewContext::new(id, self.width, self.height, self.request_tx.clone());
        let restored = self.saved_states.get(id).cloned();
        let view = self
            .views
            .get_mut(id)
            .ok_or_else(|| NavigationError::UnknownView(id.to_string()))?;
        view.mount(ctx)
            .await
            .map_err(|e| NavigationError::lifecycle(id, "mount", e))?;
        if let Some(state) = restored {
            view.restore_state(state);
        }
        debug!(view = id, "View mounted");
        Ok(())
    }

    async fn transition(
        &mut self,
        from: Option<String>,
        to: Option<String>,
    ) -> Result<(), NavigationError> {
        if from == to {
            return Ok(());
        }
        if let Some(from) = &from {
            self.deactivate(from).await?;
        }
        if let Some(to) = &to {
            self.activate(to).await?;
        }
        Ok(())
    }

    /// Push a view onto the stack. `can_go_back: false` pins it so
    /// `go_back` refuses to leave it.
    pub async fn push(&mut self, view_id: &str, can_go_back: bool) -> Result<(), NavigationError> {
        self.ensure_view(view_id)?;
        let stack_is_current = !self.layout.is_tabbed();

        if stack_is_current {
            if let Some(top) = self.stack_top() {
                let state = self.deactivate(&top).await?;
                if let Some(entry) = self.stack.last_mut() {
                    entry.state = Some(state);
                }
            }
        }
        self.stack.push(NavigationEntry::new(view_id, can_go_back));
        if stack_is_current {
            self.activate(view_id).await?;
        }

        debug!(view = view_id, depth = self.stack.len(), "Pushed view");
        Ok(())
    }

    /// Pop the top view. Returns its id, or `None` on an empty stack.
    pub async fn pop(&mut self) -> Result<Option<String>, NavigationError> {
        self.ensure_initialized()?;
        let Some(top) = self.stack_top() else {
            return Ok(None);
        };
        let stack_is_current = !self.layout.is_tabbed();

        if stack_is_current {
            self.deactivate(&top).await?;
        }
        self.stack.pop();
        if stack_is_current {
            if let Some(next) = self.stack_top() {
                self.activate(&next).await?;
            }
        }

        debug!(view = %top, depth = self.stack.len(), "Popped view");
        Ok(Some(top))
    }

    /// Swap the top view for another. Pushes when the stack is empty.
    pub async fn replace(&mut self, view_id: &str) -> Result<(), NavigationError> {
        self.ensure_view(view_id)?;
        let Some(top) = self.stack_top() else {
            return self.push(view_id, true).await;
        };
        let stack_is_current = !self.layout.is_tabbed();

        if stack_is_current {
            self.deactivate(&top).await?;
        }
        if let Some(entry) = self.stack.last_mut() {
            let can_go_back = entry.can_go_back;
            *entry = NavigationEntry::new(view_id, can_go_back);
        }
        if stack_is_current {
            self.activate(view_id).await?;
        }
        Ok(())
    }

    /// Pop back to the previous view, honoring the top entry's `can_go_back`.
    pub async fn go_back(&mut self) -> Result<String, NavigationError> {
        self.ensure_initialized()?;
        if !self.can_go_back() {
            let id = self.stack_top().unwrap_or_else(|| "<none>".to_string());
            return Err(NavigationError::CannotGoBack(id));
        }
        self.pop()
            .await?
            .ok_or_else(|| NavigationError::CannotGoBack("<none>".to_string()))
    }

    fn set_active_tab(&mut self, view_id: Option<&str>) {
        for tab in &mut self.tabs {
            tab.is_active = Some(tab.view_id.as_str()) == view_id;
        }
        self.active_tab = view_id.map(str::to_string);
    }

    /// Add a tab for a registered view.
    ///
    /// The first tab becomes active and switches the layout to tabbed. Later
    /// tabs become active immediately only while the layout is tabbed.
    pub async fn add_tab(
        &mut self,
        view_id: &str,
        title: impl Into<String>,
    ) -> Result<(), NavigationError> {
        self.ensure_view(view_id)?;
        if self.tab_index(view_id).is_some() {
            return Err(NavigationError::DuplicateTab(view_id.to_string()));
        }
        self.tabs.push(Tab {
            view_id: view_id.to_string(),
            title: title.into(),
            is_active: false,
        });

        if self.tabs.len() == 1 {
            let from = self.current_view_id().map(str::to_string);
            self.layout = LayoutType::Tabbed;
            self.set_active_tab(Some(view_id));
            self.transition(from, Some(view_id.to_string())).await?;
        } else if self.layout.is_tabbed() {
            self.switch_tab(view_id).await?;
        }

        debug!(view = view_id, tabs = self.tabs.len(), "Tab added");
        Ok(())
    }

    /// Remove a tab. Removing the active tab activates its neighbour; removing
    /// the last tab clears the active tab and reverts to a single layout.
    pub async fn remove_tab(&mut self, view_id: &str) -> Result<(), NavigationError> {
        self.ensure_initialized()?;
        let index = self
            .tab_index(view_id)
            .ok_or_else(|| NavigationError::UnknownTab(view_id.to_string()))?;
        let was_active = self.active_tab.as_deref() == Some(view_id);
        let tabbed = self.layout.is_tabbed();

        if was_active && tabbed {
            self.deactivate(view_id).await?;
        }
        self.tabs.remove(index);

        if self.tabs.is_empty() {
            self.set_active_tab(None);
            self.layout = LayoutType::Single;
            if tabbed {
                if let Some(top) = self.stack_top() {
                    self.activate(&top).await?;
                }
            }
        } else if was_active {
            let next = index.min(self.tabs.len() - 1);
            let next_id = self.tabs[next].view_id.clone();
            self.set_active_tab(Some(next_id.as_str()));
            if tabbed {
                self.activate(&next_id).await?;
            }
        }

        debug!(view = view_id, tabs = self.tabs.len(), "Tab removed");
        Ok(())
    }

    /// Make the tab for `view_id` active.
    pub async fn switch_tab(&mut self, view_id: &str) -> Result<(), NavigationError> {
        self.ensure_initialized()?;
        if self.tab_index(view_id).is_none() {
            return Err(NavigationError::UnknownTab(view_id.to_string()));
        }
        if self.active_tab.as_deref() == Some(view_id) {
            return Ok(());
        }

        let tabbed = self.layout.is_tabbed();
        if tabbed {
            if let Some(from) = self.active_tab.clone() {
                self.deactivate(&from).await?;
            }
        }
        self.set_active_tab(Some(view_id));
        if tabbed {
            self.activate(view_id).await?;
        }

        debug!(view = view_id, "Switched tab");
        Ok(())
    }

    /// Activate the next tab, wrapping to the first.
    pub async fn next_tab(&mut self) -> Result<(), NavigationError> {
        self.step_tab(true).await
    }

    /// Activate the previous tab, wrapping to the last.
    pub async fn previous_tab(&mut self) -> Result<(), NavigationError> {
        self.step_tab(false).await
    }

    async fn step_tab(&mut self, forward: bool) -> Result<(), NavigationError> {
        self.ensure_initialized()?;
        if self.tabs.is_empty() {
            return Err(NavigationError::NoTabs);
        }
        let len = self.tabs.len();
        let current = self
            .active_tab
            .as_deref()
            .and_then(|id| self.tab_index(id))
            .unwrap_or(0);
        let target = if forward {
            (current + 1) % len
        } else {
            (current + len - 1) % len
        };
        let id = self.tabs[target].view_id.clone();
        self.switch_tab(&id).await
    }

    /// Change the layout, moving the current view between containers.
    pub async fn set_layout(&mut self, layout: LayoutType) -> Result<(), NavigationError> {
        self.ensure_initialized()?;
        let from = self.current_view_id().map(str::to_string);
        self.layout = layout;
        let to = self.current_view_id().map(str::to_string);
        self.transition(from, to).await
    }

    /// Views drawn by [`render`](Self::render), in drawing order.
    pub fn visible_views(&self) -> Vec<String> {
        if self.layout.is_split() {
            let start = self.stack.len().saturating_sub(2);
            self.stack[start..].iter().map(|e| e.view_id.clone()).collect()
        } else {
            self.current_view_id().map(str::to_string).into_iter().collect()
        }
    }

    /// Record the new size and tell every visible view.
    pub fn resize(&mut self, width: u16, height: u16) {
        self.width = width;
        self.height = height;
        for id in self.visible_views() {
            if let Some(view) = self.views.get_mut(&id) {
                view.resize(width, height);
            }
        }
    }

    /// Draw the visible views into `area`.
    pub fn render(&mut self, frame: &mut Frame, area: Rect) {
        let visible = self.visible_views();
        match self.layout {
            LayoutType::Tabbed => {
                let [bar, body] =
                    Layout::vertical([Constraint::Length(1), Constraint::Min(0)]).areas(area);
                self.render_tab_bar(frame, bar);
                if let Some(id) = visible.first() {
                    self.render_view(id, frame, body);
                }
            }
            LayoutType::SplitVertical | LayoutType::SplitHorizontal if visible.len() == 2 => {
                let halves = [Constraint::Percentage(50), Constraint::Percentage(50)];
                let layout = if self.layout == LayoutType::SplitVertical {
                    Layout::horizontal(halves)
                } else {
                    Layout::vertical(halves)
                };
                let [first, second] = layout.areas(area);
                self.render_view(&visible[0], frame, first);
                self.render_view(&visible[1], frame, second);
            }
            _ => {
                if let Some(id) = visible.last() {
                    self.render_view(id, frame, area);
                }
            }
        }
    }

    fn render_view(&mut self, id: &str, frame: &mut Frame, area: Rect) {
        if let Some(view) = self.views.get_mut(id) {
            view.render(frame, area);
        }
    }

    fn render_tab_bar(&self, frame: &mut Frame, area: Rect) {
        let titles: Vec<String> = self.tabs.iter().map(|t| t.title.clone()).collect();
        let selected = self
            .active_tab
            .as_deref()
            .and_then(|id| self.tab_index(id))
            .unwrap_or(0);
        let tabs = Tabs::new(titles)
            .select(selected)
            .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
        frame.render_widget(tabs, area);
    }

    /// Key bindings advertised by the current view.
    pub fn key_bindings(&self) -> Vec<ViewKeyBinding> {
        self.current_view_id()
            .and_then(|id| self.views.get(id))
            .map(|view| view.key_bindings())
            .unwrap_or_default()
    }

    /// Action name of the current view's first binding matching `event`.
    pub fn dispatch_key(&self, event: &KeyEvent) -> Option<String> {
        self.key_bindings()
            .into_iter()
            .find(|binding| matches_pattern(event, &binding.key))
            .map(|binding| binding.action)
    }

    /// Apply queued navigation requests in order. Stops at the first failure.
    pub async fn process_requests(&mut self) -> Result<usize, NavigationError> {
        let mut applied = 0;
        while let Ok(request) = self.request_rx.try_recv() {
            debug!(?request, "Applying navigation request");
            match request {
                NavigationRequest::Push {
                    view_id,
                    can_go_back,
                } => self.push(&view_id, can_go_back).await?,
                NavigationRequest::Pop => {
                    self.pop().await?;
                }
                NavigationRequest::Replace(view_id) => self.replace(&view_id).await?,
                NavigationRequest::GoBack => {
                    self.go_back().await?;
                }
                NavigationRequest::SwitchTab(view_id) => self.switch_tab(&view_id).await?,
                NavigationRequest::NextTab => self.next_tab().await?,
                NavigationRequest::PreviousTab => self.previous_tab().await?,
            }
            applied += 1;
        }
        Ok(applied)
    }
}
