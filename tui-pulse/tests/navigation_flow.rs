//! View navigation driven by views, keys and rendering

use async_trait::async_trait;
use ratatui::text::Line;
use ratatui::widgets::Paragraph;
use serde_json::json;
use tui_pulse::prelude::*;
use tui_pulse::{key, NavigationError, RecordingView, RenderHarness, ViewLog, ViewProbe};

/// Shows how often it was mounted and the size it last saw.
#[derive(Default)]
struct StatusView {
    mounts: u32,
    size: (u16, u16),
}

#[async_trait]
impl View for StatusView {
    async fn mount(&mut self, ctx: ViewContext) -> Result<(), ViewError> {
        tokio::task::yield_now().await;
        self.mounts += 1;
        self.size = ctx.size();
        Ok(())
    }

    fn resize(&mut self, width: u16, height: u16) {
        self.size = (width, height);
    }

    fn render(&mut self, frame: &mut Frame, area: Rect) {
        let text = format!("mounts={} size={}x{}", self.mounts, self.size.0, self.size.1);
        frame.render_widget(Paragraph::new(Line::from(text)), area);
    }
}

struct App {
    views: ViewManager,
    log: ViewLog,
}

fn app(ids: &[&str]) -> (App, Vec<ViewProbe>) {
    let log = ViewLog::default();
    let mut views = ViewManager::new();
    let mut probes = Vec::new();
    for id in ids {
        let view = RecordingView::with_log(*id, log.clone()).with_bindings(vec![
            ViewKeyBinding::new("ctrl+o", "Open settings", "open_settings"),
            ViewKeyBinding::new("escape", "Back", "back"),
        ]);
        probes.push(view.probe());
        views.register_view(*id, view).unwrap();
    }
    views.initialize(40, 6);
    (App { views, log }, probes)
}

#[tokio::test]
async fn test_view_requests_are_applied_in_order() {
    let (mut app, probes) = app(&["home", "settings", "about"]);
    app.views.push("home", false).await.unwrap();

    let ctx = probes[0].context().expect("home was mounted");
    assert_eq!(ctx.view_id(), "home");
    assert_eq!(ctx.size(), (40, 6));
    ctx.push("settings");
    ctx.replace("about");

    assert_eq!(app.views.process_requests().await.unwrap(), 2);
    assert_eq!(app.views.current_view_id(), Some("about"));
    let ids: Vec<&str> = app.views.stack().iter().map(|e| e.view_id.as_str()).collect();
    assert_eq!(ids, vec!["home", "about"]);

    let about = probes[2].context().expect("about was mounted");
    about.go_back();
    assert_eq!(app.views.process_requests().await.unwrap(), 1);
    assert_eq!(app.views.current_view_id(), Some("home"));

    // nothing below home
    assert!(!app.views.can_go_back());
    ctx.go_back();
    assert!(matches!(
        app.views.process_requests().await,
        Err(NavigationError::CannotGoBack(id)) if id == "home"
    ));
}

#[tokio::test]
async fn test_state_survives_push_and_pop() {
    let (mut app, probes) = app(&["list", "detail"]);
    app.views.push("list", true).await.unwrap();
    probes[0].set_state(json!({ "selected": 7 }));

    app.views.push("detail", true).await.unwrap();
    assert_eq!(
        app.views.stack()[0].state,
        Some(json!({ "selected": 7 }))
    );
    probes[0].set_state(json!(null));

    assert_eq!(app.views.go_back().await.unwrap(), "detail");
    assert_eq!(probes[0].state(), json!({ "selected": 7 }));
    assert_eq!(
        app.log.take(),
        vec![
            "list:mount",
            "list:save",
            "list:unmount",
            "detail:mount",
            "detail:save",
            "detail:unmount",
            "list:mount",
            "list:restore",
        ]
    );
}

#[tokio::test]
async fn test_tabs_render_and_cycle() {
    let (mut app, _probes) = app(&["inbox", "sent", "drafts"]);
    app.views.add_tab("inbox", "Inbox").await.unwrap();
    app.views.add_tab("sent", "Sent").await.unwrap();
    app.views.add_tab("drafts", "Drafts").await.unwrap();
    assert_eq!(app.views.layout(), LayoutType::Tabbed);
    assert_eq!(app.views.active_tab(), Some("drafts"));

    app.views.next_tab().await.unwrap();
    assert_eq!(app.views.active_tab(), Some("inbox"));
    app.views.previous_tab().await.unwrap();
    assert_eq!(app.views.active_tab(), Some("drafts"));

    let mut harness = RenderHarness::new(40, 6);
    let views = &mut app.views;
    let screen = harness.render_to_string_plain(|frame| {
        let area = frame.area();
        views.render(frame, area)
    });
    let lines: Vec<&str> = screen.lines().collect();
    assert!(lines[0].contains("Inbox"));
    assert!(lines[0].contains("Sent"));
    assert!(lines[0].contains("Drafts"));
    assert!(lines[1].starts_with("drafts"));
}

#[tokio::test]
async fn test_split_layout_renders_top_two() {
    let (mut app, _probes) = app(&["editor", "preview"]);
    app.views.push("editor", true).await.unwrap();
    app.views.push("preview", true).await.unwrap();
    app.views.set_layout(LayoutType::SplitVertical).await.unwrap();

    assert_eq!(app.views.visible_views(), vec!["editor", "preview"]);

    let mut harness = RenderHarness::new(40, 6);
    let views = &mut app.views;
    let screen = harness.render_to_string_plain(|frame| {
        let area = frame.area();
        views.render(frame, area)
    });
    let first = screen.lines().next().unwrap_or_default();
    assert!(first.starts_with("editor"));
    assert!(first[20..].starts_with("preview"));
}

#[tokio::test]
async fn test_key_actions_drive_navigation() {
    let (mut app, probes) = app(&["home", "settings"]);
    app.views.push("home", true).await.unwrap();

    let action = app.views.dispatch_key(&key("ctrl+o"));
    assert_eq!(action.as_deref(), Some("open_settings"));
    if action.as_deref() == Some("open_settings") {
        let ctx = probes[0].context().unwrap();
        ctx.push("settings");
    }
    app.views.process_requests().await.unwrap();
    assert_eq!(app.views.current_view_id(), Some("settings"));

    assert_eq!(app.views.dispatch_key(&key("escape")).as_deref(), Some("back"));
    app.views.go_back().await.unwrap();
    assert_eq!(app.views.current_view_id(), Some("home"));
    assert_eq!(app.views.dispatch_key(&key("x")), None);
}

#[tokio::test]
async fn test_failing_mount_surfaces_lifecycle_error() {
    let mut views = ViewManager::new();
    views
        .register_view("broken", RecordingView::new("broken").failing_mount())
        .unwrap();
    views.initialize(80, 24);

    let err = views.push("broken", true).await.unwrap_err();
    assert!(matches!(
        err,
        NavigationError::Lifecycle { ref view, stage: "mount", .. } if view == "broken"
    ));
    assert_eq!(err.to_string(), "View broken failed to mount: broken refused to mount");
}

#[tokio::test]
async fn test_custom_view_sees_resize_and_remount() {
    let mut views = ViewManager::new();
    views.register_view("status", StatusView::default()).unwrap();
    views
        .register_view("other", RecordingView::new("other"))
        .unwrap();
    views.initialize(40, 6);

    views.push("status", true).await.unwrap();
    views.resize(30, 4);
    views.push("other", true).await.unwrap();
    views.go_back().await.unwrap();

    let mut harness = RenderHarness::new(40, 6);
    let screen = harness.render_to_string_plain(|frame| {
        let area = frame.area();
        views.render(frame, area)
    });
    assert!(screen.starts_with("mounts=2 size=30x4"), "{}", screen);
}
