//! Raw input through the keyboard pipeline, the application loop and the bus

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tui_pulse::prelude::*;
use tui_pulse::{assert_emitted, count_emitted, BusRecorder, HistoryFilter};

fn loop_with_bus() -> (AppLoop, Arc<EventBus>, BusRecorder) {
    let config = RuntimeConfig::default();
    let bus = Arc::new(EventBus::new(config.bus.clone()));
    let recorder = BusRecorder::new();
    recorder.attach(&bus, "recorder");
    let app = AppLoop::with_capabilities(&config, TerminalCapabilities::fallback())
        .with_bus(bus.clone());
    (app, bus, recorder)
}

#[test]
fn test_loop_lifecycle_is_published() {
    let (mut app, _bus, recorder) = loop_with_bus();

    app.start();
    app.handle_resize(100, 30);
    app.stop();

    assert_eq!(
        recorder.types(),
        vec!["loop.started", "loop.resize", "loop.stopped"]
    );
    let resize = &recorder.messages()[1];
    assert_eq!(resize.source, "app-loop");
    assert_eq!(resize.data, json!({ "width": 100, "height": 30 }));
}

#[test]
fn test_ctrl_c_stops_the_loop() {
    let (mut app, _bus, recorder) = loop_with_bus();
    let mut events = app.subscribe();
    app.start();

    let produced = app.handle_input(&[0x03]);

    assert!(!app.is_running());
    assert_emitted!(produced, InputEvent::Signal(SignalKind::Interrupt));
    assert_eq!(
        recorder.types(),
        vec!["loop.started", "loop.key", "loop.signal", "loop.stopped"]
    );

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_emitted!(seen, LoopEvent::Signal(SignalKind::Interrupt));
    assert_emitted!(seen, LoopEvent::Stopped);
}

#[test]
fn test_binding_publishes_through_channel() {
    let (mut app, bus, _recorder) = loop_with_bus();
    let files = bus.channel("files");
    let saved = BusRecorder::new();
    files.subscribe(saved.handler(), None);

    let publisher = files.clone();
    app.keyboard_mut().registry_mut().bind(
        "ctrl+s",
        Handler::new(move |key: &KeyEvent| {
            publisher.publish(
                "file.save",
                json!({ "pattern": key.to_pattern() }),
                PublishOptions::new(),
            );
            Ok(())
        }),
        BindingOptions::default().with_description("Save"),
    );

    app.start();
    app.handle_input(&[0x13]);

    let messages = saved.messages();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message_type, "file.save");
    assert_eq!(messages[0].source, "files");
    assert_eq!(messages[0].data, json!({ "pattern": "ctrl+s" }));

    // loop notifications come from another source and never reach the channel
    let history = bus.message_history(&HistoryFilter {
        source: Some("app-loop".into()),
        ..Default::default()
    });
    assert!(history.iter().any(|m| m.message_type == "loop.key"));
}

#[test]
fn test_split_sequence_across_chunks() {
    let (mut app, _bus, _recorder) = loop_with_bus();
    app.start();

    let first = app.handle_input(b"\x1b[1;");
    assert!(first.is_empty());
    assert!(app.keyboard().has_pending());

    let second = app.handle_input(b"5A");
    assert_eq!(second.len(), 1);
    assert_emitted!(
        second,
        InputEvent::Key(key) if key.key == "up" && key.ctrl()
    );
    assert!(!app.keyboard().has_pending());
}

#[tokio::test(start_paused = true)]
async fn test_lone_escape_waits_for_timeout() {
    let (mut app, _bus, recorder) = loop_with_bus();
    app.start();

    assert!(app.handle_input(&[0x1b]).is_empty());
    app.frame_with(|_| Ok(()));
    assert!(!recorder.types().iter().any(|t| t == "loop.key"));

    tokio::time::advance(Duration::from_millis(60)).await;
    app.frame_with(|_| Ok(()));

    let keys: Vec<_> = recorder
        .messages()
        .into_iter()
        .filter(|m| m.message_type == "loop.key")
        .collect();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0].data["key"], "escape");
}

#[test]
fn test_keymap_commands_reach_the_application() {
    let mut config = RuntimeConfig::default();
    config.keymap.insert("quit".into(), vec!["q".into()]);
    config
        .keymap
        .insert("next_tab".into(), vec!["tab".into(), "l".into()]);

    let mut app = AppLoop::with_capabilities(&config, TerminalCapabilities::fallback());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let ids = app.keyboard_mut().bind_keymap(&config.keymap, &tx);
    assert_eq!(ids.len(), 3);

    app.start();
    app.handle_input(b"l\tq");

    let mut commands = Vec::new();
    while let Ok(command) = rx.try_recv() {
        commands.push(command);
    }
    assert_eq!(commands, vec!["next_tab", "next_tab", "quit"]);
}

#[test]
fn test_failing_render_is_reported() {
    let (mut app, _bus, recorder) = loop_with_bus();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    app.on_error(move |error| sink.lock().unwrap().push(error.to_string()));
    app.start();

    app.render_frame_with(|_| Err("widget exploded".into()));
    app.render_frame_with(|_| panic!("layout overflow"));

    assert!(app.is_running());
    assert_eq!(app.state().frame_count, 2);
    assert_eq!(app.metrics().total_frames, 2);
    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].contains("widget exploded"));
    assert!(errors[1].contains("layout overflow"));
    let notifications: Vec<String> = recorder.types();
    assert_eq!(count_emitted!(notifications, t if t.as_str() == "loop.error"), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_drains_commands_until_stopped() {
    let config = RuntimeConfig {
        target_fps: 10,
        ..Default::default()
    };
    let mut app = AppLoop::with_capabilities(&config, TerminalCapabilities::fallback());
    let typed = Arc::new(Mutex::new(String::new()));
    let sink = typed.clone();
    app.on_input(move |event| {
        if let InputEvent::Key(key) = event {
            sink.lock().unwrap().push_str(&key.key);
        }
        Ok(())
    });

    let handle = app.handle();
    let driver = tokio::spawn(async move {
        handle.send_input(b"hi");
        tokio::time::sleep(Duration::from_millis(250)).await;
        handle.stop();
    });

    app.run().await;
    driver.await.unwrap();

    assert!(!app.is_running());
    assert_eq!(typed.lock().unwrap().as_str(), "hi");
    let frames = app.state().frame_count;
    assert!((2..=4).contains(&frames), "frames: {}", frames);
}
