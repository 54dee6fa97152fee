//! End-to-end tests: sessions running on real Boa-backed surfaces.
#![cfg(feature = "sandbox")]

use std::time::Duration;

use runthatcode::surface::{message_channel, MessageReceiver};
use runthatcode::{
    BoaSurface, FileStore, FragmentKind, MemoryStore, Playground, PlaygroundConfig, PreviewPane,
    RecordingUi, RunOutcome, RunState, Session, SurfaceId, SurfaceMessage, UiEvent,
};

fn session_with(config: PlaygroundConfig) -> (Session, MessageReceiver, RecordingUi) {
    let ui = RecordingUi::new();
    let (outbox, inbox) = message_channel();
    let code = BoaSurface::spawn(SurfaceId::Code, &config, outbox.clone()).expect("code surface");
    let demo = BoaSurface::spawn(SurfaceId::Demo, &config, outbox).expect("demo surface");
    let session = Session::new(
        config,
        Box::new(MemoryStore::new()),
        Box::new(ui.clone()),
        Box::new(code),
        Box::new(demo),
    );
    (session, inbox, ui)
}

/// Feed surface messages to the session until `loads` code documents finished
fn pump(session: &mut Session, inbox: &mut MessageReceiver, loads: usize) {
    let mut seen = 0;
    while seen < loads {
        let message = inbox.blocking_recv().expect("surface channel closed");
        if matches!(message, SurfaceMessage::Loaded { surface: SurfaceId::Code, .. }) {
            seen += 1;
        }
        session.handle_message(message);
    }
}

#[test]
fn blank_fragments_fall_back_to_demo() {
    let (mut session, _inbox, ui) = session_with(PlaygroundConfig::default());
    session.start().expect("start");
    session.edit(FragmentKind::Html, "  ");

    assert_eq!(session.run().expect("run"), RunOutcome::Demo);
    assert_eq!(session.visible(), PreviewPane::Demo);
    assert_eq!(
        ui.notifications().last().map(|n| n.message.clone()).as_deref(),
        Some("Write some code to see the preview! ✨")
    );
}

#[test]
fn runtime_error_reaches_the_panel() {
    let (mut session, mut inbox, ui) = session_with(PlaygroundConfig::default());
    session.edit(FragmentKind::Html, "<button id=\"go\">Go</button>");
    session.edit(FragmentKind::Js, "notDefinedAnywhere();");

    let outcome = session.run().expect("run");
    assert!(matches!(outcome, RunOutcome::Code { generation: 1, .. }));
    pump(&mut session, &mut inbox, 1);

    let panels = ui.panels();
    assert_eq!(panels.len(), 1);
    assert!(panels[0].contains("notDefinedAnywhere"), "panel: {}", panels[0]);
    let error = ui
        .notifications()
        .into_iter()
        .find(|n| n.message.starts_with("Runtime Error: "))
        .expect("error notification");
    assert_eq!(error.duration, Duration::from_millis(5000));
    assert_eq!(session.state(), RunState::ErrorReported);
    assert!(ui.events().contains(&UiEvent::FocusPreview));
}

#[test]
fn scripts_can_update_their_markup() {
    let (mut session, mut inbox, ui) = session_with(PlaygroundConfig::default());
    session.edit(FragmentKind::Html, r#"<p id="out"></p>"#);
    session.edit(FragmentKind::Js, "document.getElementById('out').textContent = 'hi';");

    session.run().expect("run");
    pump(&mut session, &mut inbox, 1);

    assert!(ui.panels().is_empty(), "panels: {:?}", ui.panels());
    assert_eq!(session.state(), RunState::Idle);
}

#[test]
fn clicked_links_open_outside_the_preview() {
    let (mut session, mut inbox, ui) = session_with(PlaygroundConfig::default());
    session.edit(FragmentKind::Html, r#"<a id="more" href="https://example.com/more">More</a>"#);
    session.edit(FragmentKind::Js, "document.getElementById('more').click();");

    session.run().expect("run");
    pump(&mut session, &mut inbox, 1);

    assert!(ui
        .events()
        .contains(&UiEvent::OpenExternal("https://example.com/more".to_string())));
}

#[test]
fn timer_errors_reach_the_panel() {
    let (mut session, mut inbox, ui) = session_with(PlaygroundConfig::default());
    session.edit(FragmentKind::Js, "setTimeout(function () { throw new Error('later'); }, 50);");

    session.run().expect("run");
    pump(&mut session, &mut inbox, 1);

    let panels = ui.panels();
    assert_eq!(panels.len(), 1);
    assert!(panels[0].contains("later"), "panel: {}", panels[0]);
}

#[test]
fn stale_errors_are_dropped_when_correlated() {
    let (mut session, mut inbox, ui) = session_with(PlaygroundConfig::default());

    session.edit(FragmentKind::Js, "throw new Error('first');");
    session.run().expect("first run");
    session.edit(FragmentKind::Js, "throw new Error('second');");
    session.run().expect("second run");
    pump(&mut session, &mut inbox, 2);

    let shown: Vec<_> = ui
        .notifications()
        .into_iter()
        .filter(|n| n.message.starts_with("Runtime Error: "))
        .map(|n| n.message)
        .collect();
    assert_eq!(shown, vec!["Runtime Error: second".to_string()]);
}

#[test]
fn permissive_relay_shows_every_error() {
    let config = PlaygroundConfig { correlate_runs: false, ..Default::default() };
    let (mut session, mut inbox, ui) = session_with(config);

    session.edit(FragmentKind::Js, "throw new Error('first');");
    session.run().expect("first run");
    session.edit(FragmentKind::Js, "throw new Error('second');");
    session.run().expect("second run");
    pump(&mut session, &mut inbox, 2);

    let shown: Vec<_> = ui
        .notifications()
        .into_iter()
        .filter(|n| n.message.starts_with("Runtime Error: "))
        .map(|n| n.message)
        .collect();
    assert_eq!(
        shown,
        vec!["Runtime Error: first".to_string(), "Runtime Error: second".to_string()]
    );
}

#[test]
fn window_open_is_forwarded_to_the_host() {
    let (mut session, mut inbox, ui) = session_with(PlaygroundConfig::default());
    session.edit(FragmentKind::Js, "window.open('https://example.com/docs', '_blank');");

    session.run().expect("run");
    pump(&mut session, &mut inbox, 1);

    assert!(ui
        .events()
        .contains(&UiEvent::OpenExternal("https://example.com/docs".to_string())));
    assert!(ui.panels().is_empty());
}

#[tokio::test]
async fn snapshot_survives_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("playground.json");

    let (handle, task) = Playground::launch(
        PlaygroundConfig::default(),
        Box::new(FileStore::new(&path)),
        Box::new(RecordingUi::new()),
    )
    .expect("launch");
    handle.edit(FragmentKind::Html, "<p>x</p>").await.expect("edit");
    handle.edit(FragmentKind::Css, "p{color:blue}").await.expect("edit");
    handle.edit(FragmentKind::Js, "console.log(1)").await.expect("edit");
    handle.shutdown().await.expect("shutdown");
    task.await.expect("join");

    let (handle, task) = Playground::launch(
        PlaygroundConfig::default(),
        Box::new(FileStore::new(&path)),
        Box::new(RecordingUi::new()),
    )
    .expect("relaunch");
    let snapshot = handle.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.html, "<p>x</p>");
    assert_eq!(snapshot.css, "p{color:blue}");
    assert_eq!(snapshot.js, "console.log(1)");

    let outcome = handle.run().await.expect("run");
    let RunOutcome::Code { document, .. } = outcome else {
        panic!("expected a code run");
    };
    assert!(document.as_str().contains("<p>x</p>"));
    handle.shutdown().await.expect("shutdown");
    task.await.expect("join");
}
