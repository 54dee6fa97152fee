//! The playground event loop.
//!
//! A [`Playground`] owns a [`Session`] and is the only place timers live.
//! Callers talk to it through a cloneable [`PlaygroundHandle`]; every request
//! is a [`Command`] answered over a oneshot channel, so requests are applied
//! in the order they were sent. Surface messages, the debounced validation
//! and save timers, the auto-save cadence and the error panel's dismissal all
//! feed the same `select!` loop, which means none of them can interleave with
//! a half-finished run.

use std::time::Duration;

use log::{debug, info};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::session::{RunOutcome, Session, SessionStatus};
use crate::store::PersistedSnapshot;
use crate::surface::{MessageReceiver, SurfaceMessage};
use crate::{Error, FragmentKind, PlaygroundConfig, Result};

/// A pending deadline that re-arming pushes back (debounce)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerSlot {
    deadline: Option<Instant>,
}

impl TimerSlot {
    pub fn arm(&mut self, now: Instant, delay: Duration) {
        self.deadline = Some(now + delay);
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Disarm and return true if the deadline has passed
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(at) if at <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Default)]
struct Timers {
    save: TimerSlot,
    validate: [TimerSlot; 3],
    panel: TimerSlot,
}

impl Timers {
    fn next_deadline(&self) -> Option<Instant> {
        std::iter::once(&self.save)
            .chain(self.validate.iter())
            .chain(std::iter::once(&self.panel))
            .filter_map(TimerSlot::deadline)
            .min()
    }
}

enum Command {
    Edit(FragmentKind, String, oneshot::Sender<()>),
    Run(oneshot::Sender<Result<RunOutcome>>),
    Clear(oneshot::Sender<()>),
    Save(oneshot::Sender<bool>),
    SwitchTab(FragmentKind, oneshot::Sender<()>),
    SwitchTabNumber(u8, oneshot::Sender<bool>),
    ToggleFullscreen(oneshot::Sender<bool>),
    Snapshot(oneshot::Sender<PersistedSnapshot>),
    Status(oneshot::Sender<SessionStatus>),
    Shutdown(oneshot::Sender<()>),
}

/// Event loop around one session
pub struct Playground {
    session: Session,
    inbox: MessageReceiver,
    commands: mpsc::UnboundedReceiver<Command>,
    timers: Timers,
}

/// Async handle to a running [`Playground`]
#[derive(Clone)]
pub struct PlaygroundHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl Playground {
    /// Wrap a started session and the receiving end of its surfaces' channel
    pub fn new(session: Session, inbox: MessageReceiver) -> (Self, PlaygroundHandle) {
        let (cmd_tx, commands) = mpsc::unbounded_channel();
        let playground = Self {
            session,
            inbox,
            commands,
            timers: Timers::default(),
        };
        (playground, PlaygroundHandle { cmd_tx })
    }

    /// Build a session on two Boa surfaces, start it and spawn its loop on
    /// the current tokio runtime.
    #[cfg(feature = "sandbox")]
    pub fn launch(
        config: PlaygroundConfig,
        store: Box<dyn crate::SnapshotStore>,
        ui: Box<dyn crate::UiSink>,
    ) -> Result<(PlaygroundHandle, tokio::task::JoinHandle<Session>)> {
        use crate::surface::{message_channel, BoaSurface, SurfaceId};

        config.validate()?;
        let (outbox, inbox) = message_channel();
        let code = BoaSurface::spawn(SurfaceId::Code, &config, outbox.clone())?;
        let demo = BoaSurface::spawn(SurfaceId::Demo, &config, outbox)?;
        let mut session = Session::new(config, store, ui, Box::new(code), Box::new(demo));
        session.start()?;

        let (playground, handle) = Playground::new(session, inbox);
        Ok((handle, tokio::spawn(playground.run())))
    }

    /// Process commands, surface messages and timers until shut down or
    /// every handle is dropped. The snapshot is saved once more on the way
    /// out and the session is handed back.
    pub async fn run(mut self) -> Session {
        let period = PlaygroundConfig::millis(self.session.config().autosave_interval_ms.max(1));
        let mut autosave = time::interval_at(Instant::now() + period, period);
        autosave.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown_ack = None;
        loop {
            let deadline = self.timers.next_deadline();
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + period);

            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(Command::Shutdown(ack)) => {
                        shutdown_ack = Some(ack);
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(message) = self.inbox.recv() => self.handle_message(message),
                _ = autosave.tick() => {
                    self.session.save();
                }
                _ = time::sleep_until(wake_at), if deadline.is_some() => {
                    self.fire_due(Instant::now());
                }
            }
        }

        self.session.save();
        info!("playground stopped after {} runs", self.session.generation());
        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
        self.session
    }

    fn handle_command(&mut self, cmd: Command) {
        let now = Instant::now();
        match cmd {
            Command::Edit(kind, text, resp) => {
                self.session.edit(kind, text);
                let cfg = self.session.config();
                let (validate_after, save_after) = (
                    PlaygroundConfig::millis(cfg.validation_debounce_ms),
                    PlaygroundConfig::millis(cfg.save_debounce_ms),
                );
                self.timers.validate[kind.index()].arm(now, validate_after);
                self.timers.save.arm(now, save_after);
                let _ = resp.send(());
            }
            Command::Run(resp) => {
                // A run validates everything itself and hides the panel.
                self.timers.validate.iter_mut().for_each(TimerSlot::cancel);
                self.timers.panel.cancel();
                let _ = resp.send(self.session.run());
            }
            Command::Clear(resp) => {
                self.timers.validate.iter_mut().for_each(TimerSlot::cancel);
                self.timers.save.cancel();
                self.timers.panel.cancel();
                self.session.clear();
                let _ = resp.send(());
            }
            Command::Save(resp) => {
                self.timers.save.cancel();
                let _ = resp.send(self.session.save_with_notice());
            }
            Command::SwitchTab(kind, resp) => {
                self.session.switch_tab(kind);
                let _ = resp.send(());
            }
            Command::SwitchTabNumber(n, resp) => {
                let _ = resp.send(self.session.switch_tab_number(n));
            }
            Command::ToggleFullscreen(resp) => {
                let _ = resp.send(self.session.toggle_fullscreen());
            }
            Command::Snapshot(resp) => {
                let _ = resp.send(self.session.snapshot());
            }
            Command::Status(resp) => {
                let _ = resp.send(self.session.status());
            }
            Command::Shutdown(resp) => {
                let _ = resp.send(());
            }
        }
    }

    fn handle_message(&mut self, message: SurfaceMessage) {
        if self.session.handle_message(message).is_some() {
            let ms = self.session.config().error_panel_ms;
            self.timers.panel.arm(Instant::now(), PlaygroundConfig::millis(ms));
        }
    }

    fn fire_due(&mut self, now: Instant) {
        if self.timers.save.fire_if_due(now) {
            debug!("debounced save");
            self.session.save();
        }
        for kind in FragmentKind::ALL {
            if self.timers.validate[kind.index()].fire_if_due(now) {
                self.session.validate(kind);
            }
        }
        if self.timers.panel.fire_if_due(now) {
            self.session.dismiss_error_panel();
        }
    }
}

impl PlaygroundHandle {
    async fn request<T>(&self, what: &str, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .map_err(|_| Error::Other(format!("{} failed: playground has stopped", what)))?;
        rx.await
            .map_err(|e| Error::Other(format!("{} canceled: {}", what, e)))
    }

    /// Replace a fragment's text and (re)start its debounce timers
    pub async fn edit(&self, kind: FragmentKind, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.request("edit", |tx| Command::Edit(kind, text, tx)).await
    }

    pub async fn run(&self) -> Result<RunOutcome> {
        self.request("run", Command::Run).await?
    }

    pub async fn refresh(&self) -> Result<RunOutcome> {
        self.run().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.request("clear", Command::Clear).await
    }

    /// Explicit save; true when the store accepted the write
    pub async fn save(&self) -> Result<bool> {
        self.request("save", Command::Save).await
    }

    pub async fn switch_tab(&self, kind: FragmentKind) -> Result<()> {
        self.request("switch tab", |tx| Command::SwitchTab(kind, tx)).await
    }

    pub async fn switch_tab_number(&self, n: u8) -> Result<bool> {
        self.request("switch tab", |tx| Command::SwitchTabNumber(n, tx)).await
    }

    pub async fn toggle_fullscreen(&self) -> Result<bool> {
        self.request("toggle fullscreen", Command::ToggleFullscreen).await
    }

    pub async fn snapshot(&self) -> Result<PersistedSnapshot> {
        self.request("snapshot", Command::Snapshot).await
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request("status", Command::Status).await
    }

    /// Stop the loop after a final save
    pub async fn shutdown(&self) -> Result<()> {
        self.request("shutdown", Command::Shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::RunState;
    use crate::store::SnapshotStore;
    use crate::surface::{message_channel, ExecutionSurface, MessageSender, SurfaceId};
    use crate::ui::{RecordingUi, UiEvent};
    use crate::{NotificationLevel, PreviewPane};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Store whose writes stay visible to the test
    #[derive(Clone, Default)]
    struct SharedStore {
        entries: Arc<Mutex<HashMap<String, String>>>,
        writes: Arc<Mutex<usize>>,
    }

    impl SharedStore {
        fn writes(&self) -> usize {
            *self.writes.lock().unwrap()
        }

        fn saved(&self) -> Option<PersistedSnapshot> {
            let entries = self.entries.lock().unwrap();
            entries
                .get("runthatcode-editor")
                .map(|raw| PersistedSnapshot::from_json(raw).unwrap())
        }
    }

    impl SnapshotStore for SharedStore {
        fn get(&self, key: &str) -> Result<Option<String>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        fn set(&mut self, key: &str, value: &str) -> Result<()> {
            self.entries.lock().unwrap().insert(key.into(), value.into());
            *self.writes.lock().unwrap() += 1;
            Ok(())
        }
    }

    /// Surface that finishes every load at once and optionally reports an
    /// error tagged with whatever token the document carries.
    struct InstantSurface {
        id: SurfaceId,
        outbox: MessageSender,
        loads: u64,
        fail_with: Option<&'static str>,
    }

    impl ExecutionSurface for InstantSurface {
        fn id(&self) -> SurfaceId {
            self.id
        }

        fn load(&mut self, document: &str) -> Result<u64> {
            self.loads += 1;
            if let Some(message) = self.fail_with {
                let token = document
                    .split("token: '")
                    .nth(1)
                    .and_then(|rest| rest.split('\'').next())
                    .unwrap_or_default();
                let data = serde_json::json!({"type": "error", "message": message, "token": token});
                let _ = self.outbox.send(SurfaceMessage::Posted { surface: self.id, data: data.to_string() });
            }
            let _ = self.outbox.send(SurfaceMessage::Loaded { surface: self.id, load_id: self.loads });
            Ok(self.loads)
        }
    }

    fn start(fail_with: Option<&'static str>) -> (PlaygroundHandle, RecordingUi, SharedStore, tokio::task::JoinHandle<Session>) {
        let ui = RecordingUi::new();
        let store = SharedStore::default();
        let (outbox, inbox) = message_channel();
        let code = InstantSurface { id: SurfaceId::Code, outbox: outbox.clone(), loads: 0, fail_with };
        let demo = InstantSurface { id: SurfaceId::Demo, outbox, loads: 0, fail_with: None };
        let mut session = Session::new(
            PlaygroundConfig::default(),
            Box::new(store.clone()),
            Box::new(ui.clone()),
            Box::new(code),
            Box::new(demo),
        );
        session.start().unwrap();
        let (playground, handle) = Playground::new(session, inbox);
        let task = tokio::spawn(playground.run());
        (handle, ui, store, task)
    }

    #[test]
    fn timer_slot_rearm_pushes_deadline() {
        let t0 = Instant::now();
        let mut slot = TimerSlot::default();
        slot.arm(t0, Duration::from_millis(100));
        slot.arm(t0 + Duration::from_millis(50), Duration::from_millis(100));
        assert!(!slot.fire_if_due(t0 + Duration::from_millis(120)));
        assert!(slot.fire_if_due(t0 + Duration::from_millis(150)));
        assert!(!slot.fire_if_due(t0 + Duration::from_millis(200)), "fires once");
    }

    #[tokio::test(start_paused = true)]
    async fn validation_is_debounced() {
        let (handle, ui, _store, _task) = start(None);

        handle.edit(FragmentKind::Css, "a { color: red").await.unwrap();
        time::sleep(Duration::from_millis(1000)).await;
        handle.edit(FragmentKind::Css, "a { color: red }").await.unwrap();
        time::sleep(Duration::from_millis(1000)).await;
        assert!(ui.notifications().is_empty(), "first deadline was pushed back");

        time::sleep(Duration::from_millis(600)).await;
        let warnings: Vec<_> = ui
            .notifications()
            .into_iter()
            .filter(|n| n.level == NotificationLevel::Warning)
            .collect();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].message.contains("Missing semicolon"));
        assert!(handle.status().await.unwrap().tab_errors[FragmentKind::Css.index()]);
    }

    #[tokio::test(start_paused = true)]
    async fn edits_are_saved_after_quiet_period() {
        let (handle, _ui, store, _task) = start(None);

        handle.edit(FragmentKind::Html, "<p>a</p>").await.unwrap();
        time::sleep(Duration::from_millis(500)).await;
        handle.edit(FragmentKind::Html, "<p>ab</p>").await.unwrap();
        time::sleep(Duration::from_millis(700)).await;
        assert_eq!(store.writes(), 0);

        time::sleep(Duration::from_millis(400)).await;
        assert_eq!(store.writes(), 1);
        assert_eq!(store.saved().unwrap().html, "<p>ab</p>");
    }

    #[tokio::test(start_paused = true)]
    async fn autosave_runs_on_its_own_cadence() {
        let (_handle, _ui, store, _task) = start(None);
        time::sleep(Duration::from_millis(4100)).await;
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn runtime_error_panel_dismisses_itself() {
        let (handle, ui, _store, _task) = start(Some("boom is not defined"));

        handle.edit(FragmentKind::Js, "boom()").await.unwrap();
        handle.run().await.unwrap();
        time::sleep(Duration::from_millis(10)).await;

        assert_eq!(ui.panels(), vec!["boom is not defined\nAt line unknown".to_string()]);
        assert_eq!(handle.status().await.unwrap().state, RunState::ErrorReported);

        ui.clear();
        time::sleep(Duration::from_millis(10_000)).await;
        assert!(ui.events().contains(&UiEvent::HideErrorPanel));
        assert_eq!(handle.status().await.unwrap().state, RunState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn blank_run_and_clear() {
        let (handle, ui, store, _task) = start(None);

        assert_eq!(handle.run().await.unwrap(), RunOutcome::Demo);
        handle.edit(FragmentKind::Html, "<p>x</p>").await.unwrap();
        assert!(matches!(handle.refresh().await.unwrap(), RunOutcome::Code { generation: 1, .. }));
        assert_eq!(handle.status().await.unwrap().visible, PreviewPane::Code);

        handle.clear().await.unwrap();
        assert_eq!(handle.status().await.unwrap().visible, PreviewPane::Demo);
        assert_eq!(store.saved().unwrap(), PersistedSnapshot::default());
        assert_eq!(ui.notifications().pop().unwrap().message, "Code cleared! ✨");
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_saves_and_returns_session() {
        let (handle, _ui, store, task) = start(None);
        handle.edit(FragmentKind::Js, "let x = 1;").await.unwrap();
        handle.shutdown().await.unwrap();

        let session = task.await.unwrap();
        assert_eq!(session.text(FragmentKind::Js), "let x = 1;");
        assert_eq!(store.saved().unwrap().js, "let x = 1;");
        assert!(handle.status().await.is_err());
    }
}
