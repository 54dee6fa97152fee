//! The editing session: fragments, error flags and the run cycle.
//!
//! A [`Session`] owns everything the playground knows about one editor: the
//! three source fragments, the per-kind validation flags, which preview pane
//! is visible and which run is current. It drives the validator, composer,
//! surfaces and relay, and reports every visible effect to a [`UiSink`].
//! Timers are not its concern; the event loop in [`crate::runtime`] decides
//! when to call [`Session::validate`], [`Session::save`] and
//! [`Session::dismiss_error_panel`].

use log::{debug, info, warn};

use crate::compose::{self, ComposeOptions, ComposedDocument, RunToken, DEMO_DOCUMENT};
use crate::relay::{ErrorRelay, RelayPolicy, RelayedError};
use crate::store::{PersistedSnapshot, SnapshotStore};
use crate::surface::{ExecutionSurface, SurfaceId, SurfaceMessage};
use crate::ui::UiSink;
use crate::validate::{self, ValidationReport};
use crate::{
    FragmentKind, Notification, NotificationLevel, PlaygroundConfig, PreviewPane, Result,
    SourceFragment,
};

/// Where the current run cycle is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Validating,
    Composing,
    Loading,
    /// A runtime error is on the panel; cleared by dismissal or a new run
    ErrorReported,
}

/// What a run did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every fragment was blank; the demo pane is showing
    Demo,
    /// The composed document was handed to the code surface
    Code {
        generation: u64,
        load_id: u64,
        token: Option<RunToken>,
        document: ComposedDocument,
    },
}

/// Point-in-time view of a session for hosts and tests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: RunState,
    pub visible: PreviewPane,
    pub has_errors: bool,
    pub tab_errors: [bool; 3],
    pub generation: u64,
    pub active_tab: FragmentKind,
    pub fullscreen: bool,
}

pub struct Session {
    config: PlaygroundConfig,
    fragments: [SourceFragment; 3],
    tab_errors: [bool; 3],
    has_errors: bool,
    visible: PreviewPane,
    active_tab: FragmentKind,
    fullscreen: bool,
    generation: u64,
    pending_load: Option<u64>,
    state: RunState,
    relay: ErrorRelay,
    store: Box<dyn SnapshotStore>,
    ui: Box<dyn UiSink>,
    code_surface: Box<dyn ExecutionSurface>,
    demo_surface: Box<dyn ExecutionSurface>,
}

impl Session {
    pub fn new(
        config: PlaygroundConfig,
        store: Box<dyn SnapshotStore>,
        ui: Box<dyn UiSink>,
        code_surface: Box<dyn ExecutionSurface>,
        demo_surface: Box<dyn ExecutionSurface>,
    ) -> Self {
        let policy = if config.correlate_runs {
            RelayPolicy::Correlated
        } else {
            RelayPolicy::Permissive
        };
        Self {
            config,
            fragments: FragmentKind::ALL.map(SourceFragment::new),
            tab_errors: [false; 3],
            has_errors: false,
            visible: PreviewPane::Demo,
            active_tab: FragmentKind::Html,
            fullscreen: false,
            generation: 0,
            pending_load: None,
            state: RunState::Idle,
            relay: ErrorRelay::new(policy),
            store,
            ui,
            code_surface,
            demo_surface,
        }
    }

    /// Give a fragment initial editor contents (before [`Session::start`])
    pub fn set_initial(&mut self, kind: FragmentKind, text: impl Into<String>) {
        self.fragments[kind.index()] = SourceFragment::with_default(kind, text);
    }

    /// Restore the saved snapshot, load the demo document and show it
    pub fn start(&mut self) -> Result<()> {
        self.load_snapshot();
        self.demo_surface.load(DEMO_DOCUMENT)?;
        self.show(PreviewPane::Demo);
        Ok(())
    }

    pub fn config(&self) -> &PlaygroundConfig {
        &self.config
    }

    pub fn fragment(&self, kind: FragmentKind) -> &SourceFragment {
        &self.fragments[kind.index()]
    }

    pub fn text(&self, kind: FragmentKind) -> &str {
        &self.fragments[kind.index()].text
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn visible(&self) -> PreviewPane {
        self.visible
    }

    pub fn has_errors(&self) -> bool {
        self.has_errors
    }

    pub fn tab_error(&self, kind: FragmentKind) -> bool {
        self.tab_errors[kind.index()]
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn relay(&self) -> &ErrorRelay {
        &self.relay
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            visible: self.visible,
            has_errors: self.has_errors,
            tab_errors: self.tab_errors,
            generation: self.generation,
            active_tab: self.active_tab,
            fullscreen: self.fullscreen,
        }
    }

    /// Replace a fragment's text (direct user input)
    pub fn edit(&mut self, kind: FragmentKind, text: impl Into<String>) {
        self.fragments[kind.index()].text = text.into();
    }

    /// Validate one fragment and publish the result
    pub fn validate(&mut self, kind: FragmentKind) -> ValidationReport {
        let report = validate::validate(kind, self.text(kind));
        if report.has_errors() {
            let summary = report.summary(self.config.max_listed_issues);
            self.notify(NotificationLevel::Warning, summary, self.config.warning_notification_ms);
        }
        self.set_tab_error(kind, report.has_errors());
        report
    }

    /// Validate, compose and load the current fragments, or fall back to the
    /// demo pane when all of them are blank.
    pub fn run(&mut self) -> Result<RunOutcome> {
        if self.fragments.iter().all(SourceFragment::is_blank) {
            self.show(PreviewPane::Demo);
            self.notify(
                NotificationLevel::Info,
                "Write some code to see the preview! ✨",
                self.config.notification_ms,
            );
            self.state = RunState::Idle;
            return Ok(RunOutcome::Demo);
        }

        self.show(PreviewPane::Code);
        self.ui.hide_error_panel();
        self.clear_error_indicators();

        self.state = RunState::Validating;
        for kind in FragmentKind::ALL {
            self.validate(kind);
        }

        self.state = RunState::Composing;
        self.generation += 1;
        let (html, css, js) = (
            self.text(FragmentKind::Html),
            self.text(FragmentKind::Css),
            self.text(FragmentKind::Js),
        );
        let token = self
            .config
            .correlate_runs
            .then(|| RunToken::derive(self.generation, html, css, js));
        let options = ComposeOptions {
            token: token.clone(),
            escape_closing_tags: self.config.escape_closing_tags,
        };
        let document = ComposedDocument::new(compose::compose_with(html, css, js, &options));
        self.relay.activate(token.clone());

        self.state = RunState::Loading;
        let load_id = match self.code_surface.load(document.as_str()) {
            Ok(id) => id,
            Err(e) => {
                self.state = RunState::Idle;
                return Err(e);
            }
        };
        self.pending_load = Some(load_id);
        info!("run #{} loading into code surface (load {})", self.generation, load_id);

        if !self.has_errors {
            self.notify(
                NotificationLevel::Success,
                "Code executed successfully! 🚀",
                self.config.notification_ms,
            );
        }

        Ok(RunOutcome::Code {
            generation: self.generation,
            load_id,
            token,
            document,
        })
    }

    /// Same as [`Session::run`]; the preview's refresh button
    pub fn refresh(&mut self) -> Result<RunOutcome> {
        self.run()
    }

    /// Empty all fragments and go back to the demo pane
    pub fn clear(&mut self) {
        for fragment in self.fragments.iter_mut() {
            fragment.text.clear();
        }
        self.show(PreviewPane::Demo);
        self.clear_error_indicators();
        self.ui.hide_error_panel();
        self.state = RunState::Idle;
        self.notify(NotificationLevel::Info, "Code cleared! ✨", self.config.notification_ms);
        self.save();
    }

    /// Handle one message from a surface. Returns the error shown, if any.
    pub fn handle_message(&mut self, message: SurfaceMessage) -> Option<RelayedError> {
        match message {
            SurfaceMessage::Posted { surface, data } => {
                let relayed = self.relay.accept(&data)?;
                debug!("{} surface reported: {}", surface, relayed.event.message);
                self.ui.show_error_panel(
                    &relayed.panel_text,
                    PlaygroundConfig::millis(self.config.error_panel_ms),
                );
                self.notify(
                    NotificationLevel::Error,
                    relayed.notification_text.clone(),
                    self.config.runtime_notification_ms,
                );
                self.state = RunState::ErrorReported;
                Some(relayed)
            }
            SurfaceMessage::Navigate { url, .. } => {
                self.ui.open_external(&url);
                None
            }
            SurfaceMessage::Loaded { surface, load_id } => {
                if surface == SurfaceId::Code && self.pending_load == Some(load_id) {
                    self.pending_load = None;
                    if let Err(e) = self.ui.focus_preview() {
                        debug!("could not focus preview: {}", e);
                    }
                    if self.state == RunState::Loading {
                        self.state = RunState::Idle;
                    }
                }
                None
            }
        }
    }

    /// Hide the runtime error panel (auto-dismiss)
    pub fn dismiss_error_panel(&mut self) {
        self.ui.hide_error_panel();
        if self.state == RunState::ErrorReported {
            self.state = RunState::Idle;
        }
    }

    pub fn switch_tab(&mut self, kind: FragmentKind) {
        if self.active_tab == kind {
            return;
        }
        self.active_tab = kind;
        self.ui.set_active_tab(kind);
    }

    /// Switch by 1-based tab number; false if there is no such tab
    pub fn switch_tab_number(&mut self, n: u8) -> bool {
        match FragmentKind::from_tab_number(n) {
            Some(kind) => {
                self.switch_tab(kind);
                true
            }
            None => false,
        }
    }

    pub fn active_tab(&self) -> FragmentKind {
        self.active_tab
    }

    pub fn toggle_fullscreen(&mut self) -> bool {
        let target = !self.fullscreen;
        match self.ui.set_fullscreen(target) {
            Ok(()) => self.fullscreen = target,
            Err(e) => info!("Error attempting to toggle fullscreen: {}", e),
        }
        self.fullscreen
    }

    pub fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    pub fn snapshot(&self) -> PersistedSnapshot {
        PersistedSnapshot {
            html: self.text(FragmentKind::Html).to_string(),
            css: self.text(FragmentKind::Css).to_string(),
            js: self.text(FragmentKind::Js).to_string(),
        }
    }

    /// Write the snapshot; failures are logged and otherwise ignored
    pub fn save(&mut self) -> bool {
        let written = self
            .snapshot()
            .to_json()
            .and_then(|json| self.store.set(&self.config.storage_key, &json));
        match written {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to save snapshot: {}", e);
                false
            }
        }
    }

    /// Explicit save from the user
    pub fn save_with_notice(&mut self) -> bool {
        let saved = self.save();
        self.notify(NotificationLevel::Success, "Code saved!", self.config.notification_ms);
        saved
    }

    /// Apply the stored snapshot to fragments still at their initial
    /// contents. Returns how many fragments were restored.
    pub fn load_snapshot(&mut self) -> usize {
        let raw = match self.store.get(&self.config.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return 0,
            Err(e) => {
                warn!("Failed to load snapshot: {}", e);
                return 0;
            }
        };
        let snapshot = match PersistedSnapshot::from_json(&raw) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to load snapshot: {}", e);
                return 0;
            }
        };

        let mut restored = 0;
        for (kind, value) in [
            (FragmentKind::Html, snapshot.html),
            (FragmentKind::Css, snapshot.css),
            (FragmentKind::Js, snapshot.js),
        ] {
            let fragment = &mut self.fragments[kind.index()];
            if !value.trim().is_empty() && fragment.is_pristine() {
                fragment.text = value;
                restored += 1;
            }
        }
        restored
    }

    fn show(&mut self, pane: PreviewPane) {
        if pane == PreviewPane::Demo {
            // The code preview is hidden; nothing it still posts belongs to a run.
            self.relay.activate(None);
        }
        self.visible = pane;
        self.ui.show_preview(pane);
    }

    fn set_tab_error(&mut self, kind: FragmentKind, has_error: bool) {
        self.tab_errors[kind.index()] = has_error;
        self.ui.set_tab_error(kind, has_error);
        self.has_errors = self.tab_errors.iter().any(|e| *e);
    }

    fn clear_error_indicators(&mut self) {
        for kind in FragmentKind::ALL {
            self.tab_errors[kind.index()] = false;
            self.ui.set_tab_error(kind, false);
        }
        self.has_errors = false;
    }

    fn notify(&mut self, level: NotificationLevel, message: impl Into<String>, ms: u64) {
        self.ui
            .notify(Notification::new(level, message, PlaygroundConfig::millis(ms)));
    }
}
