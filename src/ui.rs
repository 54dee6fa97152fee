//! The UI layer as seen by the engine.
//!
//! Rendering toasts, tabs and panes is the host's job; the session only tells
//! a [`UiSink`] what changed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{error, info, warn};

use crate::{FragmentKind, Notification, NotificationLevel, PreviewPane};

/// Receiver of every UI-visible effect of a session
pub trait UiSink: Send {
    /// Toast a transient notification
    fn notify(&mut self, notification: Notification);

    /// Show the runtime error panel; the session hides it again after
    /// `auto_dismiss`
    fn show_error_panel(&mut self, text: &str, auto_dismiss: Duration);

    fn hide_error_panel(&mut self);

    /// Mark or unmark a fragment's tab as having validation issues
    fn set_tab_error(&mut self, kind: FragmentKind, has_error: bool);

    fn show_preview(&mut self, pane: PreviewPane);

    fn set_active_tab(&mut self, _kind: FragmentKind) {}

    /// Enter or leave fullscreen preview; failures are only logged
    fn set_fullscreen(&mut self, _on: bool) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Move focus into the code preview once it loaded; failure is ignored
    fn focus_preview(&mut self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Open a link the preview intercepted in a new top-level context
    fn open_external(&mut self, _url: &str) {}
}

/// UI that writes everything to the log
#[derive(Debug, Default)]
pub struct LogUi;

impl LogUi {
    pub fn new() -> Self {
        LogUi
    }
}

impl UiSink for LogUi {
    fn notify(&mut self, notification: Notification) {
        match notification.level {
            NotificationLevel::Error => error!("{}", notification.message),
            NotificationLevel::Warning => warn!("{}", notification.message),
            NotificationLevel::Info | NotificationLevel::Success => info!("{}", notification.message),
        }
    }

    fn show_error_panel(&mut self, text: &str, _auto_dismiss: Duration) {
        error!("runtime error:\n{}", text);
    }

    fn hide_error_panel(&mut self) {}

    fn set_tab_error(&mut self, kind: FragmentKind, has_error: bool) {
        if has_error {
            warn!("{} has issues", kind.label());
        }
    }

    fn show_preview(&mut self, pane: PreviewPane) {
        info!("showing {:?} preview", pane);
    }

    fn open_external(&mut self, url: &str) {
        info!("preview opened link: {}", url);
    }
}

/// One recorded UI effect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiEvent {
    Notify(Notification),
    ShowErrorPanel(String),
    HideErrorPanel,
    TabError(FragmentKind, bool),
    ShowPreview(PreviewPane),
    ActiveTab(FragmentKind),
    Fullscreen(bool),
    FocusPreview,
    OpenExternal(String),
}

/// UI that records every effect; clones share the same log
#[derive(Debug, Clone, Default)]
pub struct RecordingUi {
    events: Arc<Mutex<Vec<UiEvent>>>,
}

impl RecordingUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<UiEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut e) = self.events.lock() {
            e.clear();
        }
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::Notify(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    /// Contents of every error panel shown so far
    pub fn panels(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                UiEvent::ShowErrorPanel(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: UiEvent) {
        if let Ok(mut e) = self.events.lock() {
            e.push(event);
        }
    }
}

impl UiSink for RecordingUi {
    fn notify(&mut self, notification: Notification) {
        self.push(UiEvent::Notify(notification));
    }

    fn show_error_panel(&mut self, text: &str, _auto_dismiss: Duration) {
        self.push(UiEvent::ShowErrorPanel(text.to_string()));
    }

    fn hide_error_panel(&mut self) {
        self.push(UiEvent::HideErrorPanel);
    }

    fn set_tab_error(&mut self, kind: FragmentKind, has_error: bool) {
        self.push(UiEvent::TabError(kind, has_error));
    }

    fn show_preview(&mut self, pane: PreviewPane) {
        self.push(UiEvent::ShowPreview(pane));
    }

    fn set_active_tab(&mut self, kind: FragmentKind) {
        self.push(UiEvent::ActiveTab(kind));
    }

    fn set_fullscreen(&mut self, on: bool) -> std::result::Result<(), String> {
        self.push(UiEvent::Fullscreen(on));
        Ok(())
    }

    fn focus_preview(&mut self) -> std::result::Result<(), String> {
        self.push(UiEvent::FocusPreview);
        Ok(())
    }

    fn open_external(&mut self, url: &str) {
        self.push(UiEvent::OpenExternal(url.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_ui_clones_share_log() {
        let ui = RecordingUi::new();
        let mut writer = ui.clone();
        writer.notify(Notification::new(NotificationLevel::Info, "hello", Duration::from_millis(3000)));
        writer.set_tab_error(FragmentKind::Css, true);

        assert_eq!(ui.notifications().len(), 1);
        assert_eq!(ui.notifications()[0].message, "hello");
        assert_eq!(ui.events()[1], UiEvent::TabError(FragmentKind::Css, true));

        ui.clear();
        assert!(ui.events().is_empty());
    }
}
