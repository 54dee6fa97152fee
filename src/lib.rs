//! RunThatCode playground engine
//!
//! A live-coding playground core for Rust: three source fragments (HTML, CSS
//! and JavaScript) are validated heuristically, composed into one
//! self-contained HTML document, and executed inside an isolated surface whose
//! runtime errors are relayed back to the editing UI over a one-way channel.
//!
//! # Features
//!
//! - **Sandbox** (default): runs composed documents inside a fresh Boa
//!   context per load, on a dedicated worker thread
//! - **Explicit session**: all editor state lives in a [`Session`] value that
//!   the event loop in [`runtime`] owns
//! - **Run correlation**: every run gets a token so late errors from a stale
//!   preview are not blamed on the current one
//!
//! # Example
//!
//! ```no_run
//! use runthatcode::{compose, validate, FragmentKind};
//!
//! let report = validate::validate(FragmentKind::Css, "a { color: red }");
//! assert_eq!(report.errors.len(), 1);
//!
//! let document = compose::compose("<p>hi</p>", "p{color:blue}", "console.log(1)");
//! assert!(document.contains("<title>Preview</title>"));
//! ```

use std::fmt;
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod compose;
pub mod relay;
pub mod runtime;
pub mod session;
pub mod store;
pub mod surface;
pub mod ui;
pub mod validate;

pub use compose::{compose, compose_with, ComposeOptions, ComposedDocument, RunToken};
pub use relay::{ErrorRelay, RelayPolicy, RelayedError, RuntimeErrorEvent};
pub use runtime::{Playground, PlaygroundHandle};
pub use session::{RunOutcome, RunState, Session, SessionStatus};
pub use store::{FileStore, MemoryStore, PersistedSnapshot, SnapshotStore};
pub use surface::{ExecutionSurface, SurfaceId, SurfaceMessage};
pub use ui::{LogUi, RecordingUi, UiEvent, UiSink};
pub use validate::ValidationReport;

#[cfg(feature = "sandbox")]
pub use surface::BoaSurface;

/// Configuration for a playground session
///
/// The defaults mirror the timings of the hosted playground UI and keep the
/// original (uncorrelated, unescaped) composition behaviour opt-out only where
/// it fixes a real misattribution bug:
/// - runs are correlated with a per-run token (`correlate_runs`)
/// - user CSS/JS is inlined verbatim (`escape_closing_tags` is off)
///
/// # Examples
///
/// ```
/// let cfg = runthatcode::PlaygroundConfig::default();
/// assert_eq!(cfg.validation_debounce_ms, 1500);
/// assert!(cfg.correlate_runs);
/// ```
#[derive(Debug, Clone)]
pub struct PlaygroundConfig {
    /// Delay after the last edit before a fragment is re-validated
    pub validation_debounce_ms: u64,
    /// Delay after the last edit before the snapshot is written
    pub save_debounce_ms: u64,
    /// Fixed auto-save cadence
    pub autosave_interval_ms: u64,
    /// How long the runtime error panel stays up
    pub error_panel_ms: u64,
    /// Duration of the transient runtime error notification
    pub runtime_notification_ms: u64,
    /// Duration of the validation warning notification
    pub warning_notification_ms: u64,
    /// Duration of plain info/success notifications
    pub notification_ms: u64,
    /// Validation messages listed in one warning before summarising the rest
    pub max_listed_issues: usize,
    /// Key under which the snapshot is stored
    pub storage_key: String,
    /// Tag each run with a token and drop error messages from other runs
    pub correlate_runs: bool,
    /// Rewrite `</style` / `</script` sequences inside user CSS/JS
    pub escape_closing_tags: bool,
    /// Maximum loop iterations before the sandbox throws (0 => disabled)
    pub script_loop_iteration_limit: u64,
    /// Maximum recursion depth before the sandbox throws (usize::MAX => disabled)
    pub script_recursion_limit: usize,
    /// Upper bound on timer callbacks drained after a document's scripts run
    pub max_timer_callbacks: usize,
}

impl Default for PlaygroundConfig {
    fn default() -> Self {
        Self {
            validation_debounce_ms: 1500,
            save_debounce_ms: 1000,
            autosave_interval_ms: 2000,
            error_panel_ms: 10000,
            runtime_notification_ms: 5000,
            warning_notification_ms: 8000,
            notification_ms: 3000,
            max_listed_issues: 5,
            storage_key: "runthatcode-editor".to_string(),
            correlate_runs: true,
            escape_closing_tags: false,
            script_loop_iteration_limit: 1000000,
            script_recursion_limit: 1024,
            max_timer_callbacks: 1000,
        }
    }
}

impl PlaygroundConfig {
    /// Check that every timer is usable by the event loop
    pub fn validate(&self) -> Result<()> {
        if self.autosave_interval_ms == 0 {
            return Err(Error::ConfigError("autosave_interval_ms must be > 0".into()));
        }
        if self.storage_key.trim().is_empty() {
            return Err(Error::ConfigError("storage_key must not be blank".into()));
        }
        Ok(())
    }

    pub(crate) fn millis(ms: u64) -> Duration {
        Duration::from_millis(ms)
    }
}

/// The three kinds of source fragment a session edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Html,
    Css,
    Js,
}

impl FragmentKind {
    /// All kinds in tab order
    pub const ALL: [FragmentKind; 3] = [FragmentKind::Html, FragmentKind::Css, FragmentKind::Js];

    /// Position of the kind's tab (0-based)
    pub fn index(self) -> usize {
        match self {
            FragmentKind::Html => 0,
            FragmentKind::Css => 1,
            FragmentKind::Js => 2,
        }
    }

    /// Map a 1-based tab number (the Ctrl+1/2/3 shortcuts) to a kind
    pub fn from_tab_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(FragmentKind::Html),
            2 => Some(FragmentKind::Css),
            3 => Some(FragmentKind::Js),
            _ => None,
        }
    }

    /// Short key used in snapshots and tab identifiers
    pub fn key(self) -> &'static str {
        match self {
            FragmentKind::Html => "html",
            FragmentKind::Css => "css",
            FragmentKind::Js => "js",
        }
    }

    /// Human-readable language name used in issue summaries
    pub fn label(self) -> &'static str {
        match self {
            FragmentKind::Html => "HTML",
            FragmentKind::Css => "CSS",
            FragmentKind::Js => "JavaScript",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// One editable source fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFragment {
    pub kind: FragmentKind,
    /// Current editor contents
    pub text: String,
    /// Initial editor contents; snapshot loading only overwrites a fragment
    /// that still holds this value (or is blank)
    pub default_text: String,
}

impl SourceFragment {
    pub fn new(kind: FragmentKind) -> Self {
        Self {
            kind,
            text: String::new(),
            default_text: String::new(),
        }
    }

    /// Fragment whose initial contents are `default_text`
    pub fn with_default(kind: FragmentKind, default_text: impl Into<String>) -> Self {
        let default_text = default_text.into();
        Self {
            kind,
            text: default_text.clone(),
            default_text,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }

    /// Whether a restored snapshot value may replace the current text
    pub fn is_pristine(&self) -> bool {
        self.text == self.default_text || self.is_blank()
    }
}

/// Which preview pane is visible
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewPane {
    /// Static demo document, shown while every fragment is blank
    Demo,
    /// The user's composed document
    Code,
}

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// A transient message for the UI to toast
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
    /// How long the UI should keep it visible
    pub duration: Duration,
}

impl Notification {
    pub fn new(level: NotificationLevel, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            level,
            message: message.into(),
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PlaygroundConfig::default();
        assert_eq!(config.save_debounce_ms, 1000);
        assert_eq!(config.autosave_interval_ms, 2000);
        assert_eq!(config.storage_key, "runthatcode-editor");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_rejects_zero_interval() {
        let config = PlaygroundConfig {
            autosave_interval_ms: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_tab_numbers() {
        assert_eq!(FragmentKind::from_tab_number(1), Some(FragmentKind::Html));
        assert_eq!(FragmentKind::from_tab_number(3), Some(FragmentKind::Js));
        assert_eq!(FragmentKind::from_tab_number(4), None);
        for kind in FragmentKind::ALL {
            assert_eq!(FragmentKind::from_tab_number(kind.index() as u8 + 1), Some(kind));
        }
    }

    #[test]
    fn test_fragment_pristine() {
        let mut f = SourceFragment::with_default(FragmentKind::Html, "<p>start</p>");
        assert!(f.is_pristine());
        f.text = "<p>typed</p>".into();
        assert!(!f.is_pristine());
        f.text = "   ".into();
        assert!(f.is_pristine());
    }
}
