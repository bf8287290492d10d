//! The surface the character talks through: a short notification followed by
//! an input dialog.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

/// Prefix of the `system` row written when a presenter had to be skipped.
pub const NOTE_FALLBACK: &str = "弹窗后端不可用，已回退";

/// What came back from an input dialog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DialogResponse {
    /// `false` when the user closed or cancelled the dialog.
    pub submitted: bool,
    pub text: String,
}

impl DialogResponse {
    pub fn submitted(text: impl Into<String>) -> Self {
        Self {
            submitted: true,
            text: text.into(),
        }
    }

    pub fn declined() -> Self {
        Self::default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PresenterError {
    /// The backend cannot run here (missing binary, no display, ...).
    /// A chain moves on to its next presenter.
    #[error("presenter '{name}' unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error("presenter '{name}' failed: {source:#}")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl PresenterError {
    pub fn unavailable(name: &str, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub fn failed(name: &str, source: anyhow::Error) -> Self {
        Self::Failed {
            name: name.to_string(),
            source,
        }
    }
}

#[async_trait]
pub trait Presenter: Send + Sync {
    fn name(&self) -> &str;

    /// Show `message` for up to `timeout`; `true` when the user acknowledged it.
    async fn notify(&self, message: &str, timeout: Duration) -> Result<bool, PresenterError>;

    /// Ask for a reply to `message`.
    async fn dialog(&self, message: &str) -> Result<DialogResponse, PresenterError>;

    /// Notes about backends skipped since the last call, oldest first.
    fn take_notes(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Tries each presenter in order, moving on only when one reports itself
/// unavailable. Real failures are returned as-is.
pub struct PresenterChain {
    presenters: Vec<Box<dyn Presenter>>,
    notes: Mutex<Vec<String>>,
}

impl PresenterChain {
    pub fn new(presenters: Vec<Box<dyn Presenter>>) -> Self {
        Self {
            presenters,
            notes: Mutex::new(Vec::new()),
        }
    }

    fn fell_back(&self, err: &PresenterError) {
        tracing::warn!("{}; falling back", err);
        if let PresenterError::Unavailable { name, reason } = err {
            if let Ok(mut notes) = self.notes.lock() {
                notes.push(format!("{NOTE_FALLBACK}：{name}（{reason}）"));
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.presenters.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.presenters.iter().map(|p| p.name()).collect()
    }
}

fn exhausted(last: Option<PresenterError>) -> PresenterError {
    last.unwrap_or_else(|| PresenterError::unavailable("chain", "no presenters configured"))
}

#[async_trait]
impl Presenter for PresenterChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn notify(&self, message: &str, timeout: Duration) -> Result<bool, PresenterError> {
        let mut last = None;
        for presenter in &self.presenters {
            match presenter.notify(message, timeout).await {
                Err(err @ PresenterError::Unavailable { .. }) => {
                    self.fell_back(&err);
                    last = Some(err);
                }
                other => return other,
            }
        }
        Err(exhausted(last))
    }

    async fn dialog(&self, message: &str) -> Result<DialogResponse, PresenterError> {
        let mut last = None;
        for presenter in &self.presenters {
            match presenter.dialog(message).await {
                Err(err @ PresenterError::Unavailable { .. }) => {
                    self.fell_back(&err);
                    last = Some(err);
                }
                other => return other,
            }
        }
        Err(exhausted(last))
    }

    fn take_notes(&self) -> Vec<String> {
        self.notes
            .lock()
            .map(|mut notes| std::mem::take(&mut *notes))
            .unwrap_or_default()
    }
}
