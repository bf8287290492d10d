use std::time::Duration;

use async_trait::async_trait;
use ganmamao_backend::presenter::{DialogResponse, Presenter, PresenterError};

use super::{helper_failure, run_helper};

const NAME: &str = "zenity";
// zenity exit codes
const EXIT_OK: i32 = 0;
const EXIT_CANCEL: i32 = 1;
const EXIT_TIMEOUT: i32 = 5;

/// GTK dialogs via `zenity` (Linux desktops).
pub struct ZenityPresenter {
    title: String,
}

impl ZenityPresenter {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
        }
    }

    fn ensure_display(&self) -> Result<(), PresenterError> {
        let has_display = ["DISPLAY", "WAYLAND_DISPLAY"]
            .iter()
            .any(|var| std::env::var(var).map(|v| !v.is_empty()).unwrap_or(false));
        if has_display {
            Ok(())
        } else {
            Err(PresenterError::unavailable(NAME, "no graphical display"))
        }
    }
}

/// `--text` is rendered as Pango markup.
fn escape_markup(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn notify_args(title: &str, message: &str, timeout: Duration) -> Vec<String> {
    vec![
        "--question".to_string(),
        format!("--title={title}"),
        format!("--text={}", escape_markup(message)),
        "--ok-label=看看".to_string(),
        "--cancel-label=忽略".to_string(),
        format!("--timeout={}", timeout.as_secs().max(1)),
    ]
}

fn dialog_args(title: &str, message: &str) -> Vec<String> {
    vec![
        "--entry".to_string(),
        format!("--title={title}"),
        format!("--text={}", escape_markup(message)),
        "--ok-label=发送".to_string(),
        "--cancel-label=关闭".to_string(),
    ]
}

#[async_trait]
impl Presenter for ZenityPresenter {
    fn name(&self) -> &str {
        NAME
    }

    async fn notify(&self, message: &str, timeout: Duration) -> Result<bool, PresenterError> {
        self.ensure_display()?;
        let output = run_helper(NAME, "zenity", &notify_args(&self.title, message, timeout)).await?;
        match output.status.code() {
            Some(EXIT_OK) => Ok(true),
            Some(EXIT_CANCEL) | Some(EXIT_TIMEOUT) => Ok(false),
            _ => Err(helper_failure(NAME, "zenity", &output)),
        }
    }

    async fn dialog(&self, message: &str) -> Result<DialogResponse, PresenterError> {
        self.ensure_display()?;
        let output = run_helper(NAME, "zenity", &dialog_args(&self.title, message)).await?;
        match output.status.code() {
            Some(EXIT_OK) => {
                let text = String::from_utf8_lossy(&output.stdout);
                Ok(DialogResponse::submitted(text.trim_end_matches(['\r', '\n'])))
            }
            Some(EXIT_CANCEL) => Ok(DialogResponse::declined()),
            _ => Err(helper_failure(NAME, "zenity", &output)),
        }
    }
}
