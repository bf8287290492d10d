use std::time::Duration;

use async_trait::async_trait;
use ganmamao_backend::presenter::{DialogResponse, Presenter, PresenterError};

use super::{helper_failure, run_helper};

const NAME: &str = "osascript";
const SEND_BUTTON: &str = "发送";
const CLOSE_BUTTON: &str = "关闭";
const OPEN_BUTTON: &str = "看看";
const IGNORE_BUTTON: &str = "忽略";

/// AppleScript dialogs via `osascript` (macOS only).
pub struct OsascriptPresenter {
    title: String,
}

impl OsascriptPresenter {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
        }
    }

    async fn run(&self, script: String) -> Result<String, PresenterError> {
        if !cfg!(target_os = "macos") {
            return Err(PresenterError::unavailable(NAME, "not running on macOS"));
        }
        let output = run_helper(NAME, "osascript", &["-e".to_string(), script]).await?;
        if !output.status.success() {
            return Err(helper_failure(NAME, "osascript", &output));
        }
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        tracing::debug!("osascript returned: {}", stdout);
        Ok(stdout)
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

fn notify_script(title: &str, message: &str, timeout: Duration) -> String {
    format!(
        "try\n\
         display dialog \"{message}\" with title \"{title}\" \
         buttons {{\"{IGNORE_BUTTON}\", \"{OPEN_BUTTON}\"}} \
         default button \"{OPEN_BUTTON}\" cancel button \"{IGNORE_BUTTON}\" \
         giving up after {secs}\n\
         on error number -128\n\
         return \"button returned:{IGNORE_BUTTON}, gave up:false\"\n\
         end try",
        message = escape(message),
        title = escape(title),
        secs = timeout.as_secs().max(1),
    )
}

fn dialog_script(title: &str, message: &str) -> String {
    format!(
        "try\n\
         display dialog \"{message}\" with title \"{title}\" \
         default answer \"\" buttons {{\"{CLOSE_BUTTON}\", \"{SEND_BUTTON}\"}} \
         default button \"{SEND_BUTTON}\" cancel button \"{CLOSE_BUTTON}\"\n\
         on error number -128\n\
         return \"button returned:{CLOSE_BUTTON}, text returned:\"\n\
         end try",
        message = escape(message),
        title = escape(title),
    )
}

fn button_returned(output: &str) -> &str {
    output
        .split(", ")
        .find_map(|field| field.strip_prefix("button returned:"))
        .unwrap_or("")
}

fn parse_notify(output: &str) -> bool {
    !output.contains("gave up:true") && button_returned(output) == OPEN_BUTTON
}

fn parse_dialog(output: &str) -> DialogResponse {
    if button_returned(output) != SEND_BUTTON {
        return DialogResponse::declined();
    }
    // The typed text is the last field and may itself contain ", ".
    let text = output
        .split_once("text returned:")
        .map(|(_, text)| text)
        .unwrap_or("");
    DialogResponse::submitted(text)
}

#[async_trait]
impl Presenter for OsascriptPresenter {
    fn name(&self) -> &str {
        NAME
    }

    async fn notify(&self, message: &str, timeout: Duration) -> Result<bool, PresenterError> {
        let output = self.run(notify_script(&self.title, message, timeout)).await?;
        Ok(parse_notify(&output))
    }

    async fn dialog(&self, message: &str) -> Result<DialogResponse, PresenterError> {
        let output = self.run(dialog_script(&self.title, message)).await?;
        Ok(parse_dialog(&output))
    }
}
