use std::io::{self, BufRead, Write};
use std::time::Duration;

use async_trait::async_trait;
use ganmamao_backend::presenter::{DialogResponse, Presenter, PresenterError};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver};
use tokio::sync::Mutex;

const NAME: &str = "terminal";
/// Typing this closes the dialog, like the close button does.
const CLOSE_COMMAND: &str = "/bye";

type LineReceiver = UnboundedReceiver<io::Result<String>>;

/// Plain stdin/stdout fallback. EOF counts as closing the dialog.
///
/// Stdin is read on a dedicated thread, so a timed-out or cancelled wait never
/// leaves a blocking read behind inside the async runtime.
pub struct TerminalPresenter {
    title: String,
    lines: Mutex<Option<LineReceiver>>,
}

impl TerminalPresenter {
    pub fn new(title: &str) -> Self {
        Self {
            title: title.to_string(),
            lines: Mutex::new(None),
        }
    }

    #[cfg(test)]
    fn with_lines(title: &str, lines: LineReceiver) -> Self {
        Self {
            title: title.to_string(),
            lines: Mutex::new(Some(lines)),
        }
    }

    fn say(&self, line: &str) -> Result<(), PresenterError> {
        let mut stdout = io::stdout().lock();
        writeln!(stdout, "{line}")
            .and_then(|_| stdout.flush())
            .map_err(|e| PresenterError::failed(NAME, e.into()))
    }
}

/// Forward lines from `open()` to a channel until EOF, a read error, or the
/// receiver going away.
fn spawn_line_reader<R, F>(open: F) -> io::Result<LineReceiver>
where
    R: BufRead,
    F: FnOnce() -> R + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("terminal-input".to_string())
        .spawn(move || {
            for line in open().lines() {
                let failed = line.is_err();
                if tx.send(line).is_err() || failed {
                    break;
                }
            }
        })?;
    Ok(rx)
}

fn ensure_reader(slot: &mut Option<LineReceiver>) -> Result<&mut LineReceiver, PresenterError> {
    if slot.is_none() {
        let lines = spawn_line_reader(|| io::stdin().lock()).map_err(|e| {
            PresenterError::unavailable(NAME, format!("cannot start stdin reader: {e}"))
        })?;
        *slot = Some(lines);
    }
    slot.as_mut()
        .ok_or_else(|| PresenterError::unavailable(NAME, "stdin reader missing"))
}

/// Throw away lines typed while nobody was asking.
fn drain_stale(lines: &mut LineReceiver) -> usize {
    let mut dropped = 0;
    loop {
        match lines.try_recv() {
            Ok(_) => dropped += 1,
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return dropped,
        }
    }
}

fn to_response(line: Option<String>) -> DialogResponse {
    match line {
        None => DialogResponse::declined(),
        Some(text) if text.trim() == CLOSE_COMMAND => DialogResponse::declined(),
        Some(text) => DialogResponse::submitted(text),
    }
}

#[async_trait]
impl Presenter for TerminalPresenter {
    fn name(&self) -> &str {
        NAME
    }

    async fn notify(&self, message: &str, timeout: Duration) -> Result<bool, PresenterError> {
        let mut slot = self.lines.lock().await;
        let lines = ensure_reader(&mut slot)?;
        let stale = drain_stale(lines);
        if stale > 0 {
            tracing::debug!("Discarded {} stale terminal line(s)", stale);
        }

        self.say(&format!(
            "[{}] {}  (回车查看，{}秒后消失)",
            self.title,
            message,
            timeout.as_secs()
        ))?;
        match tokio::time::timeout(timeout, lines.recv()).await {
            Ok(Some(Ok(_))) => Ok(true),
            Ok(None) | Err(_) => Ok(false),
            Ok(Some(Err(e))) => Err(PresenterError::failed(NAME, e.into())),
        }
    }

    async fn dialog(&self, message: &str) -> Result<DialogResponse, PresenterError> {
        let mut slot = self.lines.lock().await;
        let lines = ensure_reader(&mut slot)?;

        self.say(&format!(
            "[{}] {}\n回复（{} 或 Ctrl+D 关闭）> ",
            self.title, message, CLOSE_COMMAND
        ))?;
        match lines.recv().await {
            Some(Ok(line)) => Ok(to_response(Some(line))),
            None => Ok(to_response(None)),
            Some(Err(e)) => Err(PresenterError::failed(NAME, e.into())),
        }
    }
}
