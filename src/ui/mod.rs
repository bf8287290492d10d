//! Desktop presenters: native dialogs where the platform has them, the
//! terminal everywhere else.

pub mod osascript;
pub mod terminal;
pub mod zenity;

use std::io;
use std::process::Output;

use ganmamao_backend::config::DialogConfig;
use ganmamao_backend::presenter::{Presenter, PresenterChain, PresenterError};

use osascript::OsascriptPresenter;
use terminal::TerminalPresenter;
use zenity::ZenityPresenter;

/// Build the configured presenters in order. The terminal presenter is
/// always last so there is somewhere to talk.
pub fn build_presenter_chain(config: &DialogConfig, title: &str) -> PresenterChain {
    let mut presenters: Vec<Box<dyn Presenter>> = Vec::new();
    let mut has_terminal = false;

    for name in &config.backends {
        match name.trim().to_ascii_lowercase().as_str() {
            "osascript" => presenters.push(Box::new(OsascriptPresenter::new(title))),
            "zenity" => presenters.push(Box::new(ZenityPresenter::new(title))),
            "terminal" => {
                if !has_terminal {
                    presenters.push(Box::new(TerminalPresenter::new(title)));
                    has_terminal = true;
                }
            }
            other => tracing::warn!("Unknown dialog backend '{}', skipping", other),
        }
    }

    if !has_terminal {
        presenters.push(Box::new(TerminalPresenter::new(title)));
    }

    let chain = PresenterChain::new(presenters);
    tracing::info!("Dialog backends: {}", chain.names().join(" -> "));
    chain
}

/// Run a helper program to completion. A missing binary means the backend is
/// unavailable here rather than broken.
pub(crate) async fn run_helper(
    presenter: &str,
    program: &str,
    args: &[String],
) -> Result<Output, PresenterError> {
    let result = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await;

    match result {
        Ok(output) => Ok(output),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(PresenterError::unavailable(
            presenter,
            format!("{} not found on PATH", program),
        )),
        Err(e) => Err(PresenterError::failed(
            presenter,
            anyhow::Error::new(e).context(format!("failed to run {}", program)),
        )),
    }
}

pub(crate) fn helper_failure(presenter: &str, program: &str, output: &Output) -> PresenterError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    PresenterError::failed(
        presenter,
        anyhow::anyhow!(
            "{} exited with {}: {}",
            program,
            output.status,
            stderr.trim()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_always_ends_with_terminal() {
        let config = DialogConfig {
            backends: vec!["zenity".to_string(), "carrier-pigeon".to_string()],
            ..DialogConfig::default()
        };
        let chain = build_presenter_chain(&config, "干嘛猫");
        assert_eq!(chain.names(), vec!["zenity", "terminal"]);
    }

    #[test]
    fn default_backends_keep_configured_order() {
        let chain = build_presenter_chain(&DialogConfig::default(), "干嘛猫");
        assert_eq!(chain.names(), vec!["osascript", "zenity", "terminal"]);
    }

    #[tokio::test]
    async fn missing_helper_is_unavailable() {
        let err = run_helper("test", "ganmamao-no-such-helper", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PresenterError::Unavailable { .. }));
    }
}
