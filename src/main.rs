mod ui;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use ganmamao_backend::config::AppConfig;
use ganmamao_backend::runtime::GanmamaoRuntime;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ganmamao=debug,ganmamao_backend=debug")),
        )
        .init();

    let once = std::env::args().skip(1).any(|arg| arg == "--once");

    tracing::info!("干嘛猫 starting...");

    let config = AppConfig::load().context("invalid configuration")?;
    let presenter = ui::build_presenter_chain(&config.dialog, &config.persona.name);
    let mut runtime = GanmamaoRuntime::bootstrap(config, Box::new(presenter))
        .context("failed to bootstrap runtime")?;

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;

    let result = rt.block_on(async {
        if once {
            let report = runtime.run_once().await?;
            tracing::info!(
                "Single cycle finished: {:?} after {} turn(s)",
                report.end,
                report.turns
            );
            Ok::<(), anyhow::Error>(())
        } else {
            runtime.run_forever().await
        }
    });
    // Don't wait on helper processes or reads still in flight.
    rt.shutdown_background();
    result
}
