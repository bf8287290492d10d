use anyhow::{Context, Result};
use ganmamao_backend::config::AppConfig;
use ganmamao_backend::context::{avoid_text, build_history_context, recent_character_replies};
use ganmamao_backend::llm_client::LlmClient;
use ganmamao_backend::log_store::{compact_if_needed, open_log_store, CompactionOutcome};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: ganmamao_backend [context|compact|init-config]

  context       print the history and avoid-text the next greeting would see
  compact       fold the oldest log rows into a summary if the log is over its limit
  init-config   write a default config file if none exists yet";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,ganmamao_backend=debug")),
        )
        .init();

    let command = std::env::args().nth(1).unwrap_or_else(|| "context".to_string());
    if matches!(command.as_str(), "help" | "-h" | "--help") {
        println!("{USAGE}");
        return Ok(());
    }
    if command == "init-config" {
        let path = AppConfig::config_path();
        if path.exists() {
            println!("config already exists at {}", path.display());
        } else {
            AppConfig::default().save_to(&path)?;
            println!("wrote {}; set model_path before starting", path.display());
        }
        return Ok(());
    }

    let config = AppConfig::load().context("invalid configuration")?;
    let store = open_log_store(config.log.backend, &config.log_path())
        .context("failed to open log store")?;

    match command.as_str() {
        "context" => {
            let records = store.read_all()?;
            let history = &config.history;
            let recent = recent_character_replies(&records, history.max_turns * 2);
            println!("records: {}", records.len());
            println!("--- history ---");
            println!(
                "{}",
                build_history_context(&records, history.max_turns, history.max_chars)
            );
            println!("--- avoid ---");
            println!("{}", avoid_text(&recent));
            Ok(())
        }
        "compact" => {
            let client = LlmClient::new(
                config.llm_api_url.clone(),
                config.llm_api_key.clone(),
                config.resolve_model()?,
            )?
            .with_temperature(config.temperature);

            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start runtime")?;
            let outcome = rt.block_on(compact_if_needed(
                store.as_ref(),
                config.log.max_records,
                config.log.compress_batch,
                &client,
            ))?;
            match outcome {
                CompactionOutcome::Skipped { len } => println!(
                    "log has {} rows (limit {}), nothing to do",
                    len, config.log.max_records
                ),
                CompactionOutcome::Compacted { before, after } => {
                    println!("compacted {} -> {} rows", before, after)
                }
            }
            Ok(())
        }
        other => anyhow::bail!("unknown command '{}'\n{}", other, USAGE),
    }
}
