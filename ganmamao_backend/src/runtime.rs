use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;

use crate::config::{AppConfig, TriggerConfig};
use crate::engine::{CycleError, CycleReport, EngineSettings, TurnEngine};
use crate::llm_client::LlmClient;
use crate::log_store::{open_log_store, LogStore};
use crate::presenter::Presenter;

/// Everything a running session needs, wired from the app config.
pub struct GanmamaoRuntime {
    pub config: AppConfig,
    pub store: Arc<dyn LogStore>,
    pub engine: TurnEngine,
}

impl GanmamaoRuntime {
    pub fn bootstrap(config: AppConfig, presenter: Box<dyn Presenter>) -> Result<Self> {
        let role_prompt = config.load_role_prompt()?;
        let model = config.resolve_model()?;

        let log_path = config.log_path();
        let store = open_log_store(config.log.backend, &log_path)
            .with_context(|| format!("failed to open log at {:?}", log_path))?;

        let client = Arc::new(
            LlmClient::new(config.llm_api_url.clone(), config.llm_api_key.clone(), model)?
                .with_temperature(config.temperature),
        );
        tracing::info!("Using model {} at {}", client.model(), config.llm_api_url);

        let settings = EngineSettings::from_config(&config, role_prompt);
        let engine = TurnEngine::new(
            store.clone(),
            client.clone(),
            client,
            presenter,
            settings,
        );

        Ok(Self {
            config,
            store,
            engine,
        })
    }

    /// Run a single cycle right away.
    pub async fn run_once(&mut self) -> Result<CycleReport> {
        self.engine
            .run_cycle()
            .await
            .context("conversation cycle failed")
    }

    /// Wait a random interval, run a cycle, repeat until Ctrl+C or a log
    /// failure.
    pub async fn run_forever(&mut self) -> Result<()> {
        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            let delay = next_delay(&self.config.trigger, &mut rand::thread_rng());
            tracing::info!("Next greeting in {}s", delay.as_secs());

            tokio::select! {
                signal = &mut shutdown => {
                    log_shutdown(signal);
                    return Ok(());
                }
                _ = tokio::time::sleep(delay) => {}
            }

            tokio::select! {
                signal = &mut shutdown => {
                    log_shutdown(signal);
                    return Ok(());
                }
                result = self.engine.run_cycle() => handle_cycle_result(result)?,
            }
        }
    }
}

fn log_shutdown(signal: std::io::Result<()>) {
    match signal {
        Ok(()) => tracing::info!("Ctrl+C received, shutting down"),
        Err(e) => tracing::warn!("Signal listener failed ({}), shutting down", e),
    }
}

fn handle_cycle_result(result: Result<CycleReport, CycleError>) -> Result<()> {
    match result {
        Ok(report) => {
            tracing::debug!("Cycle report: {:?}", report);
            Ok(())
        }
        Err(err) if err.is_fatal() => Err(err).context("log store failure, stopping"),
        Err(err) => {
            tracing::error!("Cycle aborted: {}", err);
            Ok(())
        }
    }
}

/// A uniformly random wait within the configured bounds (swapped if given in
/// reverse).
pub fn next_delay<R: Rng + ?Sized>(trigger: &TriggerConfig, rng: &mut R) -> Duration {
    let low = trigger.min_seconds.min(trigger.max_seconds);
    let high = trigger.min_seconds.max(trigger.max_seconds);
    Duration::from_secs(rng.gen_range(low..=high))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CycleEnd;
    use crate::log_store::LogStoreError;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn delay_stays_within_bounds() {
        let mut rng = StdRng::seed_from_u64(1);
        let trigger = TriggerConfig {
            min_seconds: 10,
            max_seconds: 20,
        };
        for _ in 0..100 {
            let delay = next_delay(&trigger, &mut rng).as_secs();
            assert!((10..=20).contains(&delay));
        }
    }

    #[test]
    fn reversed_bounds_are_swapped() {
        let mut rng = StdRng::seed_from_u64(2);
        let trigger = TriggerConfig {
            min_seconds: 30,
            max_seconds: 5,
        };
        let delay = next_delay(&trigger, &mut rng).as_secs();
        assert!((5..=30).contains(&delay));

        let fixed = TriggerConfig {
            min_seconds: 7,
            max_seconds: 7,
        };
        assert_eq!(next_delay(&fixed, &mut rng), Duration::from_secs(7));
    }

    #[test]
    fn only_log_failures_stop_the_loop() {
        let generation = Err(CycleError::Generation(anyhow::anyhow!("timeout")));
        assert!(handle_cycle_result(generation).is_ok());

        let log = Err(CycleError::Log(LogStoreError::Poisoned));
        assert!(handle_cycle_result(log).is_err());

        let ok = Ok(CycleReport {
            end: CycleEnd::Declined,
            turns: 1,
            compaction: None,
        });
        assert!(handle_cycle_result(ok).is_ok());
    }

    #[test]
    fn bootstrap_fails_without_model() {
        struct Silent;

        #[async_trait::async_trait]
        impl Presenter for Silent {
            fn name(&self) -> &str {
                "silent"
            }

            async fn notify(
                &self,
                _message: &str,
                _timeout: Duration,
            ) -> Result<bool, crate::presenter::PresenterError> {
                Ok(false)
            }

            async fn dialog(
                &self,
                _message: &str,
            ) -> Result<crate::presenter::DialogResponse, crate::presenter::PresenterError> {
                Ok(crate::presenter::DialogResponse::declined())
            }
        }

        let mut config = AppConfig::default();
        config.log.backend = crate::config::LogBackend::Memory;
        assert!(GanmamaoRuntime::bootstrap(config.clone(), Box::new(Silent)).is_err());

        config.model_path = Some("qwen2.5:7b".to_string());
        let runtime = GanmamaoRuntime::bootstrap(config, Box::new(Silent)).unwrap();
        assert_eq!(runtime.store.describe(), "memory");
    }
}
