//! One conversation cycle: greet, wait for the user, keep replying until they
//! walk away, then compact the log.
//!
//! The cycle is an explicit state machine. `TurnEngine::step` performs one
//! transition; `run_cycle` drives it from `Start` to `End`.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::actions::{attach_action, pick_action};
use crate::config::{AppConfig, PersonaConfig};
use crate::context::{
    avoid_text, build_history_context, build_session_context, recent_character_replies,
    SessionEntry, NONE_SENTINEL,
};
use crate::llm_client::{Generator, Summarizer};
use crate::log_store::{
    compact_if_needed, CompactionError, CompactionOutcome, Direction, LogStore, LogStoreError,
};
use crate::presenter::{DialogResponse, Presenter, PresenterError};
use crate::prompt::{build_chat_prompt, clean_reply, PromptInput, Stage};
use crate::repetition::is_repetitive;

pub const NOTE_IGNORED: &str = "用户未点击通知";
pub const NOTE_DECLINED: &str = "用户关闭弹窗";
pub const NOTE_EMPTY_INPUT: &str = "用户未输入内容";
pub const NOTE_REPETITION: &str = "回复重复，重试已用尽";

/// Tunables for a cycle, resolved once from the app config.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub role_prompt: String,
    pub persona: PersonaConfig,
    pub actions: Vec<String>,
    pub max_retries: usize,
    pub max_tokens: u32,
    pub max_turns: usize,
    pub max_chars: usize,
    pub include_persisted: bool,
    pub max_records: usize,
    pub compress_batch: usize,
    pub cooldown: Duration,
    pub notification_timeout: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig, role_prompt: String) -> Self {
        Self {
            role_prompt,
            persona: config.persona.clone(),
            actions: config.actions.clone(),
            max_retries: config.generation.max_retries,
            max_tokens: config.generation.max_tokens,
            max_turns: config.history.max_turns,
            max_chars: config.history.max_chars,
            include_persisted: config.history.include_persisted,
            max_records: config.log.max_records,
            compress_batch: config.log.compress_batch,
            cooldown: Duration::from_secs(config.dialog.cooldown_seconds),
            notification_timeout: Duration::from_secs(config.dialog.notification_timeout_seconds),
        }
    }
}

/// Why a cycle stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleEnd {
    /// The opening notification was never acknowledged.
    Ignored,
    /// The user closed the input dialog.
    Declined,
    /// The user submitted the dialog without typing anything.
    EmptyInput,
}

impl CycleEnd {
    /// The `system` row recorded for this ending.
    pub fn note(self) -> &'static str {
        match self {
            CycleEnd::Ignored => NOTE_IGNORED,
            CycleEnd::Declined => NOTE_DECLINED,
            CycleEnd::EmptyInput => NOTE_EMPTY_INPUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleState {
    Start,
    GenerateValidate {
        user_text: Option<String>,
        action: Option<String>,
    },
    AttachPersist {
        reply: String,
        action: Option<String>,
    },
    AwaitResponse {
        message: String,
        first_turn: bool,
    },
    Branch(DialogResponse),
    End(CycleEnd),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub end: CycleEnd,
    /// Character lines shown during the cycle.
    pub turns: usize,
    /// `None` when the summarizer failed and compaction was skipped.
    pub compaction: Option<CompactionOutcome>,
}

#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error(transparent)]
    Log(#[from] LogStoreError),
    #[error("generation failed: {0:#}")]
    Generation(anyhow::Error),
    #[error(transparent)]
    Presentation(#[from] PresenterError),
}

impl CycleError {
    /// Log failures stop the driver; everything else only loses this cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CycleError::Log(_))
    }
}

pub struct TurnEngine {
    store: Arc<dyn LogStore>,
    generator: Arc<dyn Generator>,
    summarizer: Arc<dyn Summarizer>,
    presenter: Box<dyn Presenter>,
    settings: EngineSettings,
    rng: StdRng,
    session: Vec<SessionEntry>,
    turns: usize,
}

impl TurnEngine {
    pub fn new(
        store: Arc<dyn LogStore>,
        generator: Arc<dyn Generator>,
        summarizer: Arc<dyn Summarizer>,
        presenter: Box<dyn Presenter>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            generator,
            summarizer,
            presenter,
            settings,
            rng: StdRng::from_entropy(),
            session: Vec::new(),
            turns: 0,
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn session(&self) -> &[SessionEntry] {
        &self.session
    }

    fn next_action(&mut self) -> Option<String> {
        pick_action(
            &self.settings.actions,
            &self.settings.persona.fallback_action,
            &mut self.rng,
        )
        .map(str::to_string)
    }

    /// Run one cycle from greeting to compaction.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        self.session.clear();
        self.turns = 0;

        let mut state = CycleState::Start;
        let end = loop {
            if let CycleState::End(end) = state {
                break end;
            }
            state = self.step(state).await?;
        };

        let compaction = match compact_if_needed(
            self.store.as_ref(),
            self.settings.max_records,
            self.settings.compress_batch,
            self.summarizer.as_ref(),
        )
        .await
        {
            Ok(outcome) => Some(outcome),
            Err(CompactionError::Store(err)) => return Err(err.into()),
            Err(err @ CompactionError::Summarizer(_)) => {
                tracing::warn!("Skipping log compaction: {}", err);
                None
            }
        };

        tracing::info!("Cycle ended ({:?}) after {} turn(s)", end, self.turns);
        Ok(CycleReport {
            end,
            turns: self.turns,
            compaction,
        })
    }

    /// Perform a single transition.
    pub async fn step(&mut self, state: CycleState) -> Result<CycleState, CycleError> {
        match state {
            CycleState::Start => Ok(CycleState::GenerateValidate {
                user_text: None,
                action: self.next_action(),
            }),
            CycleState::GenerateValidate { user_text, action } => {
                let reply = self
                    .generate_reply(user_text.as_deref(), action.as_deref())
                    .await?;
                Ok(CycleState::AttachPersist { reply, action })
            }
            CycleState::AttachPersist { reply, action } => {
                let message = attach_action(&reply, action.as_deref());
                self.store.append(Direction::Character, &message)?;
                self.session.push(SessionEntry::character(reply));
                self.turns += 1;
                Ok(CycleState::AwaitResponse {
                    message,
                    first_turn: self.turns == 1,
                })
            }
            CycleState::AwaitResponse {
                message,
                first_turn,
            } => {
                if first_turn {
                    let acknowledged = self
                        .presenter
                        .notify(&message, self.settings.notification_timeout)
                        .await;
                    if !self.settle(acknowledged)? {
                        return self.finish(CycleEnd::Ignored);
                    }
                }
                let response = self.presenter.dialog(&message).await;
                Ok(CycleState::Branch(self.settle(response)?))
            }
            CycleState::Branch(response) => {
                if !response.submitted {
                    let next = self.finish(CycleEnd::Declined)?;
                    if !self.settings.cooldown.is_zero() {
                        tokio::time::sleep(self.settings.cooldown).await;
                    }
                    return Ok(next);
                }
                let text = response.text.trim();
                if text.is_empty() {
                    return self.finish(CycleEnd::EmptyInput);
                }
                self.store.append(Direction::User, text)?;
                self.session.push(SessionEntry::user(text));
                Ok(CycleState::GenerateValidate {
                    user_text: Some(text.to_string()),
                    action: self.next_action(),
                })
            }
            CycleState::End(end) => Ok(CycleState::End(end)),
        }
    }

    /// Record any presenter fallbacks as `system` rows, then unwrap the result.
    fn settle<T>(&self, result: Result<T, PresenterError>) -> Result<T, CycleError> {
        for note in self.presenter.take_notes() {
            self.store.append(Direction::System, &note)?;
        }
        Ok(result?)
    }

    fn finish(&self, end: CycleEnd) -> Result<CycleState, CycleError> {
        self.store.append(Direction::System, end.note())?;
        Ok(CycleState::End(end))
    }

    /// Generate until a candidate is not a near-copy of a recent reply, or
    /// the retry budget runs out, in which case the last candidate wins.
    async fn generate_reply(
        &self,
        user_text: Option<&str>,
        action: Option<&str>,
    ) -> Result<String, CycleError> {
        let settings = &self.settings;
        let records = self.store.read_all()?;
        let recent = recent_character_replies(&records, settings.max_turns * 2);
        let avoid = avoid_text(&recent);
        let history = build_session_context(&self.session, settings.max_turns, settings.max_chars);
        let memory = settings
            .include_persisted
            .then(|| build_history_context(&records, settings.max_turns, settings.max_chars));
        let stage = if self.session.is_empty() {
            Stage::NewConversation
        } else {
            Stage::Continuing
        };

        let prompt = build_chat_prompt(
            &PromptInput {
                role_prompt: &settings.role_prompt,
                user_text: user_text.unwrap_or(""),
                behavior: action.unwrap_or(NONE_SENTINEL),
                history_text: &history,
                avoid_text: &avoid,
                memory_text: memory.as_deref(),
                stage,
            },
            &settings.persona,
        );

        let attempts = settings.max_retries.max(1);
        let mut candidate = String::new();
        for attempt in 1..=attempts {
            let raw = self
                .generator
                .generate(&prompt, settings.max_tokens)
                .await
                .map_err(CycleError::Generation)?;
            candidate = clean_reply(&raw, &settings.persona);
            if !is_repetitive(&candidate, &recent) {
                return Ok(candidate);
            }
            tracing::warn!(
                "Candidate repeats a recent reply (attempt {}/{}): {}",
                attempt,
                attempts,
                candidate
            );
        }
        tracing::warn!("Retry budget exhausted, keeping last candidate");
        self.store.append(Direction::System, NOTE_REPETITION)?;
        Ok(candidate)
    }
}
