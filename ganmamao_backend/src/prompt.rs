//! Prompt assembly for the character line and for log summaries, plus
//! cleanup of raw model output.

use crate::actions::strip_action;
use crate::config::PersonaConfig;
use crate::context::NONE_SENTINEL;

const SCENARIOS_OPEN: &str = "scenarios = [";
const SCENARIOS_REPLACEMENT: &str = "动作示例：从场景中任选一句进行括号描写。";
const CONTROL_TOKENS: [&str; 3] = ["<|im_end|>", "<|im_start|>", "<|endoftext|>"];
const QUOTE_CHARS: [char; 8] = [' ', '\n', '\r', '\t', '"', '\'', '“', '”'];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// The unprompted greeting that opens a cycle.
    NewConversation,
    /// Any reply to user input within the same cycle.
    Continuing,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Stage::NewConversation => "新对话",
            Stage::Continuing => "连续对话",
        }
    }
}

/// Everything the character prompt is built from.
#[derive(Debug, Clone)]
pub struct PromptInput<'a> {
    pub role_prompt: &'a str,
    pub user_text: &'a str,
    pub behavior: &'a str,
    pub history_text: &'a str,
    pub avoid_text: &'a str,
    pub memory_text: Option<&'a str>,
    pub stage: Stage,
}

/// Collapse an inline `scenarios = [ ... ]` list in the role prompt into a
/// one-line instruction; the full list only wastes context.
pub fn sanitize_role_prompt(role_prompt: &str) -> String {
    if !role_prompt.contains(SCENARIOS_OPEN) {
        return role_prompt.to_string();
    }

    let mut cleaned: Vec<&str> = Vec::new();
    let mut skipping = false;
    for line in role_prompt.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(SCENARIOS_OPEN) {
            skipping = true;
            cleaned.push(SCENARIOS_REPLACEMENT);
            continue;
        }
        if skipping && trimmed.starts_with(']') {
            skipping = false;
            continue;
        }
        if !skipping {
            cleaned.push(line);
        }
    }
    cleaned.join("\n").trim().to_string()
}

pub fn build_chat_prompt(input: &PromptInput<'_>, persona: &PersonaConfig) -> String {
    let shown_user_text = match input.user_text.trim() {
        "" => NONE_SENTINEL,
        text => text,
    };
    let memory_section = input
        .memory_text
        .map(|memory| format!("长期记忆（摘要与过往对话）：\n{memory}\n\n"))
        .unwrap_or_default();
    let catchphrase = &persona.catchphrase;

    format!(
        "{role}\n\n\
         你现在要进行一次弹窗互动回应。\n\
         对话阶段：{stage}\n\
         当前行为：{behavior}\n\
         用户输入：{user}\n\n\
         {memory_section}\
         最近对话（供参考，避免重复）：\n{history}\n\n\
         不要复用以下句子或近似表达：\n{avoid}\n\n\
         要求：\n\
         1) 只输出一句话，不要加角色名、不要加前缀。\n\
         2) 必须保持{name}的视角，包含“{catchphrase}”。\n\
         3) 输出不超过{max_chars}字，短句口语化。\n\
         4) 必须回应用户输入，语气要贴合对话。\n\
         5) 若是连续对话，必须明确回应用户的话，最好复述用户输入中的关键词。\n\
         6) 不要讲道理，不要专业分析。\n\n\
         请输出一句话作为弹窗内容。",
        role = input.role_prompt,
        stage = input.stage.label(),
        behavior = input.behavior,
        user = shown_user_text,
        history = input.history_text,
        avoid = input.avoid_text,
        name = persona.name,
        max_chars = persona.max_reply_chars,
    )
}

pub fn build_summary_prompt(transcript: &str) -> String {
    format!(
        "你是一个记录员，请将下面的互动记录压缩为简短摘要，\
         要求保留发生过的关键事件、用户偏好和情绪变化。\
         输出不超过60字。\n\n{transcript}"
    )
}

fn strip_speaker_prefix<'a>(text: &'a str, prefixes: &[String]) -> &'a str {
    for prefix in prefixes {
        let matches = text
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false);
        if matches {
            return text[prefix.len()..].trim();
        }
    }
    text
}

fn speaker_prefixes(persona: &PersonaConfig) -> Vec<String> {
    let mut names = vec!["cat".to_string(), "猫".to_string()];
    if !persona.name.trim().is_empty() {
        names.push(persona.name.trim().to_string());
    }
    names
        .iter()
        .flat_map(|name| {
            [",", ":", "，", "："]
                .iter()
                .map(move |sep| format!("{name}{sep}"))
        })
        .collect()
}

/// Turn raw model output into a single displayable line.
pub fn clean_reply(raw: &str, persona: &PersonaConfig) -> String {
    let mut cleaned = raw.to_string();
    for token in CONTROL_TOKENS {
        cleaned = cleaned.replace(token, "");
    }
    let cleaned = strip_speaker_prefix(cleaned.trim(), &speaker_prefixes(persona))
        .replace("`(", "(")
        .replace(")`", ")");
    let mut cleaned = strip_action(&cleaned)
        .trim_matches(|ch| QUOTE_CHARS.contains(&ch))
        .to_string();

    if !persona.catchphrase.is_empty() && !cleaned.contains(persona.catchphrase.as_str()) {
        cleaned = format!("{}{}", persona.catchphrase_prefix, cleaned);
    }
    if persona.max_reply_chars > 0 && cleaned.chars().count() > persona.max_reply_chars {
        cleaned = cleaned.chars().take(persona.max_reply_chars).collect();
    }
    cleaned
}
