//! Action annotations: the parenthetical stage directions attached to a
//! character line, e.g. `干嘛？(伸懒腰)`.

use rand::seq::SliceRandom;
use rand::Rng;

pub const DEFAULT_ACTION: &str = "扶正牛仔帽";

fn is_open(ch: char) -> bool {
    ch == '(' || ch == '（'
}

fn is_close(ch: char) -> bool {
    ch == ')' || ch == '）'
}

/// Remove every parenthesised span from `text`.
///
/// Nesting is depth-counted and the depth never goes negative, so a stray
/// closing parenthesis is simply dropped. Text without both an opening and a
/// closing parenthesis is only trimmed.
pub fn strip_action(text: &str) -> String {
    if !text.chars().any(is_open) || !text.chars().any(is_close) {
        return text.trim().to_string();
    }

    let mut kept = String::with_capacity(text.len());
    let mut depth: usize = 0;
    for ch in text.chars() {
        if is_open(ch) {
            depth += 1;
            continue;
        }
        if is_close(ch) {
            depth = depth.saturating_sub(1);
            continue;
        }
        if depth == 0 {
            kept.push(ch);
        }
    }
    kept.trim().to_string()
}

/// Pick one action uniformly from the non-blank entries of `actions`,
/// falling back to `fallback` when there are none. Returns `None` only when
/// the fallback itself is blank.
pub fn pick_action<'a, R: Rng + ?Sized>(
    actions: &'a [String],
    fallback: &'a str,
    rng: &mut R,
) -> Option<&'a str> {
    let candidates: Vec<&str> = actions
        .iter()
        .map(String::as_str)
        .filter(|action| !action.trim().is_empty())
        .collect();

    match candidates.choose(rng) {
        Some(action) => Some(*action),
        None if fallback.trim().is_empty() => None,
        None => Some(fallback),
    }
}

pub fn attach_action(reply: &str, action: Option<&str>) -> String {
    match action {
        Some(action) if !action.is_empty() => format!("{reply}({action})"),
        _ => reply.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn strips_nested_and_unbalanced_annotations() {
        assert_eq!(strip_action("干嘛？(伸懒腰)"), "干嘛？");
        assert_eq!(strip_action("干嘛(外(里)外)呀"), "干嘛呀");
        assert_eq!(strip_action("干嘛) 呀(尾巴"), "干嘛 呀");
        assert_eq!(strip_action("干嘛（打哈欠）喵"), "干嘛喵");
    }

    #[test]
    fn text_without_both_parens_is_only_trimmed() {
        assert_eq!(strip_action("  干嘛(  "), "干嘛(");
        assert_eq!(strip_action("no annotation "), "no annotation");
    }

    #[test]
    fn attach_then_strip_returns_reply() {
        let reply = "干嘛呀，本喵在晒太阳";
        for action in ["伸懒腰", "扶正牛仔帽", "a b c"] {
            let attached = attach_action(reply, Some(action));
            assert_eq!(attached, format!("{reply}({action})"));
            assert_eq!(strip_action(&attached), reply);
        }
    }

    #[test]
    fn attach_skips_missing_action() {
        assert_eq!(attach_action("干嘛", None), "干嘛");
        assert_eq!(attach_action("干嘛", Some("")), "干嘛");
    }

    #[test]
    fn pick_prefers_non_blank_entries() {
        let mut rng = StdRng::seed_from_u64(7);
        let actions = vec!["".to_string(), "  ".to_string(), "舔爪子".to_string()];
        for _ in 0..16 {
            assert_eq!(pick_action(&actions, DEFAULT_ACTION, &mut rng), Some("舔爪子"));
        }
    }

    #[test]
    fn pick_falls_back_when_list_is_empty_or_blank() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_eq!(pick_action(&[], DEFAULT_ACTION, &mut rng), Some(DEFAULT_ACTION));
        let blanks = vec!["".to_string(), " ".to_string()];
        assert_eq!(pick_action(&blanks, DEFAULT_ACTION, &mut rng), Some(DEFAULT_ACTION));
        assert_eq!(pick_action(&blanks, "", &mut rng), None);
    }
}
