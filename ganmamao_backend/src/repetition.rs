//! Repetition guard for generated character lines.

use crate::actions::strip_action;

const IGNORED_CHARS: [char; 11] = ['，', '。', '！', '？', '、', ',', '.', '!', '?', '~', ' '];

/// Canonical form used for comparing replies: annotations, punctuation and
/// all whitespace removed, lower-cased.
pub fn normalize_for_compare(text: &str) -> String {
    strip_action(text)
        .chars()
        .filter(|ch| !ch.is_whitespace() && !IGNORED_CHARS.contains(ch))
        .collect::<String>()
        .to_lowercase()
}

/// A candidate repeats when its normalized form equals, contains, or is
/// contained in the normalized form of any recent reply.
pub fn is_repetitive(candidate: &str, recent: &[String]) -> bool {
    if candidate.is_empty() || recent.is_empty() {
        return false;
    }
    let cand = normalize_for_compare(candidate);
    if cand.is_empty() {
        return false;
    }

    recent.iter().any(|item| {
        let reference = normalize_for_compare(item);
        !reference.is_empty()
            && (cand == reference || reference.contains(&cand) || cand.contains(&reference))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recent(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalization_drops_annotation_punctuation_and_case() {
        assert_eq!(normalize_for_compare("干嘛？ Meow!(挠头)"), "干嘛meow");
        assert_eq!(normalize_for_compare("干嘛，~ 喵。"), "干嘛喵");
    }

    #[test]
    fn normalization_is_idempotent() {
        for text in [
            "干嘛呀……本喵抱着冰红茶发呆喵~",
            "Hello, World!(wave)",
            "((a)b)c) d",
            "",
            "  ~~ ",
            "a\t.",
            "干嘛\n。",
            "喵 \r\n!",
        ] {
            let once = normalize_for_compare(text);
            assert_eq!(normalize_for_compare(&once), once);
        }
    }

    #[test]
    fn whitespace_next_to_punctuation_is_dropped() {
        assert_eq!(normalize_for_compare("a\t."), "a");
        assert_eq!(normalize_for_compare("干嘛\n。"), "干嘛");
        assert_eq!(normalize_for_compare("干\t嘛"), "干嘛");
    }

    #[test]
    fn exact_repeat_ignoring_punctuation_is_detected() {
        assert!(is_repetitive("干嘛，叫我？", &recent(&["干嘛叫我(甩尾巴)"])));
    }

    #[test]
    fn containment_counts_in_both_directions() {
        let short = "干嘛叫我";
        let long = "干嘛叫我，我又穷又笨嘛~";
        assert!(is_repetitive(short, &recent(&[long])));
        assert!(is_repetitive(long, &recent(&[short])));
    }

    #[test]
    fn distinct_reply_passes() {
        assert!(!is_repetitive(
            "干嘛，本喵在晒太阳",
            &recent(&["干嘛叫我，我又穷又笨嘛~", "干嘛呀……发呆中"])
        ));
    }

    #[test]
    fn empty_inputs_are_never_repetitive() {
        assert!(!is_repetitive("", &recent(&["干嘛"])));
        assert!(!is_repetitive("干嘛", &[]));
        assert!(!is_repetitive("(只是动作)", &recent(&["干嘛"])));
        assert!(!is_repetitive("干嘛", &recent(&["", "。。。"])));
    }
}
