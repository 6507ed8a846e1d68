use regex::Regex;
use std::sync::LazyLock;

pub const BULLET: char = '•';

static BULLET_ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"•([^•]*)").expect("bullet pattern compiles"));

/// Strips markdown emphasis from an answer and puts every bullet item
/// (including `• label:` items) on its own line.
pub fn clean_answer(raw: &str) -> String {
    let text = raw.replace("***", "").replace("**", "").replace('*', "•");

    let text = BULLET_ITEM.replace_all(&text, |caps: &regex::Captures<'_>| {
        let item = caps[1].trim();
        if item.is_empty() {
            // a closing emphasis marker, not an item
            String::new()
        } else {
            format!("\n{BULLET} {item}")
        }
    });

    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Lazily yields every non-empty prefix of `text`, one character longer each
/// time, ending with `text` itself.
pub fn reveal_frames(text: &str) -> RevealFrames<'_> {
    RevealFrames {
        text,
        ends: text.char_indices(),
    }
}

pub struct RevealFrames<'a> {
    text: &'a str,
    ends: std::str::CharIndices<'a>,
}

impl<'a> Iterator for RevealFrames<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, ch) = self.ends.next()?;
        self.text.get(..start + ch.len_utf8())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.ends.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headline_example_loses_asterisks_and_bullets_today() {
        let cleaned = clean_answer("**Headline** happened *today*");
        assert!(!cleaned.contains('*'));
        assert_eq!(cleaned, "Headline happened\n• today");
        let last_line = cleaned.lines().last().unwrap();
        assert!(last_line.starts_with("• today"));
    }

    #[test]
    fn strips_triple_and_double_markers_before_bullets() {
        assert_eq!(clean_answer("***Breaking*** news"), "Breaking news");
        assert_eq!(clean_answer("**bold** only"), "bold only");
    }

    #[test]
    fn label_items_start_on_their_own_line() {
        let cleaned = clean_answer("Summary: * Markets: up * Weather: rain");
        assert_eq!(cleaned, "Summary:\n• Markets: up\n• Weather: rain");
    }

    #[test]
    fn leading_bullet_does_not_leave_blank_first_line() {
        assert_eq!(clean_answer("* one\n* two"), "• one\n• two");
    }

    #[test]
    fn frames_are_strictly_growing_prefixes() {
        let cleaned = clean_answer("**Headline** happened *today*");
        let frames: Vec<&str> = reveal_frames(&cleaned).collect();

        assert_eq!(frames.len(), cleaned.chars().count());
        assert_eq!(*frames.last().unwrap(), cleaned);
        for pair in frames.windows(2) {
            assert!(pair[1].starts_with(pair[0]));
            assert!(pair[1].len() > pair[0].len());
        }
        for frame in &frames {
            assert!(cleaned.starts_with(frame));
        }
    }

    #[test]
    fn empty_text_has_no_frames() {
        assert_eq!(reveal_frames("").count(), 0);
    }
}
