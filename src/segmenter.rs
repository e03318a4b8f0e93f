//! Document segmentation - Stage 1 of the extraction pipeline
//!
//! Splits text into paragraphs on blank-line runs and into sentences on a
//! boundary heuristic that respects abbreviations, initials, decimal numbers
//! and trailing quotation marks. Every segment carries absolute half-open
//! offsets into the original document; segments cover the text in order with
//! no overlap.

use regex::Regex;
use std::sync::OnceLock;

use crate::error::{Error, Result};
use crate::types::Segment;

/// Title and common abbreviations that do not end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "st", "sr", "jr", "gen", "col", "capt", "lt", "vs", "etc",
    "inc", "ltd", "co", "fig", "al", "approx", "dept",
];

fn paragraph_break_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n[ \t]*\n+").expect("static regex"))
}

/// Sentence/paragraph segmenter.
///
/// Stateless; `segment` may be called any number of times and always
/// produces the same ordered sequence for the same text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Segmenter;

impl Segmenter {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Split `text` into ordered segments with absolute offsets.
    ///
    /// # Errors
    ///
    /// Returns `MalformedInput` if a computed boundary does not land on a
    /// character boundary of the text (unreachable with valid UTF-8).
    pub fn segment(&self, doc_id: &str, text: &str) -> Result<Vec<Segment>> {
        let mut segments = Vec::new();

        for (para_index, (para_start, para_end)) in paragraph_ranges(text).into_iter().enumerate() {
            let para = text
                .get(para_start..para_end)
                .ok_or_else(|| Error::MalformedInput("paragraph offsets collide".to_string()))?;

            for (sent_index, (rel_start, rel_end)) in sentence_ranges(para).into_iter().enumerate()
            {
                let start = para_start + rel_start;
                let end = para_start + rel_end;
                let sentence = text.get(start..end).ok_or_else(|| {
                    Error::MalformedInput("sentence offsets collide".to_string())
                })?;
                if sentence.trim().is_empty() {
                    continue;
                }
                segments.push(Segment {
                    doc_id: doc_id.to_string(),
                    paragraph_index: para_index,
                    sentence_index: sent_index,
                    start,
                    end,
                    text: sentence.to_string(),
                });
            }
        }

        Ok(segments)
    }

    /// True when the document has a blank-line paragraph break.
    #[must_use]
    pub fn has_paragraph_break(text: &str) -> bool {
        paragraph_break_re().is_match(text)
    }
}

/// Half-open paragraph ranges, splitting on blank-line runs.
fn paragraph_ranges(text: &str) -> Vec<(usize, usize)> {
    let mut ranges = Vec::new();
    let mut cursor = 0;

    for brk in paragraph_break_re().find_iter(text) {
        if brk.start() > cursor {
            ranges.push((cursor, brk.start()));
        }
        cursor = brk.end();
    }
    if cursor < text.len() {
        ranges.push((cursor, text.len()));
    }
    ranges
}

/// Half-open sentence ranges within one paragraph.
fn sentence_ranges(para: &str) -> Vec<(usize, usize)> {
    let bytes = para.as_bytes();
    let mut ranges = Vec::new();
    let mut start = 0;

    let mut iter = para.char_indices().peekable();
    while let Some((i, ch)) = iter.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        if ch == '.' && !is_boundary_period(para, i) {
            continue;
        }

        // Absorb runs of closing punctuation and quotes after the terminator
        let mut end = i + ch.len_utf8();
        while let Some(&(j, next)) = iter.peek() {
            if matches!(next, '"' | '\'' | '\u{201D}' | '\u{2019}' | ')' | ']' | '.' | '!' | '?') {
                end = j + next.len_utf8();
                iter.next();
            } else {
                break;
            }
        }

        // A boundary needs following whitespace (or paragraph end)
        let at_end = end >= bytes.len();
        let followed_by_space = para[end..].chars().next().is_some_and(char::is_whitespace);
        if at_end || followed_by_space {
            ranges.push((start, end));
            // Skip whitespace to the next sentence start
            start = end
                + para[end..]
                    .char_indices()
                    .find(|(_, c)| !c.is_whitespace())
                    .map_or(para.len() - end, |(k, _)| k);
        }
    }

    if start < para.len() && !para[start..].trim().is_empty() {
        ranges.push((start, para.len()));
    }
    ranges
}

/// Decide whether the period at byte `i` terminates a sentence.
fn is_boundary_period(para: &str, i: usize) -> bool {
    let before = &para[..i];

    // Decimal numbers: "3.14"
    let prev = before.chars().next_back();
    let next = para[i + 1..].chars().next();
    if prev.is_some_and(|c| c.is_ascii_digit()) && next.is_some_and(|c| c.is_ascii_digit()) {
        return false;
    }

    // Abbreviations and initials: "Dr.", "J. R. R. Tolkien"
    let last_word: String = before
        .chars()
        .rev()
        .take_while(|c| c.is_alphanumeric())
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    if last_word.len() == 1 && last_word.chars().all(char::is_uppercase) {
        return false;
    }
    if ABBREVIATIONS.contains(&last_word.to_lowercase().as_str()) {
        return false;
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sentence() {
        let segs = Segmenter::new().segment("d", "Aragorn married Arwen.").unwrap();
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].start, 0);
        assert_eq!(segs[0].end, 22);
        assert_eq!(segs[0].paragraph_index, 0);
        assert_eq!(segs[0].sentence_index, 0);
    }

    #[test]
    fn test_two_sentences_offsets() {
        let text = "Harry studied. He slept.";
        let segs = Segmenter::new().segment("d", text).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(&text[segs[0].start..segs[0].end], "Harry studied.");
        assert_eq!(&text[segs[1].start..segs[1].end], "He slept.");
        assert_eq!(segs[1].sentence_index, 1);
    }

    #[test]
    fn test_paragraph_split() {
        let text = "First paragraph here.\n\nSecond paragraph here.";
        let segs = Segmenter::new().segment("d", text).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].paragraph_index, 0);
        assert_eq!(segs[1].paragraph_index, 1);
        assert_eq!(segs[1].sentence_index, 0);
        assert!(Segmenter::has_paragraph_break(text));
    }

    #[test]
    fn test_abbreviation_not_boundary() {
        let text = "Dr. McGonagall taught Transfiguration. She was strict.";
        let segs = Segmenter::new().segment("d", text).unwrap();
        assert_eq!(segs.len(), 2);
        assert!(segs[0].text.starts_with("Dr. McGonagall"));
    }

    #[test]
    fn test_initials_not_boundary() {
        let text = "J. R. R. Tolkien wrote it.";
        let segs = Segmenter::new().segment("d", text).unwrap();
        assert_eq!(segs.len(), 1);
    }

    #[test]
    fn test_decimal_not_boundary() {
        let text = "The tower is 3.14 leagues tall. It leans.";
        let segs = Segmenter::new().segment("d", text).unwrap();
        assert_eq!(segs.len(), 2);
    }

    #[test]
    fn test_quote_absorbed() {
        let text = "\"Go home.\" Then he left.";
        let segs = Segmenter::new().segment("d", text).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].text, "\"Go home.\"");
    }

    #[test]
    fn test_empty_text() {
        let segs = Segmenter::new().segment("d", "").unwrap();
        assert!(segs.is_empty());
    }

    #[test]
    fn test_segments_cover_without_overlap() {
        let text = "One sentence. Two sentence. Three!\n\nFour? Five.";
        let segs = Segmenter::new().segment("d", text).unwrap();
        for pair in segs.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }
}
