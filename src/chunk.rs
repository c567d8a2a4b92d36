//! Paragraph/line-boundary segmenter for rule manuals.
//!
//! Splits raw document text into [`Chunk`]s no longer than `max_chars`.
//! Splitting happens on blank-line paragraph boundaries first, then on line
//! boundaries inside over-long paragraphs, so chunks stay readable. Fragments
//! shorter than `min_chars` (page numbers, headings, PDF debris) are dropped.

use crate::models::Chunk;

/// Segment `text` into chunks for `jurisdiction`, numbering them from `start_index`.
pub fn chunk_text(
    jurisdiction: &str,
    text: &str,
    start_index: usize,
    min_chars: usize,
    max_chars: usize,
) -> Vec<Chunk> {
    let mut pieces: Vec<String> = Vec::new();

    for para in split_paragraphs(text) {
        let joined = join_lines(&para);
        if joined.len() <= max_chars {
            pieces.push(joined);
            continue;
        }

        // Group lines greedily up to max_chars
        let mut current = String::new();
        for line in &para {
            let would_be = if current.is_empty() {
                line.len()
            } else {
                current.len() + 1 + line.len()
            };
            if would_be > max_chars && !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            if line.len() > max_chars {
                pieces.extend(hard_split(line, max_chars));
                continue;
            }
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(line);
        }
        if !current.is_empty() {
            pieces.push(current);
        }
    }

    pieces
        .into_iter()
        .filter(|p| p.chars().count() >= min_chars)
        .enumerate()
        .map(|(i, p)| Chunk::new(jurisdiction, start_index + i, &p))
        .collect()
}

/// Blank-line separated paragraphs, each as its trimmed non-empty lines.
fn split_paragraphs(text: &str) -> Vec<Vec<&str>> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if !current.is_empty() {
                paragraphs.push(std::mem::take(&mut current));
            }
        } else {
            current.push(trimmed);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current);
    }
    paragraphs
}

fn join_lines(lines: &[&str]) -> String {
    lines.join(" ")
}

/// Split a single over-long line at word boundaries.
fn hard_split(line: &str, max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut remaining = line;
    while !remaining.is_empty() {
        if remaining.len() <= max_chars {
            out.push(remaining.trim().to_string());
            break;
        }
        let mut split_at = max_chars;
        while !remaining.is_char_boundary(split_at) {
            split_at -= 1;
        }
        let actual = remaining[..split_at]
            .rfind(' ')
            .map(|pos| pos + 1)
            .filter(|pos| *pos > 1)
            .unwrap_or(split_at);
        out.push(remaining[..actual].trim().to_string());
        remaining = &remaining[actual..];
    }
    out.retain(|p| !p.is_empty());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHOOL: &str =
        "The speed limit in a school zone is 20 mph when children are present or signs flash.";
    const HYDRANT: &str =
        "You must not park within 15 feet of a fire hydrant under any circumstances at all.";

    #[test]
    fn test_paragraphs_become_chunks() {
        let text = format!("{}\n\n{}", SCHOOL, HYDRANT);
        let chunks = chunk_text("washington", &text, 0, 50, 600);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, SCHOOL);
        assert_eq!(chunks[1].text, HYDRANT);
        assert_eq!(chunks[1].jurisdiction, "washington");
    }

    #[test]
    fn test_short_fragments_discarded() {
        let text = format!("Page 12\n\n{}\n\nChapter 3", SCHOOL);
        let chunks = chunk_text("washington", &text, 0, 50, 600);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn test_wrapped_lines_are_joined() {
        let text = "The speed limit in a school zone is 20 mph\nwhen children are present.";
        let chunks = chunk_text("washington", text, 0, 20, 600);
        assert_eq!(chunks.len(), 1);
        assert_eq!(
            chunks[0].text,
            "The speed limit in a school zone is 20 mph when children are present."
        );
    }

    #[test]
    fn test_long_paragraph_split_on_lines() {
        let text = format!("{}\n{}\n{}", SCHOOL, HYDRANT, SCHOOL);
        let chunks = chunk_text("washington", &text, 0, 50, 120);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.text.len() <= 120);
        }
    }

    #[test]
    fn test_overlong_line_hard_split() {
        let line = "word ".repeat(100);
        let chunks = chunk_text("washington", &line, 0, 10, 60);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.text.len() <= 60, "chunk too long: {}", c.text.len());
            assert!(!c.text.ends_with(' '));
        }
    }

    #[test]
    fn test_indices_contiguous_from_start() {
        let text = (0..10)
            .map(|i| format!("{} Rule number {}.", SCHOOL, i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text("washington", &text, 7, 50, 600);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index, 7 + i);
        }
    }

    #[test]
    fn test_normalized_is_lowercase() {
        let chunks = chunk_text("washington", SCHOOL, 0, 10, 600);
        assert_eq!(chunks[0].normalized, SCHOOL.to_lowercase());
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(chunk_text("washington", "", 0, 50, 600).is_empty());
    }
}
