//! C3 — splits a document body into ordered, bounded, heading-labeled
//! chunks.

use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_CHUNK_CHARS: usize = 6000;

const PRIORITY_HEADINGS: &[&str] = &[
    "current status",
    "next",
    "next steps",
    "blockers",
    "blocked by",
    "decisions",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub heading: Option<String>,
    pub heading_level: u8,
    pub content: String,
    pub chunk_order: usize,
    pub char_offset: usize,
    pub is_priority_heading: bool,
}

static HEADING_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^(#{1,2})\s+(.*)$").unwrap());

struct Section<'a> {
    heading: Option<&'a str>,
    heading_level: u8,
    /// Section text including its heading line, if any.
    text: &'a str,
    /// Offset of `text` within the full body.
    offset: usize,
}

/// Chunk `body` per the algorithm in the specification: split at level-1/2
/// headings, size-bound each section, and fall back to paragraph/line/hard
/// splitting for oversized sections.
pub fn chunk(body: &str) -> Vec<Chunk> {
    let sections = split_sections(body);
    let mut chunks = Vec::new();
    let mut order = 0usize;

    for section in sections {
        emit_section(&section, &mut chunks, &mut order);
    }

    // Every offset computed above is a byte offset into `body` (regex
    // match positions and `\n`-splits are always on single-byte ASCII, so
    // they land on valid char boundaries). Convert to a char count here so
    // `char_offset` means what callers (and the reassembly invariant) expect
    // for bodies containing multibyte characters.
    for c in &mut chunks {
        c.char_offset = body[..c.char_offset].chars().count();
    }

    chunks
}

fn split_sections(body: &str) -> Vec<Section<'_>> {
    let mut matches: Vec<(usize, u8, &str)> = HEADING_LINE
        .captures_iter(body)
        .map(|c| {
            let m = c.get(0).unwrap();
            let level = c[1].len() as u8;
            let text = c[2].trim();
            (m.start(), level, text)
        })
        .collect();
    matches.sort_by_key(|(start, _, _)| *start);

    let mut sections = Vec::new();

    let first_heading_at = matches.first().map(|(s, _, _)| *s).unwrap_or(body.len());
    if first_heading_at > 0 {
        sections.push(Section {
            heading: None,
            heading_level: 0,
            text: &body[..first_heading_at],
            offset: 0,
        });
    }

    for (i, (start, level, text)) in matches.iter().enumerate() {
        let end = matches.get(i + 1).map(|(s, _, _)| *s).unwrap_or(body.len());
        sections.push(Section {
            heading: Some(text),
            heading_level: *level,
            text: &body[*start..end],
            offset: *start,
        });
    }

    sections
}

fn is_priority(heading: Option<&str>) -> bool {
    heading
        .map(|h| {
            let h = h.trim().to_lowercase();
            PRIORITY_HEADINGS.contains(&h.as_str())
        })
        .unwrap_or(false)
}

fn emit_section(section: &Section<'_>, chunks: &mut Vec<Chunk>, order: &mut usize) {
    let priority = is_priority(section.heading);
    let heading = section.heading.map(|s| s.to_string());

    if section.text.chars().count() <= MAX_CHUNK_CHARS {
        chunks.push(Chunk {
            heading,
            heading_level: section.heading_level,
            content: section.text.to_string(),
            chunk_order: *order,
            char_offset: section.offset,
            is_priority_heading: priority,
        });
        *order += 1;
        return;
    }

    // Oversized: split the body after the heading line into paragraphs and
    // greedily pack. The heading line itself is prepended to every
    // sub-chunk's offset bookkeeping but only its text to the first.
    let heading_line_len = section
        .heading
        .map(|_| section.text.find('\n').map(|i| i + 1).unwrap_or(0))
        .unwrap_or(0);
    let rest = &section.text[heading_line_len..];

    let paragraphs = split_paragraphs(rest);
    let packed = pack(&paragraphs, MAX_CHUNK_CHARS);

    for (i, (piece, piece_offset)) in packed.into_iter().enumerate() {
        chunks.push(Chunk {
            heading: heading.clone(),
            heading_level: section.heading_level,
            content: if i == 0 && heading_line_len > 0 {
                format!("{}{}", &section.text[..heading_line_len], piece)
            } else {
                piece
            },
            chunk_order: *order,
            char_offset: section.offset + heading_line_len + piece_offset,
            is_priority_heading: priority,
        });
        *order += 1;
    }
}

/// Split `text` on blank lines into paragraphs, preserving each paragraph's
/// offset within `text`.
fn split_paragraphs(text: &str) -> Vec<(&str, usize)> {
    let mut out = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;
    let bytes = text.as_bytes();

    while i < bytes.len() {
        if bytes[i] == b'\n' && i + 1 < bytes.len() && bytes[i + 1] == b'\n' {
            if i > start {
                out.push((&text[start..i], start));
            }
            // skip consecutive blank lines
            let mut j = i;
            while j < bytes.len() && bytes[j] == b'\n' {
                j += 1;
            }
            start = j;
            i = j;
            continue;
        }
        i += 1;
    }
    if start < text.len() {
        out.push((&text[start..], start));
    }
    if out.is_empty() && !text.is_empty() {
        out.push((text, 0));
    }
    out
}

/// Greedily pack paragraphs (or, recursively, lines/hard-split pieces) into
/// chunks of at most `limit` characters. Returns `(content, offset_in_input)`
/// pairs.
fn pack<'a>(pieces: &[(&'a str, usize)], limit: usize) -> Vec<(String, usize)> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_offset: Option<usize> = None;

    let flush = |current: &mut String, current_offset: &mut Option<usize>, out: &mut Vec<(String, usize)>| {
        if !current.is_empty() {
            out.push((std::mem::take(current), current_offset.take().unwrap_or(0)));
        }
    };

    for (piece, offset) in pieces {
        let piece_len = piece.chars().count();

        if piece_len > limit {
            flush(&mut current, &mut current_offset, &mut out);
            out.extend(split_oversized_paragraph(piece, *offset, limit));
            continue;
        }

        let separator_len = if current.is_empty() { 0 } else { 2 };
        if current.chars().count() + separator_len + piece_len > limit {
            flush(&mut current, &mut current_offset, &mut out);
        }

        if current.is_empty() {
            current_offset = Some(*offset);
        } else {
            current.push_str("\n\n");
        }
        current.push_str(piece);
    }
    flush(&mut current, &mut current_offset, &mut out);

    out
}

/// A single paragraph too large for `limit`: split at line boundaries with
/// the same greedy packing; a single line still too large is hard-split at
/// the character limit.
fn split_oversized_paragraph(text: &str, base_offset: usize, limit: usize) -> Vec<(String, usize)> {
    let mut lines = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        lines.push((line, offset));
        offset += line.len();
    }
    if lines.is_empty() {
        lines.push((text, 0));
    }

    let mut out = Vec::new();
    let mut current = String::new();
    let mut current_offset = 0usize;

    for (line, line_offset) in lines {
        let line_char_len = line.chars().count();

        if line_char_len > limit {
            if !current.is_empty() {
                out.push((std::mem::take(&mut current), base_offset + current_offset));
            }
            let mut piece_byte_offset = line_offset;
            for hard in hard_split(line, limit) {
                let hard_offset = base_offset + piece_byte_offset;
                piece_byte_offset += hard.len();
                out.push((hard, hard_offset));
            }
            continue;
        }

        if current.is_empty() {
            current_offset = line_offset;
        }
        if current.chars().count() + line_char_len > limit {
            out.push((std::mem::take(&mut current), base_offset + current_offset));
            current_offset = line_offset;
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        out.push((current, base_offset + current_offset));
    }

    out
}

fn hard_split(text: &str, limit: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(limit)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_headings_is_one_preamble_chunk() {
        let body = "just some text\nwith no headings\n";
        let chunks = chunk(body);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].heading, None);
        assert_eq!(chunks[0].heading_level, 0);
        assert!(!chunks[0].is_priority_heading);
    }

    #[test]
    fn splits_at_level_one_and_two_headings() {
        let body = "preamble\n\n# One\nbody one\n\n## Two\nbody two\n";
        let chunks = chunk(body);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].heading, None);
        assert_eq!(chunks[1].heading.as_deref(), Some("One"));
        assert_eq!(chunks[1].heading_level, 1);
        assert_eq!(chunks[2].heading.as_deref(), Some("Two"));
        assert_eq!(chunks[2].heading_level, 2);
    }

    #[test]
    fn priority_heading_is_flagged_case_insensitively() {
        let body = "## Next Steps\ndo the thing\n";
        let chunks = chunk(body);
        assert!(chunks[0].is_priority_heading);
    }

    #[test]
    fn exact_limit_is_one_chunk_one_more_char_splits() {
        let body = format!("# H\n{}", "a".repeat(MAX_CHUNK_CHARS - 4));
        let chunks = chunk(&body);
        assert_eq!(chunks.len(), 1);

        let body2 = format!("# H\n{}", "a".repeat(MAX_CHUNK_CHARS - 3));
        let chunks2 = chunk(&body2);
        assert!(chunks2.len() >= 1);
    }

    #[test]
    fn oversized_paragraph_splits_by_line() {
        let long_para = format!("{}\n", "x".repeat(MAX_CHUNK_CHARS + 100));
        let body = format!("# H\nintro\n\n{}", long_para);
        let chunks = chunk(&body);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(c.content.chars().count() <= MAX_CHUNK_CHARS);
        }
    }

    #[test]
    fn char_offset_is_a_char_count_not_a_byte_count_for_multibyte_bodies() {
        let body = "préamble\n\n# Thème\ncorps français\n";
        let chunks = chunk(body);
        for c in &chunks {
            let slice: String = body.chars().skip(c.char_offset).take(c.content.chars().count()).collect();
            assert_eq!(slice, c.content);
        }
        // "préamble\n\n" has 10 chars but 11 bytes (the é is 2 bytes); the
        // heading chunk's offset must reflect the char count, not the byte
        // count, or it would point one position too far into the body.
        let heading_chunk = chunks.iter().find(|c| c.heading.as_deref() == Some("Thème")).unwrap();
        assert_eq!(heading_chunk.char_offset, "préamble\n\n".chars().count());
    }

    #[test]
    fn chunks_cover_body_with_no_gap_at_boundaries() {
        let body = "preamble text\n\n# First\nfirst body\n\n## Second\nsecond body more text here\n";
        let chunks = chunk(body);
        for c in &chunks {
            let slice_start = c.char_offset;
            let slice: String = body.chars().skip(slice_start).take(c.content.chars().count()).collect();
            assert_eq!(slice, c.content);
        }
    }
}
