//! Bracket-matching scanner
//!
//! Splits raw markup into a flat sequence of plain-text, macro-block and
//! table-block segments. Opening delimiters push the closing delimiter they
//! expect onto a stack; a block that is never closed runs to end of input.
//! Blocks nested inside another block are subsumed by the outermost one.

use regex::Regex;
use std::sync::OnceLock;

/// What a segment of scanned markup is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Text,
    /// `{{…}}` or `{{{…}}}`
    Macro,
    /// `{|…|}`
    Table,
}

/// A contiguous slice of the scanned input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub kind: SegmentKind,
    pub text: &'a str,
}

/// Which block syntax the scanner looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    Macros,
    Tables,
}

fn masked_regions() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"(?is)<\s*nowiki\s*>.*?<\s*/\s*nowiki\s*>|<\s*math\s*>.*?<\s*/\s*math\s*>|<\s*ce\s*>.*?<\s*/\s*ce\s*>|<\s*chem\s*>.*?<\s*/\s*chem\s*>|<\s*math\s*chem\s*>.*?<\s*/\s*math\s*>",
        )
        .expect("valid mask regex")
    })
}

/// Copy of `text` as bytes with literal regions blanked out.
///
/// Braces inside `<nowiki>`, `<math>` and chemistry markup are content, not
/// delimiters. Blanking keeps every byte offset intact.
fn mask_literals(text: &str) -> Vec<u8> {
    let mut bytes = text.as_bytes().to_vec();
    for m in masked_regions().find_iter(text) {
        bytes[m.start()..m.end()].fill(b' ');
    }
    bytes
}

fn kind_for(closing: &[u8]) -> SegmentKind {
    if closing == b"|}" {
        SegmentKind::Table
    } else {
        SegmentKind::Macro
    }
}

/// Scan `text` into segments.
pub fn scan(text: &str, mode: ScanMode) -> Vec<Segment<'_>> {
    let bytes = mask_literals(text);
    let len = bytes.len();

    let mut stack: Vec<(&'static [u8], usize)> = Vec::new();
    let mut ranges: Vec<(SegmentKind, usize, usize)> = Vec::new();

    let mut i = 0;
    while i + 1 < len {
        let rest = &bytes[i..];

        if mode == ScanMode::Macros && rest.starts_with(b"{{{") {
            stack.push((b"}}}", i));
            i += 3;
            continue;
        }
        if mode == ScanMode::Macros && rest.starts_with(b"{{") {
            stack.push((b"}}", i));
            i += 2;
            continue;
        }
        if mode == ScanMode::Tables && rest.starts_with(b"{|") {
            stack.push((b"|}", i));
            i += 2;
            continue;
        }
        if let Some(&(closing, start)) = stack.last() {
            if rest.starts_with(closing) {
                stack.pop();
                ranges.push((kind_for(closing), start, i + closing.len()));
                i += closing.len();
                continue;
            }
        }
        i += 1;
    }

    for (closing, start) in stack {
        ranges.push((kind_for(closing), start, len));
    }

    ranges.sort_by_key(|&(_, start, end)| (start, std::cmp::Reverse(end)));

    let mut segments = Vec::new();
    let mut offset = 0;
    for (kind, start, end) in ranges {
        if start < offset {
            // nested in (or overlapping) the previous block
            continue;
        }
        if start > offset {
            segments.push(Segment {
                kind: SegmentKind::Text,
                text: &text[offset..start],
            });
        }
        segments.push(Segment {
            kind,
            text: &text[start..end],
        });
        offset = end;
    }

    if offset < len {
        segments.push(Segment {
            kind: SegmentKind::Text,
            text: &text[offset..],
        });
    }

    segments
}
