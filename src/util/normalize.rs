//! Markup → display text.
//!
//! `normalize` flattens a note page into plain text: markup stripped, math
//! linearised, paragraphs reflowed and lines wrapped to [`WRAP_WIDTH`]. The
//! output is entity-escaped and `normalize(normalize(x)) == normalize(x)`.

use once_cell::sync::Lazy;
use regex::Regex;
use std::borrow::Cow;

use super::markup::{decode_entities, flatten};
use super::statement::is_glue_label;

pub const WRAP_WIDTH: usize = 80;

const MATH_OPEN: &str = "\\[";

static NAV_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[(?:next-tail|next|prev-tail|prev|up|tail|front)\s*\]").unwrap()
});
static INLINE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\S\n]+").unwrap());
static LINE_EDGE_SPACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^ +| +$").unwrap());
static BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());
static NON_ALNUM: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^a-zA-Z0-9]").unwrap());

pub fn normalize(markup: &str) -> String {
    let text = tidy_whitespace(&flatten(markup));
    if text.is_empty() {
        return text;
    }
    let paragraphs = glue_labels(split_paragraphs(&text));
    paragraphs
        .into_iter()
        .map(Paragraph::render)
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Text pushed to the search engine: the display text reduced to ASCII
/// letters and digits, on one line.
pub fn index_text(markup: &str) -> String {
    let display = decode_entities(&normalize(markup));
    NON_ALNUM.replace_all(&display, " ").into_owned()
}

fn tidy_whitespace(text: &str) -> String {
    let mut text = text.to_string();
    // removing one marker can expose another, e.g. "[ne[next]xt]"
    loop {
        match NAV_MARKER.replace_all(&text, "") {
            Cow::Borrowed(_) => break,
            Cow::Owned(stripped) => text = stripped,
        }
    }
    let text = INLINE_WS.replace_all(&text, " ");
    let text = LINE_EDGE_SPACES.replace_all(&text, "");
    let text = BLANK_RUNS.replace_all(&text, "\n\n");
    text.trim().to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Paragraph {
    lines: Vec<String>,
    math: bool,
    /// A blank line precedes this paragraph.
    after_break: bool,
    /// A blank line follows this paragraph.
    before_break: bool,
}

impl Paragraph {
    fn joined(&self) -> String {
        join_continuation(&self.lines)
    }

    fn is_interior(&self) -> bool {
        self.after_break && self.before_break
    }

    /// Append `next`. Each side is reflowed first when it is interior, as it
    /// would have been on its own.
    fn absorb(&mut self, next: Paragraph) {
        if self.is_interior() {
            self.lines = vec![self.joined()];
        }
        self.before_break = next.before_break;
        let next_lines = if next.is_interior() {
            vec![next.joined()]
        } else {
            next.lines
        };
        let mut lines = next_lines.into_iter();
        if let (Some(last), Some(first)) = (self.lines.last_mut(), lines.next()) {
            push_continuation(last, &first);
        }
        self.lines.extend(lines);
    }

    fn render(self) -> String {
        if self.math {
            return self.lines.join("\n");
        }
        let lines = if self.is_interior() {
            vec![join_continuation(&self.lines)]
        } else {
            glue_label_lines(self.lines)
        };
        lines
            .iter()
            .map(|line| wrap_line(line, WRAP_WIDTH))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn split_paragraphs(text: &str) -> Vec<Paragraph> {
    let blocks: Vec<&str> = text.split("\n\n").collect();
    let last = blocks.len().saturating_sub(1);
    blocks
        .into_iter()
        .enumerate()
        .map(|(i, block)| Paragraph {
            lines: block.lines().map(str::to_string).collect(),
            math: block.starts_with(MATH_OPEN),
            after_break: i > 0,
            before_break: i < last,
        })
        .collect()
}

/// One linear pass: a prose paragraph that is only a label absorbs the prose
/// paragraph after it.
fn glue_labels(paragraphs: Vec<Paragraph>) -> Vec<Paragraph> {
    let mut out: Vec<Paragraph> = Vec::with_capacity(paragraphs.len());
    for para in paragraphs {
        match out.last_mut() {
            Some(prev) if !prev.math && !para.math && is_glue_label(&prev.joined()) => {
                prev.absorb(para)
            }
            _ => out.push(para),
        }
    }
    out
}

fn starts_with_continuation(s: &str) -> bool {
    s.starts_with([',', '.', '?', ':'])
}

/// Join the lines of a paragraph into one logical line. A line break before
/// continuing punctuation disappears instead of becoming a space.
fn join_continuation(lines: &[String]) -> String {
    let mut out = String::new();
    for line in lines {
        push_continuation(&mut out, line);
    }
    out
}

fn push_continuation(out: &mut String, line: &str) {
    if !out.is_empty() && !starts_with_continuation(line) {
        out.push(' ');
    }
    out.push_str(line);
}

/// Inside a paragraph whose lines are kept, a line that is only a label
/// moves onto the start of the next line.
fn glue_label_lines(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    for line in lines {
        match out.last_mut() {
            Some(prev) if is_glue_label(prev.as_str()) => push_continuation(prev, &line),
            _ => out.push(line),
        }
    }
    out
}

/// Greedy word wrap at spaces. A word that starts with continuing
/// punctuation is never moved to the start of a line, even when that pushes
/// the line past `width`. Words wider than
/// `width` get a line of their own, and a label is never left alone on a
/// line of its own (it rejoins a neighbouring line even past `width`).
pub fn wrap_line(line: &str, width: usize) -> String {
    let mut units: Vec<String> = Vec::new();
    for word in line.split(' ') {
        match units.last_mut() {
            Some(unit) if starts_with_continuation(word) => {
                unit.push(' ');
                unit.push_str(word);
            }
            _ => units.push(word.to_string()),
        }
    }

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for unit in units {
        let unit_len = unit.chars().count();
        if !current.is_empty() && current_len + 1 + unit_len > width {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(&unit);
        current_len += unit_len;
    }
    lines.push(current);
    if lines.len() > 1 {
        lines = rejoin_lone_labels(lines);
    }
    lines.join("\n")
}

fn rejoin_lone_labels(lines: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut pending: Option<String> = None;
    for line in lines {
        if let Some(mut label) = pending.take() {
            label.push(' ');
            label.push_str(&line);
            out.push(label);
            continue;
        }
        if is_glue_label(&line) {
            match out.last_mut() {
                Some(prev) => {
                    prev.push(' ');
                    prev.push_str(&line);
                }
                None => pending = Some(line),
            }
            continue;
        }
        out.push(line);
    }
    out.extend(pending);
    out
}
