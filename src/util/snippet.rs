//! Search-result excerpts: find query terms in display text, cut word-aligned
//! context windows around them and mark the terms up.
//!
//! Every offset in this module is a character offset, not a byte offset.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use super::query::Query;

pub const DEFAULT_MAX_LENGTH: usize = 500;
pub const DEFAULT_TAG: &str = "span";
pub const DEFAULT_CSS_CLASS: &str = "fw-bold";
pub const SEPARATOR: &str = " ... ";

static CHAR_REF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);").unwrap());

/// Characters of context kept on each side of an occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextPad {
    pub before: usize,
    pub after: usize,
}

impl Default for ContextPad {
    fn default() -> Self {
        Self {
            before: 30,
            after: 35,
        }
    }
}

/// Half-open character range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

impl Window {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

/// Map a character to its lowercase form when that is a single character, so
/// folded and original text share offsets.
fn fold_char(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

/// Byte offset of every character plus the end of the text.
fn char_bounds(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect()
}

/// Byte ranges of the character references in escaped text.
fn char_refs(text: &str) -> Vec<Range<usize>> {
    CHAR_REF.find_iter(text).map(|m| m.range()).collect()
}

/// A match may contain whole references but never cut one apart.
fn splits_ref(refs: &[Range<usize>], range: &Range<usize>) -> bool {
    refs.iter().any(|r| {
        r.start < range.end && range.start < r.end && !(range.start <= r.start && r.end <= range.end)
    })
}

fn find_all(haystack: &[char], needle: &[char], accept: impl Fn(usize, usize) -> bool) -> Vec<usize> {
    let mut found = Vec::new();
    if needle.is_empty() {
        return found;
    }
    let mut i = 0;
    while i + needle.len() <= haystack.len() {
        if haystack[i..i + needle.len()] == *needle && accept(i, i + needle.len()) {
            found.push(i);
            i += needle.len();
        } else {
            i += 1;
        }
    }
    found
}

/// Start offsets of every case-insensitive occurrence of each term, scanned
/// left to right without overlaps. Offsets per term are strictly increasing.
/// Matches falling inside a character reference such as `&amp;` are ignored.
pub fn locate(text: &str, terms: &BTreeSet<String>) -> BTreeMap<String, Vec<usize>> {
    let haystack: Vec<char> = text.chars().map(fold_char).collect();
    let bounds = char_bounds(text);
    let refs = char_refs(text);
    terms
        .iter()
        .map(|term| {
            let needle: Vec<char> = term.chars().map(fold_char).collect();
            let found = find_all(&haystack, &needle, |start, end| {
                !splits_ref(&refs, &(bounds[start]..bounds[end]))
            });
            (term.clone(), found)
        })
        .collect()
}

/// Merge padded occurrence ranges into sorted, non-overlapping windows and
/// snap each one inward to word boundaries. Snapping may leave a window empty.
pub fn build_windows(
    text: &str,
    occurrences: &BTreeMap<String, Vec<usize>>,
    pad: ContextPad,
) -> Vec<Window> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut offsets: Vec<usize> = occurrences.values().flatten().copied().collect();
    offsets.sort_unstable();

    offsets
        .into_iter()
        .fold(Vec::<Window>::new(), |mut windows, pos| {
            let start = pos.saturating_sub(pad.before).min(len);
            let end = pos.saturating_add(pad.after).min(len);
            match windows.last_mut() {
                Some(current) if start < current.end => current.end = current.end.max(end),
                _ => windows.push(Window { start, end }),
            }
            windows
        })
        .into_iter()
        .map(|window| snap_to_words(&chars, window))
        .collect()
}

fn snap_to_words(chars: &[char], window: Window) -> Window {
    let Window { mut start, mut end } = window;
    if start != 0 && !chars[start - 1].is_whitespace() {
        start = chars[start..end]
            .iter()
            .position(|c| c.is_whitespace())
            .map_or(end, |i| start + i + 1);
    }
    if end != chars.len() && !chars[end].is_whitespace() {
        end = chars[start..end]
            .iter()
            .rposition(|c| c.is_whitespace())
            .map_or(start, |i| start + i);
    }
    Window { start, end }
}

/// Builds the highlighted excerpt for one query.
#[derive(Debug, Clone)]
pub struct Highlighter {
    terms: BTreeSet<String>,
    tag: String,
    css_class: String,
    max_length: usize,
    pad: ContextPad,
}

impl Highlighter {
    /// Terms are escaped the same way as display text so that `&`, `<` and
    /// quotes in a query still match.
    pub fn new(query: &Query) -> Self {
        let terms = query
            .terms()
            .iter()
            .map(|term| htmlescape::encode_minimal(term))
            .collect();
        Self {
            terms,
            tag: DEFAULT_TAG.to_string(),
            css_class: DEFAULT_CSS_CLASS.to_string(),
            max_length: DEFAULT_MAX_LENGTH,
            pad: ContextPad::default(),
        }
    }

    pub fn with_markup(mut self, tag: &str, css_class: &str) -> Self {
        self.tag = tag.to_string();
        self.css_class = css_class.to_string();
        self
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    pub fn with_pad(mut self, pad: ContextPad) -> Self {
        self.pad = pad;
        self
    }

    pub fn terms(&self) -> &BTreeSet<String> {
        &self.terms
    }

    pub fn windows(&self, text: &str) -> Vec<Window> {
        build_windows(text, &locate(text, &self.terms), self.pad)
    }

    pub fn highlight(&self, text: &str) -> String {
        let windows = self.windows(text);
        self.render(text, &windows)
    }

    /// Join window texts with [`SEPARATOR`] while their untrimmed length fits
    /// in the budget. The first window that does not fit ends the excerpt.
    pub fn assemble(&self, text: &str, windows: &[Window]) -> String {
        let bounds = char_bounds(text);
        let mut total = 0;
        let mut chunks: Vec<&str> = Vec::new();
        for window in windows.iter().filter(|w| !w.is_empty()) {
            let chunk = &text[bounds[window.start]..bounds[window.end]];
            if chunk.trim().is_empty() {
                continue;
            }
            if total + window.len() > self.max_length {
                break;
            }
            total += window.len();
            chunks.push(chunk.trim());
        }
        chunks.join(SEPARATOR)
    }

    pub fn render(&self, text: &str, windows: &[Window]) -> String {
        let mut out = self.assemble(text, windows);
        // One pass per term over the previous pass's output, so a later term
        // can match inside markup inserted for an earlier one.
        for term in self.terms.iter().filter(|t| !t.is_empty()) {
            let Ok(re) = RegexBuilder::new(&regex::escape(term))
                .case_insensitive(true)
                .build()
            else {
                continue;
            };
            out = self.mark(&re, &out);
        }
        out
    }

    fn mark(&self, re: &Regex, text: &str) -> String {
        let refs = char_refs(text);
        let mut marked = String::with_capacity(text.len());
        let (mut copied, mut pos) = (0, 0);
        while let Some(m) = re.find_at(text, pos) {
            if splits_ref(&refs, &m.range()) {
                pos = m.start() + text[m.start()..].chars().next().map_or(1, char::len_utf8);
                continue;
            }
            marked.push_str(&text[copied..m.start()]);
            marked.push_str(&format!(
                "<{tag} class=\"{class}\">{matched}</{tag}>",
                tag = self.tag,
                class = self.css_class,
                matched = m.as_str()
            ));
            copied = m.end();
            pos = m.end();
        }
        marked.push_str(&text[copied..]);
        marked
    }
}
