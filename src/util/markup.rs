//! Markup to text on top of the html5ever tokenizer. The sink below decides
//! what each tag means for the emitted text; the tokenizer handles tag syntax,
//! comments, doctypes and character references.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use once_cell::sync::Lazy;
use regex::Regex;

static CHAR_REF: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(?:#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap()
});

/// Decode every well-formed character reference, leaving unknown ones as written.
pub(crate) fn decode_entities(raw: &str) -> String {
    CHAR_REF
        .replace_all(raw, |caps: &regex::Captures| {
            let entity = &caps[0];
            htmlescape::decode_html(entity).unwrap_or_else(|_| entity.to_string())
        })
        .into_owned()
}

fn is_list_boundary(name: &str) -> bool {
    matches!(name, "li" | "ul" | "ol")
}

fn on_start(out: &mut String, name: &str) {
    if is_list_boundary(name) {
        out.push_str("\n\n");
    } else if name == "br" {
        out.push('\n');
    }
}

fn on_end(out: &mut String, name: &str) {
    if !name.starts_with("mjx") {
        out.push('\n');
    }
    if is_list_boundary(name) {
        out.push_str("\n\n");
    }
}

fn is_inline_math(tag: &Tag) -> bool {
    tag.attrs
        .iter()
        .any(|a| &*a.name.local == "display" && a.value.trim().eq_ignore_ascii_case("inline"))
}

enum Mode {
    Text,
    /// Inside `title`, `style` or `script`. The content is held back and
    /// only emitted when the element never closes.
    Skip { element: String, held: String },
    Math { inline: bool, raw: String },
}

struct TextSink {
    out: String,
    mode: Mode,
}

impl TextSink {
    fn start_tag(&mut self, tag: &Tag) -> TokenSinkResult<()> {
        let name = &*tag.name;
        match name {
            "title" | "style" | "script" if !tag.self_closing => {
                self.mode = Mode::Skip {
                    element: name.to_string(),
                    held: String::new(),
                };
                return TokenSinkResult::RawData(match name {
                    "title" => RawKind::Rcdata,
                    "script" => RawKind::ScriptData,
                    _ => RawKind::Rawtext,
                });
            }
            "math" if !tag.self_closing => {
                self.mode = Mode::Math {
                    inline: is_inline_math(tag),
                    raw: String::new(),
                };
            }
            _ => {
                on_start(&mut self.out, name);
                if tag.self_closing {
                    on_end(&mut self.out, name);
                }
            }
        }
        TokenSinkResult::Continue
    }

    fn tag(&mut self, tag: Tag) -> TokenSinkResult<()> {
        let name = &*tag.name;
        let closing = tag.kind == TagKind::EndTag;
        match &mut self.mode {
            Mode::Text if closing => on_end(&mut self.out, name),
            Mode::Text => return self.start_tag(&tag),
            Mode::Skip { element, .. } => {
                if closing && element.as_str() == name {
                    self.mode = Mode::Text;
                }
            }
            Mode::Math { .. } if closing && name == "math" => self.finish_math(),
            Mode::Math { raw, .. } => {
                let breaks = if closing { !name.starts_with("mjx") } else { is_list_boundary(name) };
                if breaks {
                    raw.push(' ');
                }
            }
        }
        TokenSinkResult::Continue
    }

    /// Emit collected math as one whitespace-collapsed line, inline or as its
    /// own `\[ ... \]` paragraph.
    fn finish_math(&mut self) {
        let Mode::Math { inline, raw } = std::mem::replace(&mut self.mode, Mode::Text) else {
            return;
        };
        let raw = raw.replace('\u{2061}', " ");
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            return;
        }
        let content = htmlescape::encode_minimal(&collapsed);
        if inline {
            self.out.push_str(&content);
        } else {
            self.out.push_str("\n\n\\[\n");
            self.out.push_str(&content);
            self.out.push_str("\n\\]\n\n");
        }
    }

    fn finish(&mut self) {
        match std::mem::replace(&mut self.mode, Mode::Text) {
            Mode::Text => {}
            // an unterminated element keeps its content as text
            Mode::Skip { held, .. } => self.out.push_str(&htmlescape::encode_minimal(&held)),
            math @ Mode::Math { .. } => {
                self.mode = math;
                self.finish_math();
            }
        }
    }
}

impl TokenSink for TextSink {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::CharacterTokens(text) => match &mut self.mode {
                Mode::Text => self.out.push_str(&htmlescape::encode_minimal(&text)),
                Mode::Skip { held, .. } => held.push_str(&text),
                Mode::Math { raw, .. } => raw.push_str(&text),
            },
            Token::TagToken(tag) => return self.tag(tag),
            Token::EOFToken => self.finish(),
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

/// Strip markup down to minimally escaped text, keeping the line and
/// paragraph breaks implied by closing tags and list boundaries. Display math
/// becomes its own `\[ ... \]` paragraph.
pub(crate) fn flatten(markup: &str) -> String {
    let sink = TextSink {
        out: String::with_capacity(markup.len() / 2),
        mode: Mode::Text,
    };
    let mut tokenizer = Tokenizer::new(sink, TokenizerOpts::default());
    let mut input = BufferQueue::new();
    input.push_back(StrTendril::from_slice(markup));
    let _ = tokenizer.feed(&mut input);
    tokenizer.end();
    tokenizer.sink.out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_basic_tags() {
        assert_eq!(flatten(r#"<p class="a">hi</p>"#), "hi\n");
    }

    #[test]
    fn test_flatten_quoted_gt_in_attribute() {
        assert_eq!(flatten(r#"<a title="x > y">t</a>"#), "t\n");
    }

    #[test]
    fn test_flatten_literal_angle_bracket() {
        assert_eq!(flatten("a < b and c<5"), "a &lt; b and c&lt;5");
    }

    #[test]
    fn test_flatten_drops_comments_doctype_and_instructions() {
        assert_eq!(flatten("<!DOCTYPE html><!-- note --><?xml version=\"1.0\"?>x"), "x");
    }

    #[test]
    fn test_flatten_unmatched_closer_breaks_line() {
        assert_eq!(flatten("a</p>b"), "a\nb");
    }

    #[test]
    fn test_flatten_removes_title_style_script() {
        let out = flatten("<title>T</title><style>p{}</style><script>var x;</script>kept");
        assert_eq!(out, "kept");
    }

    #[test]
    fn test_flatten_raw_text_closer_is_case_insensitive() {
        assert_eq!(flatten("<style>body { color: red }</STYLE>after"), "after");
    }

    #[test]
    fn test_flatten_unterminated_script_keeps_text() {
        let out = flatten("<script>still here");
        assert_eq!(out, "still here");
    }

    #[test]
    fn test_flatten_list_breaks() {
        let out = flatten("<ul><li>one</li></ul>");
        assert_eq!(out, "\n\n\n\none\n\n\n\n\n\n");
    }

    #[test]
    fn test_flatten_mjx_closers_do_not_break_lines() {
        let out = flatten("a<mjx-c>b</mjx-c>c");
        assert_eq!(out, "abc");
    }

    #[test]
    fn test_flatten_inline_and_block_math() {
        let inline = flatten(r#"see <math display="inline"><mi>x</mi><mo>+</mo><mi>y</mi></math> now"#);
        assert_eq!(inline, "see x + y now");
        let block = flatten(r#"<math display="block">x^2</math>"#);
        assert_eq!(block, "\n\n\\[\nx^2\n\\]\n\n");
        let bare = flatten("<math>x^2</math>");
        assert_eq!(bare, "\n\n\\[\nx^2\n\\]\n\n");
    }

    #[test]
    fn test_flatten_empty_math_emits_nothing() {
        assert_eq!(flatten("a<math display=\"block\"> <mi></mi> </math>b"), "ab");
    }

    #[test]
    fn test_flatten_math_function_application() {
        let out = flatten("<math display=\"inline\"><mi>sin</mi>\u{2061}<mi>x</mi></math>");
        assert_eq!(out, "sin x");
    }

    #[test]
    fn test_flatten_math_escapes_operators() {
        let out = flatten("<math display=\"inline\"><mi>a</mi><mo>&lt;</mo><mi>b</mi></math>");
        assert_eq!(out, "a &lt; b");
    }

    #[test]
    fn test_flatten_unterminated_math_runs_to_end() {
        let out = flatten(r#"a <math display="inline">x</mi>y"#);
        assert_eq!(out, "a x y");
    }

    #[test]
    fn test_entities_are_reescaped() {
        assert_eq!(flatten("a &lt;b&gt; &amp; c"), "a &lt;b&gt; &amp; c");
        assert_eq!(flatten("x &amp;lt; y"), "x &amp;lt; y");
        assert_eq!(decode_entities("AT&T &amp; R&D"), "AT&T & R&D");
    }
}
