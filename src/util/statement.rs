//! Labels that head a statement or list item and belong with the paragraph
//! after them.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Theorem,
    Lemma,
    Proposition,
    Corollary,
    Definition,
    Example,
    Notation,
    Conjecture,
    Proof,
}

impl StatementKind {
    pub const ALL: [StatementKind; 9] = [
        StatementKind::Theorem,
        StatementKind::Lemma,
        StatementKind::Proposition,
        StatementKind::Corollary,
        StatementKind::Definition,
        StatementKind::Example,
        StatementKind::Notation,
        StatementKind::Conjecture,
        StatementKind::Proof,
    ];

    pub fn keyword(self) -> &'static str {
        match self {
            StatementKind::Theorem => "Theorem",
            StatementKind::Lemma => "Lemma",
            StatementKind::Proposition => "Proposition",
            StatementKind::Corollary => "Corollary",
            StatementKind::Definition => "Definition",
            StatementKind::Example => "Example",
            StatementKind::Notation => "Notation",
            StatementKind::Conjecture => "Conjecture",
            StatementKind::Proof => "Proof",
        }
    }

    /// Proofs are never numbered.
    pub fn is_numbered(self) -> bool {
        self != StatementKind::Proof
    }

    /// Recognise text that is exactly one label such as `Theorem 3.1.`,
    /// `Lemma (Zorn).`, `Corollary 2.4 (uniqueness).` or `Proof.`.
    pub fn parse_label(text: &str) -> Option<StatementKind> {
        let text = text.trim();
        StatementKind::ALL.into_iter().find(|kind| {
            text.strip_prefix(kind.keyword())
                .is_some_and(|rest| label_tail_matches(*kind, rest))
        })
    }
}

fn label_tail_matches(kind: StatementKind, rest: &str) -> bool {
    let mut rest = rest.trim_start();
    if kind.is_numbered() {
        rest = skip_numbering(rest).trim_start();
    }
    if rest == "." {
        return true;
    }
    rest.strip_prefix('(')
        .and_then(|r| r.strip_suffix(")."))
        .is_some()
}

/// Skip `N`, `N.N` or `N.N.N`.
fn skip_numbering(s: &str) -> &str {
    let digits = |s: &str| s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let first = digits(s);
    if first == 0 {
        return s;
    }
    let mut rest = &s[first..];
    for _ in 0..2 {
        let Some(after_dot) = rest.strip_prefix('.') else {
            break;
        };
        let n = digits(after_dot);
        if n == 0 {
            break;
        }
        rest = &after_dot[n..];
    }
    rest
}

/// `(a)` through `(z)`, or a short roman numeral such as `(iv)`.
pub fn is_list_label(text: &str) -> bool {
    let Some(inner) = text.trim().strip_prefix('(').and_then(|r| r.strip_suffix(')')) else {
        return false;
    };
    let mut chars = inner.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => c.is_ascii_lowercase(),
        (Some(_), Some(_)) => inner.len() <= 4 && inner.chars().all(|c| matches!(c, 'i' | 'v' | 'x')),
        _ => false,
    }
}

/// A paragraph made of nothing but a label is glued to the next one.
pub fn is_glue_label(text: &str) -> bool {
    is_list_label(text) || StatementKind::parse_label(text).is_some()
}
