//! Contextual classification of atom tokens (spec section 3).
//!
//! An atom is just a string until something asks what kind of thing it is.
//! The reader never classifies tokens; linking, macro expansion, type
//! checking, and the tree compiler each ask `classify` (or one of the
//! narrower predicates) when they need to know.

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AtomKind<'a> {
    /// Decimal integer literal, e.g. `8`.
    Number(&'a str),
    /// `\$N`: a write-reference operand index.
    WriteOperandRef(u32),
    /// `$N`: a (read) operand index.
    OperandRef(u32),
    /// `$name`: a declaration-scoped name, resolved away by the linker.
    NamedRef(&'a str),
    /// `,name`: a macro parameter placeholder.
    MacroParam(&'a str),
    /// `^name`: a macro invocation name (only meaningful in head position).
    MacroName(&'a str),
    /// `&name`: a macro-call used as a parameter value.
    MacroCallParam(&'a str),
    /// Anything else: an operator name or an enum-like bareword constant,
    /// disambiguated by context (operator catalog membership).
    Bareword(&'a str),
}

pub fn classify(text: &str) -> AtomKind<'_> {
    if is_number(text) {
        return AtomKind::Number(text);
    }
    if let Some(rest) = text.strip_prefix("\\$") {
        if let Ok(n) = rest.parse::<u32>() {
            return AtomKind::WriteOperandRef(n);
        }
    }
    if let Some(rest) = text.strip_prefix('$') {
        if let Ok(n) = rest.parse::<u32>() {
            return AtomKind::OperandRef(n);
        }
        return AtomKind::NamedRef(rest);
    }
    if let Some(rest) = text.strip_prefix(',') {
        return AtomKind::MacroParam(rest);
    }
    if let Some(rest) = text.strip_prefix('^') {
        return AtomKind::MacroName(rest);
    }
    if let Some(rest) = text.strip_prefix('&') {
        return AtomKind::MacroCallParam(rest);
    }
    AtomKind::Bareword(text)
}

pub fn is_number(text: &str) -> bool {
    !text.is_empty() && text.bytes().all(|b| b.is_ascii_digit())
}

pub fn is_named_ref(text: &str) -> bool {
    matches!(classify(text), AtomKind::NamedRef(_))
}

pub fn is_operand_ref(text: &str) -> bool {
    matches!(
        classify(text),
        AtomKind::OperandRef(_) | AtomKind::WriteOperandRef(_)
    )
}

pub fn is_macro_param(text: &str) -> bool {
    matches!(classify(text), AtomKind::MacroParam(_))
}

pub fn is_size_bareword(text: &str) -> bool {
    text.ends_with("_sz")
}

pub fn upper(prefix: &str, bareword: &str) -> String {
    format!("{}{}", prefix, bareword.to_uppercase())
}
