//! Heuristic source validation.
//!
//! These checks scan raw text for structural slips (unclosed tags, brace
//! mismatches, missing semicolons, duplicate ids) without building an AST.
//! They are advisory and deliberately shallow: closing tags are checked for
//! presence anywhere in the document rather than proper nesting, and CSS
//! rules are found by splitting on `}`.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::FragmentKind;

/// Tags that never need a closing tag
pub const SELF_CLOSING_TAGS: &[&str] = &[
    "img", "br", "hr", "input", "meta", "link", "area", "base", "col", "embed", "source", "track",
    "wbr",
];

static OPEN_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^/][^>]*>").expect("Invalid open tag regex"));
static TAG_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<([A-Za-z0-9_]+)").expect("Invalid tag name regex"));
static ID_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"id=["']([^"']+)["']"#).expect("Invalid id regex"));
static CSS_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)/\*.*?\*/").expect("Invalid comment regex"));

/// Outcome of one validation pass over a single fragment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub kind: FragmentKind,
    /// Issues in discovery order
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn empty(kind: FragmentKind) -> Self {
        Self {
            kind,
            errors: Vec::new(),
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Combined warning text listing at most `max_listed` issues.
    ///
    /// ```
    /// use runthatcode::{validate::validate, FragmentKind};
    ///
    /// let report = validate(FragmentKind::Css, "a { color: red }");
    /// assert_eq!(
    ///     report.summary(5),
    ///     "CSS Issues Detected\n• Missing semicolon in declaration: \"color: red\""
    /// );
    /// ```
    pub fn summary(&self, max_listed: usize) -> String {
        let listed = self
            .errors
            .iter()
            .take(max_listed)
            .map(|e| format!("• {}", e))
            .collect::<Vec<_>>()
            .join("\n");
        let mut text = format!("{} Issues Detected\n{}", self.kind.label(), listed);
        if self.errors.len() > max_listed {
            text.push_str(&format!(
                "\n... and {} more issues",
                self.errors.len() - max_listed
            ));
        }
        text
    }
}

/// Validate one fragment. Blank input yields an empty report.
pub fn validate(kind: FragmentKind, text: &str) -> ValidationReport {
    let code = text.trim();
    if code.is_empty() {
        return ValidationReport::empty(kind);
    }
    let errors = match kind {
        FragmentKind::Html => validate_html(code),
        FragmentKind::Css => validate_css(code),
        FragmentKind::Js => validate_javascript(code),
    };
    ValidationReport { kind, errors }
}

pub fn validate_html(html: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if html.contains("<!DOCTYPE html>") || html.contains("<html>") {
        for root in ["html", "head", "body"] {
            let open = format!("<{}>", root);
            let close = format!("</{}>", root);
            if html.contains(&open) && !html.contains(&close) {
                errors.push(format!("Missing closing {} tag", close));
            }
        }
    }

    for tag in OPEN_TAG.find_iter(html).map(|m| m.as_str()) {
        let Some(name) = TAG_NAME.captures(tag).map(|c| c[1].to_lowercase()) else {
            continue;
        };
        if SELF_CLOSING_TAGS.contains(&name.as_str()) || tag.ends_with("/>") {
            continue;
        }
        if !html.contains(&format!("</{}>", name)) {
            errors.push(format!("Missing closing tag for <{}>", name));
        }
    }

    if html.contains("class=\"\"") || html.contains("class=''") {
        errors.push("Empty class attribute found".to_string());
    }
    if html.contains("id=\"\"") || html.contains("id=''") {
        errors.push("Empty id attribute found".to_string());
    }

    let ids: Vec<&str> = ID_ATTR
        .captures_iter(html)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut duplicates = Vec::new();
    for id in ids {
        if !seen.insert(id) && reported.insert(id) {
            duplicates.push(id);
        }
    }
    if !duplicates.is_empty() {
        errors.push(format!("Duplicate ID(s) found: {}", duplicates.join(", ")));
    }

    errors
}

pub fn validate_css(css: &str) -> Vec<String> {
    let mut errors = Vec::new();

    let (open, close) = count_pair(css, '{', '}');
    if open != close {
        errors.push(format!(
            "Mismatched braces: {} opening, {} closing",
            open, close
        ));
    }

    let rules = css
        .split('}')
        .filter(|rule| !rule.trim().is_empty() && rule.contains('{'));
    for rule in rules {
        // Only the text up to a nested `{` counts as this rule's declarations.
        let Some(declarations) = rule.split('{').nth(1) else {
            continue;
        };
        if declarations.is_empty() {
            continue;
        }
        let cleaned = CSS_COMMENT.replace_all(declarations, "");
        let lines = cleaned.split('\n').map(str::trim).filter(|line| {
            !line.is_empty()
                && !line.starts_with("/*")
                && !line.starts_with('*')
                && !line.ends_with("*/")
        });
        for line in lines {
            if line.contains(':')
                && !line.ends_with(';')
                && !line.ends_with('{')
                && line.matches(':').count() == 1
            {
                errors.push(format!("Missing semicolon in declaration: \"{}\"", line));
            }
        }
    }

    errors
}

pub fn validate_javascript(js: &str) -> Vec<String> {
    let mut errors = Vec::new();

    if let Err(message) = compile_function_body(js) {
        errors.push(format!("Syntax Error: {}", message));
    }

    let checks = [
        ("parentheses", '(', ')'),
        ("brackets", '[', ']'),
        ("braces", '{', '}'),
    ];
    for (what, open_ch, close_ch) in checks {
        let (open, close) = count_pair(js, open_ch, close_ch);
        if open != close {
            errors.push(format!(
                "Mismatched {}: {} opening, {} closing",
                what, open, close
            ));
        }
    }

    errors
}

fn count_pair(text: &str, open: char, close: char) -> (usize, usize) {
    text.chars().fold((0, 0), |(o, c), ch| {
        if ch == open {
            (o + 1, c)
        } else if ch == close {
            (o, c + 1)
        } else {
            (o, c)
        }
    })
}

/// Parse `body` as the body of an anonymous function without running it.
///
/// The body is wrapped as `(function(){ ... })` and the result must be that
/// one parenthesized function expression and nothing else, so text like
/// `}); (function(){` that closes the wrapper early is rejected the way a
/// browser's `new Function(body)` rejects it.
fn compile_function_body(body: &str) -> std::result::Result<(), String> {
    use boa_engine::ast::{Expression, Statement, StatementListItem};
    use boa_engine::interner::Interner;
    use boa_engine::parser::{Parser, Source};

    let wrapped = format!("(function(){{\n{}\n}})", body);
    let mut interner = Interner::default();
    let script = Parser::new(Source::from_bytes(wrapped.as_bytes()))
        .parse_eval(false, &mut interner)
        .map_err(|e| e.to_string())?;

    match script.statements().statements() {
        [StatementListItem::Statement(Statement::Expression(Expression::Parenthesized(p)))]
            if matches!(p.expression(), Expression::FunctionExpression(_)) =>
        {
            Ok(())
        }
        _ => Err("unexpected '}' closes the function body".to_string()),
    }
}
