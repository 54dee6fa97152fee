//! Document composition: three fragments in, one executable document out.
//!
//! The composed document is a fixed template. User CSS lands in a `<style>`
//! block, user HTML in `<body>`, and user JS inside a `try`/`catch` in an
//! instrumentation script that reports errors to the parent context and
//! redirects anchor clicks to a new top-level context.
//!
//! CSS and JS are inlined verbatim unless [`ComposeOptions::escape_closing_tags`]
//! is set, so a literal `</script>` inside user JS still ends the script early.

use std::fmt;
use std::sync::LazyLock;

use base64::Engine as Base64Engine;
use regex::Regex;
use scraper::{ElementRef, Html};
use sha2::{Digest, Sha256};

static STYLE_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</(style)").expect("Invalid style close regex"));
static SCRIPT_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</(script)").expect("Invalid script close regex"));

const DOCUMENT_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Preview</title>
    <style>
        {{CSS}}
    </style>
    {{HEAD}}
</head>
<body>
    {{BODY}}
    <script>
        window.addEventListener('error', function(e) {
            parent.postMessage({
                type: 'error',{{TOKEN}}
                message: e.message,
                filename: e.filename,
                lineno: e.lineno,
                colno: e.colno
            }, '*');
        });

        document.addEventListener('click', function(e) {
            if (e.target.tagName === 'A' && e.target.href) {
                e.preventDefault();
                window.open(e.target.href, '_blank');
            }
        });

        try {
            {{JS}}
        } catch (error) {
            parent.postMessage({
                type: 'error',{{TOKEN}}
                message: error && error.message !== undefined ? error.message : String(error),
                stack: error && error.stack
            }, '*');
        }
    </script>
</body>
</html>"#;

/// Static document shown while every fragment is blank
pub const DEMO_DOCUMENT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>RunThatCode Demo</title>
    <style>
        body {
            margin: 0;
            padding: 20px;
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: linear-gradient(135deg, #667eea 0%, #764ba2 100%);
            min-height: 100vh;
            display: flex;
            align-items: center;
            justify-content: center;
        }
        .container {
            background: rgba(255, 255, 255, 0.1);
            backdrop-filter: blur(10px);
            border-radius: 20px;
            padding: 40px;
            text-align: center;
            border: 1px solid rgba(255, 255, 255, 0.2);
            box-shadow: 0 8px 32px rgba(0, 0, 0, 0.1);
            max-width: 500px;
        }
        h1 {
            color: white;
            font-size: 2.5rem;
            margin-bottom: 20px;
            text-shadow: 0 2px 10px rgba(0, 0, 0, 0.1);
        }
        p {
            color: rgba(255, 255, 255, 0.9);
            font-size: 1.2rem;
            margin-bottom: 30px;
        }
        .demo-link {
            color: #9333ea;
            text-decoration: none;
            font-weight: 600;
            background: rgba(255, 255, 255, 0.9);
            padding: 12px 24px;
            border-radius: 25px;
            display: inline-block;
            margin: 10px;
            transition: all 0.3s ease;
        }
        .demo-link:hover {
            background: white;
            transform: translateY(-2px);
            box-shadow: 0 5px 15px rgba(0, 0, 0, 0.2);
        }
        button {
            background: rgba(147, 51, 234, 0.8);
            border: none;
            color: white;
            padding: 15px 30px;
            font-size: 1.1rem;
            border-radius: 50px;
            cursor: pointer;
            transition: all 0.3s ease;
            border: 1px solid rgba(147, 51, 234, 0.5);
            margin: 10px;
        }
        button:hover {
            background: rgba(147, 51, 234, 1);
            transform: translateY(-2px);
            box-shadow: 0 5px 15px rgba(147, 51, 234, 0.4);
        }
    </style>
</head>
<body>
    <div class="container">
        <h1>Live Preview</h1>
        <p>Start coding and see your results instantly</p>
        <div>
        </div>
        <button onclick="window.open('https://www.hasanjanahi.com', '_blank')">Built by hasanjanahi</button>
    </div>
    <script>
    </script>
</body>
</html>"#;

/// Per-run correlation token embedded in every error message a preview posts
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunToken(String);

impl RunToken {
    /// Derive the token for run `generation` over the given sources
    pub fn derive(generation: u64, html: &str, css: &str, js: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(generation.to_be_bytes());
        for part in [html, css, js] {
            hasher.update(b":");
            hasher.update(part.as_bytes());
        }
        let digest = hasher.finalize();
        RunToken(hex::encode(&digest[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Knobs that change the composed output relative to plain [`compose`]
#[derive(Debug, Clone, Default)]
pub struct ComposeOptions {
    /// Tag posted error payloads with this token
    pub token: Option<RunToken>,
    /// Rewrite `</style` in CSS and `</script` in JS as `<\/style` / `<\/script`
    pub escape_closing_tags: bool,
}

/// A composed, self-contained HTML document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedDocument {
    html: String,
}

impl ComposedDocument {
    pub fn new(html: String) -> Self {
        Self { html }
    }

    pub fn as_str(&self) -> &str {
        &self.html
    }

    pub fn into_string(self) -> String {
        self.html
    }

    /// `data:` URL carrying the document, for hand-off to a real browser
    pub fn to_data_url(&self) -> String {
        format!(
            "data:text/html;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(self.html.as_bytes())
        )
    }
}

impl fmt::Display for ComposedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.html)
    }
}

/// Compose the three fragments into one document (no token, no escaping)
pub fn compose(html: &str, css: &str, js: &str) -> String {
    compose_with(html, css, js, &ComposeOptions::default())
}

pub fn compose_with(html: &str, css: &str, js: &str, options: &ComposeOptions) -> String {
    let (body, head) = split_user_html(html);

    let (css, js) = if options.escape_closing_tags {
        (
            STYLE_CLOSE.replace_all(css, r"<\/$1").into_owned(),
            SCRIPT_CLOSE.replace_all(js, r"<\/$1").into_owned(),
        )
    } else {
        (css.to_string(), js.to_string())
    };

    let token_field = options
        .token
        .as_ref()
        .map(|t| format!("\n                token: '{}',", t))
        .unwrap_or_default();

    fill_template(
        DOCUMENT_TEMPLATE,
        &[
            ("{{CSS}}", css.as_str()),
            ("{{HEAD}}", head.as_str()),
            ("{{BODY}}", body.as_str()),
            ("{{TOKEN}}", token_field.as_str()),
            ("{{JS}}", js.as_str()),
        ],
    )
}

fn is_full_document(html: &str) -> bool {
    html.contains("<!DOCTYPE html>") || html.contains("<html>")
}

/// Returns (body content, extra head markup)
fn split_user_html(html: &str) -> (String, String) {
    if !is_full_document(html) {
        return (html.to_string(), String::new());
    }

    let document = Html::parse_document(html);
    let root = document.root_element();
    let section = |name: &str| {
        root.children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == name)
    };

    let body = section("body")
        .map(|b| b.inner_html())
        .unwrap_or_else(|| html.to_string());

    let head = section("head")
        .map(|head| {
            head.children()
                .filter_map(ElementRef::wrap)
                .filter(|el| !is_document_metadata(el))
                .map(|el| el.html())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    (body, head)
}

// charset, viewport and title already come from the template
fn is_document_metadata(el: &ElementRef) -> bool {
    let value = el.value();
    match value.name() {
        "title" => true,
        "meta" => value.attr("charset").is_some() || value.attr("name") == Some("viewport"),
        _ => false,
    }
}

/// Substitute placeholders in a single left-to-right pass; inserted values
/// are never rescanned, so user text containing `{{JS}}` stays literal.
pub(crate) fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push_str("{{");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    out
}
