use criterion::{black_box, criterion_group, criterion_main, Criterion};

use runthatcode::{compose, compose_with, validate, ComposeOptions, FragmentKind, RunToken};

const HTML: &str = r#"<div class="card" id="main">
    <h1>Counter</h1>
    <button id="inc">+1</button>
    <img src="x.png">
    <span id="count">0</span>
</div>"#;

const CSS: &str = r#".card {
    padding: 20px;
    border-radius: 8px;
    background: url(http://example.com/bg.png)
}
h1 { color: #333; }"#;

const JS: &str = r#"let count = 0;
document.addEventListener('click', function () {
    count += 1;
    console.log('count', count);
});"#;

const FULL_DOCUMENT: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Mine</title>
    <link rel="stylesheet" href="a.css">
    <script src="lib.js"></script>
</head>
<body>
    <p>Hello</p>
</body>
</html>"#;

fn bench_compose(c: &mut Criterion) {
    c.bench_function("compose_fragment", |b| {
        b.iter(|| compose(black_box(HTML), black_box(CSS), black_box(JS)))
    });

    c.bench_function("compose_full_document", |b| {
        b.iter(|| compose(black_box(FULL_DOCUMENT), black_box(CSS), black_box(JS)))
    });

    let options = ComposeOptions {
        token: Some(RunToken::derive(1, HTML, CSS, JS)),
        escape_closing_tags: true,
    };
    c.bench_function("compose_with_token", |b| {
        b.iter(|| compose_with(black_box(HTML), black_box(CSS), black_box(JS), &options))
    });
}

fn bench_validate(c: &mut Criterion) {
    c.bench_function("validate_html", |b| {
        b.iter(|| validate::validate(FragmentKind::Html, black_box(HTML)))
    });
    c.bench_function("validate_css", |b| {
        b.iter(|| validate::validate(FragmentKind::Css, black_box(CSS)))
    });
    c.bench_function("validate_javascript", |b| {
        b.iter(|| validate::validate(FragmentKind::Js, black_box(JS)))
    });
}

criterion_group!(benches, bench_compose, bench_validate);
criterion_main!(benches);
