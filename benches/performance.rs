//! Performance benchmarks for the Miru runtime.
//!
//! Run with: cargo bench
//!
//! Covers the work done without a host round trip: local document queries,
//! XPath evaluation, host-side evaluation of remote queries and response
//! decoding.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use miru_runtime::extensions::document::{evaluate, HostQuery, LocalNode, XPathMatch};
use miru_runtime::extensions::ipc::{NodeScope, QueryOp, XPathOp};
use miru_runtime::extensions::ResponseBody;

/// A listing page with `rows` entries.
fn listing(rows: usize) -> String {
    let mut html = String::from(
        "<!DOCTYPE html><html><head><title>Latest</title></head><body><ul class=\"list\">",
    );
    for i in 0..rows {
        html.push_str(&format!(
            "<li class=\"item\" data-id=\"{i}\"><a href=\"/title/{i}\">Title {i}</a>\
             <img src=\"/cover/{i}.jpg\"><span class=\"update\">Ep {i}</span></li>"
        ));
    }
    html.push_str("</ul></body></html>");
    html
}

/// Benchmark CSS selector queries on a parsed document.
fn bench_local_queries(c: &mut Criterion) {
    let mut group = c.benchmark_group("local_queries");

    for rows in [10, 100, 500] {
        let html = listing(rows);

        group.bench_with_input(BenchmarkId::new("parse", rows), &html, |b, html| {
            b.iter(|| black_box(LocalNode::root(black_box(html.as_str()))))
        });

        let root = LocalNode::root(html.as_str());
        group.bench_with_input(BenchmarkId::new("query_selector_all", rows), &root, |b, root| {
            b.iter(|| {
                let items = root.query_selector_all(black_box("li.item"));
                black_box(items.iter().filter_map(|item| item.text()).count())
            })
        });

        group.bench_with_input(BenchmarkId::new("attr", rows), &html, |b, html| {
            b.iter(|| {
                let node = LocalNode::new(html.as_str(), Some("li:last-child a"));
                black_box(node.attr("href"))
            })
        });
    }

    group.finish();
}

/// Benchmark XPath evaluation.
fn bench_xpath(c: &mut Criterion) {
    let mut group = c.benchmark_group("xpath");
    let html = listing(100);

    let expressions = [
        ("descendant", "//li/a"),
        ("attribute", "//li/a/@href"),
        ("predicate", "//li[@data-id='50']/span/text()"),
        ("contains", "//a[contains(@href, '/title/9')]"),
        ("positional", "//ul/li[last()]/img/@src"),
    ];

    for (name, expr) in expressions {
        group.bench_with_input(BenchmarkId::from_parameter(name), &expr, |b, expr| {
            b.iter(|| black_box(XPathMatch::evaluate(&html, black_box(expr)).all_html()))
        });
    }

    group.finish();
}

/// Benchmark the host side of remote-generation queries.
fn bench_host_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("host_evaluate");
    let html = listing(100);

    group.bench_function("select_text", |b| {
        b.iter(|| {
            black_box(evaluate(HostQuery::Select {
                content: html.clone(),
                selector: Some("li:nth-child(42) span".to_string()),
                op: QueryOp::Text,
                scope: NodeScope::Document,
            }))
        })
    });

    group.bench_function("select_all", |b| {
        b.iter(|| {
            black_box(evaluate(HostQuery::SelectAll {
                content: html.clone(),
                selector: "li.item".to_string(),
                scope: NodeScope::Document,
            }))
        })
    });

    group.bench_function("xpath_attrs", |b| {
        b.iter(|| {
            black_box(evaluate(HostQuery::XPath {
                content: html.clone(),
                expression: "//img/@src".to_string(),
                op: XPathOp::Attrs,
            }))
        })
    });

    group.finish();
}

/// Benchmark best-effort response decoding.
fn bench_response_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("response_decode");

    let json = serde_json::json!({
        "list": (0..100).map(|i| serde_json::json!({"title": format!("Title {i}"), "url": format!("/t/{i}")})).collect::<Vec<_>>()
    })
    .to_string();
    let raw = listing(100);

    group.bench_function("json", |b| {
        b.iter(|| black_box(ResponseBody::decode(black_box(json.clone()))))
    });

    group.bench_function("raw_fallback", |b| {
        b.iter(|| black_box(ResponseBody::decode(black_box(raw.clone()))))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_local_queries,
    bench_xpath,
    bench_host_evaluate,
    bench_response_decode,
);

criterion_main!(benches);
