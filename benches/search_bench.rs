//! Criterion benchmarks for the query engine.
//!
//! Measures the two costs callers care about separately: compiling a query
//! (lex + parse + constant folding) and applying a compiled query to a
//! document.
//!
//! Run:
//!   cargo bench
//!   cargo bench -- compile_cost   # one group

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use indexmap::IndexMap;
use remespath::{compile, JNode, RemesParser};

// ── Data builders ─────────────────────────────────────────────────────────────

/// {"values": [0.0, 1.0, ..., (n-1).0]}
fn numeric_doc(n: usize) -> JNode {
    let values: Vec<JNode> = (0..n).map(|i| JNode::Float(i as f64)).collect();
    let mut root = IndexMap::new();
    root.insert("values".to_string(), JNode::array(values));
    JNode::object(root)
}

/// n row objects: {id, price, inStock}.
fn rows_doc(n: usize) -> JNode {
    let rows: Vec<JNode> = (0..n)
        .map(|i| {
            let mut m = IndexMap::new();
            m.insert("id".to_string(), JNode::Int(i as i64));
            m.insert("price".to_string(), JNode::Float(10.0 + i as f64 * 2.5));
            m.insert("inStock".to_string(), JNode::Bool(i % 2 == 0));
            JNode::object(m)
        })
        .collect();
    let mut root = IndexMap::new();
    root.insert("rows".to_string(), JNode::array(rows));
    JNode::object(root)
}

/// Nesting for recursive-search benchmarks: k levels, a "needle" per level.
fn nested_doc(depth: usize) -> JNode {
    let mut node = JNode::object(IndexMap::new());
    for i in 0..depth {
        let mut m = IndexMap::new();
        m.insert("needle".to_string(), JNode::Int(i as i64));
        m.insert("child".to_string(), node);
        node = JNode::object(m);
    }
    node
}

// ── Bench groups ──────────────────────────────────────────────────────────────

fn bench_compile_cost(c: &mut Criterion) {
    let mut group = c.benchmark_group("compile_cost");
    group.sample_size(300);

    let cases: &[(&str, &str)] = &[
        ("constant_arith", "2 - 4 * 3.5 ** 2"),
        ("path_chain", "@.rows[:].price"),
        ("filter", "@.rows[@[:].price > 100][:5]"),
        (
            "projection",
            "@.rows{first: @[0], cheap: @[@[:].price < 50]}",
        ),
    ];
    for (name, query) in cases {
        group.bench_function(*name, |b| b.iter(|| black_box(compile(black_box(query)))));
    }

    // a cache hit skips lexing and parsing entirely
    let mut parser = RemesParser::new();
    parser.compile("@.rows[:].price").unwrap();
    group.bench_function("cached_hit", |b| {
        b.iter(|| black_box(parser.compile(black_box("@.rows[:].price")).unwrap()))
    });

    group.finish();
}

fn bench_apply(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");

    // slice and filter across three sizes
    for n in [100_usize, 1000, 10000] {
        let doc = numeric_doc(n);
        let slice = compile("@.values[::2]").unwrap();
        let filter = compile("@.values[@ > 50.0]").unwrap();
        let arith = compile("@.values * 2 + 1").unwrap();

        group.bench_with_input(BenchmarkId::new("slice_step2", n), &doc, |b, d| {
            b.iter(|| black_box(slice.apply(black_box(d)).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("filter_gt", n), &doc, |b, d| {
            b.iter(|| black_box(filter.apply(black_box(d)).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("vectorized_arith", n), &doc, |b, d| {
            b.iter(|| black_box(arith.apply(black_box(d)).unwrap()))
        });
    }

    // field access through a filter over row objects
    {
        let doc = rows_doc(1000);
        let q = compile("@.rows[@[:].price > 100][:].id").unwrap();
        group.bench_function("filter_rows_then_field", |b| {
            b.iter(|| black_box(q.apply(black_box(&doc)).unwrap()))
        });
    }

    // reductions
    {
        let doc = numeric_doc(1000);
        for (name, query) in [
            ("sum", "sum(@.values)"),
            ("max", "max(@.values)"),
            ("sorted_desc", "sorted(@.values, true)"),
        ] {
            let q = compile(query).unwrap();
            group.bench_function(name, |b| {
                b.iter(|| black_box(q.apply(black_box(&doc)).unwrap()))
            });
        }
    }

    group.finish();
}

fn bench_recursive_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("recursive_search");

    for depth in [8_usize, 64] {
        let doc = nested_doc(depth);
        let q = compile("@..needle").unwrap();
        group.bench_with_input(BenchmarkId::new("by_name", depth), &doc, |b, d| {
            b.iter(|| black_box(q.apply(black_box(d)).unwrap()))
        });
        let q = compile("@..g`^need`").unwrap();
        group.bench_with_input(BenchmarkId::new("by_regex", depth), &doc, |b, d| {
            b.iter(|| black_box(q.apply(black_box(d)).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_compile_cost, bench_apply, bench_recursive_search);
criterion_main!(benches);
