//! # Resolution Benchmarks
//!
//! Performance benchmarks for eql-core resolution.
//!
//! Run with: `cargo bench -p eql-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use eql_core::expr::{and, eq, gt, not, or, var};
use eql_core::{InstanceCache, Query, Registry, Value, Variable};
use std::hint::black_box;

/// A chain of `size` bodies, each fixed to the next.
struct Chain {
    registry: Registry,
    body: Variable,
    fixed: Variable,
    other: Variable,
}

fn create_chain(size: usize) -> Chain {
    let cache = InstanceCache::shared();
    let mut previous: Option<Value> = None;
    for i in 0..size {
        let body = Value::Entity(cache.create(
            "Body",
            [("name", Value::from(format!("Body{}", i))), ("size", Value::Int(i as i64))],
        ));
        if let Some(parent) = previous {
            cache.create("Fixed", [("parent", parent), ("child", body.clone())]);
        }
        previous = Some(body);
    }
    let mut registry = Registry::new(cache);
    Chain {
        body: registry.declare_typed("body", "Body"),
        fixed: registry.declare_typed("fixed", "Fixed"),
        other: registry.declare_typed("other", "Body"),
        registry,
    }
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_implicit_join(c: &mut Criterion) {
    let mut group = c.benchmark_group("implicit_join");

    for size in [100, 1000, 10000].iter() {
        let chain = create_chain(*size);
        let query = Query::set_of(
            [var(&chain.body), var(&chain.other)],
            [
                eq(&chain.body, var(&chain.fixed).attr("parent")),
                eq(&chain.other, var(&chain.fixed).attr("child")),
            ],
        );
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(query.evaluate(&chain.registry).count()));
        });
    }

    group.finish();
}

fn bench_filter_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_scan");

    for size in [100, 1000, 10000].iter() {
        let chain = create_chain(*size);
        let threshold = (*size / 2) as i64;
        let query = Query::entity(&chain.body, [gt(var(&chain.body).attr("size"), threshold)]);
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(query.evaluate(&chain.registry).count()));
        });
    }

    group.finish();
}

fn bench_negated_disjunction(c: &mut Criterion) {
    let mut group = c.benchmark_group("negated_disjunction");

    for size in [100, 1000].iter() {
        let chain = create_chain(*size);
        let size_of = || var(&chain.body).attr("size");
        let condition = and([
            or([gt(size_of(), 10_i64), eq(size_of(), 3_i64)]),
            not(eq(size_of(), 50_i64)),
        ]);
        let query = Query::entity(&chain.body, [condition]).negated();
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| black_box(query.evaluate(&chain.registry).count()));
        });
    }

    group.finish();
}

fn bench_first_solution(c: &mut Criterion) {
    let chain = create_chain(10000);
    let query = Query::set_of(
        [var(&chain.body), var(&chain.other)],
        [
            eq(&chain.body, var(&chain.fixed).attr("parent")),
            eq(&chain.other, var(&chain.fixed).attr("child")),
        ],
    );

    c.bench_function("first_solution_10000", |b| {
        b.iter(|| black_box(query.evaluate(&chain.registry).next().is_some()));
    });
}

criterion_group!(
    benches,
    bench_implicit_join,
    bench_filter_scan,
    bench_negated_disjunction,
    bench_first_solution,
);

criterion_main!(benches);
