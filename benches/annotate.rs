#[macro_use]
extern crate criterion;

use contextrt::{Attribute, Config, Properties, Runtime, TypeTag, Variant};
use criterion::{black_box, Criterion};

fn fresh_runtime() -> Runtime {
    Runtime::for_test(Config { automerge: true })
}

fn region_attr(rt: &Runtime) -> Attribute {
    rt.create_attribute("region", TypeTag::String, Properties::empty())
}

fn begin_end_on_interned_node(c: &mut Criterion) {
    let rt = fresh_runtime();
    let region = region_attr(&rt);
    // Every begin/end here reuses the same (region, "hot") node after the
    // first iteration, exercising `intern_child`'s scan-and-reuse path.
    c.bench_function("begin/end on an already-interned node", |b| {
        b.iter(|| {
            rt.begin(&region, Variant::from_str("hot")).unwrap();
            black_box(rt.end(&region).unwrap());
        });
    });
}

fn begin_end_on_fresh_node(c: &mut Criterion) {
    let rt = fresh_runtime();
    let region = region_attr(&rt);
    let mut i: u64 = 0;
    // A distinct value every call forces `intern_child` to allocate a new
    // node each time instead of reusing a sibling.
    c.bench_function("begin/end allocating a fresh node", |b| {
        b.iter(|| {
            i += 1;
            rt.begin(&region, Variant::Uint(i)).unwrap();
            black_box(rt.end(&region).unwrap());
        });
    });
}

fn asvalue_set(c: &mut Criterion) {
    let rt = fresh_runtime();
    let counter = rt.create_attribute("counter", TypeTag::Int, Properties::ASVALUE | Properties::SCOPE_PROCESS);
    c.bench_function("set on an ASVALUE attribute", |b| {
        b.iter(|| black_box(rt.set(&counter, Variant::Int(1)).unwrap()));
    });
}

fn pull_snapshot_small(c: &mut Criterion) {
    let rt = fresh_runtime();
    let region = region_attr(&rt);
    rt.begin(&region, Variant::from_str("outer")).unwrap();
    rt.begin(&region, Variant::from_str("inner")).unwrap();
    c.bench_function("pull_snapshot with one active nesting", |b| {
        b.iter(|| {
            let mut snap = contextrt::Snapshot::new();
            rt.pull_snapshot(contextrt::ScopeMask::ALL, None, &mut snap);
            black_box(snap);
        });
    });
}

criterion_group!(benches, begin_end_on_interned_node, begin_end_on_fresh_node, asvalue_set, pull_snapshot_small);
criterion_main!(benches);
