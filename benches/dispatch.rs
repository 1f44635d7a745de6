//! Dispatch Benchmarks
//!
//! Run with: cargo bench --bench dispatch

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use std::sync::Arc;
use tokio::runtime::Runtime;

use chatterm::bus::InboundMessage;
use chatterm::channels::MemoryTransport;
use chatterm::commands::{builtin_commands, tokenize, CommandRegistry, Dispatcher, Grammar, BUILTIN_UNIT};
use chatterm::config::Config;

fn benchmark_parse(c: &mut Criterion) {
    let grammar = Grammar::default();

    let mut group = c.benchmark_group("parse");
    group.throughput(Throughput::Elements(1));

    group.bench_function("fenced_extract_tokenize", |b| {
        b.iter(|| {
            let line = grammar
                .extract(black_box("```sh\n$ deploy \"web frontend\" --env prod # ship it```"))
                .unwrap();
            tokenize(&line.text).unwrap()
        });
    });

    group.bench_function("mundane_extract_tokenize", |b| {
        b.iter(|| {
            let line = grammar.extract(black_box("<<echo hello world")).unwrap();
            tokenize(&line.text).unwrap()
        });
    });

    group.bench_function("not_a_command", |b| {
        b.iter(|| grammar.extract(black_box("just chatting about ```code``` here")));
    });

    group.finish();
}

fn benchmark_dispatch(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let registry = Arc::new(CommandRegistry::new());
    registry.load(BUILTIN_UNIT, builtin_commands()).unwrap();
    let transport = Arc::new(MemoryTransport::new());
    let dispatcher = rt.block_on(async {
        Dispatcher::new(&Config::default(), registry, transport)
    });

    let mut group = c.benchmark_group("dispatch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("echo", |b| {
        b.to_async(&rt).iter(|| async {
            let msg = InboundMessage::new("bench", "user1", "chat1", "<<echo hello");
            dispatcher.dispatch(black_box(&msg)).await.unwrap()
        });
    });

    group.bench_function("not_found", |b| {
        b.to_async(&rt).iter(|| async {
            let msg = InboundMessage::new("bench", "user1", "chat1", "``` $ nope```");
            dispatcher.dispatch(black_box(&msg)).await.unwrap()
        });
    });

    group.bench_function("ignored", |b| {
        b.to_async(&rt).iter(|| async {
            let msg = InboundMessage::new("bench", "user1", "chat1", "hello there");
            dispatcher.dispatch(black_box(&msg)).await.unwrap()
        });
    });

    group.finish();
}

fn benchmark_registry(c: &mut Criterion) {
    let registry = CommandRegistry::new();
    registry.load(BUILTIN_UNIT, builtin_commands()).unwrap();

    let mut group = c.benchmark_group("registry");

    group.bench_function("resolve_alias", |b| {
        b.iter(|| registry.resolve(black_box("?")));
    });

    group.bench_function("reload_unit", |b| {
        b.iter(|| registry.load(BUILTIN_UNIT, builtin_commands()).unwrap());
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_parse,
    benchmark_dispatch,
    benchmark_registry
);
criterion_main!(benches);
