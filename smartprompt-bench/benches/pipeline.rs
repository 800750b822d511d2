//! smartprompt Benchmark Suite
//!
//! Hot paths measured over a synthetic catalogue:
//!   index_build_500_modules ......... full automaton compile
//!   search_short_request ............ one scan of a typical request
//!   search_long_request ............. one scan of a 4 KB paragraph
//!   route_500_modules ............... match + gate + closure + rank
//!   assemble_10_modules ............. grouped document with templates
//!   engine_reload_500_modules ....... load, index, and swap

use std::collections::BTreeMap;
use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use smartprompt_core::config::{AssemblerConfig, EngineConfig, RouterConfig};
use smartprompt_core::{
    Category, ContentAssembler, ContentModule, Engine, EnvironmentSnapshot, IntentRouter, ModuleDefinition,
    ModuleRegistry, PatternIndex, StaticSource,
};

const NODE_BUDGET: usize = 4_000_000;

const CATEGORIES: [Category; 4] = [
    Category::Skill,
    Category::SituationalContext,
    Category::Memory,
    Category::Extension,
];

fn make_module(i: usize) -> ContentModule {
    let mut builder = ContentModule::builder(format!("Module{i:04}"))
        .category(CATEGORIES[i % CATEGORIES.len()])
        .priority(i32::try_from(i % 50).unwrap_or(0))
        .intent(format!("intent{}", i % 40))
        .keyword(format!("topic{i}"))
        .keyword(format!("alt{i}word"))
        .weighted_keyword(format!("rare{i}"), 2.0)
        .body(format!("Guidance block {i} for {{season}} operations."))
        .templated(true);
    if i % 7 == 0 && i > 0 {
        builder = builder.dependency(format!("Module{:04}", i - 1));
    }
    if i % 11 == 0 {
        builder = builder.requires_combat(true);
    }
    builder.build().expect("valid module")
}

fn make_registry(n: usize) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new();
    registry
        .register(
            ContentModule::builder("CoreIdentity")
                .category(Category::Core)
                .always_active(true)
                .body("You are a careful assistant.")
                .build()
                .expect("valid module"),
        )
        .expect("unique");
    for i in 0..n {
        registry.register(make_module(i)).expect("unique");
    }
    registry
}

fn make_definition(i: usize) -> ModuleDefinition {
    let mut def = ModuleDefinition::named(format!("Module{i:04}"));
    def.trigger_intents = vec![format!("intent{}", i % 40)];
    def.expanded_keywords = vec![format!("topic{i}"), format!("alt{i}word")];
    def.body = Some(format!("Guidance block {i}."));
    def
}

fn long_request() -> String {
    let mut text = String::with_capacity(4096);
    let mut i = 0;
    while text.len() < 4096 {
        text.push_str(&format!("plain filler sentence {i} with topic{} mixed in. ", i * 13));
        i += 1;
    }
    text
}

/// Benchmark: compiling the automaton over 500 modules.
fn bench_index_build(c: &mut Criterion) {
    let registry = make_registry(500);
    c.bench_function("index_build_500_modules", |b| {
        b.iter(|| {
            let index = PatternIndex::build(black_box(&registry), NODE_BUDGET).expect("build");
            black_box(index);
        });
    });
}

/// Benchmark: search latency by input length.
fn bench_search(c: &mut Criterion) {
    let registry = make_registry(500);
    let index = PatternIndex::build(&registry, NODE_BUDGET).expect("build");
    let short = "need help with topic42 and rare7 before winter";
    let long = long_request();

    c.bench_function("search_short_request", |b| {
        b.iter(|| black_box(index.search(black_box(short))));
    });
    c.bench_function("search_long_request", |b| {
        b.iter(|| black_box(index.search(black_box(&long))));
    });
}

/// Benchmark: routing cost as the catalogue grows.
fn bench_route(c: &mut Criterion) {
    let config = RouterConfig::default();
    let env = EnvironmentSnapshot::in_combat();
    let request = "topic14 alt22word rare33 intent5 topic77";

    let mut group = c.benchmark_group("route");
    for size in [50usize, 500, 2000] {
        let registry = make_registry(size);
        let index = PatternIndex::build(&registry, NODE_BUDGET).expect("build");
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            let router = IntentRouter::new(&registry, &index, &config);
            b.iter(|| black_box(router.route(black_box(request), &env)));
        });
    }
    group.finish();
}

/// Benchmark: document assembly for a typical routed set.
fn bench_assemble(c: &mut Criterion) {
    let registry = make_registry(10);
    let modules: Vec<Arc<ContentModule>> = registry.all_modules().cloned().collect();
    let env = EnvironmentSnapshot::peaceful();
    let mut context = BTreeMap::new();
    context.insert("season".to_string(), "spring".to_string());
    let assembler = ContentAssembler::new(AssemblerConfig {
        debug_annotations: true,
        ..AssemblerConfig::default()
    });

    c.bench_function("assemble_10_modules", |b| {
        b.iter(|| black_box(assembler.assemble(black_box(&modules), &env, &context)));
    });
}

/// Benchmark: a full reload through the engine, snapshot swap included.
fn bench_reload(c: &mut Criterion) {
    let definitions: Vec<ModuleDefinition> = (0..500).map(make_definition).collect();
    let engine = Engine::new(
        EngineConfig::default(),
        vec![Box::new(StaticSource::new(definitions))],
    );

    c.bench_function("engine_reload_500_modules", |b| {
        b.iter(|| black_box(engine.reload().expect("reload")));
    });
}

criterion_group!(
    benches,
    bench_index_build,
    bench_search,
    bench_route,
    bench_assemble,
    bench_reload,
);
criterion_main!(benches);
