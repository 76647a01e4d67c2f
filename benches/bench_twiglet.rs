#![allow(
    clippy::tests_outside_test_module,
    clippy::unwrap_used,
    reason = "benchmark"
)]

use std::hint::black_box;

use criterion::{Criterion, criterion_group, criterion_main};
use futures_util::FutureExt;
use twiglet::{Context, Template, TemplateOptions, TwigEngine, TwigInterface};

mod utils;

const INVOICE: &str = include_str!("invoice.twig");
const TOTALS: &str = include_str!("totals.twig");

fn twiglet_benchmark(c: &mut Criterion) {
    let mut engine = TwigEngine::new();
    engine.set_default_options(TemplateOptions::new().allow_inline_includes(true));
    engine.add_template("totals", TOTALS).unwrap();
    engine.add_template("invoice", INVOICE).unwrap();

    // Converted once so the loop measures rendering only
    let orders: Vec<Context> = utils::generate_orders(100)
        .into_iter()
        .map(Context::from)
        .collect();

    utils::print_binary_size();

    let mut group = c.benchmark_group("Invoice");
    group.sample_size(50);

    group.bench_function("render", |b| {
        b.iter(|| {
            for order in &orders {
                black_box(engine.render("invoice", Some(order)).unwrap());
            }
        });
    });

    // Nothing suspends, so the async path finishes on the first poll
    group.bench_function("render_async", |b| {
        b.iter(|| {
            for order in &orders {
                let rendered = engine.render_async("invoice", Some(order)).now_or_never();
                black_box(rendered.unwrap().unwrap());
            }
        });
    });

    group.bench_function("compile", |b| {
        b.iter(|| black_box(Template::new(INVOICE).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, twiglet_benchmark);
criterion_main!(benches);
