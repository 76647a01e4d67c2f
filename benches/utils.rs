#![allow(
    clippy::unwrap_used,
    clippy::cast_precision_loss,
    dead_code,
    reason = "benchmark helpers"
)]

use rand::{Rng, SeedableRng, rngs::StdRng};
use serde_json::{Value, json};

const TAGS: [&str; 6] = ["sale", "new", "gift", "fragile", "bulk", "eco"];

/// Builds `n` invoice contexts from a fixed seed.
///
/// Some lines have a zero quantity so the loop filter has work to do, and
/// notes carry markup for the escaper.
pub fn generate_orders(n: usize) -> Vec<Value> {
    let mut rng = StdRng::seed_from_u64(42);

    (0..n)
        .map(|id| {
            let lines: Vec<Value> = (0..rng.random_range(2..12))
                .map(|_| {
                    let tags: Vec<&str> = TAGS
                        .iter()
                        .copied()
                        .filter(|_| rng.random_bool(0.3))
                        .collect();
                    json!({
                        "title": words(&mut rng, 1, 5),
                        "quantity": rng.random_range(0..5),
                        "price": f64::from(rng.random_range(99_u32..50_000)) / 100.0,
                        "tags": tags,
                    })
                })
                .collect();
            let coupon = rng
                .random_bool(0.25)
                .then(|| words(&mut rng, 1, 1));

            json!({
                "order": {
                    "id": id,
                    "placed": rng.random_range(1_500_000_000_i64..1_750_000_000),
                    "customer": {
                        "name": words(&mut rng, 2, 3),
                        "vip": rng.random_bool(0.1),
                    },
                    "lines": lines,
                    "coupon": coupon,
                    "note": format!("<em>{}</em> & {}", words(&mut rng, 1, 3), words(&mut rng, 1, 3)),
                },
            })
        })
        .collect()
}

/// Lowercase words separated by single spaces.
fn words(rng: &mut StdRng, min: usize, max: usize) -> String {
    let count = rng.random_range(min..=max);
    (0..count)
        .map(|_| {
            let len = rng.random_range(3..9);
            (0..len)
                .map(|_| char::from(rng.random_range(b'a'..=b'z')))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reports the size of the running bench binary, which tracks how much the
/// engine adds to a release build.
pub fn print_binary_size() {
    let path = std::env::current_exe().unwrap();
    let bytes = std::fs::metadata(&path).unwrap().len();
    println!(
        "{}: {:.1} KiB ({bytes} bytes)",
        path.display(),
        bytes as f64 / 1024.0
    );
}
