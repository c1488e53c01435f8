//! Micro-benchmarks for Router operations: touch, find, and stale at varying
//! table sizes. Reports nanoseconds-per-operation.
//!
//! Run: `cargo bench --bench routing_table`

use std::time::Instant;

use kademlia_routing::routing::{Router, SimpleTreeLayout};
use kademlia_routing::{Id, Node, ID_BITS};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn main() {
    println!("routing_table\n");

    let mut rng = StdRng::seed_from_u64(42);

    bench_touch(&mut rng);
    bench_find(&mut rng);
    bench_stale(&mut rng);
}

fn router(rng: &mut StdRng) -> Router {
    let layout = SimpleTreeLayout::new(2, 20, 20).unwrap();

    Router::new(Id::random(ID_BITS, rng), &layout, 20).unwrap()
}

fn nodes(count: usize, rng: &mut StdRng) -> Vec<Node> {
    (0..count)
        .map(|i| Node::new(Id::random(ID_BITS, rng), format!("node-{i}")))
        .collect()
}

fn fill(router: &mut Router, nodes: &[Node]) {
    for node in nodes.iter().cloned() {
        router.touch(Instant::now(), node).unwrap();
    }
}

fn bench_touch(rng: &mut StdRng) {
    println!("touch");

    for prefilled in [0, 100, 1000] {
        let mut router = router(rng);
        fill(&mut router, &nodes(prefilled, rng));

        // Pre-generate nodes outside the timed section
        let fresh = nodes(1000, rng);

        let start = Instant::now();
        for node in fresh {
            router.touch(Instant::now(), node).unwrap();
        }
        let per_op = start.elapsed().as_nanos() / 1000;
        println!(
            "{prefilled:>4} prefilled: {per_op}ns/op (final size: {})",
            router.len()
        );
    }

    println!();
}

fn bench_find(rng: &mut StdRng) {
    println!("find");

    let targets: Vec<_> = (0..1000).map(|_| Id::random(ID_BITS, rng)).collect();

    for size in [50, 200, 1000, 5000] {
        let mut router = router(rng);
        fill(&mut router, &nodes(size, rng));

        let start = Instant::now();
        for target in &targets {
            let _ = router.find(target, 20, false).unwrap();
        }
        let per_op = start.elapsed().as_nanos() / targets.len() as u128;
        println!("{size:>4} nodes: {per_op}ns/op");
    }

    println!();
}

fn bench_stale(rng: &mut StdRng) {
    println!("stale");

    let mut router = router(rng);
    let known = nodes(2000, rng);
    fill(&mut router, &known);

    let n = known.len();
    let start = Instant::now();
    for node in &known {
        // Cached nodes were never in a bucket.
        let _ = router.stale(node);
    }
    let per_op = start.elapsed().as_nanos() / n as u128;
    println!("{per_op}ns/op ({n} nodes, final size: {})", router.len());
    println!();
}
