use std::{thread, time::Duration, time::Instant};

use kademlia_routing::{Config, Id, Kademlia, SearchRequest, Testnet, ID_BITS};

use clap::Parser;

use tracing::Level;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Number of nodes on the testnet
    #[arg(short, long, default_value_t = 20)]
    nodes: usize,
    /// Number of closest nodes to look up
    #[arg(short, long, default_value_t = 5)]
    max: usize,
    /// Bit string to look up, random if missing
    target: Option<String>,
}

fn main() {
    tracing_subscriber::fmt()
        // Switch to DEBUG or TRACE to follow joins and lookups
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    let target = match cli.target {
        Some(bits) => {
            let id: Id = bits.parse().expect("Expected a bit string");
            assert_eq!(id.bit_len(), ID_BITS, "Expected a {ID_BITS} bit target");
            id
        }
        None => Id::random(ID_BITS, &mut rand::thread_rng()),
    };

    let testnet = Testnet::new();
    let nodes = spawn_testnet(&testnet, cli.nodes.max(1));

    println!("Waiting for {} nodes to join...", nodes.len());
    thread::sleep(Duration::from_secs(1));

    for node in &nodes {
        let info = node.info().unwrap();
        println!(
            "{} knows {} nodes in {} buckets",
            info.id(),
            info.routing_table_size(),
            info.bucket_count()
        );
    }

    println!("\nLooking up {} closest nodes to {} ...", cli.max, target);
    let start = Instant::now();

    let response = nodes[nodes.len() - 1]
        .search(SearchRequest {
            target: target.clone(),
            max: cli.max,
        })
        .unwrap();

    println!(
        "Lookup finished in {:?} milliseconds, got {} nodes:",
        start.elapsed().as_millis(),
        response.nodes.len()
    );
    for node in &response.nodes {
        println!("{} {}", node.link, node.id);
    }

    for node in nodes {
        node.kill();
        let _ = node.join();
    }
}

fn spawn_testnet(testnet: &Testnet, count: usize) -> Vec<Kademlia> {
    (0..count)
        .map(|i| {
            let bootstrap = (i > 0).then(|| "node-0".to_string());

            testnet
                .spawn(
                    &format!("node-{i}"),
                    Config {
                        bootstrap,
                        ..Default::default()
                    },
                )
                .unwrap()
        })
        .collect()
}
