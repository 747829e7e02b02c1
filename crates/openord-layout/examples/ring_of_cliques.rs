//! Lay out a ring of dense clusters and report how well they separate.
//!
//! Run with: cargo run -p openord-layout --example ring_of_cliques

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use openord_core::{GraphData, GraphModel, NodeId};
use openord_layout::{OpenOrdConfig, OpenOrdLayout};

const CLIQUES: u64 = 12;
const CLIQUE_SIZE: u64 = 25;

fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut data = GraphData::new();
    for id in 0..CLIQUES * CLIQUE_SIZE {
        data.add_node(NodeId(id))?;
    }
    for c in 0..CLIQUES {
        let base = c * CLIQUE_SIZE;
        for a in 0..CLIQUE_SIZE {
            for b in a + 1..CLIQUE_SIZE {
                data.add_edge(NodeId(base + a), NodeId(base + b), 1.0)?;
            }
        }
        // One weak tie to the next clique closes the ring.
        let next = ((c + 1) % CLIQUES) * CLIQUE_SIZE;
        data.add_edge(NodeId(base), NodeId(next + 1), 0.2)?;
    }

    println!(
        "Ring of {} cliques: {} nodes, {} edges",
        CLIQUES,
        data.node_count(),
        data.edge_count()
    );

    let graph = Arc::new(GraphModel::new(data));
    let config = OpenOrdConfig {
        num_iterations: 500,
        rand_seed: 2024,
        barnes_hut_threshold: 200,
        ..Default::default()
    };
    let mut layout = OpenOrdLayout::with_graph(Arc::clone(&graph), config)?;

    let start = Instant::now();
    layout.init_algo()?;
    let mut last_stage = None;
    while layout.is_running() {
        layout.step()?;
        if layout.stage() != last_stage {
            last_stage = layout.stage();
            println!(
                "  {:>5.1}%  stage {:?}",
                layout.progress() * 100.0,
                last_stage.map(|s| s.label()).unwrap_or("-")
            );
        }
    }
    layout.end_algo()?;
    println!("Layout finished in {:.2?}", start.elapsed());

    // Mean distance of each clique's nodes to their own centroid versus the
    // spread of the centroids.
    let data = graph.read();
    let centroids: Vec<(f32, f32)> = data
        .nodes()
        .chunks(CLIQUE_SIZE as usize)
        .map(|chunk| {
            let n = chunk.len() as f32;
            (
                chunk.iter().map(|node| node.x).sum::<f32>() / n,
                chunk.iter().map(|node| node.y).sum::<f32>() / n,
            )
        })
        .collect();
    let spread = |points: &mut dyn Iterator<Item = ((f32, f32), (f32, f32))>| {
        let (sum, count) = points.fold((0.0f32, 0usize), |(sum, count), (a, b)| {
            (sum + ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt(), count + 1)
        });
        sum / count.max(1) as f32
    };
    let within = spread(&mut data.nodes().iter().enumerate().map(|(i, node)| {
        ((node.x, node.y), centroids[i / CLIQUE_SIZE as usize])
    }));
    let between = spread(
        &mut centroids
            .iter()
            .flat_map(|&a| centroids.iter().map(move |&b| (a, b))),
    );

    println!("Mean distance to own clique centroid: {within:.1}");
    println!("Mean distance between clique centroids: {between:.1}");

    Ok(())
}
