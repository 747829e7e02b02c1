//! End-to-end layout scenarios against an in-memory host graph.

use std::sync::Arc;

use openord_core::{GraphData, GraphModel, GraphNode, LayoutData, NodeId};
use openord_layout::{
    run_to_completion, EngineState, GraphSnapshot, LayoutError, OpenOrdConfig, OpenOrdLayout,
    Partitioner, SeedPolicy, Stage, StageSchedule,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

// ============================================================================
// Test Graph Builders
// ============================================================================

#[derive(Default)]
struct TestGraphBuilder {
    data: GraphData,
    next_id: u64,
}

impl TestGraphBuilder {
    fn new() -> Self {
        Self::default()
    }

    fn node(&mut self) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.data.add_node(id).unwrap();
        id
    }

    fn nodes(&mut self, count: usize) -> Vec<NodeId> {
        (0..count).map(|_| self.node()).collect()
    }

    fn fixed_node(&mut self, x: f32, y: f32) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        let node = self.data.insert_node(GraphNode::at(id, x, y)).unwrap();
        node.fixed = true;
        id
    }

    fn edge(&mut self, a: NodeId, b: NodeId, weight: f32) -> &mut Self {
        self.data.add_edge(a, b, weight).unwrap();
        self
    }

    fn cycle(&mut self, nodes: &[NodeId]) -> &mut Self {
        for (i, &a) in nodes.iter().enumerate() {
            let b = nodes[(i + 1) % nodes.len()];
            self.edge(a, b, 1.0);
        }
        self
    }

    fn clique(&mut self, nodes: &[NodeId]) -> &mut Self {
        for (i, &a) in nodes.iter().enumerate() {
            for &b in &nodes[i + 1..] {
                self.edge(a, b, 1.0);
            }
        }
        self
    }

    fn build(&mut self) -> Arc<GraphModel> {
        Arc::new(GraphModel::new(std::mem::take(&mut self.data)))
    }
}

fn config(threads: usize, seed: i64) -> OpenOrdConfig {
    OpenOrdConfig {
        num_threads: threads,
        num_iterations: 100,
        reset_position: true,
        rand_seed: seed,
        ..Default::default()
    }
}

fn run(graph: &Arc<GraphModel>, config: OpenOrdConfig) -> Vec<(f32, f32)> {
    let mut layout = OpenOrdLayout::with_graph(Arc::clone(graph), config).unwrap();
    run_to_completion(&mut layout).unwrap();
    graph.read().nodes().iter().map(|n| (n.x, n.y)).collect()
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((a.0 - b.0).powi(2) + (a.1 - b.1).powi(2)).sqrt()
}

// ============================================================================
// Geometry
// ============================================================================

#[test]
fn test_four_cycle_forms_regular_polygon() {
    for seed in [1, 42, 2024] {
        let mut builder = TestGraphBuilder::new();
        let nodes = builder.nodes(4);
        let graph = builder.cycle(&nodes).build();

        let positions = run(&graph, config(2, seed));

        let cx = positions.iter().map(|p| p.0).sum::<f32>() / 4.0;
        let cy = positions.iter().map(|p| p.1).sum::<f32>() / 4.0;
        let radii: Vec<f32> = positions.iter().map(|&p| distance(p, (cx, cy))).collect();
        let mean = radii.iter().sum::<f32>() / 4.0;
        assert!(mean > 1.0, "collapsed layout: {positions:?}");
        for r in &radii {
            // Documented tolerance: each radius within 25% of the mean.
            assert!((r - mean).abs() <= 0.25 * mean, "seed {seed}: radii {radii:?}");
        }
        for i in 0..4 {
            for j in i + 1..4 {
                assert!(distance(positions[i], positions[j]) > 1.0);
            }
        }
    }
}

#[test]
fn test_isolated_node_stays_at_origin() {
    let mut builder = TestGraphBuilder::new();
    builder.node();
    let graph = builder.build();
    let mut layout = OpenOrdLayout::with_graph(Arc::clone(&graph), config(1, 5)).unwrap();
    layout.init_algo().unwrap();
    while layout.is_running() {
        layout.step().unwrap();
        assert_eq!(layout.positions().unwrap()[0].x, 0.0);
        assert_eq!(layout.positions().unwrap()[0].y, 0.0);
    }
    layout.end_algo().unwrap();
    let data = graph.read();
    assert_eq!((data.nodes()[0].x, data.nodes()[0].y), (0.0, 0.0));
}

#[test]
fn test_isolated_node_beside_connected_pair() {
    let mut builder = TestGraphBuilder::new();
    let pair = builder.nodes(2);
    builder.node();
    let graph = builder.edge(pair[0], pair[1], 1.0).build();

    let positions = run(&graph, config(2, 9));
    assert_eq!(positions[2], (0.0, 0.0));
    assert!(distance(positions[0], positions[1]) > 1.0);
}

#[test]
fn test_fixed_node_keeps_host_position() {
    let mut builder = TestGraphBuilder::new();
    let anchor = builder.fixed_node(10.0, -5.0);
    let others = builder.nodes(3);
    let graph = builder
        .edge(anchor, others[0], 1.0)
        .edge(others[0], others[1], 1.0)
        .edge(others[1], others[2], 1.0)
        .build();

    let positions = run(&graph, config(2, 3));
    assert_eq!(positions[0], (10.0, -5.0));
    assert!(positions[1..].iter().all(|&p| p != (0.0, 0.0)));
}

#[test]
fn test_ring_of_cliques_separates_clusters() {
    const CLIQUES: usize = 4;
    const SIZE: usize = 5;
    let mut builder = TestGraphBuilder::new();
    let groups: Vec<Vec<NodeId>> = (0..CLIQUES).map(|_| builder.nodes(SIZE)).collect();
    for (c, group) in groups.iter().enumerate() {
        builder.clique(group);
        let next = &groups[(c + 1) % CLIQUES];
        builder.edge(group[0], next[1], 1.0);
    }
    let graph = builder.build();

    let config = OpenOrdConfig {
        num_iterations: 200,
        barnes_hut_threshold: 8,
        ..config(3, 11)
    };
    let positions = run(&graph, config);
    assert!(positions.iter().all(|p| p.0.is_finite() && p.1.is_finite()));

    let (mut intra, mut intra_n, mut inter, mut inter_n) = (0.0, 0, 0.0, 0);
    for a in 0..positions.len() {
        for b in a + 1..positions.len() {
            let d = distance(positions[a], positions[b]);
            if a / SIZE == b / SIZE {
                intra += d;
                intra_n += 1;
            } else {
                inter += d;
                inter_n += 1;
            }
        }
    }
    let (intra, inter) = (intra / intra_n as f32, inter / inter_n as f32);
    assert!(intra * 1.5 < inter, "intra {intra} inter {inter}");
}

// ============================================================================
// Run Control
// ============================================================================

#[test]
fn test_same_seed_same_layout() {
    let mut builder = TestGraphBuilder::new();
    let nodes = builder.nodes(12);
    builder.cycle(&nodes).edge(nodes[0], nodes[6], 2.0).edge(nodes[3], nodes[9], 0.5);
    let first = builder.build();
    let second = Arc::new(GraphModel::new(first.read().clone()));

    for policy in [SeedPolicy::PerWorker, SeedPolicy::Shared] {
        let config = OpenOrdConfig {
            seed_policy: policy,
            ..config(3, 77)
        };
        assert_eq!(run(&first, config.clone()), run(&second, config));
    }
}

#[test]
fn test_shared_seed_keeps_mirrored_nodes_together() {
    // With one seed for every worker, worker 0 (nodes 0, 2) and worker 1
    // (nodes 1, 3) draw identical jitter and see mirrored inputs, so the
    // pairs that start on top of each other never separate.
    for seed in [1, 42] {
        let mut builder = TestGraphBuilder::new();
        let nodes = builder.nodes(4);
        let graph = builder.cycle(&nodes).build();
        let config = OpenOrdConfig {
            seed_policy: SeedPolicy::Shared,
            ..config(2, seed)
        };
        let positions = run(&graph, config);
        assert!(distance(positions[0], positions[1]) < 1e-3, "{positions:?}");
        assert!(distance(positions[2], positions[3]) < 1e-3, "{positions:?}");
        assert!(distance(positions[0], positions[2]) > 1.0, "{positions:?}");
    }
}

#[test]
fn test_iteration_stamps_advance_until_done() {
    let mut builder = TestGraphBuilder::new();
    let nodes = builder.nodes(30);
    let graph = builder.cycle(&nodes).build();
    let mut layout = OpenOrdLayout::with_graph(graph, config(4, 1)).unwrap();
    layout.init_algo().unwrap();
    assert_eq!(layout.iteration(), 0);
    assert_eq!(layout.stage(), Some(Stage::Liquid));

    let mut last = 0;
    while layout.is_running() {
        layout.step().unwrap();
        let now = layout.iteration();
        assert!(now > last, "step returned without a newer frame: {last} -> {now}");
        assert_eq!(layout.stage(), Some(StageSchedule::new(100, 0.8).stage_at(now)));
        last = now;
    }
    assert_eq!(layout.iteration(), 100);
    assert_eq!(layout.stage(), Some(Stage::Complete));
    layout.end_algo().unwrap();
}

#[test]
fn test_termination_is_idempotent() {
    let mut builder = TestGraphBuilder::new();
    let nodes = builder.nodes(6);
    let graph = builder.cycle(&nodes).build();
    let mut layout = OpenOrdLayout::with_graph(graph, config(2, 4)).unwrap();
    layout.init_algo().unwrap();
    while layout.is_running() {
        layout.step().unwrap();
    }
    let settled = layout.positions().unwrap();
    for _ in 0..5 {
        layout.step().unwrap();
        assert!(!layout.is_running());
        assert_eq!(layout.positions().unwrap(), settled);
        assert_eq!(layout.iteration(), 100);
    }
    layout.end_algo().unwrap();
    layout.step().unwrap();
    assert_eq!(layout.state(), EngineState::Stopped);
}

#[test]
fn test_cancel_before_first_step() {
    let mut builder = TestGraphBuilder::new();
    let nodes = builder.nodes(5);
    let graph = builder.cycle(&nodes).build();
    let mut layout = OpenOrdLayout::with_graph(Arc::clone(&graph), config(2, 8)).unwrap();
    layout.init_algo().unwrap();
    layout.cancel();
    assert!(!layout.is_running());
    layout.step().unwrap();
    assert_eq!(layout.iteration(), 0);
    layout.end_algo().unwrap();
    // Nothing ran, so the reset positions are written back.
    assert!(graph.read().nodes().iter().all(|n| (n.x, n.y) == (0.0, 0.0)));
}

#[test]
fn test_cancel_mid_run() {
    let mut builder = TestGraphBuilder::new();
    let nodes = builder.nodes(40);
    let graph = builder.cycle(&nodes).build();
    let config = OpenOrdConfig {
        num_iterations: 100_000,
        ..config(2, 8)
    };
    let mut layout = OpenOrdLayout::with_graph(graph, config).unwrap();
    layout.init_algo().unwrap();
    for _ in 0..3 {
        layout.step().unwrap();
    }
    layout.cancel_handle().cancel();
    layout.end_algo().unwrap();
    let state = layout.simulation_state().unwrap();
    assert!(state.canceled);
    assert!(state.iteration_index < state.num_iterations);
}

#[test]
fn test_empty_graph_short_circuits() {
    let graph = TestGraphBuilder::new().build();
    let mut layout = OpenOrdLayout::with_graph(graph, config(4, 0)).unwrap();
    assert_eq!(layout.init_algo(), Err(LayoutError::EmptyGraph));
    assert_eq!(layout.state(), EngineState::Initialized);
    assert!(!layout.is_running());
    assert!(matches!(layout.step(), Err(LayoutError::InvalidState { .. })));
    assert!(layout.positions().is_none());
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_configuration_floors_and_rejections() {
    let mut layout = OpenOrdLayout::new();
    layout
        .configure(OpenOrdConfig {
            num_iterations: 10,
            num_threads: 0,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(layout.config().num_iterations, 100);
    assert_eq!(layout.config().num_threads, 1);

    let err = layout
        .configure(OpenOrdConfig {
            edge_cut: 1.5,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(err, LayoutError::Configuration { property: "edge_cut", .. }));
    // The previous configuration stays in place.
    assert_eq!(layout.config().num_iterations, 100);
}

#[test]
fn test_config_round_trips_through_json() {
    let config = OpenOrdConfig {
        edge_cut: 0.5,
        ..config(2, -9)
    };
    let json = serde_json::to_string(&config).unwrap();
    let restored: OpenOrdConfig = serde_json::from_str(&json).unwrap();
    assert_eq!(restored, config);

    let partial: OpenOrdConfig = serde_json::from_str(r#"{"num_iterations": 300}"#).unwrap();
    assert_eq!(partial.num_iterations, 300);
    assert_eq!(partial.edge_cut, 0.8);
}

// ============================================================================
// Host Integration
// ============================================================================

#[test]
fn test_layout_handles_and_write_back() {
    let mut builder = TestGraphBuilder::new();
    let nodes = builder.nodes(7);
    let graph = builder.cycle(&nodes).build();
    let mut layout = OpenOrdLayout::with_graph(Arc::clone(&graph), config(3, 21)).unwrap();
    run_to_completion(&mut layout).unwrap();

    let frame = layout.positions().unwrap();
    let data = graph.read();
    for (i, host) in data.nodes().iter().enumerate() {
        assert_eq!(host.layout_data, Some(LayoutData { index: i as u32 }));
        assert_eq!((host.x, host.y), (frame[i].x, frame[i].y));
    }
}

#[test]
fn test_shards_symmetric_and_disjoint_on_random_graphs() {
    let mut rng = StdRng::seed_from_u64(99);
    for threads in 1..=5 {
        let mut builder = TestGraphBuilder::new();
        let nodes = builder.nodes(25);
        for _ in 0..60 {
            let a = nodes[rng.random_range(0..nodes.len())];
            let b = nodes[rng.random_range(0..nodes.len())];
            let weight = rng.random_range(0.1..5.0);
            builder.edge(a, b, weight);
        }
        let graph = builder.build();
        let snapshot = GraphSnapshot::load(&graph, true).unwrap();
        let partitioner = Partitioner::new(threads);
        let shards = partitioner.shards(&snapshot);
        partitioner.verify(&shards).unwrap();

        for u in 0..25u32 {
            let owner = &shards[partitioner.owner(u)];
            assert!(!owner.neighbors_of(u).contains_key(&u));
            for (&v, &w) in owner.neighbors_of(u) {
                assert!(w.is_finite());
                let back = shards[partitioner.owner(v)].neighbors_of(v).get(&u);
                assert_eq!(back, Some(&w), "{u} -> {v} with {threads} threads");
            }
            for (k, shard) in shards.iter().enumerate() {
                if k != partitioner.owner(u) {
                    assert!(shard.neighbors_of(u).is_empty());
                }
            }
        }
    }
}

#[test]
fn test_many_threads_on_small_graph() {
    let mut builder = TestGraphBuilder::new();
    let nodes = builder.nodes(3);
    let graph = builder.cycle(&nodes).build();
    // More workers than nodes: some workers own nothing.
    let positions = run(&graph, config(8, 6));
    assert!(positions.iter().all(|p| p.0.is_finite() && p.1.is_finite()));
}
