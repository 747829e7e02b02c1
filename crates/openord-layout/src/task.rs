//! Long-running layout task contract used by host orchestration.

use tracing::warn;

use crate::config::{LayoutProperty, OpenOrdConfig, PropertyValue};
use crate::engine::OpenOrdLayout;
use crate::Result;

/// A layout that a host drives one tick at a time.
pub trait LayoutAlgorithm {
    /// Restore default property values.
    fn reset_properties_values(&mut self) -> Result<()>;

    /// Prepare a run from the current graph.
    fn init_algo(&mut self) -> Result<()>;

    /// Advance the run by one observable tick.
    fn go_algo(&mut self) -> Result<()>;

    /// Whether another `go_algo` call has work to do.
    fn can_algo(&self) -> bool;

    /// Finish the run and publish its result.
    fn end_algo(&mut self) -> Result<()>;

    /// Request cooperative cancellation.
    fn cancel(&self);

    /// Configurable properties with their current values.
    fn properties(&self) -> Vec<(LayoutProperty, PropertyValue)>;
}

impl LayoutAlgorithm for OpenOrdLayout {
    fn reset_properties_values(&mut self) -> Result<()> {
        OpenOrdLayout::reset_properties_values(self)
    }

    fn init_algo(&mut self) -> Result<()> {
        OpenOrdLayout::init_algo(self)
    }

    fn go_algo(&mut self) -> Result<()> {
        self.step()
    }

    fn can_algo(&self) -> bool {
        self.is_running()
    }

    fn end_algo(&mut self) -> Result<()> {
        OpenOrdLayout::end_algo(self)
    }

    fn cancel(&self) {
        OpenOrdLayout::cancel(self)
    }

    fn properties(&self) -> Vec<(LayoutProperty, PropertyValue)> {
        OpenOrdConfig::properties()
            .iter()
            .filter_map(|p| self.config().get_property(p.key).map(|v| (*p, v)))
            .collect()
    }
}

/// Initialize, tick until done, then end. `end_algo` also runs after a
/// failed tick so worker threads are released; the first error wins.
pub fn run_to_completion<A: LayoutAlgorithm + ?Sized>(algorithm: &mut A) -> Result<()> {
    algorithm.init_algo()?;
    while algorithm.can_algo() {
        if let Err(error) = algorithm.go_algo() {
            if let Err(end_error) = algorithm.end_algo() {
                warn!(error = %end_error, "openord_end_after_failure");
            }
            return Err(error);
        }
    }
    algorithm.end_algo()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LayoutError;
    use openord_core::{GraphData, GraphModel, NodeId};
    use std::sync::Arc;

    /// Counts ticks and stops after a fixed number.
    #[derive(Default)]
    struct Counter {
        ticks: u32,
        limit: u32,
        ended: bool,
        fail_at: Option<u32>,
    }

    impl LayoutAlgorithm for Counter {
        fn reset_properties_values(&mut self) -> Result<()> {
            self.limit = 0;
            Ok(())
        }
        fn init_algo(&mut self) -> Result<()> {
            self.ticks = 0;
            Ok(())
        }
        fn go_algo(&mut self) -> Result<()> {
            self.ticks += 1;
            if self.fail_at == Some(self.ticks) {
                return Err(LayoutError::invariant("tick failed"));
            }
            Ok(())
        }
        fn can_algo(&self) -> bool {
            self.ticks < self.limit
        }
        fn end_algo(&mut self) -> Result<()> {
            self.ended = true;
            Ok(())
        }
        fn cancel(&self) {}
        fn properties(&self) -> Vec<(LayoutProperty, PropertyValue)> {
            Vec::new()
        }
    }

    #[test]
    fn test_run_to_completion_drives_until_done() {
        let mut counter = Counter {
            limit: 5,
            ..Default::default()
        };
        run_to_completion(&mut counter).unwrap();
        assert_eq!(counter.ticks, 5);
        assert!(counter.ended);
    }

    #[test]
    fn test_run_to_completion_ends_after_failure() {
        let mut counter = Counter {
            limit: 5,
            fail_at: Some(2),
            ..Default::default()
        };
        assert!(run_to_completion(&mut counter).is_err());
        assert_eq!(counter.ticks, 2);
        assert!(counter.ended);
    }

    #[test]
    fn test_engine_properties_listed() {
        let layout = OpenOrdLayout::new();
        let properties = LayoutAlgorithm::properties(&layout);
        let keys: Vec<&str> = properties.iter().map(|(p, _)| p.key).collect();
        assert_eq!(
            keys,
            vec!["edge_cut", "num_threads", "num_iterations", "reset_position", "rand_seed"]
        );
        assert_eq!(properties[0].1, PropertyValue::Float(0.8));
    }

    #[test]
    fn test_engine_through_trait_object() {
        let mut data = GraphData::new();
        for id in 0..4 {
            data.add_node(NodeId(id)).unwrap();
        }
        data.add_edge(NodeId(0), NodeId(1), 1.0).unwrap();
        let config = OpenOrdConfig {
            num_threads: 2,
            num_iterations: 100,
            rand_seed: 3,
            ..Default::default()
        };
        let mut layout =
            OpenOrdLayout::with_graph(Arc::new(GraphModel::new(data)), config).unwrap();
        let algorithm: &mut dyn LayoutAlgorithm = &mut layout;
        run_to_completion(algorithm).unwrap();
        assert_eq!(layout.iteration(), 100);
    }
}
