//! Copy-on-write publication of the committed graph.

use crate::graph::ClusterGraph;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

struct Published {
    generation: u64,
    graph: Arc<ClusterGraph>,
}

/// Holds the current graph. Readers take an `Arc` and keep a consistent view
/// for as long as they hold it; writers swap in a complete new graph.
pub struct GraphStore {
    current: RwLock<Published>,
    generation_tx: watch::Sender<u64>,
}

impl GraphStore {
    /// Store holding an empty graph at generation 0.
    pub fn new() -> Self {
        let (generation_tx, _) = watch::channel(0);
        Self {
            current: RwLock::new(Published {
                generation: 0,
                graph: Arc::new(ClusterGraph::default()),
            }),
            generation_tx,
        }
    }

    /// Current graph.
    pub fn load(&self) -> Arc<ClusterGraph> {
        self.current.read().graph.clone()
    }

    /// Current graph with its generation.
    pub fn load_with_generation(&self) -> (u64, Arc<ClusterGraph>) {
        let current = self.current.read();
        (current.generation, current.graph.clone())
    }

    /// Generation of the current graph.
    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    /// Replace the current graph; returns the new generation.
    pub fn publish(&self, graph: ClusterGraph) -> u64 {
        let graph = Arc::new(graph);
        let generation = {
            let mut current = self.current.write();
            current.generation += 1;
            current.graph = graph;
            current.generation
        };
        self.generation_tx.send_replace(generation);
        debug!(generation, "cluster graph published");
        generation
    }

    /// Receiver notified with the generation of every publication.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.generation_tx.subscribe()
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}
