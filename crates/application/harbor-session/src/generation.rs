use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Hands out upload generations and remembers which one is newest.
///
/// Starting a new generation supersedes every older one: guards compare the
/// value they captured at `begin` against the live counter at each pipeline
/// checkpoint. At most one generation is ever "the most recent", so two
/// uploads can never both run to completion once a checkpoint is reached.
#[derive(Debug, Default)]
pub struct Generations {
    current: AtomicU64,
}

impl Generations {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Start a new generation, superseding all previously issued guards.
    pub fn begin(self: &Arc<Self>) -> GenerationGuard {
        let id = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationGuard {
            id,
            tracker: Arc::clone(self),
        }
    }

    fn newest(&self) -> u64 {
        self.current.load(Ordering::SeqCst)
    }
}

/// One upload generation.
///
/// Cancellation is cooperative only: a superseded guard does not abort
/// in-flight I/O, it only answers `is_superseded` the next time the pipeline
/// asks. Work that already passed its last checkpoint still runs to
/// completion.
#[derive(Debug, Clone)]
pub struct GenerationGuard {
    id: u64,
    tracker: Arc<Generations>,
}

impl GenerationGuard {
    pub fn is_superseded(&self) -> bool {
        self.tracker.newest() != self.id
    }
}
