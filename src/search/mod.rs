//! Generic tree-search machinery: the branching-scheme vocabulary consumed
//! by the beam search, and the iterative-widening driver itself.

pub mod beam;
pub mod scheme;

pub use beam::{iterative_beam_search, BeamSearchOutput, BeamSearchParameters};
pub use scheme::{BranchingScheme, BucketKey, GuideKey};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative stop condition shared by every worker: an atomic flag plus an
/// optional deadline, polled between node expansions.
#[derive(Clone, Debug, Default)]
pub struct Stop {
    flag: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl Stop {
    /// Creates a stop condition with an optional deadline.
    pub fn new(deadline: Option<Instant>) -> Self {
        Stop {
            flag: Arc::new(AtomicBool::new(false)),
            parent: None,
            deadline,
        }
    }

    /// Requests cancellation of every search sharing this condition.
    /// Conditions nested below it stop too; enclosing ones keep running.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns a condition sharing this flag with `deadline` added.
    pub fn with_deadline(&self, deadline: Option<Instant>) -> Stop {
        Stop {
            flag: self.flag.clone(),
            parent: self.parent.clone(),
            deadline: match (self.deadline, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            },
        }
    }

    /// Returns a nested condition: it observes cancellation of `self`, but
    /// cancelling it does not stop `self`.
    pub fn nested(&self) -> Stop {
        Stop {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(self.flag.clone()),
            deadline: self.deadline,
        }
    }

    /// Returns whether searches should wind down.
    pub fn stopped(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self
                .parent
                .as_ref()
                .map(|parent| parent.load(Ordering::Relaxed))
                .unwrap_or(false)
            || self
                .deadline
                .map(|deadline| Instant::now() >= deadline)
                .unwrap_or(false)
    }
}
