//! Iterative beam search: repeated beam-search passes with geometrically
//! growing queue sizes over a branching scheme.

use super::scheme::{BranchingScheme, BucketKey, GuideKey};
use super::Stop;

use fnv::FnvHashMap;

use std::collections::BTreeMap;

/// Tuning knobs of the iterative beam search.
#[derive(Clone, Debug)]
pub struct BeamSearchParameters {
    /// Queue size of the first pass.
    pub minimum_queue_size: usize,
    /// Largest queue size attempted.
    pub maximum_queue_size: usize,
    /// Geometric growth factor between passes.
    pub growth_factor: f64,
}

impl Default for BeamSearchParameters {
    fn default() -> Self {
        BeamSearchParameters {
            minimum_queue_size: 1,
            maximum_queue_size: usize::MAX / 2,
            growth_factor: 1.5,
        }
    }
}

/// Result of an iterative beam search.
#[derive(Clone, Debug)]
pub struct BeamSearchOutput<N> {
    /// Best terminal node found, if any.
    pub best: Option<N>,
    /// Whether a pass completed without size-pruning, proving optimality.
    pub optimal: bool,
    /// Queue size of the last pass that ran.
    pub last_queue_size: usize,
}

/// Runs beam-search passes of growing width until the tree is exhausted,
/// the queue cap is reached, or `stop` fires. `on_improvement` is invoked
/// for every new incumbent with the current queue size.
pub fn iterative_beam_search<S, F>(
    scheme: &S,
    parameters: &BeamSearchParameters,
    stop: &Stop,
    mut on_improvement: F,
) -> BeamSearchOutput<S::Node>
where
    S: BranchingScheme,
    F: FnMut(&S::Node, usize),
{
    let mut best: Option<S::Node> = None;
    let mut optimal = false;
    let mut queue_size = parameters.minimum_queue_size.max(1);

    loop {
        let truncated = beam_search_pass(scheme, queue_size, stop, &mut best, &mut |node| {
            on_improvement(node, queue_size)
        });
        tracing::debug!(queue_size, truncated, "beam search pass finished");

        if let Some(ref incumbent) = best {
            if scheme.proves_optimal(incumbent) {
                optimal = true;
                break;
            }
        }
        if stop.stopped() {
            break;
        }
        if !truncated {
            // The pass explored every non-pruned node: the incumbent (or its
            // absence) is exact.
            optimal = true;
            break;
        }
        if queue_size >= parameters.maximum_queue_size {
            break;
        }
        let grown = (queue_size as f64 * parameters.growth_factor).ceil() as usize;
        queue_size = grown
            .max(queue_size + 1)
            .min(parameters.maximum_queue_size);
    }

    BeamSearchOutput {
        best,
        optimal,
        last_queue_size: queue_size,
    }
}

/// One bounded-width pass. Returns whether any node was evicted for size.
fn beam_search_pass<S, F>(
    scheme: &S,
    queue_size: usize,
    stop: &Stop,
    best: &mut Option<S::Node>,
    on_improvement: &mut F,
) -> bool
where
    S: BranchingScheme,
    F: FnMut(&S::Node),
{
    let mut queue: BTreeMap<GuideKey, S::Node> = BTreeMap::new();
    // Dominance history: every comparable node seen this pass, bucketed by
    // consumed items. Entries keep their queue key so dominated nodes can be
    // evicted from the live queue as well.
    let mut buckets: FnvHashMap<BucketKey, Vec<(GuideKey, S::Node)>> = FnvHashMap::default();
    let mut truncated = false;

    let root = scheme.root();
    queue.insert(scheme.guide(&root), root);

    while let Some((_, node)) = queue.pop_first() {
        if stop.stopped() {
            return truncated;
        }
        for child in scheme.children(&node) {
            if scheme.leaf(&child) {
                let improves = match best {
                    Some(incumbent) => scheme.better(&child, incumbent),
                    None => true,
                };
                if improves {
                    *best = Some(child.clone());
                    on_improvement(&child);
                }
                continue;
            }
            if let Some(incumbent) = best {
                if scheme.bound(&child, incumbent) {
                    continue;
                }
            }
            let key = scheme.guide(&child);
            if scheme.comparable(&child) {
                let bucket = buckets.entry(scheme.bucket_key(&child)).or_default();
                if bucket.iter().any(|(_, seen)| scheme.dominates(seen, &child)) {
                    continue;
                }
                bucket.retain(|(seen_key, seen)| {
                    if scheme.dominates(&child, seen) {
                        queue.remove(seen_key);
                        false
                    } else {
                        true
                    }
                });
                bucket.push((key, child.clone()));
            }
            queue.insert(key, child);
            if queue.len() > queue_size {
                queue.pop_last();
                truncated = true;
            }
        }
    }
    truncated
}
