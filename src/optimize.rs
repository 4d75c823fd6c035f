//! Optimization driver: runs beam-search workers over a grid of guides and
//! first-stage orientations, sharing a best-solution pool and a stop flag.

use crate::instance::{
    BinTypeId, FirstStageOrientation, Instance, InstanceBuilder, Objective, Stages,
};
use crate::search::{iterative_beam_search, BeamSearchParameters, Stop};
use crate::solution::Solution;
use crate::staged::{StagedParameters, StagedScheme};
use crate::staircase::{StaircaseParameters, StaircaseScheme};

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Driver options.
#[derive(Clone, Debug)]
pub struct OptimizeParameters {
    /// Wall-clock limit for the whole optimization.
    pub time_limit: Option<Duration>,
    /// Guides to run; defaults depend on the objective.
    pub guides: Option<Vec<u8>>,
    /// Queue size of the first beam pass.
    pub minimum_queue_size: usize,
    /// Queue size cap.
    pub maximum_queue_size: usize,
    /// Whether workers run on separate threads.
    pub parallel: bool,
}

impl Default for OptimizeParameters {
    fn default() -> Self {
        OptimizeParameters {
            time_limit: None,
            guides: None,
            minimum_queue_size: 1,
            maximum_queue_size: usize::MAX / 2,
            parallel: true,
        }
    }
}

/// Result of an optimization run.
#[derive(Clone, Debug)]
pub struct OptimizeOutput {
    /// Best solution found; empty when nothing could be placed.
    pub solution: Solution,
    /// Whether some worker exhausted its search tree.
    pub optimal: bool,
}

/// Optimizer facade over an instance.
pub struct Optimizer<'a> {
    instance: &'a Instance,
    parameters: OptimizeParameters,
    stop: Stop,
}

impl<'a> Optimizer<'a> {
    /// Creates an optimizer with default parameters.
    pub fn new(instance: &'a Instance) -> Self {
        Optimizer {
            instance,
            parameters: OptimizeParameters::default(),
            stop: Stop::new(None),
        }
    }

    /// Sets the wall-clock time limit.
    pub fn set_time_limit(&mut self, limit: Option<Duration>) -> &mut Self {
        self.parameters.time_limit = limit;
        self
    }

    /// Overrides the guides the workers run.
    pub fn set_guides(&mut self, guides: Vec<u8>) -> &mut Self {
        self.parameters.guides = Some(guides);
        self
    }

    /// Sets the queue size of the first beam pass.
    pub fn set_minimum_queue_size(&mut self, size: usize) -> &mut Self {
        self.parameters.minimum_queue_size = size.max(1);
        self
    }

    /// Caps the beam queue size.
    pub fn set_maximum_queue_size(&mut self, size: usize) -> &mut Self {
        self.parameters.maximum_queue_size = size.max(1);
        self
    }

    /// Disables worker threads; everything runs on the calling thread.
    pub fn set_sequential(&mut self) -> &mut Self {
        self.parameters.parallel = false;
        self
    }

    /// Stop handle shared with the workers; cancel it to end the run early.
    pub fn stop(&self) -> &Stop {
        &self.stop
    }

    /// Runs the optimization. `on_solution` fires for every improvement,
    /// under the solution-pool lock.
    pub fn solve<F>(&self, on_solution: F) -> OptimizeOutput
    where
        F: Fn(&Solution) + Send + Sync,
    {
        let deadline = self.parameters.time_limit.map(|limit| Instant::now() + limit);
        let stop = self.stop.with_deadline(deadline);

        let mut output = run_grid(self.instance, &self.parameters, &stop, &on_solution, false);

        // Single-size runs can beat the mixed run when bin costs differ
        // (variable-sized bin packing in particular selects its bin subset
        // this way).
        if self.instance.bin_type_count() > 1
            && self.instance.objective() == Objective::VariableSizedBinPacking
        {
            for bin_type_id in 0..self.instance.bin_type_count() {
                if stop.stopped() {
                    break;
                }
                let sub = sub_instance_with_bin_type(self.instance, bin_type_id);
                let sub_output = run_grid(&sub, &self.parameters, &stop, &on_solution, true);
                let remapped = remap_solution(self.instance, &sub_output.solution, bin_type_id);
                if remapped.better_than(self.instance, &output.solution) {
                    on_solution(&remapped);
                    output.solution = remapped;
                    output.optimal = false;
                }
            }
        }
        output
    }
}

/// One worker configuration.
#[derive(Clone, Debug)]
struct WorkerConfig {
    guide: u8,
    orientation: FirstStageOrientation,
    growth_factor: f64,
}

fn worker_grid(instance: &Instance, parameters: &OptimizeParameters) -> Vec<WorkerConfig> {
    let guides = parameters.guides.clone().unwrap_or_else(|| {
        match instance.objective() {
            Objective::Knapsack | Objective::Default => vec![4, 5],
            Objective::SequentialOneDimensionalSub => vec![8, 9],
            _ => vec![0, 1],
        }
    });
    let orientations = if instance.parameters().number_of_stages != Stages::Free
        && instance.parameters().first_stage_orientation == FirstStageOrientation::Any
    {
        vec![
            FirstStageOrientation::Vertical,
            FirstStageOrientation::Horizontal,
        ]
    } else {
        vec![instance.parameters().first_stage_orientation]
    };
    let growth_factors = if guides.len() * orientations.len() <= 2 {
        vec![1.33, 1.5]
    } else {
        vec![1.5]
    };
    let mut configs = Vec::new();
    for &growth_factor in &growth_factors {
        for &guide in &guides {
            for &orientation in &orientations {
                configs.push(WorkerConfig {
                    guide,
                    orientation,
                    growth_factor,
                });
            }
        }
    }
    configs
}

fn run_grid<F>(
    instance: &Instance,
    parameters: &OptimizeParameters,
    stop: &Stop,
    on_solution: &F,
    suppress_callback: bool,
) -> OptimizeOutput
where
    F: Fn(&Solution) + Send + Sync,
{
    let configs = worker_grid(instance, parameters);
    let pool: Mutex<(Option<Solution>, bool)> = Mutex::new((None, false));
    // Workers of this grid stop each other once one of them proves
    // optimality, without cancelling the enclosing run.
    let grid_stop = stop.nested();
    let stop = &grid_stop;

    let run_worker = |config: &WorkerConfig| {
        let beam = BeamSearchParameters {
            minimum_queue_size: parameters.minimum_queue_size,
            maximum_queue_size: parameters.maximum_queue_size,
            growth_factor: config.growth_factor,
        };
        let publish = |solution: Solution, proven: bool| {
            let mut pool = pool.lock().unwrap();
            let replaces = match &pool.0 {
                Some(best) => solution.better_than(instance, best),
                None => true,
            };
            if replaces {
                tracing::info!(
                    guide = config.guide,
                    waste = solution.waste(),
                    profit = solution.profit(),
                    "improved solution"
                );
                if !suppress_callback {
                    on_solution(&solution);
                }
                pool.0 = Some(solution);
            }
            if proven {
                pool.1 = true;
                stop.cancel();
            }
        };
        if instance.parameters().number_of_stages == Stages::Free {
            let scheme = StaircaseScheme::new(
                instance,
                StaircaseParameters {
                    guide: config.guide,
                    staircase: true,
                    ..Default::default()
                },
            );
            let out = iterative_beam_search(&scheme, &beam, stop, |node, _| {
                publish(scheme.to_solution(node), false);
            });
            if out.optimal {
                if let Some(node) = out.best {
                    publish(StaircaseScheme::to_solution(&scheme, &node), true);
                } else {
                    pool.lock().unwrap().1 = true;
                }
            }
        } else {
            let scheme = StagedScheme::new(
                instance,
                StagedParameters {
                    guide: config.guide,
                    first_stage_orientation: config.orientation,
                },
            );
            let out = iterative_beam_search(&scheme, &beam, stop, |node, _| {
                publish(StagedScheme::to_solution(&scheme, node), false);
            });
            if out.optimal {
                if let Some(node) = out.best {
                    publish(StagedScheme::to_solution(&scheme, &node), true);
                } else {
                    pool.lock().unwrap().1 = true;
                }
            }
        }
    };

    if parameters.parallel && configs.len() > 1 {
        std::thread::scope(|scope| {
            let worker = &run_worker;
            for config in &configs {
                scope.spawn(move || worker(config));
            }
        });
    } else {
        for config in &configs {
            run_worker(config);
            if stop.stopped() {
                break;
            }
        }
    }

    let (best, optimal) = pool.into_inner().unwrap();
    OptimizeOutput {
        solution: best.unwrap_or_else(|| Solution::from_bins(instance, Vec::new())),
        optimal,
    }
}

/// Rebuilds the instance keeping only one bin type.
fn sub_instance_with_bin_type(instance: &Instance, bin_type_id: BinTypeId) -> Instance {
    let mut builder = InstanceBuilder::new();
    builder.set_objective(instance.objective());
    builder.set_parameters(instance.parameters().clone());
    for item_type in instance.item_types() {
        let id = builder.add_item_type(
            item_type.rect.w,
            item_type.rect.h,
            Some(item_type.profit),
            item_type.copies,
            item_type.oriented,
            Some(item_type.stack_id),
        );
        builder.set_item_weight(id, item_type.weight);
    }
    let bin_type = instance.bin_type(bin_type_id);
    let id = builder.add_bin_type(
        bin_type.rect.w,
        bin_type.rect.h,
        Some(bin_type.cost),
        bin_type.copies,
        bin_type.copies_min,
    );
    builder
        .add_trims(
            id,
            bin_type.left_trim,
            bin_type.right_trim,
            bin_type.bottom_trim,
            bin_type.top_trim,
        )
        .expect("trims were valid in the source instance");
    for defect in &bin_type.defects {
        builder.add_defect(id, defect.x, defect.y, defect.rect.w, defect.rect.h);
    }
    builder.build()
}

/// Maps a single-bin-type solution back onto the original instance.
fn remap_solution(instance: &Instance, solution: &Solution, bin_type_id: BinTypeId) -> Solution {
    let mut bins = solution.bins().to_vec();
    for bin in bins.iter_mut() {
        bin.bin_type_id = bin_type_id;
    }
    Solution::from_bins(instance, bins)
}
