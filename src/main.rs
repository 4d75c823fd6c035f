//! Command-line front end: reads the CSV input files, runs the optimizer,
//! and writes the JSON summary and certificate CSV.

use cut_solver_2d::instance::{
    parse_cut_type, parse_first_stage_orientation, parse_objective, Instance, InstanceBuilder,
    Length, Stages,
};
use cut_solver_2d::{OptimizeOutput, Optimizer, Solution};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Clone, Debug, Parser)]
#[command(
    name = "cut-solver-2d",
    about = "Packs rectangular pieces into stock sheets with staged guillotine cuts"
)]
struct Opt {
    /// Items CSV path
    #[arg(short = 'i', long)]
    items: PathBuf,

    /// Bins CSV path
    #[arg(short = 'b', long)]
    bins: Option<PathBuf>,

    /// Defects CSV path
    #[arg(short = 'd', long)]
    defects: Option<PathBuf>,

    /// Parameters CSV path
    #[arg(long)]
    parameters: Option<PathBuf>,

    /// Objective
    #[arg(short = 'f', long)]
    objective: Option<String>,

    /// Predefined parameters (4 characters: stages, cut type, orientation,
    /// rotation; e.g. 3RVR)
    #[arg(short = 'p', long)]
    predefined: Option<String>,

    /// Time limit in seconds
    #[arg(short = 't', long)]
    time_limit: Option<f64>,

    /// JSON output path
    #[arg(short = 'o', long)]
    output: Option<PathBuf>,

    /// Certificate CSV path
    #[arg(short = 'c', long)]
    certificate: Option<PathBuf>,

    /// Log file path
    #[arg(short = 'l', long)]
    log: Option<PathBuf>,

    /// Verbosity level (0 quiet, 1 info, 2 debug)
    #[arg(short = 'v', long, default_value_t = 1)]
    verbosity_level: u8,

    /// Only write output files when the run finishes
    #[arg(short = 'e', long)]
    only_write_at_the_end: bool,

    /// Number of stages (2, 3 or inf)
    #[arg(long)]
    number_of_stages: Option<String>,

    /// Cut type (roadef2018, non-exact, exact, homogenous)
    #[arg(long)]
    cut_type: Option<String>,

    /// First stage orientation (vertical, horizontal, any)
    #[arg(long)]
    first_stage_orientation: Option<String>,

    /// Minimum distance between 1-cuts
    #[arg(long)]
    minimum_distance_1_cuts: Option<Length>,

    /// Maximum distance between 1-cuts (negative disables the bound)
    #[arg(long)]
    maximum_distance_1_cuts: Option<Length>,

    /// Minimum distance between 2-cuts
    #[arg(long)]
    minimum_distance_2_cuts: Option<Length>,

    /// Minimum waste length
    #[arg(long)]
    minimum_waste_length: Option<Length>,

    /// Maximum number of partial 2-cuts per strip (negative disables)
    #[arg(long)]
    maximum_number_2_cuts: Option<i64>,

    /// Cut thickness
    #[arg(long)]
    cut_thickness: Option<Length>,

    /// Whether cuts may go through defects (0 or 1)
    #[arg(long)]
    cut_through_defects: Option<u8>,

    /// Give every bin type unlimited copies
    #[arg(long)]
    bin_infinite_copies: bool,

    /// Give every bin type an unbounded width
    #[arg(long)]
    bin_infinite_x: bool,

    /// Give every bin type an unbounded height
    #[arg(long)]
    bin_infinite_y: bool,

    /// Give every item type unlimited copies
    #[arg(long)]
    item_infinite_copies: bool,

    /// Set every item profit to its area
    #[arg(long)]
    unweighted: bool,

    /// Forbid item rotation
    #[arg(long)]
    no_item_rotation: bool,
}

fn build_instance(opt: &Opt) -> Result<Instance> {
    let mut builder = InstanceBuilder::new();
    if let Some(path) = &opt.parameters {
        builder.read_parameters(path)?;
    }
    if let Some(code) = &opt.predefined {
        builder.set_predefined(code)?;
    }
    if let Some(value) = &opt.objective {
        let objective = parse_objective(value)
            .with_context(|| format!("unknown objective \"{}\"", value))?;
        builder.set_objective(objective);
    }
    if let Some(value) = &opt.number_of_stages {
        let stages = match value.as_str() {
            "2" => Stages::Two,
            "3" => Stages::Three,
            "inf" | "infinite" => Stages::Free,
            _ => bail!("unknown number of stages \"{}\"", value),
        };
        builder.set_number_of_stages(stages);
    }
    if let Some(value) = &opt.cut_type {
        let cut_type =
            parse_cut_type(value).with_context(|| format!("unknown cut type \"{}\"", value))?;
        builder.set_cut_type(cut_type);
    }
    if let Some(value) = &opt.first_stage_orientation {
        let orientation = parse_first_stage_orientation(value)
            .with_context(|| format!("unknown first stage orientation \"{}\"", value))?;
        builder.set_first_stage_orientation(orientation);
    }
    if let Some(d) = opt.minimum_distance_1_cuts {
        builder.set_minimum_distance_1_cuts(d);
    }
    if let Some(d) = opt.maximum_distance_1_cuts {
        builder.set_maximum_distance_1_cuts((d >= 0).then_some(d));
    }
    if let Some(d) = opt.minimum_distance_2_cuts {
        builder.set_minimum_distance_2_cuts(d);
    }
    if let Some(d) = opt.minimum_waste_length {
        builder.set_minimum_waste_length(d);
    }
    if let Some(n) = opt.maximum_number_2_cuts {
        builder.set_maximum_number_2_cuts((n >= 0).then_some(n as u32));
    }
    if let Some(d) = opt.cut_thickness {
        builder.set_cut_thickness(d);
    }
    if let Some(flag) = opt.cut_through_defects {
        builder.set_cut_through_defects(flag != 0);
    }

    if let Some(path) = &opt.bins {
        builder.read_bin_types(path)?;
    } else {
        bail!("missing required bins file (--bins)");
    }
    if let Some(path) = &opt.defects {
        builder.read_defects(path)?;
    }
    builder.read_item_types(&opt.items)?;

    if opt.bin_infinite_copies {
        builder.set_bin_infinite_copies();
    }
    if opt.bin_infinite_x {
        builder.set_bin_infinite_width();
    }
    if opt.bin_infinite_y {
        builder.set_bin_infinite_height();
    }
    if opt.item_infinite_copies {
        builder.set_item_infinite_copies();
    }
    if opt.unweighted {
        builder.set_unweighted();
    }
    if opt.no_item_rotation {
        builder.set_no_item_rotation();
    }
    Ok(builder.build())
}

fn write_outputs(
    instance: &Instance,
    solution: &Solution,
    optimal: bool,
    opt: &Opt,
) -> Result<()> {
    if let Some(path) = &opt.certificate {
        solution.write(instance, path)?;
    }
    if let Some(path) = &opt.output {
        let summary = serde_json::json!({
            "NumberOfItems": solution.number_of_items(),
            "ItemArea": solution.item_area(),
            "Profit": solution.profit(),
            "NumberOfBins": solution.number_of_bins(),
            "BinArea": solution.full_area(),
            "BinCost": solution.cost(),
            "Waste": solution.waste(),
            "WastePercentage": solution.waste_percentage(),
            "FullWaste": solution.full_waste(),
            "Width": solution.width(),
            "Height": solution.height(),
            "Optimal": optimal,
        });
        std::fs::write(path, serde_json::to_string_pretty(&summary)?)
            .with_context(|| format!("unable to write \"{}\"", path.display()))?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let opt = Opt::parse();

    let filter = match opt.verbosity_level {
        0 => "error",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    match &opt.log {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("unable to open log file \"{}\"", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    let instance = build_instance(&opt)?;
    tracing::info!(
        items = instance.item_count(),
        bins = instance.bin_count(),
        objective = %instance.objective(),
        "instance loaded"
    );

    let mut optimizer = Optimizer::new(&instance);
    if let Some(seconds) = opt.time_limit {
        optimizer.set_time_limit(Some(Duration::from_secs_f64(seconds)));
    }

    let OptimizeOutput { solution, optimal } = if opt.only_write_at_the_end {
        optimizer.solve(|_| {})
    } else {
        let opt_for_callback = opt.clone();
        let instance_ref = &instance;
        optimizer.solve(move |solution| {
            if let Err(error) = write_outputs(instance_ref, solution, false, &opt_for_callback) {
                tracing::error!("failed to write intermediate output: {}", error);
            }
        })
    };

    write_outputs(&instance, &solution, optimal, &opt)?;
    tracing::info!(
        items = solution.number_of_items(),
        bins = solution.number_of_bins(),
        waste = solution.waste(),
        optimal,
        "search finished"
    );
    Ok(())
}
