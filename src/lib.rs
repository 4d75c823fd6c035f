//! cut-solver-2d is a solver library that lays out rectangular cut pieces on
//! stock sheets using guillotine cuts arranged in a bounded number of
//! alternating-direction stages. It enumerates cutting patterns with a
//! tree-search branching scheme driven by an iterative beam search, and
//! supports defects, border trims, cut thickness, stack precedence, and
//! several objectives (waste, bin count, profit, open dimension, bin cost).

#![deny(missing_docs)]

pub mod instance;
pub mod optimize;
pub mod search;
pub mod solution;
pub mod staged;
pub mod staircase;

#[cfg(test)]
mod tests;

pub use instance::{
    Area, BinType, BinTypeId, CutOrientation, CutType, Defect, DefectId, FirstStageOrientation,
    Instance, InstanceBuilder, ItemType, ItemTypeId, Length, Objective, Parameters, Profit,
    Rectangle, StackId, Stages, Trim, TrimType, Weight,
};
pub use optimize::{OptimizeOutput, OptimizeParameters, Optimizer};
pub use solution::{NodeContent, Solution, SolutionBin, SolutionNode};

use thiserror::Error;

/// Errors raised while building an instance or reading input files. The
/// search itself is total and never fails.
#[derive(Debug, Error)]
pub enum Error {
    /// A file could not be read or written.
    #[error("unable to access \"{path}\": {source}")]
    Io {
        /// Path of the offending file.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A required CSV column is missing.
    #[error("missing required column {column} in \"{path}\"")]
    MissingColumn {
        /// Path of the offending file.
        path: String,
        /// Name of the missing column.
        column: &'static str,
    },

    /// A CSV cell or parameter value could not be parsed.
    #[error("invalid value \"{value}\" for {what} in \"{path}\"")]
    InvalidValue {
        /// Path of the offending file.
        path: String,
        /// What was being parsed.
        what: &'static str,
        /// The rejected text.
        value: String,
    },

    /// Contradictory or out-of-range input.
    #[error("invalid {what}: {message}")]
    InvalidInput {
        /// What was being validated.
        what: &'static str,
        /// Details of the contradiction.
        message: String,
    },

    /// A predefined parameter string does not follow the `DCON` format.
    #[error("invalid predefined parameters \"{0}\"")]
    InvalidPredefined(String),
}
