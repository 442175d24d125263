//! Read, edit and write GROMACS text formats: topologies with preprocessor directives
//! (`.top`, `.itp`), XVG plot data, XPM pixel maps and index groups (`.ndx`). Also reads and
//! writes DCD trajectories, and runs chains of post-processing stages over their frames.
//!
//! This crate only logs through the `log` facade; it doesn't install a logger.

pub mod dcd;
pub mod error;
pub mod format;
pub mod ndx;
pub mod pipeline;
pub mod text_doc;
pub mod top;
pub mod xpm;
pub mod xvg;

pub use dcd::{DcdFrame, DcdReader, DcdTrajectory};
pub use error::{DuplicateNameWarning, Error, NameOrigin, Result};
pub use format::{Document, Format, TextFormat};
pub use ndx::{CombinedIndex, IndexGroup, IndexGroups, combine_files};
pub use pipeline::{
    Artifact, Pipeline, PipelineConfig, PipelineRun, RunSummary, SkipReason, SkippedArtifact,
    Stage, StageError,
};
pub use top::{Directive, DirectiveKind, Topology};
pub use xpm::{LegendEntry, Xpm};
pub use xvg::{Value, Xvg, XvgOptions};
