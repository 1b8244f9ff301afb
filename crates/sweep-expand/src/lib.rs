//! sweep-expand — turns a sweep configuration into concrete runs.
//!
//! ```text
//! sweep config ──parse──▶ SweepConfig
//!                           ├── fixed params ──▶ fixed argument string
//!                           ├── variable params ──generate──▶ SimVariant*
//!                           └── app templates ──expand_app──▶ AppInstance*
//! SimVariant × AppInstance ──thread gating──▶ RunInvocation*
//! ```

pub mod error;
pub mod generator;
pub mod parser;
pub mod plan;
pub mod range;

pub use error::{ExpandError, ExpandResult};
pub use generator::{AppInstance, SimVariant, TOTAL_CORES, expand_app, generate};
pub use parser::{
    AppTemplate, NUM_PROCESSES, ParamValue, ParameterSpec, PlotQuantity, SweepConfig, load_sweep,
    parse_sweep,
};
pub use plan::{RunInvocation, plan_runs, plot_directories, sanitize, thread_compatible};
pub use range::{Step, ValueList, expand_range, parse_value_list};
