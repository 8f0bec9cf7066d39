pub mod config;
pub mod engine;
pub mod errors;
pub mod group;
pub mod matrix;
pub mod observability;
pub mod partition;
pub mod runner;
pub mod timing;

pub use config::Config;
pub use engine::{compute_shortest_paths, RelaxationStats};
pub use errors::{AgentError, Result};
pub use group::{connect_group, local_group, ProcessGroup, ReduceOp, Transport};
pub use matrix::{
    generate_matrix, load_row_block, read_matrix, write_matrix, Distance, DistributedMatrix,
    GatheredMatrix, INFINITY,
};
pub use observability::{init_production_logging, init_simple_logging};
pub use partition::{block_layout, RowBlock};
pub use runner::{run_local, run_rank, run_worker, RunOptions, RunOutcome};
pub use timing::TimingReport;
