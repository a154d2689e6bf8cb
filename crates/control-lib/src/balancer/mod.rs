//! Edge load balancing: DWRS selection and NAT commit

mod dwrs;
mod edge_loop;
mod nat;

pub use dwrs::{
    comprehensive_load, load_to_weight, select, total_weight, weigh, Candidate, CPU_WEIGHT,
    MEMORY_WEIGHT,
};
pub use edge_loop::{EdgeConfig, EdgeLoop};
pub use nat::{CommandRunner, CommitOutcome, NatCommitter, NatConfig, RunOutput, SystemRunner};
