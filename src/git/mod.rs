//! Git integration: injected command runner, delta detection for
//! incremental reindexing, and history correlation for indexed functions.

mod delta;
mod history;
mod runner;

pub use delta::{current_commit, detect_delta, parse_name_status, ChangeSet};
pub use history::{
    AuthorStat, BlameReport, CommitSummary, FunctionHistory, GitCorrelator,
};
pub use runner::{CommandRunner, GitCommandRunner, ScriptedRunner};
