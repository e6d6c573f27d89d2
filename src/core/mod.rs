//! 核心层：错误类型与任务运行器

pub mod error;
pub mod runner;

pub use error::ReconcileError;
pub use runner::{run_reconcile, run_retag, run_search, ReconcileJob, RetagJob, SearchJob};
