//! 协调层：缺失查询、决策引擎、动作执行
//!
//! 一轮 = 解析标签 → 缺失快照 → 纯决策（plan）→ 执行（dispatcher）→ 写历史。

pub mod dispatcher;
pub mod engine;
pub mod oracle;
pub mod plan;
pub mod retag;
pub mod shuffle;
pub mod tags;

pub use dispatcher::{Dispatcher, MutationOutcome, SearchOutcome, SUBUNIT_CHUNK};
pub use engine::{
    active_search_scope, in_cooldown, oracle_scope, plan_active_search, plan_reconcile,
    select_recheck, EngineInput, RecheckSelection, TagPair, TagState,
};
pub use oracle::{MissingOracle, MissingSnapshot, MissingStatus};
pub use plan::{MutationReason, ReconcilePlan, RunSummary, SearchPlan, SearchRequest, TagMutation};
pub use retag::plan_retag;
pub use shuffle::{KeepOrder, SeededShuffler, Shuffler};
pub use tags::TagRegistry;
