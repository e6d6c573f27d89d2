//! 持久化层：跨运行的动作历史（最近复查 / 最近搜索时间）

pub mod history;

pub use history::{ActionRecord, HistoryError, HistoryStore};
