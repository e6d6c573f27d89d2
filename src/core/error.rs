//! 协调运行的错误类型
//!
//! 配置 / 凭据错误终止运行；缺失查询不可用是可恢复的跳过；单条目派发错误不在此列（由派发器隔离计数）。

use thiserror::Error;

use crate::backend::BackendError;

/// 一次运行可能出现的错误
#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Config error: {0}")]
    Config(String),

    /// 凭据被拒，不重试，立即终止
    #[error("Unauthorized: credential rejected by {0}")]
    Unauthorized(String),

    /// 缺失状态无法获取：本轮跳过，不写历史、不改标签
    #[error("Missing-status oracle unavailable: {0}")]
    OracleUnavailable(String),

    #[error("Unable to create or find tag '{0}'")]
    TagUnresolved(String),

    #[error("Backend error: {0}")]
    Backend(BackendError),

    #[error("History store error: {0}")]
    History(#[from] crate::memory::HistoryError),
}

impl From<BackendError> for ReconcileError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unauthorized => ReconcileError::Unauthorized("backend".to_string()),
            other => ReconcileError::Backend(other),
        }
    }
}

impl ReconcileError {
    /// 可恢复：本轮跳过即可，下一轮自然重试
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ReconcileError::OracleUnavailable(_))
    }
}
