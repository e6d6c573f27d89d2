//! arr-reconcile - *arr 标签状态协调
//!
//! 模块划分：
//! - **backend**: 媒体后端能力接口与实现（Lidarr / Radarr / Sonarr / 内存 Mock）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误类型与任务运行器（reconcile / search / retag）
//! - **memory**: 动作历史持久化（冷却时钟）
//! - **observability**: 日志初始化
//! - **reconcile**: 缺失查询、纯决策引擎、动作执行

pub mod backend;
pub mod config;
pub mod core;
pub mod memory;
pub mod observability;
pub mod reconcile;

pub use crate::backend::{create_backend_from_config, MediaBackend};
pub use crate::config::{load_config, AppConfig};
pub use crate::core::ReconcileError;
