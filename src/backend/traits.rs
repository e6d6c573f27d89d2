//! 媒体后端抽象
//!
//! 所有后端（Lidarr / Radarr / Sonarr / 内存 Mock）实现 MediaBackend：标签、条目、子单元、缺失分页与搜索命令。
//! 协调引擎只依赖此 trait，不关心具体后端。

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// 条目 ID（后端分配，始终为正整数）
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct ItemId(pub i64);

impl ItemId {
    /// 非正数视为畸形数据，返回 None
    pub fn new(raw: i64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 标签 ID
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct TagId(pub i64);

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 子单元 ID（如剧集）
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SubUnitId(pub i64);

/// 后端的缺失状态模型
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BackendFlavor {
    /// 条目自带缺失标志（Radarr: hasFile）
    Granular,
    /// 需分页查询 wanted/missing 汇总（Lidarr）
    Aggregate,
    /// 需逐条目列出子单元（Sonarr: episode）
    Hierarchical,
}

/// 标签：label 大小写不敏感
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub id: TagId,
    pub label: String,
}

impl Tag {
    pub fn matches(&self, label: &str) -> bool {
        self.label.trim().eq_ignore_ascii_case(label.trim())
    }
}

/// 库中的一个条目（艺人 / 电影 / 剧集）
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Item {
    pub id: ItemId,
    /// 仅用于日志
    pub display_name: String,
    pub tags: BTreeSet<TagId>,
    /// Granular 后端的缺失标志；其他后端为 None
    pub missing_indicator: Option<bool>,
}

impl Item {
    pub fn has_tag(&self, tag: TagId) -> bool {
        self.tags.contains(&tag)
    }
}

/// 子单元：monitored 且无文件且已播出才算缺失
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubUnit {
    pub id: SubUnitId,
    pub monitored: bool,
    pub has_file: bool,
    pub air_date: Option<DateTime<Utc>>,
}

impl SubUnit {
    pub fn is_missing(&self, now: DateTime<Utc>) -> bool {
        if !self.monitored || self.has_file {
            return false;
        }
        matches!(self.air_date, Some(aired) if aired <= now)
    }
}

/// wanted/missing 的一页
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MissingPage {
    pub item_ids: Vec<ItemId>,
    pub record_count: usize,
    pub total_records: Option<u64>,
    pub page_size: Option<u64>,
    /// 旧版 Lidarr 直接返回数组而非分页对象
    pub raw_list: bool,
}

/// 搜索命令
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SearchCommand {
    /// 条目级搜索（MoviesSearch / MissingAlbumSearch / SeriesSearch）
    Items(Vec<ItemId>),
    /// 子单元级搜索（EpisodeSearch）
    SubUnits { item: ItemId, ids: Vec<SubUnitId> },
}

impl SearchCommand {
    /// 该命令覆盖的条目
    pub fn item_ids(&self) -> Vec<ItemId> {
        match self {
            SearchCommand::Items(ids) => ids.clone(),
            SearchCommand::SubUnits { item, .. } => vec![*item],
        }
    }
}

/// 后端调用错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("401 Unauthorized (check the API key)")]
    Unauthorized,

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}

impl BackendError {
    /// 凭据被拒：整个运行必须立即终止
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::Unauthorized)
    }

    /// 可重试的瞬时错误
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Timeout(_) | BackendError::Request(_) => true,
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            BackendError::Unauthorized | BackendError::Malformed(_) => false,
        }
    }
}

/// 媒体后端能力接口
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// 后端类型名（日志用）
    fn name(&self) -> &str;

    fn flavor(&self) -> BackendFlavor;

    async fn list_tags(&self) -> Result<Vec<Tag>, BackendError>;

    /// 创建标签；响应不带 id 时返回 None
    async fn create_tag(&self, label: &str) -> Result<Option<TagId>, BackendError>;

    async fn list_items(&self) -> Result<Vec<Item>, BackendError>;

    /// 列出子单元；非 Hierarchical 后端可返回空
    async fn list_sub_units(&self, item: ItemId) -> Result<Vec<SubUnit>, BackendError>;

    /// 以完整替换的方式写入条目标签
    async fn update_item_tags(
        &self,
        item: ItemId,
        tags: &BTreeSet<TagId>,
    ) -> Result<(), BackendError>;

    /// 分页查询缺失记录（page 从 1 开始）
    async fn query_missing_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<MissingPage, BackendError>;

    async fn trigger_search(&self, command: &SearchCommand) -> Result<(), BackendError>;
}
