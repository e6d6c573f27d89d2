//! 决策阶段的产物：不可变的动作列表与运行汇总

use std::collections::BTreeSet;

use crate::backend::{ItemId, SubUnitId, TagId};

/// 标签改写的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationReason {
    /// 同时带 SEARCH 与 DONE：移除 SEARCH
    Canonicalize,
    /// SEARCH → DONE
    Promote,
    /// from → to 批量换标签
    Retag,
}

/// 一次标签改写：以完整标签集替换
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagMutation {
    pub item: ItemId,
    pub display_name: String,
    pub from: BTreeSet<TagId>,
    pub to: BTreeSet<TagId>,
    pub reason: MutationReason,
}

/// 一次搜索请求；sub_units 为空表示条目级搜索
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub item: ItemId,
    pub display_name: String,
    pub sub_units: Vec<SubUnitId>,
}

/// 协调一轮的计划
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub search_tagged: usize,
    pub done_tagged: usize,
    pub canonicalize: Vec<TagMutation>,
    /// 打乱后的全部晋升候选
    pub promote: Vec<TagMutation>,
    /// 本轮最多成功晋升的条数；失败的改写不占名额
    pub promote_cap: Option<usize>,
    /// 本轮「考虑」的 DONE 缺失条目：无条件记录 lastRecheckAt
    pub considered: Vec<ItemId>,
    /// considered 的子集，按打乱顺序排列
    pub searches: Vec<SearchRequest>,
    pub cooldown_skipped: usize,
    /// 缺失状态未知而跳过的条目数
    pub unknown_skipped: usize,
}

/// 主动搜索一轮的计划
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPlan {
    pub search_tagged: usize,
    pub searches: Vec<SearchRequest>,
    pub cooldown_skipped: usize,
    pub unknown_skipped: usize,
    /// 已不缺失的 SEARCH 条目（留给协调任务晋升）
    pub complete: usize,
}

/// 一轮运行的汇总计数（日志输出用）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// 缺失查询不可用，本轮整体跳过
    pub skipped: bool,
    pub search_tagged: usize,
    pub done_tagged: usize,
    pub canonicalized: usize,
    pub promoted: usize,
    pub mutation_failed: usize,
    pub cooldown_skipped: usize,
    pub unknown_skipped: usize,
    pub considered: usize,
    pub searched: usize,
    pub searched_sub_units: usize,
    pub search_failed: usize,
    pub retagged: usize,
}

impl RunSummary {
    pub fn skipped() -> Self {
        Self {
            skipped: true,
            ..Self::default()
        }
    }

    pub fn log(&self, job: &str) {
        if self.skipped {
            tracing::warn!(job, "Run skipped, will retry next cycle");
            return;
        }
        tracing::info!(
            job,
            search_tagged = self.search_tagged,
            done_tagged = self.done_tagged,
            canonicalized = self.canonicalized,
            search_to_done = self.promoted,
            retagged = self.retagged,
            mutation_failed = self.mutation_failed,
            cooldown_skipped = self.cooldown_skipped,
            unknown_skipped = self.unknown_skipped,
            considered = self.considered,
            searched = self.searched,
            searched_sub_units = self.searched_sub_units,
            search_failed = self.search_failed,
            "Done"
        );
    }
}
