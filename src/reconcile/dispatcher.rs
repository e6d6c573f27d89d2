//! 动作执行（副作用阶段）
//!
//! 按计划调用后端：标签改写逐条隔离、搜索按后端形态分组。
//! 只有 Unauthorized 会中止整轮，其余失败记入计数后继续。

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::backend::{BackendFlavor, ItemId, MediaBackend, SearchCommand};
use crate::core::ReconcileError;
use crate::memory::HistoryStore;
use crate::reconcile::plan::{
    MutationReason, ReconcilePlan, RunSummary, SearchPlan, SearchRequest, TagMutation,
};

/// 单条子单元搜索命令最多携带的 id 数
pub const SUBUNIT_CHUNK: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationOutcome {
    pub applied: usize,
    pub failed: usize,
    /// 达到上限后未尝试的条数
    pub deferred: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOutcome {
    /// 至少一条命令被接受的条目
    pub succeeded: Vec<ItemId>,
    pub failed: usize,
    /// 成功条目携带的子单元总数
    pub sub_units: usize,
}

pub struct Dispatcher<'a> {
    backend: &'a dyn MediaBackend,
}

impl<'a> Dispatcher<'a> {
    pub fn new(backend: &'a dyn MediaBackend) -> Self {
        Self { backend }
    }

    /// 逐条写入完整标签集；单条失败不影响其他条目
    ///
    /// limit 只按成功条数计：达到上限后其余改写留待下一轮
    pub async fn apply_mutations(
        &self,
        mutations: &[TagMutation],
        limit: Option<usize>,
    ) -> Result<MutationOutcome, ReconcileError> {
        let mut outcome = MutationOutcome::default();
        for (idx, m) in mutations.iter().enumerate() {
            if limit.is_some_and(|limit| outcome.applied >= limit) {
                outcome.deferred = mutations.len() - idx;
                break;
            }
            if m.from == m.to {
                continue;
            }
            match self.backend.update_item_tags(m.item, &m.to).await {
                Ok(()) => {
                    outcome.applied += 1;
                    let action = match m.reason {
                        MutationReason::Canonicalize => "Removed search tag from done item",
                        MutationReason::Promote => "SEARCH -> DONE",
                        MutationReason::Retag => "Retagged",
                    };
                    tracing::info!(item_id = %m.item, name = %m.display_name, "{}", action);
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    outcome.failed += 1;
                    tracing::error!(
                        item_id = %m.item,
                        name = %m.display_name,
                        "Tag update failed: {}",
                        e
                    );
                }
            }
        }
        Ok(outcome)
    }

    /// 触发搜索；Granular 合并为一条命令，Aggregate 逐条目，Hierarchical 按子单元分块
    pub async fn dispatch_searches(
        &self,
        searches: &[SearchRequest],
    ) -> Result<SearchOutcome, ReconcileError> {
        let mut outcome = SearchOutcome::default();
        if searches.is_empty() {
            return Ok(outcome);
        }

        if self.backend.flavor() == BackendFlavor::Granular {
            let ids: Vec<ItemId> = searches.iter().map(|s| s.item).collect();
            match self.backend.trigger_search(&SearchCommand::Items(ids.clone())).await {
                Ok(()) => {
                    tracing::info!(count = ids.len(), "Triggered batch search");
                    outcome.succeeded = ids;
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::error!(count = ids.len(), "Batch search failed: {}", e);
                    outcome.failed = ids.len();
                }
            }
            return Ok(outcome);
        }

        for request in searches {
            let commands = commands_for(self.backend.flavor(), request);
            let mut accepted = false;
            for command in &commands {
                match self.backend.trigger_search(command).await {
                    Ok(()) => accepted = true,
                    Err(e) if e.is_fatal() => return Err(e.into()),
                    Err(e) => tracing::error!(
                        item_id = %request.item,
                        name = %request.display_name,
                        "Search failed: {}",
                        e
                    ),
                }
            }
            if accepted {
                tracing::info!(
                    item_id = %request.item,
                    name = %request.display_name,
                    sub_units = request.sub_units.len(),
                    "Triggered search"
                );
                outcome.succeeded.push(request.item);
                outcome.sub_units += request.sub_units.len();
            } else {
                outcome.failed += 1;
            }
        }
        Ok(outcome)
    }

    /// 执行协调计划并更新历史（不落盘）
    pub async fn execute(
        &self,
        plan: &ReconcilePlan,
        history: &mut HistoryStore,
        now: DateTime<Utc>,
    ) -> Result<RunSummary, ReconcileError> {
        let mut summary = RunSummary {
            search_tagged: plan.search_tagged,
            done_tagged: plan.done_tagged,
            cooldown_skipped: plan.cooldown_skipped,
            unknown_skipped: plan.unknown_skipped,
            considered: plan.considered.len(),
            ..RunSummary::default()
        };

        let canonical = self.apply_mutations(&plan.canonicalize, None).await?;
        summary.canonicalized = canonical.applied;
        let promoted = self.apply_mutations(&plan.promote, plan.promote_cap).await?;
        summary.promoted = promoted.applied;
        summary.mutation_failed = canonical.failed + promoted.failed;
        if promoted.deferred > 0 {
            tracing::info!(
                deferred = promoted.deferred,
                "Promotion cap reached, rest deferred to next run"
            );
        }

        // 无论搜索是否成功，considered 全部记录复查时间
        for &id in &plan.considered {
            history.stamp_recheck(id, now);
        }

        let searched = self.dispatch_searches(&plan.searches).await?;
        stamp_searched(history, &searched.succeeded, now);
        summary.searched = searched.succeeded.len();
        summary.searched_sub_units = searched.sub_units;
        summary.search_failed = searched.failed;
        Ok(summary)
    }

    /// 执行主动搜索计划并更新历史（不落盘）
    pub async fn execute_search(
        &self,
        plan: &SearchPlan,
        history: &mut HistoryStore,
        now: DateTime<Utc>,
    ) -> Result<RunSummary, ReconcileError> {
        let searched = self.dispatch_searches(&plan.searches).await?;
        stamp_searched(history, &searched.succeeded, now);
        Ok(RunSummary {
            search_tagged: plan.search_tagged,
            cooldown_skipped: plan.cooldown_skipped,
            unknown_skipped: plan.unknown_skipped,
            searched: searched.succeeded.len(),
            searched_sub_units: searched.sub_units,
            search_failed: searched.failed,
            ..RunSummary::default()
        })
    }
}

fn stamp_searched(history: &mut HistoryStore, ids: &[ItemId], now: DateTime<Utc>) {
    let unique: HashSet<ItemId> = ids.iter().copied().collect();
    for id in unique {
        history.stamp_searched(id, now);
    }
}

fn commands_for(flavor: BackendFlavor, request: &SearchRequest) -> Vec<SearchCommand> {
    if flavor != BackendFlavor::Hierarchical || request.sub_units.is_empty() {
        return vec![SearchCommand::Items(vec![request.item])];
    }
    request
        .sub_units
        .chunks(SUBUNIT_CHUNK)
        .map(|chunk| SearchCommand::SubUnits {
            item: request.item,
            ids: chunk.to_vec(),
        })
        .collect()
}
