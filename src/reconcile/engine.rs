//! 协调引擎（纯决策阶段）
//!
//! 输入：条目与标签、缺失快照、动作历史、当前时间、不可变上限；输出：ReconcilePlan。
//! 不做任何 I/O，不读全局配置；副作用全部交给 Dispatcher。
//!
//! - Phase A：SEARCH 且不缺失 → DONE（打乱后交给执行阶段，按成功数计 promote_cap）
//! - Phase B：DONE 且缺失 → 冷却门 → 打乱 → recheck_cap 截断为 considered
//!   → search_cap / 子单元预算截断为 searches
//!
//! Hierarchical 后端每个条目都要单独列子单元，因此复查选择（select_recheck）
//! 在缺失查询之前进行：只查 considered 条目，干净的条目同样记复查时间。

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::backend::{BackendFlavor, Item, ItemId, SubUnitId, TagId};
use crate::config::{ReconcileLimits, SearchLimits};
use crate::memory::HistoryStore;
use crate::reconcile::oracle::{MissingSnapshot, MissingStatus};
use crate::reconcile::plan::{
    MutationReason, ReconcilePlan, SearchPlan, SearchRequest, TagMutation,
};
use crate::reconcile::shuffle::Shuffler;

/// 本轮解析出的 SEARCH / DONE 标签 id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagPair {
    pub search: TagId,
    pub done: TagId,
}

/// 由标签派生的逻辑状态（不单独存储）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    Untracked,
    Searching,
    Done,
}

impl TagPair {
    /// 两个标签都在时 DONE 优先
    pub fn state_of(&self, item: &Item) -> TagState {
        match (item.has_tag(self.search), item.has_tag(self.done)) {
            (_, true) => TagState::Done,
            (true, false) => TagState::Searching,
            (false, false) => TagState::Untracked,
        }
    }

    pub fn is_conflicted(&self, item: &Item) -> bool {
        item.has_tag(self.search) && item.has_tag(self.done)
    }

    /// (tags − SEARCH) ∪ {DONE}
    pub fn promoted(&self, tags: &BTreeSet<TagId>) -> BTreeSet<TagId> {
        let mut out: BTreeSet<TagId> =
            tags.iter().copied().filter(|t| *t != self.search).collect();
        out.insert(self.done);
        out
    }
}

/// 引擎的只读输入
pub struct EngineInput<'a> {
    pub items: &'a [Item],
    pub tags: TagPair,
    pub flavor: BackendFlavor,
    pub history: &'a HistoryStore,
    pub now: DateTime<Utc>,
}

impl<'a> EngineInput<'a> {
    /// 畸形 id 的条目静默丢弃
    fn valid_items(&self) -> impl Iterator<Item = &'a Item> {
        self.items.iter().filter(|item| item.id.0 > 0)
    }

    fn recheck_gated(&self, id: ItemId, interval: Duration) -> bool {
        in_cooldown(self.history.last_recheck_at(id), interval, self.now)
    }
}

/// now < last + interval 时处于冷却期；没有记录则不冷却
pub fn in_cooldown(last: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> bool {
    last.is_some_and(|last| now < last + interval)
}

fn cap_len(len: usize, cap: Option<usize>) -> usize {
    cap.map_or(len, |cap| cap.min(len))
}

/// 缺失查询之前选出的复查条目
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecheckSelection {
    /// 打乱后按 recheck_cap 截断的 DONE 条目
    pub considered: Vec<ItemId>,
    pub cooldown_skipped: usize,
}

/// DONE 条目 → 冷却门 → 打乱 → recheck_cap，不看缺失状态
pub fn select_recheck<S: Shuffler>(
    input: &EngineInput<'_>,
    limits: &ReconcileLimits,
    shuffler: &mut S,
) -> RecheckSelection {
    let mut selection = RecheckSelection::default();
    let mut eligible: Vec<ItemId> = Vec::new();
    for item in input.valid_items() {
        if input.tags.state_of(item) != TagState::Done {
            continue;
        }
        if input.recheck_gated(item.id, limits.recheck_interval) {
            selection.cooldown_skipped += 1;
            continue;
        }
        eligible.push(item.id);
    }
    shuffler.shuffle(&mut eligible);
    eligible.truncate(cap_len(eligible.len(), limits.recheck_cap));
    selection.considered = eligible;
    selection
}

/// 需要缺失答案的条目：全部 SEARCH 条目 + 预选的复查条目
pub fn oracle_scope(input: &EngineInput<'_>, recheck: Option<&RecheckSelection>) -> Vec<ItemId> {
    let mut scope: Vec<ItemId> = input
        .valid_items()
        .filter(|item| input.tags.state_of(item) == TagState::Searching)
        .map(|item| item.id)
        .collect();
    if let Some(selection) = recheck {
        scope.extend(selection.considered.iter().copied());
    }
    scope
}

/// 协调一轮的决策；recheck 为 Some 时 Phase B 直接使用预选结果
pub fn plan_reconcile<S: Shuffler>(
    input: &EngineInput<'_>,
    missing: &MissingSnapshot,
    limits: &ReconcileLimits,
    recheck: Option<&RecheckSelection>,
    shuffler: &mut S,
) -> ReconcilePlan {
    let mut plan = ReconcilePlan::default();
    let mut searching: Vec<&Item> = Vec::new();
    let mut done: Vec<&Item> = Vec::new();

    for item in input.valid_items() {
        match input.tags.state_of(item) {
            TagState::Searching => searching.push(item),
            TagState::Done => {
                if input.tags.is_conflicted(item) {
                    tracing::warn!(
                        item_id = %item.id,
                        name = %item.display_name,
                        "Item carries both search and done tags, treating as done"
                    );
                    let mut to = item.tags.clone();
                    to.remove(&input.tags.search);
                    plan.canonicalize.push(TagMutation {
                        item: item.id,
                        display_name: item.display_name.clone(),
                        from: item.tags.clone(),
                        to,
                        reason: MutationReason::Canonicalize,
                    });
                }
                done.push(item);
            }
            TagState::Untracked => {}
        }
    }
    plan.search_tagged = searching.len();
    plan.done_tagged = done.len();

    // Phase A
    let mut promotable: Vec<TagMutation> = Vec::new();
    for item in searching {
        match missing.status(item.id) {
            MissingStatus::Complete => {
                let to = input.tags.promoted(&item.tags);
                if to != item.tags {
                    promotable.push(TagMutation {
                        item: item.id,
                        display_name: item.display_name.clone(),
                        from: item.tags.clone(),
                        to,
                        reason: MutationReason::Promote,
                    });
                }
            }
            MissingStatus::Missing(_) => {}
            MissingStatus::Unknown => plan.unknown_skipped += 1,
        }
    }
    shuffler.shuffle(&mut promotable);
    plan.promote = promotable;
    plan.promote_cap = limits.promote_cap;

    // Phase B
    let eligible: Vec<(&Item, Vec<SubUnitId>)> = match recheck {
        Some(selection) => {
            plan.cooldown_skipped = selection.cooldown_skipped;
            let by_id: HashMap<ItemId, &Item> =
                done.iter().map(|item| (item.id, *item)).collect();
            let mut out = Vec::new();
            for item in selection.considered.iter().filter_map(|id| by_id.get(id).copied()) {
                plan.considered.push(item.id);
                match missing.status(item.id) {
                    MissingStatus::Missing(units) => out.push((item, units)),
                    MissingStatus::Complete => {}
                    MissingStatus::Unknown => plan.unknown_skipped += 1,
                }
            }
            out
        }
        None => {
            let mut out = Vec::new();
            for item in done {
                if input.recheck_gated(item.id, limits.recheck_interval) {
                    plan.cooldown_skipped += 1;
                    continue;
                }
                match missing.status(item.id) {
                    MissingStatus::Missing(units) => out.push((item, units)),
                    MissingStatus::Complete => {}
                    MissingStatus::Unknown => plan.unknown_skipped += 1,
                }
            }
            shuffler.shuffle(&mut out);
            out.truncate(cap_len(out.len(), limits.recheck_cap));
            plan.considered.extend(out.iter().map(|(item, _)| item.id));
            out
        }
    };

    let hierarchical = input.flavor == BackendFlavor::Hierarchical;
    let search_cap = limits.search_cap.unwrap_or(usize::MAX);
    let mut sub_unit_budget = limits.subunit_search_cap.filter(|_| hierarchical);

    for (item, units) in eligible {
        if plan.searches.len() >= search_cap {
            continue;
        }
        let sub_units = if hierarchical {
            let take = match sub_unit_budget {
                Some(budget) => budget.min(units.len()),
                None => units.len(),
            };
            if take == 0 {
                continue;
            }
            if let Some(budget) = sub_unit_budget.as_mut() {
                *budget -= take;
            }
            units[..take].to_vec()
        } else {
            Vec::new()
        };
        plan.searches.push(SearchRequest {
            item: item.id,
            display_name: item.display_name.clone(),
            sub_units,
        });
    }

    plan
}

/// 主动搜索需要缺失答案的条目：未处于搜索冷却的 SEARCH 条目
pub fn active_search_scope(input: &EngineInput<'_>, limits: &SearchLimits) -> Vec<ItemId> {
    input
        .valid_items()
        .filter(|item| input.tags.state_of(item) == TagState::Searching)
        .filter(|item| {
            !in_cooldown(input.history.last_searched_at(item.id), limits.cooldown, input.now)
        })
        .map(|item| item.id)
        .collect()
}

/// 主动搜索一轮的决策：SEARCH 且缺失、不在冷却期的条目，打乱后按上限截断
pub fn plan_active_search<S: Shuffler>(
    input: &EngineInput<'_>,
    missing: &MissingSnapshot,
    limits: &SearchLimits,
    shuffler: &mut S,
) -> SearchPlan {
    let mut plan = SearchPlan::default();
    let mut eligible: Vec<SearchRequest> = Vec::new();

    for item in input.valid_items() {
        if input.tags.state_of(item) != TagState::Searching {
            continue;
        }
        plan.search_tagged += 1;
        if in_cooldown(input.history.last_searched_at(item.id), limits.cooldown, input.now) {
            plan.cooldown_skipped += 1;
            continue;
        }
        match missing.status(item.id) {
            MissingStatus::Missing(_) => eligible.push(SearchRequest {
                item: item.id,
                display_name: item.display_name.clone(),
                sub_units: Vec::new(),
            }),
            MissingStatus::Complete => plan.complete += 1,
            MissingStatus::Unknown => plan.unknown_skipped += 1,
        }
    }

    shuffler.shuffle(&mut eligible);
    eligible.truncate(cap_len(eligible.len(), limits.search_cap));
    plan.searches = eligible;
    plan
}
