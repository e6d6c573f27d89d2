//! 任务运行器：协调 / 主动搜索 / 换标签
//!
//! 每个任务一次运行：解析标签 → 列条目 → 读历史 → 缺失快照 → 决策 → 执行 → 写历史。
//! 缺失查询不可用时整轮跳过（不改标签、不写历史）；凭据被拒时立即返回错误。
//! dry_run 只输出计划，不调用任何写接口，也不落盘。

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use tracing::Instrument;
use uuid::Uuid;

use crate::backend::{BackendFlavor, ItemId, MediaBackend};
use crate::config::{AppConfig, OracleSettings, ReconcileLimits, SearchLimits};
use crate::core::ReconcileError;
use crate::memory::HistoryStore;
use crate::reconcile::{
    active_search_scope, oracle_scope, plan_active_search, plan_reconcile, plan_retag,
    select_recheck, Dispatcher, EngineInput, MissingOracle, MissingSnapshot, ReconcilePlan,
    RunSummary, SearchPlan, Shuffler, TagMutation, TagPair, TagRegistry,
};

/// 协调任务参数
#[derive(Debug, Clone)]
pub struct ReconcileJob {
    pub search_tag: String,
    pub done_tag: String,
    pub limits: ReconcileLimits,
    pub oracle: OracleSettings,
    pub state_path: PathBuf,
}

impl ReconcileJob {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ReconcileError> {
        Ok(Self {
            search_tag: cfg.tags.search.clone(),
            done_tag: cfg.tags.done.clone(),
            limits: cfg.reconcile.limits()?,
            oracle: cfg.oracle.settings(),
            state_path: cfg.reconcile_state_path(),
        })
    }
}

/// 主动搜索任务参数
#[derive(Debug, Clone)]
pub struct SearchJob {
    pub search_tag: String,
    pub done_tag: String,
    pub limits: SearchLimits,
    pub oracle: OracleSettings,
    pub state_path: PathBuf,
}

impl SearchJob {
    pub fn from_config(cfg: &AppConfig) -> Result<Self, ReconcileError> {
        Ok(Self {
            search_tag: cfg.tags.search.clone(),
            done_tag: cfg.tags.done.clone(),
            limits: cfg.search.limits()?,
            oracle: cfg.oracle.settings(),
            state_path: cfg.search_state_path(),
        })
    }
}

/// 换标签任务参数
#[derive(Debug, Clone)]
pub struct RetagJob {
    pub from: String,
    pub to: String,
    pub cap: Option<usize>,
}

impl RetagJob {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            from: cfg.retag.from.clone(),
            to: cfg.retag.to.clone(),
            cap: (cfg.retag.max_per_run > 0).then_some(cfg.retag.max_per_run),
        }
    }
}

fn run_span(job: &'static str, backend: &dyn MediaBackend) -> tracing::Span {
    tracing::info_span!("run", job, run_id = %Uuid::new_v4(), backend = backend.name())
}

async fn resolve_tag_pair(
    backend: &dyn MediaBackend,
    search: &str,
    done: &str,
) -> Result<TagPair, ReconcileError> {
    let mut registry = TagRegistry::new(backend);
    Ok(TagPair {
        search: registry.ensure(search).await?,
        done: registry.ensure(done).await?,
    })
}

/// 缺失查询不可用 → Ok(None)，调用方跳过本轮
async fn snapshot_or_skip(
    oracle: MissingOracle<'_>,
    input: &EngineInput<'_>,
    scope: &[ItemId],
) -> Result<Option<MissingSnapshot>, ReconcileError> {
    match oracle.compute(input.items, scope, input.now).await {
        Ok(snapshot) => {
            tracing::debug!(
                missing = snapshot.missing_count(),
                unknown = snapshot.unknown_count(),
                "Computed missing snapshot"
            );
            Ok(Some(snapshot))
        }
        Err(e) if e.is_recoverable() => {
            tracing::warn!("Skipping run, no safe missing answer: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// 协调一轮
pub async fn run_reconcile<S: Shuffler>(
    backend: &dyn MediaBackend,
    job: &ReconcileJob,
    shuffler: &mut S,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<RunSummary, ReconcileError> {
    reconcile_once(backend, job, shuffler, now, dry_run)
        .instrument(run_span("reconcile", backend))
        .await
}

async fn reconcile_once<S: Shuffler>(
    backend: &dyn MediaBackend,
    job: &ReconcileJob,
    shuffler: &mut S,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<RunSummary, ReconcileError> {
    let tags = resolve_tag_pair(backend, &job.search_tag, &job.done_tag).await?;
    let items = backend.list_items().await?;
    let mut history = HistoryStore::load(&job.state_path)?;
    tracing::info!(items = items.len(), history = history.len(), "Loaded items and history");

    let input = EngineInput {
        items: &items,
        tags,
        flavor: backend.flavor(),
        history: &history,
        now,
    };
    // 逐条目列子单元的后端先选出本轮复查的 DONE 条目，只查这些
    let recheck = if input.flavor == BackendFlavor::Hierarchical {
        Some(select_recheck(&input, &job.limits, shuffler))
    } else {
        None
    };
    let scope = oracle_scope(&input, recheck.as_ref());
    let oracle = MissingOracle::new(backend, &job.oracle);
    let Some(snapshot) = snapshot_or_skip(oracle, &input, &scope).await? else {
        let summary = RunSummary::skipped();
        summary.log("reconcile");
        return Ok(summary);
    };
    let plan = plan_reconcile(&input, &snapshot, &job.limits, recheck.as_ref(), shuffler);

    if dry_run {
        let summary = planned_reconcile_summary(&plan);
        summary.log("reconcile (dry-run)");
        return Ok(summary);
    }

    let summary = Dispatcher::new(backend).execute(&plan, &mut history, now).await?;
    history.save()?;
    summary.log("reconcile");
    Ok(summary)
}

/// 主动搜索一轮
pub async fn run_search<S: Shuffler>(
    backend: &dyn MediaBackend,
    job: &SearchJob,
    shuffler: &mut S,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<RunSummary, ReconcileError> {
    search_once(backend, job, shuffler, now, dry_run)
        .instrument(run_span("search", backend))
        .await
}

async fn search_once<S: Shuffler>(
    backend: &dyn MediaBackend,
    job: &SearchJob,
    shuffler: &mut S,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<RunSummary, ReconcileError> {
    let tags = resolve_tag_pair(backend, &job.search_tag, &job.done_tag).await?;
    let items = backend.list_items().await?;
    let mut history = HistoryStore::load(&job.state_path)?;

    let input = EngineInput {
        items: &items,
        tags,
        flavor: backend.flavor(),
        history: &history,
        now,
    };
    let scope = active_search_scope(&input, &job.limits);
    let oracle = MissingOracle::new(backend, &job.oracle);
    let Some(snapshot) = snapshot_or_skip(oracle, &input, &scope).await? else {
        let summary = RunSummary::skipped();
        summary.log("search");
        return Ok(summary);
    };
    let plan = plan_active_search(&input, &snapshot, &job.limits, shuffler);
    if plan.complete > 0 {
        tracing::info!(
            complete = plan.complete,
            "Search-tagged items no longer missing, left for reconcile"
        );
    }

    if dry_run {
        let summary = planned_search_summary(&plan);
        summary.log("search (dry-run)");
        return Ok(summary);
    }

    let summary = Dispatcher::new(backend)
        .execute_search(&plan, &mut history, now)
        .await?;
    history.save()?;
    summary.log("search");
    Ok(summary)
}

/// 换标签一轮；from 标签不存在时什么也不做
pub async fn run_retag<S: Shuffler>(
    backend: &dyn MediaBackend,
    job: &RetagJob,
    shuffler: &mut S,
    dry_run: bool,
) -> Result<RunSummary, ReconcileError> {
    retag_once(backend, job, shuffler, dry_run)
        .instrument(run_span("retag", backend))
        .await
}

async fn retag_once<S: Shuffler>(
    backend: &dyn MediaBackend,
    job: &RetagJob,
    shuffler: &mut S,
    dry_run: bool,
) -> Result<RunSummary, ReconcileError> {
    let mut registry = TagRegistry::new(backend);
    let Some(from) = registry.lookup(&job.from).await? else {
        tracing::info!(tag = %job.from, "Source tag does not exist, nothing to retag");
        let summary = RunSummary::default();
        summary.log("retag");
        return Ok(summary);
    };
    let to = registry.ensure(&job.to).await?;
    let items = backend.list_items().await?;
    let mutations = plan_retag(&items, from, to, job.cap, shuffler);

    if dry_run {
        log_planned_mutations(&mutations);
        let summary = RunSummary {
            retagged: mutations.len(),
            ..RunSummary::default()
        };
        summary.log("retag (dry-run)");
        return Ok(summary);
    }

    let outcome = Dispatcher::new(backend)
        .apply_mutations(&mutations, None)
        .await?;
    let summary = RunSummary {
        retagged: outcome.applied,
        mutation_failed: outcome.failed,
        ..RunSummary::default()
    };
    summary.log("retag");
    Ok(summary)
}

fn log_planned_mutations(mutations: &[TagMutation]) {
    for m in mutations {
        tracing::info!(
            item_id = %m.item,
            name = %m.display_name,
            reason = ?m.reason,
            "[dry-run] would update tags"
        );
    }
}

/// dry-run 假设全部改写成功，晋升按上限截断
fn planned_reconcile_summary(plan: &ReconcilePlan) -> RunSummary {
    let promote_len = plan
        .promote_cap
        .map_or(plan.promote.len(), |cap| cap.min(plan.promote.len()));
    log_planned_mutations(&plan.canonicalize);
    log_planned_mutations(&plan.promote[..promote_len]);
    for s in &plan.searches {
        tracing::info!(
            item_id = %s.item,
            name = %s.display_name,
            sub_units = s.sub_units.len(),
            "[dry-run] would search"
        );
    }
    RunSummary {
        search_tagged: plan.search_tagged,
        done_tagged: plan.done_tagged,
        canonicalized: plan.canonicalize.len(),
        promoted: promote_len,
        cooldown_skipped: plan.cooldown_skipped,
        unknown_skipped: plan.unknown_skipped,
        considered: plan.considered.len(),
        searched: plan.searches.len(),
        searched_sub_units: plan.searches.iter().map(|s| s.sub_units.len()).sum(),
        ..RunSummary::default()
    }
}

fn planned_search_summary(plan: &SearchPlan) -> RunSummary {
    for s in &plan.searches {
        tracing::info!(item_id = %s.item, name = %s.display_name, "[dry-run] would search");
    }
    RunSummary {
        search_tagged: plan.search_tagged,
        cooldown_skipped: plan.cooldown_skipped,
        unknown_skipped: plan.unknown_skipped,
        searched: plan.searches.len(),
        ..RunSummary::default()
    }
}
