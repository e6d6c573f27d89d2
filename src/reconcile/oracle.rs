//! 缺失状态查询（Oracle）
//!
//! 每轮只取一次快照。Granular 直接读条目标志；Aggregate 分页读 wanted/missing；
//! Hierarchical 逐条目列子单元。拿不到答案时宁可不答（Unknown / OracleUnavailable），绝不猜测。

use std::collections::{HashMap, HashSet};
use std::future::Future;

use chrono::{DateTime, Utc};

use crate::backend::{BackendError, BackendFlavor, Item, ItemId, MediaBackend, SubUnitId};
use crate::config::OracleSettings;
use crate::core::ReconcileError;

/// 单个条目的缺失状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingStatus {
    Complete,
    /// 缺失；Hierarchical 后端附带缺失子单元 id
    Missing(Vec<SubUnitId>),
    /// 本轮无法判断，不做任何动作
    Unknown,
}

/// 一轮的缺失快照
#[derive(Debug, Clone, Default)]
pub struct MissingSnapshot {
    missing: HashMap<ItemId, Vec<SubUnitId>>,
    unknown: HashSet<ItemId>,
    /// Some 时仅对范围内条目有答案，范围外一律 Unknown
    scope: Option<HashSet<ItemId>>,
}

impl MissingSnapshot {
    /// 覆盖全部条目的快照
    pub fn whole_population(
        missing: HashMap<ItemId, Vec<SubUnitId>>,
        unknown: HashSet<ItemId>,
    ) -> Self {
        Self {
            missing,
            unknown,
            scope: None,
        }
    }

    /// 仅覆盖 scope 的快照
    pub fn scoped(
        missing: HashMap<ItemId, Vec<SubUnitId>>,
        unknown: HashSet<ItemId>,
        scope: HashSet<ItemId>,
    ) -> Self {
        Self {
            missing,
            unknown,
            scope: Some(scope),
        }
    }

    pub fn status(&self, id: ItemId) -> MissingStatus {
        if self.unknown.contains(&id) {
            return MissingStatus::Unknown;
        }
        if let Some(units) = self.missing.get(&id) {
            return MissingStatus::Missing(units.clone());
        }
        match &self.scope {
            Some(scope) if !scope.contains(&id) => MissingStatus::Unknown,
            _ => MissingStatus::Complete,
        }
    }

    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    pub fn unknown_count(&self) -> usize {
        self.unknown.len()
    }
}

/// 缺失查询：持有后端与重试 / 分页参数
pub struct MissingOracle<'a> {
    backend: &'a dyn MediaBackend,
    settings: &'a OracleSettings,
}

impl<'a> MissingOracle<'a> {
    pub fn new(backend: &'a dyn MediaBackend, settings: &'a OracleSettings) -> Self {
        Self { backend, settings }
    }

    /// 计算缺失快照；scope 只对 Hierarchical 后端生效
    pub async fn compute(
        &self,
        items: &[Item],
        scope: &[ItemId],
        now: DateTime<Utc>,
    ) -> Result<MissingSnapshot, ReconcileError> {
        match self.backend.flavor() {
            BackendFlavor::Granular => Ok(Self::from_indicators(items)),
            BackendFlavor::Aggregate => self.page_wanted_missing().await,
            BackendFlavor::Hierarchical => self.list_sub_units(scope, now).await,
        }
    }

    fn from_indicators(items: &[Item]) -> MissingSnapshot {
        let mut missing = HashMap::new();
        let mut unknown = HashSet::new();
        for item in items {
            match item.missing_indicator {
                Some(true) => {
                    missing.insert(item.id, Vec::new());
                }
                Some(false) => {}
                None => {
                    unknown.insert(item.id);
                }
            }
        }
        MissingSnapshot::whole_population(missing, unknown)
    }

    async fn page_wanted_missing(&self) -> Result<MissingSnapshot, ReconcileError> {
        let s = self.settings;
        let mut ids: HashSet<ItemId> = HashSet::new();
        let mut page: u32 = 1;

        loop {
            let data = self
                .with_retry(&format!("wanted/missing page={page}"), || {
                    self.backend.query_missing_page(page, s.page_size)
                })
                .await
                .map_err(|e| match e {
                    BackendError::Unauthorized => ReconcileError::from(e),
                    other => ReconcileError::OracleUnavailable(format!(
                        "wanted/missing page={page}: {other}"
                    )),
                })?;

            if page == 1 {
                tracing::info!(
                    total_records = ?data.total_records,
                    page_size = data.page_size.unwrap_or(s.page_size as u64),
                    "Fetched first wanted/missing page"
                );
            }
            ids.extend(data.item_ids.iter().copied());

            if data.raw_list || data.record_count == 0 {
                break;
            }
            if let Some(total) = data.total_records {
                let page_size = data.page_size.filter(|n| *n > 0).unwrap_or(s.page_size as u64);
                if u64::from(page) * page_size >= total {
                    break;
                }
            }
            if page >= s.max_pages {
                return Err(ReconcileError::OracleUnavailable(format!(
                    "wanted/missing still has records after max_pages={}",
                    s.max_pages
                )));
            }
            page += 1;
        }

        let missing = ids.into_iter().map(|id| (id, Vec::new())).collect();
        Ok(MissingSnapshot::whole_population(missing, HashSet::new()))
    }

    async fn list_sub_units(
        &self,
        scope: &[ItemId],
        now: DateTime<Utc>,
    ) -> Result<MissingSnapshot, ReconcileError> {
        let mut missing = HashMap::new();
        let mut unknown = HashSet::new();

        for &id in scope {
            match self
                .with_retry(&format!("episodes item={id}"), || self.backend.list_sub_units(id))
                .await
            {
                Ok(units) => {
                    let ids: Vec<SubUnitId> = units
                        .iter()
                        .filter(|u| u.is_missing(now))
                        .map(|u| u.id)
                        .collect();
                    if !ids.is_empty() {
                        missing.insert(id, ids);
                    }
                }
                Err(e) if e.is_fatal() => return Err(e.into()),
                Err(e) => {
                    tracing::error!(
                        item_id = %id,
                        "Unable to list sub-units, skipping item this run: {}",
                        e
                    );
                    unknown.insert(id);
                }
            }
        }

        Ok(MissingSnapshot::scoped(
            missing,
            unknown,
            scope.iter().copied().collect(),
        ))
    }

    /// 瞬时错误按固定间隔重试 settings.retries 次
    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, BackendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let attempts = self.settings.retries + 1;
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(attempt, attempts, "Transient error fetching {}: {}", what, e);
                    tokio::time::sleep(self.settings.retry_delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{InMemoryBackend, SubUnit};
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn settings(retries: u32, page_size: u32, max_pages: u32) -> OracleSettings {
        OracleSettings {
            page_size,
            max_pages,
            retries,
            retry_delay: std::time::Duration::ZERO,
        }
    }

    fn item(id: i64, missing: Option<bool>) -> Item {
        Item {
            id: ItemId(id),
            display_name: format!("item {id}"),
            tags: BTreeSet::new(),
            missing_indicator: missing,
        }
    }

    #[tokio::test]
    async fn test_granular_uses_item_indicator() {
        let backend = InMemoryBackend::new(BackendFlavor::Granular);
        let s = settings(0, 10, 10);
        let items = vec![item(1, Some(true)), item(2, Some(false)), item(3, None)];
        let snap = MissingOracle::new(&backend, &s)
            .compute(&items, &[], Utc::now())
            .await
            .unwrap();
        assert_eq!(snap.status(ItemId(1)), MissingStatus::Missing(vec![]));
        assert_eq!(snap.status(ItemId(2)), MissingStatus::Complete);
        assert_eq!(snap.status(ItemId(3)), MissingStatus::Unknown);
    }

    #[tokio::test]
    async fn test_aggregate_pages_until_total_reached() {
        let records = (1..=5).map(ItemId).chain([ItemId(2)]).collect();
        let backend = InMemoryBackend::new(BackendFlavor::Aggregate).with_missing_records(records);
        let s = settings(0, 2, 10);
        let snap = MissingOracle::new(&backend, &s)
            .compute(&[], &[], Utc::now())
            .await
            .unwrap();
        assert_eq!(backend.missing_page_calls(), 3);
        assert_eq!(snap.missing_count(), 5);
        assert_eq!(snap.status(ItemId(4)), MissingStatus::Missing(vec![]));
        assert_eq!(snap.status(ItemId(9)), MissingStatus::Complete);
    }

    #[tokio::test]
    async fn test_aggregate_retries_transient_failures() {
        let backend =
            InMemoryBackend::new(BackendFlavor::Aggregate).with_missing_records(vec![ItemId(3)]);
        backend.fail_missing_pages(2);
        let s = settings(2, 10, 10);
        let snap = MissingOracle::new(&backend, &s)
            .compute(&[], &[], Utc::now())
            .await
            .unwrap();
        assert_eq!(backend.missing_page_calls(), 3);
        assert_eq!(snap.status(ItemId(3)), MissingStatus::Missing(vec![]));
    }

    #[tokio::test]
    async fn test_aggregate_exhausted_retries_is_unavailable() {
        let backend =
            InMemoryBackend::new(BackendFlavor::Aggregate).with_missing_records(vec![ItemId(3)]);
        backend.fail_missing_pages(3);
        let s = settings(2, 10, 10);
        let err = MissingOracle::new(&backend, &s)
            .compute(&[], &[], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::OracleUnavailable(_)));
    }

    #[tokio::test]
    async fn test_aggregate_max_pages_breaker_is_unavailable() {
        let records = (1..=10).map(ItemId).collect();
        let backend = InMemoryBackend::new(BackendFlavor::Aggregate).with_missing_records(records);
        let s = settings(0, 2, 3);
        let err = MissingOracle::new(&backend, &s)
            .compute(&[], &[], Utc::now())
            .await
            .unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(backend.missing_page_calls(), 3);
    }

    #[tokio::test]
    async fn test_aggregate_unauthorized_is_not_retried() {
        let backend = InMemoryBackend::new(BackendFlavor::Aggregate);
        backend.set_unauthorized(true);
        let s = settings(5, 10, 10);
        let err = MissingOracle::new(&backend, &s)
            .compute(&[], &[], Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, ReconcileError::Unauthorized(_)));
        assert_eq!(backend.missing_page_calls(), 0);
    }

    #[tokio::test]
    async fn test_hierarchical_scope_and_per_item_failure() {
        let now = Utc::now();
        let aired = Some(now - Duration::days(3));
        let upcoming = Some(now + Duration::days(3));
        let unit = |id, has_file, air| SubUnit {
            id: SubUnitId(id),
            monitored: true,
            has_file,
            air_date: air,
        };
        let backend = InMemoryBackend::new(BackendFlavor::Hierarchical)
            .with_sub_units(
                ItemId(1),
                vec![
                    unit(10, false, aired),
                    unit(11, true, aired),
                    unit(12, false, upcoming),
                ],
            )
            .with_sub_units(ItemId(2), vec![unit(20, true, aired)]);
        backend.fail_sub_units_for(ItemId(3));

        let s = settings(1, 10, 10);
        let snap = MissingOracle::new(&backend, &s)
            .compute(&[], &[ItemId(1), ItemId(2), ItemId(3)], now)
            .await
            .unwrap();

        assert_eq!(snap.status(ItemId(1)), MissingStatus::Missing(vec![SubUnitId(10)]));
        assert_eq!(snap.status(ItemId(2)), MissingStatus::Complete);
        assert_eq!(snap.status(ItemId(3)), MissingStatus::Unknown);
        // 范围外的条目没有答案
        assert_eq!(snap.status(ItemId(4)), MissingStatus::Unknown);
        // item 3 重试一次：共 2 次
        assert_eq!(
            backend.sub_unit_calls().iter().filter(|id| **id == ItemId(3)).count(),
            2
        );
    }
}
