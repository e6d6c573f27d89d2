//! 内存后端（用于测试，无需真实 *arr 服务）
//!
//! 保存标签、条目、子单元与缺失列表；记录所有写操作，并支持按条目注入失败。

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::backend::{
    BackendError, BackendFlavor, Item, ItemId, MediaBackend, MissingPage, SearchCommand, SubUnit,
    Tag, TagId,
};

#[derive(Debug, Default)]
struct MockState {
    tags: Vec<Tag>,
    items: BTreeMap<ItemId, Item>,
    sub_units: HashMap<ItemId, Vec<SubUnit>>,
    /// Aggregate 后端的 wanted/missing 记录（每条记录一个 artistId）
    missing_records: Vec<ItemId>,

    unauthorized: bool,
    create_tag_returns_id: bool,
    /// 前 N 次分页查询以超时失败
    missing_page_failures: u32,
    sub_unit_failures: HashSet<ItemId>,
    update_failures: HashSet<ItemId>,
    search_failures: HashSet<ItemId>,

    tag_updates: Vec<(ItemId, BTreeSet<TagId>)>,
    searches: Vec<SearchCommand>,
    missing_page_calls: u32,
    sub_unit_calls: Vec<ItemId>,
}

/// 内存后端：flavor 可选，行为与真实后端一致（update 会改写条目标签）
#[derive(Debug)]
pub struct InMemoryBackend {
    flavor: BackendFlavor,
    state: Mutex<MockState>,
}

impl InMemoryBackend {
    pub fn new(flavor: BackendFlavor) -> Self {
        Self {
            flavor,
            state: Mutex::new(MockState {
                create_tag_returns_id: true,
                ..MockState::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn with_tag(self, id: i64, label: &str) -> Self {
        self.lock().tags.push(Tag {
            id: TagId(id),
            label: label.to_string(),
        });
        self
    }

    pub fn with_item(self, item: Item) -> Self {
        self.lock().items.insert(item.id, item);
        self
    }

    pub fn with_sub_units(self, item: ItemId, units: Vec<SubUnit>) -> Self {
        self.lock().sub_units.insert(item, units);
        self
    }

    pub fn with_missing_records(self, records: Vec<ItemId>) -> Self {
        self.lock().missing_records = records;
        self
    }

    pub fn set_unauthorized(&self, value: bool) {
        self.lock().unauthorized = value;
    }

    pub fn set_create_tag_returns_id(&self, value: bool) {
        self.lock().create_tag_returns_id = value;
    }

    pub fn fail_missing_pages(&self, times: u32) {
        self.lock().missing_page_failures = times;
    }

    pub fn fail_sub_units_for(&self, item: ItemId) {
        self.lock().sub_unit_failures.insert(item);
    }

    pub fn fail_updates_for(&self, item: ItemId) {
        self.lock().update_failures.insert(item);
    }

    pub fn fail_searches_for(&self, item: ItemId) {
        self.lock().search_failures.insert(item);
    }

    pub fn tags(&self) -> Vec<Tag> {
        self.lock().tags.clone()
    }

    pub fn item(&self, id: ItemId) -> Option<Item> {
        self.lock().items.get(&id).cloned()
    }

    pub fn tag_updates(&self) -> Vec<(ItemId, BTreeSet<TagId>)> {
        self.lock().tag_updates.clone()
    }

    pub fn searches(&self) -> Vec<SearchCommand> {
        self.lock().searches.clone()
    }

    pub fn missing_page_calls(&self) -> u32 {
        self.lock().missing_page_calls
    }

    pub fn sub_unit_calls(&self) -> Vec<ItemId> {
        self.lock().sub_unit_calls.clone()
    }

    fn check_auth(state: &MockState) -> Result<(), BackendError> {
        if state.unauthorized {
            Err(BackendError::Unauthorized)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl MediaBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn flavor(&self) -> BackendFlavor {
        self.flavor
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, BackendError> {
        let state = self.lock();
        Self::check_auth(&state)?;
        Ok(state.tags.clone())
    }

    async fn create_tag(&self, label: &str) -> Result<Option<TagId>, BackendError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        let next = state.tags.iter().map(|t| t.id.0).max().unwrap_or(0) + 1;
        state.tags.push(Tag {
            id: TagId(next),
            label: label.to_string(),
        });
        Ok(state.create_tag_returns_id.then_some(TagId(next)))
    }

    async fn list_items(&self) -> Result<Vec<Item>, BackendError> {
        let state = self.lock();
        Self::check_auth(&state)?;
        Ok(state.items.values().cloned().collect())
    }

    async fn list_sub_units(&self, item: ItemId) -> Result<Vec<SubUnit>, BackendError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        state.sub_unit_calls.push(item);
        if state.sub_unit_failures.contains(&item) {
            return Err(BackendError::Timeout(format!("episode list for {item}")));
        }
        Ok(state.sub_units.get(&item).cloned().unwrap_or_default())
    }

    async fn update_item_tags(
        &self,
        item: ItemId,
        tags: &BTreeSet<TagId>,
    ) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        if state.update_failures.contains(&item) {
            return Err(BackendError::Status {
                status: 500,
                url: format!("memory://item/{item}"),
            });
        }
        let entry = state
            .items
            .get_mut(&item)
            .ok_or_else(|| BackendError::Status {
                status: 404,
                url: format!("memory://item/{item}"),
            })?;
        entry.tags = tags.clone();
        state.tag_updates.push((item, tags.clone()));
        Ok(())
    }

    async fn query_missing_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<MissingPage, BackendError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        state.missing_page_calls += 1;
        if state.missing_page_failures > 0 {
            state.missing_page_failures -= 1;
            return Err(BackendError::Timeout(format!("wanted/missing page={page}")));
        }
        let size = page_size.max(1) as usize;
        let start = (page.max(1) as usize - 1) * size;
        let records: Vec<ItemId> = state
            .missing_records
            .iter()
            .skip(start)
            .take(size)
            .copied()
            .collect();
        Ok(MissingPage {
            record_count: records.len(),
            item_ids: records,
            total_records: Some(state.missing_records.len() as u64),
            page_size: Some(page_size as u64),
            raw_list: false,
        })
    }

    async fn trigger_search(&self, command: &SearchCommand) -> Result<(), BackendError> {
        let mut state = self.lock();
        Self::check_auth(&state)?;
        if command
            .item_ids()
            .iter()
            .any(|id| state.search_failures.contains(id))
        {
            return Err(BackendError::Status {
                status: 500,
                url: "memory://command".to_string(),
            });
        }
        state.searches.push(command.clone());
        Ok(())
    }
}
