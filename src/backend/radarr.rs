//! Radarr 后端（/api/v3）
//!
//! 缺失状态为粒度型：电影对象自带 hasFile，无需额外查询。

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::http::{self, ArrHttp};
use crate::backend::{
    BackendError, BackendFlavor, Item, ItemId, MediaBackend, MissingPage, SearchCommand, SubUnit,
    Tag, TagId,
};

pub struct RadarrBackend {
    http: ArrHttp,
}

impl RadarrBackend {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            http: ArrHttp::new(base_url, "/api/v3", api_key, timeout_secs)?,
        })
    }
}

fn parse_movie(v: &Value) -> Option<Item> {
    let id = http::parse_item_id(v)?;
    Some(Item {
        id,
        display_name: http::display_name(v, &["title"], id),
        tags: http::parse_tag_set(v.get("tags")),
        missing_indicator: v.get("hasFile").and_then(Value::as_bool).map(|has| !has),
    })
}

#[async_trait]
impl MediaBackend for RadarrBackend {
    fn name(&self) -> &str {
        "radarr"
    }

    fn flavor(&self) -> BackendFlavor {
        BackendFlavor::Granular
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, BackendError> {
        self.http.list_tags().await
    }

    async fn create_tag(&self, label: &str) -> Result<Option<TagId>, BackendError> {
        self.http.create_tag(label).await
    }

    async fn list_items(&self) -> Result<Vec<Item>, BackendError> {
        let data = self.http.get("/movie", &[]).await?;
        Ok(http::expect_array(&data, "movie")?
            .iter()
            .filter_map(parse_movie)
            .collect())
    }

    async fn list_sub_units(&self, _item: ItemId) -> Result<Vec<SubUnit>, BackendError> {
        Ok(Vec::new())
    }

    async fn update_item_tags(
        &self,
        item: ItemId,
        tags: &BTreeSet<TagId>,
    ) -> Result<(), BackendError> {
        self.http.replace_tags("movie", item, tags).await
    }

    async fn query_missing_page(
        &self,
        _page: u32,
        _page_size: u32,
    ) -> Result<MissingPage, BackendError> {
        // 缺失标志已在 movie 对象上
        Ok(MissingPage::default())
    }

    async fn trigger_search(&self, command: &SearchCommand) -> Result<(), BackendError> {
        let ids: Vec<i64> = command.item_ids().iter().map(|id| id.0).collect();
        self.http
            .command(json!({ "name": "MoviesSearch", "movieIds": ids }))
            .await
    }
}
