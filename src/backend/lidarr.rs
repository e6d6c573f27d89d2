//! Lidarr 后端（/api/v1）
//!
//! 缺失状态为汇总型：分页读取 wanted/missing，记录中的 artistId 即缺失艺人。

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::http::{self, ArrHttp};
use crate::backend::{
    BackendError, BackendFlavor, Item, ItemId, MediaBackend, MissingPage, SearchCommand, SubUnit,
    Tag, TagId,
};

pub struct LidarrBackend {
    http: ArrHttp,
}

impl LidarrBackend {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            http: ArrHttp::new(base_url, "/api/v1", api_key, timeout_secs)?,
        })
    }

    async fn search_artist(&self, artist: ItemId) -> Result<(), BackendError> {
        let mut last_err = None;
        for name in ["MissingAlbumSearch", "ArtistSearch"] {
            match self
                .http
                .command(json!({ "name": name, "artistId": artist.0 }))
                .await
            {
                Ok(()) => return Ok(()),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        artist_id = %artist,
                        command = name,
                        "Lidarr command failed: {}",
                        e
                    );
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| BackendError::Request("no search command accepted".into())))
    }
}

/// 解析 wanted/missing 的一页：分页对象或旧版裸数组
pub fn parse_missing_page(data: &Value) -> Result<MissingPage, BackendError> {
    let collect = |records: &[Value]| -> Vec<ItemId> {
        records
            .iter()
            .filter_map(|r| r.get("artistId").and_then(http::as_int).and_then(ItemId::new))
            .collect()
    };

    if let Some(records) = data.get("records").and_then(Value::as_array) {
        return Ok(MissingPage {
            item_ids: collect(records),
            record_count: records.len(),
            total_records: data.get("totalRecords").and_then(Value::as_u64),
            page_size: data.get("pageSize").and_then(Value::as_u64),
            raw_list: false,
        });
    }
    if let Some(records) = data.as_array() {
        return Ok(MissingPage {
            item_ids: collect(records),
            record_count: records.len(),
            total_records: None,
            page_size: None,
            raw_list: true,
        });
    }
    Err(BackendError::Malformed(
        "wanted/missing response has no records".to_string(),
    ))
}

fn parse_artist(v: &Value) -> Option<Item> {
    let id = http::parse_item_id(v)?;
    Some(Item {
        id,
        display_name: http::display_name(v, &["artistName", "name"], id),
        tags: http::parse_tag_set(v.get("tags")),
        missing_indicator: None,
    })
}

#[async_trait]
impl MediaBackend for LidarrBackend {
    fn name(&self) -> &str {
        "lidarr"
    }

    fn flavor(&self) -> BackendFlavor {
        BackendFlavor::Aggregate
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, BackendError> {
        self.http.list_tags().await
    }

    async fn create_tag(&self, label: &str) -> Result<Option<TagId>, BackendError> {
        self.http.create_tag(label).await
    }

    async fn list_items(&self) -> Result<Vec<Item>, BackendError> {
        let data = self.http.get("/artist", &[]).await?;
        Ok(http::expect_array(&data, "artist")?
            .iter()
            .filter_map(parse_artist)
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
        self.http.replace_tags("artist", item, tags).await
    }

    async fn query_missing_page(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<MissingPage, BackendError> {
        let data = self
            .http
            .get(
                "/wanted/missing",
                &[("page", page.to_string()), ("pageSize", page_size.to_string())],
            )
            .await?;
        parse_missing_page(&data)
    }

    async fn trigger_search(&self, command: &SearchCommand) -> Result<(), BackendError> {
        for artist in command.item_ids() {
            self.search_artist(artist).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_missing_page_object() {
        let page = parse_missing_page(&json!({
            "page": 1,
            "pageSize": 2,
            "totalRecords": 5,
            "records": [{"artistId": 3}, {"artistId": "4"}, {"albumId": 9}]
        }))
        .unwrap();
        assert_eq!(page.item_ids, vec![ItemId(3), ItemId(4)]);
        assert_eq!(page.record_count, 3);
        assert_eq!(page.total_records, Some(5));
        assert_eq!(page.page_size, Some(2));
        assert!(!page.raw_list);
    }

    #[test]
    fn test_parse_missing_page_raw_list() {
        let page = parse_missing_page(&json!([{"artistId": 8}])).unwrap();
        assert!(page.raw_list);
        assert_eq!(page.item_ids, vec![ItemId(8)]);
    }

    #[test]
    fn test_parse_missing_page_rejects_unknown_shape() {
        assert!(matches!(
            parse_missing_page(&json!({"message": "oops"})),
            Err(BackendError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_artist_drops_bad_ids() {
        assert!(parse_artist(&json!({"id": 0, "artistName": "Ghost"})).is_none());
        let a = parse_artist(&json!({"id": 2, "artistName": "Low", "tags": [1]})).unwrap();
        assert_eq!(a.display_name, "Low");
        assert!(a.has_tag(TagId(1)));
    }
}
