//! Sonarr 后端（/api/v3）
//!
//! 缺失状态为层级型：逐剧集列出 episode，monitored 且无文件且已播出的才算缺失。

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::http::{self, ArrHttp};
use crate::backend::{
    BackendError, BackendFlavor, Item, ItemId, MediaBackend, MissingPage, SearchCommand, SubUnit,
    SubUnitId, Tag, TagId,
};

pub struct SonarrBackend {
    http: ArrHttp,
}

impl SonarrBackend {
    pub fn new(base_url: &str, api_key: &str, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            http: ArrHttp::new(base_url, "/api/v3", api_key, timeout_secs)?,
        })
    }
}

fn parse_series(v: &Value) -> Option<Item> {
    let id = http::parse_item_id(v)?;
    Some(Item {
        id,
        display_name: http::display_name(v, &["title"], id),
        tags: http::parse_tag_set(v.get("tags")),
        missing_indicator: None,
    })
}

pub fn parse_episode(v: &Value) -> Option<SubUnit> {
    let id = v.get("id").and_then(http::as_int).filter(|id| *id > 0)?;
    let air_date = ["airDateUtc", "airDate"]
        .iter()
        .find_map(|f| v.get(*f).and_then(Value::as_str).and_then(http::parse_timestamp));
    Some(SubUnit {
        id: SubUnitId(id),
        monitored: v.get("monitored").and_then(Value::as_bool).unwrap_or(true),
        has_file: v.get("hasFile").and_then(Value::as_bool).unwrap_or(false),
        air_date,
    })
}

#[async_trait]
impl MediaBackend for SonarrBackend {
    fn name(&self) -> &str {
        "sonarr"
    }

    fn flavor(&self) -> BackendFlavor {
        BackendFlavor::Hierarchical
    }

    async fn list_tags(&self) -> Result<Vec<Tag>, BackendError> {
        self.http.list_tags().await
    }

    async fn create_tag(&self, label: &str) -> Result<Option<TagId>, BackendError> {
        self.http.create_tag(label).await
    }

    async fn list_items(&self) -> Result<Vec<Item>, BackendError> {
        let data = self.http.get("/series", &[]).await?;
        Ok(http::expect_array(&data, "series")?
            .iter()
            .filter_map(parse_series)
            .collect())
    }

    async fn list_sub_units(&self, item: ItemId) -> Result<Vec<SubUnit>, BackendError> {
        let data = self
            .http
            .get("/episode", &[("seriesId", item.0.to_string())])
            .await?;
        Ok(http::expect_array(&data, "episode")?
            .iter()
            .filter_map(parse_episode)
            .collect())
    }

    async fn update_item_tags(
        &self,
        item: ItemId,
        tags: &BTreeSet<TagId>,
    ) -> Result<(), BackendError> {
        self.http.replace_tags("series", item, tags).await
    }

    async fn query_missing_page(
        &self,
        _page: u32,
        _page_size: u32,
    ) -> Result<MissingPage, BackendError> {
        // 层级型后端按剧集逐个列 episode，不走汇总分页
        Ok(MissingPage::default())
    }

    async fn trigger_search(&self, command: &SearchCommand) -> Result<(), BackendError> {
        match command {
            SearchCommand::SubUnits { ids, .. } if !ids.is_empty() => {
                let ids: Vec<i64> = ids.iter().map(|id| id.0).collect();
                self.http
                    .command(json!({ "name": "EpisodeSearch", "episodeIds": ids }))
                    .await
            }
            other => {
                for series in other.item_ids() {
                    self.http
                        .command(json!({ "name": "SeriesSearch", "seriesId": series.0 }))
                        .await?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_episode_defaults_and_air_date_fallback() {
        let ep = parse_episode(&json!({"id": 11, "airDate": "2020-05-01"})).unwrap();
        assert!(ep.monitored);
        assert!(!ep.has_file);
        assert_eq!(ep.air_date, Some(Utc.with_ymd_and_hms(2020, 5, 1, 0, 0, 0).unwrap()));

        let utc = parse_episode(&json!({
            "id": 12,
            "monitored": false,
            "hasFile": true,
            "airDateUtc": "2021-01-02T03:04:05Z",
            "airDate": "2021-01-01"
        }))
        .unwrap();
        assert!(!utc.monitored);
        assert!(utc.has_file);
        assert_eq!(utc.air_date, Some(Utc.with_ymd_and_hms(2021, 1, 2, 3, 4, 5).unwrap()));
    }

    #[test]
    fn test_parse_episode_without_id_is_dropped() {
        assert!(parse_episode(&json!({"monitored": true})).is_none());
    }
}
