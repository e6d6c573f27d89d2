//! *arr 系列后端共用的 HTTP 层
//!
//! 统一处理 X-Api-Key 请求头、超时、401 映射与空响应体；各后端只关心路径与 JSON 形状。

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;

use crate::backend::{BackendError, ItemId, Tag, TagId};

/// 共用 HTTP 客户端：base_url + api 前缀（如 /api/v1）
#[derive(Clone, Debug)]
pub struct ArrHttp {
    client: Client,
    base_url: String,
    api_prefix: String,
}

impl ArrHttp {
    pub fn new(
        base_url: &str,
        api_prefix: &str,
        api_key: &str,
        timeout_secs: u64,
    ) -> Result<Self, BackendError> {
        let mut headers = reqwest::header::HeaderMap::new();
        let key = reqwest::header::HeaderValue::from_str(api_key)
            .map_err(|e| BackendError::Request(format!("invalid api key header: {e}")))?;
        headers.insert("X-Api-Key", key);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .default_headers(headers)
            .build()
            .map_err(|e| BackendError::Request(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_prefix: api_prefix.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.base_url, self.api_prefix, path)
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, BackendError> {
        self.send(Method::GET, path, query, None).await
    }

    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, BackendError> {
        self.send(Method::POST, path, &[], Some(body)).await
    }

    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, BackendError> {
        self.send(Method::PUT, path, &[], Some(body)).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, BackendError> {
        let url = self.url(path);
        let mut req = self.client.request(method, &url);
        if !query.is_empty() {
            req = req.query(query);
        }
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await.map_err(map_transport_error)?;
        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(BackendError::Unauthorized);
        }
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let text = resp.text().await.map_err(map_transport_error)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| BackendError::Malformed(format!("{url}: {e}")))
    }

    /// GET /{resource}/{id}，替换 tags 后整体 PUT 回去
    pub async fn replace_tags(
        &self,
        resource: &str,
        item: ItemId,
        tags: &BTreeSet<TagId>,
    ) -> Result<(), BackendError> {
        let path = format!("/{resource}/{item}");
        let mut full = self.get(&path, &[]).await?;
        let obj = full
            .as_object_mut()
            .ok_or_else(|| BackendError::Malformed(format!("{resource} {item} is not an object")))?;
        obj.insert(
            "tags".to_string(),
            Value::Array(tags.iter().map(|t| Value::from(t.0)).collect()),
        );
        self.put(&path, &full).await?;
        Ok(())
    }

    /// GET /tag
    pub async fn list_tags(&self) -> Result<Vec<Tag>, BackendError> {
        let data = self.get("/tag", &[]).await?;
        parse_tags(&data)
    }

    /// POST /tag
    pub async fn create_tag(&self, label: &str) -> Result<Option<TagId>, BackendError> {
        let created = self
            .post("/tag", &serde_json::json!({ "label": label }))
            .await?;
        Ok(created.get("id").and_then(as_int).map(TagId))
    }

    /// POST /command
    pub async fn command(&self, payload: Value) -> Result<(), BackendError> {
        self.post("/command", &payload).await?;
        Ok(())
    }
}

fn map_transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(e.to_string())
    } else {
        BackendError::Request(e.to_string())
    }
}

/// 宽松整数解析：数字或数字字符串
pub fn as_int(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn parse_tags(data: &Value) -> Result<Vec<Tag>, BackendError> {
    let list = data
        .as_array()
        .ok_or_else(|| BackendError::Malformed("tag list is not an array".to_string()))?;
    Ok(list
        .iter()
        .filter_map(|t| {
            let id = t.get("id").and_then(as_int)?;
            let label = t.get("label").and_then(Value::as_str)?;
            Some(Tag {
                id: TagId(id),
                label: label.to_string(),
            })
        })
        .collect())
}

/// 解析条目的 tags 数组，丢弃非整数项
pub fn parse_tag_set(v: Option<&Value>) -> BTreeSet<TagId> {
    v.and_then(Value::as_array)
        .map(|tags| tags.iter().filter_map(as_int).map(TagId).collect())
        .unwrap_or_default()
}

/// 解析条目 id；缺失、非整数或非正数时返回 None
pub fn parse_item_id(v: &Value) -> Option<ItemId> {
    v.get("id").and_then(as_int).and_then(ItemId::new)
}

/// 取列表 payload；非数组视为畸形
pub fn expect_array<'a>(data: &'a Value, what: &str) -> Result<&'a Vec<Value>, BackendError> {
    data.as_array()
        .ok_or_else(|| BackendError::Malformed(format!("{what} response is not an array")))
}

/// 条目展示名：依次尝试给定字段，均缺失时用 id=N
pub fn display_name(v: &Value, fields: &[&str], id: ItemId) -> String {
    fields
        .iter()
        .find_map(|f| v.get(*f).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| format!("id={id}"))
}

/// 宽松时间解析：RFC3339、无时区 ISO（按 UTC）或纯日期
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
