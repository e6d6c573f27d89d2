//! 动作历史持久化
//!
//! 单文件 JSON：条目 id（字符串）→ { lastRecheckAt?, lastSearchedAt? }。
//! 每轮开始读一次、结束整体写一次；写入先落到 .tmp 再 rename，崩溃不会损坏上一份快照。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use crate::backend::http::parse_timestamp;
use crate::backend::ItemId;

/// 旧版状态文件把记录包在按后端命名的键下
const LEGACY_WRAPPERS: [&str; 3] = ["artists", "movies", "series"];

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// 单个条目的最近动作时间
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_ts")]
    pub last_recheck_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "serialize_ts")]
    pub last_searched_at: Option<DateTime<Utc>>,
}

fn serialize_ts<S: Serializer>(ts: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
    match ts {
        Some(ts) => s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        None => s.serialize_none(),
    }
}

impl ActionRecord {
    /// 宽松解析：字段名兼容旧版，时间无法解析时视为缺失
    fn from_value(v: &Value) -> Self {
        let ts = |keys: &[&str]| {
            keys.iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).and_then(parse_timestamp))
        };
        Self {
            last_recheck_at: ts(&["lastRecheckAt", "last_done_recheck_utc"]),
            last_searched_at: ts(&[
                "lastSearchedAt",
                "last_done_searched_utc",
                "last_searched_utc",
            ]),
        }
    }
}

/// 历史存储：一次运行独占，结束时原子替换
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    records: BTreeMap<ItemId, ActionRecord>,
}

impl HistoryStore {
    /// 空存储（不读盘）
    pub fn empty(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            records: BTreeMap::new(),
        }
    }

    /// 从 JSON 文件加载；文件不存在时返回空存储，内容损坏时告警并从空开始
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HistoryError> {
        let path = path.as_ref().to_path_buf();
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::empty(path)),
            Err(source) => return Err(HistoryError::Io { path, source }),
        };

        let doc: Value = match serde_json::from_str(&data) {
            Ok(doc) => doc,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "Failed reading state, starting empty: {}",
                    e
                );
                return Ok(Self::empty(path));
            }
        };
        let Some(mut obj) = doc.as_object() else {
            tracing::warn!(path = %path.display(), "State is not a JSON object, starting empty");
            return Ok(Self::empty(path));
        };
        if let Some(inner) = LEGACY_WRAPPERS
            .iter()
            .find_map(|k| obj.get(*k).and_then(Value::as_object))
        {
            obj = inner;
        }

        let mut records = BTreeMap::new();
        for (key, value) in obj {
            match key.trim().parse::<i64>().ok().and_then(ItemId::new) {
                Some(id) => {
                    records.insert(id, ActionRecord::from_value(value));
                }
                None => tracing::debug!(key = %key, "Dropping state entry with malformed item id"),
            }
        }
        Ok(Self { path, records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: ItemId) -> Option<&ActionRecord> {
        self.records.get(&id)
    }

    pub fn last_recheck_at(&self, id: ItemId) -> Option<DateTime<Utc>> {
        self.get(id).and_then(|r| r.last_recheck_at)
    }

    pub fn last_searched_at(&self, id: ItemId) -> Option<DateTime<Utc>> {
        self.get(id).and_then(|r| r.last_searched_at)
    }

    pub fn stamp_recheck(&mut self, id: ItemId, at: DateTime<Utc>) {
        self.records.entry(id).or_default().last_recheck_at = Some(at);
    }

    pub fn stamp_searched(&mut self, id: ItemId, at: DateTime<Utc>) {
        self.records.entry(id).or_default().last_searched_at = Some(at);
    }

    /// 序列化为按 key 排序的 JSON 文本
    pub fn to_json(&self) -> Result<String, HistoryError> {
        let doc: BTreeMap<String, &ActionRecord> = self
            .records
            .iter()
            .map(|(id, record)| (id.to_string(), record))
            .collect();
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// 原子写入：写 <path>.tmp 后 rename 覆盖；父目录不存在时自动创建
    pub fn save(&self) -> Result<(), HistoryError> {
        let io_err = |source| HistoryError::Io {
            path: self.path.clone(),
            source,
        };
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, self.to_json()?).map_err(io_err)?;
        std::fs::rename(&tmp, &self.path).map_err(io_err)?;
        Ok(())
    }
}
