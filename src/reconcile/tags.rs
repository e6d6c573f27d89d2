//! 标签注册表：label → TagId
//!
//! 大小写不敏感查找；不存在则创建，创建后重新列出以容忍并发创建（他人先建时创建可能失败或无 id）。

use std::collections::HashMap;

use crate::backend::{MediaBackend, Tag, TagId};
use crate::core::ReconcileError;

/// 每轮一个实例；同一 label 只解析一次
pub struct TagRegistry<'a> {
    backend: &'a dyn MediaBackend,
    cache: HashMap<String, TagId>,
}

fn find(tags: &[Tag], label: &str) -> Option<TagId> {
    tags.iter().find(|t| t.matches(label)).map(|t| t.id)
}

impl<'a> TagRegistry<'a> {
    pub fn new(backend: &'a dyn MediaBackend) -> Self {
        Self {
            backend,
            cache: HashMap::new(),
        }
    }

    pub async fn ensure(&mut self, label: &str) -> Result<TagId, ReconcileError> {
        let key = label.trim().to_lowercase();
        if let Some(id) = self.cache.get(&key) {
            return Ok(*id);
        }

        let id = self.resolve(label.trim()).await?;
        tracing::debug!(label = %label, tag_id = %id, "Resolved tag");
        self.cache.insert(key, id);
        Ok(id)
    }

    /// 只查找不创建
    pub async fn lookup(&mut self, label: &str) -> Result<Option<TagId>, ReconcileError> {
        let key = label.trim().to_lowercase();
        if let Some(id) = self.cache.get(&key) {
            return Ok(Some(*id));
        }
        let found = find(&self.backend.list_tags().await?, label.trim());
        if let Some(id) = found {
            self.cache.insert(key, id);
        }
        Ok(found)
    }

    async fn resolve(&self, label: &str) -> Result<TagId, ReconcileError> {
        if let Some(id) = find(&self.backend.list_tags().await?, label) {
            return Ok(id);
        }

        let created = match self.backend.create_tag(label).await {
            Ok(created) => {
                tracing::info!(label = %label, "Created tag");
                created
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                tracing::warn!(label = %label, "Tag create failed, re-reading tag list: {}", e);
                None
            }
        };

        find(&self.backend.list_tags().await?, label)
            .or(created)
            .ok_or_else(|| ReconcileError::TagUnresolved(label.to_string()))
    }
}
