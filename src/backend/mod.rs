//! 后端层：能力接口与实现（Lidarr / Radarr / Sonarr / 内存 Mock）

pub mod http;
pub mod lidarr;
pub mod mock;
pub mod radarr;
pub mod sonarr;
pub mod traits;

pub use lidarr::LidarrBackend;
pub use mock::InMemoryBackend;
pub use radarr::RadarrBackend;
pub use sonarr::SonarrBackend;
pub use traits::{
    BackendError, BackendFlavor, Item, ItemId, MediaBackend, MissingPage, SearchCommand, SubUnit,
    SubUnitId, Tag, TagId,
};

use crate::config::{AppConfig, BackendKind};
use crate::core::ReconcileError;

/// 按配置创建后端客户端
pub fn create_backend_from_config(
    cfg: &AppConfig,
) -> Result<Box<dyn MediaBackend>, ReconcileError> {
    let b = &cfg.backend;
    let backend: Box<dyn MediaBackend> = match b.kind {
        BackendKind::Lidarr => Box::new(LidarrBackend::new(&b.url, &b.api_key, b.timeout_secs)?),
        BackendKind::Radarr => Box::new(RadarrBackend::new(&b.url, &b.api_key, b.timeout_secs)?),
        BackendKind::Sonarr => Box::new(SonarrBackend::new(&b.url, &b.api_key, b.timeout_secs)?),
    };
    Ok(backend)
}
