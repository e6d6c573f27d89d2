//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ARR__*` 覆盖（双下划线表示嵌套，如 `ARR__BACKEND__API_KEY=xxx`）。
//! 兼容旧部署：`LIDARR_URL` / `RADARR_API_KEY` / `HTTP_TIMEOUT` 等仅在对应字段为空时生效。

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::ReconcileError;

/// 后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Lidarr,
    Radarr,
    Sonarr,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Lidarr => "lidarr",
            BackendKind::Radarr => "radarr",
            BackendKind::Sonarr => "sonarr",
        }
    }

    /// 旧版环境变量前缀（LIDARR / RADARR / SONARR）
    fn env_prefix(&self) -> String {
        self.as_str().to_ascii_uppercase()
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lidarr" => Ok(BackendKind::Lidarr),
            "radarr" => Ok(BackendKind::Radarr),
            "sonarr" => Ok(BackendKind::Sonarr),
            other => Err(format!("unknown backend '{other}' (expected lidarr, radarr or sonarr)")),
        }
    }
}

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendSection,
    pub tags: TagsSection,
    pub reconcile: ReconcileSection,
    pub oracle: OracleSection,
    pub search: SearchSection,
    pub retag: RetagSection,
}

/// [backend] 段：地址、凭据、HTTP 超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSection {
    pub kind: BackendKind,
    pub url: String,
    pub api_key: String,
    /// 单次 HTTP 请求超时（秒）
    pub timeout_secs: u64,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            url: String::new(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

/// [tags] 段：SEARCH / DONE 标签名
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TagsSection {
    pub search: String,
    pub done: String,
}

impl Default for TagsSection {
    fn default() -> Self {
        Self {
            search: "search".to_string(),
            done: "done".to_string(),
        }
    }
}

/// [reconcile] 段：复查间隔与每轮上限（0 = 不限）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileSection {
    /// 未设置时为 /data/state/{kind}_missing_done_state.json
    pub state_path: Option<PathBuf>,
    pub recheck_hours: u64,
    pub promote_max_per_run: usize,
    pub recheck_max_per_run: usize,
    pub search_max_per_run: usize,
    /// 仅 Sonarr：每轮最多搜索的剧集数
    pub subunit_search_max_per_run: usize,
    /// 固定打乱种子（复现用）；未设置时随机
    pub shuffle_seed: Option<u64>,
}

impl Default for ReconcileSection {
    fn default() -> Self {
        Self {
            state_path: None,
            recheck_hours: DEFAULT_RECHECK_HOURS,
            promote_max_per_run: 200,
            recheck_max_per_run: 20,
            search_max_per_run: 20,
            subunit_search_max_per_run: 50,
            shuffle_seed: None,
        }
    }
}

/// [oracle] 段：wanted/missing 分页与重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OracleSection {
    pub page_size: u32,
    /// 分页熔断上限
    pub max_pages: u32,
    pub retries: u32,
    pub retry_delay_secs: u64,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            page_size: 200,
            max_pages: 200,
            retries: 2,
            retry_delay_secs: 3,
        }
    }
}

/// [search] 段：对 SEARCH 标签条目的主动搜索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    /// 未设置时为 /data/state/{kind}_search_state.json
    pub state_path: Option<PathBuf>,
    pub cooldown_days: u64,
    pub max_per_run: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            state_path: None,
            cooldown_days: 7,
            max_per_run: 10,
        }
    }
}

/// [retag] 段：把 from 标签批量换成 to 标签
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetagSection {
    pub from: String,
    pub to: String,
    pub max_per_run: usize,
}

impl Default for RetagSection {
    fn default() -> Self {
        Self {
            from: "arr-extended".to_string(),
            to: "search".to_string(),
            max_per_run: 500,
        }
    }
}

const DEFAULT_RECHECK_HOURS: u64 = 24;

/// 0 表示不限
fn cap(n: usize) -> Option<usize> {
    (n > 0).then_some(n)
}

/// 超出 chrono 可表示范围的时长视为配置错误
fn checked_duration(
    key: &str,
    value: u64,
    make: fn(i64) -> Option<chrono::Duration>,
) -> Result<chrono::Duration, ReconcileError> {
    i64::try_from(value)
        .ok()
        .and_then(make)
        .ok_or_else(|| ReconcileError::Config(format!("{key} is out of range: {value}")))
}

/// 协调引擎的不可变参数（由 AppConfig 一次性构造后传入引擎）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileLimits {
    pub recheck_interval: chrono::Duration,
    pub promote_cap: Option<usize>,
    pub recheck_cap: Option<usize>,
    pub search_cap: Option<usize>,
    pub subunit_search_cap: Option<usize>,
}

impl Default for ReconcileLimits {
    fn default() -> Self {
        let section = ReconcileSection::default();
        Self {
            recheck_interval: chrono::Duration::hours(DEFAULT_RECHECK_HOURS as i64),
            promote_cap: cap(section.promote_max_per_run),
            recheck_cap: cap(section.recheck_max_per_run),
            search_cap: cap(section.search_max_per_run),
            subunit_search_cap: cap(section.subunit_search_max_per_run),
        }
    }
}

impl ReconcileSection {
    pub fn limits(&self) -> Result<ReconcileLimits, ReconcileError> {
        Ok(ReconcileLimits {
            recheck_interval: checked_duration(
                "reconcile.recheck_hours",
                self.recheck_hours,
                chrono::Duration::try_hours,
            )?,
            promote_cap: cap(self.promote_max_per_run),
            recheck_cap: cap(self.recheck_max_per_run),
            search_cap: cap(self.search_max_per_run),
            subunit_search_cap: cap(self.subunit_search_max_per_run),
        })
    }
}

/// 主动搜索任务的不可变参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchLimits {
    pub cooldown: chrono::Duration,
    pub search_cap: Option<usize>,
}

impl SearchSection {
    pub fn limits(&self) -> Result<SearchLimits, ReconcileError> {
        Ok(SearchLimits {
            cooldown: checked_duration(
                "search.cooldown_days",
                self.cooldown_days,
                chrono::Duration::try_days,
            )?,
            search_cap: cap(self.max_per_run),
        })
    }
}

/// 缺失查询的重试与分页参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleSettings {
    pub page_size: u32,
    pub max_pages: u32,
    pub retries: u32,
    pub retry_delay: Duration,
}

impl OracleSection {
    pub fn settings(&self) -> OracleSettings {
        OracleSettings {
            page_size: self.page_size.max(1),
            max_pages: self.max_pages.max(1),
            retries: self.retries,
            retry_delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}

impl Default for OracleSettings {
    fn default() -> Self {
        OracleSection::default().settings()
    }
}

impl AppConfig {
    /// 协调任务的状态文件路径
    pub fn reconcile_state_path(&self) -> PathBuf {
        self.reconcile.state_path.clone().unwrap_or_else(|| {
            PathBuf::from(format!(
                "/data/state/{}_missing_done_state.json",
                self.backend.kind
            ))
        })
    }

    /// 主动搜索任务的状态文件路径
    pub fn search_state_path(&self) -> PathBuf {
        self.search.state_path.clone().unwrap_or_else(|| {
            PathBuf::from(format!("/data/state/{}_search_state.json", self.backend.kind))
        })
    }

    /// 缺少地址 / 凭据 / 标签名时返回配置错误（在任何远程调用之前）
    pub fn validate(&self) -> Result<(), ReconcileError> {
        let prefix = self.backend.kind.env_prefix();
        if self.backend.url.trim().is_empty() {
            return Err(ReconcileError::Config(format!(
                "backend url is required (ARR__BACKEND__URL or {prefix}_URL)"
            )));
        }
        if self.backend.api_key.trim().is_empty() {
            return Err(ReconcileError::Config(format!(
                "backend api key is required (ARR__BACKEND__API_KEY or {prefix}_API_KEY)"
            )));
        }
        if self.tags.search.trim().is_empty() || self.tags.done.trim().is_empty() {
            return Err(ReconcileError::Config(
                "search and done tag labels must be non-empty".to_string(),
            ));
        }
        if self.tags.search.trim().eq_ignore_ascii_case(self.tags.done.trim()) {
            return Err(ReconcileError::Config(format!(
                "search and done tags must differ (both '{}')",
                self.tags.search
            )));
        }
        self.reconcile.limits()?;
        self.search.limits()?;
        Ok(())
    }

    /// 旧版环境变量兜底：只填充仍为空 / 默认值的字段
    pub fn apply_legacy_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let prefix = self.backend.kind.env_prefix();
        let non_empty = |key: String| {
            lookup(&key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if self.backend.url.trim().is_empty() {
            if let Some(url) = non_empty(format!("{prefix}_URL")) {
                self.backend.url = url;
            }
        }
        if self.backend.api_key.trim().is_empty() {
            if let Some(key) = non_empty(format!("{prefix}_API_KEY")) {
                self.backend.api_key = key;
            }
        }
        if self.backend.timeout_secs == BackendSection::default().timeout_secs {
            if let Some(secs) = non_empty("HTTP_TIMEOUT".to_string()).and_then(|v| v.parse().ok()) {
                self.backend.timeout_secs = secs;
            }
        }
        self.backend.url = self.backend.url.trim().trim_end_matches('/').to_string();
        self.backend.api_key = self.backend.api_key.trim().to_string();
    }
}

/// 从 config 目录加载配置，环境变量 ARR__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 叠加环境变量 ARR__*（双下划线表示嵌套键）
/// 4. 命令行指定的后端类型优先于以上所有来源
/// 5. 最后用旧版环境变量填充仍为空的地址 / 凭据
pub fn load_config(
    config_path: Option<PathBuf>,
    backend: Option<BackendKind>,
) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ARR")
            .separator("__")
            .try_parsing(true),
    );
    builder = builder.set_override_option("backend.kind", backend.map(|k| k.as_str()))?;

    let mut cfg: AppConfig = builder.build()?.try_deserialize()?;
    cfg.apply_legacy_env(|key| std::env::var(key).ok());
    Ok(cfg)
}

/// 从 TOML 字符串解析（测试与内嵌配置用）
pub fn from_toml_str(toml: &str) -> Result<AppConfig, config::ConfigError> {
    config::Config::builder()
        .add_source(config::File::from_str(toml, config::FileFormat::Toml))
        .build()?
        .try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_reference_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.backend.timeout_secs, 30);
        assert_eq!(cfg.tags.search, "search");
        assert_eq!(cfg.tags.done, "done");
        assert_eq!(cfg.reconcile.recheck_hours, 24);
        assert_eq!(cfg.oracle.page_size, 200);
        assert_eq!(cfg.oracle.retries, 2);
        assert_eq!(cfg.search.cooldown_days, 7);
        assert_eq!(
            cfg.reconcile_state_path(),
            PathBuf::from("/data/state/lidarr_missing_done_state.json")
        );
    }

    #[test]
    fn test_from_toml_overrides_sections() {
        let cfg = from_toml_str(
            r#"
            [backend]
            kind = "sonarr"
            url = "http://sonarr:8989"
            api_key = "k"

            [reconcile]
            recheck_hours = 6
            search_max_per_run = 0
            state_path = "/tmp/s.json"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.backend.kind, BackendKind::Sonarr);
        assert_eq!(cfg.reconcile.recheck_hours, 6);
        assert_eq!(cfg.reconcile.recheck_max_per_run, 20);
        assert_eq!(cfg.reconcile_state_path(), PathBuf::from("/tmp/s.json"));

        let limits = cfg.reconcile.limits().unwrap();
        assert_eq!(limits.search_cap, None);
        assert_eq!(limits.recheck_cap, Some(20));
        assert_eq!(limits.recheck_interval, chrono::Duration::hours(6));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_credentials() {
        let mut cfg = AppConfig::default();
        assert!(matches!(cfg.validate(), Err(ReconcileError::Config(_))));

        cfg.backend.url = "http://lidarr:8686".into();
        assert!(matches!(
            cfg.validate(),
            Err(ReconcileError::Config(msg)) if msg.contains("api key")
        ));

        cfg.backend.api_key = "secret".into();
        assert!(cfg.validate().is_ok());

        cfg.tags.done = "SEARCH".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_out_of_range_intervals_are_config_errors() {
        let mut cfg = AppConfig::default();
        cfg.backend.url = "http://sonarr:8989".into();
        cfg.backend.api_key = "secret".into();

        cfg.reconcile.recheck_hours = u64::MAX;
        assert!(matches!(
            cfg.reconcile.limits(),
            Err(ReconcileError::Config(msg)) if msg.contains("recheck_hours")
        ));
        assert!(cfg.validate().is_err());

        cfg.reconcile.recheck_hours = 24;
        cfg.search.cooldown_days = i64::MAX as u64;
        assert!(matches!(
            cfg.search.limits(),
            Err(ReconcileError::Config(msg)) if msg.contains("cooldown_days")
        ));
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_legacy_env_fills_only_empty_fields() {
        let env: HashMap<&str, &str> = [
            ("RADARR_URL", "http://radarr:7878/"),
            ("RADARR_API_KEY", " abc "),
            ("HTTP_TIMEOUT", "45"),
        ]
        .into_iter()
        .collect();

        let mut cfg = AppConfig::default();
        cfg.backend.kind = BackendKind::Radarr;
        cfg.apply_legacy_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.backend.url, "http://radarr:7878");
        assert_eq!(cfg.backend.api_key, "abc");
        assert_eq!(cfg.backend.timeout_secs, 45);

        let mut explicit = AppConfig::default();
        explicit.backend.kind = BackendKind::Radarr;
        explicit.backend.url = "http://other".into();
        explicit.apply_legacy_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(explicit.backend.url, "http://other");
    }

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("Sonarr".parse::<BackendKind>().unwrap(), BackendKind::Sonarr);
        assert!("plex".parse::<BackendKind>().is_err());
    }
}
