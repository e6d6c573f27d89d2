//! arr-reconcile - *arr 标签状态协调
//!
//! 入口：解析命令行、初始化日志、加载并校验配置、创建后端，执行一次指定任务后退出。
//! 调度（cron / 定时器）由外部负责，同一后端的两次运行不得重叠。

use std::path::PathBuf;

use anyhow::Context;
use arr_reconcile::config::{load_config, BackendKind};
use arr_reconcile::core::{
    run_reconcile, run_retag, run_search, ReconcileJob, RetagJob, SearchJob,
};
use arr_reconcile::reconcile::SeededShuffler;
use arr_reconcile::{create_backend_from_config, observability};
use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "arr-reconcile",
    version,
    about = "Tag-state reconciliation for Lidarr / Radarr / Sonarr"
)]
struct Cli {
    /// 额外的 TOML 配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// 后端类型（覆盖配置）
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// 固定打乱种子，便于复现
    #[arg(long, global = true)]
    seed: Option<u64>,

    /// 只输出计划，不改标签、不触发搜索、不写历史
    #[arg(long, global = true)]
    dry_run: bool,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// SEARCH → DONE 晋升，DONE 缺失复查（默认）
    #[default]
    Reconcile,
    /// 对 SEARCH 且缺失的条目主动触发搜索
    Search,
    /// 批量换标签（retag.from → retag.to）
    Retag,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    observability::init(cli.verbose);

    let cfg = load_config(cli.config.clone(), cli.backend).context("Failed to load config")?;
    cfg.validate().context("Invalid config")?;

    let backend = create_backend_from_config(&cfg).context("Failed to create backend client")?;
    let seed = cli.seed.or(cfg.reconcile.shuffle_seed);
    let mut shuffler = seed.map(SeededShuffler::new).unwrap_or_else(SeededShuffler::from_entropy);

    let command = cli.command.unwrap_or_default();
    tracing::info!(
        backend = %cfg.backend.kind,
        command = ?command,
        seed = shuffler.seed(),
        dry_run = cli.dry_run,
        "Starting run"
    );

    let now = chrono::Utc::now();
    match command {
        Command::Reconcile => {
            let job = ReconcileJob::from_config(&cfg).context("Invalid config")?;
            run_reconcile(backend.as_ref(), &job, &mut shuffler, now, cli.dry_run)
                .await
                .context("Reconcile run failed")?;
        }
        Command::Search => {
            let job = SearchJob::from_config(&cfg).context("Invalid config")?;
            run_search(backend.as_ref(), &job, &mut shuffler, now, cli.dry_run)
                .await
                .context("Search run failed")?;
        }
        Command::Retag => {
            let job = RetagJob::from_config(&cfg);
            run_retag(backend.as_ref(), &job, &mut shuffler, cli.dry_run)
                .await
                .context("Retag run failed")?;
        }
    }

    Ok(())
}
