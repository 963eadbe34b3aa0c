//! 频道目录抓取 → M3U 生成 → GitHub 发布，按固定间隔自动刷新。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/宿主能力等基础设施
//! - `catalog`：拉取并解析频道目录页
//! - `resolver`：并发解析每个频道的播放地址
//! - `playlist`：生成/写入/读取 M3U
//! - `publish`：通过 GitHub contents API 发布
//! - `pipeline`：一次完整刷新的编排
//! - `scheduler`：定时 + 手动触发（single-flight）
//! - `ui`：控制台命令循环

use anyhow::{Result, anyhow, bail};
use clap::Parser;
use std::path::Path;

mod base_system;
mod catalog;
mod network;
mod pipeline;
mod playlist;
mod publish;
mod resolver;
mod scheduler;
mod ui;

use base_system::config::{config_path, load_or_create};
use base_system::context::{Config, PublishTarget};
use base_system::host::host_for;
use base_system::logging::{LogOptions, LogSystem};
use pipeline::{RunStatus, run_once};
use publish::github::{GithubContentsStore, TokenCheck};
use resolver::progress::ResolveProgress;
use tracing::{error, info, warn};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "isp-tv-publisher")]
#[command(about = "ISP TV channel list scraper and M3U publisher")]
struct Cli {
    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 只刷新一次然后退出（不进入定时模式）
    #[arg(long, default_value_t = false)]
    once: bool,

    /// 显示版本信息后退出
    #[arg(long, default_value_t = false)]
    version: bool,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件，方便 Docker 挂载）
    #[arg(long)]
    data_dir: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("ISP TV Publisher v{}", VERSION);
        return Ok(());
    }

    let data_dir = cli.data_dir.as_deref().map(Path::new);
    let _log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "当前版本: v{}", VERSION);

    let path = config_path::<Config>(data_dir);
    let mut config = load_or_create::<Config>(&path).map_err(|e| anyhow!(e.to_string()))?;
    let run_cfg = match config.to_run_config() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("配置无效，请修改 {} 后重试\n{}", path.display(), err);
            bail!("invalid configuration");
        }
    };

    check_token(&run_cfg.publish);

    if cli.once {
        let mut progress = ResolveProgress::with_cli_bar();
        let report = run_once(&run_cfg, host_for(run_cfg.open_after_run), &mut progress);
        println!("{}", report);
        if report.status == RunStatus::Aborted {
            bail!("refresh aborted");
        }
        return Ok(());
    }

    ui::noui::run(&mut config, &path, run_cfg)
}

/// 启动时检查 token；只提示，不阻止运行。
fn check_token(target: &PublishTarget) {
    let store = match GithubContentsStore::new(target) {
        Ok(store) => store,
        Err(err) => {
            warn!(target: "startup", "无法初始化 GitHub 客户端: {}", err);
            return;
        }
    };
    match store.verify_token() {
        Ok(TokenCheck::RepoScope) => info!(target: "startup", "GitHub token 校验通过"),
        Ok(TokenCheck::Unscoped) => {
            info!(target: "startup", "GitHub token 可用（无法确认权限范围）")
        }
        Err(err) => warn!(target: "startup", "GitHub token 校验失败，发布可能失败: {}", err),
    }
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        ..LogOptions::default()
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}
