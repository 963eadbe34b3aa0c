//! 全局配置结构（Config）、默认值，以及每次运行使用的不可变 `RunConfig`。
//!
//! `Config` 对应磁盘上的 `config.yml`，可被 CLI 修改并写回；
//! `RunConfig` 在每次刷新开始前由 `Config::to_run_config` 校验生成，之后只读地传给各阶段。

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::config::{ConfigError, ConfigSpec, FieldMeta};

pub const MIN_WORKERS: usize = 5;
pub const MAX_WORKERS: usize = 30;
pub const MIN_INTERVAL_HOURS: f64 = 0.5;
/// 一年
pub const MAX_INTERVAL_HOURS: f64 = 24.0 * 365.0;

static REPO_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[\w-]+/[\w-]+$").expect("static regex"));

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 抓取配置
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout")]
    pub catalog_timeout: u64,
    #[serde(default = "default_request_timeout")]
    pub resolve_timeout: u64,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    // 定时刷新
    #[serde(default = "default_interval_hours")]
    pub interval_hours: f64,
    #[serde(default = "default_false")]
    pub auto_paused: bool,

    // 输出
    #[serde(default = "default_output_path")]
    pub output_path: String,
    #[serde(default = "default_false")]
    pub open_after_run: bool,

    // GitHub 发布
    #[serde(default = "default_github_api")]
    pub github_api: String,
    #[serde(default)]
    pub github_token: String,
    #[serde(default)]
    pub github_repo: String,
    #[serde(default = "default_github_path")]
    pub github_path: String,
    #[serde(default = "default_github_branch")]
    pub github_branch: String,
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout: u64,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
            catalog_timeout: default_request_timeout(),
            resolve_timeout: default_request_timeout(),
            max_workers: default_max_workers(),
            interval_hours: default_interval_hours(),
            auto_paused: default_false(),
            output_path: default_output_path(),
            open_after_run: default_false(),
            github_api: default_github_api(),
            github_token: String::new(),
            github_repo: String::new(),
            github_path: default_github_path(),
            github_branch: default_github_branch(),
            lookup_timeout: default_lookup_timeout(),
            upload_timeout: default_upload_timeout(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 16] = [
            FieldMeta {
                name: "base_url",
                description: "频道目录页面地址（player.php 也相对该地址解析）",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求使用的 User-Agent",
            },
            FieldMeta {
                name: "catalog_timeout",
                description: "目录页请求超时时间（秒）",
            },
            FieldMeta {
                name: "resolve_timeout",
                description: "单个频道解析请求超时时间（秒）",
            },
            FieldMeta {
                name: "max_workers",
                description: "并发解析线程数（5-30）",
            },
            FieldMeta {
                name: "interval_hours",
                description: "自动刷新间隔（小时，最小 0.5）",
            },
            FieldMeta {
                name: "auto_paused",
                description: "是否暂停自动刷新",
            },
            FieldMeta {
                name: "output_path",
                description: "本地 M3U 输出路径",
            },
            FieldMeta {
                name: "open_after_run",
                description: "刷新成功后用默认播放器打开 M3U",
            },
            FieldMeta {
                name: "github_api",
                description: "GitHub API 根地址",
            },
            FieldMeta {
                name: "github_token",
                description: "GitHub Token（需要 repo 权限；留空时读取环境变量 GITHUB_TOKEN）",
            },
            FieldMeta {
                name: "github_repo",
                description: "目标仓库，格式 username/repo",
            },
            FieldMeta {
                name: "github_path",
                description: "仓库内文件路径",
            },
            FieldMeta {
                name: "github_branch",
                description: "目标分支",
            },
            FieldMeta {
                name: "lookup_timeout",
                description: "查询远端文件 sha 的超时时间（秒）",
            },
            FieldMeta {
                name: "upload_timeout",
                description: "上传文件的超时时间（秒）",
            },
        ];
        &FIELDS
    }
}

/// 单次运行使用的只读配置快照。
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub base_url: String,
    pub user_agent: String,
    pub catalog_timeout: Duration,
    pub resolve_timeout: Duration,
    pub workers: usize,
    pub interval: Duration,
    pub output_path: PathBuf,
    pub open_after_run: bool,
    pub publish: PublishTarget,
}

/// 远端发布目标：仓库 + 路径 + 分支 + 凭据。
#[derive(Clone)]
pub struct PublishTarget {
    pub api_root: String,
    pub repo: String,
    pub path: String,
    pub branch: String,
    pub token: String,
    pub lookup_timeout: Duration,
    pub upload_timeout: Duration,
}

impl std::fmt::Debug for PublishTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishTarget")
            .field("api_root", &self.api_root)
            .field("repo", &self.repo)
            .field("path", &self.path)
            .field("branch", &self.branch)
            .field("token", &"***")
            .finish()
    }
}

impl Config {
    /// 校验并生成本次运行的配置。所有 `ConfigError::Validation` 都在这里产生，
    /// 不会进入抓取流程。
    pub fn to_run_config(&self) -> Result<RunConfig, ConfigError> {
        let mut problems = Vec::new();

        if !self.interval_hours.is_finite()
            || self.interval_hours <= 0.0
            || self.interval_hours > MAX_INTERVAL_HOURS
        {
            problems.push(format!(
                "无效的刷新间隔: {}（应在 0 到 {} 小时之间）",
                self.interval_hours, MAX_INTERVAL_HOURS
            ));
        }
        if self.max_workers == 0 {
            problems.push("并发数必须大于 0".to_string());
        }
        if url::Url::parse(self.base_url.trim()).is_err() {
            problems.push(format!("无效的目录地址: {}", self.base_url));
        }

        let token = self.effective_token();
        let repo = self.github_repo.trim();
        let path = self.github_path.trim();
        let branch = self.github_branch.trim();
        if token.is_empty() {
            problems.push("Invalid token".to_string());
        }
        if repo.is_empty() || !REPO_RE.is_match(repo) {
            problems.push("Invalid repo".to_string());
        }
        if path.is_empty() || path.starts_with('/') || path.contains("..") {
            problems.push("Invalid path".to_string());
        }
        if branch.is_empty() {
            problems.push("Branch required".to_string());
        }

        if !problems.is_empty() {
            return Err(ConfigError::Validation(
                problems
                    .iter()
                    .map(|p| format!("• {p}"))
                    .collect::<Vec<_>>()
                    .join("\n"),
            ));
        }

        Ok(RunConfig {
            base_url: normalize_base_url(&self.base_url),
            user_agent: self.user_agent.clone(),
            catalog_timeout: Duration::from_secs(self.catalog_timeout.max(1)),
            resolve_timeout: Duration::from_secs(self.resolve_timeout.max(1)),
            workers: self.max_workers.clamp(MIN_WORKERS, MAX_WORKERS),
            interval: interval_duration(self.interval_hours),
            output_path: PathBuf::from(self.output_path.trim()),
            open_after_run: self.open_after_run,
            publish: PublishTarget {
                api_root: self.github_api.trim().trim_end_matches('/').to_string(),
                repo: repo.to_string(),
                path: path.to_string(),
                branch: branch.to_string(),
                token,
                lookup_timeout: Duration::from_secs(self.lookup_timeout.max(1)),
                upload_timeout: Duration::from_secs(self.upload_timeout.max(1)),
            },
        })
    }

    fn effective_token(&self) -> String {
        let t = self.github_token.trim();
        if !t.is_empty() {
            return t.to_string();
        }
        std::env::var("GITHUB_TOKEN")
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }
}

/// 小时 → Duration，限制在 [0.5 小时, 一年] 内。
pub fn interval_duration(hours: f64) -> Duration {
    let hours = if hours.is_finite() {
        hours.clamp(MIN_INTERVAL_HOURS, MAX_INTERVAL_HOURS)
    } else {
        MIN_INTERVAL_HOURS
    };
    Duration::from_secs_f64(hours * 3600.0)
}

/// 保证目录地址以 `/` 结尾，这样 `player.php` 会拼到同一目录下。
fn normalize_base_url(base: &str) -> String {
    let b = base.trim();
    if b.ends_with('/') {
        b.to_string()
    } else {
        format!("{b}/")
    }
}

fn default_false() -> bool {
    false
}

fn default_base_url() -> String {
    "http://redforce.live/".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0".to_string()
}

fn default_request_timeout() -> u64 {
    20
}

fn default_max_workers() -> usize {
    15
}

fn default_interval_hours() -> f64 {
    2.0
}

fn default_output_path() -> String {
    "channels.m3u".to_string()
}

fn default_github_api() -> String {
    "https://api.github.com".to_string()
}

fn default_github_path() -> String {
    "channels.m3u".to_string()
}

fn default_github_branch() -> String {
    "main".to_string()
}

fn default_lookup_timeout() -> u64 {
    15
}

fn default_upload_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            github_token: "ghp_test".to_string(),
            github_repo: "someone/tv-lists".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_run_config_clamps_workers_and_interval() {
        let mut cfg = valid();
        cfg.max_workers = 100;
        cfg.interval_hours = 0.1;
        let run = cfg.to_run_config().unwrap();
        assert_eq!(run.workers, MAX_WORKERS);
        assert_eq!(run.interval, Duration::from_secs(1800));

        cfg.max_workers = 1;
        let run = cfg.to_run_config().unwrap();
        assert_eq!(run.workers, MIN_WORKERS);
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let mut cfg = valid();
        cfg.base_url = "http://example.test/live".to_string();
        let run = cfg.to_run_config().unwrap();
        assert_eq!(run.base_url, "http://example.test/live/");
    }

    #[test]
    fn test_rejects_bad_publish_target() {
        let mut cfg = valid();
        cfg.github_repo = "not a repo".to_string();
        cfg.github_path = "../escape.m3u".to_string();
        cfg.github_branch = "  ".to_string();
        let err = cfg.to_run_config().unwrap_err().to_string();
        assert!(err.contains("Invalid repo"));
        assert!(err.contains("Invalid path"));
        assert!(err.contains("Branch required"));
    }

    #[test]
    fn test_rejects_absolute_path_and_nan_interval() {
        let mut cfg = valid();
        cfg.github_path = "/channels.m3u".to_string();
        cfg.interval_hours = f64::NAN;
        let err = cfg.to_run_config().unwrap_err().to_string();
        assert!(err.contains("Invalid path"));
        assert!(err.contains("无效的刷新间隔"));
    }

    #[test]
    fn test_huge_interval_is_validation_error() {
        let mut cfg = valid();
        cfg.interval_hours = 1e20;
        let err = cfg.to_run_config().unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
        assert!(err.to_string().contains("无效的刷新间隔"));

        cfg.interval_hours = MAX_INTERVAL_HOURS;
        let run = cfg.to_run_config().unwrap();
        assert_eq!(run.interval, Duration::from_secs(365 * 24 * 3600));
    }

    #[test]
    fn test_interval_duration_never_panics() {
        assert_eq!(interval_duration(1e20), Duration::from_secs(365 * 24 * 3600));
        assert_eq!(interval_duration(f64::INFINITY), Duration::from_secs(1800));
        assert_eq!(interval_duration(-3.0), Duration::from_secs(1800));
    }

    #[test]
    fn test_debug_masks_token() {
        let run = valid().to_run_config().unwrap();
        let dbg = format!("{:?}", run.publish);
        assert!(!dbg.contains("ghp_test"));
        assert!(dbg.contains("***"));
    }
}
