//! 一次完整刷新：目录 → 解析 → 生成 M3U → 发布。
//!
//! 每次运行只产生一个终态 `RunReport`，不会向调用方抛出错误。

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use time::macros::format_description;
use tracing::{error, info, warn};

use crate::base_system::context::RunConfig;
use crate::base_system::host::{HostCapabilities, SleepGuard};
use crate::catalog::{CatalogEntry, CatalogFetcher, FetchError};
use crate::playlist::{self, PlaylistArtifact};
use crate::publish::github::GithubContentsStore;
use crate::publish::{DocumentStore, RemotePublisher};
use crate::resolver::progress::ResolveProgress;
use crate::resolver::{HttpResolveSource, StreamResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// 目录抓取失败、离线或本地写入失败
    Aborted,
    /// 没有任何频道解析成功，未生成也未发布
    NothingResolved,
    /// 已生成本地文件，发布失败
    ResolvedOnly,
    /// 已发布，但有频道解析失败
    PartiallyPublished,
    Succeeded,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub status: RunStatus,
    pub total: usize,
    pub resolved: usize,
    pub published: bool,
    pub artifact_path: Option<PathBuf>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl RunReport {
    fn aborted(error: String, started: Instant) -> Self {
        Self {
            status: RunStatus::Aborted,
            total: 0,
            resolved: 0,
            published: false,
            artifact_path: None,
            error: Some(error),
            elapsed: started.elapsed(),
        }
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            RunStatus::Aborted => write!(
                f,
                "Error: {}",
                self.error.as_deref().unwrap_or("run aborted")
            ),
            RunStatus::NothingResolved => {
                write!(f, "Done! 0/{} | nothing resolved, kept previous", self.total)
            }
            _ => write!(
                f,
                "Done! {}/{} | GitHub: {}",
                self.resolved,
                self.total,
                if self.published { "OK" } else { "Failed" }
            ),
        }
    }
}

pub trait CatalogSource: Send + Sync {
    fn fetch(&self) -> Result<Vec<CatalogEntry>, FetchError>;
}

impl CatalogSource for CatalogFetcher {
    fn fetch(&self) -> Result<Vec<CatalogEntry>, FetchError> {
        CatalogFetcher::fetch(self)
    }
}

pub trait Publish: Send + Sync {
    fn publish(&self, content: &[u8]) -> bool;
}

impl<S: DocumentStore> Publish for RemotePublisher<S> {
    fn publish(&self, content: &[u8]) -> bool {
        RemotePublisher::publish(self, content)
    }
}

pub struct Pipeline {
    catalog: Box<dyn CatalogSource>,
    resolver: StreamResolver,
    publisher: Box<dyn Publish>,
    output_path: PathBuf,
    open_after_run: bool,
}

impl Pipeline {
    pub fn new(
        catalog: Box<dyn CatalogSource>,
        resolver: StreamResolver,
        publisher: Box<dyn Publish>,
        output_path: PathBuf,
    ) -> Self {
        Self {
            catalog,
            resolver,
            publisher,
            output_path,
            open_after_run: false,
        }
    }

    /// 按配置组装生产环境的各阶段。
    pub fn from_config(cfg: &RunConfig) -> Result<Self> {
        let catalog = CatalogFetcher::new(cfg).context("init catalog fetcher")?;
        let source = HttpResolveSource::new(cfg).context("init resolver client")?;
        let store = GithubContentsStore::new(&cfg.publish).context("init github client")?;
        let publisher = RemotePublisher::new(store, &cfg.publish.path, &cfg.publish.branch);

        let mut pipeline = Self::new(
            Box::new(catalog),
            StreamResolver::new(Arc::new(source), cfg.workers),
            Box::new(publisher),
            cfg.output_path.clone(),
        );
        pipeline.open_after_run = cfg.open_after_run;
        Ok(pipeline)
    }

    pub fn run(&self, host: &dyn HostCapabilities, progress: &mut ResolveProgress) -> RunReport {
        let started = Instant::now();
        if !host.is_online() {
            warn!("当前离线，跳过本次刷新");
            return RunReport::aborted("No Internet".to_string(), started);
        }
        let _awake = SleepGuard::acquire(host);

        let entries = match self.catalog.fetch() {
            Ok(v) => v,
            Err(err) => {
                error!("目录抓取失败，本次刷新中止: {}", err);
                return RunReport::aborted(err.to_string(), started);
            }
        };

        let outcome = self.resolver.resolve(&entries, progress);
        let total = outcome.total;

        let Some(artifact) = PlaylistArtifact::build(&entries, &outcome.channels) else {
            warn!("没有可用频道（0/{}），保留上一次的播放列表", total);
            return RunReport {
                status: RunStatus::NothingResolved,
                total,
                resolved: 0,
                published: false,
                artifact_path: None,
                error: None,
                elapsed: started.elapsed(),
            };
        };
        let resolved = artifact.channels().len();
        let bytes = artifact.to_bytes();

        if let Err(err) = playlist::write_artifact(&self.output_path, &bytes) {
            error!("{}", err);
            let mut report = RunReport::aborted(err.to_string(), started);
            report.total = total;
            report.resolved = resolved;
            return report;
        }
        info!(
            "已写入 {}（{} 个频道，生成于 {}）",
            self.output_path.display(),
            resolved,
            artifact
                .generated_at()
                .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
                .unwrap_or_default()
        );

        let published = self.publisher.publish(&bytes);
        let status = match (published, resolved == total) {
            (false, _) => RunStatus::ResolvedOnly,
            (true, false) => RunStatus::PartiallyPublished,
            (true, true) => RunStatus::Succeeded,
        };

        if self.open_after_run
            && let Err(err) = host.open_artifact(&self.output_path)
        {
            warn!("打开播放列表失败: {}", err);
        }

        RunReport {
            status,
            total,
            resolved,
            published,
            artifact_path: Some(self.output_path.clone()),
            error: None,
            elapsed: started.elapsed(),
        }
    }
}

/// 以给定配置快照执行一次刷新；组装失败也折叠为 `Aborted`。
pub fn run_once(
    cfg: &RunConfig,
    host: &dyn HostCapabilities,
    progress: &mut ResolveProgress,
) -> RunReport {
    let started = Instant::now();
    let report = match Pipeline::from_config(cfg) {
        Ok(pipeline) => pipeline.run(host, progress),
        Err(err) => {
            error!("初始化刷新流程失败: {:#}", err);
            RunReport::aborted(format!("{err:#}"), started)
        }
    };
    info!("刷新结束: {} ({:.1}s)", report, report.elapsed.as_secs_f64());
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::host::tests::RecordingHost;
    use crate::network::HttpError;
    use crate::resolver::tests::{FakeSource, entry};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCatalog {
        entries: Option<Vec<CatalogEntry>>,
        calls: Arc<AtomicUsize>,
    }

    impl CatalogSource for FixedCatalog {
        fn fetch(&self) -> Result<Vec<CatalogEntry>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entries.clone().ok_or(FetchError::Http(HttpError::Status {
                status: 503,
                url: "http://tv.example/".to_string(),
            }))
        }
    }

    struct FakePublish {
        ok: bool,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl Publish for FakePublish {
        fn publish(&self, content: &[u8]) -> bool {
            self.sent.lock().unwrap().push(content.to_vec());
            self.ok
        }
    }

    struct Harness {
        pipeline: Pipeline,
        sent: Arc<Mutex<Vec<Vec<u8>>>>,
        fetches: Arc<AtomicUsize>,
        path: PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness(
        entries: Option<Vec<CatalogEntry>>,
        pages: &[(&str, &str)],
        publish_ok: bool,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channels.m3u");
        let sent = Arc::new(Mutex::new(Vec::new()));
        let fetches = Arc::new(AtomicUsize::new(0));
        let pipeline = Pipeline::new(
            Box::new(FixedCatalog {
                entries,
                calls: Arc::clone(&fetches),
            }),
            StreamResolver::new(Arc::new(FakeSource::with_pages(pages)), 5),
            Box::new(FakePublish {
                ok: publish_ok,
                sent: Arc::clone(&sent),
            }),
            path.clone(),
        );
        Harness {
            pipeline,
            sent,
            fetches,
            path,
            _dir: dir,
        }
    }

    fn run(h: &Harness, host: &RecordingHost) -> RunReport {
        h.pipeline.run(host, &mut ResolveProgress::quiet(None))
    }

    #[test]
    fn test_duplicate_ids_scenario() {
        let h = harness(
            Some(vec![entry("1", "One"), entry("2", "Two"), entry("1", "One B")]),
            &[("1", r#"<source src="http://cdn.test/1.m3u8">"#)],
            true,
        );
        let report = run(&h, &RecordingHost::default());

        assert_eq!(report.total, 3);
        assert_eq!(report.resolved, 2);
        assert_eq!(report.status, RunStatus::PartiallyPublished);

        let text = std::fs::read_to_string(&h.path).unwrap();
        let extinf = text.lines().filter(|l| l.starts_with("#EXTINF")).count();
        assert_eq!(extinf, 2);
        assert!(text.lines().nth(1).unwrap().ends_with(",One"));
        assert!(text.lines().nth(3).unwrap().ends_with(",One B"));
        assert_eq!(h.sent.lock().unwrap()[0], text.as_bytes());
    }

    #[test]
    fn test_nothing_resolved_keeps_previous_artifact() {
        let h = harness(Some(vec![entry("1", "One"), entry("2", "Two")]), &[], true);
        std::fs::write(&h.path, "#EXTM3U\nprevious").unwrap();

        let report = run(&h, &RecordingHost::default());

        assert_eq!(report.status, RunStatus::NothingResolved);
        assert_eq!(report.total, 2);
        assert_eq!(report.resolved, 0);
        assert!(h.sent.lock().unwrap().is_empty());
        assert_eq!(std::fs::read_to_string(&h.path).unwrap(), "#EXTM3U\nprevious");
    }

    #[test]
    fn test_fetch_error_aborts() {
        let h = harness(None, &[], true);
        let report = run(&h, &RecordingHost::default());
        assert_eq!(report.status, RunStatus::Aborted);
        assert!(report.error.unwrap().contains("503"));
        assert!(h.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn test_publish_failure_keeps_local_artifact() {
        let h = harness(
            Some(vec![entry("1", "One")]),
            &[("1", "http://cdn.test/1.m3u8")],
            false,
        );
        let report = run(&h, &RecordingHost::default());
        assert_eq!(report.status, RunStatus::ResolvedOnly);
        assert!(!report.published);
        assert!(h.path.exists());
        assert_eq!(report.to_string(), "Done! 1/1 | GitHub: Failed");
    }

    #[test]
    fn test_full_success_and_sleep_guard() {
        let h = harness(
            Some(vec![entry("1", "One")]),
            &[("1", "http://cdn.test/1.m3u8")],
            true,
        );
        let host = RecordingHost::default();
        let report = run(&h, &host);
        assert_eq!(report.status, RunStatus::Succeeded);
        assert_eq!(report.to_string(), "Done! 1/1 | GitHub: OK");
        assert_eq!(host.inhibited.load(Ordering::SeqCst), 1);
        assert_eq!(host.released.load(Ordering::SeqCst), 1);
        assert_eq!(host.opened.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_offline_skips_fetch() {
        let h = harness(Some(vec![entry("1", "One")]), &[], true);
        let host = RecordingHost::default();
        host.offline.store(true, Ordering::SeqCst);
        let report = run(&h, &host);
        assert_eq!(report.status, RunStatus::Aborted);
        assert_eq!(h.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(host.inhibited.load(Ordering::SeqCst), 0);
    }
}
