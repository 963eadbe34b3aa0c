//! 频道流地址解析工作池。
//!
//! 所有唯一 id 一次性投递到队列，最多 N 个线程并发请求播放页；
//! 单个频道失败/超时/panic 只影响它自己，全部 id 得到结果后本阶段结束。
//!
//! 子模块：
//! - `scan`     — 播放页 m3u8 扫描规则
//! - `progress` — 进度上报

pub mod progress;
pub mod scan;

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use crossbeam_channel as channel;
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::base_system::context::{MAX_WORKERS, MIN_WORKERS, RunConfig};
use crate::catalog::CatalogEntry;
use crate::network::{self, HttpError, Page};
use progress::ResolveProgress;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("invalid player url for stream {id}: {source}")]
    InvalidUrl { id: String, source: url::ParseError },
    #[error("player request failed for stream {id}: {source}")]
    Http { id: String, source: HttpError },
    #[error("no m3u8 found for stream {id}")]
    NoStream { id: String },
    #[error("resolver worker panicked on stream {id}: {detail}")]
    Panicked { id: String, detail: String },
    #[error("no resolver worker picked up stream {id}")]
    Abandoned { id: String },
}

/// 解析成功的频道。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedChannel {
    pub entry: CatalogEntry,
    pub stream_url: String,
}

/// 单个 id 的播放页来源。
pub trait ResolveSource: Send + Sync {
    fn fetch_player(&self, id: &str) -> Result<Page, ResolveError>;
}

/// `player.php?stream=<id>`（相对目录地址）。
pub struct HttpResolveSource {
    client: Client,
    base: Url,
}

impl HttpResolveSource {
    pub fn new(cfg: &RunConfig) -> anyhow::Result<Self> {
        let base = Url::parse(&cfg.base_url)?;
        let client =
            network::build_scrape_client(&cfg.user_agent, &cfg.base_url, cfg.resolve_timeout)?;
        Ok(Self { client, base })
    }
}

impl ResolveSource for HttpResolveSource {
    fn fetch_player(&self, id: &str) -> Result<Page, ResolveError> {
        let url = self
            .base
            .join(&format!("player.php?stream={id}"))
            .map_err(|source| ResolveError::InvalidUrl {
                id: id.to_string(),
                source,
            })?;
        network::fetch_page(&self.client, url.as_str()).map_err(|source| ResolveError::Http {
            id: id.to_string(),
            source,
        })
    }
}

/// 一次解析阶段的结果。
#[derive(Debug, Default)]
pub struct ResolveOutcome {
    /// 解析成功的频道（按完成顺序；重复 id 的条目共享同一个地址）。
    pub channels: Vec<ResolvedChannel>,
    pub failures: Vec<ResolveError>,
    /// 参与解析的条目总数（含重复）。
    pub total: usize,
}

impl ResolveOutcome {
    pub fn resolved(&self) -> usize {
        self.channels.len()
    }
}

pub struct StreamResolver {
    source: Arc<dyn ResolveSource>,
    workers: usize,
}

impl StreamResolver {
    pub fn new(source: Arc<dyn ResolveSource>, workers: usize) -> Self {
        Self {
            source,
            workers: workers.clamp(MIN_WORKERS, MAX_WORKERS),
        }
    }

    pub fn resolve(
        &self,
        entries: &[CatalogEntry],
        progress: &mut ResolveProgress,
    ) -> ResolveOutcome {
        // 重复 id 只请求一次
        let mut seen = HashSet::new();
        let unique: Vec<String> = entries
            .iter()
            .filter(|e| seen.insert(e.id.as_str()))
            .map(|e| e.id.clone())
            .collect();

        progress.start(unique.len());
        let results = self.run_pool(&unique, progress);
        progress.finish();

        let mut by_id: HashMap<String, Vec<&CatalogEntry>> = HashMap::new();
        for entry in entries {
            by_id.entry(entry.id.clone()).or_default().push(entry);
        }

        let mut outcome = ResolveOutcome {
            total: entries.len(),
            ..ResolveOutcome::default()
        };
        for (id, result) in results {
            match result {
                Ok(stream_url) => {
                    for entry in by_id.get(&id).into_iter().flatten() {
                        outcome.channels.push(ResolvedChannel {
                            entry: (*entry).clone(),
                            stream_url: stream_url.clone(),
                        });
                    }
                }
                Err(err) => {
                    debug!("频道解析失败: {}", err);
                    outcome.failures.push(err);
                }
            }
        }

        info!(
            "解析完成：{}/{} 个频道（{} 个唯一 id 失败）",
            outcome.resolved(),
            outcome.total,
            outcome.failures.len()
        );
        outcome
    }

    /// 返回每个 id 的终态结果，顺序为完成顺序。
    fn run_pool(
        &self,
        ids: &[String],
        progress: &mut ResolveProgress,
    ) -> Vec<(String, Result<String, ResolveError>)> {
        if ids.is_empty() {
            return Vec::new();
        }

        let (tx, rx) = channel::unbounded::<String>();
        let (tx_res, rx_res) = channel::unbounded::<(String, Result<String, ResolveError>)>();
        for id in ids {
            let _ = tx.send(id.clone());
        }
        drop(tx);

        let worker_count = self.workers.min(ids.len());
        let mut handles = Vec::with_capacity(worker_count);
        for idx in 0..worker_count {
            let rx = rx.clone();
            let tx_res = tx_res.clone();
            let source = Arc::clone(&self.source);
            let spawned = thread::Builder::new()
                .name(format!("resolver-{idx}"))
                .spawn(move || {
                    while let Ok(id) = rx.recv() {
                        let result = resolve_one(source.as_ref(), &id);
                        if tx_res.send((id, result)).is_err() {
                            return;
                        }
                    }
                });
            match spawned {
                Ok(h) => handles.push(h),
                Err(e) => warn!("无法创建解析线程: {}", e),
            }
        }
        drop(tx_res);

        let mut results = Vec::with_capacity(ids.len());
        // 所有 worker 退出后 recv 返回 Err，即使有 id 没有结果也不会卡住
        while results.len() < ids.len() {
            let Ok((id, result)) = rx_res.recv() else {
                break;
            };
            progress.inc(result.is_ok());
            results.push((id, result));
        }

        for h in handles {
            let _ = h.join();
        }
        if results.len() < ids.len() {
            warn!(
                "{} 个频道没有得到解析结果（工作线程不可用）",
                ids.len() - results.len()
            );
            fill_abandoned(ids, &mut results, progress);
        }
        results
    }
}

/// 给没有得到终态结果的 id 补上失败结果，保证每个 id 恰好一个结果。
fn fill_abandoned(
    ids: &[String],
    results: &mut Vec<(String, Result<String, ResolveError>)>,
    progress: &mut ResolveProgress,
) {
    let done: HashSet<String> = results.iter().map(|(id, _)| id.clone()).collect();
    for id in ids.iter().filter(|id| !done.contains(*id)) {
        progress.inc(false);
        results.push((id.clone(), Err(ResolveError::Abandoned { id: id.clone() })));
    }
}

fn resolve_one(source: &dyn ResolveSource, id: &str) -> Result<String, ResolveError> {
    let attempt = panic::catch_unwind(AssertUnwindSafe(|| {
        let page = source.fetch_player(id)?;
        scan::scan_stream_url(&page.body, &page.final_url)
            .ok_or_else(|| ResolveError::NoStream { id: id.to_string() })
    }));
    match attempt {
        Ok(r) => r,
        Err(payload) => Err(ResolveError::Panicked {
            id: id.to_string(),
            detail: panic_payload_to_string(payload),
        }),
    }
}

fn panic_payload_to_string(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        return (*s).to_string();
    }
    if let Some(s) = payload.downcast_ref::<String>() {
        return s.clone();
    }
    "unknown panic payload".to_string()
}
