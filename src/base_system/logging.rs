//! 日志系统：控制台 + 按天滚动的 `logs/publisher.<date>.log`。
//!
//! 程序常驻运行，日志按 UTC 日期切分；启动时把往日的 `.log` 压成 zip，
//! 只保留最近 `keep_days` 份压缩包。

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::{io, panic, thread};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::{self, WorkerGuard};
use tracing_appender::rolling::{self, RollingFileAppender, Rotation};
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const LOG_PREFIX: &str = "publisher";
const LOG_SUFFIX: &str = "log";

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("logging already initialized")]
    AlreadyInitialized,
    #[error("subscriber init failed: {0}")]
    SubscriberInit(#[from] tracing_subscriber::util::TryInitError),
    #[error("log file appender init failed: {0}")]
    Appender(#[from] rolling::InitError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("time formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    /// 保留的日志天数（未压缩的当天文件 + 压缩包）
    pub keep_days: usize,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            debug: false,
            use_color: true,
            keep_days: 14,
        }
    }
}

pub struct LogSystem {
    runtime: Arc<LogRuntime>,
}

impl LogSystem {
    pub fn init_with_base(options: LogOptions, base_dir: Option<&Path>) -> Result<Self, LogError> {
        let logs_dir = base_dir
            .map(|b| b.join("logs"))
            .unwrap_or_else(|| PathBuf::from("logs"));
        fs::create_dir_all(&logs_dir)?;

        let today = log_file_name(OffsetDateTime::now_utc())?;
        let compressed = compress_stale_logs(&logs_dir, &today)?;
        let pruned = prune_archives(&logs_dir, options.keep_days)?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_PREFIX)
            .filename_suffix(LOG_SUFFIX)
            .max_log_files(options.keep_days.max(1))
            .build(&logs_dir)?;
        let (file_writer, guard) = non_blocking::NonBlockingBuilder::default()
            .lossy(false)
            .thread_name("log-writer")
            .finish(file_appender);

        let console_level = if options.debug {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };

        let console_layer = fmt::layer()
            .with_target(false)
            .with_thread_names(true)
            .with_ansi(options.use_color)
            .with_writer(io::stdout)
            .with_filter(console_level);

        // HTTP/TLS 库在 DEBUG 下每个请求都会刷屏，文件里只留警告
        let file_filter = Targets::new()
            .with_default(LevelFilter::DEBUG)
            .with_target("reqwest", LevelFilter::INFO)
            .with_target("hyper", LevelFilter::WARN)
            .with_target("hyper_util", LevelFilter::WARN)
            .with_target("rustls", LevelFilter::WARN)
            .with_target("html5ever", LevelFilter::WARN)
            .with_target("selectors", LevelFilter::WARN);

        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(file_filter);

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("global subscriber") || msg.contains("already") {
                    LogError::AlreadyInitialized
                } else {
                    LogError::SubscriberInit(e)
                }
            })?;

        if compressed + pruned > 0 {
            info!(
                "日志整理：压缩 {} 个往日日志，清理 {} 个过期压缩包",
                compressed, pruned
            );
        }

        let runtime = Arc::new(LogRuntime {
            guard: Mutex::new(Some(guard)),
            exit_called: AtomicBool::new(false),
        });
        runtime.install_signal_handler();
        runtime.install_panic_hook();

        Ok(Self { runtime })
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.runtime.safe_exit();
    }
}

struct LogRuntime {
    guard: Mutex<Option<WorkerGuard>>,
    exit_called: AtomicBool,
}

impl LogRuntime {
    fn install_signal_handler(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        if let Err(err) = ctrlc::set_handler(move || {
            info!("收到中断信号，正在退出");
            runtime.safe_exit();
            std::process::exit(0);
        }) {
            warn!("无法注册 Ctrl+C 处理: {}", err);
        }
    }

    fn install_panic_hook(self: &Arc<Self>) {
        let runtime = Arc::clone(self);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            // 解析线程和刷新线程里的 panic 由各自的 catch_unwind 兜住，这里只记录
            match info.location() {
                Some(loc) => error!("panic at {}:{}: {}", loc.file(), loc.line(), info),
                None => error!("panic: {info}"),
            }
            if thread::current().name() == Some("main") {
                runtime.safe_exit();
            }
            previous(info);
        }));
    }

    /// 冲刷日志缓冲，只执行一次（Ctrl+C / 正常退出 / 主线程 panic）。
    fn safe_exit(&self) {
        if self.exit_called.swap(true, Ordering::SeqCst) {
            return;
        }
        // drop WorkerGuard 会阻塞到缓冲写完
        if let Ok(mut guard) = self.guard.lock() {
            guard.take();
        }
    }
}

/// 滚动日志的文件名，与 `RollingFileAppender` 的命名一致。
fn log_file_name(at: OffsetDateTime) -> Result<String, LogError> {
    let date = at.format(format_description!("[year]-[month]-[day]"))?;
    Ok(format!("{LOG_PREFIX}.{date}.{LOG_SUFFIX}"))
}

/// 把除 `current` 以外的 `publisher.*.log` 压成同名 zip 并删除原文件，返回压缩数量。
fn compress_stale_logs(logs_dir: &Path, current: &str) -> Result<usize, LogError> {
    let mut count = 0;
    for entry in fs::read_dir(logs_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if name == current || !is_log_name(name, LOG_SUFFIX) {
            continue;
        }
        if compress_log(&path)?.is_some() {
            count += 1;
        }
    }
    Ok(count)
}

/// 按文件名（即日期）排序，只保留最新的 `keep` 个压缩包，返回删除数量。
fn prune_archives(logs_dir: &Path, keep: usize) -> Result<usize, LogError> {
    let mut archives: Vec<PathBuf> = fs::read_dir(logs_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| is_log_name(n, "zip"))
        })
        .collect();
    if archives.len() <= keep {
        return Ok(0);
    }
    archives.sort();
    let stale = archives.len() - keep;
    for path in &archives[..stale] {
        fs::remove_file(path)?;
    }
    Ok(stale)
}

fn is_log_name(name: &str, ext: &str) -> bool {
    name.starts_with(&format!("{LOG_PREFIX}.")) && name.ends_with(&format!(".{ext}"))
}

/// `publisher.<date>.log` → `publisher.<date>.zip`；空文件直接删除。
fn compress_log(log: &Path) -> Result<Option<PathBuf>, LogError> {
    if fs::metadata(log)?.len() == 0 {
        fs::remove_file(log)?;
        return Ok(None);
    }
    let archive_path = log.with_extension("zip");
    let entry_name = log
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("publisher.log")
        .to_string();

    let mut zip = zip::ZipWriter::new(File::create(&archive_path)?);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_name, options)?;
    io::copy(&mut File::open(log)?, &mut zip)?;
    zip.finish()?;

    fs::remove_file(log)?;
    Ok(Some(archive_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_log_file_name_matches_daily_appender() {
        assert_eq!(
            log_file_name(datetime!(2026-10-19 23:59 UTC)).unwrap(),
            "publisher.2026-10-19.log"
        );
    }

    #[test]
    fn test_compress_stale_logs_keeps_current_day() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path();
        fs::write(logs.join("publisher.2026-10-17.log"), "INFO 刷新结束\n").unwrap();
        fs::write(logs.join("publisher.2026-10-18.log"), "").unwrap();
        fs::write(logs.join("publisher.2026-10-19.log"), "INFO today\n").unwrap();
        fs::write(logs.join("notes.log"), "unrelated").unwrap();

        let n = compress_stale_logs(logs, "publisher.2026-10-19.log").unwrap();

        assert_eq!(n, 1);
        assert!(logs.join("publisher.2026-10-17.zip").exists());
        assert!(!logs.join("publisher.2026-10-17.log").exists());
        assert!(!logs.join("publisher.2026-10-18.log").exists());
        assert!(!logs.join("publisher.2026-10-18.zip").exists());
        assert!(logs.join("publisher.2026-10-19.log").exists());
        assert!(logs.join("notes.log").exists());

        let file = File::open(logs.join("publisher.2026-10-17.zip")).unwrap();
        let mut zip = zip::ZipArchive::new(file).unwrap();
        let mut content = String::new();
        io::Read::read_to_string(&mut zip.by_index(0).unwrap(), &mut content).unwrap();
        assert!(content.contains("刷新结束"));
    }

    #[test]
    fn test_prune_archives_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path();
        for day in 10..15 {
            fs::write(logs.join(format!("publisher.2026-10-{day}.zip")), "z").unwrap();
        }

        assert_eq!(prune_archives(logs, 2).unwrap(), 3);
        let mut left: Vec<String> = fs::read_dir(logs)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        left.sort();
        assert_eq!(left, vec!["publisher.2026-10-13.zip", "publisher.2026-10-14.zip"]);

        assert_eq!(prune_archives(logs, 5).unwrap(), 0);
    }
}
