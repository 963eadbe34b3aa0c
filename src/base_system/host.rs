//! 宿主能力接口：联网检查、防休眠、外部播放器打开。
//!
//! 流水线只在各阶段外围调用这些能力，不关心具体平台。

use std::path::Path;
use std::process::Command;

use tracing::debug;

pub trait HostCapabilities: Send + Sync {
    fn is_online(&self) -> bool {
        true
    }

    fn inhibit_sleep(&self) {}

    fn allow_sleep(&self) {}

    fn open_artifact(&self, path: &Path) -> std::io::Result<()>;
}

/// 运行期间持有防休眠锁，drop 时释放。
pub struct SleepGuard<'a> {
    host: &'a dyn HostCapabilities,
}

impl<'a> SleepGuard<'a> {
    pub fn acquire(host: &'a dyn HostCapabilities) -> Self {
        host.inhibit_sleep();
        Self { host }
    }
}

impl Drop for SleepGuard<'_> {
    fn drop(&mut self) {
        self.host.allow_sleep();
    }
}

/// 无界面环境：始终在线，不做任何设备操作。
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHost;

impl HostCapabilities for NoopHost {
    fn open_artifact(&self, path: &Path) -> std::io::Result<()> {
        debug!("NoopHost 忽略打开请求: {}", path.display());
        Ok(())
    }
}

/// 只有需要在运行后打开播放列表时才用桌面宿主。
pub fn host_for(open_after_run: bool) -> &'static dyn HostCapabilities {
    if open_after_run {
        &DesktopHost
    } else {
        &NoopHost
    }
}

/// 桌面环境：用系统默认程序打开 M3U。
#[derive(Debug, Default, Clone, Copy)]
pub struct DesktopHost;

impl HostCapabilities for DesktopHost {
    fn open_artifact(&self, path: &Path) -> std::io::Result<()> {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("No M3U at {}, scrape first", path.display()),
            ));
        }
        if cfg!(target_os = "windows") {
            Command::new("explorer").arg(path).spawn()?;
            return Ok(());
        }
        if cfg!(target_os = "macos") {
            Command::new("open").arg(path).spawn()?;
            return Ok(());
        }
        Command::new("xdg-open").arg(path).spawn()?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// 记录调用次数的测试宿主。
    #[derive(Default)]
    pub(crate) struct RecordingHost {
        pub(crate) offline: AtomicBool,
        pub(crate) inhibited: AtomicUsize,
        pub(crate) released: AtomicUsize,
        pub(crate) opened: AtomicUsize,
    }

    impl HostCapabilities for RecordingHost {
        fn is_online(&self) -> bool {
            !self.offline.load(Ordering::SeqCst)
        }

        fn inhibit_sleep(&self) {
            self.inhibited.fetch_add(1, Ordering::SeqCst);
        }

        fn allow_sleep(&self) {
            self.released.fetch_add(1, Ordering::SeqCst);
        }

        fn open_artifact(&self, _path: &Path) -> std::io::Result<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_sleep_guard_releases_on_drop() {
        let host = RecordingHost::default();
        {
            let _guard = SleepGuard::acquire(&host);
            assert_eq!(host.inhibited.load(Ordering::SeqCst), 1);
            assert_eq!(host.released.load(Ordering::SeqCst), 0);
        }
        assert_eq!(host.released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_noop_host_ignores_open() {
        let host = host_for(false);
        assert!(host.is_online());
        assert!(host.open_artifact(Path::new("/definitely/not/here.m3u")).is_ok());
        assert!(host_for(true).open_artifact(Path::new("/definitely/not/here.m3u")).is_err());
    }

    #[test]
    fn test_desktop_host_requires_existing_file() {
        let err = DesktopHost
            .open_artifact(Path::new("/definitely/not/here.m3u"))
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
