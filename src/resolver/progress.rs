//! 解析进度上报与 CLI 进度条。

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveSnapshot {
    pub done: usize,
    pub resolved: usize,
    pub total: usize,
}

pub type ProgressCallback = Box<dyn FnMut(ResolveSnapshot) + Send>;

pub struct ResolveProgress {
    snapshot: ResolveSnapshot,
    cb: Option<ProgressCallback>,
    bar: Option<ProgressBar>,
}

impl ResolveProgress {
    /// 静默上报（只走回调，可为空）。
    pub fn quiet(cb: Option<ProgressCallback>) -> Self {
        Self {
            snapshot: ResolveSnapshot::default(),
            cb,
            bar: None,
        }
    }

    /// 在 stderr 上显示进度条。
    pub fn with_cli_bar() -> Self {
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr());
        let style = ProgressStyle::with_template(
            "{prefix} [{elapsed_precise}] {wide_bar} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        bar.set_style(style);
        bar.set_prefix("频道解析");
        Self {
            snapshot: ResolveSnapshot::default(),
            cb: None,
            bar: Some(bar),
        }
    }

    pub fn snapshot(&self) -> ResolveSnapshot {
        self.snapshot
    }

    pub(crate) fn start(&mut self, total: usize) {
        self.snapshot = ResolveSnapshot {
            done: 0,
            resolved: 0,
            total,
        };
        if let Some(bar) = &self.bar {
            bar.set_length(total as u64);
            bar.set_position(0);
        }
        self.emit();
    }

    pub(crate) fn inc(&mut self, ok: bool) {
        self.snapshot.done = (self.snapshot.done + 1).min(self.snapshot.total);
        if ok {
            self.snapshot.resolved += 1;
        }
        if let Some(bar) = &self.bar {
            bar.set_position(self.snapshot.done as u64);
            bar.set_message(format!("ok {}", self.snapshot.resolved));
        }
        self.emit();
    }

    pub(crate) fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }

    fn emit(&mut self) {
        if let Some(cb) = self.cb.as_mut() {
            cb(self.snapshot);
        }
    }
}
