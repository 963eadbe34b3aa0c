//! 无界面控制台：后台定时刷新 + 标准输入单字母命令。

use std::fs;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::base_system::config::write_with_comments;
use crate::base_system::context::{Config, RunConfig};
use crate::base_system::host::{DesktopHost, HostCapabilities, host_for};
use crate::pipeline::run_once;
use crate::playlist::m3u::parse_playlist;
use crate::resolver::progress::{ResolveProgress, ResolveSnapshot};
use crate::scheduler::{Job, RefreshScheduler, SchedulerEvent, SchedulerState};

const HELP: &str = "命令：r 立即刷新 | p 暂停自动刷新 | c 恢复自动刷新 | s 状态 | o 打开播放列表 | q 退出";

pub fn run(config: &mut Config, config_path: &Path, run_cfg: RunConfig) -> Result<()> {
    let output_path = run_cfg.output_path.clone();
    let interval = run_cfg.interval;

    let mut scheduler = RefreshScheduler::new(interval, refresh_job(run_cfg)).on_event(report_event);
    scheduler.start(config.auto_paused);

    println!(
        "频道列表自动发布已启动，刷新间隔 {}{}。\n{}\n",
        format_duration(interval),
        if config.auto_paused { "（已暂停）" } else { "" },
        HELP
    );

    loop {
        let Some(input) = read_line("> ")? else {
            // 没有可交互的终端（例如以服务方式运行），只保留定时刷新
            info!("标准输入已关闭，进入无交互模式（Ctrl+C 退出）");
            loop {
                thread::park();
            }
        };
        let text = input.trim();
        if text.is_empty() {
            continue;
        }
        match text.to_ascii_lowercase().as_str() {
            "q" => break,
            "r" => {
                if !scheduler.trigger() {
                    println!("刷新正在进行，已忽略本次触发。");
                }
            }
            "p" => {
                scheduler.pause();
                persist_paused(config, config_path, true);
                println!("自动刷新已暂停。");
            }
            "c" => {
                scheduler.resume();
                persist_paused(config, config_path, false);
                println!("自动刷新已恢复，下次刷新在 {} 后。", format_duration(interval));
            }
            "s" => print_status(&scheduler, &output_path),
            "o" => {
                if let Err(err) = DesktopHost.open_artifact(&output_path) {
                    println!("{}", err);
                }
            }
            _ => println!("{}", HELP),
        }
    }

    scheduler.shutdown();
    println!("已退出。");
    Ok(())
}

fn refresh_job(run_cfg: RunConfig) -> Job {
    let cfg = Arc::new(run_cfg);
    Arc::new(move || {
        let mut progress = ResolveProgress::quiet(Some(Box::new(log_progress)));
        run_once(&cfg, host_for(cfg.open_after_run), &mut progress)
    })
}

fn log_progress(s: ResolveSnapshot) {
    if s.done == s.total || s.done % 25 == 0 {
        debug!("解析进度 {}/{}（成功 {}）", s.done, s.total, s.resolved);
    }
}

fn report_event(event: SchedulerEvent) {
    match event {
        SchedulerEvent::RunStarted { manual } => {
            info!("开始刷新（{}）", if manual { "手动" } else { "定时" });
        }
        SchedulerEvent::RunFinished(report) => println!("{}", report),
        SchedulerEvent::Tick { .. }
        | SchedulerEvent::TriggerRejected { .. }
        | SchedulerEvent::Paused
        | SchedulerEvent::Resumed => {}
    }
}

fn persist_paused(config: &mut Config, path: &Path, paused: bool) {
    if config.auto_paused == paused {
        return;
    }
    config.auto_paused = paused;
    if let Err(err) = write_with_comments(config, path) {
        warn!("保存暂停状态失败: {}", err);
    }
}

fn print_status(scheduler: &RefreshScheduler, output_path: &Path) {
    let state = match scheduler.state() {
        SchedulerState::Idle => "未启动".to_string(),
        SchedulerState::Running => "正在刷新".to_string(),
        SchedulerState::Paused => "已暂停".to_string(),
        SchedulerState::Scheduled => match scheduler.remaining() {
            Some(left) => format!("下次刷新 {}", format_duration(left)),
            None => "等待中".to_string(),
        },
    };
    let stats = scheduler.stats();
    println!(
        "状态: {} | 已完成 {}/{} 次 | 拒绝 {} 次",
        state, stats.completed, stats.accepted, stats.rejected
    );
    match fs::read_to_string(output_path) {
        Ok(text) => println!(
            "本地播放列表: {}（{} 个频道）",
            output_path.display(),
            parse_playlist(&text).len()
        ),
        Err(_) => println!("本地播放列表: 尚未生成"),
    }
}

/// `HH:MM:SS`
fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{:02}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

/// 读取一行；标准输入已关闭时返回 `None`。
fn read_line(prompt: &str) -> Result<Option<String>> {
    print!("{}", prompt);
    io::stdout().flush().ok();
    let mut line = String::new();
    let n = io::stdin().lock().read_line(&mut line)?;
    Ok((n > 0).then_some(line))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base_system::config::load_or_create;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(2 * 3600)), "02:00:00");
        assert_eq!(format_duration(Duration::from_secs(3661)), "01:01:01");
        assert_eq!(format_duration(Duration::from_millis(999)), "00:00:00");
    }

    #[test]
    fn test_pause_state_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yml");
        let mut config: Config = load_or_create(&path).unwrap();
        assert!(!config.auto_paused);

        persist_paused(&mut config, &path, true);
        let reloaded: Config = load_or_create(&path).unwrap();
        assert!(reloaded.auto_paused);

        persist_paused(&mut config, &path, false);
        let reloaded: Config = load_or_create(&path).unwrap();
        assert!(!reloaded.auto_paused);
    }
}
