//! 播放列表生成（扩展 M3U）。
//!
//! 输出顺序始终跟随目录顺序，与解析完成顺序无关。空结果不生成文件，
//! 已有的本地/远端播放列表保持不变。

pub mod m3u;

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use time::OffsetDateTime;

use crate::catalog::CatalogEntry;
use crate::resolver::ResolvedChannel;

pub const HEADER: &str = "#EXTM3U";

#[derive(Debug, Error)]
#[error("failed to write playlist {path}: {source}")]
pub struct WriteError {
    pub path: PathBuf,
    pub source: io::Error,
}

#[derive(Debug, Clone)]
pub struct PlaylistArtifact {
    channels: Vec<ResolvedChannel>,
    generated_at: OffsetDateTime,
}

impl PlaylistArtifact {
    /// 按目录顺序重排解析结果；没有任何频道时返回 `None`。
    pub fn build(catalog: &[CatalogEntry], resolved: &[ResolvedChannel]) -> Option<Self> {
        let urls: HashMap<&str, &str> = resolved
            .iter()
            .map(|c| (c.entry.id.as_str(), c.stream_url.as_str()))
            .collect();

        let channels: Vec<ResolvedChannel> = catalog
            .iter()
            .filter_map(|entry| {
                urls.get(entry.id.as_str()).map(|url| ResolvedChannel {
                    entry: entry.clone(),
                    stream_url: (*url).to_string(),
                })
            })
            .collect();

        if channels.is_empty() {
            return None;
        }
        Some(Self {
            channels,
            generated_at: OffsetDateTime::now_utc(),
        })
    }

    pub fn channels(&self) -> &[ResolvedChannel] {
        &self.channels
    }

    pub fn generated_at(&self) -> OffsetDateTime {
        self.generated_at
    }

    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.channels.len() * 2 + 1);
        lines.push(HEADER.to_string());
        for ch in &self.channels {
            let name = safe_name(&ch.entry.name);
            lines.push(format!(
                "#EXTINF:-1 tvg-name=\"{name}\" tvg-logo=\"{}\" group-title=\"{}\",{name}",
                ch.entry.logo_url, ch.entry.category
            ));
            lines.push(ch.stream_url.clone());
        }
        lines.join("\n")
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.render().into_bytes()
    }
}

/// 名称里的双引号替换成单引号，不做反斜杠转义。
pub fn safe_name(name: &str) -> String {
    name.replace('"', "'")
}

/// 先写临时文件再替换，避免播放器读到半个文件。
pub fn write_artifact(path: &Path, bytes: &[u8]) -> Result<(), WriteError> {
    let wrap = |source| WriteError {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(wrap)?;
    }
    let tmp = path.with_extension(format!(
        "{}part",
        path.extension().and_then(|s| s.to_str()).unwrap_or("")
    ));
    std::fs::write(&tmp, bytes).map_err(wrap)?;
    std::fs::rename(&tmp, path).map_err(wrap)?;
    Ok(())
}
