//! 读取扩展 M3U（用于校验已生成/已发布的播放列表）。

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

/// EXTINF 属性：`tvg-name="..."` 等
static ATTR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([\w-]+)="([^"]*)""#).expect("static regex"));

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistEntry {
    pub name: String,
    pub logo: String,
    pub category: String,
    pub url: String,
}

/// 解析 `#EXTINF` + URL 行对；没有 EXTINF 的 URL 行会被忽略。
pub fn parse_playlist(text: &str) -> Vec<PlaylistEntry> {
    let mut out = Vec::new();
    let mut pending: Option<(HashMap<String, String>, String)> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("#EXTINF:") {
            pending = Some(parse_extinf(rest));
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if let Some((attrs, title)) = pending.take() {
            let attr = |k: &str| attrs.get(k).cloned().unwrap_or_default();
            let name = attrs
                .get("tvg-name")
                .cloned()
                .unwrap_or_else(|| title.clone());
            out.push(PlaylistEntry {
                name,
                logo: attr("tvg-logo"),
                category: attr("group-title"),
                url: line.to_string(),
            });
        }
    }
    out
}

fn parse_extinf(rest: &str) -> (HashMap<String, String>, String) {
    // 标题在属性区之后的第一个逗号后面（属性值里不会出现引号，逗号可能出现）
    let mut in_quotes = false;
    let mut split = None;
    for (i, ch) in rest.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                split = Some(i);
                break;
            }
            _ => {}
        }
    }
    let (head, title) = match split {
        Some(i) => (&rest[..i], rest[i + 1..].trim().to_string()),
        None => (rest, String::new()),
    };
    let attrs = ATTR_RE
        .captures_iter(head)
        .map(|cap| (cap[1].to_string(), cap[2].to_string()))
        .collect();
    (attrs, title)
}
