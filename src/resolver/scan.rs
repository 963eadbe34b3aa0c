//! 播放页扫描：从 HTML 中找出 `.m3u8` 地址。

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// 按优先级排列：iframe → source → 正文里任意 m3u8 链接。
static PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        Regex::new(r#"(?i)<iframe[^>]+src=["']([^"']*\.m3u8[^"']*)["']"#).expect("static regex"),
        Regex::new(r#"(?i)<source[^>]+src=["']([^"']*\.m3u8[^"']*)["']"#).expect("static regex"),
        Regex::new(r#"(?i)(https?://[^\s'"]*\.m3u8[^\s'"]*)"#).expect("static regex"),
    ]
});

/// 扫描播放页正文，候选地址相对于最终（重定向后的）URL 解析。
///
/// 都没有命中时，如果最终 URL 本身就是 m3u8 则直接使用。
pub fn scan_stream_url(body: &str, final_url: &Url) -> Option<String> {
    for re in PATTERNS.iter() {
        if let Some(m) = re.captures(body).and_then(|cap| cap.get(1)) {
            // 第一个命中的规则决定结果，拼接失败不会再尝试后面的规则
            return final_url
                .join(m.as_str().trim())
                .ok()
                .map(|u| u.to_string());
        }
    }
    if final_url.as_str().contains(".m3u8") {
        return Some(final_url.to_string());
    }
    None
}
