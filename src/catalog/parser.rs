//! 目录页解析。
//!
//! 解析规则只依赖“字节 → 有序 `CatalogEntry` 列表”这一约定，换站点时替换实现即可。

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::CatalogEntry;

pub const DEFAULT_CATEGORY: &str = "Uncategorized";

static STREAM_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"stream=(\d+)").expect("static regex"));

pub trait CatalogParser: Send + Sync {
    /// 按页面顺序返回条目；缺 id 或缺台标的条目直接丢弃。
    fn parse(&self, html: &str, base: &Url) -> Vec<CatalogEntry>;
}

/// 频道列表 `ul#vidlink li` 的 DOM 解析器。
#[derive(Debug, Clone)]
pub struct HtmlCatalogParser {
    item_selector: Selector,
    anchor_selector: Selector,
    image_selector: Selector,
}

impl HtmlCatalogParser {
    pub fn new() -> Self {
        Self::with_item_selector("ul#vidlink li")
    }

    /// 自定义列表项选择器；选择器无效时退回默认值。
    pub fn with_item_selector(selector: &str) -> Self {
        let item_selector = Selector::parse(selector)
            .or_else(|_| Selector::parse("ul#vidlink li"))
            .expect("default selector is valid");
        Self {
            item_selector,
            anchor_selector: Selector::parse("a[onclick]").expect("static selector"),
            image_selector: Selector::parse("img").expect("static selector"),
        }
    }

    fn parse_item(&self, item: ElementRef<'_>, base: &Url) -> Option<CatalogEntry> {
        let anchor = item.select(&self.anchor_selector).next()?;
        let img = anchor.select(&self.image_selector).next()?;

        let id = extract_stream_id(anchor.value().attr("onclick")?)?;

        let src = img.value().attr("src").map(str::trim).unwrap_or_default();
        if src.is_empty() {
            return None;
        }
        let logo_url = base.join(src).ok()?;

        let name = img
            .value()
            .attr("alt")
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        // 按 class 属性原始顺序取第一个非 All 的分类
        let category = item
            .value()
            .attr("class")
            .unwrap_or_default()
            .split_whitespace()
            .find(|c| *c != "All")
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string();

        Some(CatalogEntry {
            id,
            name,
            logo_url: logo_url.to_string(),
            category,
        })
    }
}

impl Default for HtmlCatalogParser {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogParser for HtmlCatalogParser {
    fn parse(&self, html: &str, base: &Url) -> Vec<CatalogEntry> {
        let document = Html::parse_document(html);
        document
            .select(&self.item_selector)
            .filter_map(|item| self.parse_item(item, base))
            .collect()
    }
}

/// 从 `onclick` 里取出 `stream=<digits>` 的数字部分。
pub fn extract_stream_id(onclick: &str) -> Option<String> {
    STREAM_ID_RE
        .captures(onclick)
        .and_then(|cap| cap.get(1))
        .map(|m| m.as_str().to_string())
}
