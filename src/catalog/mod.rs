//! 频道目录抓取。
//!
//! 子模块：
//! - `parser` — 目录页解析（可替换的 `CatalogParser`）

pub mod parser;

use std::sync::Arc;

use reqwest::blocking::Client;
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::base_system::context::RunConfig;
use crate::network::{self, HttpError};
use parser::{CatalogParser, HtmlCatalogParser};

/// 目录中的一个频道条目。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub id: String,
    pub name: String,
    pub logo_url: String,
    pub category: String,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid catalog url {url}: {source}")]
    InvalidUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("catalog request failed: {0}")]
    Http(#[from] HttpError),
}

pub struct CatalogFetcher {
    client: Client,
    base: Url,
    parser: Arc<dyn CatalogParser>,
}

impl CatalogFetcher {
    pub fn new(cfg: &RunConfig) -> Result<Self, FetchError> {
        Self::with_parser(cfg, Arc::new(HtmlCatalogParser::new()))
    }

    pub fn with_parser(cfg: &RunConfig, parser: Arc<dyn CatalogParser>) -> Result<Self, FetchError> {
        let base = Url::parse(&cfg.base_url).map_err(|source| FetchError::InvalidUrl {
            url: cfg.base_url.clone(),
            source,
        })?;
        let client =
            network::build_scrape_client(&cfg.user_agent, &cfg.base_url, cfg.catalog_timeout)?;
        Ok(Self {
            client,
            base,
            parser,
        })
    }

    /// 抓取一次目录页并解析。任何网络/状态码错误都直接返回，由调用方中止本次运行。
    pub fn fetch(&self) -> Result<Vec<CatalogEntry>, FetchError> {
        debug!("开始抓取目录，URL: {}", self.base);
        let page = network::fetch_page(&self.client, self.base.as_str())?;
        let entries = self.parser.parse(&page.body, &self.base);
        info!("目录解析完成：{} 个频道", entries.len());
        Ok(entries)
    }
}
