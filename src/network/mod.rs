//! HTTP 客户端构造与页面抓取。

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::Client;
use reqwest::header::{
    ACCEPT, ACCEPT_ENCODING, CONNECTION, HeaderMap, HeaderValue, REFERER, USER_AGENT,
};
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum HttpError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
}

/// 一次 GET 的结果：重定向后的最终地址 + 正文。
#[derive(Debug, Clone)]
pub struct Page {
    pub final_url: Url,
    pub body: String,
}

/// 构造抓取目录/播放页用的阻塞客户端（浏览器 UA + Referer 指向目录页）。
pub fn build_scrape_client(
    user_agent: &str,
    referer: &str,
    timeout: Duration,
) -> Result<Client, HttpError> {
    // reqwest 未启用 gzip 解码，要求 identity 编码
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(user_agent).unwrap_or(HeaderValue::from_static("Mozilla/5.0")),
    );
    if let Ok(v) = HeaderValue::from_str(referer) {
        headers.insert(REFERER, v);
    }

    let client = Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()?;
    Ok(client)
}

pub fn fetch_page(client: &Client, url: &str) -> Result<Page, HttpError> {
    let resp = client.get(url).send()?;
    check_status(resp.status(), resp.url())?;
    let final_url = resp.url().clone();
    let body = resp.text()?;
    Ok(Page { final_url, body })
}

/// 非 2xx 一律视为失败（重定向已由 reqwest 跟随）。
pub fn check_status(status: StatusCode, url: &Url) -> Result<(), HttpError> {
    if status.is_success() {
        return Ok(());
    }
    Err(HttpError::Status {
        status: status.as_u16(),
        url: url.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FetchError;

    fn url() -> Url {
        Url::parse("http://tv.example/").unwrap()
    }

    #[test]
    fn test_success_status_passes() {
        assert!(check_status(StatusCode::OK, &url()).is_ok());
        assert!(check_status(StatusCode::NO_CONTENT, &url()).is_ok());
    }

    #[test]
    fn test_error_status_becomes_fetch_error() {
        let err = check_status(StatusCode::SERVICE_UNAVAILABLE, &url()).unwrap_err();
        assert!(matches!(
            &err,
            HttpError::Status { status: 503, url } if url == "http://tv.example/"
        ));

        let fetch: FetchError = err.into();
        assert!(matches!(
            fetch,
            FetchError::Http(HttpError::Status { status: 503, .. })
        ));
        assert!(fetch.to_string().contains("503"));
    }

    #[test]
    fn test_not_found_is_error() {
        assert!(matches!(
            check_status(StatusCode::NOT_FOUND, &url()),
            Err(HttpError::Status { status: 404, .. })
        ));
    }

    #[test]
    fn test_scrape_client_accepts_odd_user_agent() {
        let client = build_scrape_client("bad\nagent", "not a header\u{7f}", Duration::from_secs(1));
        assert!(client.is_ok());
    }
}
