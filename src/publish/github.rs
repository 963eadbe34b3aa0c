//! GitHub contents API（`/repos/{repo}/contents/{path}`）。

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, USER_AGENT};
use serde_json::Value;
use tracing::{debug, warn};

use super::{DocumentStore, PublishError, PutBody};
use crate::base_system::context::PublishTarget;

const UA: &str = concat!("isp-tv-publisher/", env!("CARGO_PKG_VERSION"));

/// token 校验结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCheck {
    /// classic token，且带 `repo` 权限
    RepoScope,
    /// 没有 `X-OAuth-Scopes` 头（fine-grained token），无法从响应判断权限
    Unscoped,
}

pub struct GithubContentsStore {
    client: Client,
    api_root: String,
    repo: String,
    token: String,
    lookup_timeout: Duration,
    upload_timeout: Duration,
}

impl GithubContentsStore {
    pub fn new(target: &PublishTarget) -> Result<Self, PublishError> {
        let client = Client::builder().build()?;
        Ok(Self {
            client,
            api_root: target.api_root.clone(),
            repo: target.repo.clone(),
            token: target.token.clone(),
            lookup_timeout: target.lookup_timeout,
            upload_timeout: target.upload_timeout,
        })
    }

    pub fn contents_url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/contents/{}",
            self.api_root,
            self.repo,
            path.trim_start_matches('/')
        )
    }

    fn authorized(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, UA)
    }

    /// 检查 token 是否可用（需要 `repo` 权限）。
    pub fn verify_token(&self) -> Result<TokenCheck, PublishError> {
        let resp = self
            .authorized(self.client.get(format!("{}/user", self.api_root)))
            .timeout(self.lookup_timeout)
            .send()?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(error_for(resp));
        }
        match resp.headers().get("x-oauth-scopes") {
            None => Ok(TokenCheck::Unscoped),
            Some(v) => {
                let scopes = v.to_str().unwrap_or_default();
                if has_repo_scope(scopes) {
                    Ok(TokenCheck::RepoScope)
                } else {
                    warn!("token 缺少 repo 权限，当前权限: {}", scopes);
                    Err(PublishError::Auth(status.as_u16()))
                }
            }
        }
    }
}

impl DocumentStore for GithubContentsStore {
    fn lookup_revision(&self, path: &str, branch: &str) -> Result<Option<String>, PublishError> {
        let url = self.contents_url(path);
        debug!("查询远端文件 sha，URL: {}?ref={}", url, branch);
        let resp = self
            .authorized(self.client.get(&url))
            .query(&[("ref", branch)])
            .timeout(self.lookup_timeout)
            .send()?;

        let status = resp.status().as_u16();
        let body = resp.text()?;
        revision_from_response(status, &body)
    }

    fn put_document(&self, path: &str, body: &PutBody) -> Result<(), PublishError> {
        let resp = self
            .authorized(self.client.put(self.contents_url(path)))
            .json(body)
            .timeout(self.upload_timeout)
            .send()?;
        match resp.status().as_u16() {
            200 | 201 => Ok(()),
            _ => Err(error_for(resp)),
        }
    }
}

/// 查询结果：404 表示文档不存在（新建），2xx 取 sha，其余按状态码分类。
fn revision_from_response(status: u16, body: &str) -> Result<Option<String>, PublishError> {
    if status == 404 {
        return Ok(None);
    }
    if !(200..300).contains(&status) {
        return Err(classify_status(status, body.to_string()));
    }
    let data: Value = serde_json::from_str(body)
        .map_err(|e| PublishError::Malformed(format!("contents response is not json: {e}")))?;
    extract_sha(&data).map(Some)
}

fn extract_sha(data: &Value) -> Result<String, PublishError> {
    match data {
        Value::Object(map) => map
            .get("sha")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| PublishError::Malformed("contents response without sha".to_string())),
        Value::Array(_) => Err(PublishError::Malformed(
            "target path is a directory".to_string(),
        )),
        _ => Err(PublishError::Malformed(
            "contents response is not an object".to_string(),
        )),
    }
}

fn has_repo_scope(scopes: &str) -> bool {
    scopes.split(',').map(str::trim).any(|s| s == "repo")
}

fn error_for(resp: Response) -> PublishError {
    let status = resp.status().as_u16();
    let body = resp.text().unwrap_or_default();
    classify_status(status, body)
}

fn classify_status(status: u16, body: String) -> PublishError {
    match status {
        401 | 403 => PublishError::Auth(status),
        409 | 422 => PublishError::Conflict(status),
        _ => PublishError::Status {
            status,
            body: body.chars().take(200).collect(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn target() -> PublishTarget {
        PublishTarget {
            api_root: "https://api.github.com".to_string(),
            repo: "someone/tv".to_string(),
            path: "lists/channels.m3u".to_string(),
            branch: "main".to_string(),
            token: "t".to_string(),
            lookup_timeout: Duration::from_secs(5),
            upload_timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_contents_url() {
        let store = GithubContentsStore::new(&target()).unwrap();
        assert_eq!(
            store.contents_url("lists/channels.m3u"),
            "https://api.github.com/repos/someone/tv/contents/lists/channels.m3u"
        );
    }

    #[test]
    fn test_extract_sha() {
        assert_eq!(
            extract_sha(&json!({"name": "channels.m3u", "sha": "deadbeef"})).unwrap(),
            "deadbeef"
        );
        assert!(matches!(
            extract_sha(&json!([{"sha": "x"}])),
            Err(PublishError::Malformed(_))
        ));
        assert!(extract_sha(&json!({"name": "x"})).is_err());
    }

    #[test]
    fn test_lookup_not_found_means_new_document() {
        assert_eq!(
            revision_from_response(404, r#"{"message":"Not Found"}"#).unwrap(),
            None
        );
    }

    #[test]
    fn test_lookup_existing_document_returns_sha() {
        let body = r#"{"type":"file","path":"channels.m3u","sha":"3d21ec53a331"}"#;
        assert_eq!(
            revision_from_response(200, body).unwrap().as_deref(),
            Some("3d21ec53a331")
        );
    }

    #[test]
    fn test_lookup_failures_are_errors() {
        assert!(matches!(
            revision_from_response(401, "Bad credentials"),
            Err(PublishError::Auth(401))
        ));
        assert!(matches!(
            revision_from_response(500, ""),
            Err(PublishError::Status { status: 500, .. })
        ));
        assert!(matches!(
            revision_from_response(200, "<html>"),
            Err(PublishError::Malformed(_))
        ));
    }

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(401, String::new()), PublishError::Auth(401)));
        assert!(matches!(
            classify_status(409, String::new()),
            PublishError::Conflict(409)
        ));
        assert!(matches!(
            classify_status(422, String::new()),
            PublishError::Conflict(422)
        ));
        assert!(matches!(
            classify_status(500, "oops".to_string()),
            PublishError::Status { status: 500, .. }
        ));
    }

    #[test]
    fn test_repo_scope_detection() {
        assert!(has_repo_scope("gist, repo, workflow"));
        assert!(!has_repo_scope("public_repo, gist"));
        assert!(!has_repo_scope(""));
    }
}
