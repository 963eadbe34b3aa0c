//! 播放列表远端发布（带 sha 的条件更新）。
//!
//! 流程：查询远端当前 sha → base64 编码内容 → PUT（仅在查到 sha 时携带）。
//! 所有 HTTP 层失败都折叠为 `false` 并记录日志，本次调用内不重试。
//!
//! 子模块：
//! - `github` — GitHub contents API 实现

pub mod github;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("publish request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("credential rejected (HTTP {0})")]
    Auth(u16),
    #[error("remote document changed since lookup (HTTP {0})")]
    Conflict(u16),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected response: {0}")]
    Malformed(String),
}

/// 发布前读取到的远端文档状态，只用于本次发布。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocumentState {
    pub path: String,
    pub branch: String,
    pub prior_revision: Option<String>,
}

/// create-or-update 请求体。
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PutBody {
    pub message: String,
    pub content: String,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha: Option<String>,
}

/// 远端版本化文档存储。
pub trait DocumentStore: Send + Sync {
    /// 文档存在时返回当前 sha，不存在返回 `None`。
    fn lookup_revision(&self, path: &str, branch: &str) -> Result<Option<String>, PublishError>;

    fn put_document(&self, path: &str, body: &PutBody) -> Result<(), PublishError>;
}

pub struct RemotePublisher<S: DocumentStore> {
    store: S,
    path: String,
    branch: String,
}

impl<S: DocumentStore> RemotePublisher<S> {
    pub fn new(store: S, path: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            store,
            path: path.into(),
            branch: branch.into(),
        }
    }

    pub fn publish(&self, content: &[u8]) -> bool {
        match self.try_publish(content) {
            Ok(state) => {
                info!(
                    "已发布到 {}@{}（{}）",
                    state.path,
                    state.branch,
                    if state.prior_revision.is_some() {
                        "更新"
                    } else {
                        "新建"
                    }
                );
                true
            }
            Err(err) => {
                error!("发布失败: {}", err);
                false
            }
        }
    }

    fn try_publish(&self, content: &[u8]) -> Result<RemoteDocumentState, PublishError> {
        let state = RemoteDocumentState {
            path: self.path.clone(),
            branch: self.branch.clone(),
            prior_revision: self.store.lookup_revision(&self.path, &self.branch)?,
        };

        let body = PutBody {
            message: commit_message(now_local()),
            content: STANDARD.encode(content),
            branch: state.branch.clone(),
            sha: state.prior_revision.clone(),
        };
        self.store.put_document(&state.path, &body)?;
        Ok(state)
    }
}

pub fn commit_message(at: OffsetDateTime) -> String {
    let hm = at
        .format(format_description!("[hour]:[minute]"))
        .unwrap_or_else(|_| format!("{:02}:{:02}", at.hour(), at.minute()));
    format!("Update {hm}")
}

fn now_local() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use time::macros::datetime;

    #[derive(Default)]
    struct FakeStore {
        existing_sha: Option<String>,
        lookup_fails: bool,
        put_status: Option<u16>,
        puts: Mutex<Vec<(String, PutBody)>>,
    }

    impl DocumentStore for FakeStore {
        fn lookup_revision(&self, _path: &str, _branch: &str) -> Result<Option<String>, PublishError> {
            if self.lookup_fails {
                return Err(PublishError::Auth(401));
            }
            Ok(self.existing_sha.clone())
        }

        fn put_document(&self, path: &str, body: &PutBody) -> Result<(), PublishError> {
            self.puts
                .lock()
                .unwrap()
                .push((path.to_string(), body.clone()));
            match self.put_status {
                Some(409) => Err(PublishError::Conflict(409)),
                Some(s) => Err(PublishError::Status {
                    status: s,
                    body: String::new(),
                }),
                None => Ok(()),
            }
        }
    }

    #[test]
    fn test_new_document_has_no_sha() {
        let publisher = RemotePublisher::new(FakeStore::default(), "lists/tv.m3u", "main");
        assert!(publisher.publish(b"#EXTM3U\n"));

        let puts = publisher.store.puts.lock().unwrap();
        let (path, body) = &puts[0];
        assert_eq!(path, "lists/tv.m3u");
        assert_eq!(body.sha, None);
        assert_eq!(body.branch, "main");
        assert_eq!(body.content, "I0VYVE0zVQo=");
        assert!(body.message.starts_with("Update "));

        let json = serde_json::to_value(body).unwrap();
        assert!(json.get("sha").is_none());
    }

    #[test]
    fn test_existing_document_sends_sha() {
        let store = FakeStore {
            existing_sha: Some("abc123".to_string()),
            ..FakeStore::default()
        };
        let publisher = RemotePublisher::new(store, "tv.m3u", "gh-pages");
        assert!(publisher.publish(b"x"));

        let puts = publisher.store.puts.lock().unwrap();
        assert_eq!(puts[0].1.sha.as_deref(), Some("abc123"));
        let json = serde_json::to_value(&puts[0].1).unwrap();
        assert_eq!(json["sha"], "abc123");
        assert_eq!(json["branch"], "gh-pages");
    }

    #[test]
    fn test_conflict_collapses_to_false() {
        let store = FakeStore {
            existing_sha: Some("stale".to_string()),
            put_status: Some(409),
            ..FakeStore::default()
        };
        let publisher = RemotePublisher::new(store, "tv.m3u", "main");
        assert!(!publisher.publish(b"x"));
        assert_eq!(publisher.store.puts.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_lookup_skips_upload() {
        let store = FakeStore {
            lookup_fails: true,
            ..FakeStore::default()
        };
        let publisher = RemotePublisher::new(store, "tv.m3u", "main");
        assert!(!publisher.publish(b"x"));
        assert!(publisher.store.puts.lock().unwrap().is_empty());
    }

    #[test]
    fn test_commit_message_time() {
        assert_eq!(
            commit_message(datetime!(2026-10-19 07:05 UTC)),
            "Update 07:05"
        );
    }
}
