//! Documents stored in the instructor workspace repository.
//!
//! Every document has a local mirror that is only a cache of the remote
//! copy. Mutations write to the remote first; the mirror follows a
//! confirmed write and is marked stale when a write fails.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::ser::PrettyFormatter;

use crate::error::AppError;
use crate::models::{Definitions, GroupRoster, StatusMap};
use crate::report::{Status, status};
use crate::services::connector::{Connector, WriteOutcome};

/// Encoding of a document body in the workspace repository.
pub trait Stored: Sized {
    fn decode(bytes: &[u8]) -> Result<Self, AppError>;
    fn encode(&self) -> Result<Vec<u8>, AppError>;
}

/// JSON as the course tooling writes it: pretty printed, 4-space indent.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, AppError> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

fn from_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
    Ok(serde_json::from_slice(bytes)?)
}

impl Stored for Definitions {
    fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        from_json(bytes)
    }

    fn encode(&self) -> Result<Vec<u8>, AppError> {
        to_pretty_json(self)
    }
}

impl Stored for StatusMap {
    fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        from_json(bytes)
    }

    fn encode(&self) -> Result<Vec<u8>, AppError> {
        to_pretty_json(self)
    }
}

impl Stored for GroupRoster {
    fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        from_json(bytes)
    }

    fn encode(&self) -> Result<Vec<u8>, AppError> {
        to_pretty_json(self)
    }
}

/// Raw text documents such as the student mapping CSV.
impl Stored for String {
    fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        String::from_utf8(bytes.to_vec())
            .map_err(|e| AppError::Invariant(format!("document is not UTF-8: {}", e)))
    }

    fn encode(&self) -> Result<Vec<u8>, AppError> {
        Ok(self.as_bytes().to_vec())
    }
}

/// Reads and writes files on the main branch of the workspace repository.
#[derive(Clone)]
pub struct WorkspaceStore {
    connector: Connector,
    repo: String,
    branch: String,
}

impl WorkspaceStore {
    pub fn new(connector: Connector, repo: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            connector,
            repo: repo.into(),
            branch: branch.into(),
        }
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn repo(&self) -> &str {
        &self.repo
    }

    pub async fn read(&self, path: &str) -> Result<Option<Vec<u8>>, AppError> {
        self.connector
            .remote()
            .get_file(&self.repo, path, &self.branch)
            .await
    }

    /// Writes `bytes`, replacing any previous content.
    pub async fn write(&self, path: &str, bytes: &[u8]) -> Result<WriteOutcome, AppError> {
        self.connector
            .write_file(&self.repo, path, bytes, &self.branch, true)
            .await
    }

    pub async fn read_doc<T: Stored>(&self, path: &str) -> Result<Option<T>, AppError> {
        match self.read(path).await? {
            Some(bytes) => T::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    pub async fn write_doc<T: Stored>(&self, path: &str, value: &T) -> Result<WriteOutcome, AppError> {
        self.write(path, &value.encode()?).await
    }
}

/// Local mirror of one remote document.
#[derive(Debug, Clone)]
pub struct Document<T> {
    path: String,
    value: Option<T>,
    clean: bool,
}

impl<T: Stored + Clone> Document<T> {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: None,
            clean: false,
        }
    }

    /// Mirrored value, without touching the remote.
    pub fn cached(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_clean(&self) -> bool {
        self.clean
    }

    /// Fetches the remote copy into the mirror. A missing document is an
    /// empty mirror, not an error.
    pub async fn reload(&mut self, store: &WorkspaceStore) -> Result<Option<&T>, AppError> {
        let value = store.read_doc::<T>(&self.path).await?;
        if value.is_none() {
            status(
                Status::Note,
                format!("{} not found in {}", self.path, store.repo()),
            );
        }
        self.value = value;
        self.clean = true;
        Ok(self.value.as_ref())
    }

    /// Mirror contents, reloading first when stale.
    pub async fn get(&mut self, store: &WorkspaceStore) -> Result<Option<&T>, AppError> {
        if !self.clean {
            return self.reload(store).await;
        }
        Ok(self.value.as_ref())
    }

    /// Writes `value` to the remote and, once the write is confirmed,
    /// replaces the mirror with it.
    pub async fn commit(&mut self, store: &WorkspaceStore, value: T) -> Result<WriteOutcome, AppError> {
        match store.write_doc(&self.path, &value).await {
            Ok(outcome) => {
                self.value = Some(value);
                self.clean = true;
                Ok(outcome)
            }
            Err(e) => {
                self.clean = false;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::github::{InMemoryRemote, RemoteService};

    async fn store() -> (Arc<InMemoryRemote>, WorkspaceStore) {
        let remote = Arc::new(InMemoryRemote::new());
        remote.create_repository("ws", true).await.unwrap();
        let connector = Connector::new(remote.clone(), "admin", "master");
        (remote, WorkspaceStore::new(connector, "ws", "master"))
    }

    #[test]
    fn test_pretty_json_uses_four_spaces() {
        let mut status = StatusMap::new();
        status.insert("hw1".to_string(), crate::models::AssessmentState::Prepared);
        let text = String::from_utf8(to_pretty_json(&status).unwrap()).unwrap();
        assert_eq!(text, "{\n    \"hw1\": \"Prepared\"\n}");
    }

    #[tokio::test]
    async fn test_missing_document_is_empty() {
        let (_, store) = store().await;
        let mut doc: Document<StatusMap> = Document::new("config/assessment_status.json");
        assert!(doc.get(&store).await.unwrap().is_none());
        assert!(doc.is_clean());
    }

    #[tokio::test]
    async fn test_commit_updates_mirror_after_write() {
        let (remote, store) = store().await;
        let mut doc: Document<String> = Document::new("notes.txt");
        doc.commit(&store, "hello".to_string()).await.unwrap();

        assert_eq!(doc.cached().map(String::as_str), Some("hello"));
        assert_eq!(
            remote.file("ws", "master", "notes.txt").unwrap().as_deref(),
            Some(&b"hello"[..])
        );
    }

    #[tokio::test]
    async fn test_failed_commit_leaves_mirror_stale() {
        let (remote, store) = store().await;
        let mut doc: Document<String> = Document::new("notes.txt");
        doc.commit(&store, "first".to_string()).await.unwrap();

        remote.drop_writes(true).unwrap();
        let err = doc.commit(&store, "second".to_string()).await.unwrap_err();
        assert!(matches!(err, AppError::WriteNotApplied { .. }));
        assert!(!doc.is_clean());
        assert_eq!(doc.cached().map(String::as_str), Some("first"));

        remote.drop_writes(false).unwrap();
        let reloaded = doc.get(&store).await.unwrap().cloned();
        assert_eq!(reloaded.as_deref(), Some("first"));
        assert!(remote.repository_exists("ws").await.unwrap());
    }
}
