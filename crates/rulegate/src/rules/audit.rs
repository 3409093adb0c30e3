//! Raw model output kept for offline re-parsing.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::AsyncWriteExt;

use super::store::{StoreError, validate_document_id};

/// A stored raw response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditArtifact {
    /// File holding the raw text.
    pub path: PathBuf,
    /// Milliseconds since the Unix epoch when the attempt was recorded.
    pub recorded_at_ms: u128,
}

/// Append-only directory of raw extraction responses.
///
/// Each attempt gets its own file named `<document id>.<unix millis>.txt`.
/// Attempts where the model never answered leave `<document id>.<unix
/// millis>.err` holding the failure reason instead; those are listed by
/// [`AuditLog::failures`] and never re-parsed.
#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    /// Create an audit log rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the artifacts.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist one raw response verbatim.
    pub async fn record(&self, id: &str, raw: &str) -> Result<AuditArtifact, StoreError> {
        self.write_new(id, RESPONSE_EXT, raw).await
    }

    /// Persist the reason an attempt produced no response.
    pub async fn record_failure(&self, id: &str, reason: &str) -> Result<AuditArtifact, StoreError> {
        self.write_new(id, FAILURE_EXT, reason).await
    }

    async fn write_new(&self, id: &str, ext: &str, body: &str) -> Result<AuditArtifact, StoreError> {
        validate_document_id(id)?;
        tokio::fs::create_dir_all(&self.dir).await?;

        let mut stamp = now_ms();
        loop {
            let path = self.dir.join(format!("{id}.{stamp:013}.{ext}"));
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(body.as_bytes()).await?;
                    file.flush().await?;
                    tracing::debug!(document_id = %id, path = %path.display(), "audit artifact recorded");
                    return Ok(AuditArtifact {
                        path,
                        recorded_at_ms: stamp,
                    });
                }
                // Two attempts within the same millisecond.
                Err(e) if e.kind() == ErrorKind::AlreadyExists => stamp += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// All recorded responses for a document, oldest first.
    pub async fn list(&self, id: &str) -> Result<Vec<AuditArtifact>, StoreError> {
        self.list_ext(id, RESPONSE_EXT).await
    }

    /// All recorded failures for a document, oldest first.
    pub async fn failures(&self, id: &str) -> Result<Vec<AuditArtifact>, StoreError> {
        self.list_ext(id, FAILURE_EXT).await
    }

    async fn list_ext(&self, id: &str, ext: &str) -> Result<Vec<AuditArtifact>, StoreError> {
        validate_document_id(id)?;
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{id}.");
        let suffix = format!(".{ext}");
        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let stamp = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
                .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|digits| digits.parse::<u128>().ok());
            if let Some(recorded_at_ms) = stamp {
                artifacts.push(AuditArtifact {
                    path: entry.path(),
                    recorded_at_ms,
                });
            }
        }
        artifacts.sort_by_key(|a| a.recorded_at_ms);
        Ok(artifacts)
    }

    /// The newest artifact and its text, if any.
    pub async fn latest(&self, id: &str) -> Result<Option<(AuditArtifact, String)>, StoreError> {
        let Some(artifact) = self.list(id).await?.pop() else {
            return Ok(None);
        };
        let text = tokio::fs::read_to_string(&artifact.path).await?;
        Ok(Some((artifact, text)))
    }
}

const RESPONSE_EXT: &str = "txt";
const FAILURE_EXT: &str = "err";

fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_record_and_latest() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(dir.path().join("raw"));

        assert!(audit.latest("policy.pdf").await.unwrap().is_none());

        let first = audit.record("policy.pdf", "first answer").await.unwrap();
        let second = audit.record("policy.pdf", "second answer").await.unwrap();
        assert!(second.recorded_at_ms > first.recorded_at_ms);

        let (latest, text) = audit.latest("policy.pdf").await.unwrap().unwrap();
        assert_eq!(latest, second);
        assert_eq!(text, "second answer");
        assert_eq!(audit.list("policy.pdf").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_list_does_not_mix_documents() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(dir.path());

        audit.record("policy", "a").await.unwrap();
        audit.record("policy.pdf", "b").await.unwrap();

        assert_eq!(audit.list("policy").await.unwrap().len(), 1);
        assert_eq!(audit.list("policy.pdf").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_keeps_text_verbatim() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(dir.path());
        let raw = "```yaml\nallowed: [ls]\n```\n  trailing  ";
        let artifact = audit.record("doc", raw).await.unwrap();
        assert_eq!(std::fs::read_to_string(artifact.path).unwrap(), raw);
    }

    #[tokio::test]
    async fn test_failures_are_kept_apart_from_responses() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(dir.path());

        audit.record("doc", "allowed: [ls]").await.unwrap();
        let failure = audit.record_failure("doc", "HTTP error: refused").await.unwrap();

        let (latest, text) = audit.latest("doc").await.unwrap().unwrap();
        assert_eq!(text, "allowed: [ls]");
        assert_ne!(latest, failure);
        assert_eq!(audit.list("doc").await.unwrap().len(), 1);
        assert_eq!(audit.failures("doc").await.unwrap(), vec![failure.clone()]);
        assert_eq!(
            std::fs::read_to_string(failure.path).unwrap(),
            "HTTP error: refused"
        );
    }

    #[tokio::test]
    async fn test_invalid_id_rejected() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(dir.path());
        assert!(matches!(
            audit.record("../escape", "x").await,
            Err(StoreError::InvalidDocumentId(_))
        ));
    }
}
