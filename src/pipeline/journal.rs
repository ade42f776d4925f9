use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::state::StepRecord;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt journal entry on line {line}: {source}")]
    Decode {
        line: usize,
        source: serde_json::Error,
    },

    #[error("Failed to encode journal entry: {0}")]
    Encode(serde_json::Error),
}

/// Append-only record of completed steps for one run.
#[async_trait]
pub trait Journal: Send + Sync {
    async fn load(&self) -> Result<Vec<StepRecord>, JournalError>;
    async fn append(&mut self, record: &StepRecord) -> Result<(), JournalError>;
}

/// Journal that lives as long as the process.
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Vec<StepRecord>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Journal for MemoryJournal {
    async fn load(&self) -> Result<Vec<StepRecord>, JournalError> {
        Ok(self.records.clone())
    }

    async fn append(&mut self, record: &StepRecord) -> Result<(), JournalError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// JSON-lines journal on disk. A missing file is an empty history.
///
/// An unterminated last line that does not decode is a torn write from an
/// interrupted run: `load` drops it and truncates the file back to the
/// last complete entry. A corrupt line anywhere else is an error.
#[derive(Debug)]
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn truncate_to(&self, len: usize) -> Result<(), JournalError> {
        let file = OpenOptions::new().write(true).open(&self.path).await?;
        file.set_len(len as u64).await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn terminate_last_line(&self) -> Result<(), JournalError> {
        let mut file = OpenOptions::new().append(true).open(&self.path).await?;
        file.write_all(b"\n").await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[async_trait]
impl Journal for FileJournal {
    async fn load(&self) -> Result<Vec<StepRecord>, JournalError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records: Vec<StepRecord> = Vec::new();
        let mut offset = 0;
        for (index, line) in bytes.split_inclusive(|b| *b == b'\n').enumerate() {
            let terminated = line.ends_with(b"\n");
            if line.iter().all(u8::is_ascii_whitespace) {
                offset += line.len();
                continue;
            }

            match serde_json::from_slice(line) {
                Ok(record) => {
                    records.push(record);
                    if !terminated {
                        self.terminate_last_line().await?;
                    }
                }
                Err(source) if terminated => {
                    return Err(JournalError::Decode {
                        line: index + 1,
                        source,
                    });
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = index + 1,
                        error = %e,
                        "dropping partially written journal entry"
                    );
                    self.truncate_to(offset).await?;
                }
            }
            offset += line.len();
        }
        debug!(path = %self.path.display(), entries = records.len(), "loaded journal");
        Ok(records)
    }

    async fn append(&mut self, record: &StepRecord) -> Result<(), JournalError> {
        let mut line = serde_json::to_vec(record).map_err(JournalError::Encode)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path).await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::state::tests::{analysis, changes, posted};

    #[tokio::test]
    async fn test_memory_journal_keeps_order() {
        let mut journal = MemoryJournal::new();
        journal.append(&changes("code")).await.unwrap();
        journal.append(&analysis("{}")).await.unwrap();
        assert_eq!(journal.load().await.unwrap(), vec![changes("code"), analysis("{}")]);
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_history() {
        let dir = tempfile::tempdir().unwrap();
        let journal = FileJournal::new(dir.path().join("run.jsonl"));
        assert!(journal.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_journal_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");

        let mut journal = FileJournal::new(&path);
        journal.append(&changes("a\nb")).await.unwrap();
        journal.append(&posted()).await.unwrap();

        let reopened = FileJournal::new(&path);
        assert_eq!(reopened.load().await.unwrap(), vec![changes("a\nb"), posted()]);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_line_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        std::fs::write(&path, format!("{}\n\nnot json\n", serde_json::to_string(&posted()).unwrap())).unwrap();

        let err = FileJournal::new(&path).load().await.unwrap_err();
        assert!(matches!(err, JournalError::Decode { line: 3, .. }));
    }

    #[tokio::test]
    async fn test_torn_last_entry_is_dropped_and_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let first = format!("{}\n", serde_json::to_string(&changes("code")).unwrap());
        let second = serde_json::to_string(&analysis("{\"violationFound\":false}")).unwrap();
        std::fs::write(&path, format!("{}{}", first, &second[..10])).unwrap();

        let mut journal = FileJournal::new(&path);
        assert_eq!(journal.load().await.unwrap(), vec![changes("code")]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);

        journal.append(&analysis("{}")).await.unwrap();
        assert_eq!(
            journal.load().await.unwrap(),
            vec![changes("code"), analysis("{}")]
        );
    }

    #[tokio::test]
    async fn test_torn_multibyte_tail_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        let first = format!("{}\n", serde_json::to_string(&changes("code")).unwrap());
        let second = serde_json::to_vec(&analysis("{\"explanation\":\"Überschreitung\"}")).unwrap();
        let cut = second.iter().position(|b| *b == 0xC3).unwrap() + 1;

        let mut bytes = first.clone().into_bytes();
        bytes.extend_from_slice(&second[..cut]);
        std::fs::write(&path, bytes).unwrap();

        assert_eq!(FileJournal::new(&path).load().await.unwrap(), vec![changes("code")]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
    }

    #[tokio::test]
    async fn test_unterminated_complete_entry_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.jsonl");
        std::fs::write(&path, serde_json::to_string(&changes("code")).unwrap()).unwrap();

        let mut journal = FileJournal::new(&path);
        assert_eq!(journal.load().await.unwrap(), vec![changes("code")]);

        journal.append(&posted()).await.unwrap();
        assert_eq!(journal.load().await.unwrap(), vec![changes("code"), posted()]);
    }
}
