use crate::error::ChatError;
use crate::models::{Answer, Chunk};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CitedChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: u64,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationTurn {
    pub conversation_id: Uuid,
    pub question: String,
    pub answer: String,
    pub cited_chunks: Vec<CitedChunk>,
    pub asked_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(conversation_id: Uuid, question: &str, answer: &Answer) -> Self {
        Self {
            conversation_id,
            question: question.to_string(),
            answer: answer.text.clone(),
            cited_chunks: answer
                .grounding
                .hits
                .iter()
                .map(|hit| cite(&hit.chunk, hit.score))
                .collect(),
            asked_at: Utc::now(),
        }
    }
}

fn cite(chunk: &Chunk, score: f32) -> CitedChunk {
    CitedChunk {
        chunk_id: chunk.chunk_id.clone(),
        document_id: chunk.document_id.clone(),
        chunk_index: chunk.chunk_index,
        score,
    }
}

pub fn new_conversation_id() -> Uuid {
    Uuid::new_v4()
}

/// Persists question/answer turns. Retrieval never reads history back.
pub trait HistoryStore: Send + Sync {
    fn save(&self, conversation_id: Uuid, question: &str, answer: &Answer) -> Result<(), ChatError>;

    fn conversation(&self, conversation_id: Uuid) -> Result<Vec<ConversationTurn>, ChatError>;

    /// Conversation ids in order of first appearance.
    fn conversations(&self) -> Result<Vec<Uuid>, ChatError>;

    /// Removes every turn of `conversation_id` and returns how many were removed.
    fn delete(&self, conversation_id: Uuid) -> Result<usize, ChatError>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    turns: Mutex<Vec<ConversationTurn>>,
}

impl InMemoryHistoryStore {
    fn with_turns<T>(&self, f: impl FnOnce(&mut Vec<ConversationTurn>) -> T) -> Result<T, ChatError> {
        let mut turns = self
            .turns
            .lock()
            .map_err(|_| ChatError::History("history lock poisoned".to_string()))?;
        Ok(f(&mut turns))
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn save(&self, conversation_id: Uuid, question: &str, answer: &Answer) -> Result<(), ChatError> {
        let turn = ConversationTurn::new(conversation_id, question, answer);
        self.with_turns(|turns| turns.push(turn))
    }

    fn conversation(&self, conversation_id: Uuid) -> Result<Vec<ConversationTurn>, ChatError> {
        self.with_turns(|turns| filter_conversation(turns, conversation_id))
    }

    fn conversations(&self) -> Result<Vec<Uuid>, ChatError> {
        self.with_turns(|turns| conversation_ids(turns))
    }

    fn delete(&self, conversation_id: Uuid) -> Result<usize, ChatError> {
        self.with_turns(|turns| {
            let before = turns.len();
            turns.retain(|turn| turn.conversation_id != conversation_id);
            before - turns.len()
        })
    }
}

/// Append-only JSON lines file, one turn per line.
#[derive(Debug)]
pub struct JsonlHistoryStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlHistoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ChatError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Vec<ConversationTurn>, ChatError> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(error.into()),
        };

        let mut turns = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let turn = serde_json::from_str(&line).map_err(|error| {
                ChatError::History(format!(
                    "{} line {}: {error}",
                    self.path.display(),
                    number + 1
                ))
            })?;
            turns.push(turn);
        }
        Ok(turns)
    }
}

impl HistoryStore for JsonlHistoryStore {
    fn save(&self, conversation_id: Uuid, question: &str, answer: &Answer) -> Result<(), ChatError> {
        let turn = ConversationTurn::new(conversation_id, question, answer);
        let line = serde_json::to_string(&turn)
            .map_err(|error| ChatError::History(error.to_string()))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ChatError::History("history lock poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    fn conversation(&self, conversation_id: Uuid) -> Result<Vec<ConversationTurn>, ChatError> {
        Ok(filter_conversation(&self.read_all()?, conversation_id))
    }

    fn conversations(&self) -> Result<Vec<Uuid>, ChatError> {
        Ok(conversation_ids(&self.read_all()?))
    }

    /// Rewrites the file without the conversation. The new contents go to a
    /// sibling file first and replace the old one with a rename.
    fn delete(&self, conversation_id: Uuid) -> Result<usize, ChatError> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ChatError::History("history lock poisoned".to_string()))?;

        let (removed, kept): (Vec<_>, Vec<_>) = self
            .read_all()?
            .into_iter()
            .partition(|turn| turn.conversation_id == conversation_id);
        if removed.is_empty() {
            return Ok(0);
        }

        let staging = self.path.with_extension("jsonl.tmp");
        {
            let mut file = fs::File::create(&staging)?;
            for turn in &kept {
                let line = serde_json::to_string(turn)
                    .map_err(|error| ChatError::History(error.to_string()))?;
                writeln!(file, "{line}")?;
            }
            file.sync_all()?;
        }
        fs::rename(&staging, &self.path)?;
        Ok(removed.len())
    }
}

fn filter_conversation(turns: &[ConversationTurn], conversation_id: Uuid) -> Vec<ConversationTurn> {
    turns
        .iter()
        .filter(|turn| turn.conversation_id == conversation_id)
        .cloned()
        .collect()
}

fn conversation_ids(turns: &[ConversationTurn]) -> Vec<Uuid> {
    let mut ids = Vec::new();
    for turn in turns {
        if !ids.contains(&turn.conversation_id) {
            ids.push(turn.conversation_id);
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RetrievalResult, ScoredChunk};
    use tempfile::tempdir;

    fn answer(text: &str) -> Answer {
        Answer {
            text: text.to_string(),
            grounding: RetrievalResult {
                hits: vec![ScoredChunk {
                    chunk: Chunk {
                        chunk_id: "chunk-1".to_string(),
                        document_id: "doc-1".to_string(),
                        chunk_index: 3,
                        text: "context".to_string(),
                        char_start: 0,
                        char_end: 7,
                    },
                    score: 0.5,
                }],
            },
        }
    }

    #[test]
    fn in_memory_store_groups_turns_by_conversation() -> Result<(), ChatError> {
        let store = InMemoryHistoryStore::default();
        let first = new_conversation_id();
        let second = new_conversation_id();

        store.save(first, "q1", &answer("a1"))?;
        store.save(second, "q2", &answer("a2"))?;
        store.save(first, "q3", &answer("a3"))?;

        let turns = store.conversation(first)?;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].question, "q3");
        assert_eq!(turns[0].cited_chunks[0].chunk_index, 3);
        assert_eq!(store.conversations()?, vec![first, second]);
        Ok(())
    }

    #[test]
    fn jsonl_store_survives_reopening() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("nested").join("history.jsonl");
        let conversation = new_conversation_id();

        JsonlHistoryStore::open(&path)?.save(conversation, "Where is the filter?", &answer("Left side."))?;

        let reopened = JsonlHistoryStore::open(&path)?;
        let turns = reopened.conversation(conversation)?;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].answer, "Left side.");
        assert_eq!(turns[0].cited_chunks[0].chunk_id, "chunk-1");
        Ok(())
    }

    #[test]
    fn in_memory_delete_removes_only_that_conversation() -> Result<(), ChatError> {
        let store = InMemoryHistoryStore::default();
        let doomed = new_conversation_id();
        let kept = new_conversation_id();

        store.save(doomed, "q1", &answer("a1"))?;
        store.save(kept, "q2", &answer("a2"))?;
        store.save(doomed, "q3", &answer("a3"))?;

        assert_eq!(store.delete(doomed)?, 2);
        assert!(store.conversation(doomed)?.is_empty());
        assert_eq!(store.conversations()?, vec![kept]);
        assert_eq!(store.delete(doomed)?, 0);
        Ok(())
    }

    #[test]
    fn jsonl_delete_rewrites_the_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("history.jsonl");
        let doomed = new_conversation_id();
        let kept = new_conversation_id();

        let store = JsonlHistoryStore::open(&path)?;
        store.save(doomed, "Where is the filter?", &answer("Left side."))?;
        store.save(kept, "Oil grade?", &answer("ISO VG 46."))?;

        assert_eq!(store.delete(doomed)?, 1);
        assert_eq!(store.delete(new_conversation_id())?, 0);

        let reopened = JsonlHistoryStore::open(&path)?;
        assert_eq!(reopened.conversations()?, vec![kept]);
        assert_eq!(reopened.conversation(kept)?[0].answer, "ISO VG 46.");
        assert_eq!(fs::read_to_string(&path)?.lines().count(), 1);
        assert!(!path.with_extension("jsonl.tmp").exists());

        store.save(doomed, "Asked again", &answer("Still left."))?;
        assert_eq!(reopened.conversations()?, vec![kept, doomed]);
        Ok(())
    }

    #[test]
    fn deleting_from_a_missing_file_is_a_no_op() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("absent.jsonl");
        let store = JsonlHistoryStore::open(&path)?;
        assert_eq!(store.delete(new_conversation_id())?, 0);
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn missing_history_file_reads_as_empty() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let store = JsonlHistoryStore::open(dir.path().join("absent.jsonl"))?;
        assert!(store.conversations()?.is_empty());
        Ok(())
    }
}
