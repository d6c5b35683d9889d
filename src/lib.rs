pub mod config;
pub mod error;
pub mod eval;
pub mod index;
pub mod linking;
pub mod manager;
pub mod model;
pub mod parser;
pub mod server;
pub mod storage;
pub mod store;
pub mod vector;
pub mod wire;

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::{QaError, Result};
use crate::linking::LinkDecision;
use crate::model::{Answer, LogEntry, MessageId, NewAnswer, Question, SearchHit};
use crate::storage::Segment;
use crate::store::RecordStore;

pub const QUESTIONS_FILE: &str = "questions.json";
pub const ANSWERS_FILE: &str = "answers.json";

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Stats {
    pub questions: usize,
    pub answers: usize,
    pub linked_answers: usize,
    pub channels: usize,
    pub buckets: usize,
    pub log_bytes: u64,
}

/// Thread-safe question/answer database.
///
/// Searches take the read side of the store lock; mutations take the write
/// side for the in-memory update only. The log mutex is held across a whole
/// write, which serialises writers and keeps log order equal to store order.
pub struct QaDb {
    config: EngineConfig,
    store: RwLock<RecordStore>,
    log: Mutex<Segment>,
    // Held for the duration of an export so concurrent exports never share a file.
    snapshot: Mutex<()>,
}

impl fmt::Debug for QaDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("QaDb");
        if let Ok(store) = self.store.read() {
            dbg.field("questions", &store.questions().len())
                .field("answers", &store.answers().len());
        }
        dbg.finish()
    }
}

impl QaDb {
    /// Opens (or creates) the record log under `config.data_dir` and rebuilds
    /// the store from it.
    pub fn open(config: EngineConfig) -> Result<Self> {
        let mut segment = Segment::new(&config.log_path(), config.strict_durability)?;
        let entries = segment.read_all()?;
        info!(entries = entries.len(), path = %segment.file_path.display(), "replaying record log");

        let (questions, answers) = split_entries(entries);
        let store = RecordStore::from_records(config.store, questions, answers)?;

        Ok(Self {
            config,
            store: RwLock::new(store),
            log: Mutex::new(segment),
            snapshot: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn read_store(&self) -> Result<RwLockReadGuard<'_, RecordStore>> {
        self.store.read().map_err(|_| QaError::Poisoned)
    }

    fn write_store(&self) -> Result<RwLockWriteGuard<'_, RecordStore>> {
        self.store.write().map_err(|_| QaError::Poisoned)
    }

    fn lock_log(&self) -> Result<MutexGuard<'_, Segment>> {
        self.log.lock().map_err(|_| QaError::Poisoned)
    }

    pub fn add_question(&self, question: Question) -> Result<()> {
        let mut log = self.lock_log()?;
        self.read_store()?.index().space().check(&question.vector)?;

        log.append(&LogEntry::Question(question.clone()))?;
        debug!(id = question.id, channel = question.channel, "question stored");
        self.write_store()?.add_question(question)
    }

    /// Links and stores an answer, returning the linked question id.
    pub fn add_answer(&self, answer: NewAnswer) -> Result<Option<MessageId>> {
        Ok(self.add_answer_with_decision(answer)?.1.question_id())
    }

    pub fn add_answer_with_decision(&self, answer: NewAnswer) -> Result<(Answer, LinkDecision)> {
        let mut log = self.lock_log()?;
        // Writers are serialised by the log lock, so the decision cannot go stale.
        let decision = self.read_store()?.link_answer(&answer)?;
        let answer = answer.into_answer(decision.question_id());

        log.append(&LogEntry::Answer(answer.clone()))?;
        self.write_store()?.insert_answer(answer.clone())?;
        Ok((answer, decision))
    }

    pub fn search_questions(&self, query: &[f32], top_k: usize, min_similarity: f32) -> Result<Vec<SearchHit>> {
        let store = self.read_store()?;
        let hits = store.search_questions(query, top_k, min_similarity)?;
        Ok(hits.into_iter().map(|(q, score)| SearchHit { question: q.clone(), score }).collect())
    }

    pub fn search(&self, query: &[f32]) -> Result<Vec<SearchHit>> {
        let search = self.config.store.search;
        self.search_questions(query, search.top_k, search.min_similarity)
    }

    pub fn get_question(&self, id: MessageId) -> Result<Option<Question>> {
        Ok(self.read_store()?.question(id).cloned())
    }

    pub fn best_answer(&self, question_id: MessageId) -> Result<Option<String>> {
        self.read_store()?.best_answer_for(question_id)
    }

    pub fn stats(&self) -> Result<Stats> {
        let log_bytes = self.lock_log()?.len();
        let store = self.read_store()?;
        Ok(Stats {
            questions: store.questions().len(),
            answers: store.answers().len(),
            linked_answers: store.answers().iter().filter(|a| a.linked_question_id.is_some()).count(),
            channels: store.channel_count(),
            buckets: store.index().bucket_count(),
            log_bytes,
        })
    }

    /// Re-reads the record log and rebuilds the store from scratch.
    pub fn reload(&self) -> Result<Stats> {
        {
            let mut log = self.lock_log()?;
            let (questions, answers) = split_entries(log.read_all()?);
            let fresh = RecordStore::from_records(self.config.store, questions, answers)?;
            *self.write_store()? = fresh;
        }
        self.stats()
    }

    /// Writes `questions.json` and `answers.json` into `dir`.
    ///
    /// Each file is written beside its target and renamed into place, so a
    /// reader sees either the previous snapshot or the new one.
    pub fn export_snapshot(&self, dir: &Path) -> Result<Stats> {
        let _exporting = self.snapshot.lock().map_err(|_| QaError::Poisoned)?;
        fs::create_dir_all(dir)?;
        let (questions, answers) = {
            let store = self.read_store()?;
            (store.questions().to_vec(), store.answers().to_vec())
        };

        write_json(&dir.join(QUESTIONS_FILE), &questions)?;
        write_json(&dir.join(ANSWERS_FILE), &answers)?;
        info!(questions = questions.len(), answers = answers.len(), dir = %dir.display(), "snapshot written");
        self.stats()
    }

    /// Replaces all state with the snapshot in `dir` and compacts the record
    /// log to match. A missing file counts as an empty list.
    pub fn import_snapshot(&self, dir: &Path) -> Result<Stats> {
        let questions: Vec<Question> = read_json_or_default(&dir.join(QUESTIONS_FILE))?;
        let answers: Vec<Answer> = read_json_or_default(&dir.join(ANSWERS_FILE))?;
        info!(questions = questions.len(), answers = answers.len(), dir = %dir.display(), "importing snapshot");

        {
            let mut log = self.lock_log()?;
            let fresh = RecordStore::from_records(self.config.store, questions, answers)?;

            let entries: Vec<LogEntry> = fresh
                .questions()
                .iter()
                .cloned()
                .map(LogEntry::Question)
                .chain(fresh.answers().iter().cloned().map(LogEntry::Answer))
                .collect();
            log.rewrite(&entries)?;

            *self.write_store()? = fresh;
        }
        self.stats()
    }
}

fn split_entries(entries: Vec<LogEntry>) -> (Vec<Question>, Vec<Answer>) {
    let mut questions = Vec::new();
    let mut answers = Vec::new();
    for entry in entries {
        match entry {
            LogEntry::Question(q) => questions.push(q),
            LogEntry::Answer(a) => answers.push(a),
        }
    }
    (questions, answers)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match File::open(path) {
        Ok(file) => Ok(serde_json::from_reader(BufReader::new(file))?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}
