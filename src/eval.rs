//! Offline retrieval evaluation over pre-embedded question/answer pairs.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::StoreConfig;
use crate::error::Result;
use crate::model::{MessageId, NewAnswer, Question};
use crate::store::RecordStore;

const ANSWER_ID_OFFSET: MessageId = 1000;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EvalPair {
    pub question: String,
    pub answer: String,
    pub question_vec: Vec<f32>,
    pub answer_vec: Vec<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct EvalReport {
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl EvalReport {
    fn from_counts(tp: usize, fp: usize, fn_: usize) -> Self {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let precision = ratio(tp, tp + fp);
        let recall = ratio(tp, tp + fn_);
        let f1 = if precision + recall > 0.0 { 2.0 * precision * recall / (precision + recall) } else { 0.0 };
        Self { true_positives: tp, false_positives: fp, false_negatives: fn_, precision, recall, f1 }
    }
}

pub fn load_dataset(path: &Path) -> Result<Vec<EvalPair>> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Loads every pair into a fresh in-memory store (question `i`, answer
/// `i + 1000` replying to it), then queries each question vector for its
/// single best match.
pub fn evaluate(config: StoreConfig, dataset: &[EvalPair]) -> Result<EvalReport> {
    let mut store = RecordStore::new(config)?;

    for (i, pair) in dataset.iter().enumerate() {
        let qid = i as MessageId;
        store.add_question(Question {
            id: qid,
            channel: 0,
            author: 0,
            text: pair.question.clone(),
            timestamp: i as f64,
            vector: pair.question_vec.clone(),
        })?;
        store.add_answer(NewAnswer {
            id: qid + ANSWER_ID_OFFSET,
            channel: 0,
            author: 0,
            text: pair.answer.clone(),
            timestamp: i as f64,
            vector: pair.answer_vec.clone(),
            reply_to: Some(qid),
        })?;
    }

    let min_similarity = config.search.min_similarity;
    let (mut tp, mut fp, mut fn_) = (0, 0, 0);
    for pair in dataset {
        match store.search_questions(&pair.question_vec, 1, min_similarity)?.first() {
            None => fn_ += 1,
            Some((hit, _)) if hit.text == pair.question => tp += 1,
            Some(_) => fp += 1,
        }
    }

    let report = EvalReport::from_counts(tp, fp, fn_);
    info!(
        precision = report.precision,
        recall = report.recall,
        f1 = report.f1,
        tp, fp, false_negatives = fn_,
        "evaluation finished"
    );
    Ok(report)
}
