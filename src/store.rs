use std::cmp::Reverse;
use std::collections::{HashMap, VecDeque};

use ordered_float::OrderedFloat;
use tracing::{debug, info};

use crate::config::StoreConfig;
use crate::error::{QaError, Result};
use crate::index::SrpIndex;
use crate::linking::{LinkDecision, LinkingEngine};
use crate::model::{Answer, ChannelId, MessageId, NewAnswer, Question};
use crate::vector::VectorSpace;

const ELLIPSIS: char = '\u{2026}';

/// Canonical question/answer lists plus everything derived from them.
///
/// The SRP index, the id maps, the per-channel recent windows and the
/// answer groupings are all rebuildable from `questions` and `answers`;
/// see [`RecordStore::reload`].
#[derive(Debug)]
pub struct RecordStore {
    config: StoreConfig,
    space: VectorSpace,
    index: SrpIndex,
    linker: LinkingEngine,

    questions: Vec<Question>,
    answers: Vec<Answer>,

    // id -> position in `questions`; a re-used id points at the latest record
    question_pos: HashMap<MessageId, usize>,
    // question id -> positions in `answers`
    answers_by_question: HashMap<MessageId, Vec<usize>>,
    // Newest last, capped at the link window
    recent_by_channel: HashMap<ChannelId, VecDeque<MessageId>>,
}

impl RecordStore {
    pub fn new(config: StoreConfig) -> Result<Self> {
        let index = SrpIndex::new(&config.index)?;
        let space = index.space();
        let linker = LinkingEngine::new(config.link, space)?;
        info!(
            dim = space.dim(),
            n_planes = index.n_planes(),
            n_bands = index.n_bands(),
            "record store initialised"
        );
        Ok(Self {
            config,
            space,
            index,
            linker,
            questions: Vec::new(),
            answers: Vec::new(),
            question_pos: HashMap::new(),
            answers_by_question: HashMap::new(),
            recent_by_channel: HashMap::new(),
        })
    }

    pub fn from_records(config: StoreConfig, questions: Vec<Question>, answers: Vec<Answer>) -> Result<Self> {
        let mut store = Self::new(config)?;
        store.reload(questions, answers)?;
        Ok(store)
    }

    /// Replaces all state with the given canonical lists and rebuilds every
    /// derived structure, the SRP buckets included. On error the store is
    /// left empty rather than half-built.
    pub fn reload(&mut self, questions: Vec<Question>, answers: Vec<Answer>) -> Result<()> {
        self.clear();
        let result = self.hydrate(questions, answers);
        if result.is_err() {
            self.clear();
        }
        result
    }

    fn hydrate(&mut self, questions: Vec<Question>, answers: Vec<Answer>) -> Result<()> {
        for question in questions {
            self.add_question(question)?;
        }
        for answer in answers {
            self.insert_answer(answer)?;
        }
        info!(
            questions = self.questions.len(),
            answers = self.answers.len(),
            channels = self.recent_by_channel.len(),
            "record store rebuilt"
        );
        Ok(())
    }

    fn clear(&mut self) {
        self.index.clear();
        self.questions.clear();
        self.answers.clear();
        self.question_pos.clear();
        self.answers_by_question.clear();
        self.recent_by_channel.clear();
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn index(&self) -> &SrpIndex {
        &self.index
    }

    pub fn linker(&self) -> &LinkingEngine {
        &self.linker
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn answers(&self) -> &[Answer] {
        &self.answers
    }

    pub fn question(&self, id: MessageId) -> Option<&Question> {
        self.question_pos.get(&id).map(|&pos| &self.questions[pos])
    }

    pub fn answers_for(&self, question_id: MessageId) -> impl Iterator<Item = &Answer> + '_ {
        self.answers_by_question
            .get(&question_id)
            .into_iter()
            .flatten()
            .map(move |&pos| &self.answers[pos])
    }

    /// Channel's retained question ids, oldest first.
    pub fn recent_questions(&self, channel: ChannelId) -> impl DoubleEndedIterator<Item = MessageId> + '_ {
        self.recent_by_channel.get(&channel).into_iter().flatten().copied()
    }

    pub fn channel_count(&self) -> usize {
        self.recent_by_channel.len()
    }

    /// Ids must be unique; a repeated id is indexed twice and shadows the older record.
    pub fn add_question(&mut self, question: Question) -> Result<()> {
        self.index.insert(question.id, &question.vector)?;

        let window = self.config.link.window;
        let recent = self.recent_by_channel.entry(question.channel).or_default();
        recent.push_back(question.id);
        while recent.len() > window {
            recent.pop_front();
        }

        self.question_pos.insert(question.id, self.questions.len());
        self.questions.push(question);
        Ok(())
    }

    /// Decides the link for `answer` without storing it.
    pub fn link_answer(&self, answer: &NewAnswer) -> Result<LinkDecision> {
        self.space.check(&answer.vector)?;
        self.linker.decide(answer, self.recent_questions(answer.channel), |id| self.question(id))
    }

    /// Links and stores a new answer. The decision is final.
    pub fn add_answer(&mut self, answer: NewAnswer) -> Result<(Answer, LinkDecision)> {
        let decision = self.link_answer(&answer)?;
        let answer = answer.into_answer(decision.question_id());
        self.insert_answer(answer.clone())?;
        Ok((answer, decision))
    }

    /// Stores an answer whose link is already decided, as on replay.
    pub fn insert_answer(&mut self, answer: Answer) -> Result<()> {
        self.space.check(&answer.vector)?;
        if let Some(qid) = answer.linked_question_id {
            self.answers_by_question.entry(qid).or_default().push(self.answers.len());
        }
        self.answers.push(answer);
        Ok(())
    }

    /// Questions whose exact cosine similarity to `query` is at least
    /// `min_similarity`, best first, at most `top_k`.
    ///
    /// The SRP index only narrows which questions get scored. Small stores,
    /// and queries whose buckets are all empty, are scanned exhaustively.
    pub fn search_questions(&self, query: &[f32], top_k: usize, min_similarity: f32) -> Result<Vec<(&Question, f32)>> {
        self.space.check(query)?;
        if self.questions.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let candidates = self.index.candidates(query)?;
        let mut positions: Vec<usize> =
            if candidates.is_empty() || self.questions.len() <= self.config.search.exhaustive_threshold {
                debug!(
                    candidates = candidates.len(),
                    stored = self.questions.len(),
                    "exhaustive question scan"
                );
                self.question_pos.values().copied().collect()
            } else {
                candidates.iter().filter_map(|id| self.question_pos.get(id).copied()).collect()
            };
        // Insertion order, so the stable sort below breaks score ties by age.
        positions.sort_unstable();

        let mut scored = Vec::with_capacity(positions.len());
        for pos in positions {
            let question = &self.questions[pos];
            let sim = self.space.cosine(query, &question.vector)?;
            if sim >= min_similarity {
                scored.push((question, sim));
            }
        }

        scored.sort_by_key(|&(_, sim)| Reverse(OrderedFloat(sim)));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// [`search_questions`](Self::search_questions) with the configured defaults.
    pub fn search(&self, query: &[f32]) -> Result<Vec<(&Question, f32)>> {
        let search = self.config.search;
        self.search_questions(query, search.top_k, search.min_similarity)
    }

    /// Text of the linked answer closest to the question, trimmed and cut to
    /// `max_answer_len` characters.
    pub fn best_answer(&self, question: &Question) -> Result<Option<String>> {
        let mut best: Option<(&Answer, f32)> = None;
        for answer in self.answers_for(question.id) {
            let sim = self.space.cosine(&question.vector, &answer.vector)?;
            if best.map_or(true, |(_, s)| sim > s) {
                best = Some((answer, sim));
            }
        }
        Ok(best.map(|(answer, _)| truncate_display(&answer.text, self.config.max_answer_len)))
    }

    pub fn best_answer_for(&self, question_id: MessageId) -> Result<Option<String>> {
        let question = self.question(question_id).ok_or(QaError::UnknownQuestion(question_id))?;
        self.best_answer(question)
    }
}

fn truncate_display(text: &str, max_len: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_len) {
        Some((cut, _)) => {
            let mut out = String::with_capacity(cut + ELLIPSIS.len_utf8());
            out.push_str(&text[..cut]);
            out.push(ELLIPSIS);
            out
        }
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{IndexConfig, SearchConfig};

    fn config(dim: usize) -> StoreConfig {
        StoreConfig {
            index: IndexConfig { dim, n_planes: 4, n_bands: 2, seed: 42 },
            ..StoreConfig::default()
        }
    }

    fn question(id: MessageId, channel: ChannelId, ts: f64, vector: Vec<f32>) -> Question {
        Question { id, channel, author: 1, text: format!("question {}", id), timestamp: ts, vector }
    }

    fn new_answer(id: MessageId, channel: ChannelId, ts: f64, vector: Vec<f32>, reply_to: Option<MessageId>) -> NewAnswer {
        NewAnswer { id, channel, author: 2, text: format!("answer {}", id), timestamp: ts, vector, reply_to }
    }

    /// Unit vector in the (x, y) plane at cosine `c` to [1, 0, 0, 0].
    fn at_cos(c: f32) -> Vec<f32> {
        vec![c, (1.0 - c * c).sqrt(), 0.0, 0.0]
    }

    #[test]
    fn identical_query_scores_one() {
        let mut store = RecordStore::new(config(4)).unwrap();
        store.add_question(question(1, 1, 0.0, vec![1.0, 0.0, 0.0, 0.0])).unwrap();

        assert!(store.index().candidates(&[1.0, 0.0, 0.0, 0.0]).unwrap().contains(&1));
        let hits = store.search_questions(&[1.0, 0.0, 0.0, 0.0], 5, 0.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn min_similarity_filters_results() {
        let mut store = RecordStore::new(config(4)).unwrap();
        store.add_question(question(1, 1, 0.0, at_cos(0.80))).unwrap();
        store.add_question(question(2, 1, 0.0, at_cos(0.76))).unwrap();

        let hits = store.search_questions(&[1.0, 0.0, 0.0, 0.0], 5, 0.78).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, 1);
    }

    #[test]
    fn results_are_sorted_and_capped() {
        let mut store = RecordStore::new(config(4)).unwrap();
        for (id, c) in [(1, 0.5), (2, 0.9), (3, 0.7), (4, 0.95), (5, 0.6)] {
            store.add_question(question(id, 1, 0.0, at_cos(c))).unwrap();
        }

        let hits = store.search_questions(&[1.0, 0.0, 0.0, 0.0], 3, 0.0).unwrap();
        let ids: Vec<MessageId> = hits.iter().map(|(q, _)| q.id).collect();
        assert_eq!(ids, vec![4, 2, 3]);
        assert!(hits.windows(2).all(|w| w[0].1 >= w[1].1));
    }

    #[test]
    fn equal_scores_keep_insertion_order() {
        let mut store = RecordStore::new(config(4)).unwrap();
        for id in [30, 10, 20] {
            store.add_question(question(id, 1, 0.0, vec![0.0, 1.0, 0.0, 0.0])).unwrap();
        }
        let hits = store.search_questions(&[0.0, 1.0, 0.0, 0.0], 5, 0.5).unwrap();
        let ids: Vec<MessageId> = hits.iter().map(|(q, _)| q.id).collect();
        assert_eq!(ids, vec![30, 10, 20]);
    }

    #[test]
    fn search_on_empty_store_is_empty() {
        let store = RecordStore::new(config(4)).unwrap();
        assert!(store.search_questions(&[1.0, 0.0, 0.0, 0.0], 5, 0.0).unwrap().is_empty());
    }

    #[test]
    fn search_rejects_wrong_dimension() {
        let store = RecordStore::new(config(4)).unwrap();
        assert!(matches!(
            store.search_questions(&[1.0, 0.0], 5, 0.0),
            Err(QaError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn large_store_uses_lsh_candidates() {
        let cfg = StoreConfig {
            index: IndexConfig { dim: 4, n_planes: 16, n_bands: 4, seed: 3 },
            search: SearchConfig { exhaustive_threshold: 0, ..SearchConfig::default() },
            ..StoreConfig::default()
        };
        let mut store = RecordStore::new(cfg).unwrap();
        store.add_question(question(1, 1, 0.0, vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        store.add_question(question(2, 1, 0.0, vec![-1.0, 0.0, 0.0, 0.0])).unwrap();

        // The antipode shares no band with the query, so it is never scored.
        let hits = store.search_questions(&[1.0, 0.0, 0.0, 0.0], 5, -1.0).unwrap();
        let ids: Vec<MessageId> = hits.iter().map(|(q, _)| q.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn empty_candidate_set_scans_everything() {
        let cfg = StoreConfig {
            index: IndexConfig { dim: 4, n_planes: 16, n_bands: 4, seed: 3 },
            search: SearchConfig { exhaustive_threshold: 0, ..SearchConfig::default() },
            ..StoreConfig::default()
        };
        let mut store = RecordStore::new(cfg).unwrap();
        store.add_question(question(2, 1, 0.0, vec![-1.0, 0.0, 0.0, 0.0])).unwrap();

        assert!(store.index().candidates(&[1.0, 0.0, 0.0, 0.0]).unwrap().is_empty());
        let hits = store.search_questions(&[1.0, 0.0, 0.0, 0.0], 5, -1.0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, 2);
        assert!((hits[0].1 + 1.0).abs() < 1e-6);
    }

    #[test]
    fn fallback_threshold_counts_every_stored_question() {
        let cfg = StoreConfig {
            index: IndexConfig { dim: 4, n_planes: 16, n_bands: 4, seed: 3 },
            search: SearchConfig { exhaustive_threshold: 2, ..SearchConfig::default() },
            ..StoreConfig::default()
        };
        let mut store = RecordStore::new(cfg).unwrap();
        store.add_question(question(1, 1, 0.0, vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        store.add_question(question(2, 1, 0.0, vec![-1.0, 0.0, 0.0, 0.0])).unwrap();
        // Reused id: two distinct ids, three stored questions.
        store.add_question(question(2, 1, 1.0, vec![-1.0, 0.0, 0.0, 0.0])).unwrap();

        let hits = store.search_questions(&[1.0, 0.0, 0.0, 0.0], 5, -1.0).unwrap();
        let ids: Vec<MessageId> = hits.iter().map(|(q, _)| q.id).collect();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn explicit_reply_is_always_honoured() {
        let mut store = RecordStore::new(config(4)).unwrap();
        store.add_question(question(1, 1, 0.0, vec![0.0, 0.0, 1.0, 0.0])).unwrap();
        store.add_question(question(2, 1, 5.0, vec![1.0, 0.0, 0.0, 0.0])).unwrap();

        let (answer, decision) = store
            .add_answer(new_answer(100, 1, 10.0, vec![1.0, 0.0, 0.0, 0.0], Some(1)))
            .unwrap();
        assert_eq!(decision, LinkDecision::Explicit(1));
        assert_eq!(answer.linked_question_id, Some(1));
        assert_eq!(store.answers_for(1).count(), 1);
    }

    #[test]
    fn answer_in_silent_channel_stays_unlinked() {
        let mut store = RecordStore::new(config(4)).unwrap();
        store.add_question(question(1, 1, 0.0, vec![1.0, 0.0, 0.0, 0.0])).unwrap();

        let (answer, decision) = store
            .add_answer(new_answer(100, 2, 1.0, vec![1.0, 0.0, 0.0, 0.0], None))
            .unwrap();
        assert_eq!(decision, LinkDecision::Unlinked { best_score: None });
        assert_eq!(answer.linked_question_id, None);
        assert_eq!(store.answers().len(), 1);
        assert_eq!(store.answers_for(1).count(), 0);
    }

    #[test]
    fn heuristic_link_prefers_semantic_match() {
        let mut store = RecordStore::new(config(4)).unwrap();
        store.add_question(question(1, 7, 0.0, vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        store.add_question(question(2, 7, 250.0, vec![0.0, 0.0, 0.0, 1.0])).unwrap();

        let (_, decision) = store
            .add_answer(new_answer(100, 7, 260.0, at_cos(0.99), None))
            .unwrap();
        assert_eq!(decision.question_id(), Some(1));
    }

    #[test]
    fn recent_window_is_bounded() {
        let mut store = RecordStore::new(config(4)).unwrap();
        for id in 0..45 {
            store.add_question(question(id, 3, id as f64, vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        }
        let recent: Vec<MessageId> = store.recent_questions(3).collect();
        assert_eq!(recent.len(), 30);
        assert_eq!(recent.first(), Some(&15));
        assert_eq!(recent.last(), Some(&44));
    }

    #[test]
    fn best_answer_picks_closest_and_truncates() {
        let cfg = StoreConfig { max_answer_len: 5, ..config(4) };
        let mut store = RecordStore::new(cfg).unwrap();
        store.add_question(question(1, 1, 0.0, vec![1.0, 0.0, 0.0, 0.0])).unwrap();

        let mut far = new_answer(100, 1, 1.0, at_cos(0.2), Some(1));
        far.text = "far".into();
        let mut near = new_answer(101, 1, 2.0, at_cos(0.9), Some(1));
        near.text = "  héllo world  ".into();
        store.add_answer(far).unwrap();
        store.add_answer(near).unwrap();

        assert_eq!(store.best_answer_for(1).unwrap().as_deref(), Some("héllo\u{2026}"));
    }

    #[test]
    fn best_answer_none_without_links() {
        let mut store = RecordStore::new(config(4)).unwrap();
        store.add_question(question(1, 1, 0.0, vec![1.0, 0.0, 0.0, 0.0])).unwrap();
        assert_eq!(store.best_answer_for(1).unwrap(), None);
        assert!(matches!(store.best_answer_for(2), Err(QaError::UnknownQuestion(2))));
    }

    #[test]
    fn reload_reproduces_search_results() {
        let mut store = RecordStore::new(config(4)).unwrap();
        for (id, c) in [(1, 0.95), (2, 0.85), (3, 0.3)] {
            store.add_question(question(id, 1, id as f64, at_cos(c))).unwrap();
        }
        store.add_answer(new_answer(10, 1, 4.0, at_cos(0.9), Some(2))).unwrap();

        let query = at_cos(1.0);
        let before: Vec<(MessageId, f32)> =
            store.search(&query).unwrap().iter().map(|(q, s)| (q.id, *s)).collect();

        let rebuilt = RecordStore::from_records(
            *store.config(),
            store.questions().to_vec(),
            store.answers().to_vec(),
        )
        .unwrap();
        let after: Vec<(MessageId, f32)> =
            rebuilt.search(&query).unwrap().iter().map(|(q, s)| (q.id, *s)).collect();

        assert_eq!(before, after);
        assert_eq!(rebuilt.answers_for(2).count(), 1);
        assert_eq!(rebuilt.recent_questions(1).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn failed_reload_leaves_store_empty() {
        let mut store = RecordStore::new(config(4)).unwrap();
        store.add_question(question(1, 1, 0.0, at_cos(1.0))).unwrap();

        let bad = vec![question(2, 1, 0.0, at_cos(1.0)), question(3, 1, 0.0, vec![1.0])];
        assert!(store.reload(bad, Vec::new()).is_err());
        assert!(store.questions().is_empty());
        assert!(store.index().is_empty());
    }

    #[test]
    fn truncation_counts_characters() {
        assert_eq!(truncate_display("abc", 3), "abc");
        assert_eq!(truncate_display("abcd", 3), "abc\u{2026}");
        assert_eq!(truncate_display("  ok \n", 10), "ok");
    }
}
