use tracing::debug;

use crate::config::LinkPolicy;
use crate::error::Result;
use crate::model::{MessageId, NewAnswer, Question};
use crate::vector::VectorSpace;

/// Outcome of linking an incoming answer. Both the linked and the unlinked
/// states are terminal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LinkDecision {
    /// The answer replied directly to a known question.
    Explicit(MessageId),
    /// Best hybrid score in the channel window cleared `min_score`.
    Heuristic { question_id: MessageId, score: f32 },
    /// Nothing cleared the bar. `best_score` is `None` when the window was empty.
    Unlinked { best_score: Option<f32> },
}

impl LinkDecision {
    pub fn question_id(&self) -> Option<MessageId> {
        match *self {
            LinkDecision::Explicit(id) => Some(id),
            LinkDecision::Heuristic { question_id, .. } => Some(question_id),
            LinkDecision::Unlinked { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinkingEngine {
    policy: LinkPolicy,
    space: VectorSpace,
}

impl LinkingEngine {
    pub fn new(policy: LinkPolicy, space: VectorSpace) -> Result<Self> {
        policy.validate()?;
        Ok(Self { policy, space })
    }

    pub fn policy(&self) -> &LinkPolicy {
        &self.policy
    }

    /// `exp(-|dt| / tau)`, 1.0 for simultaneous messages.
    pub fn recency(&self, dt_secs: f64) -> f32 {
        (-dt_secs.abs() / self.policy.tau_secs).exp() as f32
    }

    pub fn hybrid_score(&self, similarity: f32, dt_secs: f64) -> f32 {
        self.policy.similarity_weight * similarity + self.policy.recency_weight * self.recency(dt_secs)
    }

    /// Picks the question `answer` responds to.
    ///
    /// `recent` yields the channel's question ids oldest first; only the last
    /// `window` of them are scored, newest first, so the newest wins a tie.
    /// `lookup` resolves ids to stored questions.
    pub fn decide<'a, I, F>(&self, answer: &NewAnswer, recent: I, lookup: F) -> Result<LinkDecision>
    where
        I: DoubleEndedIterator<Item = MessageId>,
        F: Fn(MessageId) -> Option<&'a Question>,
    {
        if let Some(reply_to) = answer.reply_to {
            if lookup(reply_to).is_some() {
                return Ok(LinkDecision::Explicit(reply_to));
            }
            debug!(answer = answer.id, reply_to, "back-reference to unknown question, falling back to heuristic");
        }

        let mut best: Option<(MessageId, f32)> = None;
        for qid in recent.rev().take(self.policy.window) {
            let Some(question) = lookup(qid) else { continue };

            let sim = self.space.cosine(&answer.vector, &question.vector)?;
            let score = self.hybrid_score(sim, answer.timestamp - question.timestamp);

            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ if score.is_nan() => {}
                _ => best = Some((qid, score)),
            }
        }

        let decision = match best {
            Some((question_id, score)) if score >= self.policy.min_score => {
                LinkDecision::Heuristic { question_id, score }
            }
            other => LinkDecision::Unlinked { best_score: other.map(|(_, s)| s) },
        };
        debug!(answer = answer.id, channel = answer.channel, ?decision, "link decided");
        Ok(decision)
    }
}
