use rkyv::{Archive, Deserialize as RkyvDeserialize, Serialize as RkyvSerialize};
use serde::{Deserialize, Serialize};

/// Caller-assigned message id (chat-platform snowflake).
pub type MessageId = u64;
pub type ChannelId = u64;
pub type AuthorId = u64;

/// A stored question. Immutable once stored.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Question {
    #[serde(rename = "msg_id")]
    pub id: MessageId,
    #[serde(rename = "channel_id")]
    pub channel: ChannelId,
    #[serde(rename = "author_id")]
    pub author: AuthorId,
    pub text: String,
    /// Unix seconds
    #[serde(rename = "ts")]
    pub timestamp: f64,
    #[serde(rename = "vec")]
    pub vector: Vec<f32>,
}

/// A stored answer. `linked_question_id` is decided once, at creation.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub struct Answer {
    #[serde(rename = "msg_id")]
    pub id: MessageId,
    #[serde(rename = "channel_id")]
    pub channel: ChannelId,
    #[serde(rename = "author_id")]
    pub author: AuthorId,
    pub text: String,
    #[serde(rename = "ts")]
    pub timestamp: f64,
    #[serde(rename = "vec")]
    pub vector: Vec<f32>,
    #[serde(rename = "qid", default)]
    pub linked_question_id: Option<MessageId>,
}

/// An incoming answer before its link has been decided.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewAnswer {
    pub id: MessageId,
    pub channel: ChannelId,
    pub author: AuthorId,
    pub text: String,
    pub timestamp: f64,
    pub vector: Vec<f32>,
    /// Message the answer explicitly replied to, if any.
    #[serde(default)]
    pub reply_to: Option<MessageId>,
}

impl NewAnswer {
    pub fn into_answer(self, linked_question_id: Option<MessageId>) -> Answer {
        Answer {
            id: self.id,
            channel: self.channel,
            author: self.author,
            text: self.text,
            timestamp: self.timestamp,
            vector: self.vector,
            linked_question_id,
        }
    }
}

/// A ranked search result. `score` is the exact cosine similarity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub question: Question,
    pub score: f32,
}

/// One frame of the append-only record log.
#[derive(Archive, RkyvDeserialize, RkyvSerialize, Debug, Clone, PartialEq)]
#[archive(check_bytes)]
pub enum LogEntry {
    Question(Question),
    Answer(Answer),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answer_json_uses_bot_field_names() {
        let a = Answer {
            id: 1001,
            channel: 5,
            author: 9,
            text: "pip install it".into(),
            timestamp: 12.5,
            vector: vec![1.0, 0.0],
            linked_question_id: Some(1),
        };
        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["msg_id"], 1001);
        assert_eq!(json["channel_id"], 5);
        assert_eq!(json["qid"], 1);
        assert_eq!(json["ts"], 12.5);
    }

    #[test]
    fn answer_without_qid_reads_as_unlinked() {
        let raw = r#"{"msg_id":3,"channel_id":1,"author_id":2,"text":"ok","ts":0.0,"vec":[0.0]}"#;
        let a: Answer = serde_json::from_str(raw).unwrap();
        assert_eq!(a.linked_question_id, None);
    }
}
