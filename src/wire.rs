//! TCP framing shared by the server and the REPL client.
//!
//! Request:  `[OpCode (1b)][Length (4b LE)][JSON body]`
//! Response: `[Status "OK" | "ER" (2b)][Length (4b LE)][JSON body]`
//!
//! Question and answer writes send the `Question` / `NewAnswer` JSON as-is.
//! An `ER` body is a JSON string holding the error message.

use std::io::{self, Read, Write};

use serde::{Deserialize, Serialize};

use crate::model::{MessageId, Question, SearchHit};

// --- OpCodes ---
pub const OP_ADD_QUESTION: u8 = 0x01;
pub const OP_ADD_ANSWER: u8 = 0x02;
pub const OP_SEARCH: u8 = 0x03;
pub const OP_BEST_ANSWER: u8 = 0x04;
pub const OP_GET_QUESTION: u8 = 0x05;
pub const OP_STATS: u8 = 0x06;
pub const OP_RELOAD: u8 = 0x07;
pub const OP_SNAPSHOT: u8 = 0x08;

pub const STATUS_OK: &[u8; 2] = b"OK";
pub const STATUS_ERR: &[u8; 2] = b"ER";

/// 16 MiB; a 384-dim vector as JSON is a few KiB.
pub const MAX_BODY: usize = 16 * 1024 * 1024;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub vector: Vec<f32>,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub min_similarity: Option<f32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRequest {
    pub id: MessageId,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LinkResponse {
    pub linked_question_id: Option<MessageId>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct BestAnswerResponse {
    pub question: Question,
    pub answer: Option<String>,
}

pub fn write_request<W: Write>(w: &mut W, op: u8, body: &[u8]) -> io::Result<()> {
    w.write_all(&[op])?;
    w.write_all(&(body.len() as u32).to_le_bytes())?;
    w.write_all(body)?;
    w.flush()
}

/// Blocking read of one response frame. `Ok(Err(msg))` is a server-side error.
pub fn read_response<R: Read>(r: &mut R) -> io::Result<Result<Vec<u8>, String>> {
    let mut status = [0u8; 2];
    r.read_exact(&mut status)?;

    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_BODY {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("response too large: {} bytes", len)));
    }

    let mut body = vec![0u8; len];
    r.read_exact(&mut body)?;

    if &status == STATUS_OK {
        Ok(Ok(body))
    } else {
        let msg = serde_json::from_slice::<String>(&body)
            .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
        Ok(Err(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn request_frame_layout() {
        let mut buf = Vec::new();
        write_request(&mut buf, OP_STATS, b"{}").unwrap();
        assert_eq!(buf, vec![OP_STATS, 2, 0, 0, 0, b'{', b'}']);
    }

    #[test]
    fn error_frame_yields_message() {
        let body = serde_json::to_vec("unknown question id 4").unwrap();
        let mut frame = STATUS_ERR.to_vec();
        frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
        frame.extend_from_slice(&body);

        let resp = read_response(&mut Cursor::new(frame)).unwrap();
        assert_eq!(resp, Err("unknown question id 4".to_string()));
    }

    #[test]
    fn search_request_defaults_are_optional() {
        let req: SearchRequest = serde_json::from_str(r#"{"vector":[1.0,0.0]}"#).unwrap();
        assert_eq!(req.top_k, None);
        assert_eq!(req.min_similarity, None);
    }
}
