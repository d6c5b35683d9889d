use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use crate::model::{NewAnswer, Question};
use crate::wire::{
    BestAnswerResponse, IdRequest, LinkResponse, SearchRequest, SearchResponse, MAX_BODY,
    OP_ADD_ANSWER, OP_ADD_QUESTION, OP_BEST_ANSWER, OP_GET_QUESTION, OP_RELOAD, OP_SEARCH,
    OP_SNAPSHOT, OP_STATS, STATUS_ERR, STATUS_OK,
};
use crate::QaDb;

type Reply = Result<Vec<u8>, String>;

pub struct QaServer {
    db: Arc<QaDb>,
}

impl QaServer {
    pub fn new(db: Arc<QaDb>) -> Self {
        Self { db }
    }

    pub async fn run(&self, addr: &str) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!("qalink listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer)) => {
                    let db = self.db.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_client(socket, db).await {
                            // Ignore expected disconnections to keep logs clean
                            if e.kind() != std::io::ErrorKind::UnexpectedEof {
                                warn!(%peer, "client error: {}", e);
                            }
                        }
                    });
                }
                Err(e) => warn!("connection failed: {}", e),
            }
        }
    }
}

async fn handle_client(mut stream: TcpStream, db: Arc<QaDb>) -> std::io::Result<()> {
    loop {
        // 1. Read OpCode
        let mut op_buf = [0u8; 1];
        if stream.read_exact(&mut op_buf).await.is_err() {
            return Ok(());
        }
        let op_code = op_buf[0];

        // 2. Read Length
        let mut len_buf = [0u8; 4];
        if stream.read_exact(&mut len_buf).await.is_err() {
            return Ok(());
        }
        let length = u32::from_le_bytes(len_buf) as usize;

        // 3. Read Body
        if length > MAX_BODY {
            warn!("payload too large: {} bytes (max {})", length, MAX_BODY);
            return Ok(());
        }
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).await?;

        // 4. Process Command
        let reply = dispatch(op_code, &body, &db).await;

        let mut writer = BufWriter::new(&mut stream);
        match reply {
            Ok(bytes) => write_frame(&mut writer, STATUS_OK, &bytes).await?,
            Err(msg) => {
                let bytes = serde_json::to_vec(&msg).unwrap_or_default();
                write_frame(&mut writer, STATUS_ERR, &bytes).await?
            }
        }
        writer.flush().await?;
    }
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, status: &[u8; 2], body: &[u8]) -> std::io::Result<()> {
    writer.write_all(status).await?;
    writer.write_all(&(body.len() as u32).to_le_bytes()).await?;
    writer.write_all(body).await
}

async fn dispatch(op_code: u8, body: &[u8], db: &Arc<QaDb>) -> Reply {
    match op_code {
        // Writes
        OP_ADD_QUESTION => {
            let question: Question = parse(body)?;
            db.add_question(question).map_err(|e| e.to_string())?;
            encode(&())
        }
        OP_ADD_ANSWER => {
            let answer: NewAnswer = parse(body)?;
            let linked_question_id = db.add_answer(answer).map_err(|e| e.to_string())?;
            encode(&LinkResponse { linked_question_id })
        }

        // Reads
        OP_SEARCH => {
            let req: SearchRequest = parse(body)?;
            let defaults = db.config().store.search;
            let hits = db
                .search_questions(
                    &req.vector,
                    req.top_k.unwrap_or(defaults.top_k),
                    req.min_similarity.unwrap_or(defaults.min_similarity),
                )
                .map_err(|e| e.to_string())?;
            encode(&SearchResponse { hits })
        }
        OP_BEST_ANSWER => {
            let IdRequest { id } = parse(body)?;
            let question = db
                .get_question(id)
                .map_err(|e| e.to_string())?
                .ok_or_else(|| format!("unknown question id {}", id))?;
            let answer = db.best_answer(id).map_err(|e| e.to_string())?;
            encode(&BestAnswerResponse { question, answer })
        }
        OP_GET_QUESTION => {
            let IdRequest { id } = parse(body)?;
            encode(&db.get_question(id).map_err(|e| e.to_string())?)
        }
        OP_STATS => encode(&db.stats().map_err(|e| e.to_string())?),

        // Maintenance: heavy I/O goes to the blocking pool
        OP_RELOAD => {
            let db = db.clone();
            let stats = run_blocking(move || db.reload()).await?;
            encode(&stats)
        }
        OP_SNAPSHOT => {
            let db = db.clone();
            let stats = run_blocking(move || {
                let dir = db.config().snapshot_dir();
                db.export_snapshot(&dir)
            })
            .await?;
            encode(&stats)
        }

        _ => Err(format!("unknown opcode 0x{:02X}", op_code)),
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("task failed: {}", e)),
    }
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, String> {
    serde_json::from_slice(body).map_err(|e| format!("bad request body: {}", e))
}

fn encode<T: Serialize>(value: &T) -> Reply {
    serde_json::to_vec(value).map_err(|e| e.to_string())
}
