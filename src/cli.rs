use std::io::{self, Write};
use std::net::TcpStream;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;

use qalink::model::{NewAnswer, Question};
use qalink::parser::{self, Command};
use qalink::wire::{
    self, BestAnswerResponse, IdRequest, LinkResponse, SearchRequest, SearchResponse, OP_ADD_ANSWER,
    OP_ADD_QUESTION, OP_BEST_ANSWER, OP_GET_QUESTION, OP_RELOAD, OP_SEARCH, OP_SNAPSHOT, OP_STATS,
};
use qalink::Stats;

fn host() -> String {
    std::env::var("QALINK_ADDR").unwrap_or_else(|_| "127.0.0.1:9100".to_string())
}

fn main() {
    print_banner();

    let host = host();
    match TcpStream::connect(&host) {
        Ok(_) => println!("[\u{2713}] Connected to qalink at {}!", host),
        Err(_) => {
            println!("[\u{2717}] Could not connect to server at {}.", host);
            println!("    Make sure to run 'cargo run --release --bin qalink' in another terminal.");
            return;
        }
    }
    println!("Type 'HELP' for supported commands or 'EXIT' to quit.\n");

    let stdin = io::stdin();
    let mut buffer = String::new();

    loop {
        print!("qalink> ");
        if io::stdout().flush().is_err() {
            break;
        }
        buffer.clear();

        match stdin.read_line(&mut buffer) {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        if buffer.trim().is_empty() {
            continue;
        }

        match parser::parse_command(&buffer) {
            Ok(cmd) => {
                if let Err(e) = execute_command(&host, cmd) {
                    println!("[\u{26a0}\u{fe0f} Error] {}", e);
                }
            }
            Err(e) => {
                println!("[\u{2717} Syntax Error] {}", e);
                if buffer.contains("...") {
                    println!("    \u{2139}\u{fe0f}  Hint: Ellipses (...) are not supported. Please close the list: [0.1, 0.5]");
                } else if buffer.to_uppercase().starts_with("SEARCH") {
                    println!("    \u{2139}\u{fe0f}  Hint: Try 'SEARCH [0.1, ...] LIMIT 5 MIN 0.75'");
                }
            }
        }
    }
}

fn print_banner() {
    println!("\n==================================================");
    println!("   qalink CLI - question/answer linking store");
    println!("==================================================\n");
}

fn print_help() {
    println!("\n--- Available Commands ---");
    println!("1. QUESTION: QUESTION <id> CHANNEL <c> [AUTHOR <a>] [AT <ts>] VECTOR [..] TEXT \"...\"");
    println!("2. ANSWER:   ANSWER <id> CHANNEL <c> [AUTHOR <a>] [AT <ts>] [REPLY <qid>] VECTOR [..] TEXT \"...\"");
    println!("3. SEARCH:   SEARCH [0.1, ...] [LIMIT 5] [MIN 0.75]");
    println!("4. BEST:     BEST <question id>");
    println!("5. GET:      GET <question id>");
    println!("6. STATS / RELOAD / SNAPSHOT");
    println!("7. EXIT:     Quit\n");
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or_default()
}

fn execute_command(host: &str, cmd: Command) -> Result<(), String> {
    match cmd {
        Command::Help => {
            print_help();
            Ok(())
        }
        Command::Question { id, channel, author, at, vector, text } => {
            let question = Question {
                id,
                channel,
                author: author.unwrap_or_default(),
                text,
                timestamp: at.unwrap_or_else(now_secs),
                vector,
            };
            let _: () = call(host, OP_ADD_QUESTION, &question)?;
            println!("[\u{2713} OK] Stored question {}", id);
            Ok(())
        }
        Command::Answer { id, channel, author, at, reply_to, vector, text } => {
            let answer = NewAnswer {
                id,
                channel,
                author: author.unwrap_or_default(),
                text,
                timestamp: at.unwrap_or_else(now_secs),
                vector,
                reply_to,
            };
            let resp: LinkResponse = call(host, OP_ADD_ANSWER, &answer)?;
            match resp.linked_question_id {
                Some(qid) => println!("[\u{2713} OK] Answer {} linked to question {}", id, qid),
                None => println!("[\u{2713} OK] Answer {} stored unlinked", id),
            }
            Ok(())
        }
        Command::Search { vector, limit, min_similarity } => {
            let req = SearchRequest { vector, top_k: limit, min_similarity };
            let resp: SearchResponse = call(host, OP_SEARCH, &req)?;
            println!("\nFound {} matches:", resp.hits.len());
            for hit in resp.hits {
                println!("  \u{2022} [{}] {} (Sim: {:.4})", hit.question.id, hit.question.text, hit.score);
            }
            println!();
            Ok(())
        }
        Command::Best { id } => {
            let resp: BestAnswerResponse = call(host, OP_BEST_ANSWER, &IdRequest { id })?;
            println!("Q: {}", resp.question.text);
            match resp.answer {
                Some(text) => println!("A: {}", text),
                None => println!("[\u{2717}] No linked answers yet."),
            }
            Ok(())
        }
        Command::Get { id } => {
            let resp: Option<Question> = call(host, OP_GET_QUESTION, &IdRequest { id })?;
            match resp {
                Some(q) => println!("[{}] channel={} author={} ts={} \"{}\"", q.id, q.channel, q.author, q.timestamp, q.text),
                None => println!("[\u{2717}] ID Not Found."),
            }
            Ok(())
        }
        Command::Stats => print_stats(call(host, OP_STATS, &())?),
        Command::Reload => print_stats(call(host, OP_RELOAD, &())?),
        Command::Snapshot => print_stats(call(host, OP_SNAPSHOT, &())?),
        Command::Exit => std::process::exit(0),
    }
}

fn print_stats(stats: Stats) -> Result<(), String> {
    println!(
        "questions={} answers={} linked={} channels={} buckets={} log={}B",
        stats.questions, stats.answers, stats.linked_answers, stats.channels, stats.buckets, stats.log_bytes
    );
    Ok(())
}

// --- NETWORK ---

fn call<Req: Serialize, Resp: DeserializeOwned>(host: &str, op: u8, req: &Req) -> Result<Resp, String> {
    let body = serde_json::to_vec(req).map_err(|e| e.to_string())?;
    let mut stream = TcpStream::connect(host).map_err(|e| e.to_string())?;
    wire::write_request(&mut stream, op, &body).map_err(|e| e.to_string())?;

    let reply = wire::read_response(&mut stream).map_err(|e| e.to_string())??;
    serde_json::from_slice(&reply).map_err(|e| format!("bad response: {}", e))
}
