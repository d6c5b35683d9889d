use nom::{
    branch::alt,
    bytes::complete::{tag_no_case, take_until},
    character::complete::{char, digit1, multispace0, multispace1},
    combinator::{map_res, opt, value},
    multi::separated_list1,
    number::complete::{double, float},
    sequence::{delimited, preceded, tuple},
    IResult,
};

use crate::model::{AuthorId, ChannelId, MessageId};

#[derive(Debug, PartialEq, Clone)]
pub enum Command {
    Question {
        id: MessageId,
        channel: ChannelId,
        author: Option<AuthorId>,
        at: Option<f64>,
        vector: Vec<f32>,
        text: String,
    },
    Answer {
        id: MessageId,
        channel: ChannelId,
        author: Option<AuthorId>,
        at: Option<f64>,
        reply_to: Option<MessageId>,
        vector: Vec<f32>,
        text: String,
    },
    Search { vector: Vec<f32>, limit: Option<usize>, min_similarity: Option<f32> },
    Best { id: MessageId },
    Get { id: MessageId },
    Stats,
    Reload,
    Snapshot,
    Help,
    Exit,
}

// --- BASIC PARSERS ---

fn parse_u64(input: &str) -> IResult<&str, u64> {
    map_res(digit1, |s: &str| s.parse::<u64>())(input)
}

fn parse_vector(input: &str) -> IResult<&str, Vec<f32>> {
    delimited(
        char('['),
        delimited(
            multispace0,
            separated_list1(tuple((multispace0, char(','), multispace0)), float),
            multispace0,
        ),
        char(']'),
    )(input)
}

fn parse_quoted_string(input: &str) -> IResult<&str, String> {
    let (input, _) = char('"')(input)?;
    let (input, content) = take_until("\"")(input)?;
    let (input, _) = char('"')(input)?;
    Ok((input, content.to_string()))
}

// --- HELPERS ---
fn ws<'a, F, O, E: nom::error::ParseError<&'a str>>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O, E>
where F: FnMut(&'a str) -> IResult<&'a str, O, E> {
    delimited(multispace0, inner, multispace0)
}

fn tag_ci(t: &'static str) -> impl FnMut(&str) -> IResult<&str, &str> {
    move |input| tag_no_case(t)(input)
}

fn keyword_u64(kw: &'static str) -> impl FnMut(&str) -> IResult<&str, u64> {
    move |input| preceded(ws(tag_ci(kw)), parse_u64)(input)
}

// --- COMMAND PARSERS ---

// QUESTION <id> CHANNEL <c> [AUTHOR <a>] [AT <ts>] VECTOR [..] TEXT "..."
fn parse_question(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("QUESTION")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_u64(input)?;
    let (input, channel) = keyword_u64("CHANNEL")(input)?;
    let (input, author) = opt(keyword_u64("AUTHOR"))(input)?;
    let (input, at) = opt(preceded(ws(tag_ci("AT")), double))(input)?;
    let (input, vector) = preceded(ws(tag_ci("VECTOR")), parse_vector)(input)?;
    let (input, text) = preceded(ws(tag_ci("TEXT")), parse_quoted_string)(input)?;
    Ok((input, Command::Question { id, channel, author, at, vector, text }))
}

// ANSWER <id> CHANNEL <c> [AUTHOR <a>] [AT <ts>] [REPLY <qid>] VECTOR [..] TEXT "..."
fn parse_answer(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("ANSWER")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_u64(input)?;
    let (input, channel) = keyword_u64("CHANNEL")(input)?;
    let (input, author) = opt(keyword_u64("AUTHOR"))(input)?;
    let (input, at) = opt(preceded(ws(tag_ci("AT")), double))(input)?;
    let (input, reply_to) = opt(keyword_u64("REPLY"))(input)?;
    let (input, vector) = preceded(ws(tag_ci("VECTOR")), parse_vector)(input)?;
    let (input, text) = preceded(ws(tag_ci("TEXT")), parse_quoted_string)(input)?;
    Ok((input, Command::Answer { id, channel, author, at, reply_to, vector, text }))
}

// SEARCH [..] [LIMIT k] [MIN s]
fn parse_search(input: &str) -> IResult<&str, Command> {
    let (input, _) = alt((tag_ci("SEARCH"), tag_ci("FIND")))(input)?;
    let (input, vector) = preceded(multispace0, parse_vector)(input)?;

    let (input, limit) = opt(preceded(
        ws(tag_ci("LIMIT")),
        map_res(digit1, |s: &str| s.parse::<usize>()),
    ))(input)?;

    let (input, min_similarity) = opt(preceded(ws(tag_ci("MIN")), float))(input)?;

    Ok((input, Command::Search { vector, limit, min_similarity }))
}

fn parse_best(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("BEST")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_u64(input)?;
    Ok((input, Command::Best { id }))
}

fn parse_get(input: &str) -> IResult<&str, Command> {
    let (input, _) = tag_ci("GET")(input)?;
    let (input, _) = multispace1(input)?;
    let (input, id) = parse_u64(input)?;
    Ok((input, Command::Get { id }))
}

fn parse_simple(input: &str) -> IResult<&str, Command> {
    alt((
        value(Command::Stats, tag_ci("STATS")),
        value(Command::Reload, tag_ci("RELOAD")),
        value(Command::Snapshot, tag_ci("SNAPSHOT")),
        value(Command::Help, tag_ci("HELP")),
        value(Command::Exit, alt((tag_ci("EXIT"), tag_ci("QUIT")))),
    ))(input)
}

pub fn parse_command(input: &str) -> Result<Command, String> {
    let input = input.trim();
    let result = alt((
        parse_question,
        parse_answer,
        parse_search,
        parse_best,
        parse_get,
        parse_simple,
    ))(input);

    match result {
        Ok((remainder, cmd)) => {
            if !remainder.trim().is_empty() {
                return Err(format!("Unexpected tokens at end: '{}'", remainder));
            }
            Ok(cmd)
        }
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            // e.input contains the slice where parsing failed
            let context: String = e.input.chars().take(20).collect();
            let context = if context.len() < e.input.len() { format!("{}...", context) } else { context };
            Err(format!("Invalid syntax near: '{}'", context))
        }
        Err(nom::Err::Incomplete(_)) => Err("Incomplete command.".to_string()),
    }
}
