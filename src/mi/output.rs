//! Line parser for GDB/MI output records.
//!
//! Each line handed over by the process channel parses into exactly one
//! [`Output`]: a result record, an out-of-band record (async or stream), the
//! `(gdb) ` prompt, or pass-through console text.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, take_while_m_n};
use nom::character::complete::{char, digit1, line_ending, multispace1};
use nom::combinator::{map, map_opt, map_res, opt, value, verify};
use nom::error::{FromExternalError, ParseError};
use nom::multi::{fold, many0, separated_list0};
use nom::sequence::{delimited, preceded, separated_pair};
use nom::{IResult, Parser};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakpointEvent {
    Created,
    Deleted,
    Modified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadEvent {
    Created,
    GroupStarted,
    Exited,
    GroupExited,
    Selected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncClass {
    Running,
    Stopped,
    CmdParamChanged,
    LibraryLoaded,
    Thread(ThreadEvent),
    Breakpoint(BreakpointEvent),
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncKind {
    Exec,
    Status,
    Notify,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Console,
    Target,
    Log,
}

#[derive(Debug, Clone)]
pub struct ResultRecord {
    pub token: Option<u32>,
    pub class: ResultClass,
    pub results: Value,
}

#[derive(Debug, Clone)]
pub struct AsyncRecord {
    pub token: Option<u32>,
    pub kind: AsyncKind,
    pub class: AsyncClass,
    pub results: Value,
}

#[derive(Debug, Clone)]
pub enum Output {
    Result(ResultRecord),
    Async(AsyncRecord),
    Stream { kind: StreamKind, data: String },
    /// The `(gdb) ` end-of-response marker
    Prompt,
    /// Anything that is not MI at all, e.g. early startup chatter
    ConsoleText(String),
}

impl Output {
    pub fn parse(line: &str) -> Result<Self, String> {
        match output(line) {
            Ok((_, c)) => Ok(c),
            Err(e) => match e {
                nom::Err::Incomplete(e) => Err(format!("parsing line: incomplete {:?}", e)),
                nom::Err::Error(e) => Err(format!("parse error: {}", e)),
                nom::Err::Failure(e) => Err(format!("parse failure: {}", e)),
            },
        }
    }
}

/// parse the result class by looking for the corresponding tag, which is
/// one of: done, running, connected, error, exit
fn result_class(input: &str) -> IResult<&str, ResultClass> {
    alt((
        value(ResultClass::Done, tag("done")),
        value(ResultClass::Running, tag("running")),
        value(ResultClass::Connected, tag("connected")),
        value(ResultClass::Error, tag("error")),
        value(ResultClass::Exit, tag("exit")),
    ))
    .parse(input)
}

/// Parse a unicode sequence, of the form u{XXXX}, where XXXX is 1 to 6
/// hexadecimal numerals.
fn unicode<'a, E>(input: &'a str) -> IResult<&'a str, char, E>
where
    E: ParseError<&'a str> + FromExternalError<&'a str, std::num::ParseIntError>,
{
    let parse_hex = take_while_m_n(1, 6, |c: char| c.is_ascii_hexdigit());

    let parse_delimited_hex = preceded(char('u'), delimited(char('{'), parse_hex, char('}')));

    let parse_u32 = map_res(parse_delimited_hex, move |hex| u32::from_str_radix(hex, 16));

    map_opt(parse_u32, std::char::from_u32).parse(input)
}

/// Parse an escaped character: \n, \t, \r, \u{00AC}, etc.
fn escaped_char(input: &str) -> IResult<&str, char> {
    preceded(
        char('\\'),
        alt((
            unicode,
            value('\n', char('n')),
            value('\r', char('r')),
            value('\t', char('t')),
            value('\u{08}', char('b')),
            value('\u{0C}', char('f')),
            value('\\', char('\\')),
            value('/', char('/')),
            value('"', char('"')),
        )),
    )
    .parse(input)
}

/// Parse a backslash, followed by any amount of whitespace.
fn escaped_whitespace(input: &str) -> IResult<&str, &str> {
    preceded(char('\\'), multispace1).parse(input)
}

/// Parse a non-empty block of text that doesn't include \ or "
fn literal(input: &str) -> IResult<&str, &str> {
    let not_quote_slash = is_not("\"\\");

    verify(not_quote_slash, |s: &str| !s.is_empty()).parse(input)
}

#[derive(Debug, PartialEq, Eq, Clone)]
enum StringFragment<'a> {
    Literal(&'a str),
    EscapedChar(char),
    EscapedWS,
}

fn parse_fragment(input: &str) -> IResult<&str, StringFragment> {
    alt((
        map(literal, StringFragment::Literal),
        map(escaped_char, StringFragment::EscapedChar),
        value(StringFragment::EscapedWS, escaped_whitespace),
    ))
    .parse(input)
}

/// Parse a C-style quoted string, decoding backslash escapes.
fn string(input: &str) -> IResult<&str, String> {
    let build_string = fold(0.., parse_fragment, String::new, |mut string, fragment| {
        match fragment {
            StringFragment::Literal(s) => string.push_str(s),
            StringFragment::EscapedChar(c) => string.push(c),
            StringFragment::EscapedWS => {}
        }
        string
    });

    delimited(char('"'), build_string, char('"')).parse(input)
}

fn to_map(v: Vec<(String, Value)>) -> Map<String, Value> {
    Map::from_iter(v)
}

fn to_list(v: Vec<(String, Value)>) -> Vec<Value> {
    // The gdbmi list grammar allows `[key=value,...]`; consumers index the
    // values positionally, so the keys are dropped here.
    v.into_iter().map(|(_, value)| value).collect()
}

fn mi_value(input: &str) -> IResult<&str, Value> {
    alt((
        map(string, Value::String),
        map(
            delimited(char('{'), separated_list0(char(','), key_value), char('}')),
            |results| Value::Object(to_map(results)),
        ),
        map(delimited(char('['), separated_list0(char(','), mi_value), char(']')), Value::Array),
        map(delimited(char('['), separated_list0(char(','), key_value), char(']')), |values| {
            Value::Array(to_list(values))
        }),
    ))
    .parse(input)
}

// Against its spec, gdb(mi) sometimes emits multiple values for a single
// tuple in a comma separated list.
fn multi_valued_result(input: &str) -> IResult<&str, Value> {
    map(separated_list0(tag(","), mi_value), |mut values: Vec<Value>| {
        if values.len() == 1 {
            values.pop().expect("len == 1 => first element is guaranteed")
        } else {
            Value::Array(values)
        }
    })
    .parse(input)
}

/// key=value, not a json object
fn key_value(input: &str) -> IResult<&str, (String, Value)> {
    map(separated_pair(is_not("={}"), char('='), multi_valued_result), |(var, val)| {
        (var.to_string(), val)
    })
    .parse(input)
}

fn token(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |digits: &str| digits.parse::<u32>()).parse(input)
}

/// \[token\] "^" result-class ( "," result )* nl,
/// where result-class is one of: done, running, connected, error, exit
fn result_record(input: &str) -> IResult<&str, Output> {
    map(
        (opt(token), char('^'), result_class, many0(preceded(char(','), key_value))),
        |(t, _, c, results)| {
            Output::Result(ResultRecord { token: t, class: c, results: Value::Object(to_map(results)) })
        },
    )
    .parse(input)
}

fn async_kind(input: &str) -> IResult<&str, AsyncKind> {
    alt((
        value(AsyncKind::Exec, tag("*")),
        value(AsyncKind::Status, tag("+")),
        value(AsyncKind::Notify, tag("=")),
    ))
    .parse(input)
}

fn async_class(input: &str) -> IResult<&str, AsyncClass> {
    alt((
        value(AsyncClass::Running, tag("running")),
        value(AsyncClass::Stopped, tag("stopped")),
        value(AsyncClass::Thread(ThreadEvent::Created), tag("thread-created")),
        value(AsyncClass::Thread(ThreadEvent::GroupStarted), tag("thread-group-started")),
        value(AsyncClass::Thread(ThreadEvent::Exited), tag("thread-exited")),
        value(AsyncClass::Thread(ThreadEvent::GroupExited), tag("thread-group-exited")),
        value(AsyncClass::Thread(ThreadEvent::Selected), tag("thread-selected")),
        value(AsyncClass::CmdParamChanged, tag("cmd-param-changed")),
        value(AsyncClass::LibraryLoaded, tag("library-loaded")),
        value(AsyncClass::Breakpoint(BreakpointEvent::Created), tag("breakpoint-created")),
        value(AsyncClass::Breakpoint(BreakpointEvent::Deleted), tag("breakpoint-deleted")),
        value(AsyncClass::Breakpoint(BreakpointEvent::Modified), tag("breakpoint-modified")),
        map(is_not(",\r\n"), |msg: &str| AsyncClass::Other(msg.to_string())),
    ))
    .parse(input)
}

/// \[token\] async-kind async-class ( "," result )* nl,
/// where async-kind is one of: * (exec), + (status), = (notify)
fn async_record(input: &str) -> IResult<&str, Output> {
    map(
        (opt(token), async_kind, async_class, many0(preceded(char(','), key_value))),
        |(t, kind, class, results)| {
            Output::Async(AsyncRecord { token: t, kind, class, results: Value::Object(to_map(results)) })
        },
    )
    .parse(input)
}

fn stream_kind(input: &str) -> IResult<&str, StreamKind> {
    alt((
        value(StreamKind::Console, tag("~")),
        value(StreamKind::Target, tag("@")),
        value(StreamKind::Log, tag("&")),
    ))
    .parse(input)
}

/// stream-kind string nl,
/// where stream-kind is one of: ~ (console), @ (target), & (log)
fn stream_record(input: &str) -> IResult<&str, Output> {
    map((stream_kind, string), |(kind, msg)| Output::Stream { kind, data: msg }).parse(input)
}

fn prompt(input: &str) -> IResult<&str, Output> {
    value(Output::Prompt, tag("(gdb) ")).parse(input)
}

fn console_text(input: &str) -> IResult<&str, Output> {
    Ok(("", Output::ConsoleText(input.trim_end_matches(['\r', '\n']).to_string())))
}

fn output(input: &str) -> IResult<&str, Output> {
    map(
        (alt((result_record, async_record, stream_record, prompt, console_text)), opt(line_ending)),
        |(output, _)| output,
    )
    .parse(input)
}
