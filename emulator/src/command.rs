//! Console grammar for the fleet emulator.
//!
//! Lines are `verb [arguments]`. The verb is checked against [`VERBS`] first
//! so an unknown command reports as such instead of as a syntax error; the
//! remainder is parsed with `winnow` combinators.

use std::fmt;
use std::time::Duration;

use winnow::ascii::{digit1, space1};
use winnow::combinator::{alt, fail, opt, preceded};
use winnow::prelude::*;
use winnow::token::take_while;

/// Every verb the console understands.
pub const VERBS: &[&str] = &[
    "help", "tick", "current", "heartbeat", "start", "stop", "kill", "restart", "confirm",
    "clear", "enable", "manage", "status", "boots", "events", "powerloss", "crash-relay",
];

/// Device reference: by name (`nc`) or by port number (`0`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Target {
    Name(String),
    Port(u8),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Name(name) => f.write_str(name),
            Target::Port(port) => write!(f, "port {port}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Help(Option<String>),
    Tick(Duration),
    Current { target: Target, reading: i16 },
    /// `auto` of `None` sends a single heartbeat.
    Heartbeat { target: Target, auto: Option<bool> },
    Start(Target),
    Stop(Target),
    Kill(Target),
    Restart(Target),
    Confirm(Target),
    Clear(Target),
    Enable { target: Target, enabled: bool },
    Manage { target: Target, managed: bool },
    Status(Option<Target>),
    Boots(Target),
    Events,
    PowerLoss,
    CrashRelay(Target),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CommandError {
    Unknown(String),
    Syntax { verb: String, column: usize },
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::Unknown(verb) => write!(f, "unknown command `{verb}`"),
            CommandError::Syntax { verb, column } => {
                write!(f, "bad arguments for `{verb}` at column {column}")
            }
        }
    }
}

/// Parses one console line.
pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let verb = line
        .split_ascii_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !VERBS.contains(&verb.as_str()) {
        return Err(CommandError::Unknown(verb));
    }

    command
        .parse(line)
        .map_err(|err| CommandError::Syntax {
            verb,
            column: err.offset() + 1,
        })
}

fn command(input: &mut &str) -> ModalResult<Command> {
    let verb = word.parse_next(input)?.to_ascii_lowercase();
    let command = match verb.as_str() {
        "help" => Command::Help(opt(preceded(space1, word)).parse_next(input)?.map(str::to_owned)),
        "tick" => Command::Tick(preceded(space1, duration).parse_next(input)?),
        "current" => {
            let (target, reading) =
                (preceded(space1, target), preceded(space1, reading)).parse_next(input)?;
            Command::Current { target, reading }
        }
        "heartbeat" => {
            let (target, auto) =
                (preceded(space1, target), opt(preceded(space1, switch))).parse_next(input)?;
            Command::Heartbeat { target, auto }
        }
        "start" => Command::Start(preceded(space1, target).parse_next(input)?),
        "stop" => Command::Stop(preceded(space1, target).parse_next(input)?),
        "kill" => Command::Kill(preceded(space1, target).parse_next(input)?),
        "restart" => Command::Restart(preceded(space1, target).parse_next(input)?),
        "confirm" => Command::Confirm(preceded(space1, target).parse_next(input)?),
        "clear" => Command::Clear(preceded(space1, target).parse_next(input)?),
        "enable" => {
            let (target, enabled) =
                (preceded(space1, target), preceded(space1, switch)).parse_next(input)?;
            Command::Enable { target, enabled }
        }
        "manage" => {
            let (target, managed) =
                (preceded(space1, target), preceded(space1, switch)).parse_next(input)?;
            Command::Manage { target, managed }
        }
        "status" => Command::Status(opt(preceded(space1, target)).parse_next(input)?),
        "boots" => Command::Boots(preceded(space1, target).parse_next(input)?),
        "events" => Command::Events,
        "powerloss" => Command::PowerLoss,
        "crash-relay" => Command::CrashRelay(preceded(space1, target).parse_next(input)?),
        _ => return fail.parse_next(input),
    };
    Ok(command)
}

fn word<'s>(input: &mut &'s str) -> ModalResult<&'s str> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '-').parse_next(input)
}

fn target(input: &mut &str) -> ModalResult<Target> {
    alt((
        digit1.parse_to::<u8>().map(Target::Port),
        word.map(|name| Target::Name(name.to_ascii_lowercase())),
    ))
    .parse_next(input)
}

fn switch(input: &mut &str) -> ModalResult<bool> {
    alt(("on".value(true), "off".value(false))).parse_next(input)
}

fn reading(input: &mut &str) -> ModalResult<i16> {
    (opt('-'), digit1).take().parse_to().parse_next(input)
}

/// `<n>ms`, `<n>s`, `<n>m`, or `<n>h`. A bare number is seconds.
fn duration(input: &mut &str) -> ModalResult<Duration> {
    let (value, unit) = (
        digit1.parse_to::<u64>(),
        opt(alt(("ms", "s", "m", "h"))),
    )
        .parse_next(input)?;
    Ok(match unit {
        Some("ms") => Duration::from_millis(value),
        Some("m") => Duration::from_secs(value.saturating_mul(60)),
        Some("h") => Duration::from_secs(value.saturating_mul(3_600)),
        _ => Duration::from_secs(value),
    })
}
