use std::io;
use std::path::PathBuf;

#[allow(dead_code)]
#[path = "../command.rs"]
mod command;
#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, SessionOptions};

const SCENARIOS: &[(&str, &[&str])] = &[
    (
        "current-fault",
        &[
            "heartbeat nc on",
            "current nc 60",
            "tick 5s",
            "current nc 500",
            "tick 16s",
            "current nc 60",
            "tick 5s",
            "status nc",
            "boots nc",
        ],
    ),
    (
        "heartbeat-loss",
        &[
            "enable x1 on",
            "restart x1",
            "heartbeat gn",
            "tick 30s",
            "heartbeat gn",
            "tick 61s",
            "status gn",
            "stop nc",
            "tick 10s",
            "confirm nc",
            "tick 1s",
            "status",
        ],
    ),
    (
        "relay-crash",
        &[
            "tick 20s",
            "crash-relay cs",
            "status cs",
            "tick 15s",
            "status",
            "events",
        ],
    ),
];

fn main() -> io::Result<()> {
    for (name, script) in SCENARIOS {
        record_scenario(name, script)?;
    }
    Ok(())
}

fn record_scenario(name: &str, script: &[&str]) -> io::Result<()> {
    let mut session = Session::new(SessionOptions {
        image: None,
        transcript: Some(PathBuf::from(format!("transcripts/{name}.log"))),
    })?;
    session.boot_banner()?;
    for line in script {
        session.handle_command(line)?;
    }
    Ok(())
}
