mod command;
mod session;

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process;

use session::{Session, SessionOptions};

fn main() -> io::Result<()> {
    let options = parse_options().unwrap_or_else(|err| {
        eprintln!("{err}");
        eprintln!("Usage: fleet-emulator [--image <path>] [--transcript <path>]");
        process::exit(2);
    });

    let stdin = io::stdin();
    let mut reader = stdin.lock();
    let stdout = io::stdout();
    let mut writer = stdout.lock();
    let mut session = Session::new(options)?;
    let mut line = String::new();

    writeln!(
        writer,
        "Fleet Supervisor Emulator ready. Type `help` for commands or `exit` to quit."
    )?;
    for banner in session.boot_banner()? {
        writeln!(writer, "{banner}")?;
    }

    loop {
        line.clear();
        write!(writer, "> ")?;
        writer.flush()?;

        let bytes_read = reader.read_line(&mut line)?;
        if bytes_read == 0 {
            writeln!(writer)?;
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if should_terminate(trimmed) {
            writeln!(writer, "Session closed.")?;
            break;
        }

        let responses = session.handle_command(trimmed)?;
        for response in responses {
            writeln!(writer, "{response}")?;
        }
    }

    Ok(())
}

fn should_terminate(input: &str) -> bool {
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn parse_options() -> Result<SessionOptions, String> {
    let mut options = SessionOptions::default();
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) => (flag.to_string(), Some(value.to_string())),
            None => (arg, None),
        };
        let slot = match flag.as_str() {
            "--image" => &mut options.image,
            "--transcript" => &mut options.transcript,
            other => return Err(format!("Unknown argument `{other}`")),
        };
        let value = inline
            .or_else(|| args.next())
            .ok_or_else(|| format!("Expected value after {flag}"))?;
        *slot = Some(PathBuf::from(value));
    }
    Ok(options)
}
