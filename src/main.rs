use std::env;
use std::io::{self, BufRead, Write};

use anyhow::Result;
use nix::unistd::getpid;

mod exec;
mod parser;
mod signals;

fn main() -> Result<()> {
    signals::install()?;

    let shell_pid = getpid();
    let interactive = atty::is(atty::Stream::Stdin);
    let debug = env::var("MINISH_DEBUG").is_ok();
    let mut state = exec::ShellState::new();

    let stdin = io::stdin();
    let mut stdin = stdin.lock();
    let mut line = String::new();
    loop {
        if interactive {
            print!(": ");
            io::stdout().flush()?;
        }
        line.clear();
        match stdin.read_line(&mut line) {
            Ok(0) => break, // EOF
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
        let trimmed = line.trim_end_matches('\n');
        // Blank lines and comments never reach the parser.
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let cmd = match parser::parse_line(trimmed, shell_pid, signals::foreground_only()) {
            Some(cmd) => cmd,
            None => continue, // line held only directive tokens
        };
        if debug {
            eprintln!("[minish] parsed: {:?}", cmd);
        }
        exec::dispatch(&mut state, cmd);
    }
    Ok(())
}
