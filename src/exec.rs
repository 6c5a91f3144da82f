//! Dispatch and process lifecycle: built-ins run in-process, everything else
//! forks, applies redirection in the child, and execvp's the target.

use std::convert::Infallible;
use std::env;
use std::ffi::CString;
use std::process;

use nix::fcntl::{open, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{close, dup2, execvp, fork, ForkResult, Pid};
use thiserror::Error;

use crate::parser::Command;
use crate::signals;

/// Result of the most recently completed foreground command, as reported by
/// the `status` built-in. Exactly one tag at a time; background completions
/// never overwrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Exited(i32),
    Signaled(i32),
}

pub struct ShellState {
    pub last: Outcome,
}

impl ShellState {
    pub fn new() -> Self {
        // A fresh shell reports exit value 0.
        ShellState { last: Outcome::Exited(0) }
    }
}

/// Failures on the child side of the fork. Each is fatal to the child only:
/// the diagnostic goes to stderr and the child exits 1.
#[derive(Debug, Error)]
enum LaunchError {
    #[error("Input redirection failed: {0}")]
    RedirectIn(nix::Error),
    #[error("Output redirection failed: {0}")]
    RedirectOut(nix::Error),
    #[error("Command execution failed: {0}")]
    Exec(nix::Error),
}

/// Route a parsed command: `exit`, `cd` and `status` are handled in-process
/// (case-sensitive match on argv[0]), anything else is launched externally.
pub fn dispatch(state: &mut ShellState, cmd: Command) {
    match cmd.argv[0].as_str() {
        "exit" => builtin_exit(),
        "cd" => builtin_cd(&cmd.argv),
        "status" => builtin_status(state),
        _ => launch(state, &cmd),
    }
}

/// Take down every process in the shell's process group, background children
/// included, then leave with status 0. The shell ignores SIGTERM first so
/// the group-wide signal does not cut down the shell before it can exit
/// cleanly.
fn builtin_exit() -> ! {
    signals::ignore_sigterm();
    let _ = kill(Pid::from_raw(0), Signal::SIGTERM);
    process::exit(0);
}

/// `cd` with no argument goes to $HOME. Failure is reported and the working
/// directory stays put; the execution outcome is never updated here.
fn builtin_cd(argv: &[String]) {
    let target = match argv.get(1) {
        Some(path) => path.clone(),
        None => match env::var("HOME") {
            Ok(home) => home,
            Err(_) => {
                eprintln!("cd failed: HOME is not set");
                return;
            }
        },
    };
    if let Err(e) = env::set_current_dir(&target) {
        eprintln!("cd failed: {}", e);
    }
}

fn builtin_status(state: &ShellState) {
    match state.last {
        Outcome::Exited(code) => println!("exit value: {}", code),
        Outcome::Signaled(signum) => println!("terminated by signal {}", signum),
    }
}

/// Fork and run an external command. Background commands are announced and
/// left to the SIGCHLD reaper; foreground commands are waited on and their
/// outcome recorded. A failed fork means the shell cannot do its one job, so
/// that is fatal to the whole program.
///
/// For foreground commands SIGCHLD is blocked before the fork: a child can
/// exit before the parent even reaches its wait, and a delivery in that
/// window would let the reaper collect the child, misreport it as a
/// background completion, and leave the outcome record stale. The child
/// clears the inherited mask in reset_for_child.
fn launch(state: &mut ShellState, cmd: &Command) {
    if !cmd.background {
        signals::block_sigchld();
    }
    match unsafe { fork() } {
        Err(e) => {
            eprintln!("fork failed: {}", e);
            process::exit(1);
        }
        Ok(ForkResult::Child) => {
            signals::reset_for_child();
            if let Err(e) = run_child(cmd) {
                eprintln!("{}", e);
            }
            process::exit(1);
        }
        Ok(ForkResult::Parent { child }) => {
            if cmd.background {
                println!("Background process ID: {}", child);
            } else {
                wait_foreground(state, child);
            }
        }
    }
}

/// Child side: wire up redirections onto fds 0/1, then replace the process
/// image. Only ever returns with an error; on success execvp does not come
/// back.
fn run_child(cmd: &Command) -> Result<Infallible, LaunchError> {
    if let Some(path) = &cmd.in_file {
        let fd = open(path.as_str(), OFlag::O_RDONLY, Mode::empty())
            .map_err(LaunchError::RedirectIn)?;
        dup2(fd, libc::STDIN_FILENO).map_err(LaunchError::RedirectIn)?;
        let _ = close(fd);
    }
    if let Some(path) = &cmd.out_file {
        let fd = open(
            path.as_str(),
            OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_TRUNC,
            Mode::from_bits_truncate(0o644),
        )
        .map_err(LaunchError::RedirectOut)?;
        dup2(fd, libc::STDOUT_FILENO).map_err(LaunchError::RedirectOut)?;
        let _ = close(fd);
    }
    let argv: Vec<CString> = cmd
        .argv
        .iter()
        .map(|a| CString::new(a.as_str()))
        .collect::<Result<_, _>>()
        .map_err(|_| LaunchError::Exec(nix::Error::EINVAL))?;
    execvp(&argv[0], &argv).map_err(LaunchError::Exec)
}

/// Block until this specific child terminates, then record how it went.
/// SIGCHLD has been held since before the fork and stays held through the
/// wait, so the async reaper cannot steal the child; pending background
/// completions surface right after the unblock.
fn wait_foreground(state: &mut ShellState, child: Pid) {
    let status = waitpid(child, None);
    signals::unblock_sigchld();
    match status {
        Ok(WaitStatus::Exited(_, code)) => state.last = Outcome::Exited(code),
        Ok(WaitStatus::Signaled(_, sig, _)) => state.last = Outcome::Signaled(sig as i32),
        Ok(_) => {}
        Err(e) => eprintln!("waitpid failed: {}", e),
    }
}
