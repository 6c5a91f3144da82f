//! Signal plumbing for the shell: the SIGCHLD reaper that collects finished
//! background children, the SIGTSTP toggle for foreground-only mode, and the
//! dispositions the shell and its children need. Everything executed inside
//! a handler sticks to async-signal-safe operations: atomic flag updates and
//! raw write(2) of messages built in fixed stack buffers.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use nix::sys::signal::{
    sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal,
};

/// Foreground-only mode. Written only by the SIGTSTP handler, read by the
/// parser when it meets a `&` token.
static FOREGROUND_ONLY: AtomicBool = AtomicBool::new(false);

const ENTER_NOTICE: &[u8] = b"\nEntering foreground-only mode (& is now ignored)\n";
const EXIT_NOTICE: &[u8] = b"\nExiting foreground-only mode\n";

pub fn foreground_only() -> bool {
    FOREGROUND_ONLY.load(Ordering::SeqCst)
}

/// Install the shell's dispositions, once at startup: reap children on
/// SIGCHLD, toggle foreground-only mode on SIGTSTP, ignore SIGINT so Ctrl-C
/// only reaches the foreground child. SA_RESTART keeps the read loop's
/// blocking read going across deliveries.
pub fn install() -> Result<()> {
    let reap = SigAction::new(
        SigHandler::Handler(handle_sigchld),
        SaFlags::SA_RESTART | SaFlags::SA_NOCLDSTOP,
        SigSet::empty(),
    );
    let toggle = SigAction::new(
        SigHandler::Handler(handle_sigtstp),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe {
        sigaction(Signal::SIGCHLD, &reap)?;
        sigaction(Signal::SIGTSTP, &toggle)?;
        sigaction(Signal::SIGINT, &ignore)?;
    }
    Ok(())
}

/// Called in the forked child before exec: SIGINT back to default so the
/// command can be interrupted from the keyboard, SIGTSTP to ignore so the
/// mode toggle never reaches children. The signal mask survives both fork
/// and exec, so the SIGCHLD block taken for a foreground launch must be
/// lifted here or the command would run with SIGCHLD masked.
pub fn reset_for_child() {
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = sigaction(Signal::SIGINT, &default);
        let _ = sigaction(Signal::SIGTSTP, &ignore);
    }
    unblock_sigchld();
}

/// Shield the shell from the group-wide SIGTERM it sends on `exit`.
pub fn ignore_sigterm() {
    let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
    unsafe {
        let _ = sigaction(Signal::SIGTERM, &ignore);
    }
}

fn sigchld_set() -> SigSet {
    let mut set = SigSet::empty();
    set.add(Signal::SIGCHLD);
    set
}

/// Hold SIGCHLD from just before a foreground fork until the wait finishes,
/// so the reaper cannot collect the foreground child out from under waitpid
/// even when the child exits instantly. Deliveries arriving meanwhile stay
/// pending and fire on unblock.
pub fn block_sigchld() {
    let _ = sigprocmask(SigmaskHow::SIG_BLOCK, Some(&sigchld_set()), None);
}

pub fn unblock_sigchld() {
    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&sigchld_set()), None);
}

extern "C" fn handle_sigtstp(_: libc::c_int) {
    let _errno = ErrnoGuard::save();
    if FOREGROUND_ONLY.load(Ordering::SeqCst) {
        raw_write(EXIT_NOTICE);
        FOREGROUND_ONLY.store(false, Ordering::SeqCst);
    } else {
        raw_write(ENTER_NOTICE);
        FOREGROUND_ONLY.store(true, Ordering::SeqCst);
    }
}

/// Drain every currently-reapable child without blocking and report each
/// outcome. Multiple children finishing close together collapse into fewer
/// deliveries, so the loop must keep going until WNOHANG has nothing left.
/// Foreground children are reaped by the launcher under a blocked SIGCHLD,
/// so whatever turns up here is background work; the execution outcome
/// record is never touched from this context.
extern "C" fn handle_sigchld(_: libc::c_int) {
    let _errno = ErrnoGuard::save();
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        let mut msg = NoticeBuf::new();
        msg.push(b"Background process with PID ");
        msg.push_dec(pid as i64);
        if libc::WIFSIGNALED(status) {
            msg.push(b" terminated by signal ");
            msg.push_dec(libc::WTERMSIG(status) as i64);
        } else {
            msg.push(b" exited with status ");
            msg.push_dec(libc::WEXITSTATUS(status) as i64);
        }
        msg.push(b"\n");
        raw_write(msg.bytes());
    }
}

/// Handlers interrupt arbitrary main-flow code, and the waitpid/write calls
/// they make clobber errno; save it on entry and put it back on the way out.
struct ErrnoGuard(libc::c_int);

impl ErrnoGuard {
    fn save() -> Self {
        ErrnoGuard(unsafe { *libc::__errno_location() })
    }
}

impl Drop for ErrnoGuard {
    fn drop(&mut self) {
        unsafe { *libc::__errno_location() = self.0 };
    }
}

/// write(2) is on the async-signal-safe list; these notices are short enough
/// that a partial write is not a practical concern.
fn raw_write(bytes: &[u8]) {
    unsafe {
        libc::write(
            libc::STDOUT_FILENO,
            bytes.as_ptr() as *const libc::c_void,
            bytes.len(),
        );
    }
}

/// Message assembly without allocation, for use inside handlers. Overflow
/// truncates rather than spilling past the buffer.
struct NoticeBuf {
    buf: [u8; 96],
    len: usize,
}

impl NoticeBuf {
    fn new() -> Self {
        NoticeBuf { buf: [0; 96], len: 0 }
    }

    fn push(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.buf.len() - self.len);
        self.buf[self.len..self.len + n].copy_from_slice(&bytes[..n]);
        self.len += n;
    }

    fn push_dec(&mut self, mut n: i64) {
        if n < 0 {
            self.push(b"-");
            n = -n;
        }
        let mut digits = [0u8; 20];
        let mut i = digits.len();
        loop {
            i -= 1;
            digits[i] = b'0' + (n % 10) as u8;
            n /= 10;
            if n == 0 {
                break;
            }
        }
        self.push(&digits[i..]);
    }

    fn bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}
