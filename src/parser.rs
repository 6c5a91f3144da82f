use nix::unistd::Pid;

pub const PID_MARKER: &str = "$$";

/// One parsed input line. argv[0] is the program name; redirection paths are
/// taken verbatim from the line, never parsed further.
#[derive(Debug, Clone, Default)]
pub struct Command {
    pub argv: Vec<String>,
    pub in_file: Option<String>,
    pub out_file: Option<String>,
    pub background: bool,
}

/// Split a raw line into a Command. Tokens are whitespace-delimited, no
/// quoting. `<` and `>` consume the following token as a path wherever they
/// appear (a dangling marker just leaves the path absent); `&` requests
/// background execution unless foreground-only mode is on, in which case it
/// is dropped without comment. Returns None when no argv tokens remain.
pub fn parse_line(input: &str, shell_pid: Pid, foreground_only: bool) -> Option<Command> {
    let toks: Vec<&str> = input.split_whitespace().collect();
    let mut cmd = Command::default();
    let mut i = 0;
    while i < toks.len() {
        match toks[i] {
            "<" => {
                cmd.in_file = toks.get(i + 1).map(|t| t.to_string());
                i += 2;
            }
            ">" => {
                cmd.out_file = toks.get(i + 1).map(|t| t.to_string());
                i += 2;
            }
            "&" => {
                if !foreground_only {
                    cmd.background = true;
                }
                i += 1;
            }
            tok => {
                if tok.contains(PID_MARKER) {
                    cmd.argv.push(expand_pid(tok, shell_pid));
                } else {
                    cmd.argv.push(tok.to_string());
                }
                i += 1;
            }
        }
    }
    if cmd.argv.is_empty() {
        None
    } else {
        Some(cmd)
    }
}

/// Replace every non-overlapping `$$` in the token with the shell's decimal
/// pid. Occurrences are counted up front so the output is sized once, then a
/// single left-to-right pass copies and substitutes.
pub fn expand_pid(token: &str, shell_pid: Pid) -> String {
    let pid_str = shell_pid.as_raw().to_string();
    let count = token.matches(PID_MARKER).count();
    if count == 0 {
        return token.to_string();
    }
    let grown = pid_str.len().saturating_sub(PID_MARKER.len());
    let mut out = String::with_capacity(token.len() + count * grown);
    let mut rest = token;
    while let Some(at) = rest.find(PID_MARKER) {
        out.push_str(&rest[..at]);
        out.push_str(&pid_str);
        rest = &rest[at + PID_MARKER.len()..];
    }
    out.push_str(rest);
    out
}
