//! Command lines for local and remote cohort members.

use std::path::Path;

/// Quote `s` as a single POSIX shell word.
pub fn shell_quote(s: &str) -> String {
    if !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c))
    {
        return s.to_string();
    }
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Escape `s` for use inside a double-quoted shell string.
pub fn escape_double_quoted(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Prefix `command` with an export of the library search path.
pub fn with_library_path(command: &str, library_path: Option<&str>) -> String {
    match library_path {
        Some(path) => format!("export LD_LIBRARY_PATH={}; {command}", shell_quote(path)),
        None => command.to_string(),
    }
}

/// `<shell> -x <host> "cd <dir>; <slave-entry> <ordinal> <command>"`.
///
/// The command reaches the slave as one argument: it is quoted for the
/// remote shell, and the whole remote line is escaped once for the local
/// shell that runs the remote-shell client.
pub fn remote_invocation(
    remote_shell: &str,
    host: &str,
    work_dir: &Path,
    slave_entry: &str,
    ordinal: usize,
    command: &str,
) -> String {
    let remote_line = format!(
        "cd {}; {slave_entry} {ordinal} {}",
        shell_quote(&work_dir.to_string_lossy()),
        shell_quote(command)
    );
    format!(
        "{remote_shell} -x {host} \"{}\"",
        escape_double_quoted(&remote_line)
    )
}
