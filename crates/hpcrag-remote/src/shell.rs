//! POSIX shell quoting for remote command lines.

/// Quote a single argument for a POSIX shell.
///
/// The result is always wrapped in single quotes; embedded single quotes are
/// closed, escaped and reopened (`'\''`).
pub fn quote(arg: &str) -> String {
    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for ch in arg.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}
