//! Python `repr()`-style string quoting for host-controlled values spliced
//! into device-side statements (archive names, device paths).
//!
//! Every helper function shipped to the device is a fixed, parameter-free
//! definition; the host never splices a user-controlled string into source
//! text directly. Instead it calls the helper with `repr()`-quoted
//! arguments, so a path containing a quote or backslash can never break out
//! of the literal.

/// Quotes `value` the way Python's `repr()` would quote a `str`: wrapped in
/// single quotes, with backslashes, single quotes, and control characters
/// escaped.
#[must_use]
pub fn py_repr(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\x{:02x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}
