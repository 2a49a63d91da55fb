//! Escape-sequence and control-character stripping.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

/// CSI sequences (`ESC [ params final`) and OSC strings terminated by BEL or ST.
static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[a-zA-Z]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").unwrap()
});

static CONTROL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\x00-\x1f\x7f]").unwrap());

/// Remove terminal escape sequences, leaving the printable text.
pub fn strip_ansi(input: &str) -> Cow<'_, str> {
    if !input.contains('\x1b') {
        return Cow::Borrowed(input);
    }
    ANSI_RE.replace_all(input, "")
}

/// Remove C0 control characters and DEL.
pub fn strip_control(input: &str) -> Cow<'_, str> {
    CONTROL_RE.replace_all(input, "")
}
