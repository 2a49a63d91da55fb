//! Scanners for URLs the agent prints.

use crate::ansi::strip_ansi;
use regex::Regex;
use std::sync::LazyLock;

static LOCAL_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://localhost|127\.0\.0\.1):(\d{1,6})").unwrap()
});

static FILE_URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"file://\S+").unwrap());

/// Lowest port accepted for previews.
pub const MIN_PREVIEW_PORT: u16 = 1024;

/// Find a local dev-server port announced in `chunk`.
///
/// Only `http(s)://localhost:<port>` and `127.0.0.1:<port>` count. Ports
/// below 1024, out of range, or equal to `server_port` are ignored.
pub fn detect_port(chunk: &str, server_port: u16) -> Option<u16> {
    let clean = strip_ansi(chunk);
    let caps = LOCAL_URL_RE.captures(&clean)?;
    let port: u32 = caps[1].parse().ok()?;
    let port = u16::try_from(port).ok()?;
    (port >= MIN_PREVIEW_PORT && port != server_port).then_some(port)
}

/// Whether `chunk` contains a `file://` URL.
pub fn mentions_file_url(chunk: &str) -> bool {
    FILE_URL_RE.is_match(&strip_ansi(chunk))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_vite_output() {
        assert_eq!(detect_port("Local: http://localhost:5173/", 0), Some(5173));
    }

    #[test]
    fn detects_loopback_address() {
        assert_eq!(detect_port("http://127.0.0.1:3000", 0), Some(3000));
        assert_eq!(detect_port("listening on 127.0.0.1:8000", 0), Some(8000));
    }

    #[test]
    fn detects_through_ansi_colors() {
        assert_eq!(
            detect_port("  \x1b[32mhttp://localhost:8080/\x1b[0m", 0),
            Some(8080)
        );
    }

    #[test]
    fn detects_https() {
        assert_eq!(detect_port("https://localhost:3000/", 0), Some(3000));
    }

    #[test]
    fn ignores_wildcard_bind() {
        assert_eq!(detect_port("Serving HTTP on 0.0.0.0 port 8080", 0), None);
    }

    #[test]
    fn ignores_bare_port_mention() {
        assert_eq!(detect_port("processing on port 9000", 0), None);
        assert_eq!(detect_port("no port here", 0), None);
    }

    #[test]
    fn ignores_out_of_range_ports() {
        assert_eq!(detect_port("http://localhost:80", 0), None);
        assert_eq!(detect_port("http://localhost:99999", 0), None);
    }

    #[test]
    fn ignores_own_server_port() {
        assert_eq!(detect_port("http://localhost:4321/", 4321), None);
    }

    #[test]
    fn file_urls() {
        assert!(mentions_file_url("open file:///tmp/index.html in a browser"));
        assert!(mentions_file_url("\x1b[4mfile:///home/u/site/index.html\x1b[0m"));
        assert!(!mentions_file_url("http://localhost:3000"));
    }
}
