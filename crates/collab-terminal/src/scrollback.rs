//! Bounded output history replayed to clients that (re)join a session.
//!
//! Keeps the most recent output up to [`MAX_SCROLLBACK_BYTES`]. Trimming
//! always lands on a UTF-8 character boundary, so the retained text is an
//! exact suffix of everything pushed and never exceeds the cap.

/// Maximum retained output (50 KiB).
pub const MAX_SCROLLBACK_BYTES: usize = 50 * 1024;

#[derive(Debug, Clone)]
pub struct Scrollback {
    buf: String,
    max_bytes: usize,
}

impl Scrollback {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            buf: String::new(),
            max_bytes,
        }
    }

    /// Append output, evicting the oldest bytes beyond the cap.
    pub fn push(&mut self, data: &str) {
        self.buf.push_str(data);
        if self.buf.len() > self.max_bytes {
            let mut cut = self.buf.len() - self.max_bytes;
            while !self.buf.is_char_boundary(cut) {
                cut += 1;
            }
            self.buf.drain(..cut);
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

impl Default for Scrollback {
    fn default() -> Self {
        Self::new(MAX_SCROLLBACK_BYTES)
    }
}
