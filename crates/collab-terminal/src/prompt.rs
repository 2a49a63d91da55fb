//! Detection of interactive prompts in agent output.
//!
//! The agent asks questions either as a yes/no line ending in `(Y/n)` or as a
//! question followed by a numbered option list. [`PromptDetector`] keeps a
//! bounded window of recent ANSI-stripped output and reports the prompt the
//! agent is currently waiting on, so a keystroke answer can be recorded with
//! its question.

use crate::ansi::strip_ansi;
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Characters of recent output retained for scanning.
const BUFFER_MAX_CHARS: usize = 4096;
/// Only the tail of the buffer is scanned for a prompt.
const SCAN_TAIL_CHARS: usize = 1500;
/// A detected prompt is dropped once more than this many characters arrive
/// after it.
const STALE_THRESHOLD_CHARS: u64 = 500;

static YES_NO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\n)[ \t]*[?>\x{276f}][ \t]+([^\n]+?)[ \t]*\(([yYnN])/([yYnN])\)\s*$",
    )
    .unwrap()
});

static NUMBERED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\n)[ \t]*[?>\x{276f}][ \t]+([^\n]+?)[ \t]*\n((?:[ \t]+\d+[.)][ \t]+[^\n]+(?:\n|$))+)\s*$",
    )
    .unwrap()
});

static OPTION_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^[ \t]+(\d+)[.)][ \t]+(.+)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PromptKind {
    YesNo,
    Numbered,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PromptOption {
    pub number: String,
    pub text: String,
}

/// A prompt the agent is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptState {
    pub question: String,
    pub kind: PromptKind,
    /// Empty for yes/no prompts.
    pub options: Vec<PromptOption>,
    /// Total characters fed when the prompt was detected.
    pub detected_at: u64,
}

impl PromptState {
    /// Whether a single keystroke answers this prompt on its own.
    pub fn is_single_key_answer(&self, key: char) -> bool {
        match self.kind {
            PromptKind::YesNo => matches!(key, 'y' | 'Y' | 'n' | 'N'),
            PromptKind::Numbered => key.is_ascii_digit(),
        }
    }

    /// Human-readable label for the answer `input` gives to this prompt.
    pub fn selected_label(&self, input: &str) -> Option<String> {
        match self.kind {
            PromptKind::YesNo => {
                let yes = input.contains(['y', 'Y']);
                Some(if yes { "Yes" } else { "No" }.to_string())
            }
            PromptKind::Numbered => {
                let choice = input.trim();
                self.options
                    .iter()
                    .find(|opt| opt.number == choice)
                    .map(|opt| opt.text.clone())
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct PromptDetector {
    buffer: String,
    buffer_chars: usize,
    total_fed: u64,
    active: Option<PromptState>,
}

impl PromptDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of raw terminal output.
    pub fn feed(&mut self, raw: &str) {
        let clean = strip_ansi(raw);
        let added = clean.chars().count();
        self.buffer.push_str(&clean);
        self.buffer_chars += added;
        self.total_fed += added as u64;

        if self.buffer_chars > BUFFER_MAX_CHARS {
            let excess = self.buffer_chars - BUFFER_MAX_CHARS;
            let cut = byte_offset_of_char(&self.buffer, excess);
            self.buffer.drain(..cut);
            self.buffer_chars = BUFFER_MAX_CHARS;
        }

        if let Some(prompt) = &self.active {
            if self.total_fed - prompt.detected_at > STALE_THRESHOLD_CHARS {
                self.active = None;
            }
        }

        if self.active.is_none() {
            self.active = self.scan();
        }
    }

    pub fn active(&self) -> Option<&PromptState> {
        self.active.as_ref()
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    /// Forget all buffered output, e.g. after the process restarts.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.buffer_chars = 0;
        self.active = None;
    }

    fn scan(&self) -> Option<PromptState> {
        let skip = self.buffer_chars.saturating_sub(SCAN_TAIL_CHARS);
        let tail = &self.buffer[byte_offset_of_char(&self.buffer, skip)..];

        if let Some(caps) = YES_NO_RE.captures(tail) {
            return Some(PromptState {
                question: caps[1].trim().to_string(),
                kind: PromptKind::YesNo,
                options: Vec::new(),
                detected_at: self.total_fed,
            });
        }

        let caps = NUMBERED_RE.captures(tail)?;
        let options: Vec<PromptOption> = OPTION_LINE_RE
            .captures_iter(&caps[2])
            .map(|line| PromptOption {
                number: line[1].to_string(),
                text: line[2].trim().to_string(),
            })
            .collect();
        if options.len() < 2 {
            return None;
        }
        Some(PromptState {
            question: caps[1].trim().to_string(),
            kind: PromptKind::Numbered,
            options,
            detected_at: self.total_fed,
        })
    }
}

fn byte_offset_of_char(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}
