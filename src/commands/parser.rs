//! Message grammar.
//!
//! Two message shapes carry commands:
//!
//! - **Fenced**: a code block, optionally tagged, whose body starts with the
//!   prompt marker: ```` ```sh\n$ roll 2d6\n``` ````.
//! - **Mundane**: bare text starting with the sentinel: `<<roll 2d6`.
//!
//! Fenced blocks with other tags (e.g. `sql`) are recognised as fenced but
//! not claimed as commands, so another message handler may take them.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::DispatchConfig;
use crate::error::{ChattermError, Result};

/// Opening fence, optional tag, lazily matched body, closing fence.
static FENCED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\A```(\w*)\s*(.*?)\s*```").expect("fenced block pattern"));

/// A message that has one of the two recognised shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    /// Block body (fenced) or the whole trimmed message (mundane).
    pub body: String,
    /// Fence tag; `None` for mundane messages.
    pub tag: Option<String>,
}

impl ParsedMessage {
    pub fn is_mundane(&self) -> bool {
        self.tag.is_none()
    }
}

/// A command line extracted from a claimed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    /// Text after the prompt marker or sentinel, trimmed.
    pub text: String,
    /// Whether the bare syntax was used.
    pub mundane: bool,
}

/// The configurable parts of the message grammar.
#[derive(Debug, Clone)]
pub struct Grammar {
    tags: Vec<String>,
    prompt: String,
    sentinel: String,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::from_config(&DispatchConfig::default())
    }
}

impl Grammar {
    pub fn from_config(config: &DispatchConfig) -> Self {
        Self {
            tags: config.fenced_tags.iter().map(|t| t.to_lowercase()).collect(),
            prompt: config.prompt.clone(),
            sentinel: config.mundane_sentinel.clone(),
        }
    }

    /// Recognise the shape of a message.
    ///
    /// Returns `None` when the message is neither a fenced block nor starts
    /// with the mundane sentinel.
    pub fn parse(&self, content: &str) -> Option<ParsedMessage> {
        let content = content.trim();

        if let Some(caps) = FENCED_RE.captures(content) {
            return Some(ParsedMessage {
                body: caps[2].to_string(),
                tag: Some(caps[1].to_string()),
            });
        }

        if content.starts_with(&self.sentinel) {
            return Some(ParsedMessage {
                body: content.to_string(),
                tag: None,
            });
        }

        None
    }

    /// Whether a fence tag is claimed for command execution.
    pub fn claims_tag(&self, tag: &str) -> bool {
        let tag = tag.to_lowercase();
        self.tags.iter().any(|t| *t == tag)
    }

    /// Extract the command line from a parsed message.
    ///
    /// Fenced messages must carry a claimed tag and start with the prompt
    /// marker; anything else is not a command.
    pub fn command_line(&self, parsed: &ParsedMessage) -> Option<CommandLine> {
        match &parsed.tag {
            None => parsed
                .body
                .strip_prefix(&self.sentinel)
                .map(|rest| CommandLine {
                    text: rest.trim().to_string(),
                    mundane: true,
                }),
            Some(tag) if self.claims_tag(tag) => {
                // The block's whitespace is trimmed, so "$ " alone arrives as "$"
                let bare_prompt = parsed.body == self.prompt.trim_end();
                parsed
                    .body
                    .strip_prefix(&self.prompt)
                    .or(bare_prompt.then_some(""))
                    .map(|rest| CommandLine {
                        text: rest.trim().to_string(),
                        mundane: false,
                    })
            }
            Some(_) => None,
        }
    }

    /// `parse` followed by `command_line`.
    pub fn extract(&self, content: &str) -> Option<CommandLine> {
        self.parse(content).and_then(|p| self.command_line(&p))
    }
}

/// Split a command line into words the way a POSIX shell would.
///
/// Quotes group words, backslashes escape, and an unquoted `#` at the start
/// of a word comments out the rest of its line. An empty line yields no
/// words.
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    shlex::split(line)
        .ok_or_else(|| ChattermError::Parse("unterminated quote or escape".to_string()))
}

/// Format a message for delivery.
///
/// Mundane output is sent as-is; everything else is wrapped in a code
/// block tagged with `language`.
pub fn codify(message: &str, mundane: bool, language: &str) -> String {
    if mundane {
        message.to_string()
    } else {
        format!("```{}\n{}\n```", language, message)
    }
}

/// Characters `codify` adds around a non-mundane message.
pub fn fence_overhead(language: &str) -> usize {
    "```".len() * 2 + language.len() + 2
}

/// Split `text` into pieces of at most `limit` characters, preferring to
/// break after a newline. Pieces made only of newlines are dropped, so
/// blank text yields no pieces.
pub fn chunk_message(text: &str, limit: usize) -> Vec<String> {
    let limit = limit.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while rest.chars().count() > limit {
        let hard_end = rest
            .char_indices()
            .nth(limit)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let end = match rest[..hard_end].rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ => hard_end,
        };
        let chunk = rest[..end].trim_end_matches('\n');
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }
        rest = &rest[end..];
    }
    if !rest.trim_end_matches('\n').is_empty() {
        chunks.push(rest.to_string());
    }
    chunks
}
