//! Incremental reply parser
//!
//! Extracts `- path:` labeled, triple-backtick fenced code blocks from the
//! streamed assistant text, one chunk at a time. A path line opens a block
//! only when the fence follows on the very next line; anything between the
//! two drops the parser back into prose.

use std::{collections::HashMap, sync::Arc};

use planweave_providers::TokenCounter;

/// Parser output after finalization
#[derive(Debug, Clone, Default)]
pub struct ReplyOutline {
    /// Paths in order of first appearance, deduplicated
    pub files: Vec<String>,
    /// Path → concatenated block bodies
    pub file_contents: HashMap<String, String>,
    /// Path → language tag of the first block, empty when untagged
    pub languages: HashMap<String, String>,
    /// Path → token count of the body, computed as chunks arrived
    pub num_tokens_by_file: HashMap<String, usize>,
}

enum ParserState {
    Prose,
    /// Saw a `- path:` line; a fence must follow immediately
    Opener { path: String },
    InBlock { path: String },
}

/// Stateful incremental parser over the describe stream
pub struct ReplyParser {
    counter: Arc<TokenCounter>,
    pending: String,
    state: ParserState,
    files: Vec<String>,
    lines: HashMap<String, Vec<String>>,
    languages: HashMap<String, String>,
    tokens: HashMap<String, usize>,
}

impl ReplyParser {
    pub fn new(counter: Arc<TokenCounter>) -> Self {
        Self {
            counter,
            pending: String::new(),
            state: ParserState::Prose,
            files: Vec::new(),
            lines: HashMap::new(),
            languages: HashMap::new(),
            tokens: HashMap::new(),
        }
    }

    /// Feed one streamed chunk
    pub fn add_chunk(&mut self, chunk: &str) {
        self.pending.push_str(chunk);
        while let Some(line_end) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=line_end).collect();
            let line = line.trim_end_matches(['\n', '\r']).to_string();
            self.feed_line(&line);
        }
    }

    /// Finalize and read the outline
    pub fn finish(mut self) -> ReplyOutline {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            let line = line.trim_end_matches('\r').to_string();
            self.feed_line(&line);
        }

        let file_contents = self
            .lines
            .into_iter()
            .map(|(path, lines)| (path, lines.join("\n")))
            .collect();

        ReplyOutline {
            files: self.files,
            file_contents,
            languages: self.languages,
            num_tokens_by_file: self.tokens,
        }
    }

    fn feed_line(&mut self, line: &str) {
        match std::mem::replace(&mut self.state, ParserState::Prose) {
            ParserState::Prose => self.prose_line(line),
            ParserState::Opener { path } => match fence_language(line) {
                Some(language) => self.open_block(path, language),
                // not a fence: no code block here, back to prose (the line
                // may itself be a fresh opener)
                None => self.prose_line(line),
            },
            ParserState::InBlock { path } => {
                if is_closing_fence(line) {
                    // state already reset to prose
                } else {
                    self.body_line(&path, line);
                    self.state = ParserState::InBlock { path };
                }
            }
        }
    }

    fn prose_line(&mut self, line: &str) {
        if let Some(path) = opener_path(line) {
            self.state = ParserState::Opener { path };
        }
    }

    fn open_block(&mut self, path: String, language: String) {
        if !self.lines.contains_key(&path) {
            self.files.push(path.clone());
            self.languages.insert(path.clone(), language);
        }
        self.lines.entry(path.clone()).or_default();
        self.tokens.entry(path.clone()).or_insert(0);
        self.state = ParserState::InBlock { path };
    }

    fn body_line(&mut self, path: &str, line: &str) {
        if let Some(count) = self.tokens.get_mut(path) {
            *count += self.counter.count(line);
        }
        if let Some(lines) = self.lines.get_mut(path) {
            lines.push(line.to_string());
        }
    }
}

/// Match a `- <path>:` label line; leading whitespace disqualifies it
fn opener_path(line: &str) -> Option<String> {
    let rest = line.strip_prefix("- ")?;
    let path = rest.strip_suffix(':')?.trim();
    if path.is_empty() || path.contains('`') {
        return None;
    }
    Some(path.to_string())
}

/// Match an opening fence, returning its language tag
fn fence_language(line: &str) -> Option<String> {
    let rest = line.strip_prefix("```")?;
    let language = rest.trim();
    if language.contains('`') {
        return None;
    }
    Some(language.to_string())
}

fn is_closing_fence(line: &str) -> bool {
    line.trim_end() == "```"
}
