use std::collections::HashMap;
use std::fmt;
use regex::Regex;
use once_cell::sync::Lazy;
use log::debug;

use crate::errors::SubtitleError;

// @module: Subtitle document codec (parse, render, line tagging)

// @const: Timestamp range line, `HH:MM:SS,mmm --> HH:MM:SS,mmm` (dot or comma)
static TIMESTAMP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{2}:\d{2}:\d{2}[.,]\d{3}\s+-->\s+\d{2}:\d{2}:\d{2}[.,]\d{3})").unwrap()
});

// @const: Any timestamp, used to sniff downloaded documents
static ANY_TIMESTAMP_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{2}:\d{2}:\d{2}").unwrap()
});

// @const: Tagged translation line
static LINE_TAG_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\[LINE_(\d+)\](.*)$").unwrap()
});

// @struct: Single subtitle entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleEntry {
    // @field: Sequence number
    pub seq_num: u32,

    // @field: Timestamp range line, kept verbatim
    pub timestamp: String,

    // @field: Subtitle text
    pub text: String,
}

impl SubtitleEntry {
    /// Creates a new subtitle entry
    pub fn new(seq_num: u32, timestamp: impl Into<String>, text: impl Into<String>) -> Self {
        SubtitleEntry {
            seq_num,
            timestamp: timestamp.into(),
            text: text.into(),
        }
    }

    /// The entry wrapped with its `[LINE_n]` marker, on a single line
    pub fn tagged(&self) -> String {
        let flattened = self.text.lines().map(str::trim).collect::<Vec<_>>().join(" ");
        format!("[LINE_{}]{}", self.seq_num, flattened)
    }
}

impl fmt::Display for SubtitleEntry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}", self.seq_num)?;
        writeln!(f, "{}", self.timestamp)?;
        writeln!(f, "{}", self.text)?;
        writeln!(f)
    }
}

/// Ordered collection of subtitle entries
#[derive(Debug, Clone, Default)]
pub struct SubtitleDocument {
    /// Entries in document order
    pub entries: Vec<SubtitleEntry>,
}

impl SubtitleDocument {
    /// Parse a line-numbered, timestamped subtitle document.
    ///
    /// Blocks are `number`, `timestamp range`, one or more text lines, closed by
    /// a blank line or end of input. Anything that does not fit is skipped.
    /// A non-empty document yielding zero entries is a `ParseError`.
    pub fn parse(document: &str) -> Result<Self, SubtitleError> {
        let document = document.trim_start_matches('\u{feff}');
        let lines: Vec<&str> = document.lines().collect();
        let mut entries = Vec::new();
        let mut index = 0;

        while index < lines.len() {
            let Some(timestamp) = Self::block_header(&lines, index) else {
                index += 1;
                continue;
            };

            let number_line = lines[index].trim();
            let mut cursor = index + 2;
            let mut body = Vec::new();
            while cursor < lines.len() && !lines[cursor].trim().is_empty() {
                body.push(lines[cursor].trim());
                cursor += 1;
            }

            match number_line.parse::<u32>() {
                Ok(seq_num) if !body.is_empty() => {
                    entries.push(SubtitleEntry::new(seq_num, timestamp, body.join("\n")));
                }
                Ok(seq_num) => debug!("Skipping subtitle block {} without text", seq_num),
                Err(_) => debug!("Dropping subtitle block with unparsable number '{}'", number_line),
            }

            index = cursor.max(index + 1);
        }

        if entries.is_empty() && !document.trim().is_empty() {
            return Err(SubtitleError::ParseError(document.len()));
        }

        Ok(Self { entries })
    }

    // @returns: Timestamp range if `lines[index]` starts a block
    fn block_header(lines: &[&str], index: usize) -> Option<String> {
        let number_line = lines.get(index)?.trim();
        if number_line.is_empty() || !number_line.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let timestamp_line = lines.get(index + 1)?.trim();
        TIMESTAMP_REGEX
            .captures(timestamp_line)
            .map(|caps| caps[1].to_string())
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Build the text sent to the translation API, one tagged line per entry
    pub fn tag(&self) -> String {
        let mut tagged = String::new();
        for entry in &self.entries {
            tagged.push_str(&entry.tagged());
            tagged.push('\n');
        }
        tagged
    }

    /// Decode a translated response back into `seq_num -> text`.
    ///
    /// Lines without a `[LINE_n]` marker are discarded. Surrounding ASCII
    /// punctuation is trimmed from each text, except `!` and `?`.
    pub fn untag(response: &str) -> HashMap<u32, String> {
        let mut translations = HashMap::new();

        for line in response.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let Some(caps) = LINE_TAG_REGEX.captures(line) else {
                debug!("Discarding untagged response line: {}", line);
                continue;
            };

            let Ok(seq_num) = caps[1].parse::<u32>() else {
                continue;
            };

            let content = caps[2].trim().trim_matches(is_trimmed_punctuation);
            translations.insert(seq_num, content.to_string());
        }

        translations
    }

    /// Rebuild a document from translations.
    ///
    /// Entries without a translation are omitted from the output. Numbers and
    /// timestamps are carried over untouched.
    pub fn render(&self, translations: &HashMap<u32, String>) -> String {
        let mut output = String::new();
        for entry in &self.entries {
            if let Some(text) = translations.get(&entry.seq_num) {
                let translated = SubtitleEntry::new(entry.seq_num, entry.timestamp.clone(), text.clone());
                output.push_str(&translated.to_string());
            }
        }
        output
    }

    /// Count of entries that `render` would drop for these translations
    pub fn missing_translations(&self, translations: &HashMap<u32, String>) -> usize {
        self.entries
            .iter()
            .filter(|entry| !translations.contains_key(&entry.seq_num))
            .count()
    }
}

// @checks: ASCII punctuation other than `!` and `?`
fn is_trimmed_punctuation(c: char) -> bool {
    c.is_ascii_punctuation() && c != '!' && c != '?'
}

/// Cheap sniff used after download: does the head contain a timestamp at all
pub fn looks_like_subtitles(head: &str) -> bool {
    ANY_TIMESTAMP_REGEX.is_match(head)
}
