/*!
 * Tests for subtitle codec functionality
 */

use std::collections::HashMap;
use anyhow::Result;

use subtrans::subtitle_processor::{SubtitleDocument, SubtitleEntry};
use subtrans::errors::SubtitleError;
use crate::common;

/// Parse, tag, echo, untag and render keeps numbers and timestamps
#[test]
fn test_round_trip_withEchoTranslation_shouldPreserveNumbersAndTimestamps() -> Result<()> {
    let source = common::sample_document(10);
    let document = SubtitleDocument::parse(&source)?;
    assert_eq!(document.len(), 10);

    let translations = SubtitleDocument::untag(&document.tag());
    let rendered = SubtitleDocument::parse(&document.render(&translations))?;

    assert_eq!(rendered.len(), 10);
    for (original, output) in document.entries.iter().zip(rendered.entries.iter()) {
        assert_eq!(original.seq_num, output.seq_num);
        assert_eq!(original.timestamp, output.timestamp);
        assert_eq!(output.text, common::expected_round_trip_text(output.seq_num));
    }
    Ok(())
}

/// A document without text after the timestamps yields nothing usable
#[test]
fn test_parse_withTimestampsButNoText_shouldFail() {
    let result = SubtitleDocument::parse("1\n00:00:01,000 --> 00:00:02,000\n\n");
    assert!(matches!(result, Err(SubtitleError::ParseError(_))));
}

/// Text lines stop at the first blank line; trailing junk is ignored
#[test]
fn test_parse_withJunkBetweenBlocks_shouldKeepValidEntries() -> Result<()> {
    let text = "1\n00:00:01,000 --> 00:00:02,000\nfirst\n\nstray line\n\n2\n00:00:03,000 --> 00:00:04,000\nsecond\n";
    let document = SubtitleDocument::parse(text)?;

    assert_eq!(
        document.entries,
        vec![
            SubtitleEntry::new(1, "00:00:01,000 --> 00:00:02,000", "first"),
            SubtitleEntry::new(2, "00:00:03,000 --> 00:00:04,000", "second"),
        ]
    );
    Ok(())
}

/// Untag keeps inner spacing and drops lines without markers
#[test]
fn test_untag_withNoiseLines_shouldKeepOnlyTaggedContent() {
    let response = "Here is your translation:\n[LINE_4]  Good morning, everyone!  \n\n[LINE_x]bad\n[LINE_5]\n";
    let translations = SubtitleDocument::untag(response);

    assert_eq!(translations.len(), 2);
    assert_eq!(translations[&4], "Good morning, everyone!");
    assert_eq!(translations[&5], "");
}

/// Rendering with no translations produces an empty document
#[test]
fn test_render_withNoTranslations_shouldBeEmpty() -> Result<()> {
    let document = SubtitleDocument::parse(&common::sample_document(3))?;
    let rendered = document.render(&HashMap::new());

    assert!(rendered.is_empty());
    assert_eq!(document.missing_translations(&HashMap::new()), 3);
    Ok(())
}
