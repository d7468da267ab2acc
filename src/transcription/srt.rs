//! SRT parsing and mapping of edited subtitles back onto word timings.

use super::transcript::{Transcript, TranscriptSegment, TranscriptWord};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, PartialEq)]
pub enum SrtError {
    #[error("Malformed timing line in subtitle block {block}: {line:?}")]
    InvalidTiming { block: usize, line: String },
    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
}

/// One parsed SRT block
#[derive(Debug, Clone, PartialEq)]
pub struct SrtCue {
    /// Cue number as written, if it parsed
    pub number: Option<usize>,
    /// Zero-based position of the block in the file, skipped blocks included
    pub position: usize,
    pub start: f64,
    pub end: f64,
    /// Text lines joined with single spaces
    pub text: String,
}

/// Parse SRT text into cues.
///
/// Blocks with fewer than three lines (number, timing, text) are skipped.
pub fn parse_srt(input: &str) -> Result<Vec<SrtCue>, SrtError> {
    let normalized = input.replace("\r\n", "\n");
    let mut cues = Vec::new();

    for (block_index, block) in split_blocks(&normalized).into_iter().enumerate() {
        let lines: Vec<&str> = block.iter().map(|l| l.trim()).collect();
        if lines.len() < 3 {
            debug!("Skipping short subtitle block {}", block_index + 1);
            continue;
        }

        let number = lines[0].parse::<usize>().ok();
        let (start, end) = parse_timing_line(lines[1]).map_err(|_| SrtError::InvalidTiming {
            block: block_index + 1,
            line: lines[1].to_string(),
        })?;

        let text = lines[2..]
            .iter()
            .filter(|l| !l.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join(" ");

        cues.push(SrtCue {
            number,
            position: block_index,
            start,
            end,
            text,
        });
    }

    Ok(cues)
}

/// Split into blocks separated by one or more blank lines
fn split_blocks(input: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();

    for line in input.trim().lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }

    blocks
}

fn parse_timing_line(line: &str) -> Result<(f64, f64), SrtError> {
    let (start, end) = line
        .split_once("-->")
        .ok_or_else(|| SrtError::InvalidTimestamp(line.to_string()))?;
    Ok((parse_timestamp(start.trim())?, parse_timestamp(end.trim())?))
}

/// Parse `HH:MM:SS,mmm` (a `.` separator is accepted too)
pub fn parse_timestamp(s: &str) -> Result<f64, SrtError> {
    let invalid = || SrtError::InvalidTimestamp(s.to_string());

    let (hms, millis) = s.split_once([',', '.']).ok_or_else(invalid)?;
    let mut parts = hms.split(':');
    let (Some(h), Some(m), Some(sec), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(invalid());
    };

    let h: u64 = h.parse().map_err(|_| invalid())?;
    let m: u64 = m.parse().map_err(|_| invalid())?;
    let sec: u64 = sec.parse().map_err(|_| invalid())?;
    let ms: u64 = millis.parse().map_err(|_| invalid())?;
    if m >= 60 || sec >= 60 || millis.len() != 3 {
        return Err(invalid());
    }

    Ok((h * 3600 + m * 60 + sec) as f64 + ms as f64 / 1000.0)
}

/// Map an edited SRT back onto the original transcript.
///
/// Each cue is matched to the original segment with the same number (or the
/// same position when the number is missing). Segment bounds and per-word
/// timings come from the original; only word texts are taken from the edit,
/// position by position. Edited timings are ignored.
pub fn apply_srt_edits(edited: &str, original: &Transcript) -> Result<Transcript, SrtError> {
    let cues = parse_srt(edited)?;
    let mut result = Transcript {
        metadata: original.metadata.clone(),
        segments: Vec::with_capacity(cues.len()),
    };

    for cue in &cues {
        let index = cue
            .number
            .and_then(|n| n.checked_sub(1))
            .unwrap_or(cue.position);

        let Some(source) = original.segments.get(index) else {
            warn!("Subtitle cue {} has no matching segment, dropping it", index + 1);
            continue;
        };

        result.segments.push(remap_segment(source, &cue.text));
    }

    Ok(result)
}

fn remap_segment(source: &TranscriptSegment, new_text: &str) -> TranscriptSegment {
    let new_words: Vec<&str> = new_text.split_whitespace().collect();

    if new_words.len() > source.words.len() {
        warn!(
            "Segment {}: {} edited words exceed the {} timed words, extra words dropped",
            source.id,
            new_words.len(),
            source.words.len()
        );
    }

    let words = source
        .words
        .iter()
        .enumerate()
        .map(|(j, original)| TranscriptWord {
            text: new_words
                .get(j)
                .map(|w| w.to_string())
                .unwrap_or_else(|| original.text.clone()),
            start: original.start,
            end: original.end,
            confidence: original.confidence,
        })
        .collect();

    TranscriptSegment {
        id: source.id,
        start: source.start,
        end: source.end,
        words,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn original() -> Transcript {
        let mut t = Transcript::new("job", 6.0);
        t.add_segment(TranscriptSegment {
            id: 0,
            start: 0.0,
            end: 2.0,
            words: vec![
                TranscriptWord::new("helo", 0.0, 0.5),
                TranscriptWord::new("wrld", 0.6, 1.2),
                TranscriptWord::new("today", 1.3, 2.0),
            ],
        });
        t.add_segment(TranscriptSegment {
            id: 1,
            start: 2.0,
            end: 3.0,
            words: vec![],
        });
        t.add_segment(TranscriptSegment {
            id: 2,
            start: 3.0,
            end: 6.0,
            words: vec![
                TranscriptWord::new("second", 3.0, 4.0),
                TranscriptWord::new("line", 4.0, 6.0),
            ],
        });
        t
    }

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(parse_timestamp("00:00:01,500"), Ok(1.5));
        assert_eq!(parse_timestamp("01:01:01.250"), Ok(3661.25));
        assert!(parse_timestamp("00:61:00,000").is_err());
        assert!(parse_timestamp("garbage").is_err());
    }

    #[test]
    fn test_parse_srt_blocks() {
        let srt = "1\r\n00:00:00,000 --> 00:00:01,000\r\nHello\r\nthere\r\n\r\n\r\n\
                   2\n00:00:01,000 --> 00:00:02,000\n\n\
                   x\n00:00:02,000 --> 00:00:03,000\nNext\n";
        let cues = parse_srt(srt).unwrap();

        assert_eq!(cues.len(), 2);
        assert_eq!(cues[0].number, Some(1));
        assert_eq!(cues[0].text, "Hello there");
        assert_eq!(cues[0].end, 1.0);
        assert_eq!(cues[1].number, None);
        assert_eq!(cues[1].position, 2);
        assert_eq!(cues[1].text, "Next");
    }

    #[test]
    fn test_parse_srt_rejects_bad_timing() {
        let err = parse_srt("1\n00:00:00,000 to 00:00:01,000\nHello\n").unwrap_err();
        assert!(matches!(err, SrtError::InvalidTiming { block: 1, .. }));
    }

    #[test]
    fn test_unedited_srt_maps_back_to_same_transcript() {
        let original = original();
        let remapped = apply_srt_edits(&original.to_srt(), &original).unwrap();

        // The wordless segment has no cue and disappears
        assert_eq!(remapped.segments.len(), 2);
        assert_eq!(remapped.segments[0], original.segments[0]);
        assert_eq!(remapped.segments[1], original.segments[2]);
    }

    #[test]
    fn test_edits_replace_words_but_keep_timings() {
        let original = original();
        let edited = "1\n00:00:09,000 --> 00:00:10,000\nhello world\n\n\
                      3\n00:00:03,000 --> 00:00:06,000\nsecond line and more\n";
        let remapped = apply_srt_edits(edited, &original).unwrap();

        let first = &remapped.segments[0];
        assert_eq!(first.start, 0.0);
        assert_eq!(first.end, 2.0);
        let texts: Vec<_> = first.words.iter().map(|w| w.text.as_str()).collect();
        // Fewer edited words: the remainder keeps the original text
        assert_eq!(texts, vec!["hello", "world", "today"]);
        assert_eq!(first.words[1].start, 0.6);

        // More edited words: extras are dropped
        let second = &remapped.segments[1];
        assert_eq!(second.id, 2);
        assert_eq!(second.text(), "second line");
    }

    #[test]
    fn test_unnumbered_cue_maps_by_block_position() {
        let original = original();
        // The second block is too short to be a cue but still holds its place
        let edited = "1\n00:00:00,000 --> 00:00:02,000\nhello world today\n\n\
                      2\n00:00:02,000 --> 00:00:03,000\n\n\
                      cue\n00:00:03,000 --> 00:00:06,000\nfresh words\n";
        let remapped = apply_srt_edits(edited, &original).unwrap();

        assert_eq!(remapped.segments.len(), 2);
        assert_eq!(remapped.segments[1].id, 2);
        assert_eq!(remapped.segments[1].text(), "fresh words");
        assert_eq!(remapped.segments[1].words[1].start, 4.0);
    }

    #[test]
    fn test_cue_without_matching_segment_is_dropped() {
        let original = original();
        let edited = "9\n00:00:00,000 --> 00:00:01,000\nnowhere\n";
        let remapped = apply_srt_edits(edited, &original).unwrap();
        assert!(remapped.segments.is_empty());
    }
}
