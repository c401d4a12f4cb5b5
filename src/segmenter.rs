/// Sentence segmentation with stable 1-based ids.
///
/// Splits on `.`, `!`, `?` followed by whitespace or end of text, and on blank
/// lines. A `.` directly after a known abbreviation does not end a sentence.
use crate::error::CoderError;
use crate::model::{Sentence, SentenceId};

/// Lower-cased tokens (without the final dot) that never end a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "etc", "e.g", "i.e", "inc", "ltd",
    "fig", "approx", "dept", "cf", "al",
];

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Closing marks that stay attached to the sentence they end.
fn is_closer(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '”' | '’' | '»')
}

/// Segment a document's text into sentences with ids `1..=N`.
pub fn segment_document(document: &str, content: &str) -> Result<Vec<Sentence>, CoderError> {
    if content.contains('\0') {
        return Err(CoderError::Segmentation {
            document: document.to_string(),
            reason: "text contains NUL bytes (binary file?)".to_string(),
        });
    }

    split_sentences(content)
        .into_iter()
        .enumerate()
        .map(|(idx, text)| {
            let id = SentenceId::try_from(idx + 1).map_err(|_| CoderError::Segmentation {
                document: document.to_string(),
                reason: "too many sentences".to_string(),
            })?;
            Ok(Sentence {
                id,
                text,
                document: document.to_string(),
            })
        })
        .collect()
}

/// Decode raw file bytes; anything that is not UTF-8 is rejected. A leading
/// byte-order mark is dropped.
pub fn decode_text(document: &str, bytes: Vec<u8>) -> Result<String, CoderError> {
    let text = String::from_utf8(bytes).map_err(|e| CoderError::Segmentation {
        document: document.to_string(),
        reason: format!("not valid UTF-8 ({})", e.utf8_error()),
    })?;
    Ok(match text.strip_prefix('\u{feff}') {
        Some(rest) => rest.to_string(),
        None => text,
    })
}

/// Split text into sentence strings with whitespace normalized to single spaces.
pub fn split_sentences(text: &str) -> Vec<String> {
    paragraphs(text)
        .iter()
        .flat_map(|p| split_paragraph(p))
        .collect()
}

/// Group non-blank lines; a blank line always ends the current sentence.
fn paragraphs(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                out.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

fn split_paragraph(para: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = para.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (pos, c) = chars[i];
        if !is_terminator(c) {
            i += 1;
            continue;
        }

        let mut j = i + 1;
        while j < chars.len() && is_terminator(chars[j].1) {
            j += 1;
        }
        while j < chars.len() && is_closer(chars[j].1) {
            j += 1;
        }

        let at_boundary = j == chars.len() || chars[j].1.is_whitespace();
        let single_dot = c == '.' && (i + 1 == chars.len() || chars[i + 1].1 != '.');
        if !at_boundary || (single_dot && follows_abbreviation(&para[start..pos])) {
            i = j;
            continue;
        }

        let end = if j == chars.len() { para.len() } else { chars[j].0 };
        push_normalized(&mut sentences, &para[start..end]);
        start = end;
        i = j;
    }

    push_normalized(&mut sentences, &para[start..]);
    sentences
}

/// Whether the last token of `before` is a known abbreviation.
fn follows_abbreviation(before: &str) -> bool {
    let token = before
        .rsplit(char::is_whitespace)
        .next()
        .unwrap_or_default()
        .trim_start_matches(['(', '[', '"', '\'', '“', '‘', '«']);
    if token.is_empty() {
        return false;
    }
    let token = token.to_lowercase();
    ABBREVIATIONS.contains(&token.as_str())
}

fn push_normalized(out: &mut Vec<String>, raw: &str) {
    let text = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.is_empty() {
        out.push(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn texts(s: &str) -> Vec<String> {
        split_sentences(s)
    }

    #[test]
    fn test_two_simple_sentences() {
        let sentences = segment_document("cat.txt", "The cat sat. It was happy.").unwrap();
        assert_eq!(sentences.len(), 2);
        assert_eq!(sentences[0].id, 1);
        assert_eq!(sentences[0].text, "The cat sat.");
        assert_eq!(sentences[1].id, 2);
        assert_eq!(sentences[1].text, "It was happy.");
        assert!(sentences.iter().all(|s| s.document == "cat.txt"));
    }

    #[test]
    fn test_empty_input() {
        assert!(segment_document("e.txt", "").unwrap().is_empty());
        assert!(segment_document("e.txt", "  \n\n \t ").unwrap().is_empty());
    }

    #[test]
    fn test_ids_contiguous() {
        let text = "One! Two? Three. Four\n\nFive.";
        let sentences = segment_document("n.txt", text).unwrap();
        let ids: Vec<_> = sentences.iter().map(|s| s.id).collect();
        assert_eq!(ids, (1..=5).collect::<Vec<SentenceId>>());
    }

    #[test]
    fn test_idempotent() {
        let text = "Dr. Who arrived. He said \"hi.\" Then he left...   Really?! Yes.";
        let a = segment_document("x.txt", text).unwrap();
        let b = segment_document("x.txt", text).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_abbreviations_do_not_split() {
        assert_eq!(
            texts("Mr. Smith met Dr. Jones. They talked about apples, pears, etc. and more."),
            vec![
                "Mr. Smith met Dr. Jones.",
                "They talked about apples, pears, etc. and more."
            ]
        );
        assert_eq!(
            texts("Bring fruit, e.g. apples. Done."),
            vec!["Bring fruit, e.g. apples.", "Done."]
        );
    }

    #[test]
    fn test_abbreviation_check_is_case_insensitive() {
        assert_eq!(texts("MR. X left. ok."), vec!["MR. X left.", "ok."]);
    }

    #[test]
    fn test_punctuation_runs_and_closers() {
        assert_eq!(texts("Wait... What?! Fine."), vec!["Wait...", "What?!", "Fine."]);
        assert_eq!(
            texts("He said \"no.\" Then he left."),
            vec!["He said \"no.\"", "Then he left."]
        );
    }

    #[test]
    fn test_no_break_without_whitespace() {
        assert_eq!(texts("Version 1.5 is out. See example.com now."), vec![
            "Version 1.5 is out.",
            "See example.com now."
        ]);
    }

    #[test]
    fn test_blank_line_ends_sentence() {
        assert_eq!(
            texts("Interview 3\n\nI liked it. A lot"),
            vec!["Interview 3", "I liked it.", "A lot"]
        );
    }

    #[test]
    fn test_single_newline_is_whitespace() {
        assert_eq!(
            texts("The cat\nsat. It was\nhappy."),
            vec!["The cat sat.", "It was happy."]
        );
    }

    #[test]
    fn test_nul_bytes_rejected() {
        let err = segment_document("bin.dat", "abc\0def").unwrap_err();
        assert!(matches!(err, CoderError::Segmentation { ref document, .. } if document == "bin.dat"));
    }

    #[test]
    fn test_decode_text_rejects_invalid_utf8() {
        assert!(decode_text("bad.txt", vec![0xff, 0xfe, 0x41]).is_err());
        assert_eq!(decode_text("ok.txt", b"hi".to_vec()).unwrap(), "hi");
        assert_eq!(
            decode_text("bom.txt", b"\xef\xbb\xbfHi there.".to_vec()).unwrap(),
            "Hi there."
        );
    }

    proptest! {
        #[test]
        fn proptest_ids_are_contiguous(text in "[A-Za-z0-9 .!?,\n]{0,200}") {
            let sentences = segment_document("p.txt", &text).unwrap();
            let ids: Vec<SentenceId> = sentences.iter().map(|s| s.id).collect();
            let expected: Vec<SentenceId> = (1..=sentences.len() as SentenceId).collect();
            prop_assert_eq!(ids, expected);
            prop_assert!(sentences.iter().all(|s| !s.text.is_empty() && s.text.trim() == s.text));
        }

        #[test]
        fn proptest_segmentation_is_idempotent(text in "\\PC{0,200}") {
            let first = segment_document("p.txt", &text).unwrap();
            let second = segment_document("p.txt", &text).unwrap();
            prop_assert_eq!(first, second);
        }
    }
}
