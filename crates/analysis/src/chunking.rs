//! Sentence-aligned chunking of extracted text.

/// Fragments this short (after trimming) are merged into the next sentence.
const MIN_SENTENCE_CHARS: usize = 10;

/// Rough token estimate: ~4 characters per token for English text.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Split text after each run of `.`, `!` or `?` that is followed by
/// whitespace, normalizing whitespace.
///
/// Terminators stay attached to their sentence and short fragments (list
/// markers, abbreviations like "Dr.") are folded into the sentence that
/// follows, so joining the result with spaces reproduces the input with
/// whitespace collapsed.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut raw = Vec::new();
    let mut current = String::new();
    let mut in_terminator = false;

    for c in text.chars() {
        if in_terminator && c.is_whitespace() {
            raw.push(std::mem::take(&mut current));
        }
        in_terminator = matches!(c, '.' | '!' | '?');
        current.push(c);
    }
    raw.push(current);

    let mut sentences = Vec::new();
    let mut carry = String::new();
    for fragment in raw {
        let normalized = normalize_whitespace(&fragment);
        if normalized.is_empty() {
            continue;
        }
        if !carry.is_empty() {
            carry.push(' ');
        }
        carry.push_str(&normalized);
        if carry.chars().count() > MIN_SENTENCE_CHARS {
            sentences.push(std::mem::take(&mut carry));
        }
    }
    if !carry.is_empty() {
        match sentences.last_mut() {
            Some(last) => {
                last.push(' ');
                last.push_str(&carry);
            }
            None => sentences.push(carry),
        }
    }
    sentences
}

/// Greedily pack sentences into chunks of at most `chunk_size` characters.
///
/// A sentence only crosses a chunk boundary when it alone is longer than the
/// budget; it is then split between words (and a single overlong word is cut
/// at character boundaries).
pub fn chunk_text(text: &str, chunk_size: usize) -> Vec<String> {
    let budget = chunk_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in split_sentences(text) {
        for piece in fit_to_budget(&sentence, budget) {
            let piece_len = piece.chars().count();
            let joined_len = if current.is_empty() {
                piece_len
            } else {
                current_len + 1 + piece_len
            };
            if joined_len > budget {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if !current.is_empty() {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(&piece);
            current_len += piece_len;
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn fit_to_budget(sentence: &str, budget: usize) -> Vec<String> {
    if sentence.chars().count() <= budget {
        return vec![sentence.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for word in sentence.split(' ') {
        let word_len = word.chars().count();
        if word_len > budget {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(budget).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let joined_len = if current.is_empty() {
            word_len
        } else {
            current_len + 1 + word_len
        };
        if joined_len > budget {
            pieces.push(std::mem::take(&mut current));
            current_len = 0;
        }
        if !current.is_empty() {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_text(sentences: usize) -> String {
        (0..sentences)
            .map(|i| format!("Finding number {i} shows   a stable value!  "))
            .collect()
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn sentences_keep_terminators() {
        let sentences = split_sentences("Hemoglobin is low.  Ferritin is very low!!\nIs this anemia?");
        assert_eq!(
            sentences,
            vec!["Hemoglobin is low.", "Ferritin is very low!!", "Is this anemia?"]
        );
    }

    #[test]
    fn decimals_do_not_end_sentences() {
        assert_eq!(
            split_sentences("Hemoglobin 9.8 g/dL is low. Repeat in 3.5 weeks."),
            vec!["Hemoglobin 9.8 g/dL is low.", "Repeat in 3.5 weeks."]
        );
    }

    #[test]
    fn short_fragments_merge_forward() {
        let sentences = split_sentences("Dr. Rao reviewed the scan. 1. Liver is normal.");
        assert_eq!(
            sentences,
            vec!["Dr. Rao reviewed the scan.", "1. Liver is normal."]
        );
        assert_eq!(split_sentences("ok."), vec!["ok."]);
        assert_eq!(
            split_sentences("A long enough sentence. Tail"),
            vec!["A long enough sentence. Tail"]
        );
    }

    #[test]
    fn chunks_rejoin_to_normalized_text() {
        let text = report_text(200);
        let chunks = chunk_text(&text, 300);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chars().count() <= 300));
        assert_eq!(chunks.join(" "), normalize_whitespace(&text));
    }

    #[test]
    fn chunks_never_split_a_sentence_that_fits() {
        let text = report_text(50);
        for chunk in chunk_text(&text, 200) {
            assert!(chunk.starts_with("Finding number"));
            assert!(chunk.ends_with('!'));
        }
    }

    #[test]
    fn oversize_sentence_is_split_between_words() {
        let sentence = "word ".repeat(100);
        let chunks = chunk_text(&sentence, 42);
        assert!(chunks.iter().all(|c| c.chars().count() <= 42));
        assert_eq!(chunks.join(" "), normalize_whitespace(&sentence));

        let blob = "x".repeat(25);
        let chunks = chunk_text(&blob, 10);
        assert_eq!(chunks, vec!["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn large_document_yields_many_chunks() {
        let text = report_text(20_000);
        assert!(text.len() > 500_000);
        let chunks = chunk_text(&text, 30_000);
        assert!(chunks.len() > 3);
        assert!(chunks.iter().all(|c| c.chars().count() <= 30_000));
    }

    #[test]
    fn empty_text_has_no_chunks() {
        assert!(chunk_text("   \n ", 100).is_empty());
    }
}
