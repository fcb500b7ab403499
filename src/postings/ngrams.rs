//! Phrase n-gram and character n-gram generation.

use super::guard::PostingsGuard;
use super::vocab::PostingsMap;
use crate::types::DocId;
use std::collections::HashSet;

/// Joins the tokens of a phrase key.
pub const PHRASE_SEPARATOR: char = '\u{1}';

/// Word boundary sentinels wrapped around every chargram source word.
pub const CHARGRAM_START: char = '\u{27ec}';
pub const CHARGRAM_END: char = '\u{27ed}';

/// Append phrase n-grams of `tokens` for `doc_id` without materializing the
/// full n-gram list.
///
/// Keys grow incrementally from each start position: `t[i]`, `t[i]␁t[i+1]`,
/// and so on. An empty token ends the running key; grams after it are formed
/// from their own start position. Returns the number of grams emitted.
pub fn append_phrase_ngrams<S: AsRef<str>>(
    map: &mut PostingsMap<DocId>,
    tokens: &[S],
    doc_id: DocId,
    min_n: usize,
    max_n: usize,
    guard: &mut PostingsGuard,
) -> usize {
    if min_n < 1 || max_n < min_n || tokens.len() < min_n {
        return 0;
    }

    let max_span = max_n.min(tokens.len());
    let mut emitted = 0;
    let mut key = String::new();

    for start in 0..tokens.len() {
        key.clear();
        for n in 1..=max_span {
            let Some(token) = tokens.get(start + n - 1) else {
                break;
            };
            let token = token.as_ref();
            if token.is_empty() {
                break;
            }
            if n > 1 {
                key.push(PHRASE_SEPARATOR);
            }
            key.push_str(token);

            if n >= min_n {
                if !guard.chunk_has_room(emitted) {
                    guard.record_truncated_chunk();
                    return emitted;
                }
                map.append_guarded(&key, doc_id, guard);
                emitted += 1;
            }
        }
    }

    emitted
}

/// Call `emit` with every character n-gram of the sentinel-wrapped `word`.
///
/// Words longer than `max_token_length` characters produce nothing. `emit`
/// returns false to stop early; the function returns false when it did.
pub fn for_each_chargram(
    word: &str,
    min_n: usize,
    max_n: usize,
    max_token_length: Option<usize>,
    mut emit: impl FnMut(&str) -> bool,
) -> bool {
    if word.is_empty() || min_n == 0 || max_n < min_n {
        return true;
    }
    if max_token_length.is_some_and(|limit| word.chars().count() > limit) {
        return true;
    }

    let mut wrapped = String::with_capacity(word.len() + 6);
    wrapped.push(CHARGRAM_START);
    wrapped.push_str(word);
    wrapped.push(CHARGRAM_END);

    let mut bounds: Vec<usize> = wrapped.char_indices().map(|(pos, _)| pos).collect();
    bounds.push(wrapped.len());
    let char_len = bounds.len() - 1;

    for n in min_n..=max_n {
        if n > char_len {
            break;
        }
        for start in 0..=(char_len - n) {
            if !emit(&wrapped[bounds[start]..bounds[start + n]]) {
                return false;
            }
        }
    }
    true
}

/// Distinct chargrams for one chunk, in first-seen order.
#[derive(Debug, Default)]
pub struct ChunkChargrams {
    pub grams: Vec<String>,
    pub truncated: bool,
}

/// Collect the distinct chargrams of `words` for one chunk.
///
/// Collection stops once `max_per_chunk` distinct grams (when > 0) are held.
pub fn collect_chargrams<'a>(
    words: impl IntoIterator<Item = &'a str>,
    min_n: usize,
    max_n: usize,
    max_token_length: Option<usize>,
    max_per_chunk: usize,
) -> ChunkChargrams {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = ChunkChargrams::default();

    for word in words {
        let keep_going = for_each_chargram(word, min_n, max_n, max_token_length, |gram| {
            if max_per_chunk > 0 && out.grams.len() >= max_per_chunk {
                out.truncated = true;
                return false;
            }
            if !seen.contains(gram) {
                seen.insert(gram.to_string());
                out.grams.push(gram.to_string());
            }
            true
        });
        if !keep_going {
            break;
        }
    }

    out
}
