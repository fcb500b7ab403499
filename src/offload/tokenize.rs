//! Local identifier tokenizer.
//!
//! Splits on any character that is not an ASCII letter or digit, then splits
//! each run before every uppercase letter that is not at the start of the run,
//! and lowercases the pieces. `parseHTTPBody` becomes
//! `parse h t t p body`.

/// Tokenize `text` into lowercase identifier pieces.
pub fn split_identifiers(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    for ch in text.chars() {
        if !ch.is_ascii_alphanumeric() {
            flush(&mut current, &mut tokens);
            continue;
        }
        if ch.is_ascii_uppercase() && !current.is_empty() {
            flush(&mut current, &mut tokens);
        }
        current.push(ch.to_ascii_lowercase());
    }
    flush(&mut current, &mut tokens);

    tokens
}

fn flush(current: &mut String, tokens: &mut Vec<String>) {
    if !current.is_empty() {
        tokens.push(std::mem::take(current));
    }
}
