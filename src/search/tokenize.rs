//! Search term tokenization.
//!
//! Quote variants typed on different keyboards are folded into `"` first. The term is then
//! split with shell quoting and escaping rules (`shlex`), so `"vitamin C" aspirin` yields
//! `vitamin C` and `aspirin`.
//! Tokens of two characters or fewer are dropped, they would match nearly every drug.

/// Shortest token that takes part in matching.
pub const MIN_TOKEN_CHARS: usize = 3;

const QUOTE_VARIANTS: &[char] = &[
    '\'', '`', '´', '„', '“', '”', '‘', '’', '‚', '«', '»', '‹', '›',
];

/// Replaces every quote variant with a straight double quote.
#[must_use]
pub fn normalize_quotes(term: &str) -> String {
    term.chars()
        .map(|c| if QUOTE_VARIANTS.contains(&c) { '"' } else { c })
        .collect()
}

/// Splits with shell quoting and escaping rules.
///
/// Input the shell would reject, such as an unbalanced quote or a trailing backslash, is split
/// leniently instead: an open quote extends to the end of the input.
#[must_use]
pub fn split_quoted(input: &str) -> Vec<String> {
    shlex::split(input).unwrap_or_else(|| split_lenient(input))
}

fn split_lenient(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut started = false;

    for c in input.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                started = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if started {
                    tokens.push(std::mem::take(&mut current));
                    started = false;
                }
            }
            c => {
                current.push(c);
                started = true;
            }
        }
    }
    if started {
        tokens.push(current);
    }
    tokens
}

/// Turns a raw search term into the tokens used for matching.
#[must_use]
pub fn tokenize(term: &str) -> Vec<String> {
    split_quoted(&normalize_quotes(term))
        .into_iter()
        .filter(|token| token.chars().count() >= MIN_TOKEN_CHARS)
        .collect()
}
