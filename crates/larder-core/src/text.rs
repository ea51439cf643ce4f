/// Lowercases, drops apostrophes, turns every other non-alphanumeric run into a
/// single space and trims. `"Hill's  Science-Plan"` becomes `"hills science plan"`.
pub fn normalize_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut pending_space = false;

    for ch in input.chars() {
        if is_apostrophe(ch) {
            continue;
        }

        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }

    out
}

/// Normalized words of `input`, in order.
pub fn tokens(input: &str) -> Vec<String> {
    normalize_text(input)
        .split(' ')
        .filter(|word| !word.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Underscore-joined normalized words. Underscores and hyphens in the input are
/// treated as separators, so `"barking_heads"` and `"Barking-Heads"` agree.
pub fn slugify(input: &str) -> String {
    tokens(input).join("_")
}

fn is_apostrophe(ch: char) -> bool {
    matches!(ch, '\'' | '\u{2019}' | '\u{2018}' | '`')
}
