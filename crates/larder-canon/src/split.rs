use larder_core::tokens;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct MultiWordPattern {
    words: Vec<String>,
    brand_slug: String,
}

impl MultiWordPattern {
    pub(crate) fn new(words: Vec<String>, brand_slug: String) -> Self {
        Self { words, brand_slug }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SplitRepair {
    pub brand_slug: String,
    pub cleaned_product_name: String,
}

/// Longest patterns first so "British Dog Co" wins over a shorter "British Dog".
pub(crate) fn sort_patterns(patterns: &mut [MultiWordPattern]) {
    patterns.sort_by(|left, right| {
        right
            .words
            .len()
            .cmp(&left.words.len())
            .then_with(|| left.brand_slug.cmp(&right.brand_slug))
    });
}

/// Finds a pattern whose leading words equal the raw brand and whose remaining
/// words equal the leading words of the product name. Comparison is on whole
/// normalized words only.
pub(crate) fn detect(
    patterns: &[MultiWordPattern],
    brand_raw: &str,
    product_name_raw: &str,
) -> Option<SplitRepair> {
    let brand_words = tokens(brand_raw);
    if brand_words.is_empty() {
        return None;
    }

    let name_words = product_name_raw.split_whitespace().collect::<Vec<_>>();

    patterns.iter().find_map(|pattern| {
        if pattern.words.len() <= brand_words.len() || !pattern.words.starts_with(&brand_words) {
            return None;
        }

        let remainder = &pattern.words[brand_words.len()..];
        let consumed = consume_leading_words(&name_words, remainder)?;
        Some(SplitRepair {
            brand_slug: pattern.brand_slug.clone(),
            cleaned_product_name: strip_leading_separators(&name_words[consumed..]).join(" "),
        })
    })
}

/// Number of raw words whose normalized tokens spell exactly `expected`.
fn consume_leading_words(raw_words: &[&str], expected: &[String]) -> Option<usize> {
    let mut seen: Vec<String> = Vec::with_capacity(expected.len());

    for (index, raw) in raw_words.iter().enumerate() {
        seen.extend(tokens(raw));
        if seen.len() >= expected.len() {
            return (seen == expected).then_some(index + 1);
        }
    }

    None
}

fn strip_leading_separators<'a>(words: &'a [&'a str]) -> &'a [&'a str] {
    let skip = words
        .iter()
        .take_while(|word| tokens(word).is_empty())
        .count();
    &words[skip..]
}
