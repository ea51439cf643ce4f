use larder_core::{Form, LifeStage, tokens};

/// Checked in order; the first phrase found as whole words wins.
const FORM_VOCABULARY: &[(Form, &[&str])] = &[
    (Form::FreezeDried, &["freeze dried", "freezedried", "air dried"]),
    (Form::Raw, &["raw", "barf", "frozen"]),
    (
        Form::Wet,
        &["wet", "can", "canned", "tin", "tray", "pouch", "pate", "loaf", "chunks", "stew"],
    ),
    (Form::Dry, &["dry", "kibble", "biscuit", "biscuits", "cold pressed"]),
];

const ALL_STAGES: &[&str] = &[
    "all life stages",
    "all lifestages",
    "all ages",
    "all stages",
];

const STAGE_VOCABULARY: &[(LifeStage, &[&str])] = &[
    (LifeStage::Puppy, &["puppy", "puppies", "junior", "growth"]),
    (LifeStage::Senior, &["senior", "mature", "ageing", "aging"]),
    (LifeStage::Adult, &["adult", "adults", "maintenance"]),
];

pub fn classify_form(text: &str) -> Form {
    let words = tokens(text);
    FORM_VOCABULARY
        .iter()
        .find(|(_, phrases)| phrases.iter().any(|phrase| contains_phrase(&words, phrase)))
        .map_or(Form::Unknown, |(form, _)| *form)
}

/// A label naming more than one specific stage, such as "puppy and adult",
/// is treated the same as an explicit "all life stages".
pub fn classify_life_stage(text: &str) -> LifeStage {
    let words = tokens(text);
    if ALL_STAGES.iter().any(|phrase| contains_phrase(&words, phrase)) {
        return LifeStage::All;
    }

    let mentioned = STAGE_VOCABULARY
        .iter()
        .filter(|(_, phrases)| phrases.iter().any(|phrase| contains_phrase(&words, phrase)))
        .map(|(stage, _)| *stage)
        .collect::<Vec<_>>();

    match mentioned.as_slice() {
        [] => LifeStage::Unknown,
        [stage] => *stage,
        _ => LifeStage::All,
    }
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle = tokens(phrase);
    !needle.is_empty() && words.windows(needle.len()).any(|window| window == needle.as_slice())
}
