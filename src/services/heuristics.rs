use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub(crate) const MAX_HEURISTIC_SCORE: u8 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Signal {
    EntryPoint,
    ClassDeclaration,
    StandardContainer,
}

static SIGNALS: Lazy<[(Signal, Regex); 3]> = Lazy::new(|| {
    [
        (Signal::EntryPoint, Regex::new(r"\bmain\s*\(").expect("Invalid entry point regex")),
        (
            Signal::ClassDeclaration,
            Regex::new(r"\bclass\s+\w+").expect("Invalid class declaration regex"),
        ),
        (
            Signal::StandardContainer,
            Regex::new(r"std::(vector|set|map)\s*<.*>").expect("Invalid container regex"),
        ),
    ]
});

/// Structural signals present in `source`, each reported once.
pub(crate) fn signals(source: &str) -> Vec<Signal> {
    SIGNALS
        .iter()
        .filter(|(_, pattern)| pattern.is_match(source))
        .map(|(signal, _)| *signal)
        .collect()
}

/// One point per signal present, never more than [`MAX_HEURISTIC_SCORE`].
pub(crate) fn score(source: &str) -> u8 {
    let found = u8::try_from(signals(source).len()).unwrap_or(MAX_HEURISTIC_SCORE);
    found.min(MAX_HEURISTIC_SCORE)
}
