//! Fixed vocabularies shared by tool schemas, local resources and completion.

pub const GENRES: &[&str] = &[
    "action",
    "adventure",
    "animation",
    "comedy",
    "crime",
    "documentary",
    "drama",
    "family",
    "fantasy",
    "horror",
    "mystery",
    "romance",
    "science-fiction",
    "thriller",
    "western",
];

pub const PLATFORMS: &[&str] = &[
    "netflix",
    "prime-video",
    "disney-plus",
    "max",
    "hulu",
    "apple-tv-plus",
    "paramount-plus",
    "peacock",
];

pub const REGIONS: &[&str] = &[
    "US", "GB", "CA", "AU", "DE", "FR", "ES", "IT", "JP", "BR", "IN", "MX",
];

pub const CONTENT_TYPES: &[&str] = &["movie", "series", "documentary", "short"];

/// Vocabulary for an argument name, accepting both snake_case and camelCase spellings.
pub fn vocabulary_for(argument: &str) -> Option<&'static [&'static str]> {
    match argument {
        "genre" => Some(GENRES),
        "platform" => Some(PLATFORMS),
        "region" => Some(REGIONS),
        "content_type" | "contentType" => Some(CONTENT_TYPES),
        _ => None,
    }
}

/// Case-insensitive lookup returning the canonical spelling.
pub fn canonical(vocabulary: &[&'static str], value: &str) -> Option<&'static str> {
    let value = value.trim();
    vocabulary
        .iter()
        .copied()
        .find(|candidate| candidate.eq_ignore_ascii_case(value))
}
