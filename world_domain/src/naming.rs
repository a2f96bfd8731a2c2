//! Deterministic syllable-based names for the Reach cultures.

use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};

use world_core::{NameGenerator, NameRequest, NamingError};

/// FNV-1a 64-bit. `DefaultHasher` is randomly keyed per process, which would
/// break same-seed reproducibility.
#[derive(Debug)]
pub struct FnvHasher {
    state: u64,
}

impl FnvHasher {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }
}

impl Default for FnvHasher {
    fn default() -> Self {
        Self::new()
    }
}

impl Hasher for FnvHasher {
    fn finish(&self) -> u64 {
        self.state
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.state ^= byte as u64;
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }
}

struct CultureProfile {
    id: &'static str,
    onsets: &'static [&'static str],
    nuclei: &'static [&'static str],
    place_suffixes: &'static [&'static str],
    family_suffixes: &'static [&'static str],
}

const PROFILES: &[CultureProfile] = &[
    CultureProfile {
        id: "highland",
        onsets: &["br", "dr", "gr", "k", "th", "st", "h", "m"],
        nuclei: &["a", "o", "u", "ai", "ei"],
        place_suffixes: &["hold", "crag", "fell", "stead"],
        family_suffixes: &["brow", "helm", "stone", "ridge"],
    },
    CultureProfile {
        id: "coastal",
        onsets: &["s", "m", "l", "w", "t", "c", "n", "v"],
        nuclei: &["a", "e", "i", "ea", "io"],
        place_suffixes: &["mere", "haven", "port", "strand"],
        family_suffixes: &["well", "tide", "wake", "sail"],
    },
    CultureProfile {
        id: "riverside",
        onsets: &["f", "r", "b", "d", "p", "l", "w", "y"],
        nuclei: &["e", "o", "ee", "oa", "u"],
        place_suffixes: &["ford", "reach", "marsh", "bank"],
        family_suffixes: &["reed", "ferry", "fen", "brook"],
    },
];

/// Used when an entity carries no culture.
const COMMON_PROFILE: CultureProfile = CultureProfile {
    id: "common",
    onsets: &["b", "d", "k", "l", "m", "r", "s", "t"],
    nuclei: &["a", "e", "i", "o", "u"],
    place_suffixes: &["ton", "by", "wick"],
    family_suffixes: &["son", "ward", "more"],
};

const CODAS: &[&str] = &["", "n", "r", "l", "th", "s", "m", "d"];

/// Stateless apart from a running counter, so two generators fed the same
/// requests in the same order produce the same names.
#[derive(Debug, Default)]
pub struct SyllableNameGenerator {
    salt: u64,
    counter: AtomicU64,
}

impl SyllableNameGenerator {
    pub fn new(salt: u64) -> Self {
        Self {
            salt,
            counter: AtomicU64::new(0),
        }
    }

    fn profile(culture: Option<&str>) -> Result<&'static CultureProfile, NamingError> {
        match culture {
            None => Ok(&COMMON_PROFILE),
            Some(id) => PROFILES
                .iter()
                .find(|profile| profile.id == id)
                .ok_or_else(|| NamingError::UnknownCulture {
                    culture: id.to_string(),
                }),
        }
    }
}

/// Walks a hash through successive picks.
struct Picker {
    state: u64,
}

impl Picker {
    fn pick<'a>(&mut self, options: &[&'a str]) -> &'a str {
        let mut hasher = FnvHasher::new();
        hasher.write_u64(self.state);
        self.state = hasher.finish();
        options[(self.state % options.len() as u64) as usize]
    }

    fn syllable(&mut self, profile: &CultureProfile) -> String {
        format!(
            "{}{}{}",
            self.pick(profile.onsets),
            self.pick(profile.nuclei),
            self.pick(CODAS)
        )
    }

    fn word(&mut self, profile: &CultureProfile, syllables: usize) -> String {
        let word: String = (0..syllables).map(|_| self.syllable(profile)).collect();
        capitalize(&word)
    }
}

impl NameGenerator for SyllableNameGenerator {
    fn generate(&self, request: &NameRequest<'_>) -> Result<String, NamingError> {
        let profile = Self::profile(request.culture)?;
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);

        let mut hasher = FnvHasher::new();
        hasher.write_u64(self.salt);
        hasher.write(profile.id.as_bytes());
        hasher.write(request.kind.as_bytes());
        hasher.write(request.subtype.as_bytes());
        hasher.write_u64(sequence);
        let mut picker = Picker {
            state: hasher.finish(),
        };

        let name = match request.kind {
            "npc" => {
                let given = picker.word(profile, 2);
                let family = format!(
                    "{}{}",
                    picker.word(profile, 1),
                    picker.pick(profile.family_suffixes)
                );
                format!("{given} {family}")
            }
            "location" => format!(
                "{}{}",
                picker.word(profile, 1),
                picker.pick(profile.place_suffixes)
            ),
            "faction" => {
                let noun = match request.subtype {
                    "cult" => "Circle",
                    "company" => "Company",
                    _ => "Guild",
                };
                format!("The {} {noun}", picker.word(profile, 2))
            }
            "ability" => {
                let art = if request.subtype == "magic" {
                    picker.pick(&["Rite", "Binding", "Invocation"])
                } else {
                    picker.pick(&["Stance", "Craft", "Method"])
                };
                format!("{}'s {art}", picker.word(profile, 2))
            }
            "rule" => {
                if request.subtype == "law" {
                    format!("The {} Law", picker.word(profile, 2))
                } else {
                    format!("Custom of {}", picker.word(profile, 1))
                }
            }
            _ => picker.word(profile, 2),
        };
        Ok(name)
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use world_schema::{Prominence, Tags};

    fn request<'a>(kind: &'a str, subtype: &'a str, culture: Option<&'a str>, tags: &'a Tags) -> NameRequest<'a> {
        NameRequest {
            kind,
            subtype,
            prominence: Prominence::Marginal,
            tags,
            culture,
            context: None,
        }
    }

    #[test]
    fn fnv_matches_reference_vector() {
        let mut hasher = FnvHasher::new();
        hasher.write(b"a");
        assert_eq!(hasher.finish(), 0xaf63dc4c8601ec8c);
    }

    #[test]
    fn same_salt_same_sequence() {
        let tags = Tags::new();
        let first = SyllableNameGenerator::new(7);
        let second = SyllableNameGenerator::new(7);
        for kind in ["npc", "location", "faction", "ability", "rule"] {
            let a = first.generate(&request(kind, "law", Some("coastal"), &tags)).unwrap();
            let b = second.generate(&request(kind, "law", Some("coastal"), &tags)).unwrap();
            assert_eq!(a, b);
            assert!(!a.trim().is_empty());
        }
    }

    #[test]
    fn kinds_have_recognisable_forms() {
        let tags = Tags::new();
        let namer = SyllableNameGenerator::new(1);
        let npc = namer.generate(&request("npc", "hero", Some("highland"), &tags)).unwrap();
        assert_eq!(npc.split(' ').count(), 2);
        let faction = namer.generate(&request("faction", "cult", None, &tags)).unwrap();
        assert!(faction.starts_with("The ") && faction.ends_with(" Circle"));
        let law = namer.generate(&request("rule", "law", Some("riverside"), &tags)).unwrap();
        assert!(law.ends_with(" Law"));
    }

    #[test]
    fn unknown_culture_is_an_error() {
        let tags = Tags::new();
        let namer = SyllableNameGenerator::default();
        let err = namer
            .generate(&request("npc", "hero", Some("atlantean"), &tags))
            .unwrap_err();
        assert!(matches!(err, NamingError::UnknownCulture { culture } if culture == "atlantean"));
    }
}
