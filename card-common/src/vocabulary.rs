//! Fixed translation tables from the coded vocabulary used in telemetry to the small integers
//! the dashboard renders.
//!
//! Each concept is known by a SNOMED-style numeric code and by a plain name, so both
//! `"370999007"` and `"out_of_bed"` resolve. Lookups are case-insensitive and treat
//! `-`, `_` and spaces alike. Unknown codes translate to `None`.

const SLEEP_STAGES: &[(&str, i32)] = &[
    ("248218005", 1),
    ("awake", 1),
    ("258158006", 2),
    ("light", 2),
    ("light_sleep", 2),
    ("67233009", 4),
    ("deep", 4),
    ("deep_sleep", 4),
];

const BED_STATUSES: &[(&str, i32)] = &[
    ("370998004", 0),
    ("in_bed", 0),
    ("370999007", 1),
    ("out_of_bed", 1),
];

const POSTURES: &[(&str, i32)] = &[
    ("129006008", 1),
    ("walk", 1),
    ("walking", 1),
    ("suspected_fall", 2),
    ("33586001", 3),
    ("sitting", 3),
    ("10904000", 4),
    ("stand", 4),
    ("standing", 4),
    ("1912002", 5),
    ("fall", 5),
    ("102538003", 6),
    ("lying", 6),
];

fn lookup(table: &[(&str, i32)], code: &str) -> Option<i32> {
    let normalized: String = code
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect();

    table
        .iter()
        .find(|(known, _)| *known == normalized)
        .map(|(_, value)| *value)
}

/// 1 awake, 2 light, 4 deep.
pub fn sleep_stage(code: &str) -> Option<i32> {
    lookup(SLEEP_STAGES, code)
}

/// 0 in bed, 1 out of bed.
pub fn bed_status(code: &str) -> Option<i32> {
    lookup(BED_STATUSES, code)
}

/// 1 walk, 2 suspected fall, 3 sitting, 4 stand, 5 fall, 6 lying.
pub fn posture(code: &str) -> Option<i32> {
    lookup(POSTURES, code)
}
