//! The format ban list, by card name.

use once_cell::sync::Lazy;
use std::collections::HashSet;

static BANNED_NAMES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        "Mystic Remora",
        "Rhystic Study",
        // not banned as such, but disallowed as a commander and
        // never printed at common
        "Dryad Arbor",
        // cards struck from the format by name, whatever their rarity
        "Pradesh Gypsies",
        "Stone-Throwing Devils",
    ])
});

pub(crate) fn is_banned(name: &str) -> bool {
    BANNED_NAMES.contains(name)
}
