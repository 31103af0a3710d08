//! The legality evaluator itself.

use crate::cards::{Card, ColorIdentity};

use super::banlist;
use super::partners::{self, Partnership};

/// A resolved card together with its commander-slot flag.
#[derive(Debug, Clone)]
pub struct DeckEntry {
    pub card: Card,
    pub is_commander: bool,
}

/// Outcome of a legality evaluation.
///
/// The boolean is the stored fact; the reason is a diagnostic for humans
/// and is `None` exactly when the deck is legal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub legal: bool,
    pub reason: Option<String>,
}

impl Verdict {
    fn legal() -> Self {
        Verdict {
            legal: true,
            reason: None,
        }
    }

    fn illegal(reason: impl Into<String>) -> Self {
        Verdict {
            legal: false,
            reason: Some(reason.into()),
        }
    }
}

/// Evaluate a deck's card list against the format rules.
///
/// Checks run in a fixed order and short-circuit, so the same list always
/// produces the same verdict and reason:
/// 1. the deck has cards at all
/// 2. no banned cards
/// 3. commander slots are plausible (count, uncommon printing, creature
///    requirement, partnership)
/// 4. every card fits the commanders' combined color identity
/// 5. every non-commander was printed at common somewhere
pub fn evaluate(entries: &[DeckEntry]) -> Verdict {
    if entries.is_empty() {
        return Verdict::illegal("no cards in deck");
    }

    if entries.iter().any(|e| banlist::is_banned(&e.card.name)) {
        return Verdict::illegal("contains banned card");
    }

    let commanders: Vec<&Card> = entries
        .iter()
        .filter(|e| e.is_commander)
        .map(|e| &e.card)
        .collect();

    match commanders.as_slice() {
        [] => return Verdict::illegal("no commander"),
        [commander] => {
            if !commander.ever_uncommon {
                return Verdict::illegal(format!(
                    "commander {} not printed at uncommon",
                    commander.name
                ));
            }
            if !commander.is_creature() {
                return Verdict::illegal(format!("commander {} is not a creature", commander.name));
            }
        }
        [first, second] => {
            if !first.ever_uncommon {
                return Verdict::illegal(format!(
                    "commander {} not printed at uncommon",
                    first.name
                ));
            }
            if !second.ever_uncommon {
                return Verdict::illegal(format!(
                    "commander {} not printed at uncommon",
                    second.name
                ));
            }
            if !first.is_creature() && !second.is_creature() {
                return Verdict::illegal("at least one commander must be a creature");
            }
            match partners::check(first, second) {
                Partnership::Allowed => {}
                Partnership::DuplicateNamedPair => {
                    return Verdict::illegal(format!(
                        "invalid partnership: two copies of \"{}\"",
                        first.name
                    ));
                }
                Partnership::Incompatible => {
                    return Verdict::illegal(format!(
                        "invalid partnership: \"{}\" and \"{}\"",
                        first.name, second.name
                    ));
                }
            }
        }
        more => {
            return Verdict::illegal(format!("{} is too many commanders", more.len()));
        }
    }

    // The commanders' combined identity bounds the whole list. A
    // five-color pairing excludes nothing.
    let deck_identity = commanders
        .iter()
        .fold(ColorIdentity::COLORLESS, |acc, c| acc.union(c.identity));
    if !deck_identity.is_five_color() {
        let out_of_identity = entries
            .iter()
            .filter(|e| !e.card.identity.within(deck_identity))
            .count();
        if out_of_identity > 0 {
            return Verdict::illegal(format!("{} cards out of color identity", out_of_identity));
        }
    }

    if entries.iter().any(|e| !e.is_commander && !e.card.ever_common) {
        return Verdict::illegal("non-commander not printed at common");
    }

    Verdict::legal()
}
