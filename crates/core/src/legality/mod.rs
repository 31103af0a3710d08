//! Pauper Commander legality rules.
//!
//! Pure evaluation over an already-resolved card list; nothing here touches
//! storage or the network. The evaluator runs its checks in a fixed order
//! and stops at the first failure, so the reason a deck is illegal is
//! deterministic for a given list.

mod banlist;
mod evaluator;
mod partners;

pub use evaluator::{evaluate, DeckEntry, Verdict};
