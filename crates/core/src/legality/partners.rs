//! Partnership compatibility table.
//!
//! A fixed enumeration of which partner-tag combinations may occupy both
//! commander slots together. This is reference data tied to specific
//! printed sets; new partner mechanics mean adding variants and arms
//! here, not generalizing the rules.

use crate::cards::{Card, PartnerKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Partnership {
    Allowed,
    /// Same named-pair card twice; the tag matches but the pairing is
    /// with itself.
    DuplicateNamedPair,
    Incompatible,
}

pub(crate) fn check(first: &Card, second: &Card) -> Partnership {
    match (first.partner, second.partner) {
        (PartnerKind::Partner, PartnerKind::Partner) => Partnership::Allowed,
        (PartnerKind::ChooseABackground, PartnerKind::Background)
        | (PartnerKind::Background, PartnerKind::ChooseABackground) => Partnership::Allowed,
        (a, b) if a == b && a.is_named_pair() => {
            if first.id == second.id {
                Partnership::DuplicateNamedPair
            } else {
                Partnership::Allowed
            }
        }
        _ => Partnership::Incompatible,
    }
}
