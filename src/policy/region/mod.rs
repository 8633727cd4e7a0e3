//! The region policy: a heap divided into equally sized regions, a card table over it, and one
//! remembered set per region.

pub mod card;
pub mod cardtable;
pub mod hot_cards;
mod region;
mod regionspace;
pub mod remset;

pub use self::card::{Card, CardIndex, CardStatus};
pub use self::cardtable::{CardTable, CardVisitFlags};
pub use self::hot_cards::HotCards;
pub use self::region::*;
pub use self::regionspace::*;
pub use self::remset::{GlobalRemSet, RemSet};
