//! Sense inventory
//!
//! Links on disambiguation pages and links elsewhere whose text carries a
//! disambiguation page's group title are evidence for senses. Candidates
//! passing the thresholds become senses; groups, targets and senses get
//! contiguous ids in descending evidence order.

pub mod builder;
pub mod evidence;

pub use builder::{build_inventory, Sense, SenseGroup, SenseInventory, SenseTarget, SenseThresholds};
pub use evidence::{
    collect_evidence, see_also_sections, GroupMention, InventoryInput, PageLink, SectionOutline,
    SenseEvidence,
};
