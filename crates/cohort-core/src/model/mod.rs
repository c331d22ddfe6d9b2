//! Domain types shared by the allocation and selection engines.

pub mod member;
pub mod rule;
pub mod session;

pub use member::{
    Attributes, GroupMember, MemberSelectionDetail, PoolMember, Preference, SelectionType,
    normalize_identifier, parse_attributes,
};
pub use rule::{Rule, RuleSpec, RuleTarget};
pub use session::{
    AccessCode, CodeStatus, Group, GroupingSession, SelectionSession, SessionKind,
};
