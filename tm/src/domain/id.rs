//! Identifier generation
//!
//! All IDs use the format: `{kind}-{uuid-v7}`
//! Example: `task-01930a5e-7c1b-7f3a-9d2e-5b8c4a1f0e2d`
//!
//! UUIDv7 is time-ordered, so IDs of the same kind sort by creation time.

use uuid::Uuid;

/// Generate a new unique ID for the given kind
pub fn new_id(kind: &str) -> String {
    format!("{}-{}", kind, Uuid::now_v7())
}

/// Extract the kind prefix from an ID produced by [`new_id`]
pub fn kind_of(id: &str) -> Option<&str> {
    let (kind, rest) = id.split_once('-')?;
    Uuid::parse_str(rest).ok().map(|_| kind)
}
