//! Database entities.

#![allow(missing_docs)]

pub mod group_ban;
pub mod group_member;
pub mod history;
pub mod room;
pub mod room_group;
pub mod room_member;

pub use group_ban::Entity as GroupBan;
pub use group_member::Entity as GroupMember;
pub use history::Entity as History;
pub use room::Entity as Room;
pub use room_group::Entity as RoomGroup;
pub use room_member::Entity as RoomMember;

/// Split a stored comma-separated flag list.
#[must_use]
pub fn split_flags(flags: &str) -> Vec<String> {
    flags
        .split(',')
        .filter(|f| !f.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// Join flags for storage.
#[must_use]
pub fn join_flags<S: AsRef<str>>(flags: &[S]) -> String {
    flags
        .iter()
        .map(AsRef::as_ref)
        .filter(|f| !f.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}
