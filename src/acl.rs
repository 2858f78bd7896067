//! Access-control hook
//!
//! The engine treats ACL policy as an opaque predicate: every remote
//! message is fed through it before classification, and the returned
//! flags say whether the message is filtered out and which ACL tables
//! changed as a result. The real evaluator lives with the session layer;
//! the engine only aggregates the change flags per intake call.

use crate::msg::Message;
use bitflags::bitflags;

bitflags! {
  /// Result flags of feeding one message to the ACL state.
  #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
  pub struct AclChange: u8 {
    /// User list or per-user rights changed.
    const USERS = 1 << 0;
    /// Per-layer access changed.
    const LAYERS = 1 << 1;
    /// Feature tiers changed.
    const FEATURES = 1 << 2;
    /// The message must be dropped without further processing.
    const FILTERED = 1 << 7;
  }
}

impl AclChange {
  /// The bits reported to the `acls_changed` callback.
  pub const CHANGE_MASK: AclChange = AclChange::USERS
    .union(AclChange::LAYERS)
    .union(AclChange::FEATURES);
}

pub trait AclState: Send + Sync {
  fn handle(&self, msg: &Message) -> AclChange;
}

/// Permissive ACL state that never filters and never changes.
#[derive(Debug, Default)]
pub struct AllowAll;

impl AclState for AllowAll {
  fn handle(&self, _msg: &Message) -> AclChange {
    AclChange::empty()
  }
}
