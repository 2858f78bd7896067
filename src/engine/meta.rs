//! Per-intake aggregation of presence traffic
//!
//! Laser trails and pointer moves arrive far more often than a frame
//! can usefully show. Intake folds them into this buffer so each call
//! reports at most one entry per user and kind, in first-seen order,
//! with the latest value winning. The buffer is engine-lifetime scratch,
//! cleared at the start of every intake call.

use crate::acl::AclChange;
use crate::engine::MetaSink;

/// Bound on distinct context ids per aggregation.
const CONTEXT_ID_COUNT: usize = 256;

#[derive(Debug, Clone, Copy, Default)]
struct LaserValue {
  persistence: u8,
  color: u32,
}

#[derive(Debug, Clone, Copy, Default)]
struct CursorValue {
  x: i32,
  y: i32,
}

/// Dense first-seen-order change set over 8-bit context ids.
struct ChangeSet<T> {
  users: Vec<u8>,
  active: [bool; CONTEXT_ID_COUNT],
  values: [T; CONTEXT_ID_COUNT],
}

impl<T: Copy + Default> ChangeSet<T> {
  fn new() -> Self {
    Self {
      users: Vec::new(),
      active: [false; CONTEXT_ID_COUNT],
      values: [T::default(); CONTEXT_ID_COUNT],
    }
  }

  fn clear(&mut self) {
    for &user in &self.users {
      self.active[usize::from(user)] = false;
    }
    self.users.clear();
  }

  fn fold(&mut self, context_id: u8, value: T) {
    let slot = usize::from(context_id);
    if !self.active[slot] {
      self.active[slot] = true;
      self.users.push(context_id);
    }
    self.values[slot] = value;
  }

  fn iter(&self) -> impl Iterator<Item = (u8, T)> + '_ {
    self
      .users
      .iter()
      .map(|&user| (user, self.values[usize::from(user)]))
  }
}

pub(crate) struct MetaBuffer {
  acl_change_flags: AclChange,
  default_layer: Option<u16>,
  laser: ChangeSet<LaserValue>,
  cursor: ChangeSet<CursorValue>,
}

impl MetaBuffer {
  pub(crate) fn new() -> Self {
    Self {
      acl_change_flags: AclChange::empty(),
      default_layer: None,
      laser: ChangeSet::new(),
      cursor: ChangeSet::new(),
    }
  }

  pub(crate) fn clear(&mut self) {
    self.acl_change_flags = AclChange::empty();
    self.default_layer = None;
    self.laser.clear();
    self.cursor.clear();
  }

  pub(crate) fn fold_acl(&mut self, flags: AclChange) {
    self.acl_change_flags |= flags;
  }

  pub(crate) fn fold_laser_trail(&mut self, context_id: u32, persistence: u8, color: u32) {
    self
      .laser
      .fold(context_id as u8, LaserValue { persistence, color });
  }

  pub(crate) fn fold_move_pointer(&mut self, context_id: u32, x: i32, y: i32) {
    self.cursor.fold(context_id as u8, CursorValue { x, y });
  }

  pub(crate) fn fold_default_layer(&mut self, layer_id: u16) {
    self.default_layer = Some(layer_id);
  }

  /// Replays the aggregate to the caller's callbacks.
  pub(crate) fn deliver(&self, sink: &mut dyn MetaSink) {
    let changes = self.acl_change_flags & AclChange::CHANGE_MASK;
    if !changes.is_empty() {
      sink.acls_changed(changes);
    }
    for (user, laser) in self.laser.iter() {
      sink.laser_trail(u32::from(user), laser.persistence, laser.color);
    }
    for (user, cursor) in self.cursor.iter() {
      sink.move_pointer(u32::from(user), cursor.x, cursor.y);
    }
    if let Some(layer_id) = self.default_layer {
      sink.default_layer_set(layer_id);
    }
  }
}

impl std::fmt::Debug for MetaBuffer {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("MetaBuffer")
      .field("acl_change_flags", &self.acl_change_flags)
      .field("default_layer", &self.default_layer)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[derive(Default)]
  struct Collected {
    lasers: Vec<(u32, u8, u32)>,
    cursors: Vec<(u32, i32, i32)>,
    default_layers: Vec<u16>,
    acl_changes: Vec<AclChange>,
  }

  impl MetaSink for Collected {
    fn acls_changed(&mut self, changes: AclChange) {
      self.acl_changes.push(changes);
    }
    fn laser_trail(&mut self, context_id: u32, persistence: u8, color: u32) {
      self.lasers.push((context_id, persistence, color));
    }
    fn move_pointer(&mut self, context_id: u32, x: i32, y: i32) {
      self.cursors.push((context_id, x, y));
    }
    fn default_layer_set(&mut self, layer_id: u16) {
      self.default_layers.push(layer_id);
    }
  }

  #[test]
  fn repeated_user_reports_once_with_last_value() {
    let mut meta = MetaBuffer::new();
    meta.fold_laser_trail(5, 10, 1);
    meta.fold_laser_trail(7, 20, 2);
    meta.fold_laser_trail(5, 30, 3);

    let mut sink = Collected::default();
    meta.deliver(&mut sink);
    assert_eq!(sink.lasers, vec![(5, 30, 3), (7, 20, 2)]);
  }

  #[test]
  fn default_layer_is_last_write_wins() {
    let mut meta = MetaBuffer::new();
    meta.fold_default_layer(4);
    meta.fold_default_layer(9);
    let mut sink = Collected::default();
    meta.deliver(&mut sink);
    assert_eq!(sink.default_layers, vec![9]);
  }

  #[test]
  fn filtered_bit_never_reaches_the_sink() {
    let mut meta = MetaBuffer::new();
    meta.fold_acl(AclChange::FILTERED | AclChange::LAYERS);
    let mut sink = Collected::default();
    meta.deliver(&mut sink);
    assert_eq!(sink.acl_changes, vec![AclChange::LAYERS]);
  }

  #[test]
  fn clear_resets_first_seen_tracking() {
    let mut meta = MetaBuffer::new();
    meta.fold_move_pointer(1, 5, 5);
    meta.clear();
    meta.fold_move_pointer(2, 7, 7);
    let mut sink = Collected::default();
    meta.deliver(&mut sink);
    assert_eq!(sink.cursors, vec![(2, 7, 7)]);
  }
}
