//! Canvas history, the authoritative mutator of committed state
//!
//! History owns the committed canvas chain. All mutation funnels through
//! the paint thread's `handle*` calls; the frame thread observes results
//! through `compare_and_get`, which hands out the latest committed
//! snapshot only when it differs from the one the caller already holds.
//! The save-point callback fires synchronously from inside mutation
//! whenever a stable state commits, so collaborators (session resets,
//! autosave) see states in commit order.

use crate::canvas::handle::apply_message;
use crate::canvas::state::CanvasState;
use crate::error::{HistoryError, Result};
use crate::msg::Message;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Upper bound on distinct users reported per tick.
pub const USER_CURSOR_COUNT: usize = 256;

/// Latest stroke position of one user, for presence display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserCursor {
  pub context_id: u32,
  pub layer_id: u16,
  pub x: i32,
  pub y: i32,
}

/// Reusable output buffer for `compare_and_get`; at most one entry per
/// user, in first-seen order.
#[derive(Debug, Default)]
pub struct UserCursorBuffer {
  pub cursors: Vec<UserCursor>,
}

/// Called under the history lock each time a stable state commits.
pub type SavePointFn = Box<dyn FnMut(&Arc<CanvasState>, bool) + Send>;

#[derive(Debug, Clone)]
struct SavePoint {
  cs: Arc<CanvasState>,
  snapshot_requested: bool,
}

struct HistoryInner {
  cs: Arc<CanvasState>,
  save_points: Vec<SavePoint>,
  local_drawing_in_progress: bool,
  snapshot_requested: bool,
  cursors: Vec<UserCursor>,
  save_point: SavePointFn,
}

pub struct CanvasHistory {
  inner: Mutex<HistoryInner>,
}

impl CanvasHistory {
  pub fn new(initial: Option<Arc<CanvasState>>, save_point: SavePointFn) -> Self {
    let mut save_point = save_point;
    let cs = initial.unwrap_or_else(|| Arc::new(CanvasState::new()));
    let mut save_points = Vec::new();
    if cs.width() > 0 && cs.height() > 0 {
      save_point(&cs, false);
      save_points.push(SavePoint { cs: Arc::clone(&cs), snapshot_requested: false });
    }
    Self {
      inner: Mutex::new(HistoryInner {
        cs,
        save_points,
        local_drawing_in_progress: false,
        snapshot_requested: false,
        cursors: Vec::new(),
        save_point,
      }),
    }
  }

  pub fn local_drawing_in_progress_set(&self, local_drawing_in_progress: bool) {
    let mut inner = self.inner.lock();
    inner.local_drawing_in_progress = local_drawing_in_progress;
    if !local_drawing_in_progress {
      inner.maybe_save_point();
    }
  }

  /// Latest committed state if it differs from `prev`, else `None`.
  /// Accumulated user cursors drain into `out_cursors` either way.
  pub fn compare_and_get(
    &self,
    prev: &Arc<CanvasState>,
    out_cursors: &mut UserCursorBuffer,
  ) -> Option<Arc<CanvasState>> {
    let mut inner = self.inner.lock();
    out_cursors.cursors.clear();
    out_cursors.cursors.append(&mut inner.cursors);
    if Arc::ptr_eq(&inner.cs, prev) {
      None
    } else {
      Some(Arc::clone(&inner.cs))
    }
  }

  /// Discards all history and returns to the empty state.
  pub fn reset(&self) {
    let mut inner = self.inner.lock();
    inner.cs = Arc::new(CanvasState::new());
    inner.save_points.clear();
    inner.cursors.clear();
    inner.snapshot_requested = false;
  }

  /// Truncates history to the current committed state without touching
  /// the canvas itself.
  pub fn soft_reset(&self) {
    let mut inner = self.inner.lock();
    inner.save_points.clear();
    let cs = Arc::clone(&inner.cs);
    (inner.save_point)(&cs, false);
    inner
      .save_points
      .push(SavePoint { cs, snapshot_requested: false });
  }

  /// Requests a snapshot save point. It fires immediately on a stable
  /// state, otherwise on the next stable commit.
  pub fn snapshot(&self) -> Result<()> {
    let mut inner = self.inner.lock();
    if inner.cs.width() <= 0 || inner.cs.height() <= 0 {
      return Err(HistoryError::NothingToSnapshot.into());
    }
    inner.snapshot_requested = true;
    inner.maybe_save_point();
    Ok(())
  }

  /// Drops retained save points; called at teardown.
  pub fn cleanup(&self) {
    self.inner.lock().save_points.clear();
  }

  pub fn handle(&self, msg: &Message) -> Result<()> {
    self.apply(msg)
  }

  pub fn handle_local(&self, msg: &Message) -> Result<()> {
    self.apply(msg)
  }

  /// Applies a batch of dab messages in one go. Failures are logged per
  /// message; processing continues with the rest of the batch.
  pub fn handle_multidab(&self, msgs: &[Message]) {
    for msg in msgs {
      if let Err(err) = self.apply(msg) {
        warn!(kind = msg.kind() as u8, %err, "Handle remote command");
      }
    }
  }

  pub fn handle_local_multidab(&self, msgs: &[Message]) {
    for msg in msgs {
      if let Err(err) = self.apply(msg) {
        warn!(kind = msg.kind() as u8, %err, "Handle local command");
      }
    }
  }

  fn apply(&self, msg: &Message) -> Result<()> {
    let mut inner = self.inner.lock();
    let mut cs = Arc::clone(&inner.cs);
    let cursor = apply_message(&mut cs, msg)?;
    inner.cs = cs;
    if let Some(cursor) = cursor {
      inner.record_cursor(UserCursor {
        context_id: msg.context_id(),
        layer_id: cursor.layer_id,
        x: cursor.x,
        y: cursor.y,
      });
    }
    inner.maybe_save_point();
    Ok(())
  }

  /// The committed state as of now; test and debugging aid.
  pub fn current(&self) -> Arc<CanvasState> {
    Arc::clone(&self.inner.lock().cs)
  }

  /// Number of retained save points.
  pub fn save_point_count(&self) -> usize {
    self.inner.lock().save_points.len()
  }

  /// The most recent save point and whether it was snapshot-requested.
  pub fn last_save_point(&self) -> Option<(Arc<CanvasState>, bool)> {
    self
      .inner
      .lock()
      .save_points
      .last()
      .map(|sp| (Arc::clone(&sp.cs), sp.snapshot_requested))
  }
}

impl HistoryInner {
  fn record_cursor(&mut self, cursor: UserCursor) {
    if let Some(existing) = self
      .cursors
      .iter_mut()
      .find(|c| c.context_id == cursor.context_id)
    {
      *existing = cursor;
    } else if self.cursors.len() < USER_CURSOR_COUNT {
      self.cursors.push(cursor);
    }
  }

  fn maybe_save_point(&mut self) {
    if self.snapshot_requested && !self.local_drawing_in_progress {
      self.snapshot_requested = false;
      let cs = Arc::clone(&self.cs);
      (self.save_point)(&cs, true);
      self
        .save_points
        .push(SavePoint { cs, snapshot_requested: true });
    }
  }
}

impl std::fmt::Debug for CanvasHistory {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CanvasHistory").finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::msg::Payload;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn resize_msg(w: i32, h: i32) -> Message {
    Message::new(1, Payload::CanvasResize { top: 0, right: w, bottom: h, left: 0 })
  }

  fn layer_msg(id: u16) -> Message {
    Message::new(1, Payload::LayerCreate { layer_id: id, group: false })
  }

  #[test]
  fn compare_and_get_null_iff_pointer_equal() {
    let ch = CanvasHistory::new(None, Box::new(|_, _| {}));
    let mut cursors = UserCursorBuffer::default();
    let initial = ch.current();
    assert!(ch.compare_and_get(&initial, &mut cursors).is_none());

    ch.handle(&resize_msg(64, 64)).unwrap();
    let next = ch
      .compare_and_get(&initial, &mut cursors)
      .expect("state changed");
    assert!(!Arc::ptr_eq(&next, &initial));
    assert!(ch.compare_and_get(&next, &mut cursors).is_none());
  }

  #[test]
  fn failed_command_leaves_state_untouched() {
    let ch = CanvasHistory::new(None, Box::new(|_, _| {}));
    ch.handle(&resize_msg(64, 64)).unwrap();
    let before = ch.current();
    assert!(ch.handle(&layer_msg(0).clone()).is_ok());
    let dup = Message::new(1, Payload::LayerCreate { layer_id: 0, group: false });
    assert!(ch.handle(&dup).is_err());
    let after = ch.current();
    // The duplicate create failed after the first create succeeded.
    assert!(!Arc::ptr_eq(&before, &after));
    let mut cursors = UserCursorBuffer::default();
    assert!(ch.compare_and_get(&after, &mut cursors).is_none());
  }

  #[test]
  fn snapshot_defers_until_drawing_ends() {
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = Arc::clone(&fired);
    let ch = CanvasHistory::new(
      None,
      Box::new(move |_, snapshot_requested| {
        if snapshot_requested {
          fired_in_cb.fetch_add(1, Ordering::SeqCst);
        }
      }),
    );
    ch.handle(&resize_msg(64, 64)).unwrap();
    ch.local_drawing_in_progress_set(true);
    ch.snapshot().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    ch.local_drawing_in_progress_set(false);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn snapshot_of_empty_canvas_fails() {
    let ch = CanvasHistory::new(None, Box::new(|_, _| {}));
    assert!(ch.snapshot().is_err());
  }

  #[test]
  fn reset_returns_to_empty_state() {
    let ch = CanvasHistory::new(None, Box::new(|_, _| {}));
    ch.handle(&resize_msg(64, 64)).unwrap();
    ch.reset();
    let cs = ch.current();
    assert_eq!(cs.width(), 0);
    assert_eq!(cs.height(), 0);
  }

  #[test]
  fn soft_reset_keeps_canvas_and_records_save_point() {
    let ch = CanvasHistory::new(None, Box::new(|_, _| {}));
    ch.handle(&resize_msg(64, 64)).unwrap();
    let before = ch.current();
    ch.soft_reset();
    assert!(Arc::ptr_eq(&before, &ch.current()));
    assert_eq!(ch.save_point_count(), 1);
    let (sp, snapshot_requested) = ch.last_save_point().unwrap();
    assert!(Arc::ptr_eq(&before, &sp));
    assert!(!snapshot_requested);
    ch.cleanup();
    assert_eq!(ch.save_point_count(), 0);
  }
}
