//! Tile-level difference between two canvas states
//!
//! The diff object is owned by the tick thread and reused across frames.
//! Marks accumulate: the tick pass adds every tile that changed between
//! consecutive view states, and a render pass consumes (and clears) the
//! marks it walks. Pointer equality drives the comparison; the
//! immutability contract makes it exact at tile granularity.

use crate::canvas::layer_content::LayerContent;
use crate::canvas::layer_list::{LayerList, LayerListEntry};
use crate::canvas::layer_props::{LayerProps, LayerPropsList};
use crate::canvas::state::CanvasState;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct CanvasDiff {
  xtiles: i32,
  ytiles: i32,
  layer_props_changed: bool,
  dirty: Vec<bool>,
}

impl CanvasDiff {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn xtiles(&self) -> i32 {
    self.xtiles
  }

  pub fn ytiles(&self) -> i32 {
    self.ytiles
  }

  /// Records the difference between `cs` and `prev` on top of any marks
  /// a render pass has not consumed yet.
  pub fn check(&mut self, cs: &CanvasState, prev: &CanvasState) {
    let (xtiles, ytiles) = cs.tile_counts();
    if xtiles != self.xtiles || ytiles != self.ytiles {
      self.xtiles = xtiles;
      self.ytiles = ytiles;
      self.dirty = vec![false; (xtiles.max(0) * ytiles.max(0)) as usize];
      self.mark_all();
    } else if cs.width() != prev.width()
      || cs.height() != prev.height()
      || cs.offset_x() != prev.offset_x()
      || cs.offset_y() != prev.offset_y()
    {
      self.mark_all();
    } else {
      let backgrounds_differ = match (cs.background(), prev.background()) {
        (Some(a), Some(b)) => !Arc::ptr_eq(a, b),
        (None, None) => false,
        _ => true,
      };
      if backgrounds_differ {
        self.mark_all();
      } else {
        self.diff_lists(cs.layers(), prev.layers(), cs.layer_props(), prev.layer_props());
      }
    }

    if !Arc::ptr_eq(cs.layer_props(), prev.layer_props()) {
      self.layer_props_changed = true;
    }
  }

  pub fn mark_all(&mut self) {
    self.dirty.fill(true);
  }

  fn mark_index(&mut self, index: usize) {
    if let Some(slot) = self.dirty.get_mut(index) {
      *slot = true;
    }
  }

  /// Latched layer-props change flag; reading resets it.
  pub fn layer_props_changed_reset(&mut self) -> bool {
    std::mem::replace(&mut self.layer_props_changed, false)
  }

  /// Visits every marked position without consuming the marks.
  pub fn each_pos(&self, mut f: impl FnMut(i32, i32)) {
    for (i, dirty) in self.dirty.iter().enumerate() {
      if *dirty {
        let i = i as i32;
        f(i % self.xtiles, i / self.xtiles);
      }
    }
  }

  /// Visits and clears every marked position.
  pub fn each_pos_reset(&mut self, mut f: impl FnMut(i32, i32)) {
    for (i, dirty) in self.dirty.iter_mut().enumerate() {
      if std::mem::replace(dirty, false) {
        let i = i as i32;
        f(i % self.xtiles, i / self.xtiles);
      }
    }
  }

  /// Visits and clears marked positions inside the inclusive tile
  /// rectangle; marks outside it stay for a later pass.
  pub fn each_pos_tile_bounds_reset(
    &mut self,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    mut f: impl FnMut(i32, i32),
  ) {
    for (i, dirty) in self.dirty.iter_mut().enumerate() {
      let i = i as i32;
      let x = i % self.xtiles;
      let y = i / self.xtiles;
      if x >= left && x <= right && y >= top && y <= bottom {
        if std::mem::replace(&mut *dirty, false) {
          f(x, y);
        }
      }
    }
  }

  fn diff_lists(
    &mut self,
    layers: &Arc<LayerList>,
    prev_layers: &Arc<LayerList>,
    props: &Arc<LayerPropsList>,
    prev_props: &Arc<LayerPropsList>,
  ) {
    if Arc::ptr_eq(layers, prev_layers) && Arc::ptr_eq(props, prev_props) {
      return;
    }
    if layers.count() != prev_layers.count() || props.count() != prev_props.count() {
      self.mark_all();
      return;
    }
    for i in 0..layers.count() {
      let lp = props.at(i);
      let prev_lp = prev_props.at(i);
      if renders_differently(lp, prev_lp) {
        self.mark_entry(layers.at(i));
        self.mark_entry(prev_layers.at(i));
        continue;
      }
      match (layers.at(i), prev_layers.at(i)) {
        (LayerListEntry::Content(a), LayerListEntry::Content(b)) => {
          if !Arc::ptr_eq(a, b) {
            self.diff_content(a, b);
          }
        }
        (LayerListEntry::Group(a), LayerListEntry::Group(b)) => {
          match (&lp.children, &prev_lp.children) {
            (Some(ca), Some(cb)) => self.diff_lists(a, b, ca, cb),
            _ => {
              self.mark_entry(layers.at(i));
              self.mark_entry(prev_layers.at(i));
            }
          }
        }
        (a, b) => {
          self.mark_entry(a);
          self.mark_entry(b);
        }
      }
    }
  }

  fn diff_content(&mut self, a: &LayerContent, b: &LayerContent) {
    let len = a.tiles().len().min(b.tiles().len());
    for i in 0..len {
      let changed = match (a.tile_at_index(i), b.tile_at_index(i)) {
        (Some(ta), Some(tb)) => !Arc::ptr_eq(ta, tb),
        (None, None) => false,
        _ => true,
      };
      if changed {
        self.mark_index(i);
      }
    }
    self.diff_sublayers(a, b);
  }

  fn diff_sublayers(&mut self, a: &LayerContent, b: &LayerContent) {
    if a.sublayers().is_empty() && b.sublayers().is_empty() {
      return;
    }
    for sub in a.sublayers() {
      match b.sublayer_at(sub.props.id) {
        Some(other) => {
          if renders_differently(&sub.props, &other.props) {
            self.mark_content(&sub.content);
            self.mark_content(&other.content);
          } else if !Arc::ptr_eq(&sub.content, &other.content) {
            self.diff_content(&sub.content, &other.content);
          }
        }
        None => self.mark_content(&sub.content),
      }
    }
    for sub in b.sublayers() {
      if a.sublayer_at(sub.props.id).is_none() {
        self.mark_content(&sub.content);
      }
    }
  }

  fn mark_entry(&mut self, entry: &LayerListEntry) {
    match entry {
      LayerListEntry::Content(lc) => self.mark_content(lc),
      LayerListEntry::Group(children) => {
        for child in children.iter() {
          self.mark_entry(child);
        }
      }
    }
  }

  fn mark_content(&mut self, lc: &LayerContent) {
    for (i, tile) in lc.tiles().iter().enumerate() {
      if tile.is_some() {
        self.mark_index(i);
      }
    }
    for sub in lc.sublayers() {
      self.mark_content(&sub.content);
    }
  }
}

fn renders_differently(a: &LayerProps, b: &LayerProps) -> bool {
  a.visible() != b.visible()
    || a.opacity != b.opacity
    || a.blend_mode != b.blend_mode
    || a.censored != b.censored
    || a.isolated != b.isolated
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::canvas::layer_props::LayerProps;
  use crate::pixels::{BlendMode, UPixel15, BIT15};

  fn state_with_layer(width: i32, height: i32) -> Arc<CanvasState> {
    let mut cs = CanvasState::new();
    cs.set_dimensions(width, height, 0, 0);
    cs.layers_mut()
      .push(LayerListEntry::Content(Arc::new(LayerContent::new(
        width, height,
      ))));
    cs.layer_props_mut().push(Arc::new(LayerProps::new(1)));
    Arc::new(cs)
  }

  fn positions(diff: &CanvasDiff) -> Vec<(i32, i32)> {
    let mut out = Vec::new();
    diff.each_pos(|x, y| out.push((x, y)));
    out
  }

  #[test]
  fn identical_states_produce_no_marks() {
    let cs = state_with_layer(128, 128);
    let mut diff = CanvasDiff::new();
    diff.check(&cs, &cs);
    // First check sizes the grid and marks everything; drain it.
    diff.each_pos_reset(|_, _| {});
    diff.check(&cs, &cs);
    assert!(positions(&diff).is_empty());
  }

  #[test]
  fn single_tile_edit_marks_one_position() {
    let prev = state_with_layer(128, 128);
    let mut next = Arc::clone(&prev);
    Arc::make_mut(&mut next)
      .transient_content_at(&[0])
      .unwrap()
      .fill_rect(
        1,
        BlendMode::Replace,
        70,
        70,
        80,
        80,
        UPixel15 { b: BIT15, g: 0, r: 0, a: BIT15 },
      );

    let mut diff = CanvasDiff::new();
    diff.check(&prev, &prev);
    diff.each_pos_reset(|_, _| {});
    diff.check(&next, &prev);
    assert_eq!(positions(&diff), vec![(1, 1)]);
  }

  #[test]
  fn hidden_toggle_marks_layer_tiles() {
    let prev = state_with_layer(128, 128);
    let mut base = Arc::clone(&prev);
    Arc::make_mut(&mut base)
      .transient_content_at(&[0])
      .unwrap()
      .fill_rect(
        1,
        BlendMode::Replace,
        0,
        0,
        10,
        10,
        UPixel15 { b: BIT15, g: 0, r: 0, a: BIT15 },
      );
    let mut hidden = Arc::clone(&base);
    Arc::make_mut(&mut hidden)
      .transient_props_at(&[0])
      .unwrap()
      .hidden = true;

    let mut diff = CanvasDiff::new();
    diff.check(&base, &base);
    diff.each_pos_reset(|_, _| {});
    diff.check(&hidden, &base);
    assert_eq!(positions(&diff), vec![(0, 0)]);
    assert!(diff.layer_props_changed_reset());
    assert!(!diff.layer_props_changed_reset());
  }

  #[test]
  fn bounds_reset_leaves_outside_marks() {
    let cs = state_with_layer(256, 64);
    let mut diff = CanvasDiff::new();
    diff.check(&cs, &cs); // sizes the grid, marks all 4x1
    let mut inside = Vec::new();
    diff.each_pos_tile_bounds_reset(0, 0, 1, 0, |x, y| inside.push((x, y)));
    assert_eq!(inside, vec![(0, 0), (1, 0)]);
    assert_eq!(positions(&diff), vec![(2, 0), (3, 0)]);
  }
}
