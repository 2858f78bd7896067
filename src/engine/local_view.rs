//! Local view projection
//!
//! The tick thread layers user-interface preferences on top of committed
//! state: view modes, locally hidden layers, censor reveal and the
//! inspect overlay. None of this ever reaches history. The projected
//! root layer-props list is cached so that ticks where the committed
//! root did not move can stamp the cache instead of recomputing, which
//! also keeps the props pointer stable across ticks and silences the
//! diff's layer-props latch.

use crate::canvas::layer_list::{LayerList, LayerListEntry};
use crate::canvas::layer_props::{LayerProps, LayerPropsList};
use crate::canvas::state::CanvasState;
use crate::canvas::tile::Tile;
use crate::engine::preview::INSPECT_SUBLAYER_ID;
use crate::pixels::{BlendMode, BIT15};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerViewMode {
  #[default]
  Normal,
  Solo,
  Frame,
  OnionSkin,
}

#[derive(Debug)]
pub(crate) struct LocalViewState {
  pub active_layer_id: i32,
  pub active_frame_index: i32,
  pub view_mode: LayerViewMode,
  pub reveal_censored: bool,
  pub inspect_context_id: u32,
  pub hidden_layers: Vec<i32>,
  /// Root props list of the most recent committed state this projection
  /// was computed against; `None` means a local-view mutation
  /// invalidated the cache.
  pub prev_lpl: Option<Arc<LayerPropsList>>,
  /// The projected root props list produced by the last slow path.
  pub lpl: Option<Arc<LayerPropsList>>,
}

impl LocalViewState {
  pub fn new() -> Self {
    Self {
      active_layer_id: 0,
      active_frame_index: 0,
      view_mode: LayerViewMode::Normal,
      reveal_censored: false,
      inspect_context_id: 0,
      hidden_layers: Vec::new(),
      prev_lpl: None,
      lpl: None,
    }
  }

  pub fn invalidate(&mut self) {
    self.prev_lpl = None;
  }

  pub fn has_local_changes(&self) -> bool {
    self.view_mode != LayerViewMode::Normal
      || self.reveal_censored
      || !self.hidden_layers.is_empty()
  }
}

/// Adds the translucent recolor overlay marking every tile authored by
/// `context_id`.
pub(crate) fn apply_inspect(context_id: u32, cs: Arc<CanvasState>) -> Arc<CanvasState> {
  if context_id == 0 {
    return cs;
  }
  let mut targets = Vec::new();
  let mut path = Vec::new();
  collect_inspect_targets(cs.layers(), context_id, &mut path, &mut targets);

  let mut out = cs;
  let state = Arc::make_mut(&mut out);
  for (layer_path, tile_indexes) in targets {
    let Some(content) = state.transient_content_at(&layer_path) else {
      continue;
    };
    let sub = content.sublayer_mut(INSPECT_SUBLAYER_ID);
    {
      let props = Arc::make_mut(&mut sub.props);
      props.opacity = BIT15 - BIT15 / 4;
      props.blend_mode = BlendMode::Recolor;
    }
    let sub_content = Arc::make_mut(&mut sub.content);
    for index in tile_indexes {
      sub_content.set_tile_at_index(index, Some(Tile::censored()));
    }
  }
  out
}

fn collect_inspect_targets(
  layers: &LayerList,
  context_id: u32,
  path: &mut Vec<usize>,
  targets: &mut Vec<(Vec<usize>, Vec<usize>)>,
) {
  for (i, entry) in layers.iter().enumerate() {
    path.push(i);
    match entry {
      LayerListEntry::Content(lc) => {
        let indexes: Vec<usize> = lc
          .tiles()
          .iter()
          .enumerate()
          .filter_map(|(index, tile)| match tile {
            Some(t) if t.context_id() == context_id => Some(index),
            _ => None,
          })
          .collect();
        if !indexes.is_empty() {
          targets.push((path.clone(), indexes));
        }
      }
      LayerListEntry::Group(children) => {
        collect_inspect_targets(children, context_id, path, targets);
      }
    }
  }
  path.pop();
}

/// Applies view mode, censor reveal and locally hidden layers, caching
/// the projected root for pointer-stable ticks.
pub(crate) fn apply_local_layer_props(
  lv: &mut LocalViewState,
  cs: Arc<CanvasState>,
) -> Arc<CanvasState> {
  let lpl = Arc::clone(cs.layer_props());
  let cache_valid = lv
    .prev_lpl
    .as_ref()
    .map_or(false, |prev| Arc::ptr_eq(prev, &lpl));
  if cache_valid {
    if !lv.has_local_changes() {
      return cs;
    }
    if let Some(cached) = lv.lpl.clone() {
      if Arc::ptr_eq(cs.layer_props(), &cached) {
        return cs;
      }
      let mut out = cs;
      Arc::make_mut(&mut out).set_layer_props_root(cached);
      return out;
    }
  }
  lv.prev_lpl = Some(lpl);
  set_local_layer_props(lv, cs)
}

fn set_local_layer_props(lv: &mut LocalViewState, cs: Arc<CanvasState>) -> Arc<CanvasState> {
  let mut out = cs;
  let state = Arc::make_mut(&mut out);

  if lv.view_mode != LayerViewMode::Normal || lv.reveal_censored {
    let projected = project_list(
      state.layer_props(),
      lv.view_mode,
      lv.active_layer_id,
      lv.reveal_censored,
    );
    state.set_layer_props_root(Arc::new(projected));
  }

  if !lv.hidden_layers.is_empty() {
    // Stale ids that no longer resolve are pruned as we go.
    let mut i = 0;
    while i < lv.hidden_layers.len() {
      let layer_id = lv.hidden_layers[i];
      let path = Arc::clone(state.routes())
        .search(layer_id)
        .map(<[usize]>::to_vec);
      match path.and_then(|p| state.transient_props_at(&p).map(|props| props.hidden = true)) {
        Some(()) => i += 1,
        None => {
          lv.hidden_layers.swap_remove(i);
        }
      }
    }
  }

  lv.lpl = Some(Arc::clone(state.layer_props()));
  out
}

fn project_list(
  lpl: &LayerPropsList,
  mode: LayerViewMode,
  active_layer_id: i32,
  reveal_censored: bool,
) -> LayerPropsList {
  let mut entries = Vec::with_capacity(lpl.count());
  for props in lpl.iter() {
    let (hide_layer, child_mode) = match mode {
      LayerViewMode::Solo => {
        if props.id == active_layer_id {
          (false, LayerViewMode::Normal)
        } else {
          (props.children.is_none(), LayerViewMode::Solo)
        }
      }
      // Frame and onion-skin filtering hooks in here once per-frame
      // visibility lands; until then they project like normal.
      _ => (false, mode),
    };

    let change_censored = reveal_censored && props.censored;
    let children = props
      .children
      .as_ref()
      .map(|c| Arc::new(project_list(c, child_mode, active_layer_id, reveal_censored)));

    if !hide_layer && !change_censored && children_unchanged(&props.children, &children) {
      entries.push(Arc::clone(props));
      continue;
    }
    let mut projected = LayerProps::clone(props);
    if hide_layer {
      projected.hidden_by_view_mode = true;
    }
    if change_censored {
      projected.censored = false;
    }
    projected.children = children;
    entries.push(Arc::new(projected));
  }
  LayerPropsList::new(entries)
}

fn children_unchanged(
  before: &Option<Arc<LayerPropsList>>,
  after: &Option<Arc<LayerPropsList>>,
) -> bool {
  match (before, after) {
    (None, None) => true,
    (Some(a), Some(b)) => a.as_ref() == b.as_ref(),
    _ => false,
  }
}
