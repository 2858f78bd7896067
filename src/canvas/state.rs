//! Canvas state, the immutable snapshot of the whole document
//!
//! A published `CanvasState` is frozen: readers on any thread may hold a
//! reference for as long as they like. The single mutator (canvas
//! history on the paint thread, or the tick thread while projecting a
//! view) edits through `Arc::make_mut`, which forks shared nodes and
//! mutates unique ones in place, so an edit never disturbs published
//! snapshots.

use crate::canvas::document::{AnnotationList, DocumentMetadata, Timeline};
use crate::canvas::layer_content::LayerContent;
use crate::canvas::layer_list::{LayerList, LayerListEntry};
use crate::canvas::layer_props::{LayerProps, LayerPropsList};
use crate::canvas::routes::LayerRoutes;
use crate::canvas::tile::{tile_counts, Tile};
use std::sync::{Arc, OnceLock};

#[derive(Debug)]
pub struct CanvasState {
  width: i32,
  height: i32,
  offset_x: i32,
  offset_y: i32,
  background: Option<Arc<Tile>>,
  layers: Arc<LayerList>,
  layer_props: Arc<LayerPropsList>,
  annotations: Arc<AnnotationList>,
  metadata: Arc<DocumentMetadata>,
  timeline: Arc<Timeline>,
  routes: OnceLock<Arc<LayerRoutes>>,
}

impl Clone for CanvasState {
  fn clone(&self) -> Self {
    Self {
      width: self.width,
      height: self.height,
      offset_x: self.offset_x,
      offset_y: self.offset_y,
      background: self.background.clone(),
      layers: Arc::clone(&self.layers),
      layer_props: Arc::clone(&self.layer_props),
      annotations: Arc::clone(&self.annotations),
      metadata: Arc::clone(&self.metadata),
      timeline: Arc::clone(&self.timeline),
      // The routes cache is not carried across forks; the fork usually
      // exists to be mutated, which would invalidate it anyway.
      routes: OnceLock::new(),
    }
  }
}

impl Default for CanvasState {
  fn default() -> Self {
    Self::new()
  }
}

impl CanvasState {
  /// The empty zero-sized state history starts from.
  pub fn new() -> Self {
    Self {
      width: 0,
      height: 0,
      offset_x: 0,
      offset_y: 0,
      background: None,
      layers: Arc::new(LayerList::default()),
      layer_props: Arc::new(LayerPropsList::default()),
      annotations: Arc::new(AnnotationList::default()),
      metadata: Arc::new(DocumentMetadata::default()),
      timeline: Arc::new(Timeline::default()),
      routes: OnceLock::new(),
    }
  }

  pub fn width(&self) -> i32 {
    self.width
  }

  pub fn height(&self) -> i32 {
    self.height
  }

  pub fn offset_x(&self) -> i32 {
    self.offset_x
  }

  pub fn offset_y(&self) -> i32 {
    self.offset_y
  }

  pub fn tile_counts(&self) -> (i32, i32) {
    tile_counts(self.width, self.height)
  }

  pub fn background(&self) -> Option<&Arc<Tile>> {
    self.background.as_ref()
  }

  pub fn layers(&self) -> &Arc<LayerList> {
    &self.layers
  }

  pub fn layer_props(&self) -> &Arc<LayerPropsList> {
    &self.layer_props
  }

  pub fn annotations(&self) -> &Arc<AnnotationList> {
    &self.annotations
  }

  pub fn metadata(&self) -> &Arc<DocumentMetadata> {
    &self.metadata
  }

  pub fn timeline(&self) -> &Arc<Timeline> {
    &self.timeline
  }

  /// Lazily built id-to-path routes for this state.
  pub fn routes(&self) -> &Arc<LayerRoutes> {
    self
      .routes
      .get_or_init(|| Arc::new(LayerRoutes::build(&self.layer_props)))
  }

  pub(crate) fn set_dimensions(&mut self, width: i32, height: i32, offset_x: i32, offset_y: i32) {
    self.width = width;
    self.height = height;
    self.offset_x = offset_x;
    self.offset_y = offset_y;
  }

  pub(crate) fn set_background(&mut self, background: Option<Arc<Tile>>) {
    self.background = background;
  }

  pub(crate) fn layers_mut(&mut self) -> &mut LayerList {
    self.routes = OnceLock::new();
    Arc::make_mut(&mut self.layers)
  }

  pub(crate) fn layer_props_mut(&mut self) -> &mut LayerPropsList {
    self.routes = OnceLock::new();
    Arc::make_mut(&mut self.layer_props)
  }

  pub(crate) fn set_layer_props_root(&mut self, layer_props: Arc<LayerPropsList>) {
    self.routes = OnceLock::new();
    self.layer_props = layer_props;
  }

  pub(crate) fn set_layers_root(&mut self, layers: Arc<LayerList>) {
    self.routes = OnceLock::new();
    self.layers = layers;
  }

  pub(crate) fn annotations_mut(&mut self) -> &mut AnnotationList {
    Arc::make_mut(&mut self.annotations)
  }

  pub(crate) fn set_metadata(&mut self, metadata: Arc<DocumentMetadata>) {
    self.metadata = metadata;
  }

  pub(crate) fn timeline_mut(&mut self) -> &mut Timeline {
    Arc::make_mut(&mut self.timeline)
  }

  /// Resolves an index path to the content layer at that position.
  pub fn content_at(&self, path: &[usize]) -> Option<&Arc<LayerContent>> {
    let mut list = &self.layers;
    for (depth, &index) in path.iter().enumerate() {
      if index >= list.count() {
        return None;
      }
      match list.at(index) {
        LayerListEntry::Content(lc) => {
          return if depth + 1 == path.len() { Some(lc) } else { None };
        }
        LayerListEntry::Group(children) => {
          if depth + 1 == path.len() {
            return None;
          }
          list = children;
        }
      }
    }
    None
  }

  pub fn props_at(&self, path: &[usize]) -> Option<&Arc<LayerProps>> {
    let mut list = &self.layer_props;
    for (depth, &index) in path.iter().enumerate() {
      if index >= list.count() {
        return None;
      }
      let props = list.at(index);
      if depth + 1 == path.len() {
        return Some(props);
      }
      list = props.children.as_ref()?;
    }
    None
  }

  /// Unique access to the content layer at `path`, forking shared nodes
  /// along the way. Returns `None` when the path resolves to a group.
  pub(crate) fn transient_content_at(&mut self, path: &[usize]) -> Option<&mut LayerContent> {
    let mut list = self.layers_mut();
    for (depth, &index) in path.iter().enumerate() {
      if index >= list.count() {
        return None;
      }
      let last = depth + 1 == path.len();
      match list.at_mut(index) {
        LayerListEntry::Content(lc) => {
          return if last { Some(Arc::make_mut(lc)) } else { None };
        }
        LayerListEntry::Group(children) => {
          if last {
            return None;
          }
          list = Arc::make_mut(children);
        }
      }
    }
    None
  }

  /// Unique access to the props node at `path`.
  pub(crate) fn transient_props_at(&mut self, path: &[usize]) -> Option<&mut LayerProps> {
    let mut list = self.layer_props_mut();
    for (depth, &index) in path.iter().enumerate() {
      if index >= list.count() {
        return None;
      }
      let props = Arc::make_mut(list.at_mut(index));
      if depth + 1 == path.len() {
        return Some(props);
      }
      list = Arc::make_mut(props.children.as_mut()?);
    }
    None
  }

  /// Composites tile `index` of the whole document into a fresh tile:
  /// background first, then the layer stack bottom to top.
  pub fn flatten_tile(&self, index: usize) -> Tile {
    let mut dst = match &self.background {
      Some(bg) => Tile::clone(bg),
      None => Tile::new(0),
    };
    flatten_list(&self.layers, &self.layer_props, index, &mut dst);
    dst
  }
}

fn flatten_list(layers: &LayerList, props: &LayerPropsList, index: usize, dst: &mut Tile) {
  let count = layers.count().min(props.count());
  for i in 0..count {
    let lp = props.at(i);
    match layers.at(i) {
      LayerListEntry::Content(lc) => {
        lc.flatten_tile_onto(index, lp, dst);
      }
      LayerListEntry::Group(children) => {
        if !lp.visible() {
          continue;
        }
        let Some(child_props) = &lp.children else {
          continue;
        };
        let mut scratch = Tile::new(0);
        flatten_list(children, child_props, index, &mut scratch);
        dst.merge(&scratch, lp.opacity, lp.blend_mode);
      }
    }
  }
}
