//! Layer id to index-path resolution
//!
//! The canvas tree carries no parent pointers; a route is the stack of
//! child indexes leading from the root to a layer. Routes are rebuilt
//! lazily per canvas state and shared behind the state's `OnceLock`.

use crate::canvas::layer_props::LayerPropsList;
use rustc_hash::FxHashMap;

#[derive(Debug, Default)]
pub struct LayerRoutes {
  map: FxHashMap<i32, Vec<usize>>,
}

impl LayerRoutes {
  pub fn build(layer_props: &LayerPropsList) -> Self {
    let mut routes = Self::default();
    let mut path = Vec::new();
    routes.walk(layer_props, &mut path);
    routes
  }

  fn walk(&mut self, lpl: &LayerPropsList, path: &mut Vec<usize>) {
    for (i, props) in lpl.iter().enumerate() {
      path.push(i);
      self.map.entry(props.id).or_insert_with(|| path.clone());
      if let Some(children) = &props.children {
        self.walk(children, path);
      }
      path.pop();
    }
  }

  pub fn search(&self, layer_id: i32) -> Option<&[usize]> {
    self.map.get(&layer_id).map(Vec::as_slice)
  }

  pub fn contains(&self, layer_id: i32) -> bool {
    self.map.contains_key(&layer_id)
  }
}
