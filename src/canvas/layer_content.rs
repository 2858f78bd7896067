//! Pixel content of a single layer
//!
//! A content layer is a sparse grid of tiles plus an optional list of
//! sublayers. Sublayers carry ephemeral overlays that composite above
//! their owner without appearing in the shared props tree: stroke
//! previews, indirect strokes and the inspect highlight.

use crate::canvas::layer_props::LayerProps;
use crate::canvas::tile::{tile_counts, Tile, TILE_SIZE};
use crate::pixels::{blend_color, BlendMode, Pixel15, UPixel15};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Sublayer {
  pub props: Arc<LayerProps>,
  pub content: Arc<LayerContent>,
}

#[derive(Debug, Clone)]
pub struct LayerContent {
  width: i32,
  height: i32,
  tiles: Vec<Option<Arc<Tile>>>,
  sublayers: Vec<Sublayer>,
}

impl LayerContent {
  pub fn new(width: i32, height: i32) -> Self {
    let (xtiles, ytiles) = tile_counts(width, height);
    Self {
      width,
      height,
      tiles: vec![None; (xtiles * ytiles) as usize],
      sublayers: Vec::new(),
    }
  }

  pub fn width(&self) -> i32 {
    self.width
  }

  pub fn height(&self) -> i32 {
    self.height
  }

  pub fn tile_counts(&self) -> (i32, i32) {
    tile_counts(self.width, self.height)
  }

  pub fn tile_at_index(&self, index: usize) -> Option<&Arc<Tile>> {
    self.tiles.get(index).and_then(|t| t.as_ref())
  }

  pub fn tile_at(&self, x: i32, y: i32) -> Option<&Arc<Tile>> {
    let (xtiles, _) = self.tile_counts();
    self.tile_at_index((y * xtiles + x) as usize)
  }

  pub fn set_tile_at_index(&mut self, index: usize, tile: Option<Arc<Tile>>) {
    self.tiles[index] = tile;
  }

  pub fn tiles(&self) -> &[Option<Arc<Tile>>] {
    &self.tiles
  }

  pub fn sublayers(&self) -> &[Sublayer] {
    &self.sublayers
  }

  fn tile_mut(&mut self, context_id: u32, tx: i32, ty: i32) -> &mut Tile {
    let (xtiles, _) = self.tile_counts();
    let slot = &mut self.tiles[(ty * xtiles + tx) as usize];
    let tile = slot.get_or_insert_with(|| Arc::new(Tile::new(context_id)));
    let tile = Arc::make_mut(tile);
    tile.set_context_id(context_id);
    tile
  }

  /// Blends an unpremultiplied color into one pixel; out-of-bounds
  /// coordinates are ignored.
  pub fn blend_pixel_at(
    &mut self,
    context_id: u32,
    x: i32,
    y: i32,
    color: UPixel15,
    coverage: u16,
    mode: BlendMode,
  ) {
    if x < 0 || y < 0 || x >= self.width || y >= self.height || coverage == 0 {
      return;
    }
    let tile = self.tile_mut(context_id, x / TILE_SIZE, y / TILE_SIZE);
    let mut px = tile.pixel_at(x % TILE_SIZE, y % TILE_SIZE);
    blend_color(&mut px, color, coverage, mode);
    tile.set_pixel_at(x % TILE_SIZE, y % TILE_SIZE, px);
  }

  pub fn set_pixel_at(&mut self, context_id: u32, x: i32, y: i32, pixel: Pixel15) {
    if x < 0 || y < 0 || x >= self.width || y >= self.height {
      return;
    }
    let tile = self.tile_mut(context_id, x / TILE_SIZE, y / TILE_SIZE);
    tile.set_pixel_at(x % TILE_SIZE, y % TILE_SIZE, pixel);
  }

  /// Fills the clamped rectangle `[left, right) x [top, bottom)`.
  pub fn fill_rect(
    &mut self,
    context_id: u32,
    mode: BlendMode,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    color: UPixel15,
  ) {
    let left = left.max(0);
    let top = top.max(0);
    let right = right.min(self.width);
    let bottom = bottom.min(self.height);
    for y in top..bottom {
      for x in left..right {
        self.blend_pixel_at(context_id, x, y, color, color.a, mode);
      }
    }
  }

  pub fn sublayer_at(&self, id: i32) -> Option<&Sublayer> {
    self.sublayers.iter().find(|s| s.props.id == id)
  }

  /// Finds the sublayer with `id`, creating a blank one if absent.
  pub fn sublayer_mut(&mut self, id: i32) -> &mut Sublayer {
    if let Some(index) = self.sublayers.iter().position(|s| s.props.id == id) {
      return &mut self.sublayers[index];
    }
    self.sublayers.push(Sublayer {
      props: Arc::new(LayerProps::new(id)),
      content: Arc::new(LayerContent::new(self.width, self.height)),
    });
    self.sublayers.last_mut().unwrap()
  }

  pub fn sublayer_insert(&mut self, content: Arc<LayerContent>, props: Arc<LayerProps>) {
    self.sublayers.push(Sublayer { props, content });
  }

  /// Composites tile `index` of this layer onto `dst` under `props`.
  ///
  /// Sublayers merge onto the layer's own pixels first, then the result
  /// blends onto the backdrop with the layer's opacity and mode. A
  /// censored layer contributes the censor pattern instead of content.
  pub fn flatten_tile_onto(&self, index: usize, props: &LayerProps, dst: &mut Tile) {
    if !props.visible() {
      return;
    }
    if props.censored {
      dst.merge(&Tile::censored(), props.opacity, props.blend_mode);
      return;
    }
    let own = self.tile_at_index(index);
    let live_sublayers = self.sublayers.iter().any(|s| {
      s.props.visible() && s.content.tile_at_index(index).is_some()
    });
    if !live_sublayers {
      if let Some(tile) = own {
        dst.merge(tile, props.opacity, props.blend_mode);
      }
      return;
    }
    let mut scratch = match own {
      Some(tile) => Tile::clone(tile),
      None => Tile::new(0),
    };
    for sub in &self.sublayers {
      if !sub.props.visible() {
        continue;
      }
      if let Some(tile) = sub.content.tile_at_index(index) {
        scratch.merge(tile, sub.props.opacity, sub.props.blend_mode);
      }
    }
    dst.merge(&scratch, props.opacity, props.blend_mode);
  }

  /// Produces a copy grown by the given edge amounts, contents shifted
  /// by `(left, top)`. Sublayers do not survive a resize.
  pub fn resized(&self, top: i32, right: i32, bottom: i32, left: i32) -> Self {
    let width = self.width + left + right;
    let height = self.height + top + bottom;
    let mut out = LayerContent::new(width.max(0), height.max(0));
    for y in 0..out.height {
      for x in 0..out.width {
        let sx = x - left;
        let sy = y - top;
        if sx < 0 || sy < 0 || sx >= self.width || sy >= self.height {
          continue;
        }
        let pixel = match self.tile_at(sx / TILE_SIZE, sy / TILE_SIZE) {
          Some(tile) => tile.pixel_at(sx % TILE_SIZE, sy % TILE_SIZE),
          None => continue,
        };
        if pixel != Pixel15::TRANSPARENT {
          let context_id = self
            .tile_at(sx / TILE_SIZE, sy / TILE_SIZE)
            .map(|t| t.context_id())
            .unwrap_or(0);
          out.set_pixel_at(context_id, x, y, pixel);
        }
      }
    }
    out
  }
}
