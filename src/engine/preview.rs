//! Ephemeral previews layered over committed state
//!
//! A preview renders on top of whatever state the history currently
//! reports; it is never committed. The engine holds at most one active
//! preview plus one pending swap handed off through the local FIFO, so
//! previews serialize with the local drawing commands that precede
//! them. Disposal is `Drop`: a preview still sitting in the queue at
//! teardown is freed when its carrier message drops.

use crate::canvas::layer_content::LayerContent;
use crate::canvas::layer_props::LayerProps;
use crate::canvas::state::CanvasState;
use crate::msg::{Message, Payload};
use crate::paint::draw_dabs;
use crate::pixels::{channel8_to_15, BlendMode, Pixel15, BIT15};
use std::sync::Arc;

/// Sublayer id previews render into.
pub const PREVIEW_SUBLAYER_ID: i32 = -100;
/// Sublayer id of the inspect overlay.
pub const INSPECT_SUBLAYER_ID: i32 = -200;

/// Value carried through the pending-preview slot. `Clear` is the
/// explicit "no preview" sentinel.
#[derive(Debug)]
pub enum PreviewSwap {
  Install(Box<Preview>),
  Clear,
}

#[derive(Debug)]
pub struct Preview {
  initial_offset_x: i32,
  initial_offset_y: i32,
  kind: PreviewKind,
}

#[derive(Debug)]
enum PreviewKind {
  Cut {
    layer_id: u16,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    mask: Option<Box<[u8]>>,
    /// Rendered cut content, canvas-sized; rebuilt when the canvas
    /// dimensions change.
    cached: Option<Arc<LayerContent>>,
    props: Option<Arc<LayerProps>>,
  },
  Dabs {
    layer_id: u16,
    messages: Vec<Message>,
  },
}

impl Preview {
  pub(crate) fn new_cut(
    initial_offset_x: i32,
    initial_offset_y: i32,
    layer_id: u16,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    mask: Option<Box<[u8]>>,
  ) -> Self {
    Self {
      initial_offset_x,
      initial_offset_y,
      kind: PreviewKind::Cut {
        layer_id,
        x,
        y,
        width,
        height,
        mask,
        cached: None,
        props: None,
      },
    }
  }

  pub(crate) fn new_dabs(
    initial_offset_x: i32,
    initial_offset_y: i32,
    layer_id: u16,
    messages: Vec<Message>,
  ) -> Self {
    Self {
      initial_offset_x,
      initial_offset_y,
      kind: PreviewKind::Dabs { layer_id, messages },
    }
  }

  /// Renders this preview on top of `cs`. The offset delta keeps the
  /// preview anchored to its creation-time canvas position across
  /// resizes.
  pub(crate) fn render_onto(&mut self, cs: &Arc<CanvasState>) -> Arc<CanvasState> {
    let offset_x = self.initial_offset_x - cs.offset_x();
    let offset_y = self.initial_offset_y - cs.offset_y();
    match &mut self.kind {
      PreviewKind::Cut { layer_id, x, y, width, height, mask, cached, props } => render_cut(
        cs,
        *layer_id,
        *x + offset_x,
        *y + offset_y,
        *width,
        *height,
        mask.as_deref(),
        cached,
        props,
      ),
      PreviewKind::Dabs { layer_id, messages } => {
        render_dabs(cs, *layer_id, messages, offset_x, offset_y)
      }
    }
  }
}

#[allow(clippy::too_many_arguments)]
fn render_cut(
  cs: &Arc<CanvasState>,
  layer_id: u16,
  left: i32,
  top: i32,
  width: i32,
  height: i32,
  mask: Option<&[u8]>,
  cached: &mut Option<Arc<LayerContent>>,
  props: &mut Option<Arc<LayerProps>>,
) -> Arc<CanvasState> {
  let Some(path) = cs.routes().search(i32::from(layer_id)).map(<[usize]>::to_vec) else {
    return Arc::clone(cs);
  };
  if cs.props_at(&path).map_or(true, |p| p.is_group()) {
    return Arc::clone(cs);
  }

  let cut_props = Arc::clone(props.get_or_insert_with(|| {
    let mut lp = LayerProps::new(PREVIEW_SUBLAYER_ID);
    lp.blend_mode = BlendMode::Erase;
    Arc::new(lp)
  }));

  let stale = cached
    .as_ref()
    .map_or(false, |lc| lc.width() != cs.width() || lc.height() != cs.height());
  if stale {
    *cached = None;
  }
  let cut_content = Arc::clone(cached.get_or_insert_with(|| {
    let mut lc = LayerContent::new(cs.width(), cs.height());
    match mask {
      Some(mask) => {
        for my in 0..height {
          for mx in 0..width {
            let a = mask[(my * width + mx) as usize];
            if a != 0 {
              lc.set_pixel_at(
                0,
                left + mx,
                top + my,
                Pixel15 { b: 0, g: 0, r: 0, a: channel8_to_15(a) },
              );
            }
          }
        }
      }
      None => {
        lc.fill_rect(
          0,
          BlendMode::Replace,
          left,
          top,
          left + width,
          top + height,
          crate::pixels::UPixel15 { b: 0, g: 0, r: 0, a: BIT15 },
        );
      }
    }
    Arc::new(lc)
  }));

  let mut out = Arc::clone(cs);
  let state = Arc::make_mut(&mut out);
  if let Some(content) = state.transient_content_at(&path) {
    content.sublayer_insert(cut_content, cut_props);
  }
  out
}

fn render_dabs(
  cs: &Arc<CanvasState>,
  layer_id: u16,
  messages: &[Message],
  offset_x: i32,
  offset_y: i32,
) -> Arc<CanvasState> {
  let Some(path) = cs.routes().search(i32::from(layer_id)).map(<[usize]>::to_vec) else {
    return Arc::clone(cs);
  };
  if cs.props_at(&path).map_or(true, |p| p.is_group()) {
    return Arc::clone(cs);
  }

  let mut out = Arc::clone(cs);
  let state = Arc::make_mut(&mut out);
  let Some(content) = state.transient_content_at(&path) else {
    return Arc::clone(cs);
  };

  for msg in messages {
    match indirect_parts(msg.payload()) {
      Some((mode, opacity, direct_payload)) => {
        // Indirect strokes accumulate in a preview sublayer at the
        // stroke's blend mode and opacity, with the dabs themselves
        // blended normally.
        let sub = content.sublayer_mut(PREVIEW_SUBLAYER_ID);
        {
          let sp = Arc::make_mut(&mut sub.props);
          sp.blend_mode = mode;
          sp.opacity = opacity;
        }
        draw_dabs(
          msg.context_id(),
          &direct_payload,
          offset_x,
          offset_y,
          Arc::make_mut(&mut sub.content),
        );
      }
      None => {
        draw_dabs(msg.context_id(), msg.payload(), offset_x, offset_y, content);
      }
    }
  }
  out
}

/// For indirect dab payloads: the sublayer blend mode and opacity plus a
/// copy of the payload rewritten to blend normally.
fn indirect_parts(payload: &Payload) -> Option<(BlendMode, u16, Payload)> {
  match payload {
    Payload::DrawDabsClassic(d) if d.indirect => {
      let mut direct = d.clone();
      direct.mode = BlendMode::Normal;
      Some((
        d.mode,
        channel8_to_15(((d.color >> 24) & 0xff) as u8),
        Payload::DrawDabsClassic(direct),
      ))
    }
    Payload::DrawDabsPixel(d) if d.indirect => {
      let mut direct = d.clone();
      direct.mode = BlendMode::Normal;
      Some((
        d.mode,
        channel8_to_15(((d.color >> 24) & 0xff) as u8),
        Payload::DrawDabsPixel(direct),
      ))
    }
    Payload::DrawDabsPixelSquare(d) if d.indirect => {
      let mut direct = d.clone();
      direct.mode = BlendMode::Normal;
      Some((
        d.mode,
        channel8_to_15(((d.color >> 24) & 0xff) as u8),
        Payload::DrawDabsPixelSquare(direct),
      ))
    }
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::msg::{ClassicDab, DrawDabsClassic};

  fn state_with_filled_layer() -> Arc<CanvasState> {
    let mut cs = Arc::new(CanvasState::new());
    crate::canvas::handle::apply_message(
      &mut cs,
      &Message::new(1, Payload::CanvasResize { top: 0, right: 64, bottom: 64, left: 0 }),
    )
    .unwrap();
    crate::canvas::handle::apply_message(
      &mut cs,
      &Message::new(1, Payload::LayerCreate { layer_id: 10, group: false }),
    )
    .unwrap();
    crate::canvas::handle::apply_message(
      &mut cs,
      &Message::new(
        1,
        Payload::FillRect {
          layer_id: 10,
          mode: BlendMode::Replace,
          x: 0,
          y: 0,
          width: 64,
          height: 64,
          color: 0xffff_0000,
        },
      ),
    )
    .unwrap();
    cs
  }

  #[test]
  fn cut_preview_erases_rectangle_in_view_only() {
    let cs = state_with_filled_layer();
    let mut preview = Preview::new_cut(0, 0, 10, 8, 8, 16, 16, None);
    let view = preview.render_onto(&cs);

    // Committed state keeps its pixels; the view has the cut.
    let committed = cs.flatten_tile(0);
    assert_eq!(committed.pixel_at(10, 10).a, BIT15);
    let cut = view.flatten_tile(0);
    assert_eq!(cut.pixel_at(10, 10).a, 0);
    assert_eq!(cut.pixel_at(40, 40).a, BIT15);
  }

  #[test]
  fn cut_preview_on_unknown_layer_is_identity() {
    let cs = state_with_filled_layer();
    let mut preview = Preview::new_cut(0, 0, 99, 0, 0, 8, 8, None);
    let view = preview.render_onto(&cs);
    assert!(Arc::ptr_eq(&view, &cs));
  }

  #[test]
  fn masked_cut_only_erases_masked_pixels() {
    let cs = state_with_filled_layer();
    let mut mask = vec![0u8; 4];
    mask[0] = 255; // only the top-left pixel of the 2x2 rect
    let mut preview = Preview::new_cut(0, 0, 10, 0, 0, 2, 2, Some(mask.into_boxed_slice()));
    let view = preview.render_onto(&cs);
    let tile = view.flatten_tile(0);
    assert_eq!(tile.pixel_at(0, 0).a, 0);
    assert_eq!(tile.pixel_at(1, 1).a, BIT15);
  }

  #[test]
  fn dabs_preview_paints_over_view() {
    let mut cs = Arc::new(CanvasState::new());
    crate::canvas::handle::apply_message(
      &mut cs,
      &Message::new(1, Payload::CanvasResize { top: 0, right: 64, bottom: 64, left: 0 }),
    )
    .unwrap();
    crate::canvas::handle::apply_message(
      &mut cs,
      &Message::new(1, Payload::LayerCreate { layer_id: 10, group: false }),
    )
    .unwrap();

    let dabs = Message::new(
      1,
      Payload::DrawDabsClassic(DrawDabsClassic {
        layer_id: 10,
        x: 32,
        y: 32,
        color: 0xffff_0000,
        mode: BlendMode::Normal,
        indirect: false,
        dabs: vec![ClassicDab { x: 0, y: 0, size: 4 * 256, hardness: 255, opacity: 255 }],
      }),
    );
    let mut preview = Preview::new_dabs(0, 0, 10, vec![dabs]);
    let view = preview.render_onto(&cs);
    assert!(view.flatten_tile(0).pixel_at(32, 32).a > 0);
    assert_eq!(cs.flatten_tile(0).pixel_at(32, 32).a, 0);
  }

  #[test]
  fn preview_offset_compensates_canvas_growth() {
    let cs = state_with_filled_layer();
    // Captured when the canvas had offset 0; canvas then grows 64 left.
    let mut grown = Arc::clone(&cs);
    crate::canvas::handle::apply_message(
      &mut grown,
      &Message::new(1, Payload::CanvasResize { top: 0, right: 0, bottom: 0, left: 64 }),
    )
    .unwrap();
    assert_eq!(grown.offset_x(), -64);

    let mut preview = Preview::new_cut(0, 0, 10, 0, 0, 8, 8, None);
    let view = preview.render_onto(&grown);
    // The cut lands at canvas x=64 now, which is the original origin.
    let tile = view.flatten_tile(1); // tile (1, 0) in a 128-wide canvas
    assert_eq!(tile.pixel_at(0, 0).a, 0);
  }
}
