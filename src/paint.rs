//! Minimal dab kernel
//!
//! The full brush model lives outside this crate; the engine carries
//! just enough painting to make committed strokes and stroke previews
//! observable: anti-aliased round dabs, hard pixel dabs and square
//! dabs, blended into layer content in the canvas pixel format.

use crate::canvas::layer_content::LayerContent;
use crate::msg::{DrawDabsClassic, DrawDabsMyPaint, DrawDabsPixel, Payload};
use crate::pixels::{BlendMode, UPixel15, BIT15};

/// Last dab position of a message, used for user cursor tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DabsCursor {
  pub layer_id: u16,
  pub x: i32,
  pub y: i32,
}

/// Applies a draw-dabs payload to `target`, shifted by `(offset_x,
/// offset_y)`. Returns `None` for non-dab payloads.
pub fn draw_dabs(
  context_id: u32,
  payload: &Payload,
  offset_x: i32,
  offset_y: i32,
  target: &mut LayerContent,
) -> Option<DabsCursor> {
  match payload {
    Payload::DrawDabsClassic(d) => Some(draw_dabs_classic(context_id, d, offset_x, offset_y, target)),
    Payload::DrawDabsPixel(d) => Some(draw_dabs_pixel(context_id, d, false, offset_x, offset_y, target)),
    Payload::DrawDabsPixelSquare(d) => {
      Some(draw_dabs_pixel(context_id, d, true, offset_x, offset_y, target))
    }
    Payload::DrawDabsMyPaint(d) => Some(draw_dabs_mypaint(context_id, d, offset_x, offset_y, target)),
    _ => None,
  }
}

fn draw_dabs_classic(
  context_id: u32,
  d: &DrawDabsClassic,
  offset_x: i32,
  offset_y: i32,
  target: &mut LayerContent,
) -> DabsCursor {
  let color = UPixel15::from_bgra(d.color);
  let mut cursor = DabsCursor { layer_id: d.layer_id, x: d.x, y: d.y };
  for dab in &d.dabs {
    let x = d.x + dab.x;
    let y = d.y + dab.y;
    round_dab(
      target,
      context_id,
      x + offset_x,
      y + offset_y,
      dab.size as f32 / 256.0,
      f32::from(dab.hardness) / 255.0,
      opacity15(dab.opacity),
      color,
      d.mode,
    );
    cursor.x = x;
    cursor.y = y;
  }
  cursor
}

fn draw_dabs_pixel(
  context_id: u32,
  d: &DrawDabsPixel,
  square: bool,
  offset_x: i32,
  offset_y: i32,
  target: &mut LayerContent,
) -> DabsCursor {
  let color = UPixel15::from_bgra(d.color);
  let mut cursor = DabsCursor { layer_id: d.layer_id, x: d.x, y: d.y };
  for dab in &d.dabs {
    let x = d.x + dab.x;
    let y = d.y + dab.y;
    let r = i32::from(dab.size);
    let coverage = opacity15(dab.opacity);
    let cx = x + offset_x;
    let cy = y + offset_y;
    for py in (cy - r)..=(cy + r) {
      for px in (cx - r)..=(cx + r) {
        let inside = if square {
          true
        } else {
          let dx = px - cx;
          let dy = py - cy;
          dx * dx + dy * dy <= r * r
        };
        if inside {
          target.blend_pixel_at(context_id, px, py, color, coverage, d.mode);
        }
      }
    }
    cursor.x = x;
    cursor.y = y;
  }
  cursor
}

fn draw_dabs_mypaint(
  context_id: u32,
  d: &DrawDabsMyPaint,
  offset_x: i32,
  offset_y: i32,
  target: &mut LayerContent,
) -> DabsCursor {
  let color = UPixel15::from_bgra(d.color);
  // Zero-alpha color is the MyPaint eraser convention; lock-alpha
  // strokes recolor without touching coverage.
  let mode = if color.a == 0 {
    BlendMode::Erase
  } else if d.lock_alpha > 0 {
    BlendMode::Recolor
  } else {
    BlendMode::Normal
  };
  let color = if color.a == 0 { UPixel15 { a: BIT15, ..color } } else { color };
  let mut cursor = DabsCursor { layer_id: d.layer_id, x: d.x, y: d.y };
  for dab in &d.dabs {
    let x = d.x + dab.x;
    let y = d.y + dab.y;
    // The size field is nominally a radius but the kernel reads it as a
    // diameter; the batching cost estimator mirrors this, so the two
    // must change together.
    let radius = dab.size as f32 / 256.0 / 2.0;
    round_dab(
      target,
      context_id,
      x + offset_x,
      y + offset_y,
      radius,
      f32::from(dab.hardness) / 255.0,
      opacity15(dab.opacity),
      color,
      mode,
    );
    cursor.x = x;
    cursor.y = y;
  }
  cursor
}

fn opacity15(opacity: u8) -> u16 {
  crate::pixels::channel8_to_15(opacity)
}

/// One anti-aliased round dab centered on the pixel grid point
/// `(cx, cy)`.
#[allow(clippy::too_many_arguments)]
fn round_dab(
  target: &mut LayerContent,
  context_id: u32,
  cx: i32,
  cy: i32,
  radius: f32,
  hardness: f32,
  opacity: u16,
  color: UPixel15,
  mode: BlendMode,
) {
  if radius <= 0.0 {
    target.blend_pixel_at(context_id, cx, cy, color, opacity, mode);
    return;
  }
  let r = radius.ceil() as i32 + 1;
  for py in (cy - r)..=(cy + r) {
    for px in (cx - r)..=(cx + r) {
      let dx = (px - cx) as f32;
      let dy = (py - cy) as f32;
      let dist = (dx * dx + dy * dy).sqrt();
      let edge = (radius + 0.5 - dist).clamp(0.0, 1.0);
      if edge <= 0.0 {
        continue;
      }
      let falloff = 1.0 - (1.0 - hardness) * (dist / radius).min(1.0);
      let coverage = edge * falloff;
      if coverage <= 0.0 {
        continue;
      }
      let strength = (f32::from(opacity) * coverage) as u16;
      if strength > 0 {
        target.blend_pixel_at(context_id, px, py, color, strength, mode);
      }
    }
  }
}
