//! Application of drawing commands to canvas state
//!
//! Each command forks the minimal path of the tree through
//! `Arc::make_mut` and produces the next state; a failed command leaves
//! the committed state untouched because the fork is only installed on
//! success (canvas history owns that commit).

use crate::canvas::document::{Annotation, Frame};
use crate::canvas::layer_content::LayerContent;
use crate::canvas::layer_list::{LayerList, LayerListEntry};
use crate::canvas::layer_props::LayerProps;
use crate::canvas::state::CanvasState;
use crate::canvas::tile::Tile;
use crate::error::HistoryError;
use crate::msg::{Message, Payload};
use crate::paint::{draw_dabs, DabsCursor};
use crate::pixels::{channel8_to_15, UPixel15};
use std::sync::Arc;

/// Largest canvas edge a resize may produce.
pub const MAX_CANVAS_SIZE: i32 = 65535;

/// Applies one drawing command, mutating `cs` into the successor state.
/// Returns the user cursor position for stroke commands.
pub(crate) fn apply_message(
  cs: &mut Arc<CanvasState>,
  msg: &Message,
) -> Result<Option<DabsCursor>, HistoryError> {
  let context_id = msg.context_id();
  match msg.payload() {
    Payload::CanvasResize { top, right, bottom, left } => {
      apply_resize(cs, *top, *right, *bottom, *left)?;
      Ok(None)
    }
    Payload::CanvasBackground { color } => {
      let state = Arc::make_mut(cs);
      let pixel = UPixel15::from_bgra(*color).premultiply();
      if pixel.a == 0 {
        state.set_background(None);
      } else {
        state.set_background(Some(Arc::new(Tile::from_pixel15(context_id, pixel))));
      }
      Ok(None)
    }
    Payload::LayerCreate { layer_id, group } => {
      apply_layer_create(cs, *layer_id, *group)?;
      Ok(None)
    }
    Payload::LayerAttributes { layer_id, opacity, censored, isolated } => {
      let path = resolve(cs, *layer_id)?;
      let state = Arc::make_mut(cs);
      let props = state
        .transient_props_at(&path)
        .ok_or(HistoryError::LayerNotFound { layer_id: *layer_id })?;
      props.opacity = channel8_to_15(*opacity);
      props.censored = *censored;
      props.isolated = *isolated;
      Ok(None)
    }
    Payload::LayerDelete { layer_id } => {
      let path = resolve(cs, *layer_id)?;
      remove_at(Arc::make_mut(cs), &path);
      Ok(None)
    }
    Payload::FillRect { layer_id, mode, x, y, width, height, color } => {
      if *width <= 0 || *height <= 0 {
        return Err(HistoryError::InvalidDimensions { width: *width, height: *height });
      }
      let path = resolve_content(cs, *layer_id)?;
      let color = UPixel15::from_bgra(*color);
      let state = Arc::make_mut(cs);
      let content = state
        .transient_content_at(&path)
        .ok_or(HistoryError::GroupTarget { layer_id: *layer_id })?;
      content.fill_rect(context_id, *mode, *x, *y, *x + *width, *y + *height, color);
      Ok(None)
    }
    Payload::AnnotationCreate { annotation_id, x, y, width, height } => {
      let state = Arc::make_mut(cs);
      let annotations = state.annotations_mut();
      if annotations.index_of(*annotation_id).is_some() {
        return Err(HistoryError::AnnotationExists { annotation_id: *annotation_id });
      }
      annotations.push(Arc::new(Annotation {
        id: *annotation_id,
        x: *x,
        y: *y,
        width: *width,
        height: *height,
        background: 0,
        text: Arc::from(""),
      }));
      Ok(None)
    }
    Payload::AnnotationReshape { annotation_id, x, y, width, height } => {
      let state = Arc::make_mut(cs);
      let annotations = state.annotations_mut();
      let index = annotations
        .index_of(*annotation_id)
        .ok_or(HistoryError::AnnotationNotFound { annotation_id: *annotation_id })?;
      let mut annotation = Annotation::clone(annotations.at(index));
      annotation.x = *x;
      annotation.y = *y;
      annotation.width = *width;
      annotation.height = *height;
      annotations.replace(index, Arc::new(annotation));
      Ok(None)
    }
    Payload::AnnotationDelete { annotation_id } => {
      let state = Arc::make_mut(cs);
      let annotations = state.annotations_mut();
      let index = annotations
        .index_of(*annotation_id)
        .ok_or(HistoryError::AnnotationNotFound { annotation_id: *annotation_id })?;
      annotations.remove(index);
      Ok(None)
    }
    Payload::SetMetadataInt { field, value } => {
      let state = Arc::make_mut(cs);
      let metadata = state.metadata().with_field(*field, *value);
      state.set_metadata(Arc::new(metadata));
      Ok(None)
    }
    Payload::SetTimelineFrame { frame, layer_ids } => {
      let state = Arc::make_mut(cs);
      state.timeline_mut().set_frame(
        usize::from(*frame),
        Arc::new(Frame { layer_ids: layer_ids.clone() }),
      );
      Ok(None)
    }
    Payload::DrawDabsClassic(d) => apply_dabs(cs, context_id, msg.payload(), d.layer_id),
    Payload::DrawDabsPixel(d) | Payload::DrawDabsPixelSquare(d) => {
      apply_dabs(cs, context_id, msg.payload(), d.layer_id)
    }
    Payload::DrawDabsMyPaint(d) => apply_dabs(cs, context_id, msg.payload(), d.layer_id),
    _ => Err(HistoryError::NotACommand { kind: msg.kind() as u8 }),
  }
}

fn resolve(cs: &Arc<CanvasState>, layer_id: u16) -> Result<Vec<usize>, HistoryError> {
  cs.routes()
    .search(i32::from(layer_id))
    .map(<[usize]>::to_vec)
    .ok_or(HistoryError::LayerNotFound { layer_id })
}

fn resolve_content(cs: &Arc<CanvasState>, layer_id: u16) -> Result<Vec<usize>, HistoryError> {
  let path = resolve(cs, layer_id)?;
  match cs.props_at(&path) {
    Some(props) if props.is_group() => Err(HistoryError::GroupTarget { layer_id }),
    Some(_) => Ok(path),
    None => Err(HistoryError::LayerNotFound { layer_id }),
  }
}

fn apply_dabs(
  cs: &mut Arc<CanvasState>,
  context_id: u32,
  payload: &Payload,
  layer_id: u16,
) -> Result<Option<DabsCursor>, HistoryError> {
  let path = resolve_content(cs, layer_id)?;
  let state = Arc::make_mut(cs);
  let content = state
    .transient_content_at(&path)
    .ok_or(HistoryError::GroupTarget { layer_id })?;
  Ok(draw_dabs(context_id, payload, 0, 0, content))
}

fn apply_resize(
  cs: &mut Arc<CanvasState>,
  top: i32,
  right: i32,
  bottom: i32,
  left: i32,
) -> Result<(), HistoryError> {
  let width = cs.width() + left + right;
  let height = cs.height() + top + bottom;
  if width <= 0 || height <= 0 || width > MAX_CANVAS_SIZE || height > MAX_CANVAS_SIZE {
    return Err(HistoryError::InvalidDimensions { width, height });
  }
  let offset_x = cs.offset_x() - left;
  let offset_y = cs.offset_y() - top;
  let resized_layers = resize_list(cs.layers(), top, right, bottom, left);
  let state = Arc::make_mut(cs);
  state.set_layers_root(Arc::new(resized_layers));
  state.set_dimensions(width, height, offset_x, offset_y);
  Ok(())
}

fn resize_list(list: &LayerList, top: i32, right: i32, bottom: i32, left: i32) -> LayerList {
  let entries = list
    .iter()
    .map(|entry| match entry {
      LayerListEntry::Content(lc) => {
        LayerListEntry::Content(Arc::new(lc.resized(top, right, bottom, left)))
      }
      LayerListEntry::Group(children) => {
        LayerListEntry::Group(Arc::new(resize_list(children, top, right, bottom, left)))
      }
    })
    .collect();
  LayerList::new(entries)
}

fn apply_layer_create(
  cs: &mut Arc<CanvasState>,
  layer_id: u16,
  group: bool,
) -> Result<(), HistoryError> {
  if cs.routes().contains(i32::from(layer_id)) {
    return Err(HistoryError::LayerExists { layer_id });
  }
  let (width, height) = (cs.width(), cs.height());
  let state = Arc::make_mut(cs);
  if group {
    state
      .layers_mut()
      .push(LayerListEntry::Group(Arc::new(LayerList::default())));
    state
      .layer_props_mut()
      .push(Arc::new(LayerProps::new_group(i32::from(layer_id))));
  } else {
    state
      .layers_mut()
      .push(LayerListEntry::Content(Arc::new(LayerContent::new(
        width, height,
      ))));
    state
      .layer_props_mut()
      .push(Arc::new(LayerProps::new(i32::from(layer_id))));
  }
  Ok(())
}

/// Removes the layer (and its props) at `path` from both trees.
fn remove_at(state: &mut CanvasState, path: &[usize]) {
  debug_assert!(!path.is_empty());
  let (&last, parents) = path.split_last().unwrap();

  let mut list = state.layers_mut();
  for &index in parents {
    match list.at_mut(index) {
      LayerListEntry::Group(children) => list = Arc::make_mut(children),
      LayerListEntry::Content(_) => return,
    }
  }
  if last < list.count() {
    list.remove(last);
  }

  let mut props_list = state.layer_props_mut();
  for &index in parents {
    let props = Arc::make_mut(props_list.at_mut(index));
    match props.children.as_mut() {
      Some(children) => props_list = Arc::make_mut(children),
      None => return,
    }
  }
  if last < props_list.count() {
    props_list.remove(last);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::msg::{ClassicDab, DrawDabsClassic, Message, MessageKind};
  use crate::pixels::{BlendMode, BIT15};

  fn base_state() -> Arc<CanvasState> {
    let mut cs = Arc::new(CanvasState::new());
    let resize = Message::new(
      1,
      Payload::CanvasResize { top: 0, right: 128, bottom: 128, left: 0 },
    );
    apply_message(&mut cs, &resize).unwrap();
    let create = Message::new(1, Payload::LayerCreate { layer_id: 10, group: false });
    apply_message(&mut cs, &create).unwrap();
    cs
  }

  #[test]
  fn create_then_fill_then_delete() {
    let mut cs = base_state();
    assert!(cs.routes().contains(10));

    let fill = Message::new(
      1,
      Payload::FillRect {
        layer_id: 10,
        mode: BlendMode::Replace,
        x: 0,
        y: 0,
        width: 16,
        height: 16,
        color: 0xffff_0000,
      },
    );
    apply_message(&mut cs, &fill).unwrap();
    assert!(cs.content_at(&[0]).unwrap().tile_at(0, 0).is_some());

    let delete = Message::new(1, Payload::LayerDelete { layer_id: 10 });
    apply_message(&mut cs, &delete).unwrap();
    assert!(!cs.routes().contains(10));
  }

  #[test]
  fn duplicate_layer_create_fails() {
    let mut cs = base_state();
    let create = Message::new(1, Payload::LayerCreate { layer_id: 10, group: false });
    assert_eq!(
      apply_message(&mut cs, &create),
      Err(HistoryError::LayerExists { layer_id: 10 })
    );
  }

  #[test]
  fn dabs_on_missing_layer_fail_without_mutating() {
    let mut cs = base_state();
    let before = Arc::clone(&cs);
    let dabs = Message::new(
      1,
      Payload::DrawDabsClassic(DrawDabsClassic {
        layer_id: 99,
        x: 0,
        y: 0,
        color: 0xffff_0000,
        mode: BlendMode::Normal,
        indirect: false,
        dabs: vec![ClassicDab { x: 0, y: 0, size: 256, hardness: 255, opacity: 255 }],
      }),
    );
    assert_eq!(
      apply_message(&mut cs, &dabs),
      Err(HistoryError::LayerNotFound { layer_id: 99 })
    );
    assert!(Arc::ptr_eq(&cs, &before));
  }

  #[test]
  fn meta_message_is_not_a_command() {
    let mut cs = base_state();
    let laser = Message::new(5, Payload::LaserTrail { persistence: 10, color: 0 });
    assert_eq!(
      apply_message(&mut cs, &laser),
      Err(HistoryError::NotACommand { kind: MessageKind::LaserTrail as u8 })
    );
  }

  #[test]
  fn resize_offsets_track_expansion() {
    let mut cs = base_state();
    let resize = Message::new(
      1,
      Payload::CanvasResize { top: 64, right: 0, bottom: 0, left: 64 },
    );
    apply_message(&mut cs, &resize).unwrap();
    assert_eq!(cs.width(), 192);
    assert_eq!(cs.height(), 192);
    assert_eq!(cs.offset_x(), -64);
    assert_eq!(cs.offset_y(), -64);
  }

  #[test]
  fn background_color_sets_tile() {
    let mut cs = base_state();
    let bg = Message::new(1, Payload::CanvasBackground { color: 0xffff_ffff });
    apply_message(&mut cs, &bg).unwrap();
    let tile = cs.background().expect("background tile");
    assert_eq!(tile.pixel_at(0, 0).a, BIT15);
  }
}
