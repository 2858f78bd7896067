//! End-to-end paint engine scenarios, driving the public API with the
//! real paint thread and render pool.

use inkflow::canvas::layer_props::LayerPropsList;
use inkflow::msg::{ClassicDab, DrawDabsClassic, Payload};
use inkflow::{
  AclChange, AclState, AllowAll, BlendMode, CanvasState, LayerViewMode, Message, MetaSink,
  PaintEngine, TickSink, BIT15,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Default)]
struct Meta {
  acl_changes: Vec<AclChange>,
  lasers: Vec<(u32, u8, u32)>,
  pointers: Vec<(u32, i32, i32)>,
  default_layers: Vec<u16>,
}

impl MetaSink for Meta {
  fn acls_changed(&mut self, changes: AclChange) {
    self.acl_changes.push(changes);
  }
  fn laser_trail(&mut self, context_id: u32, persistence: u8, color: u32) {
    self.lasers.push((context_id, persistence, color));
  }
  fn move_pointer(&mut self, context_id: u32, x: i32, y: i32) {
    self.pointers.push((context_id, x, y));
  }
  fn default_layer_set(&mut self, layer_id: u16) {
    self.default_layers.push(layer_id);
  }
}

#[derive(Default)]
struct Tick {
  catchups: Vec<i32>,
  resizes: Vec<(i32, i32, i32, i32)>,
  tiles: Vec<(i32, i32)>,
  layer_props: Vec<Arc<LayerPropsList>>,
  cursor_moves: Vec<(u32, u16, i32, i32)>,
  annotations_changes: usize,
  metadata_changes: usize,
  timeline_changes: usize,
}

impl Tick {
  fn callback_count(&self) -> usize {
    self.catchups.len()
      + self.resizes.len()
      + self.tiles.len()
      + self.layer_props.len()
      + self.cursor_moves.len()
      + self.annotations_changes
      + self.metadata_changes
      + self.timeline_changes
  }
}

impl TickSink for Tick {
  fn catchup(&mut self, progress: i32) {
    self.catchups.push(progress);
  }
  fn resized(&mut self, offset_x: i32, offset_y: i32, prev_width: i32, prev_height: i32) {
    self.resizes.push((offset_x, offset_y, prev_width, prev_height));
  }
  fn tile_changed(&mut self, x: i32, y: i32) {
    self.tiles.push((x, y));
  }
  fn layer_props_changed(&mut self, layer_props: &Arc<LayerPropsList>) {
    self.layer_props.push(Arc::clone(layer_props));
  }
  fn annotations_changed(&mut self, _: &Arc<inkflow::canvas::document::AnnotationList>) {
    self.annotations_changes += 1;
  }
  fn document_metadata_changed(&mut self, _: &Arc<inkflow::canvas::document::DocumentMetadata>) {
    self.metadata_changes += 1;
  }
  fn timeline_changed(&mut self, _: &Arc<inkflow::canvas::document::Timeline>) {
    self.timeline_changes += 1;
  }
  fn cursor_moved(&mut self, context_id: u32, layer_id: u16, x: i32, y: i32) {
    self.cursor_moves.push((context_id, layer_id, x, y));
  }
}

fn engine() -> PaintEngine {
  PaintEngine::new(Arc::new(AllowAll), None, Box::new(|_, _| {})).unwrap()
}

fn resize(width: i32, height: i32) -> Message {
  Message::new(1, Payload::CanvasResize { top: 0, right: width, bottom: height, left: 0 })
}

fn layer(id: u16) -> Message {
  Message::new(1, Payload::LayerCreate { layer_id: id, group: false })
}

fn classic_dab(context_id: u32, layer_id: u16, x: i32, y: i32, color: u32) -> Message {
  Message::new(
    context_id,
    Payload::DrawDabsClassic(DrawDabsClassic {
      layer_id,
      x,
      y,
      color,
      mode: BlendMode::Normal,
      indirect: false,
      dabs: vec![ClassicDab { x: 0, y: 0, size: 4 * 256, hardness: 255, opacity: 255 }],
    }),
  )
}

/// Ticks until `pred` passes on the current view state, panicking on
/// timeout. The paint thread drains asynchronously, so tests poll.
fn pump_until(pe: &mut PaintEngine, pred: impl Fn(&Arc<CanvasState>) -> bool) -> Tick {
  let mut all = Tick::default();
  let deadline = Instant::now() + Duration::from_secs(5);
  loop {
    let mut sink = Tick::default();
    pe.tick(&mut sink);
    merge(&mut all, sink);
    if pred(&pe.canvas_state()) {
      return all;
    }
    assert!(Instant::now() < deadline, "timed out waiting for condition");
    std::thread::sleep(Duration::from_millis(1));
  }
}

fn merge(into: &mut Tick, from: Tick) {
  into.catchups.extend(from.catchups);
  into.resizes.extend(from.resizes);
  into.tiles.extend(from.tiles);
  into.layer_props.extend(from.layer_props);
  into.cursor_moves.extend(from.cursor_moves);
  into.annotations_changes += from.annotations_changes;
  into.metadata_changes += from.metadata_changes;
  into.timeline_changes += from.timeline_changes;
}

fn setup_canvas(pe: &mut PaintEngine, layers: &[u16]) {
  let mut msgs = vec![resize(128, 128)];
  for &id in layers {
    msgs.push(layer(id));
  }
  let pushed = pe.handle_inc(true, &msgs, &mut Meta::default());
  assert_eq!(pushed, msgs.len());
  pump_until(pe, |cs| {
    cs.width() == 128 && cs.layer_props().count() == layers.len()
  });
}

#[test]
fn local_drawing_reaches_the_view() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[10]);

  let pushed = pe.handle_inc(true, &[classic_dab(1, 10, 32, 32, 0xffff_0000)], &mut Meta::default());
  assert_eq!(pushed, 1);
  let events = pump_until(&mut pe, |cs| cs.flatten_tile(0).pixel_at(32, 32).a > 0);
  assert!(events.tiles.contains(&(0, 0)));
  assert!(events
    .cursor_moves
    .iter()
    .any(|&(ctx, layer_id, x, y)| ctx == 1 && layer_id == 10 && x == 32 && y == 32));
}

#[test]
fn meta_messages_do_not_queue() {
  let pe = engine();
  let mut meta = Meta::default();
  let msgs = [
    Message::new(5, Payload::LaserTrail { persistence: 10, color: 1 }),
    Message::new(7, Payload::LaserTrail { persistence: 11, color: 2 }),
    Message::new(5, Payload::LaserTrail { persistence: 12, color: 3 }),
    Message::new(9, Payload::MovePointer { x: 4, y: 5 }),
    Message::new(9, Payload::MovePointer { x: 6, y: 7 }),
    Message::new(2, Payload::DefaultLayer { layer_id: 42 }),
  ];
  let pushed = pe.handle_inc(false, &msgs, &mut meta);
  assert_eq!(pushed, 0);
  // One callback per user and kind, first-seen order, last value wins.
  assert_eq!(meta.lasers, vec![(5, 12, 3), (7, 11, 2)]);
  assert_eq!(meta.pointers, vec![(9, 6, 7)]);
  assert_eq!(meta.default_layers, vec![42]);
}

struct FilterAll;

impl AclState for FilterAll {
  fn handle(&self, _msg: &Message) -> AclChange {
    AclChange::FILTERED | AclChange::USERS
  }
}

#[test]
fn filtered_remote_messages_are_dropped_with_flags_surfaced() {
  let mut pe = PaintEngine::new(Arc::new(FilterAll), None, Box::new(|_, _| {})).unwrap();
  let mut meta = Meta::default();
  let pushed = pe.handle_inc(false, &[resize(64, 64)], &mut meta);
  assert_eq!(pushed, 0);
  assert_eq!(meta.acl_changes, vec![AclChange::USERS]);

  // Nothing must ever reach history.
  std::thread::sleep(Duration::from_millis(20));
  let mut sink = Tick::default();
  pe.tick(&mut sink);
  assert_eq!(pe.canvas_state().width(), 0);
}

#[test]
fn tick_without_changes_emits_nothing() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[10]);

  // Settle: everything drained, one more tick must stay silent.
  let mut sink = Tick::default();
  pe.tick(&mut sink);
  let mut sink = Tick::default();
  pe.tick(&mut sink);
  assert_eq!(sink.callback_count(), 0);

  let before = pe.canvas_state();
  let mut sink = Tick::default();
  pe.tick(&mut sink);
  assert!(Arc::ptr_eq(&before, &pe.canvas_state()));
}

#[test]
fn catchup_progress_surfaces_on_tick() {
  let mut pe = engine();
  let pushed = pe.handle_inc(true, &[Message::internal_catchup(0, 57)], &mut Meta::default());
  assert_eq!(pushed, 1);
  let deadline = Instant::now() + Duration::from_secs(5);
  loop {
    let mut sink = Tick::default();
    pe.tick(&mut sink);
    if sink.catchups.contains(&57) {
      break;
    }
    assert!(Instant::now() < deadline, "catch-up progress never surfaced");
    std::thread::sleep(Duration::from_millis(1));
  }
}

#[test]
fn solo_view_mode_hides_other_layers() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[1, 2, 3]);

  pe.active_layer_id_set(2);
  pe.view_mode_set(LayerViewMode::Solo);
  let mut sink = Tick::default();
  pe.tick(&mut sink);

  let lpl = Arc::clone(pe.canvas_state().layer_props());
  assert_eq!(lpl.count(), 3);
  assert!(lpl.at(0).hidden_by_view_mode);
  assert!(!lpl.at(1).hidden_by_view_mode);
  assert!(lpl.at(2).hidden_by_view_mode);
  assert_eq!(sink.layer_props.len(), 1);
}

#[test]
fn hide_unhide_restores_projection() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[1, 2]);
  let committed = pe.canvas_state();

  pe.layer_visibility_set(1, true);
  let mut sink = Tick::default();
  pe.tick(&mut sink);
  let hidden_lpl = Arc::clone(pe.canvas_state().layer_props());
  assert!(hidden_lpl.at(0).hidden);

  pe.layer_visibility_set(1, false);
  let mut sink = Tick::default();
  pe.tick(&mut sink);
  let restored = Arc::clone(pe.canvas_state().layer_props());
  // Bit-exact restoration of the committed props.
  assert_eq!(restored.as_ref(), committed.layer_props().as_ref());
  assert!(Arc::ptr_eq(restored.at(0), committed.layer_props().at(0)));
}

#[test]
fn preview_renders_atop_committed_dab() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[10]);

  // Committed dab, then a cut preview over the same region.
  pe.handle_inc(true, &[classic_dab(1, 10, 32, 32, 0xffff_0000)], &mut Meta::default());
  pe.preview_cut(10, 28, 28, 8, 8, None).unwrap();

  pump_until(&mut pe, |cs| {
    let tile = cs.flatten_tile(0);
    // The dab is erased inside the cut rectangle but still visible just
    // below its bottom edge.
    tile.pixel_at(32, 32).a == 0 && tile.pixel_at(32, 36).a > 0
  });
}

#[test]
fn preview_clear_restores_committed_projection() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[10]);
  // One more committed change so the projection settles on the plain
  // committed state (the very first projection runs the slow path and
  // forks).
  pe.handle_inc(true, &[classic_dab(1, 10, 8, 8, 0xffff_0000)], &mut Meta::default());
  pump_until(&mut pe, |cs| cs.flatten_tile(0).pixel_at(8, 8).a > 0);
  let committed_view = pe.canvas_state();

  pe.preview_cut(10, 0, 0, 16, 16, None).unwrap();
  pump_until(&mut pe, |cs| !Arc::ptr_eq(cs, &committed_view));

  pe.preview_clear();
  pump_until(&mut pe, |cs| Arc::ptr_eq(cs, &committed_view));
}

#[test]
fn mask_length_is_validated() {
  let pe = engine();
  assert!(pe.preview_cut(10, 0, 0, 4, 4, Some(&[0u8; 15])).is_err());
  assert!(pe.preview_cut(10, 0, 0, 4, 4, Some(&[0u8; 16])).is_ok());
}

#[test]
fn teardown_disposes_queued_previews() {
  let pe = engine();
  let held = classic_dab(1, 10, 0, 0, 0xffff_0000);
  // A stack of preview installs; whichever ones the paint thread has
  // not consumed at drop ride the local queue down with the engine.
  for _ in 0..100 {
    pe.preview_dabs(10, &[held.clone()]).unwrap();
  }
  assert!(held.ref_count() > 1);
  drop(pe);
  assert_eq!(held.ref_count(), 1);
}

#[test]
fn reset_returns_view_to_empty() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[10]);

  pe.handle_inc(true, &[Message::internal_reset(0)], &mut Meta::default());
  let events = pump_until(&mut pe, |cs| cs.width() == 0);
  assert!(events.resizes.iter().any(|&(_, _, w, h)| w == 128 && h == 128));
}

#[test]
fn snapshot_request_emits_save_point() {
  let snapshots = Arc::new(AtomicUsize::new(0));
  let seen = Arc::clone(&snapshots);
  let mut pe = PaintEngine::new(
    Arc::new(AllowAll),
    None,
    Box::new(move |_, snapshot_requested| {
      if snapshot_requested {
        seen.fetch_add(1, Ordering::SeqCst);
      }
    }),
  )
  .unwrap();
  setup_canvas(&mut pe, &[10]);

  pe.handle_inc(true, &[Message::internal_snapshot(0)], &mut Meta::default());
  let deadline = Instant::now() + Duration::from_secs(5);
  while snapshots.load(Ordering::SeqCst) == 0 {
    assert!(Instant::now() < deadline, "save point never fired");
    std::thread::sleep(Duration::from_millis(1));
  }
}

#[test]
fn metadata_and_annotation_changes_emit_callbacks() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[10]);

  let msgs = [
    Message::new(
      1,
      Payload::AnnotationCreate { annotation_id: 3, x: 1, y: 1, width: 20, height: 10 },
    ),
    Message::new(
      1,
      Payload::SetMetadataInt {
        field: inkflow::canvas::document::MetadataField::Framerate,
        value: 12,
      },
    ),
  ];
  pe.handle_inc(true, &msgs, &mut Meta::default());
  let events = pump_until(&mut pe, |cs| {
    cs.annotations().count() == 1 && cs.metadata().framerate == 12
  });
  assert!(events.annotations_changes >= 1);
  assert!(events.metadata_changes >= 1);
}

#[test]
fn render_pass_consumes_diff_marks() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[10]);
  pe.handle_inc(true, &[classic_dab(1, 10, 32, 32, 0xffff_0000)], &mut Meta::default());
  pump_until(&mut pe, |cs| cs.flatten_tile(0).pixel_at(32, 32).a > 0);

  let mut size = (0, 0);
  pe.prepare_render(|w, h| size = (w, h));
  assert_eq!(size, (128, 128));

  let rendered = parking_lot::Mutex::new(Vec::new());
  pe.render_everything(&|x, y, pixels, _tid| {
    assert_eq!(pixels.len(), inkflow::TILE_LENGTH);
    rendered.lock().push((x, y));
  });
  assert!(!rendered.lock().is_empty());

  // All marks consumed: a second pass renders nothing.
  let again = parking_lot::Mutex::new(Vec::new());
  pe.render_everything(&|x, y, _pixels, _tid| {
    again.lock().push((x, y));
  });
  assert!(again.lock().is_empty());

  let tile = pe.render_content().tile_at(0, 0).expect("flattened tile stored");
  // The dab shows over the checker backdrop.
  assert_eq!(tile.pixel_at(32, 32).a, BIT15);
}

#[test]
fn render_tile_bounds_leaves_outside_marks() {
  let mut pe = engine();
  setup_canvas(&mut pe, &[10]);
  pe.handle_inc(
    true,
    &[
      classic_dab(1, 10, 16, 16, 0xffff_0000),
      classic_dab(1, 10, 100, 100, 0xffff_0000),
    ],
    &mut Meta::default(),
  );
  pump_until(&mut pe, |cs| cs.flatten_tile(3).pixel_at(36, 36).a > 0);
  pe.prepare_render(|_, _| {});

  let inside = parking_lot::Mutex::new(Vec::new());
  pe.render_tile_bounds(0, 0, 0, 0, &|x, y, _pixels, _tid| {
    inside.lock().push((x, y));
  });
  assert_eq!(*inside.lock(), vec![(0, 0)]);

  let rest = parking_lot::Mutex::new(Vec::new());
  pe.render_everything(&|x, y, _pixels, _tid| {
    rest.lock().push((x, y));
  });
  assert!(rest.lock().contains(&(1, 1)));
  assert!(!rest.lock().contains(&(0, 0)));
}
