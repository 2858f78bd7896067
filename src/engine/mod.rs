//! The paint engine
//!
//! Entry point of the crate: intake of local and remote message
//! streams, the paint thread driving canvas history, the per-frame tick
//! that projects and diffs the view state, and the pull-driven tile
//! renderer.
//!
//! Threading contract: `handle_inc` and the preview operations may be
//! called from any thread; `tick`, `prepare_render` and the render
//! walks belong to one frame thread (enforced by `&mut self`); one
//! internal paint thread consumes the queues until drop, and drop
//! blocks until it exits.

pub mod local_view;
pub mod meta;
pub mod paint_thread;
pub mod preview;
pub mod render;

use crate::acl::{AclChange, AclState};
use crate::canvas::diff::CanvasDiff;
use crate::canvas::document::{AnnotationList, DocumentMetadata, Timeline};
use crate::canvas::layer_props::LayerPropsList;
use crate::canvas::state::CanvasState;
use crate::canvas::tile::Tile;
use crate::error::{PreviewError, Result};
use crate::history::{CanvasHistory, SavePointFn, UserCursorBuffer};
use crate::msg::queue::{MessageFifos, Semaphore};
use crate::msg::{Message, Payload};
use crate::pixels::{Pixel15, BIT15};
use parking_lot::Mutex;
use self::local_view::{apply_inspect, apply_local_layer_props, LocalViewState};
use self::meta::MetaBuffer;
use self::preview::{Preview, PreviewSwap};
use self::render::RenderPool;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::debug;

pub use self::local_view::LayerViewMode;
pub use self::render::{RenderTarget, RenderTileFn};

/// Callbacks delivered synchronously from `handle_inc` after the push
/// phase. Implement only what the host cares about.
pub trait MetaSink {
  fn acls_changed(&mut self, changes: AclChange) {
    let _ = changes;
  }
  fn laser_trail(&mut self, context_id: u32, persistence: u8, color: u32) {
    let _ = (context_id, persistence, color);
  }
  fn move_pointer(&mut self, context_id: u32, x: i32, y: i32) {
    let _ = (context_id, x, y);
  }
  fn default_layer_set(&mut self, layer_id: u16) {
    let _ = layer_id;
  }
}

/// Callbacks delivered from `tick` when the view state moved.
pub trait TickSink {
  fn catchup(&mut self, progress: i32) {
    let _ = progress;
  }
  fn resized(&mut self, offset_x: i32, offset_y: i32, prev_width: i32, prev_height: i32) {
    let _ = (offset_x, offset_y, prev_width, prev_height);
  }
  fn tile_changed(&mut self, x: i32, y: i32) {
    let _ = (x, y);
  }
  fn layer_props_changed(&mut self, layer_props: &Arc<LayerPropsList>) {
    let _ = layer_props;
  }
  fn annotations_changed(&mut self, annotations: &Arc<AnnotationList>) {
    let _ = annotations;
  }
  fn document_metadata_changed(&mut self, metadata: &Arc<DocumentMetadata>) {
    let _ = metadata;
  }
  fn timeline_changed(&mut self, timeline: &Arc<Timeline>) {
    let _ = timeline;
  }
  fn cursor_moved(&mut self, context_id: u32, layer_id: u16, x: i32, y: i32) {
    let _ = (context_id, layer_id, x, y);
  }
}

/// State shared between the public surface and the paint thread.
pub(crate) struct Shared {
  pub(crate) fifos: Mutex<MessageFifos>,
  pub(crate) sem: Semaphore,
  pub(crate) running: AtomicBool,
  pub(crate) catchup: AtomicI32,
  pub(crate) next_preview: Mutex<Option<PreviewSwap>>,
  pub(crate) ch: Arc<CanvasHistory>,
}

impl Shared {
  pub(crate) fn new(ch: Arc<CanvasHistory>) -> Self {
    Self {
      fifos: Mutex::new(MessageFifos::default()),
      sem: Semaphore::new(0),
      running: AtomicBool::new(true),
      catchup: AtomicI32::new(-1),
      next_preview: Mutex::new(None),
      ch,
    }
  }
}

pub struct PaintEngine {
  acls: Arc<dyn AclState>,
  shared: Arc<Shared>,
  paint_thread: Option<JoinHandle<()>>,
  render: RenderPool,
  target: RenderTarget,
  checker: Arc<Tile>,
  diff: CanvasDiff,
  history_cs: Arc<CanvasState>,
  view_cs: Arc<CanvasState>,
  local_view: LocalViewState,
  preview: Option<Box<Preview>>,
  meta: Mutex<MetaBuffer>,
  cursor_buffer: UserCursorBuffer,
}

impl PaintEngine {
  pub fn new(
    acls: Arc<dyn AclState>,
    initial_cs: Option<Arc<CanvasState>>,
    save_point: SavePointFn,
  ) -> Result<Self> {
    // Build the pool before spawning the consumer so a failure here
    // cannot leave a paint thread behind.
    let render = RenderPool::new()?;
    let ch = Arc::new(CanvasHistory::new(initial_cs, save_point));
    let shared = Arc::new(Shared::new(Arc::clone(&ch)));
    let paint_thread = {
      let shared = Arc::clone(&shared);
      std::thread::Builder::new()
        .name("inkflow-paint".into())
        .spawn(move || paint_thread::run(shared))
        .expect("spawn paint thread")
    };
    // The frame thread starts from the empty state; the first tick
    // observes the real committed state as a change and reports it.
    let history_cs = Arc::new(CanvasState::new());
    let view_cs = Arc::clone(&history_cs);
    let half = BIT15 / 2;
    let checker = Arc::new(Tile::checker(
      0,
      Pixel15 { b: half, g: half, r: half, a: BIT15 },
      Pixel15 { b: BIT15, g: BIT15, r: BIT15, a: BIT15 },
    ));
    Ok(Self {
      acls,
      shared,
      paint_thread: Some(paint_thread),
      render,
      target: RenderTarget::new(0, 0),
      checker,
      diff: CanvasDiff::new(),
      history_cs,
      view_cs,
      local_view: LocalViewState::new(),
      preview: None,
      meta: Mutex::new(MetaBuffer::new()),
      cursor_buffer: UserCursorBuffer::default(),
    })
  }

  pub fn render_thread_count(&self) -> usize {
    self.render.thread_count()
  }

  /// The flattened presentation tiles of the last render pass.
  pub fn render_content(&self) -> &RenderTarget {
    &self.target
  }

  pub fn local_drawing_in_progress_set(&self, local_drawing_in_progress: bool) {
    self
      .shared
      .ch
      .local_drawing_in_progress_set(local_drawing_in_progress);
  }

  pub fn active_layer_id_set(&mut self, layer_id: i32) {
    if self.local_view.active_layer_id != layer_id {
      self.local_view.active_layer_id = layer_id;
      if self.local_view.view_mode != LayerViewMode::Normal {
        self.local_view.invalidate();
      }
    }
  }

  pub fn active_frame_index_set(&mut self, frame_index: i32) {
    if self.local_view.active_frame_index != frame_index {
      self.local_view.active_frame_index = frame_index;
      if matches!(
        self.local_view.view_mode,
        LayerViewMode::Frame | LayerViewMode::OnionSkin
      ) {
        self.local_view.invalidate();
      }
    }
  }

  pub fn view_mode_set(&mut self, mode: LayerViewMode) {
    if self.local_view.view_mode != mode {
      self.local_view.view_mode = mode;
      self.local_view.invalidate();
    }
  }

  pub fn reveal_censored(&self) -> bool {
    self.local_view.reveal_censored
  }

  pub fn reveal_censored_set(&mut self, reveal_censored: bool) {
    if self.local_view.reveal_censored != reveal_censored {
      self.local_view.reveal_censored = reveal_censored;
      self.local_view.invalidate();
    }
  }

  pub fn layer_visibility_set(&mut self, layer_id: i32, hidden: bool) {
    let index = self
      .local_view
      .hidden_layers
      .iter()
      .position(|&id| id == layer_id);
    match (hidden, index) {
      (true, None) => {
        self.local_view.hidden_layers.push(layer_id);
        self.local_view.invalidate();
      }
      (false, Some(index)) => {
        self.local_view.hidden_layers.swap_remove(index);
        self.local_view.invalidate();
      }
      _ => {}
    }
  }

  pub fn inspect_context_id_set(&mut self, context_id: u32) {
    if self.local_view.inspect_context_id != context_id {
      self.local_view.inspect_context_id = context_id;
      self.local_view.invalidate();
    }
  }

  /// Feeds a batch of messages into the engine. Drawing commands and
  /// internal messages queue for the paint thread; presence traffic
  /// folds into the per-call aggregate and comes back through `sink`.
  /// Returns the number of messages actually queued.
  pub fn handle_inc(&self, local: bool, msgs: &[Message], sink: &mut dyn MetaSink) -> usize {
    let mut meta = self.meta.lock();
    meta.clear();

    // Nothing locks the queue until a message actually needs pushing;
    // meta-only batches never touch the queue mutex.
    let mut pushed = 0;
    for (i, msg) in msgs.iter().enumerate() {
      if self.should_push(local, msg, &mut meta) {
        pushed = self.push_messages(local, &msgs[i..], &mut meta);
        break;
      }
    }

    meta.deliver(sink);
    pushed
  }

  fn should_push(&self, local: bool, msg: &Message, meta: &mut MetaBuffer) -> bool {
    let kind = msg.kind();
    if local {
      return kind.is_command() || kind.is_internal();
    }
    let flags = self.acls.handle(msg);
    meta.fold_acl(flags);
    if flags.contains(AclChange::FILTERED) {
      return false;
    }
    if kind.is_command() || kind.is_internal() {
      return true;
    }
    match msg.payload() {
      Payload::LaserTrail { persistence, color } => {
        meta.fold_laser_trail(msg.context_id(), *persistence, *color);
      }
      Payload::MovePointer { x, y } => {
        meta.fold_move_pointer(msg.context_id(), *x, *y);
      }
      Payload::DefaultLayer { layer_id } => {
        meta.fold_default_layer(*layer_id);
      }
      _ => {}
    }
    false
  }

  /// Pushes `msgs[0]` plus every following message that qualifies, all
  /// under one lock, posting the semaphore once per pushed message.
  fn push_messages(&self, local: bool, msgs: &[Message], meta: &mut MetaBuffer) -> usize {
    let mut fifos = self.shared.fifos.lock();
    fifos.stream(local).push_back(msgs[0].clone());
    let mut pushed = 1;
    for msg in &msgs[1..] {
      if self.should_push(local, msg, meta) {
        fifos.stream(local).push_back(msg.clone());
        pushed += 1;
      }
    }
    self.shared.sem.post(pushed);
    pushed
  }

  /// Per-frame pump: pick up catch-up progress, the latest committed
  /// state and any pending preview, reproject the view and report what
  /// changed. No callbacks fire when nothing moved.
  pub fn tick(&mut self, sink: &mut dyn TickSink) {
    let progress = self.shared.catchup.swap(-1, Ordering::AcqRel);
    if progress != -1 {
      sink.catchup(progress);
    }

    let next_history_cs = self
      .shared
      .ch
      .compare_and_get(&self.history_cs, &mut self.cursor_buffer);
    let history_changed = next_history_cs.is_some();
    if let Some(cs) = next_history_cs {
      self.history_cs = cs;
    }

    let next_preview = self.shared.next_preview.lock().take();
    let preview_swapped = next_preview.is_some();
    if let Some(swap) = next_preview {
      self.preview = match swap {
        PreviewSwap::Install(preview) => Some(preview),
        PreviewSwap::Clear => None,
      };
    }

    let local_view_changed = self.local_view.prev_lpl.is_none();

    if history_changed || preview_swapped || local_view_changed {
      // Previews, hidden layers and the like are local, so they apply
      // on top of whatever came out of the history.
      let prev_view_cs = Arc::clone(&self.view_cs);
      let mut cs = match self.preview.as_mut() {
        Some(preview) => preview.render_onto(&self.history_cs),
        None => Arc::clone(&self.history_cs),
      };
      cs = apply_inspect(self.local_view.inspect_context_id, cs);
      cs = apply_local_layer_props(&mut self.local_view, cs);
      self.view_cs = cs;
      self.emit_changes(&prev_view_cs, sink);
    }
  }

  fn emit_changes(&mut self, prev: &Arc<CanvasState>, sink: &mut dyn TickSink) {
    let cs = Arc::clone(&self.view_cs);
    if prev.width() != cs.width() || prev.height() != cs.height() {
      sink.resized(
        prev.offset_x() - cs.offset_x(),
        prev.offset_y() - cs.offset_y(),
        prev.width(),
        prev.height(),
      );
    }

    self.diff.check(&cs, prev);
    self.diff.each_pos(|x, y| sink.tile_changed(x, y));
    if self.diff.layer_props_changed_reset() {
      sink.layer_props_changed(cs.layer_props());
    }

    if !Arc::ptr_eq(cs.annotations(), prev.annotations()) {
      sink.annotations_changed(cs.annotations());
    }
    if !Arc::ptr_eq(cs.metadata(), prev.metadata()) {
      sink.document_metadata_changed(cs.metadata());
    }
    if !Arc::ptr_eq(cs.timeline(), prev.timeline()) {
      sink.timeline_changed(cs.timeline());
    }

    for cursor in &self.cursor_buffer.cursors {
      sink.cursor_moved(cursor.context_id, cursor.layer_id, cursor.x, cursor.y);
    }
  }

  /// Reports the current view size and reconciles the render target
  /// with it.
  pub fn prepare_render(&mut self, render_size: impl FnOnce(i32, i32)) {
    let width = self.view_cs.width();
    let height = self.view_cs.height();
    render_size(width, height);
    if self.target.width() != width || self.target.height() != height {
      self.target = RenderTarget::new(width, height);
    }
  }

  /// Renders every tile the diff has accumulated since the last render
  /// pass, clearing the marks.
  pub fn render_everything(&mut self, render_tile: RenderTileFn) {
    let mut positions = Vec::new();
    self.diff.each_pos_reset(|x, y| positions.push((x, y)));
    self
      .render
      .render(&self.target, &self.view_cs, &self.checker, &positions, render_tile);
  }

  /// Like `render_everything`, but only consumes marks inside the
  /// inclusive tile rectangle.
  pub fn render_tile_bounds(
    &mut self,
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
    render_tile: RenderTileFn,
  ) {
    let mut positions = Vec::new();
    self
      .diff
      .each_pos_tile_bounds_reset(left, top, right, bottom, |x, y| positions.push((x, y)));
    self
      .render
      .render(&self.target, &self.view_cs, &self.checker, &positions, render_tile);
  }

  /// Installs a cut preview: a rectangle (optionally masked) erased
  /// from a layer, for move/cut tool feedback.
  pub fn preview_cut(
    &self,
    layer_id: u16,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    mask: Option<&[u8]>,
  ) -> Result<()> {
    let mask = match mask {
      Some(mask) => {
        let expected = (width.max(0) as usize) * (height.max(0) as usize);
        if mask.len() != expected {
          return Err(PreviewError::MaskMismatch { expected, actual: mask.len() }.into());
        }
        Some(mask.to_vec().into_boxed_slice())
      }
      None => None,
    };
    let preview = Preview::new_cut(
      self.view_cs.offset_x(),
      self.view_cs.offset_y(),
      layer_id,
      x,
      y,
      width,
      height,
      mask,
    );
    self.sync_preview(PreviewSwap::Install(Box::new(preview)));
    Ok(())
  }

  /// Installs a dabs preview rendering the given draw-dab messages on
  /// top of the committed state.
  pub fn preview_dabs(&self, layer_id: u16, messages: &[Message]) -> Result<()> {
    if messages.is_empty() {
      return Err(PreviewError::EmptyDabs.into());
    }
    let preview = Preview::new_dabs(
      self.view_cs.offset_x(),
      self.view_cs.offset_y(),
      layer_id,
      messages.to_vec(),
    );
    self.sync_preview(PreviewSwap::Install(Box::new(preview)));
    Ok(())
  }

  pub fn preview_clear(&self) {
    self.sync_preview(PreviewSwap::Clear);
  }

  /// Routes the preview through the local FIFO so it lands after every
  /// local drawing command submitted before it; installing it directly
  /// would make fresh strokes appear to undo for a moment.
  fn sync_preview(&self, swap: PreviewSwap) {
    let msg = Message::internal_preview(0, swap);
    let mut fifos = self.shared.fifos.lock();
    fifos.local.push_back(msg);
    self.shared.sem.post(1);
  }

  /// The current view canvas state.
  pub fn canvas_state(&self) -> Arc<CanvasState> {
    Arc::clone(&self.view_cs)
  }
}

impl Drop for PaintEngine {
  fn drop(&mut self) {
    self.shared.running.store(false, Ordering::Release);
    self.shared.sem.post(1);
    if let Some(handle) = self.paint_thread.take() {
      let _ = handle.join();
    }
    // Dropping queued messages disposes any preview still riding in
    // them exactly once.
    let mut fifos = self.shared.fifos.lock();
    let drained = fifos.total();
    fifos.local.clear();
    fifos.remote.clear();
    drop(fifos);
    *self.shared.next_preview.lock() = None;
    self.shared.ch.cleanup();
    if drained > 0 {
      debug!(drained, "dropped undelivered messages at teardown");
    }
  }
}

impl std::fmt::Debug for PaintEngine {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PaintEngine")
      .field("render_threads", &self.render.thread_count())
      .finish_non_exhaustive()
  }
}
