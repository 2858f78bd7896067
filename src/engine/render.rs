//! Tile render worker pool
//!
//! Rendering is pull-driven by the host frame loop: the frame thread
//! walks the accumulated diff positions, fans the tiles out over a
//! dedicated rayon pool and blocks until the scope joins. Each worker
//! owns a scratch pixel buffer indexed by its pool thread index, so
//! jobs never alias; the host's tile callback is the only
//! synchronization point with consumer code and runs on worker threads.

use crate::canvas::state::CanvasState;
use crate::canvas::tile::{tile_counts, Tile, TILE_LENGTH};
use crate::error::RenderError;
use crate::pixels::{pixels15_to_8, BlendMode, Pixel8, BIT15};
use parking_lot::Mutex;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;
use tracing::warn;

const RENDER_THREADS_ENV: &str = "INKFLOW_RENDER_THREADS";

/// Callback invoked once per rendered tile, possibly from any worker
/// thread. Arguments: tile x, tile y, 8-bit pixels, worker index.
pub type RenderTileFn<'a> = &'a (dyn Fn(i32, i32, &[Pixel8], usize) + Sync);

/// The flattened presentation copy of the view state, one tile per
/// diff position. Also serves hosts that want to read back the merged
/// image without re-compositing.
#[derive(Debug)]
pub struct RenderTarget {
  width: i32,
  height: i32,
  tiles: Vec<Mutex<Option<Arc<Tile>>>>,
}

impl RenderTarget {
  pub fn new(width: i32, height: i32) -> Self {
    let (xtiles, ytiles) = tile_counts(width, height);
    let mut tiles = Vec::new();
    tiles.resize_with((xtiles * ytiles) as usize, || Mutex::new(None));
    Self { width, height, tiles }
  }

  pub fn width(&self) -> i32 {
    self.width
  }

  pub fn height(&self) -> i32 {
    self.height
  }

  pub fn tile_at(&self, x: i32, y: i32) -> Option<Arc<Tile>> {
    let (xtiles, _) = tile_counts(self.width, self.height);
    self
      .tiles
      .get((y * xtiles + x) as usize)
      .and_then(|slot| slot.lock().clone())
  }

  fn store(&self, index: usize, tile: Arc<Tile>) {
    if let Some(slot) = self.tiles.get(index) {
      *slot.lock() = Some(tile);
    }
  }
}

fn parse_render_threads_env() -> Result<Option<usize>, String> {
  match std::env::var(RENDER_THREADS_ENV) {
    Ok(raw) => {
      let raw = raw.trim();
      if raw.is_empty() {
        return Err(format!("{RENDER_THREADS_ENV} is set but empty"));
      }
      match raw.parse::<usize>() {
        Ok(0) => Err(format!("{RENDER_THREADS_ENV} must be at least 1")),
        Ok(threads) => Ok(Some(threads)),
        Err(_) => Err(format!(
          "{RENDER_THREADS_ENV}={raw:?} is not a valid positive integer"
        )),
      }
    }
    Err(std::env::VarError::NotPresent) => Ok(None),
    Err(err) => Err(format!("failed to read {RENDER_THREADS_ENV}: {err}")),
  }
}

pub(crate) struct RenderPool {
  pool: ThreadPool,
  threads: usize,
  scratch: Vec<Mutex<Box<[Pixel8; TILE_LENGTH]>>>,
}

impl RenderPool {
  pub(crate) fn new() -> Result<Self, RenderError> {
    let threads = match parse_render_threads_env() {
      Ok(Some(threads)) => threads,
      Ok(None) => std::thread::available_parallelism().map_or(1, |n| n.get()),
      Err(reason) => {
        warn!(%reason, "falling back to default render thread count");
        std::thread::available_parallelism().map_or(1, |n| n.get())
      }
    };
    let pool = ThreadPoolBuilder::new()
      .num_threads(threads)
      .thread_name(|i| format!("inkflow-render-{i}"))
      .build()
      .map_err(|err| RenderError::PoolUnavailable { message: err.to_string() })?;
    let mut scratch = Vec::new();
    scratch.resize_with(threads, || {
      Mutex::new(Box::new([Pixel8::default(); TILE_LENGTH]))
    });
    Ok(Self { pool, threads, scratch })
  }

  pub(crate) fn thread_count(&self) -> usize {
    self.threads
  }

  /// Renders the given tile positions of `view` into `target` and the
  /// host callback. Blocks until every job completed; the scope join is
  /// the tiles-done barrier.
  pub(crate) fn render(
    &self,
    target: &RenderTarget,
    view: &Arc<CanvasState>,
    checker: &Arc<Tile>,
    positions: &[(i32, i32)],
    render_tile: RenderTileFn,
  ) {
    if positions.is_empty() {
      return;
    }
    let (xtiles, _) = view.tile_counts();
    self.pool.scope(|scope| {
      for &(x, y) in positions {
        scope.spawn(move |_| {
          let index = (y * xtiles + x) as usize;
          let mut tile = view.flatten_tile(index);
          tile.merge(checker, BIT15, BlendMode::Behind);

          // Jobs on the same worker serialize, so the per-thread lock
          // is always uncontended; it only exists to make the disjoint
          // scratch ownership explicit.
          let tid = rayon::current_thread_index().unwrap_or(0);
          let mut scratch = self.scratch[tid].lock();
          pixels15_to_8(&mut scratch[..], tile.pixels());
          render_tile(x, y, &scratch[..], tid);

          target.store(index, Arc::new(tile));
        });
      }
    });
  }
}

impl std::fmt::Debug for RenderPool {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RenderPool")
      .field("threads", &self.threads)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::canvas::handle::apply_message;
  use crate::msg::{Message, Payload};
  use parking_lot::Mutex as PlMutex;

  #[test]
  fn pool_renders_requested_positions() {
    let mut cs = Arc::new(CanvasState::new());
    apply_message(
      &mut cs,
      &Message::new(1, Payload::CanvasResize { top: 0, right: 128, bottom: 64, left: 0 }),
    )
    .unwrap();

    let pool = RenderPool::new().unwrap();
    let target = RenderTarget::new(128, 64);
    let checker = Arc::new(Tile::checker(
      0,
      crate::pixels::Pixel15 { b: BIT15 / 2, g: BIT15 / 2, r: BIT15 / 2, a: BIT15 },
      crate::pixels::Pixel15 { b: BIT15, g: BIT15, r: BIT15, a: BIT15 },
    ));

    let rendered = PlMutex::new(Vec::new());
    pool.render(&target, &cs, &checker, &[(0, 0), (1, 0)], &|x, y, pixels, tid| {
      assert_eq!(pixels.len(), TILE_LENGTH);
      assert!(tid < pool.thread_count());
      // Transparent canvas shows the checker through behind-blend.
      assert!(pixels.iter().all(|p| p.a == 255));
      rendered.lock().push((x, y));
    });

    let mut rendered = rendered.into_inner();
    rendered.sort_unstable();
    assert_eq!(rendered, vec![(0, 0), (1, 0)]);
    assert!(target.tile_at(0, 0).is_some());
    assert!(target.tile_at(1, 0).is_some());
  }
}
