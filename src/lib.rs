pub mod acl;
pub mod canvas;
pub mod engine;
pub mod error;
pub mod history;
pub mod msg;
pub mod paint;
pub mod pixels;

pub use error::{Error, Result};
pub use pixels::{BlendMode, Pixel15, Pixel8, UPixel15, UPixel8, BIT15};

pub use acl::{AclChange, AclState, AllowAll};
pub use canvas::state::CanvasState;
pub use canvas::tile::{Tile, TILE_LENGTH, TILE_SIZE};
pub use engine::{
  LayerViewMode, MetaSink, PaintEngine, RenderTarget, RenderTileFn, TickSink,
};
pub use history::{CanvasHistory, SavePointFn, UserCursor, UserCursorBuffer};
pub use msg::{Message, MessageKind, Payload};
