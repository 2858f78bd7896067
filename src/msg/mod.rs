//! Drawing session messages
//!
//! Messages are reference counted end to end: the intake queue, the
//! canvas history and previews all hold the same cheap handles. The wire
//! codec lives outside this crate; these are the decoded in-memory
//! forms. Kind ids follow the session protocol numbering, where
//! everything at 128 and above is a drawing command that mutates canvas
//! state, and lower ids are presence or control traffic.

pub mod queue;

use crate::canvas::document::MetadataField;
use crate::engine::preview::PreviewSwap;
use crate::pixels::BlendMode;
use parking_lot::Mutex;
use std::sync::Arc;

/// Message kind ids, mirroring the session protocol numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum MessageKind {
  Internal = 0,
  UserJoin = 32,
  LaserTrail = 65,
  MovePointer = 66,
  DefaultLayer = 73,
  CanvasResize = 128,
  LayerCreate = 129,
  LayerAttributes = 130,
  LayerDelete = 132,
  FillRect = 135,
  CanvasBackground = 136,
  AnnotationCreate = 141,
  AnnotationReshape = 142,
  AnnotationDelete = 144,
  SetMetadataInt = 146,
  SetTimelineFrame = 147,
  DrawDabsClassic = 148,
  DrawDabsPixel = 149,
  DrawDabsPixelSquare = 150,
  DrawDabsMyPaint = 151,
}

impl MessageKind {
  /// Drawing commands mutate canvas state and must go through the paint
  /// thread; everything else is meta traffic.
  pub fn is_command(self) -> bool {
    self as u8 >= 128
  }

  pub fn is_internal(self) -> bool {
    self == MessageKind::Internal
  }

  pub fn is_draw_dabs(self) -> bool {
    matches!(
      self,
      MessageKind::DrawDabsClassic
        | MessageKind::DrawDabsPixel
        | MessageKind::DrawDabsPixelSquare
        | MessageKind::DrawDabsMyPaint
    )
  }
}

/// Engine-internal control messages, routed through the same local FIFO
/// as drawing commands so they serialize with them.
#[derive(Debug)]
pub enum InternalMessage {
  Reset,
  SoftReset,
  Snapshot,
  Catchup(i32),
  /// Pending preview handoff. The cell is taken exactly once, by the
  /// paint thread; a message dropped with the cell still occupied (for
  /// example at teardown) disposes the preview through `Drop`.
  Preview(Mutex<Option<PreviewSwap>>),
}

impl InternalMessage {
  pub fn take_preview(&self) -> Option<PreviewSwap> {
    match self {
      InternalMessage::Preview(cell) => cell.lock().take(),
      _ => None,
    }
  }
}

/// One brush touch of the classic engine; `size` is the radius in
/// 1/256 pixel steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassicDab {
  pub x: i32,
  pub y: i32,
  pub size: u32,
  pub hardness: u8,
  pub opacity: u8,
}

/// One pixel-brush touch; `size` is the radius in whole pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelDab {
  pub x: i32,
  pub y: i32,
  pub size: u8,
  pub opacity: u8,
}

/// One MyPaint brush touch; `size` is in 1/256 pixel steps and is
/// interpreted as a diameter by the paint kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MyPaintDab {
  pub x: i32,
  pub y: i32,
  pub size: u32,
  pub hardness: u8,
  pub opacity: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawDabsClassic {
  pub layer_id: u16,
  pub x: i32,
  pub y: i32,
  pub color: u32,
  pub mode: BlendMode,
  pub indirect: bool,
  pub dabs: Vec<ClassicDab>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawDabsPixel {
  pub layer_id: u16,
  pub x: i32,
  pub y: i32,
  pub color: u32,
  pub mode: BlendMode,
  pub indirect: bool,
  pub dabs: Vec<PixelDab>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawDabsMyPaint {
  pub layer_id: u16,
  pub x: i32,
  pub y: i32,
  pub color: u32,
  pub lock_alpha: u8,
  pub dabs: Vec<MyPaintDab>,
}

#[derive(Debug)]
pub enum Payload {
  Internal(InternalMessage),
  UserJoin {
    name: Arc<str>,
  },
  LaserTrail {
    persistence: u8,
    color: u32,
  },
  MovePointer {
    x: i32,
    y: i32,
  },
  DefaultLayer {
    layer_id: u16,
  },
  CanvasResize {
    top: i32,
    right: i32,
    bottom: i32,
    left: i32,
  },
  CanvasBackground {
    color: u32,
  },
  LayerCreate {
    layer_id: u16,
    group: bool,
  },
  LayerAttributes {
    layer_id: u16,
    opacity: u8,
    censored: bool,
    isolated: bool,
  },
  LayerDelete {
    layer_id: u16,
  },
  FillRect {
    layer_id: u16,
    mode: BlendMode,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
    color: u32,
  },
  AnnotationCreate {
    annotation_id: u16,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
  },
  AnnotationReshape {
    annotation_id: u16,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
  },
  AnnotationDelete {
    annotation_id: u16,
  },
  SetMetadataInt {
    field: MetadataField,
    value: i32,
  },
  SetTimelineFrame {
    frame: u16,
    layer_ids: Vec<u16>,
  },
  DrawDabsClassic(DrawDabsClassic),
  DrawDabsPixel(DrawDabsPixel),
  DrawDabsPixelSquare(DrawDabsPixel),
  DrawDabsMyPaint(DrawDabsMyPaint),
}

impl Payload {
  pub fn kind(&self) -> MessageKind {
    match self {
      Payload::Internal(_) => MessageKind::Internal,
      Payload::UserJoin { .. } => MessageKind::UserJoin,
      Payload::LaserTrail { .. } => MessageKind::LaserTrail,
      Payload::MovePointer { .. } => MessageKind::MovePointer,
      Payload::DefaultLayer { .. } => MessageKind::DefaultLayer,
      Payload::CanvasResize { .. } => MessageKind::CanvasResize,
      Payload::CanvasBackground { .. } => MessageKind::CanvasBackground,
      Payload::LayerCreate { .. } => MessageKind::LayerCreate,
      Payload::LayerAttributes { .. } => MessageKind::LayerAttributes,
      Payload::LayerDelete { .. } => MessageKind::LayerDelete,
      Payload::FillRect { .. } => MessageKind::FillRect,
      Payload::AnnotationCreate { .. } => MessageKind::AnnotationCreate,
      Payload::AnnotationReshape { .. } => MessageKind::AnnotationReshape,
      Payload::AnnotationDelete { .. } => MessageKind::AnnotationDelete,
      Payload::SetMetadataInt { .. } => MessageKind::SetMetadataInt,
      Payload::SetTimelineFrame { .. } => MessageKind::SetTimelineFrame,
      Payload::DrawDabsClassic(_) => MessageKind::DrawDabsClassic,
      Payload::DrawDabsPixel(_) => MessageKind::DrawDabsPixel,
      Payload::DrawDabsPixelSquare(_) => MessageKind::DrawDabsPixelSquare,
      Payload::DrawDabsMyPaint(_) => MessageKind::DrawDabsMyPaint,
    }
  }
}

#[derive(Debug)]
struct MessageData {
  context_id: u32,
  payload: Payload,
}

/// Reference-counted message handle.
#[derive(Debug, Clone)]
pub struct Message {
  data: Arc<MessageData>,
}

impl Message {
  pub fn new(context_id: u32, payload: Payload) -> Self {
    Self {
      data: Arc::new(MessageData { context_id, payload }),
    }
  }

  pub fn context_id(&self) -> u32 {
    self.data.context_id
  }

  /// Number of live handles to this message; diagnostic aid for
  /// ownership tests.
  pub fn ref_count(&self) -> usize {
    Arc::strong_count(&self.data)
  }

  pub fn payload(&self) -> &Payload {
    &self.data.payload
  }

  pub fn kind(&self) -> MessageKind {
    self.data.payload.kind()
  }

  pub fn internal(&self) -> Option<&InternalMessage> {
    match &self.data.payload {
      Payload::Internal(mi) => Some(mi),
      _ => None,
    }
  }

  pub fn internal_reset(context_id: u32) -> Self {
    Self::new(context_id, Payload::Internal(InternalMessage::Reset))
  }

  pub fn internal_soft_reset(context_id: u32) -> Self {
    Self::new(context_id, Payload::Internal(InternalMessage::SoftReset))
  }

  pub fn internal_snapshot(context_id: u32) -> Self {
    Self::new(context_id, Payload::Internal(InternalMessage::Snapshot))
  }

  pub fn internal_catchup(context_id: u32, progress: i32) -> Self {
    Self::new(context_id, Payload::Internal(InternalMessage::Catchup(progress)))
  }

  pub fn internal_preview(context_id: u32, swap: PreviewSwap) -> Self {
    Self::new(
      context_id,
      Payload::Internal(InternalMessage::Preview(Mutex::new(Some(swap)))),
    )
  }
}
