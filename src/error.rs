//! Error types for the paint engine
//!
//! This module provides error types for all subsystems:
//! - History errors (commands that cannot apply to the current canvas)
//! - Render errors (invalid parameters, worker pool failures)
//! - Preview errors (previews built against impossible geometry)
//!
//! All errors use the `thiserror` crate for minimal boilerplate and
//! proper error trait implementations. Expected failures (a malformed
//! remote command, for example) surface as `HistoryError` and are logged
//! by the paint thread rather than propagated to callers.

use thiserror::Error;

/// Result type alias for paint engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the paint engine
///
/// Each variant wraps a more specific error type for that subsystem.
#[derive(Error, Debug)]
pub enum Error {
  /// A command could not be applied to the current canvas state
  #[error("History error: {0}")]
  History(#[from] HistoryError),

  /// Rendering or rasterization error
  #[error("Render error: {0}")]
  Render(#[from] RenderError),

  /// Preview construction error
  #[error("Preview error: {0}")]
  Preview(#[from] PreviewError),
}

/// Errors from applying a command to canvas history
///
/// These are expected at runtime: a remote peer may reference a layer
/// that a concurrent command already deleted. The paint thread logs them
/// at warning level and keeps processing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistoryError {
  /// The referenced layer id does not resolve in the current state
  #[error("Layer {layer_id} not found")]
  LayerNotFound { layer_id: u16 },

  /// A create command collided with an existing layer id
  #[error("Layer {layer_id} already exists")]
  LayerExists { layer_id: u16 },

  /// A content operation targeted a group layer
  #[error("Layer {layer_id} is a group")]
  GroupTarget { layer_id: u16 },

  /// The referenced annotation id does not resolve
  #[error("Annotation {annotation_id} not found")]
  AnnotationNotFound { annotation_id: u16 },

  /// A create command collided with an existing annotation id
  #[error("Annotation {annotation_id} already exists")]
  AnnotationExists { annotation_id: u16 },

  /// Canvas or rectangle dimensions out of range
  #[error("Invalid dimensions {width}x{height}")]
  InvalidDimensions { width: i32, height: i32 },

  /// A message kind that the history cannot apply
  #[error("Message kind {kind} is not a drawing command")]
  NotACommand { kind: u8 },

  /// A snapshot was requested with nothing to snapshot
  #[error("No canvas to snapshot")]
  NothingToSnapshot,
}

/// Errors from the tile renderer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
  /// Invalid render parameters
  #[error("Invalid render parameters: {message}")]
  InvalidParameters { message: String },

  /// The render worker pool could not be built
  #[error("Render pool unavailable: {message}")]
  PoolUnavailable { message: String },
}

/// Errors from preview construction
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreviewError {
  /// A cut preview mask does not match the cut rectangle
  #[error("Cut mask has {actual} entries, rectangle needs {expected}")]
  MaskMismatch { expected: usize, actual: usize },

  /// A dabs preview was created without any dab messages
  #[error("Dabs preview needs at least one message")]
  EmptyDabs,
}
