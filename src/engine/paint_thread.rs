//! The single consumer of the intake queues
//!
//! Draw-dab messages are so common and so bursty that they get special
//! batch handling: after taking the first message of a wake, the thread
//! keeps shifting messages from the same stream while the estimated dab
//! area stays under budget, then hands the whole run to history in one
//! call. The local queue always wins over the remote one so the user's
//! own strokes stay responsive.

use crate::engine::Shared;
use crate::msg::{InternalMessage, Message, Payload};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Maximum number of messages batched into one multidab call.
pub const MAX_MULTIDAB_MESSAGES: usize = 1024;
/// Largest estimated area all batched dabs together may cover.
pub const MAX_MULTIDAB_AREA: i64 = 256 * 256 * 16;
/// If the first message already exceeds this, the next one would likely
/// blow the budget, so no batching is attempted at all.
pub const MAX_MULTIDAB_AREA_THRESHOLD: i64 = MAX_MULTIDAB_AREA / 2;

pub(crate) fn run(shared: Arc<Shared>) {
  let mut msgs: Vec<Message> = Vec::with_capacity(64);
  loop {
    shared.sem.acquire();
    if !shared.running.load(Ordering::Acquire) {
      break;
    }
    handle_message(&shared, &mut msgs);
  }
  debug!("paint thread exiting");
}

fn handle_message(shared: &Shared, msgs: &mut Vec<Message>) {
  msgs.clear();
  let local;
  {
    let mut fifos = shared.fifos.lock();
    local = !fifos.local.is_empty();
    let Some(first) = fifos.stream(local).pop_front() else {
      return;
    };
    msgs.push(first);

    let dabs_area = get_dabs_area(&msgs[0], 0);
    if dabs_area <= MAX_MULTIDAB_AREA_THRESHOLD {
      let mut total = dabs_area;
      let queue = fifos.stream(local);
      while msgs.len() < MAX_MULTIDAB_MESSAGES {
        let Some(next) = queue.front() else {
          break;
        };
        total = get_dabs_area(next, total);
        if total > MAX_MULTIDAB_AREA {
          break;
        }
        let Some(next) = queue.pop_front() else {
          break;
        };
        msgs.push(next);
      }
      let extra = msgs.len() - 1;
      if extra > 0 {
        // The producers posted once per message; these permits must
        // already be available.
        let took = shared.sem.try_acquire_many(extra);
        debug_assert!(took, "semaphore out of sync with queue contents");
      }
    }
  }

  if msgs.len() == 1 {
    handle_single(shared, local, &msgs[0]);
  } else if local {
    shared.ch.handle_local_multidab(msgs);
  } else {
    shared.ch.handle_multidab(msgs);
  }
}

fn handle_single(shared: &Shared, local: bool, msg: &Message) {
  match msg.payload() {
    Payload::Internal(mi) => handle_internal(shared, mi),
    _ => {
      let result = if local {
        shared.ch.handle_local(msg)
      } else {
        shared.ch.handle(msg)
      };
      if let Err(err) = result {
        if local {
          warn!(kind = msg.kind() as u8, %err, "Handle local command");
        } else {
          warn!(kind = msg.kind() as u8, %err, "Handle remote command");
        }
      }
    }
  }
}

fn handle_internal(shared: &Shared, mi: &InternalMessage) {
  match mi {
    InternalMessage::Reset => shared.ch.reset(),
    InternalMessage::SoftReset => shared.ch.soft_reset(),
    InternalMessage::Snapshot => {
      if let Err(err) = shared.ch.snapshot() {
        warn!(%err, "Error requesting snapshot");
      }
    }
    InternalMessage::Catchup(progress) => {
      shared.catchup.store(*progress, Ordering::Release);
    }
    InternalMessage::Preview(_) => {
      if let Some(swap) = mi.take_preview() {
        // A displaced pending preview is dropped here, disposing it.
        *shared.next_preview.lock() = Some(swap);
      }
    }
  }
}

/// Estimated pixel area of a message's dabs, accumulated onto
/// `dabs_area`. Non-dab messages cost more than the whole budget so they
/// never batch.
pub(crate) fn get_dabs_area(msg: &Message, dabs_area: i64) -> i64 {
  let mut area = dabs_area;
  match msg.payload() {
    Payload::DrawDabsClassic(d) => {
      for dab in &d.dabs {
        if area >= MAX_MULTIDAB_AREA {
          break;
        }
        let radius = i64::from(dab.size) / 256;
        let diameter = radius * 2;
        area += (diameter * diameter).max(1);
      }
      area
    }
    Payload::DrawDabsPixel(d) | Payload::DrawDabsPixelSquare(d) => {
      for dab in &d.dabs {
        if area >= MAX_MULTIDAB_AREA {
          break;
        }
        let radius = i64::from(dab.size);
        let diameter = radius * 2;
        area += (diameter * diameter).max(1);
      }
      area
    }
    Payload::DrawDabsMyPaint(d) => {
      for dab in &d.dabs {
        if area >= MAX_MULTIDAB_AREA {
          break;
        }
        // The size is nominally a radius but the paint kernel reads it
        // as a diameter; this estimate must track the kernel.
        let diameter = i64::from(dab.size) / 256;
        area += (diameter * diameter).max(1);
      }
      area
    }
    _ => MAX_MULTIDAB_AREA + 1,
  }
}
