//! Hands rendered frames from the render thread to a realtime consumer.
//!
//! One [`AudioRingBuffer`] behind a `parking_lot` mutex, split into a
//! [`FrameSender`] and a [`FrameReceiver`]. The receiver never blocks: if
//! the lock is contended it keeps the previous frame. How the sender waits
//! for room is chosen once, with [`HandoffMode`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;

use crate::ring::{AudioRingBuffer, PopStatus};
use crate::traits::AudioError;

/// How a [`FrameSender`] waits while the queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandoffMode {
    /// Park on a condition variable until the receiver frees a slot.
    #[default]
    Blocking,
    /// Busy-wait with spin hints and yields. Lowest latency, burns a core.
    Spin,
}

impl std::str::FromStr for HandoffMode {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blocking" => Ok(HandoffMode::Blocking),
            "spin" => Ok(HandoffMode::Spin),
            other => Err(AudioError::UnknownHandoff(other.to_string())),
        }
    }
}

struct Shared {
    ring: Mutex<AudioRingBuffer>,
    space: Condvar,
    mode: HandoffMode,
    closed: AtomicBool,
}

/// Constructor for a connected sender/receiver pair.
pub struct FrameBridge;

impl FrameBridge {
    /// A bridge holding `capacity` frames of `frame_len` samples.
    pub fn new(capacity: usize, frame_len: usize, mode: HandoffMode) -> (FrameSender, FrameReceiver) {
        let shared = Arc::new(Shared {
            ring: Mutex::new(AudioRingBuffer::new(capacity, frame_len)),
            space: Condvar::new(),
            mode,
            closed: AtomicBool::new(false),
        });
        let receiver = FrameReceiver {
            shared: shared.clone(),
            frame: vec![0.0; frame_len],
            last_status: PopStatus::Silence,
        };
        (FrameSender { shared }, receiver)
    }
}

/// Producer half. Lives on the render thread.
pub struct FrameSender {
    shared: Arc<Shared>,
}

impl FrameSender {
    pub fn mode(&self) -> HandoffMode {
        self.shared.mode
    }

    pub fn frame_len(&self) -> usize {
        self.shared.ring.lock().frame_len()
    }

    /// True while there is room for another frame.
    pub fn is_ready(&self) -> bool {
        !self.shared.ring.lock().is_full()
    }

    /// Unread frames.
    pub fn len(&self) -> usize {
        self.shared.ring.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `frame`, waiting for room according to the handoff mode.
    ///
    /// Fails once the receiver is gone.
    pub fn send(&self, frame: &[f32]) -> Result<(), AudioError> {
        match self.shared.mode {
            HandoffMode::Blocking => self.send_blocking(frame),
            HandoffMode::Spin => self.send_spin(frame),
        }
    }

    fn send_blocking(&self, frame: &[f32]) -> Result<(), AudioError> {
        let mut ring = self.shared.ring.lock();
        while ring.is_full() {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(AudioError::Disconnected);
            }
            self.shared.space.wait(&mut ring);
        }
        ring.push(frame);
        Ok(())
    }

    fn send_spin(&self, frame: &[f32]) -> Result<(), AudioError> {
        let mut spins = 0u32;
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(AudioError::Disconnected);
            }
            if let Some(mut ring) = self.shared.ring.try_lock() {
                if !ring.is_full() {
                    ring.push(frame);
                    return Ok(());
                }
            }
            spins += 1;
            if spins % 64 == 0 {
                std::thread::yield_now();
            } else {
                std::hint::spin_loop();
            }
        }
    }

    /// Queue `frame` without waiting; a full queue overwrites its oldest
    /// frame.
    pub fn force_send(&self, frame: &[f32]) {
        self.shared.ring.lock().push(frame);
    }
}

/// Consumer half. Lives in the device callback.
pub struct FrameReceiver {
    shared: Arc<Shared>,
    frame: Vec<f32>,
    last_status: PopStatus,
}

impl FrameReceiver {
    /// Advance to the next frame and return it. Never blocks and never
    /// allocates.
    pub fn recv(&mut self) -> (&[f32], PopStatus) {
        let status = match self.shared.ring.try_lock() {
            Some(mut ring) => ring.pop(&mut self.frame),
            None => PopStatus::Contended,
        };
        if status != PopStatus::Contended && self.shared.mode == HandoffMode::Blocking {
            self.shared.space.notify_one();
        }
        self.last_status = status;
        (&self.frame, status)
    }

    /// Frame returned by the last [`FrameReceiver::recv`].
    pub fn current(&self) -> &[f32] {
        &self.frame
    }

    pub fn last_status(&self) -> PopStatus {
        self.last_status
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        // Take the lock so a sender between its check and its wait sees
        // the flag or gets the notification.
        drop(self.shared.ring.lock());
        self.shared.space.notify_all();
    }
}
