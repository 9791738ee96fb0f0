//! Fixed-capacity queue of whole audio frames.
//!
//! All slots are allocated up front; `push` and `pop` only copy. The queue
//! favors recency: a push into a full queue overwrites the oldest unread
//! frame, and a pop from a (nearly) empty queue repeats the last frame
//! instead of failing.

/// What a [`AudioRingBuffer::pop`] returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopStatus {
    /// An unread frame; the read position advanced.
    Fresh,
    /// The last unread frame. It is held and repeated until the next push.
    Held,
    /// The held frame again.
    Repeated,
    /// Nothing was ever pushed.
    Silence,
    /// The queue was busy; the caller's previous frame stands.
    Contended,
}

impl PopStatus {
    /// True for pops that did not deliver new audio.
    pub fn is_underrun(self) -> bool {
        !matches!(self, PopStatus::Fresh)
    }
}

/// Circular array of frames with read/write indices and an unread count.
#[derive(Debug)]
pub struct AudioRingBuffer {
    data: Vec<f32>,
    frame_len: usize,
    capacity: usize,
    read_index: usize,
    write_index: usize,
    count: usize,
    held: bool,
    in_underrun: bool,
    in_overrun: bool,
    underruns: u64,
    overruns: u64,
}

impl AudioRingBuffer {
    /// `capacity` frames of `frame_len` samples each. Capacity is at least 1.
    pub fn new(capacity: usize, frame_len: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: vec![0.0; capacity * frame_len],
            frame_len,
            capacity,
            read_index: 0,
            write_index: 0,
            count: 0,
            held: false,
            in_underrun: false,
            in_overrun: false,
            underruns: 0,
            overruns: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Samples per frame.
    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    /// Unread frames.
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    pub fn read_index(&self) -> usize {
        self.read_index
    }

    pub fn write_index(&self) -> usize {
        self.write_index
    }

    /// Pops that found fewer than two unread frames.
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    /// Pushes that overwrote an unread frame.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    fn slot(&self, index: usize) -> &[f32] {
        let start = index * self.frame_len;
        &self.data[start..start + self.frame_len]
    }

    fn slot_mut(&mut self, index: usize) -> &mut [f32] {
        let start = index * self.frame_len;
        &mut self.data[start..start + self.frame_len]
    }

    /// Copy `frame` in as the newest unread frame.
    ///
    /// A shorter frame is zero-padded, a longer one truncated.
    pub fn push(&mut self, frame: &[f32]) {
        if self.held {
            self.read_index = (self.read_index + 1) % self.capacity;
            self.held = false;
        }
        if self.count == self.capacity {
            self.overruns += 1;
            if !self.in_overrun {
                tracing::warn!(capacity = self.capacity, "audio buffer overrun, dropping oldest frame");
                self.in_overrun = true;
            }
            self.read_index = (self.read_index + 1) % self.capacity;
            self.count -= 1;
        }

        let n = frame.len().min(self.frame_len);
        let write = self.write_index;
        let slot = self.slot_mut(write);
        slot[..n].copy_from_slice(&frame[..n]);
        slot[n..].fill(0.0);

        self.write_index = (self.write_index + 1) % self.capacity;
        self.count += 1;
        self.in_underrun = false;
    }

    /// Copy the next frame into `out`. Never blocks and never allocates.
    ///
    /// With two or more unread frames the oldest is returned and the read
    /// position advances. With one, it is returned but kept as the held
    /// frame and the count drops to zero. With none, the held frame (or
    /// silence before the first push) is returned again.
    pub fn pop(&mut self, out: &mut [f32]) -> PopStatus {
        self.in_overrun = false;
        let status = match self.count {
            0 if self.held => PopStatus::Repeated,
            0 => PopStatus::Silence,
            1 => PopStatus::Held,
            _ => PopStatus::Fresh,
        };

        let n = out.len().min(self.frame_len);
        match status {
            PopStatus::Silence => out[..n].fill(0.0),
            _ => out[..n].copy_from_slice(&self.slot(self.read_index)[..n]),
        }
        out[n..].fill(0.0);

        match status {
            PopStatus::Fresh => {
                self.read_index = (self.read_index + 1) % self.capacity;
                self.count -= 1;
            }
            PopStatus::Held => {
                self.count = 0;
                self.held = true;
                self.note_underrun();
            }
            _ => self.note_underrun(),
        }
        status
    }

    fn note_underrun(&mut self) {
        self.underruns += 1;
        if !self.in_underrun {
            tracing::warn!("audio buffer underrun, repeating last frame");
            self.in_underrun = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(v: f32) -> [f32; 2] {
        [v, -v]
    }

    #[test]
    fn fifo_order() {
        let mut rb = AudioRingBuffer::new(8, 2);
        for i in 0..5 {
            rb.push(&frame(i as f32));
        }
        let mut out = [0.0; 2];
        // The last frame comes out held, the rest fresh.
        for i in 0..5 {
            let status = rb.pop(&mut out);
            assert_eq!(out, frame(i as f32));
            assert_eq!(status == PopStatus::Fresh, i < 4);
        }
    }

    #[test]
    fn underrun_repeats_without_advancing() {
        let mut rb = AudioRingBuffer::new(4, 2);
        rb.push(&frame(1.0));
        rb.push(&frame(2.0));
        let mut out = [0.0; 2];
        assert_eq!(rb.pop(&mut out), PopStatus::Fresh);
        assert_eq!(rb.pop(&mut out), PopStatus::Held);
        assert_eq!(out, frame(2.0));
        let read = rb.read_index();
        assert_eq!(rb.len(), 0);

        for _ in 0..3 {
            assert_eq!(rb.pop(&mut out), PopStatus::Repeated);
            assert_eq!(out, frame(2.0));
            assert_eq!(rb.read_index(), read);
        }
        assert_eq!(rb.underruns(), 4);
    }

    #[test]
    fn push_after_hold_steps_past_held_frame() {
        let mut rb = AudioRingBuffer::new(4, 2);
        rb.push(&frame(1.0));
        let mut out = [0.0; 2];
        assert_eq!(rb.pop(&mut out), PopStatus::Held);
        rb.push(&frame(2.0));
        rb.push(&frame(3.0));
        assert_eq!(rb.len(), 2);
        assert_eq!(rb.pop(&mut out), PopStatus::Fresh);
        assert_eq!(out, frame(2.0));
        assert_eq!(rb.pop(&mut out), PopStatus::Held);
        assert_eq!(out, frame(3.0));
    }

    #[test]
    fn empty_pop_is_silence() {
        let mut rb = AudioRingBuffer::new(2, 2);
        let mut out = [9.0; 2];
        assert_eq!(rb.pop(&mut out), PopStatus::Silence);
        assert_eq!(out, [0.0, 0.0]);
        assert!(rb.pop(&mut out).is_underrun());
    }

    #[test]
    fn overrun_drops_oldest() {
        let mut rb = AudioRingBuffer::new(3, 2);
        for i in 0..5 {
            rb.push(&frame(i as f32));
            assert!(rb.len() <= rb.capacity());
        }
        assert!(rb.is_full());
        assert_eq!(rb.overruns(), 2);
        let mut out = [0.0; 2];
        rb.pop(&mut out);
        assert_eq!(out, frame(2.0));
        rb.pop(&mut out);
        assert_eq!(out, frame(3.0));
        rb.pop(&mut out);
        assert_eq!(out, frame(4.0));
    }

    #[test]
    fn indices_stay_in_range() {
        let mut rb = AudioRingBuffer::new(3, 1);
        let mut out = [0.0];
        for i in 0..50 {
            if i % 3 == 0 {
                rb.pop(&mut out);
            } else {
                rb.push(&[i as f32]);
            }
            assert!(rb.read_index() < rb.capacity());
            assert!(rb.write_index() < rb.capacity());
            assert!(rb.len() <= rb.capacity());
        }
    }

    #[test]
    fn short_frames_are_padded() {
        let mut rb = AudioRingBuffer::new(2, 4);
        rb.push(&[1.0, 2.0]);
        let mut out = [7.0; 4];
        rb.pop(&mut out);
        assert_eq!(out, [1.0, 2.0, 0.0, 0.0]);
    }
}
