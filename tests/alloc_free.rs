//! Allocation-free consumer path tests.
//!
//! The device callback pops frames from the ring buffer through the
//! bridge receiver. Neither may touch the heap once constructed.
//!
//! Just run `cargo test`; no feature flags needed.

use assert_no_alloc::{assert_no_alloc, AllocDisabler};

#[cfg(debug_assertions)]
#[global_allocator]
static A: AllocDisabler = AllocDisabler;

use sw_audio::{AudioRingBuffer, FrameBridge, HandoffMode};

const FRAME: usize = 2 * 512;

/// Fresh, held, repeated and overrun paths.
fn exercise(rb: &mut AudioRingBuffer, block: &[f32], out: &mut [f32]) {
    for _ in 0..3 {
        rb.push(block);
    }
    for _ in 0..6 {
        rb.pop(out);
    }
    for _ in 0..10 {
        rb.push(block);
    }
    rb.pop(out);
}

#[test]
fn ring_pop_is_alloc_free() {
    let mut out = vec![0.0; FRAME];
    let block = vec![0.5; FRAME];
    // First pass registers the log callsites.
    exercise(&mut AudioRingBuffer::new(4, FRAME), &block, &mut out);

    let mut rb = AudioRingBuffer::new(4, FRAME);
    out.fill(0.0);
    assert_no_alloc(|| exercise(&mut rb, &block, &mut out));
    assert_eq!(out[0], 0.5);
}

#[test]
fn bridge_recv_is_alloc_free() {
    AudioRingBuffer::new(1, 1).pop(&mut [0.0]);
    for mode in [HandoffMode::Blocking, HandoffMode::Spin] {
        let (tx, mut rx) = FrameBridge::new(4, FRAME, mode);
        let block = vec![0.25; FRAME];
        tx.send(&block).unwrap();
        tx.send(&block).unwrap();

        let mut sum = 0.0;
        assert_no_alloc(|| {
            for _ in 0..8 {
                let (frame, _) = rx.recv();
                sum += frame[0];
            }
        });
        assert_eq!(sum, 8.0 * 0.25);
    }
}
