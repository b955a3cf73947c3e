//! The shared surface between the engine thread, the timer thread, and the hosting
//! (frontend) thread.
//!
//! Grounded on the reference implementation's `Interface` class: a single-producer,
//! single-consumer frame buffer handshake (the engine publishes only once the frontend has
//! consumed the previous frame) plus a small set of independently-ordered atomics for the
//! keypad, the two 60 Hz timers, and the cycle counter. No lock is taken on the hot path other
//! than the brief mutex around the published frame buffer itself.

use crate::display::{Frame, BLANK_FRAME};
use crate::machine::MachineState;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

const NUM_KEYS: usize = 16;

/// A point-in-time copy of everything the testable properties in the spec (and a
/// hosting debugger, if one existed) would want to inspect: the full register file,
/// stack depth, frame buffer and both timers. Published by the engine thread once a
/// run stops (cleanly or fatally) via [`Interface::publish_snapshot`]; read by the
/// frontend/tests via [`Interface::snapshot`]. Grounded on the teacher's
/// `StateSnapshot::ExtendedSnapshot` variant, minus the raw memory dump the teacher
/// includes (no test here needs the whole 4 KiB, only the architectural registers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MachineSnapshot {
    pub v: [u8; 16],
    pub i: u16,
    pub program_counter: u16,
    pub stack_depth: usize,
    pub frame_buffer: Frame,
    pub delay_timer: u8,
    pub sound_timer: u8,
    pub cycles: u64,
}

impl MachineSnapshot {
    pub(crate) fn capture(state: &MachineState, interface: &Interface) -> Self {
        MachineSnapshot {
            v: state.v,
            i: state.i,
            program_counter: state.program_counter,
            stack_depth: state.stack.depth(),
            frame_buffer: state.frame_buffer,
            delay_timer: interface.delay_timer(),
            sound_timer: interface.sound_timer(),
            cycles: interface.cycle_count(),
        }
    }
}

/// Shared state between the engine, timer and frontend threads.
pub struct Interface {
    frame_buffer: Mutex<Frame>,
    /// `true` once the frontend has consumed the current frame and the engine may publish a
    /// new one; starts `true` so the very first publish always succeeds.
    send_frame: AtomicBool,
    keypad: [AtomicBool; NUM_KEYS],
    delay_timer: AtomicU8,
    sound_timer: AtomicU8,
    cycle_count: AtomicU64,
    stop_flag: AtomicBool,
    snapshot: Mutex<MachineSnapshot>,
}

impl Interface {
    pub(crate) fn new() -> Self {
        Interface {
            frame_buffer: Mutex::new(BLANK_FRAME),
            send_frame: AtomicBool::new(true),
            keypad: std::array::from_fn(|_| AtomicBool::new(false)),
            delay_timer: AtomicU8::new(0),
            sound_timer: AtomicU8::new(0),
            cycle_count: AtomicU64::new(0),
            stop_flag: AtomicBool::new(false),
            snapshot: Mutex::new(MachineSnapshot::default()),
        }
    }

    /// Publishes a diagnostic snapshot of the machine state. Called by
    /// [`crate::engine::Engine`] once a run stops, clean or fatal.
    pub(crate) fn publish_snapshot(&self, snapshot: MachineSnapshot) {
        *self.snapshot.lock().expect("snapshot mutex poisoned") = snapshot;
    }

    /// Returns the most recently published diagnostic snapshot, or the all-zero
    /// default if no run has stopped yet.
    pub fn snapshot(&self) -> MachineSnapshot {
        *self.snapshot.lock().expect("snapshot mutex poisoned")
    }

    /// Called by the engine thread after any cycle that may have touched the frame buffer.
    /// Publishes `frame` only if the previously published frame has been consumed; otherwise
    /// the new frame is silently dropped (the frontend will catch up on its next poll).
    pub(crate) fn push_frame_buffer(&self, frame: &Frame) {
        if self.send_frame.load(Ordering::Acquire) {
            *self.frame_buffer.lock().expect("frame buffer mutex poisoned") = *frame;
            self.send_frame.store(false, Ordering::Release);
        }
    }

    /// Called by the frontend thread. Invokes `callback` with the most recently published
    /// frame, then marks it consumed so the engine may publish the next one. Does nothing
    /// (and does not invoke `callback`) if no new frame has been published since the last call.
    pub fn consume_frame_buffer(&self, callback: impl FnOnce(&Frame)) {
        if self.send_frame.load(Ordering::Acquire) {
            return;
        }
        let frame = self.frame_buffer.lock().expect("frame buffer mutex poisoned");
        callback(&frame);
        drop(frame);
        self.send_frame.store(true, Ordering::Release);
    }

    /// Sets the pressed/released state of `key` (valid range 0x0..=0xF). Called by the
    /// frontend thread.
    pub fn set_key(&self, key: u8, pressed: bool) -> Result<(), crate::error::EngineError> {
        let key_index = key as usize;
        if key_index >= NUM_KEYS {
            return Err(crate::error::EngineError::InvalidKey { key });
        }
        self.keypad[key_index].store(pressed, Ordering::Relaxed);
        Ok(())
    }

    /// Reads whether `key` is currently pressed. Called by the engine thread from `SKP`/`SKNP`.
    pub(crate) fn is_key_pressed(&self, key: u8) -> bool {
        self.keypad
            .get(key as usize)
            .map(|k| k.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Returns the hex ordinal of the first currently-pressed key, if any. Used by `LD Vx, K`.
    pub(crate) fn first_key_pressed(&self) -> Option<u8> {
        (0..NUM_KEYS as u8).find(|&k| self.is_key_pressed(k))
    }

    pub(crate) fn delay_timer(&self) -> u8 {
        self.delay_timer.load(Ordering::Relaxed)
    }

    pub(crate) fn set_delay_timer(&self, value: u8) {
        self.delay_timer.store(value, Ordering::Relaxed);
    }

    pub(crate) fn sound_timer(&self) -> u8 {
        self.sound_timer.load(Ordering::Relaxed)
    }

    pub(crate) fn set_sound_timer(&self, value: u8) {
        self.sound_timer.store(value, Ordering::Relaxed);
    }

    /// Decrements both timers by one if non-zero. Returns `true` if the sound timer just
    /// transitioned from 1 to 0 (the "beep edge"). Called once per tick by the timer thread.
    pub(crate) fn decrement_timers(&self) -> bool {
        let _ = self
            .delay_timer
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
                if t > 0 {
                    Some(t - 1)
                } else {
                    None
                }
            });
        let previous = self
            .sound_timer
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |t| {
                if t > 0 {
                    Some(t - 1)
                } else {
                    None
                }
            });
        matches!(previous, Ok(1))
    }

    /// Returns the number of cycles executed since the engine started.
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count.load(Ordering::Relaxed)
    }

    /// Reads and zeroes the cycle counter in one atomic swap, backing
    /// [`crate::engine::Engine::get_cycles`]'s "returns cycles since last call,
    /// zeroing the counter" contract (§6).
    pub(crate) fn take_cycles(&self) -> u64 {
        self.cycle_count.swap(0, Ordering::Relaxed)
    }

    pub(crate) fn increment_cycle_count(&self) {
        self.add_cycles(1);
    }

    /// Adds `n` to the cycle counter in one update. Used by the AOT backend's
    /// deferred accounting, which charges a whole straight-line run at once instead
    /// of touching the counter every instruction.
    pub(crate) fn add_cycles(&self, n: u64) {
        self.cycle_count.fetch_add(n, Ordering::Relaxed);
    }

    /// Signals the engine and timer threads to stop at their next opportunity.
    pub(crate) fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_publish_always_succeeds() {
        let interface = Interface::new();
        let mut frame = BLANK_FRAME;
        frame[0] = 0xFF;
        interface.push_frame_buffer(&frame);
        let mut observed = None;
        interface.consume_frame_buffer(|f| observed = Some(*f));
        assert_eq!(observed, Some(frame));
    }

    #[test]
    fn publish_is_dropped_if_previous_frame_unconsumed() {
        let interface = Interface::new();
        let mut first = BLANK_FRAME;
        first[0] = 1;
        let mut second = BLANK_FRAME;
        second[0] = 2;
        interface.push_frame_buffer(&first);
        interface.push_frame_buffer(&second); // dropped, first not yet consumed
        let mut observed = None;
        interface.consume_frame_buffer(|f| observed = Some(*f));
        assert_eq!(observed, Some(first));
    }

    #[test]
    fn consume_without_publish_does_not_invoke_callback() {
        let interface = Interface::new();
        interface.consume_frame_buffer(|_| panic!("should not be called"));
        interface.push_frame_buffer(&BLANK_FRAME);
        interface.consume_frame_buffer(|_| {});
        let mut called = false;
        interface.consume_frame_buffer(|_| called = true);
        assert!(!called);
    }

    #[test]
    fn set_and_read_key() {
        let interface = Interface::new();
        interface.set_key(0xA, true).unwrap();
        assert!(interface.is_key_pressed(0xA));
        assert_eq!(interface.first_key_pressed(), Some(0xA));
    }

    #[test]
    fn set_key_out_of_range_errors() {
        let interface = Interface::new();
        assert!(interface.set_key(0x10, true).is_err());
    }

    #[test]
    fn decrement_timers_reports_beep_edge() {
        let interface = Interface::new();
        interface.set_sound_timer(1);
        assert!(interface.decrement_timers());
        assert_eq!(interface.sound_timer(), 0);
        assert!(!interface.decrement_timers());
    }

    #[test]
    fn decrement_timers_does_not_underflow() {
        let interface = Interface::new();
        assert_eq!(interface.delay_timer(), 0);
        interface.decrement_timers();
        assert_eq!(interface.delay_timer(), 0);
    }
}
