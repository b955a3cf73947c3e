//! The engine/lifecycle component (H): ties machine state, the three execution
//! backends, and the timer thread together behind the public `Run`/`Stop`/`GetCycles`/
//! `SetKey`/`ConsumeFrameBuffer` surface §6 and SPEC_FULL.md 4.8 describe.
//!
//! Grounded on the teacher's `main.rs` worker-thread pattern (spawn a thread to host
//! the processor, drive it with an `mpsc` channel) and on
//! `original_source/pot8o-chip/chip8.hpp`'s `Chip8` class, which owns the `Interface`
//! and forwards `Run`/`Stop` to an owned CPU. This crate has no UI to drive the channel
//! from, so the cross-thread surface collapses to `Interface`'s atomics/mutex directly
//! rather than an explicit command channel.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::EngineConfig;
use crate::display::Frame;
use crate::error::EngineError;
use crate::interface::{Interface, MachineSnapshot};
use crate::machine::MachineState;
use crate::memory::PROGRAM_START_ADDRESS;
use crate::{aot, dynarec, interpreter};

/// The conventional timer tick rate both CHIP-8 hardware timers run at.
const TIMER_HZ: f64 = 60.0;

/// Which of the three execution strategies (components E/F/G) drives the engine
/// thread for a run. All three are guest-visible-identical per the spec's contract;
/// this is purely a performance/implementation choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Fetch-decode-execute loop, re-decoding every instruction every time it runs.
    Interpreter,
    /// Basic-block cache keyed by guest PC (component F).
    Dynarec,
    /// Whole-ROM ahead-of-time translation with PC-indexed dispatch (component G).
    /// Falls back to the interpreter, logging a warning, if translation fails.
    Aot,
}

/// Owns the shared [`Interface`] and the two background threads (engine, timer) for
/// one ROM run. A fresh `Engine` is idle until [`Engine::run`] is called; calling it
/// again while already running stops the previous run first, matching the teacher's
/// `instantiate_chipolata` precedent.
pub struct Engine {
    interface: Arc<Interface>,
    engine_thread: Option<JoinHandle<Result<(), EngineError>>>,
    timer_thread: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new() -> Self {
        Engine {
            interface: Arc::new(Interface::new()),
            engine_thread: None,
            timer_thread: None,
        }
    }

    /// Validates `rom`, initialises machine state, and spawns the engine and timer
    /// threads. Returns [`EngineError::MalformedRom`] without starting anything if
    /// `rom` is too large for the program space.
    pub fn run(&mut self, rom: &[u8], backend: Backend, config: EngineConfig) -> Result<(), EngineError> {
        if self.engine_thread.is_some() {
            log::debug!("engine already running a ROM, stopping it before the new run");
            let _ = self.stop();
        }
        log::debug!("loading {} byte ROM on {:?} backend", rom.len(), backend);
        let mut state = MachineState::new(rom, &config)?;
        self.interface = Arc::new(Interface::new());

        let rom_owned = rom.to_vec();
        let engine_interface = Arc::clone(&self.interface);
        self.engine_thread = Some(thread::spawn(move || {
            let result = drive(backend, &mut state, &engine_interface, &rom_owned);
            engine_interface.publish_snapshot(MachineSnapshot::capture(&state, &engine_interface));
            result
        }));

        let timer_interface = Arc::clone(&self.interface);
        self.timer_thread = Some(thread::spawn(move || timer_loop(&timer_interface)));

        Ok(())
    }

    /// Sets the stop flag and joins both threads, returning whatever result the
    /// engine thread produced (`Ok(())` on a clean stop, the fatal [`EngineError`]
    /// otherwise). Calling this with no run in progress returns
    /// [`EngineError::NotRunning`].
    pub fn stop(&mut self) -> Result<(), EngineError> {
        self.interface.request_stop();
        let engine_result = self
            .engine_thread
            .take()
            .map(|h| h.join().expect("engine thread panicked"));
        if let Some(timer_thread) = self.timer_thread.take() {
            let _ = timer_thread.join();
        }
        engine_result.unwrap_or(Err(EngineError::NotRunning))
    }

    /// Returns the number of cycles executed since the last call to this method,
    /// resetting the counter - the "read and zero" contract §6 specifies.
    pub fn get_cycles(&self) -> u64 {
        self.interface.take_cycles()
    }

    /// Writes one keypad bit; `key` must be in `0x0..=0xF`.
    pub fn set_key(&self, key: u8, pressed: bool) -> Result<(), EngineError> {
        self.interface.set_key(key, pressed)
    }

    /// Invokes `callback` with the most recently published frame if one is pending,
    /// consuming it so the engine may publish the next. Does nothing otherwise.
    pub fn consume_frame_buffer(&self, callback: impl FnOnce(&Frame)) {
        self.interface.consume_frame_buffer(callback)
    }

    /// Returns the most recently published diagnostic snapshot - all-zero until the
    /// first run has stopped. Primarily for tests verifying the testable properties
    /// in the spec; a production frontend only needs the other four accessors.
    pub fn snapshot(&self) -> MachineSnapshot {
        self.interface.snapshot()
    }

    /// A reference to the underlying shared surface, for callers that want direct
    /// access to e.g. `is_key_pressed` polling outside the accessor methods above.
    pub fn interface(&self) -> &Interface {
        &self.interface
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.engine_thread.is_some() || self.timer_thread.is_some() {
            let _ = self.stop();
        }
    }
}

/// Runs `state` to completion on `backend`, falling back from AOT to the interpreter
/// on a translation failure (§7: "falls back to interpreter if present, else fatal").
fn drive(
    backend: Backend,
    state: &mut MachineState,
    interface: &Interface,
    rom: &[u8],
) -> Result<(), EngineError> {
    match backend {
        Backend::Interpreter => interpreter::run(state, interface),
        Backend::Dynarec => dynarec::run(state, interface),
        Backend::Aot => match aot::run(state, interface, rom, PROGRAM_START_ADDRESS) {
            Err(EngineError::AotTranslationFailure { offset, reason }) => {
                log::warn!(
                    "AOT translation failed at {offset:#05X} ({reason}); falling back to the interpreter"
                );
                interpreter::run(state, interface)
            }
            other => other,
        },
    }
}

fn timer_loop(interface: &Interface) {
    let period = Duration::from_secs_f64(1.0 / TIMER_HZ);
    while !interface.stop_requested() {
        thread::sleep(period);
        if interface.stop_requested() {
            return;
        }
        if interface.decrement_timers() {
            log::debug!("sound timer reached zero: beep");
        }
    }
}
