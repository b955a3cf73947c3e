//! The error taxonomy surfaced by the engine to a hosting application.
//!
//! Most runtime faults are fatal and stop the engine thread; the one exception is an
//! out-of-bounds memory access, which is masked modulo the address space and merely logged
//! (see [`crate::memory::Memory`]).

use thiserror::Error;

/// Errors that can arise while loading a ROM or running the engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The ROM supplied to [`crate::engine::Engine::run`] is larger than the addressable
    /// program space (4096 - 0x200 bytes).
    #[error("ROM is {size} bytes, which exceeds the {limit} byte program space")]
    MalformedRom { size: usize, limit: usize },

    /// A 16-bit word was fetched that does not decode to any of the 34 defined operations.
    #[error("invalid opcode {opcode:#06X} at program_counter {program_counter:#05X}")]
    InvalidOpcode { opcode: u16, program_counter: u16 },

    /// `CALL` was executed with the call stack already at its 16-entry depth limit.
    #[error("stack overflow: CALL at program_counter {program_counter:#05X} with stack already full")]
    StackOverflow { program_counter: u16 },

    /// `RET` was executed with an empty call stack.
    #[error("stack underflow: RET at program_counter {program_counter:#05X} with an empty stack")]
    StackUnderflow { program_counter: u16 },

    /// The ahead-of-time translator could not build a routine for some reachable offset.
    #[error("AOT translation failed at offset {offset:#05X}: {reason}")]
    AotTranslationFailure { offset: u16, reason: String },

    /// A key ordinal outside 0x0..=0xF was passed to [`crate::engine::Engine::set_key`].
    #[error("invalid key ordinal {key:#X}, valid range is 0x0..=0xF")]
    InvalidKey { key: u8 },

    /// The engine was asked to perform an operation while not running (or vice versa).
    #[error("engine is not currently running")]
    NotRunning,
}
