//! The engine-thread-private machine state: registers, memory, call stack, the working frame
//! buffer, and the deterministic PRNG. Only the engine thread ever touches this; everything
//! shared with the timer/frontend threads lives in [`crate::interface::Interface`] instead.

use crate::config::EngineConfig;
use crate::display::{Frame, BLANK_FRAME};
use crate::error::EngineError;
use crate::memory::{Memory, MAX_PROGRAM_SIZE_BYTES, PROGRAM_START_ADDRESS};
use crate::stack::Stack;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// The number of general-purpose variable registers, V0-VF.
pub(crate) const NUM_REGISTERS: usize = 16;
/// `VF` doubles as the flag register written by several arithmetic/draw operations.
pub(crate) const FLAG_REGISTER: usize = 0xF;

pub(crate) struct MachineState {
    pub(crate) memory: Memory,
    pub(crate) v: [u8; NUM_REGISTERS],
    pub(crate) i: u16,
    pub(crate) program_counter: u16,
    pub(crate) stack: Stack,
    pub(crate) frame_buffer: Frame,
    rng: StdRng,
}

impl MachineState {
    pub(crate) fn new(rom: &[u8], config: &EngineConfig) -> Result<Self, EngineError> {
        if rom.len() > MAX_PROGRAM_SIZE_BYTES {
            return Err(EngineError::MalformedRom {
                size: rom.len(),
                limit: MAX_PROGRAM_SIZE_BYTES,
            });
        }
        let mut memory = Memory::new();
        memory.write_bytes(PROGRAM_START_ADDRESS as usize, rom);
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(MachineState {
            memory,
            v: [0; NUM_REGISTERS],
            i: 0,
            program_counter: PROGRAM_START_ADDRESS,
            stack: Stack::new(),
            frame_buffer: BLANK_FRAME,
            rng,
        })
    }

    /// Fetches the big-endian 16-bit opcode at the current program counter.
    pub(crate) fn fetch(&self) -> u16 {
        self.memory.read_two_bytes(self.program_counter as usize)
    }

    /// Draws `rand::random::<u8>()` from the deterministic PRNG; the sole source of randomness
    /// reachable from guest code (`RND Vx,kk`).
    pub(crate) fn random_byte(&mut self) -> u8 {
        self.rng.gen()
    }
}
