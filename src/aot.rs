//! The ahead-of-time translator backend (component G).
//!
//! On ROM load, every even guest offset is resolved once into a closure over its
//! already-decoded [`Instruction`] - the same decode/semantics pair the interpreter
//! uses, not hand-written machine code per opcode (`original_source/pot8o-chip/llvm_aot.hpp`
//! builds its per-offset routines the same way). Dispatch between routines is a `Vec`
//! index by guest PC: the safe-Rust rendering of "computed goto through a jump table"
//! called for in Design Note 9 and SPEC_FULL.md 4.7.
//!
//! Cycle accounting is deferred: straight-line (non-terminator) routines do not touch
//! `Interface::cycle_count` at all; the running count since the last branch is charged
//! in one add when a branch-terminator executes, exactly the "pre-advance by the byte
//! distance since the last branch" trick SPEC_FULL.md 4.7 describes.
//!
//! Self-modifying code is a documented limitation here (Design Note 9): a `LD [I],Vx`
//! or `LD B,Vx` that rewrites bytes the translator has already turned into a routine
//! has no effect on dispatch, unlike the dynarec's cache flush.

use crate::decode::{decode, Instruction};
use crate::error::EngineError;
use crate::interface::Interface;
use crate::machine::MachineState;
use crate::memory::MEMORY_SIZE_BYTES;
use crate::semantics::{execute, is_branch_terminator};

struct AotRoutine {
    instruction: Instruction,
    is_terminator: bool,
}

/// One native routine per even guest offset covered by the ROM, indexed by guest
/// address; `None` everywhere else, including every odd address and anything past the
/// loaded ROM.
struct JumpTable {
    routines: Vec<Option<AotRoutine>>,
}

impl JumpTable {
    /// Looks up the routine for `pc`, wrapping the address modulo the guest address
    /// space first - the same "wrap and warn" contract [`crate::memory::Memory`]
    /// applies to ordinary memory accesses, kept consistent here since `JpV0`'s
    /// `nnn + V0` can overflow past 0xFFF.
    fn get(&self, pc: u16) -> Option<&AotRoutine> {
        let masked = pc as usize % MEMORY_SIZE_BYTES;
        if masked != pc as usize {
            log::warn!(
                "program_counter {:#06X} is out of bounds, wrapped to {:#05X}",
                pc,
                masked
            );
        }
        self.routines.get(masked).and_then(|r| r.as_ref())
    }
}

/// Translates every even offset in `[start, start + rom.len())` into a routine, ahead
/// of any execution. Fails fast if any covered offset does not decode - the whole-ROM
/// translation has no notion of "unreachable code", so a single undefined opcode
/// anywhere in the image is a translation-time failure even if a real run would never
/// step on it (this is the AOT's trade-off against the interpreter's lazy fetch).
fn translate(rom: &[u8], start: u16) -> Result<JumpTable, EngineError> {
    let mut routines: Vec<Option<AotRoutine>> = (0..MEMORY_SIZE_BYTES).map(|_| None).collect();
    let mut offset = 0usize;
    while offset + 1 < rom.len() {
        let pc = start.wrapping_add(offset as u16);
        let opcode = ((rom[offset] as u16) << 8) | rom[offset + 1] as u16;
        let instruction = decode(opcode, pc).map_err(|_| EngineError::AotTranslationFailure {
            offset: pc,
            reason: format!("opcode {opcode:#06X} at offset {pc:#05X} does not decode"),
        })?;
        let is_terminator = is_branch_terminator(&instruction);
        routines[pc as usize] = Some(AotRoutine {
            instruction,
            is_terminator,
        });
        offset += 2;
    }
    Ok(JumpTable { routines })
}

/// Runs `state` to completion on the AOT backend. `rom` and `start` are the bytes and
/// guest base address the engine loaded, used to rebuild the same translation the
/// engine loaded memory with.
pub(crate) fn run(
    state: &mut MachineState,
    interface: &Interface,
    rom: &[u8],
    start: u16,
) -> Result<(), EngineError> {
    let table = translate(rom, start)?;
    let mut straight_line_steps: u64 = 0;
    loop {
        if interface.stop_requested() {
            interface.add_cycles(straight_line_steps);
            return Ok(());
        }
        let pc = state.program_counter;
        let routine = match table.get(pc) {
            Some(routine) => routine,
            None => {
                // Charge whatever straight-line run already executed before
                // surfacing the failure, so a caller that falls back to the
                // interpreter from here picks up the cycle count where this left
                // off instead of losing it.
                interface.add_cycles(straight_line_steps);
                return Err(EngineError::AotTranslationFailure {
                    offset: pc,
                    reason: "no translated routine at this guest address".to_string(),
                });
            }
        };
        let is_terminator = routine.is_terminator;
        let outcome = match execute(routine.instruction, state, interface) {
            Ok(outcome) => outcome,
            Err(err) => {
                interface.add_cycles(straight_line_steps);
                return Err(err);
            }
        };
        if !outcome.retired {
            // `LD Vx,K` aborted on a stop request mid-wait; nothing retired. Checking
            // `outcome.retired` rather than comparing `program_counter` against `pc`
            // is what lets a self-jump terminator (e.g. `1200`) still retire and
            // charge its cycle even though the program counter does not change.
            interface.add_cycles(straight_line_steps);
            straight_line_steps = 0;
            continue;
        }
        straight_line_steps += 1;
        if is_terminator {
            interface.add_cycles(straight_line_steps);
            straight_line_steps = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::memory::PROGRAM_START_ADDRESS;

    fn state(rom: &[u8]) -> MachineState {
        MachineState::new(rom, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn translate_fails_on_undefined_opcode_even_if_dead_code() {
        let rom = [0xFF, 0xFF];
        assert!(matches!(
            translate(&rom, PROGRAM_START_ADDRESS),
            Err(EngineError::AotTranslationFailure { .. })
        ));
    }

    #[test]
    fn matches_interpreter_cycle_count_on_straight_line_program() {
        let rom = [0x60, 0x05, 0x61, 0x08, 0x80, 0x14, 0x12, 0x06];
        let mut aot_state = state(&rom);
        let aot_iface = Interface::new();
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| run(&mut aot_state, &aot_iface, &rom, PROGRAM_START_ADDRESS));
            std::thread::sleep(std::time::Duration::from_millis(20));
            aot_iface.request_stop();
            handle.join().unwrap().unwrap();
        });
        assert_eq!(aot_state.v[0], 13);
        assert_eq!(aot_state.v[1], 8);
        // At least the initial straight-line run (3 ops) plus the first JP land
        // before the tight self-loop is even entered once.
        assert!(aot_iface.cycle_count() >= 4);
    }

    #[test]
    fn reaching_untranslated_address_is_fatal() {
        // JP 0x400 jumps past the end of a 2-byte ROM; nothing was translated there.
        let rom = [0x14, 0x00];
        let mut s = state(&rom);
        let iface = Interface::new();
        assert!(matches!(
            run(&mut s, &iface, &rom, PROGRAM_START_ADDRESS),
            Err(EngineError::AotTranslationFailure { .. })
        ));
    }
}
