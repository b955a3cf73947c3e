//! The interpreter backend (component E): a plain fetch-decode-execute loop.
//!
//! Dispatch is the flat `(op, x, y, n)` match inside [`crate::decode::decode`] followed
//! by the per-instruction functions in [`crate::semantics`] - the "fixed handler table"
//! Design Note 9 calls for, expressed as a single match rather than an array of function
//! pointers, since LLVM lowers an exhaustive match over a dense discriminant to the same
//! jump table without the `unsafe`/`Box<dyn Fn>` overhead an explicit array would need.

use crate::error::EngineError;
use crate::interface::Interface;
use crate::machine::MachineState;
use crate::{decode::decode, semantics::execute};

/// Runs `state` to completion on the interpreter backend, polling `interface`'s stop
/// flag once per retired instruction. Returns `Ok(())` on a clean stop request, or the
/// fatal [`EngineError`] that ended the run otherwise.
pub(crate) fn run(state: &mut MachineState, interface: &Interface) -> Result<(), EngineError> {
    loop {
        if interface.stop_requested() {
            return Ok(());
        }
        let pc = state.program_counter;
        let opcode = state.fetch();
        let instruction = decode(opcode, pc)?;
        let outcome = execute(instruction, state, interface)?;
        // `LD Vx,K` can abort mid-wait on a stop request without retiring; such a
        // non-retirement must not inflate the cycle count. Checking `outcome.retired`
        // rather than comparing `program_counter` before and after is what keeps a
        // self-jump (e.g. the canonical `1200` halt idiom) retiring every pass even
        // though the program counter does not change value.
        if outcome.retired {
            interface.increment_cycle_count();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn state(rom: &[u8]) -> MachineState {
        MachineState::new(rom, &EngineConfig::default()).unwrap()
    }

    #[test]
    fn stops_immediately_when_stop_already_requested() {
        let mut s = state(&[0x00, 0xE0]);
        let iface = Interface::new();
        iface.request_stop();
        assert!(run(&mut s, &iface).is_ok());
        assert_eq!(iface.cycle_count(), 0);
    }

    #[test]
    fn runs_straight_line_program_until_fatal_opcode() {
        // LD V0,5 / LD V1,8 / ADD V0,V1 / then a word that decodes to nothing (fatal).
        let rom = [0x60, 0x05, 0x61, 0x08, 0x80, 0x14, 0xFF, 0xFF];
        let mut s = state(&rom);
        let iface = Interface::new();
        let result = run(&mut s, &iface);
        assert!(matches!(result, Err(EngineError::InvalidOpcode { .. })));
        assert_eq!(s.v[0], 13);
        assert_eq!(s.v[1], 8);
        assert_eq!(iface.cycle_count(), 3);
    }

    #[test]
    fn invalid_opcode_is_fatal() {
        let mut s = state(&[0xFF, 0xFF]);
        let iface = Interface::new();
        assert!(matches!(
            run(&mut s, &iface),
            Err(EngineError::InvalidOpcode { .. })
        ));
    }

    #[test]
    fn stack_underflow_from_bare_ret_is_fatal() {
        let mut s = state(&[0x00, 0xEE]);
        let iface = Interface::new();
        assert!(matches!(
            run(&mut s, &iface),
            Err(EngineError::StackUnderflow { .. })
        ));
    }

    #[test]
    fn self_jump_keeps_retiring_cycles_even_though_pc_never_changes() {
        // JP 0x200: the canonical CHIP-8 halt idiom, a tight loop to its own address.
        let mut s = state(&[0x12, 0x00]);
        let iface = Interface::new();
        std::thread::scope(|scope| {
            let handle = scope.spawn(|| run(&mut s, &iface));
            std::thread::sleep(std::time::Duration::from_millis(20));
            iface.request_stop();
            handle.join().unwrap().unwrap();
        });
        assert!(
            iface.cycle_count() > 0,
            "a self-jump must still retire and count cycles, not stall the counter forever"
        );
    }
}
