//! The 34 CHIP-8 operations, each implemented as a pure state transition over
//! [`MachineState`] and [`Interface`].
//!
//! Every function here advances `program_counter` itself - to exactly the target
//! address for a jump/call/return, or by 2 or 4 for a fall-through/skip - so that the
//! interpreter, dynarec and AOT backends can all drive the same `execute` entry point
//! without needing their own PC bookkeeping. This is also what keeps the three
//! backends trace-identical: there is exactly one place PC arithmetic happens.

use crate::decode::Instruction;
use crate::display::draw_sprite;
use crate::error::EngineError;
use crate::font::{CHAR_SIZE, FONT_START_ADDRESS};
use crate::interface::Interface;
use crate::machine::{MachineState, FLAG_REGISTER};
use crate::memory::PROGRAM_START_ADDRESS;
use crate::stack::STACK_DEPTH;

/// A byte range `[start, end)` written into guest memory by the instruction just
/// executed, or `None` if it touched no memory. The dynarec uses this to decide
/// whether a cached block needs invalidating; the interpreter and AOT ignore it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemoryWrite {
    None,
    Range(u16, u16),
}

/// The result of [`execute`]: whether the instruction actually retired (and so should
/// count toward `cycle_count`), plus any memory it wrote. `retired` must be read
/// instead of comparing `program_counter` before and after - a self-jump such as the
/// canonical `1200` (`JP` to its own address) retires every time it runs even though
/// `program_counter` does not change value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StepOutcome {
    pub(crate) retired: bool,
    pub(crate) write: MemoryWrite,
}

/// True for every instruction whose execution may advance `program_counter` by
/// something other than a plain `+2` fall-through - the set the dynarec must stop a
/// basic block at and the AOT must charge accumulated straight-line cycles against.
pub(crate) fn is_branch_terminator(instruction: &Instruction) -> bool {
    use Instruction::*;
    matches!(
        instruction,
        Jp { .. }
            | Call { .. }
            | Ret
            | JpV0 { .. }
            | SeVxByte { .. }
            | SneVxByte { .. }
            | SeVxVy { .. }
            | SneVxVy { .. }
            | SkpVx { .. }
            | SknpVx { .. }
            | LdVxK { .. }
    )
}

/// Executes one decoded instruction against `state`, publishing frame/timer/key
/// effects through `interface` as needed. Always leaves `state.program_counter`
/// pointing at the next instruction to fetch (absolute targets for jumps/calls/
/// returns, `+4`/`+2` for taken/untaken skips, `+2` otherwise).
pub(crate) fn execute(
    instruction: Instruction,
    state: &mut MachineState,
    interface: &Interface,
) -> Result<StepOutcome, EngineError> {
    use Instruction::*;
    let pc = state.program_counter;

    let write = match instruction {
        Cls => {
            state.frame_buffer = crate::display::BLANK_FRAME;
            interface.push_frame_buffer(&state.frame_buffer);
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        Ret => {
            let target = state
                .stack
                .pop()
                .ok_or(EngineError::StackUnderflow { program_counter: pc })?;
            state.program_counter = target.wrapping_add(2);
            MemoryWrite::None
        }
        Jp { nnn } => {
            state.program_counter = nnn;
            MemoryWrite::None
        }
        Call { nnn } => {
            if state.stack.depth() >= STACK_DEPTH {
                return Err(EngineError::StackOverflow { program_counter: pc });
            }
            state.stack.push(pc);
            state.program_counter = nnn;
            MemoryWrite::None
        }
        JpV0 { nnn } => {
            state.program_counter = nnn.wrapping_add(state.v[0] as u16);
            MemoryWrite::None
        }
        SeVxByte { x, kk } => {
            skip(state, pc, state.v[x] == kk);
            MemoryWrite::None
        }
        SneVxByte { x, kk } => {
            skip(state, pc, state.v[x] != kk);
            MemoryWrite::None
        }
        SeVxVy { x, y } => {
            skip(state, pc, state.v[x] == state.v[y]);
            MemoryWrite::None
        }
        SneVxVy { x, y } => {
            skip(state, pc, state.v[x] != state.v[y]);
            MemoryWrite::None
        }
        SkpVx { x } => {
            skip(state, pc, interface.is_key_pressed(state.v[x]));
            MemoryWrite::None
        }
        SknpVx { x } => {
            skip(state, pc, !interface.is_key_pressed(state.v[x]));
            MemoryWrite::None
        }
        LdVxByte { x, kk } => {
            state.v[x] = kk;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        AddVxByte { x, kk } => {
            state.v[x] = state.v[x].wrapping_add(kk);
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        LdVxVy { x, y } => {
            state.v[x] = state.v[y];
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        OrVxVy { x, y } => {
            state.v[x] |= state.v[y];
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        AndVxVy { x, y } => {
            state.v[x] &= state.v[y];
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        XorVxVy { x, y } => {
            state.v[x] ^= state.v[y];
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        AddVxVy { x, y } => {
            let (sum, carry) = state.v[x].overflowing_add(state.v[y]);
            state.v[x] = sum;
            state.v[FLAG_REGISTER] = carry as u8;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        SubVxVy { x, y } => {
            let flag = (state.v[x] > state.v[y]) as u8;
            state.v[x] = state.v[x].wrapping_sub(state.v[y]);
            state.v[FLAG_REGISTER] = flag;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        ShrVx { x } => {
            let flag = state.v[x] & 0x1;
            state.v[x] >>= 1;
            state.v[FLAG_REGISTER] = flag;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        SubnVxVy { x, y } => {
            let flag = (state.v[y] > state.v[x]) as u8;
            state.v[x] = state.v[y].wrapping_sub(state.v[x]);
            state.v[FLAG_REGISTER] = flag;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        ShlVx { x } => {
            let flag = (state.v[x] >> 7) & 0x1;
            state.v[x] = state.v[x].wrapping_shl(1);
            state.v[FLAG_REGISTER] = flag;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        LdIAddr { nnn } => {
            state.i = nnn;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        RndVxByte { x, kk } => {
            state.v[x] = state.random_byte() & kk;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        DrwVxVyN { x, y, n } => {
            let sprite = state.memory.read_bytes(state.i as usize, n as usize);
            let collision = draw_sprite(&mut state.frame_buffer, state.v[x], state.v[y], &sprite);
            state.v[FLAG_REGISTER] = collision as u8;
            interface.push_frame_buffer(&state.frame_buffer);
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        LdVxDt { x } => {
            state.v[x] = interface.delay_timer();
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        LdVxK { x } => {
            let key = loop {
                if interface.stop_requested() {
                    // Leave PC unmoved: a stop during the block should not lose
                    // this instruction, matching every other mid-instruction abort.
                    // It did not retire, so the caller must not count a cycle for it.
                    return Ok(StepOutcome {
                        retired: false,
                        write: MemoryWrite::None,
                    });
                }
                if let Some(key) = interface.first_key_pressed() {
                    break key;
                }
            };
            state.v[x] = key;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        LdDtVx { x } => {
            interface.set_delay_timer(state.v[x]);
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        LdStVx { x } => {
            interface.set_sound_timer(state.v[x]);
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        AddIVx { x } => {
            state.i = state.i.wrapping_add(state.v[x] as u16);
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        LdFVx { x } => {
            state.i = FONT_START_ADDRESS + (state.v[x] as u16) * CHAR_SIZE as u16;
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
        LdBVx { x } => {
            let value = state.v[x];
            let i = state.i as usize;
            state.memory.write_byte(i, value / 100);
            state.memory.write_byte(i + 1, (value / 10) % 10);
            state.memory.write_byte(i + 2, value % 10);
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::Range(state.i, state.i.wrapping_add(3))
        }
        LdIVx { x } => {
            let i = state.i as usize;
            for offset in 0..=x {
                state.memory.write_byte(i + offset, state.v[offset]);
            }
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::Range(state.i, state.i.wrapping_add(x as u16 + 1))
        }
        LdVxI { x } => {
            let bytes = state.memory.read_bytes(state.i as usize, x + 1);
            state.v[..=x].copy_from_slice(&bytes);
            state.program_counter = pc.wrapping_add(2);
            MemoryWrite::None
        }
    };
    Ok(StepOutcome {
        retired: true,
        write,
    })
}

/// Advances `program_counter` from `pc` by 4 if `condition` holds, else by 2 -
/// the shared arithmetic behind every conditional-skip opcode.
fn skip(state: &mut MachineState, pc: u16, condition: bool) {
    state.program_counter = pc.wrapping_add(if condition { 4 } else { 2 });
}

/// The guest address the very first fetched instruction is read from.
pub(crate) const ENTRY_POINT: u16 = PROGRAM_START_ADDRESS;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;

    fn state() -> MachineState {
        MachineState::new(&[], &EngineConfig::default()).unwrap()
    }

    #[test]
    fn add_sets_carry_on_overflow() {
        let mut s = state();
        let iface = Interface::new();
        s.v[0] = 250;
        s.v[1] = 10;
        execute(Instruction::AddVxVy { x: 0, y: 1 }, &mut s, &iface).unwrap();
        assert_eq!(s.v[0], 4);
        assert_eq!(s.v[FLAG_REGISTER], 1);
    }

    #[test]
    fn sub_sets_flag_when_minuend_larger() {
        let mut s = state();
        let iface = Interface::new();
        s.v[0] = 10;
        s.v[1] = 3;
        execute(Instruction::SubVxVy { x: 0, y: 1 }, &mut s, &iface).unwrap();
        assert_eq!(s.v[0], 7);
        assert_eq!(s.v[FLAG_REGISTER], 1);
    }

    #[test]
    fn shr_operates_on_vx_ignoring_vy_modern_quirk() {
        let mut s = state();
        let iface = Interface::new();
        s.v[1] = 0b0000_0011;
        s.v[2] = 0xFF;
        execute(Instruction::ShrVx { x: 1 }, &mut s, &iface).unwrap();
        assert_eq!(s.v[1], 0b0000_0001);
        assert_eq!(s.v[FLAG_REGISTER], 1);
    }

    #[test]
    fn call_then_ret_returns_to_instruction_after_call() {
        let mut s = state();
        let iface = Interface::new();
        s.program_counter = 0x200;
        execute(Instruction::Call { nnn: 0x400 }, &mut s, &iface).unwrap();
        assert_eq!(s.program_counter, 0x400);
        assert_eq!(s.stack.depth(), 1);
        execute(Instruction::Ret, &mut s, &iface).unwrap();
        assert_eq!(s.program_counter, 0x202);
        assert_eq!(s.stack.depth(), 0);
    }

    #[test]
    fn call_beyond_depth_overflows() {
        let mut s = state();
        let iface = Interface::new();
        for _ in 0..STACK_DEPTH {
            execute(Instruction::Call { nnn: 0x300 }, &mut s, &iface).unwrap();
        }
        assert!(matches!(
            execute(Instruction::Call { nnn: 0x300 }, &mut s, &iface),
            Err(EngineError::StackOverflow { .. })
        ));
    }

    #[test]
    fn ret_on_empty_stack_underflows() {
        let mut s = state();
        let iface = Interface::new();
        assert!(matches!(
            execute(Instruction::Ret, &mut s, &iface),
            Err(EngineError::StackUnderflow { .. })
        ));
    }

    #[test]
    fn bcd_decomposes_value() {
        let mut s = state();
        let iface = Interface::new();
        s.i = 0x300;
        s.v[2] = 255;
        execute(Instruction::LdBVx { x: 2 }, &mut s, &iface).unwrap();
        assert_eq!(s.memory.read_byte(0x300), 2);
        assert_eq!(s.memory.read_byte(0x301), 5);
        assert_eq!(s.memory.read_byte(0x302), 5);
    }

    #[test]
    fn register_spill_and_fill_roundtrip_and_leave_i_unchanged() {
        let mut s = state();
        let iface = Interface::new();
        s.i = 0x300;
        for r in 0..=5 {
            s.v[r] = (r as u8) * 7;
        }
        let before = s.v;
        execute(Instruction::LdIVx { x: 5 }, &mut s, &iface).unwrap();
        assert_eq!(s.i, 0x300);
        s.v = [0; 16];
        execute(Instruction::LdVxI { x: 5 }, &mut s, &iface).unwrap();
        assert_eq!(s.i, 0x300);
        assert_eq!(&s.v[..=5], &before[..=5]);
    }

    #[test]
    fn register_fill_wraps_instead_of_panicking_when_i_is_near_top_of_memory() {
        let mut s = state();
        let iface = Interface::new();
        s.i = 0xFF8;
        execute(Instruction::LdVxI { x: 15 }, &mut s, &iface).unwrap();
        assert_eq!(s.v.len(), 16);
    }

    #[test]
    fn ld_f_points_at_font_glyph_for_digit() {
        let mut s = state();
        let iface = Interface::new();
        s.v[3] = 0xA;
        execute(Instruction::LdFVx { x: 3 }, &mut s, &iface).unwrap();
        assert_eq!(s.i, 0xA * CHAR_SIZE as u16);
    }

    #[test]
    fn draw_sets_flag_and_publishes_frame() {
        let mut s = state();
        let iface = Interface::new();
        s.i = FONT_START_ADDRESS;
        s.v[0] = 0;
        s.v[1] = 0;
        execute(Instruction::DrwVxVyN { x: 0, y: 1, n: 5 }, &mut s, &iface).unwrap();
        assert_eq!(s.v[FLAG_REGISTER], 0);
        let mut seen = None;
        iface.consume_frame_buffer(|f| seen = Some(*f));
        assert_eq!(seen, Some(s.frame_buffer));
    }

    #[test]
    fn jp_v0_adds_v0_to_target() {
        let mut s = state();
        let iface = Interface::new();
        s.v[0] = 0x10;
        execute(Instruction::JpV0 { nnn: 0x300 }, &mut s, &iface).unwrap();
        assert_eq!(s.program_counter, 0x310);
    }

    #[test]
    fn skip_taken_advances_four_not_taken_advances_two() {
        let mut s = state();
        let iface = Interface::new();
        s.program_counter = 0x200;
        s.v[0] = 5;
        execute(Instruction::SeVxByte { x: 0, kk: 5 }, &mut s, &iface).unwrap();
        assert_eq!(s.program_counter, 0x204);
        s.program_counter = 0x200;
        execute(Instruction::SeVxByte { x: 0, kk: 6 }, &mut s, &iface).unwrap();
        assert_eq!(s.program_counter, 0x202);
    }

    #[test]
    fn ld_vx_k_returns_immediately_on_stop_without_advancing_pc() {
        let mut s = state();
        let iface = Interface::new();
        s.program_counter = 0x200;
        iface.request_stop();
        execute(Instruction::LdVxK { x: 0 }, &mut s, &iface).unwrap();
        assert_eq!(s.program_counter, 0x200);
    }

    #[test]
    fn ld_vx_k_resolves_to_lowest_pressed_key() {
        let mut s = state();
        let iface = Interface::new();
        s.program_counter = 0x200;
        iface.set_key(0x7, true).unwrap();
        execute(Instruction::LdVxK { x: 0 }, &mut s, &iface).unwrap();
        assert_eq!(s.v[0], 0x7);
        assert_eq!(s.program_counter, 0x202);
    }

    #[test]
    fn branch_terminators_match_spec_list() {
        use Instruction::*;
        assert!(is_branch_terminator(&Jp { nnn: 0 }));
        assert!(is_branch_terminator(&LdVxK { x: 0 }));
        assert!(!is_branch_terminator(&AddVxByte { x: 0, kk: 1 }));
        assert!(!is_branch_terminator(&LdIVx { x: 0 }));
    }
}
