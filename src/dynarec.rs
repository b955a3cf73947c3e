//! The dynamic recompiler backend (component F): a basic-block cache keyed by guest
//! program counter.
//!
//! A block is a straight-line run of already-decoded instructions starting at some PC
//! and ending at (and including) the first [`crate::semantics::is_branch_terminator`]
//! instruction. Re-entering a cached PC replays the decoded sequence instead of
//! re-decoding it; self-modifying writes flush the whole cache rather than tracking
//! per-block staleness precisely, matching the "simple conservative policy" Design
//! Note 9 calls out.

use std::collections::HashMap;

use crate::decode::{decode, Instruction};
use crate::error::EngineError;
use crate::interface::Interface;
use crate::machine::MachineState;
use crate::semantics::{execute, is_branch_terminator, MemoryWrite};

/// The largest number of instructions a single block will accumulate before it is cut
/// off even without hitting a terminator - guards against decoding runaway straight-line
/// regions into one giant block for no benefit.
const MAX_BLOCK_LEN: usize = 512;

/// One guest basic block: the decoded instructions from its entry PC up to and
/// including its terminator, plus the byte range they were read from (used to decide
/// whether a write invalidates this block).
struct Block {
    instructions: Vec<Instruction>,
    start: u16,
    end: u16,
}

/// The block cache. Not `Send`/`Sync` - it lives entirely on the engine thread's stack
/// for the duration of a dynarec run.
#[derive(Default)]
struct BlockCache {
    blocks: HashMap<u16, Block>,
}

impl BlockCache {
    fn get_or_translate(
        &mut self,
        pc: u16,
        state: &MachineState,
    ) -> Result<&Block, EngineError> {
        if !self.blocks.contains_key(&pc) {
            let block = translate_block(pc, state)?;
            self.blocks.insert(pc, block);
        }
        Ok(self.blocks.get(&pc).expect("just inserted"))
    }

    /// Drops every cached block overlapping `[start, end)`. The spec's conservative
    /// policy is "flush the entire cache on any write into the range of any cached
    /// block", which is what this does rather than pruning only the overlapping ones.
    fn invalidate_if_overlapping(&mut self, start: u16, end: u16) {
        let overlaps = self
            .blocks
            .values()
            .any(|b| start < b.end && b.start < end);
        if overlaps {
            log::info!(
                "dynarec: guest write into [{:#05X}, {:#05X}) overlaps a cached block, flushing {} block(s)",
                start,
                end,
                self.blocks.len()
            );
            self.blocks.clear();
        }
    }
}

fn translate_block(start_pc: u16, state: &MachineState) -> Result<Block, EngineError> {
    let mut instructions = Vec::new();
    let mut pc = start_pc;
    loop {
        let opcode = state.memory.read_two_bytes(pc as usize);
        match decode(opcode, pc) {
            Ok(instruction) => {
                let terminator = is_branch_terminator(&instruction);
                instructions.push(instruction);
                pc = pc.wrapping_add(2);
                if terminator || instructions.len() >= MAX_BLOCK_LEN {
                    break;
                }
            }
            // An undecodable word ends the block one instruction early rather than
            // failing the whole lookup, so a block with valid leading instructions
            // still executes them; the bad opcode surfaces as InvalidOpcode on the
            // next lookup, at the point it would actually be fetched - matching the
            // interpreter's fetch-time failure instead of failing translation eagerly.
            Err(_) if !instructions.is_empty() => break,
            Err(err) => return Err(err),
        }
    }
    Ok(Block {
        instructions,
        start: start_pc,
        end: pc,
    })
}

/// Runs `state` to completion on the dynarec backend.
pub(crate) fn run(state: &mut MachineState, interface: &Interface) -> Result<(), EngineError> {
    let mut cache = BlockCache::default();
    loop {
        if interface.stop_requested() {
            return Ok(());
        }
        let entry_pc = state.program_counter;
        let block_len = {
            let block = cache.get_or_translate(entry_pc, state)?;
            block.instructions.len()
        };
        for step in 0..block_len {
            if interface.stop_requested() {
                return Ok(());
            }
            // Re-borrow the cache each step: `execute` may invalidate it via the write
            // it reports, and we must not hold a `Block` reference across that.
            let instruction = cache.blocks[&entry_pc].instructions[step];
            let outcome = execute(instruction, state, interface)?;
            // `outcome.retired`, not a program-counter comparison, is what must gate
            // the cycle count: a self-jump retires every pass without moving PC.
            if outcome.retired {
                interface.increment_cycle_count();
            }
            if let MemoryWrite::Range(start, end) = outcome.write {
                cache.invalidate_if_overlapping(start, end);
            }
        }
    }
}
