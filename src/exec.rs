//! Executes one instruction of one compute node.
//!
//! The scheduler calls [`step`] in phase 1. A `Done` result lets the node
//! advance its instruction pointer; `ReadWait`/`WriteWait` leave it in
//! place. A MOV whose destination is a port always reports `WriteWait` on
//! first encounter: the value is parked and [`step_defer`] finalizes the
//! handshake in phase 2.

use log::{error, trace};

use crate::node::{Node, OpResult, ReadResult, WriteReg, WriteResult};
use crate::ops::{Arg, Opcode};
use crate::word::{clamp, Word};
use crate::{Tis, NODE_LINES};

pub(crate) fn step(node: &mut Node, tis: &mut Tis) -> OpResult {
    let Some((opcode, src, dst)) = fetch_parts(node) else {
        error!("INTERNAL: no instruction to run on node {node}");
        return OpResult::Fault;
    };
    trace!("run instruction {opcode} on node {node}");

    match opcode {
        Opcode::ADD => match source_word(node, tis, &src, opcode) {
            Ok(value) => {
                node.set_acc(clamp(node.acc() + value));
                OpResult::Done
            }
            Err(result) => result,
        },
        Opcode::SUB => match source_word(node, tis, &src, opcode) {
            Ok(value) => {
                node.set_acc(clamp(node.acc() - value));
                OpResult::Done
            }
            Err(result) => result,
        },
        Opcode::NEG => {
            // -999..999 is symmetric, so no clamp is needed.
            node.set_acc(-node.acc());
            OpResult::Done
        }
        Opcode::NOP => OpResult::Done,
        Opcode::SAV => {
            node.set_bak(node.acc());
            OpResult::Done
        }
        Opcode::SWP => {
            let acc = node.acc();
            node.set_acc(node.bak());
            node.set_bak(acc);
            OpResult::Done
        }
        Opcode::HCF => OpResult::Halt,
        Opcode::JMP => jump(node, &src),
        Opcode::JEZ => {
            if node.acc() == 0 {
                jump(node, &src)
            } else {
                OpResult::Done
            }
        }
        Opcode::JGZ => {
            if node.acc() > 0 {
                jump(node, &src)
            } else {
                OpResult::Done
            }
        }
        Opcode::JLZ => {
            if node.acc() < 0 {
                jump(node, &src)
            } else {
                OpResult::Done
            }
        }
        Opcode::JNZ => {
            if node.acc() != 0 {
                jump(node, &src)
            } else {
                OpResult::Done
            }
        }
        Opcode::JRO => match source_word(node, tis, &src, opcode) {
            Ok(offset) => {
                jump_relative(node, offset);
                OpResult::Done
            }
            Err(result) => result,
        },
        Opcode::MOV => {
            if node.write_reg != WriteReg::Quiet {
                // Still waiting on the previous write.
                return OpResult::WriteWait;
            }
            let value = match source_word(node, tis, &src, opcode) {
                Ok(value) => clamp(value),
                Err(result) => return result,
            };
            let Arg::Register(reg) = dst else {
                error!("INTERNAL: invalid destination for MOV on node {node}");
                return OpResult::Fault;
            };
            match node.write_register(tis, reg, value) {
                WriteResult::Done => OpResult::Done,
                WriteResult::Wait => OpResult::WriteWait,
                WriteResult::Fault => OpResult::Fault,
            }
        }
        Opcode::INVALID => {
            error!("attempted to run an invalid instruction on node {node}");
            OpResult::Fault
        }
    }
}

/// Phase-2 companion of [`step`]. Only a MOV to a port can defer.
pub(crate) fn step_defer(node: &mut Node) -> OpResult {
    let Some((opcode, _, dst)) = fetch_parts(node) else {
        error!("INTERNAL: no instruction to finalize on node {node}");
        return OpResult::Fault;
    };
    trace!("run instruction {opcode} on node {node} (defer)");
    if opcode != Opcode::MOV {
        error!("INTERNAL: only MOV instructions may be deferred; node {node}");
        return OpResult::Fault;
    }
    let Arg::Register(reg) = dst else {
        error!("INTERNAL: invalid destination for MOV on node {node}");
        return OpResult::Fault;
    };
    match node.write_register_defer(reg) {
        WriteResult::Done => OpResult::Done,
        WriteResult::Wait => OpResult::WriteWait,
        WriteResult::Fault => OpResult::Fault,
    }
}

fn fetch_parts(node: &Node) -> Option<(Opcode, Arg, Arg)> {
    let op = node.code()?[node.ip()].as_ref()?;
    Some((op.opcode, op.src.clone(), op.dst.clone()))
}

/// Evaluate a source operand to a word. Port reads may block, which the
/// caller reports unchanged.
fn source_word(node: &mut Node, tis: &mut Tis, src: &Arg, opcode: Opcode) -> Result<Word, OpResult> {
    match src {
        Arg::Constant(value) => Ok(*value),
        Arg::Register(reg) => match node.read_register(tis, *reg) {
            ReadResult::Value(value) => Ok(value),
            ReadResult::Wait => Err(OpResult::ReadWait),
            ReadResult::Fault => Err(OpResult::Fault),
        },
        _ => {
            error!("INTERNAL: invalid source operand for {opcode} on node {node}");
            Err(OpResult::Fault)
        }
    }
}

/// Taken jumps land one before the target because the scheduler advances the
/// instruction pointer after a successful step.
fn jump(node: &mut Node, src: &Arg) -> OpResult {
    let Arg::Label(label) = src else {
        error!("INTERNAL: unable to jump to a non-label argument on node {node}");
        return OpResult::Fault;
    };
    trace!("jumping to label {label} on node {node}");
    let target = node.code().and_then(|code| {
        code.iter()
            .position(|slot| matches!(slot, Some(op) if op.label.as_deref() == Some(label.as_str())))
    });
    match target {
        Some(slot) => {
            node.set_ip((slot + NODE_LINES - 1) % NODE_LINES);
            OpResult::Done
        }
        None => {
            error!("label {label} not found in node {node}, unable to jump");
            OpResult::Fault
        }
    }
}

/// JRO moves along the program's runnable slots without wrapping: the
/// offset counts only non-empty slots and pins at the first or last one.
fn jump_relative(node: &mut Node, offset: Word) {
    let slot = jro_target(node, offset);
    node.set_ip((slot + NODE_LINES - 1) % NODE_LINES);
}

fn jro_target(node: &Node, offset: Word) -> usize {
    let ip = node.ip();
    let runnable: Vec<usize> = node
        .code()
        .map(|code| {
            code.iter()
                .enumerate()
                .filter(|(_, slot)| matches!(slot, Some(op) if op.runnable()))
                .map(|(index, _)| index)
                .collect()
        })
        .unwrap_or_default();
    if runnable.is_empty() {
        return ip;
    }
    // The executing slot is always present in the list.
    let position = runnable.iter().position(|&index| index == ip).unwrap_or(0);
    let target = (position as i64 + i64::from(offset)).clamp(0, runnable.len() as i64 - 1);
    runnable[target as usize]
}
