//! The synthetic edge nodes bridging the grid to external streams.
//!
//! An input column sits above the top row: each tick it parks one word from
//! its stream and exposes it as a DOWN write for the node below (or, in
//! translator mode, for the output column at the same index). An output
//! column sits below the bottom row and drains any write aimed at it.
//!
//! A source that runs dry reads as a permanent wait, which is what lets the
//! grid quiesce on EOF. A sink that fails is disabled with a one-shot error
//! and silently drops everything afterwards.

use std::fmt;
use std::io::{BufRead, Write};

use log::{error, trace, warn};

use crate::node::{NodeState, Register, WriteReg};
use crate::word::{clamp, Word};

/// How words are encoded on the byte stream.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IoKind {
    /// One byte per word; bytes ingest as unsigned words, words emit
    /// modulo 256.
    Ascii,
    /// Whitespace-separated decimal integers in, decimal digits plus an
    /// optional separator byte out.
    Numeric,
}

pub struct InputColumn {
    pub col: usize,
    pub kind: IoKind,
    reader: Option<Box<dyn BufRead>>,
    pub write_buf: Word,
    pub write_reg: WriteReg,
    pub last_state: NodeState,
}

impl InputColumn {
    pub(crate) fn new(col: usize, kind: IoKind, reader: Option<Box<dyn BufRead>>) -> InputColumn {
        InputColumn {
            col,
            kind,
            reader,
            write_buf: 0,
            write_reg: WriteReg::Quiet,
            last_state: NodeState::Idle,
        }
    }

    /// Phase 1: park the next word, or keep waiting on a pending one.
    pub(crate) fn run(&mut self) -> NodeState {
        if self.write_reg != WriteReg::Quiet {
            return NodeState::WriteWait;
        }
        match self.next_word() {
            Some(value) => {
                trace!("input column {} parked value {value}", self.col);
                self.write_buf = value;
                NodeState::WriteWait
            }
            None => NodeState::ReadWait,
        }
    }

    /// Phase 2: if the parked word was consumed this tick the column is done
    /// with it, otherwise publish it for the next tick's readers.
    pub(crate) fn run_defer(&mut self) -> NodeState {
        if self.write_reg == WriteReg::Taken {
            self.write_reg = WriteReg::Quiet;
            return NodeState::Running;
        }
        self.write_reg = WriteReg::Ready(Register::DOWN);
        NodeState::WriteWait
    }

    fn next_word(&mut self) -> Option<Word> {
        let reader = self.reader.as_mut()?;
        match self.kind {
            IoKind::Ascii => next_byte(reader.as_mut()).map(Word::from),
            IoKind::Numeric => next_int(reader.as_mut()).map(clamp),
        }
    }
}

impl fmt::Debug for InputColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputColumn")
            .field("col", &self.col)
            .field("kind", &self.kind)
            .field("write_reg", &self.write_reg)
            .finish()
    }
}

pub struct OutputColumn {
    pub col: usize,
    pub kind: IoKind,
    writer: Option<Box<dyn Write>>,
    /// Byte appended after each NUMERIC value; negative means none.
    pub sep: i32,
    pub last_state: NodeState,
}

impl OutputColumn {
    pub(crate) fn new(
        col: usize,
        kind: IoKind,
        writer: Option<Box<dyn Write>>,
        sep: i32,
    ) -> OutputColumn {
        OutputColumn {
            col,
            kind,
            writer,
            sep,
            last_state: NodeState::Idle,
        }
    }

    /// Emit one word. A failed write disables the handle for the rest of the
    /// run; the simulation keeps going.
    pub(crate) fn emit(&mut self, value: Word) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        let result = match self.kind {
            IoKind::Ascii => writer.write_all(&[value.rem_euclid(256) as u8]),
            IoKind::Numeric => {
                let mut result = write!(writer, "{value}");
                if result.is_ok() && self.sep >= 0 {
                    result = writer.write_all(&[self.sep as u8]);
                }
                result
            }
        }
        .and_then(|()| writer.flush());
        if let Err(err) = result {
            error!(
                "write failed on output column {}: {err}; dropping data from now on",
                self.col
            );
            self.writer = None;
        }
    }
}

impl fmt::Debug for OutputColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputColumn")
            .field("col", &self.col)
            .field("kind", &self.kind)
            .field("sep", &self.sep)
            .finish()
    }
}

fn next_byte(reader: &mut dyn BufRead) -> Option<u8> {
    let buf = match reader.fill_buf() {
        Ok(buf) => buf,
        Err(err) => {
            warn!("input read failed, treating as end of stream: {err}");
            return None;
        }
    };
    let byte = *buf.first()?;
    reader.consume(1);
    Some(byte)
}

fn peek_byte(reader: &mut dyn BufRead) -> Option<u8> {
    match reader.fill_buf() {
        Ok(buf) => buf.first().copied(),
        Err(err) => {
            warn!("input read failed, treating as end of stream: {err}");
            None
        }
    }
}

/// Scan the next whitespace-separated integer, `fscanf`-style: skip
/// whitespace, take an optional sign and then digits, and stop at the first
/// byte that no longer belongs. The value comes back raw, possibly outside
/// the word range; [`InputColumn::next_word`] clamps it on ingest.
fn next_int(reader: &mut dyn BufRead) -> Option<Word> {
    while peek_byte(reader)?.is_ascii_whitespace() {
        reader.consume(1);
    }
    let mut negative = false;
    match peek_byte(reader)? {
        b'-' => {
            negative = true;
            reader.consume(1);
        }
        b'+' => reader.consume(1),
        _ => {}
    }
    let mut value: i64 = 0;
    let mut digits = 0usize;
    while let Some(byte) = peek_byte(reader) {
        if !byte.is_ascii_digit() {
            break;
        }
        // Far past the word range already; keep consuming digits but stop
        // accumulating so the value cannot overflow.
        if value < 1_000_000 {
            value = value * 10 + i64::from(byte - b'0');
        }
        digits += 1;
        reader.consume(1);
    }
    if digits == 0 {
        warn!("expected an integer on a numeric input, found none");
        return None;
    }
    if negative {
        value = -value;
    }
    // The digit cap above keeps the magnitude below 10^7, so this fits.
    Some(value as Word)
}
