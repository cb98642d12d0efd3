#![allow(clippy::upper_case_acronyms)] // Register and opcode mnemonics read better in caps!

//! Emulates a grid of tiny cooperating processors in the style of the
//! TIS-100. Each node runs a short assembly program and talks to its
//! orthogonal neighbours over blocking single-word ports; a global tick
//! scheduler advances every node once per tick and resolves matched
//! transfers within the same tick.

use log::{debug, trace};

pub use crate::io::{InputColumn, IoKind, OutputColumn};
pub use crate::node::{Node, NodeKind, NodeState, Register, WriteReg};
pub use crate::ops::{Arg, Op, Opcode};
pub use crate::parse::InitError;
pub use crate::word::{clamp, Word};

mod exec;
mod io;
mod node;
mod ops;
mod parse;
mod word;

/// Lines of code per compute node, and cells per stack node.
pub const NODE_LINES: usize = 15;
/// Longest line a node program is meant to hold; longer lines warn.
pub const NODE_LINE_LENGTH: usize = 19;

/// How a run ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A tick changed nothing and nothing was running.
    Quiescent,
    /// A node executed HCF.
    Halted,
    /// The cycle budget ran out first.
    CycleLimit,
}

/// The whole machine: grid geometry, nodes, and the I/O columns bound to the
/// top and bottom edges.
#[derive(Debug)]
pub struct Tis {
    rows: usize,
    cols: usize,
    name: Option<String>,
    nodes: Vec<Node>,
    inputs: Vec<Option<InputColumn>>,
    outputs: Vec<Option<OutputColumn>>,
    halted: bool,
}

impl Tis {
    pub(crate) fn empty(rows: usize, cols: usize) -> Tis {
        Tis {
            rows,
            cols,
            name: None,
            nodes: Vec::with_capacity(rows * cols),
            inputs: (0..cols).map(|_| None).collect(),
            outputs: (0..cols).map(|_| None).collect(),
            halted: false,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// The title captured from a `##` directive, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    pub fn node(&self, row: usize, col: usize) -> &Node {
        &self.nodes[row * self.cols + col]
    }

    pub(crate) fn node_mut(&mut self, row: usize, col: usize) -> &mut Node {
        &mut self.nodes[row * self.cols + col]
    }

    pub(crate) fn push_node(&mut self, node: Node) {
        self.nodes.push(node);
    }

    pub(crate) fn nodes_mut(&mut self) -> &mut [Node] {
        &mut self.nodes
    }

    pub(crate) fn input_mut(&mut self, col: usize) -> Option<&mut InputColumn> {
        self.inputs[col].as_mut()
    }

    pub(crate) fn output_mut(&mut self, col: usize) -> Option<&mut OutputColumn> {
        self.outputs[col].as_mut()
    }

    /// Bind an input column: the node at the top of `col` (or, with zero
    /// rows, the output column at the same index) will read the stream.
    pub fn attach_input(&mut self, col: usize, kind: IoKind, reader: Box<dyn std::io::BufRead>) {
        self.inputs[col] = Some(InputColumn::new(col, kind, Some(reader)));
    }

    pub(crate) fn attach_input_column(&mut self, column: InputColumn) {
        let col = column.col;
        self.inputs[col] = Some(column);
    }

    /// Bind an output column below the bottom of `col`. `sep` is the byte
    /// appended after each NUMERIC value; negative disables it.
    pub fn attach_output(
        &mut self,
        col: usize,
        kind: IoKind,
        writer: Box<dyn std::io::Write>,
        sep: i32,
    ) {
        self.outputs[col] = Some(OutputColumn::new(col, kind, Some(writer), sep));
    }

    pub(crate) fn attach_output_column(&mut self, column: OutputColumn) {
        let col = column.col;
        self.outputs[col] = Some(column);
    }

    pub(crate) fn halt(&mut self) {
        self.halted = true;
    }

    /// Advance the whole grid by one tick and report whether the system is
    /// quiescent: nothing ran and every component's state matched the
    /// previous tick's.
    ///
    /// Each tick has two phases over a fixed visit order (inputs, interior
    /// nodes row-major, outputs). Phase 1 lets readers observe parked
    /// writes; phase 2 lets writers observe that their parked value was
    /// drained and release their instruction pointers. Components whose
    /// phase 1 ended in a pending write are revisited in phase 2.
    pub fn tick(&mut self) -> bool {
        let mut quiescent = true;
        let mut deferred_inputs = vec![false; self.cols];
        let mut deferred_nodes = vec![false; self.nodes.len()];

        for col in 0..self.cols {
            let Some(input) = self.inputs[col].as_mut() else {
                continue;
            };
            let state = input.run();
            if state == NodeState::WriteWait {
                deferred_inputs[col] = true;
            } else {
                quiescent = quiescent && state != NodeState::Running && state == input.last_state;
                input.last_state = state;
            }
        }

        for index in 0..self.nodes.len() {
            let state = self.run_node(index);
            if self.halted {
                return quiescent;
            }
            if state == NodeState::WriteWait {
                deferred_nodes[index] = true;
            } else {
                let node = &mut self.nodes[index];
                quiescent = quiescent && state != NodeState::Running && state == node.last_state;
                node.last_state = state;
            }
        }

        for col in 0..self.cols {
            if self.outputs[col].is_none() {
                continue;
            }
            let state = self.run_output(col);
            if let Some(output) = self.outputs[col].as_mut() {
                quiescent = quiescent && state != NodeState::Running && state == output.last_state;
                output.last_state = state;
            }
        }

        for col in 0..self.cols {
            if !deferred_inputs[col] {
                continue;
            }
            if let Some(input) = self.inputs[col].as_mut() {
                let state = input.run_defer();
                quiescent = quiescent && state != NodeState::Running && state == input.last_state;
                input.last_state = state;
            }
        }

        for index in 0..self.nodes.len() {
            if !deferred_nodes[index] {
                continue;
            }
            let node = &mut self.nodes[index];
            let state = node.run_defer();
            quiescent = quiescent && state != NodeState::Running && state == node.last_state;
            node.last_state = state;
        }

        trace!("system quiescent? {quiescent}");
        quiescent
    }

    /// Steppers mutate neighbours through the grid, so the node being run is
    /// checked out of the grid for the duration of its step.
    fn run_node(&mut self, index: usize) -> NodeState {
        let mut node = std::mem::replace(&mut self.nodes[index], Node::placeholder());
        let state = node.run(self);
        self.nodes[index] = node;
        state
    }

    /// In translator mode the output column pulls straight from the input
    /// column at the same index. With rows present there is nothing to
    /// drain here: a bottom-row write reaches the column through the
    /// direct emit in the node's port-write path.
    fn run_output(&mut self, col: usize) -> NodeState {
        if self.rows > 0 {
            return NodeState::ReadWait;
        }
        match self.inputs[col].as_mut() {
            Some(input) if input.write_reg == WriteReg::Ready(Register::DOWN) => {
                input.write_reg = WriteReg::Taken;
                let value = input.write_buf;
                if let Some(output) = self.outputs[col].as_mut() {
                    output.emit(value);
                }
                NodeState::Running
            }
            _ => NodeState::ReadWait,
        }
    }

    /// Alternate ticks until the system quiesces, a node halts it, or the
    /// optional cycle budget runs out.
    pub fn run(&mut self, limit: Option<u64>) -> RunOutcome {
        let mut cycles: u64 = 0;
        loop {
            let quiescent = self.tick();
            cycles += 1;
            if self.halted {
                debug!("halted after {cycles} cycles");
                return RunOutcome::Halted;
            }
            if quiescent {
                debug!("quiescent after {cycles} cycles");
                return RunOutcome::Quiescent;
            }
            if limit.is_some_and(|limit| cycles >= limit) {
                debug!("cycle limit reached after {cycles} cycles");
                return RunOutcome::CycleLimit;
            }
        }
    }
}
