//! Lowers layout and source text into an executable [`Tis`].
//!
//! The layout grammar is whitespace-delimited: `<rows> <cols>`, then one
//! single-character node kind per grid cell, then any number of
//! `{I|O}<col> <type> <stream> [<sep>]` declarations. The source grammar is
//! line-oriented: `@<id>` opens a node block, `label:` prefixes a slot,
//! `#` starts a comment, and `##` introduces the grid title. Most mistakes
//! warn and keep going; only structural problems abort.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};

use log::{debug, error, trace, warn};

use crate::io::{InputColumn, IoKind, OutputColumn};
use crate::node::{Node, NodeKind, Register};
use crate::ops::{Arg, Op, Opcode};
use crate::word::Word;
use crate::{Tis, NODE_LINES, NODE_LINE_LENGTH};

/// A failure that prevents the machine from being built at all.
#[derive(Debug)]
pub enum InitError {
    Io(io::Error),
    Layout(String),
}

impl From<io::Error> for InitError {
    fn from(error: io::Error) -> Self {
        InitError::Io(error)
    }
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Io(error) => write!(f, "i/o error: {error}"),
            InitError::Layout(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for InitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            InitError::Io(error) => Some(error),
            InitError::Layout(_) => None,
        }
    }
}

struct Scanner<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Scanner<'a> {
        Scanner { text, pos: 0 }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.text[self.pos..].chars().next() {
            if !ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
    }

    fn next_token(&mut self) -> Option<&'a str> {
        self.skip_whitespace();
        let start = self.pos;
        while let Some(ch) = self.text[self.pos..].chars().next() {
            if ch.is_whitespace() {
                break;
            }
            self.pos += ch.len_utf8();
        }
        (self.pos > start).then(|| &self.text[start..self.pos])
    }

    fn next_char(&mut self) -> Option<char> {
        self.skip_whitespace();
        let ch = self.text[self.pos..].chars().next()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn rest(&self) -> &'a str {
        &self.text[self.pos..]
    }
}

/// A partially-declared I/O column; streams are opened once the whole
/// layout has been read.
#[derive(Default)]
struct IoDecl {
    kind: Option<IoKind>,
    stream: Option<String>,
    sep: Option<i32>,
}

enum IoMode {
    None,
    Input(usize),
    Output(usize),
    /// An out-of-bounds declaration; its tokens are skipped.
    Ignore,
}

impl Tis {
    /// Build the grid described by a layout text.
    pub fn from_layout(text: &str) -> Result<Tis, InitError> {
        let mut scanner = Scanner::new(text);
        let rows = parse_dimension(scanner.next_token())?;
        let cols = parse_dimension(scanner.next_token())?;
        debug!("read dimensions {rows}r {cols}c from layout");
        if cols == 0 {
            // Zero rows are fine; the grid degenerates into a translator.
            return Err(InitError::Layout(
                "cannot initialize with zero columns".to_string(),
            ));
        }

        let mut tis = Tis::empty(rows, cols);
        let mut next_id = 0;
        for index in 0..rows * cols {
            let row = index / cols;
            let col = index % cols;
            let node = match scanner.next_char() {
                Some('C' | 'c') => {
                    let node = Node::compute(next_id, row, col);
                    next_id += 1;
                    node
                }
                Some('M' | 'm' | 'S' | 's') => Node::stack(row, col),
                Some('R' | 'r') => {
                    return Err(InitError::Layout(
                        "RAM nodes are not yet implemented".to_string(),
                    ))
                }
                Some('D' | 'd') => Node::damaged(row, col),
                Some(other) => {
                    return Err(InitError::Layout(format!(
                        "unrecognized node specifier '{other}'"
                    )))
                }
                None => {
                    return Err(InitError::Layout(
                        "unexpected EOF while reading node specifiers".to_string(),
                    ))
                }
            };
            tis.push_node(node);
        }

        let mut mode = IoMode::None;
        let mut input_decls: Vec<Option<IoDecl>> = (0..cols).map(|_| None).collect();
        let mut output_decls: Vec<Option<IoDecl>> = (0..cols).map(|_| None).collect();
        for token in scanner.rest().split_whitespace() {
            if let Some(col) = io_binding(token, 'I') {
                if col >= cols {
                    warn!("input I{col} is out-of-bounds for the current layout, ignoring definition");
                    mode = IoMode::Ignore;
                } else {
                    debug!("found an input for column {col}");
                    input_decls[col] = Some(IoDecl::default());
                    mode = IoMode::Input(col);
                }
                continue;
            }
            if let Some(col) = io_binding(token, 'O') {
                if col >= cols {
                    warn!("output O{col} is out-of-bounds for the current layout, ignoring definition");
                    mode = IoMode::Ignore;
                } else {
                    debug!("found an output for column {col}");
                    output_decls[col] = Some(IoDecl::default());
                    mode = IoMode::Output(col);
                }
                continue;
            }
            match mode {
                IoMode::Input(col) => {
                    if let Some(decl) = input_decls[col].as_mut() {
                        apply_input_token(decl, col, token);
                    }
                }
                IoMode::Output(col) => {
                    if let Some(decl) = output_decls[col].as_mut() {
                        apply_output_token(decl, col, token);
                    }
                }
                IoMode::Ignore => debug!("skipping past token {token}"),
                IoMode::None => error!("found unexpected token {token}, ignoring"),
            }
        }

        for (col, decl) in input_decls.into_iter().enumerate() {
            let Some(decl) = decl else { continue };
            let kind = decl.kind.unwrap_or_else(|| {
                warn!("input I{col} was declared without a type and will provide no data");
                IoKind::Ascii
            });
            let reader = decl.stream.as_deref().and_then(open_input_stream);
            tis.attach_input_column(InputColumn::new(col, kind, reader));
        }
        for (col, decl) in output_decls.into_iter().enumerate() {
            let Some(decl) = decl else { continue };
            let kind = decl.kind.unwrap_or_else(|| {
                warn!("output O{col} was declared without a type and will drop all data");
                IoKind::Ascii
            });
            let writer = decl.stream.as_deref().and_then(open_output_stream);
            let sep = decl.sep.unwrap_or(match kind {
                IoKind::Numeric => i32::from(b'\n'),
                IoKind::Ascii => -1,
            });
            tis.attach_output_column(OutputColumn::new(col, kind, writer, sep));
        }
        Ok(tis)
    }

    /// The no-layout default: every node a compute node, standard input
    /// feeding column 0 and standard output fed by the rightmost column.
    pub fn with_default_grid(
        rows: usize,
        cols: usize,
        input: IoKind,
        output: IoKind,
    ) -> Result<Tis, InitError> {
        if cols == 0 {
            return Err(InitError::Layout(
                "cannot initialize with zero columns".to_string(),
            ));
        }
        let mut tis = Tis::empty(rows, cols);
        for index in 0..rows * cols {
            tis.push_node(Node::compute(index, index / cols, index % cols));
        }
        tis.attach_input_column(InputColumn::new(
            0,
            input,
            Some(Box::new(BufReader::new(io::stdin()))),
        ));
        tis.attach_output_column(OutputColumn::new(
            cols - 1,
            output,
            Some(Box::new(io::stdout())),
            i32::from(b'\n'),
        ));
        Ok(tis)
    }

    /// Parse and load node programs from a source stream.
    pub fn load_source<R: BufRead>(&mut self, source: R) -> Result<(), InitError> {
        let mut target: Option<usize> = None;
        // Out of bounds until the first @ directive.
        let mut slot = NODE_LINES;
        let mut current_id: i64 = -1;
        let mut previous_id: i64 = -1;

        for line in source.lines() {
            let line = line?;
            trace!("parse line:  {line}");
            if line.is_empty() && slot >= NODE_LINES {
                // Blank space between nodes; the game writes these too.
            } else if let Some((id, extra)) = node_directive(&line) {
                if extra {
                    error!("extra data appears on specifier line for @{id}, continuing anyway");
                }
                if id < previous_id {
                    warn!("nodes appear out of order, @{id} is after @{previous_id}, continuing anyway");
                }
                previous_id = id;
                current_id = id;
                slot = 0;
                target = self.find_compute(id);
                match target {
                    None => {
                        warn!("@{id} is out-of-bounds for the current layout, contents will be ignored");
                    }
                    Some(index) => {
                        if let NodeKind::Compute { code, .. } = &mut self.nodes_mut()[index].kind {
                            if code[0].is_some() {
                                warn!("@{id} has already been seen, previous contents will be discarded and replaced");
                                for entry in code.iter_mut() {
                                    *entry = None;
                                }
                            }
                        }
                    }
                }
            } else if slot >= NODE_LINES {
                if current_id < 0 {
                    warn!("ignoring out-of-node data at top of file:");
                } else {
                    warn!("ignoring out-of-node data after @{current_id}:");
                }
                warn!("    {line}");
                // The slot counter stays out of bounds.
            } else if let Some(index) = target {
                self.parse_program_line(index, slot, current_id, &line);
                slot += 1;
            } else {
                // Lines of a block whose id matched nothing; skip quietly.
                slot += 1;
            }
        }
        Ok(())
    }

    fn find_compute(&mut self, id: i64) -> Option<usize> {
        self.nodes_mut()
            .iter()
            .position(|node| matches!(&node.kind, NodeKind::Compute { id: node_id, .. } if *node_id as i64 == id))
    }

    fn parse_program_line(&mut self, index: usize, slot: usize, id: i64, line: &str) {
        if line.len() > NODE_LINE_LENGTH {
            warn!("overlength line, continuing anyway:");
            warn!("    {line}");
        }

        // The first ## anywhere names the grid; later ones are ignored.
        if self.name().is_none() {
            if let Some(pos) = line.find("##") {
                if let Some(title) = line[pos + 2..].split_whitespace().next() {
                    self.set_name(title.to_string());
                }
            }
        }

        let stripped = match line.find('#') {
            Some(pos) => &line[..pos],
            None => line,
        };
        // The label is everything before the colon, byte-exact; real TIS
        // does not strip whitespace, so neither do we.
        let (label, body) = match stripped.find(':') {
            Some(pos) => (Some(stripped[..pos].to_string()), &stripped[pos + 1..]),
            None => (None, stripped),
        };

        let mut tokens = body
            .split(|c: char| c.is_whitespace() || c == ',')
            .filter(|token| !token.is_empty());

        let (opcode, arity, wants_label) = match tokens.next() {
            None => (Opcode::INVALID, 0, false),
            Some(token) => match opcode_table(token) {
                Some(entry) => entry,
                None => {
                    error!(
                        "unrecognized opcode \"{token}\" on line {} of @{id}",
                        slot + 1
                    );
                    (Opcode::INVALID, 0, false)
                }
            },
        };

        let mut src = Arg::None;
        let mut dst = Arg::None;
        if arity > 0 {
            if let Some(token) = tokens.next() {
                src = if wants_label {
                    // The label interpretation beats everything else; "MOV"
                    // and "16" are both valid label names.
                    Arg::Label(token.to_string())
                } else if let Some(value) = parse_literal(token) {
                    let clamped = value.clamp(-999, 999) as Word;
                    if i64::from(clamped) != value {
                        warn!(
                            "numeric operand {value} is clamped to {clamped} on line {} of @{id}",
                            slot + 1
                        );
                    }
                    Arg::Constant(clamped)
                } else if let Some(reg) = register_keyword(token) {
                    Arg::Register(reg)
                } else {
                    // This also catches BAK, which is not addressable.
                    error!(
                        "invalid first operand \"{token}\" on line {} of @{id}",
                        slot + 1
                    );
                    Arg::None
                };
            }
        }
        if arity > 1 {
            if let Some(token) = tokens.next() {
                dst = match register_keyword(token) {
                    Some(reg) => Arg::Register(reg),
                    None => {
                        error!(
                            "invalid second operand \"{token}\" on line {} of @{id}",
                            slot + 1
                        );
                        Arg::None
                    }
                };
            }
        }
        for token in tokens {
            error!("extra operand \"{token}\" on line {} of @{id}", slot + 1);
        }

        let op = Op {
            opcode,
            src,
            dst,
            label,
            line: slot + 1,
            text: line.to_string(),
        };
        if let NodeKind::Compute { code, .. } = &mut self.nodes_mut()[index].kind {
            code[slot] = Some(op);
        }
    }
}

fn parse_dimension(token: Option<&str>) -> Result<usize, InitError> {
    let token = token.ok_or_else(|| {
        InitError::Layout("unexpected EOF when parsing dimensions".to_string())
    })?;
    token.parse().map_err(|_| {
        InitError::Layout("unexpected token when parsing dimensions".to_string())
    })
}

/// `I3` / `O0` style binding tokens. Case matters, as it did in the
/// original format.
fn io_binding(token: &str, prefix: char) -> Option<usize> {
    let digits = token.strip_prefix(prefix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn apply_input_token(decl: &mut IoDecl, col: usize, token: &str) {
    if decl.kind.is_none() {
        if token.eq_ignore_ascii_case("ASCII") {
            debug!("set I{col} to ASCII mode");
            decl.kind = Some(IoKind::Ascii);
        } else if token.eq_ignore_ascii_case("NUMERIC") {
            debug!("set I{col} to NUMERIC mode");
            decl.kind = Some(IoKind::Numeric);
        } else {
            error!("found unexpected token {token}, ignoring");
        }
    } else if decl.stream.is_none() {
        debug!("set I{col} to use stream {token}");
        decl.stream = Some(token.to_string());
    } else {
        error!("found unexpected token {token}, ignoring");
    }
}

fn apply_output_token(decl: &mut IoDecl, col: usize, token: &str) {
    if decl.kind.is_none() {
        if token.eq_ignore_ascii_case("ASCII") {
            debug!("set O{col} to ASCII mode");
            decl.kind = Some(IoKind::Ascii);
        } else if token.eq_ignore_ascii_case("NUMERIC") {
            debug!("set O{col} to NUMERIC mode");
            decl.kind = Some(IoKind::Numeric);
        } else {
            error!("found unexpected token {token}, ignoring");
        }
    } else if decl.stream.is_none() {
        debug!("set O{col} to use stream {token}");
        decl.stream = Some(token.to_string());
    } else if decl.kind == Some(IoKind::Numeric) {
        match token.parse::<i32>() {
            Ok(sep) => {
                debug!("set O{col} separator to {sep}");
                decl.sep = Some(sep);
            }
            Err(_) => error!("found unexpected token {token}, ignoring"),
        }
    } else {
        error!("found unexpected token {token}, ignoring");
    }
}

fn open_input_stream(stream: &str) -> Option<Box<dyn BufRead>> {
    if stream == "-" || stream.eq_ignore_ascii_case("STDIN") {
        return Some(Box::new(BufReader::new(io::stdin())));
    }
    match File::open(stream) {
        Ok(file) => Some(Box::new(BufReader::new(file))),
        Err(err) => {
            error!("unable to open {stream} for reading, will provide no data instead: {err}");
            None
        }
    }
}

fn open_output_stream(stream: &str) -> Option<Box<dyn Write>> {
    if stream == "-" || stream.eq_ignore_ascii_case("STDOUT") {
        return Some(Box::new(io::stdout()));
    }
    if stream.eq_ignore_ascii_case("STDERR") {
        return Some(Box::new(io::stderr()));
    }
    match OpenOptions::new().append(true).create(true).open(stream) {
        Ok(file) => Some(Box::new(file)),
        Err(err) => {
            error!("unable to open {stream} for writing, will silently drop data instead: {err}");
            None
        }
    }
}

/// `@5` directives open a node block. Returns the id and whether anything
/// else trailed it on the line.
fn node_directive(line: &str) -> Option<(i64, bool)> {
    let rest = line.strip_prefix('@')?.trim_start();
    let (negative, body) = match rest.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, rest.strip_prefix('+').unwrap_or(rest)),
    };
    let digits = body.len() - body.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    let value: i64 = body[..digits].parse().ok()?;
    let extra = !body[digits..].trim().is_empty();
    Some((if negative { -value } else { value }, extra))
}

fn opcode_table(token: &str) -> Option<(Opcode, usize, bool)> {
    const TABLE: [(&str, Opcode, usize, bool); 14] = [
        ("ADD", Opcode::ADD, 1, false),
        ("HCF", Opcode::HCF, 0, false),
        ("JEZ", Opcode::JEZ, 1, true),
        ("JGZ", Opcode::JGZ, 1, true),
        ("JLZ", Opcode::JLZ, 1, true),
        ("JMP", Opcode::JMP, 1, true),
        ("JNZ", Opcode::JNZ, 1, true),
        ("JRO", Opcode::JRO, 1, false),
        ("MOV", Opcode::MOV, 2, false),
        ("NEG", Opcode::NEG, 0, false),
        ("NOP", Opcode::NOP, 0, false),
        ("SAV", Opcode::SAV, 0, false),
        ("SUB", Opcode::SUB, 1, false),
        ("SWP", Opcode::SWP, 0, false),
    ];
    TABLE
        .iter()
        .find(|(name, _, _, _)| token.eq_ignore_ascii_case(name))
        .map(|&(_, opcode, arity, wants_label)| (opcode, arity, wants_label))
}

fn register_keyword(token: &str) -> Option<Register> {
    const TABLE: [(&str, Register); 8] = [
        ("ACC", Register::ACC),
        ("NIL", Register::NIL),
        ("UP", Register::UP),
        ("DOWN", Register::DOWN),
        ("LEFT", Register::LEFT),
        ("RIGHT", Register::RIGHT),
        ("ANY", Register::ANY),
        ("LAST", Register::LAST),
    ];
    TABLE
        .iter()
        .find(|(name, _)| token.eq_ignore_ascii_case(name))
        .map(|&(_, reg)| reg)
}

/// Signed integer literals with C-style base detection: `0x` hex, leading
/// zero octal, decimal otherwise. The whole token must be consumed.
fn parse_literal(token: &str) -> Option<i64> {
    let (negative, body) = match token.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let (radix, digits) = if let Some(hex) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        (16, hex)
    } else if body.len() > 1 && body.starts_with('0') {
        (8, &body[1..])
    } else {
        (10, body)
    };
    if digits.is_empty() {
        return None;
    }
    let value = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -value } else { value })
}
