use std::cell::RefCell;
use std::io::{Cursor, Write};
use std::rc::Rc;

use yare::parameterized;

use tis_rust::{IoKind, NodeKind, Register, RunOutcome, Tis};

/// A write handle the test can keep while the output column owns a clone.
#[derive(Clone, Default)]
struct SharedBuf(Rc<RefCell<Vec<u8>>>);

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl SharedBuf {
    fn contents(&self) -> Vec<u8> {
        self.0.borrow().clone()
    }
}

fn grid(layout: &str, source: &str) -> Tis {
    let mut tis = Tis::from_layout(layout).expect("layout failed to parse");
    tis.load_source(Cursor::new(source.as_bytes().to_vec()))
        .expect("source failed to parse");
    tis
}

fn feed(tis: &mut Tis, col: usize, kind: IoKind, data: &str) {
    tis.attach_input(col, kind, Box::new(Cursor::new(data.as_bytes().to_vec())));
}

fn capture(tis: &mut Tis, col: usize, kind: IoKind, sep: i32) -> SharedBuf {
    let buf = SharedBuf::default();
    tis.attach_output(col, kind, Box::new(buf.clone()), sep);
    buf
}

#[test]
fn identity_translator_copies_bytes_and_quiesces_on_eof() {
    let mut tis = grid("1 1 C", "@0\nMOV UP DOWN\n");
    feed(&mut tis, 0, IoKind::Ascii, "Hi");
    let out = capture(&mut tis, 0, IoKind::Ascii, -1);

    assert_eq!(tis.run(Some(1000)), RunOutcome::Quiescent);
    assert_eq!(out.contents(), b"Hi");
}

#[test]
fn arithmetic_saturates_on_the_way_through() {
    let mut tis = grid("1 1 C", "@0\nMOV UP ACC\nADD 500\nMOV ACC DOWN\n");
    feed(&mut tis, 0, IoKind::Numeric, "600 -1000");
    let out = capture(&mut tis, 0, IoKind::Numeric, 10);

    assert_eq!(tis.run(Some(1000)), RunOutcome::Quiescent);
    // 600 + 500 saturates to 999; -1000 enters clamped to -999.
    assert_eq!(out.contents(), b"999\n-499\n");
}

#[test]
fn any_routes_to_a_ready_peer_and_remembers_the_direction() {
    let mut tis = grid("1 2 C C", "@0\nMOV UP ANY\n@1\nMOV ANY DOWN\n");
    feed(&mut tis, 0, IoKind::Ascii, "A");
    let out = capture(&mut tis, 1, IoKind::Ascii, -1);

    assert_eq!(tis.run(Some(1000)), RunOutcome::Quiescent);
    assert_eq!(out.contents(), b"A");
    // The byte left the first node through its right port.
    assert_eq!(tis.node(0, 0).last, Some(Register::RIGHT));
    assert_eq!(tis.node(0, 1).last, Some(Register::LEFT));
}

#[parameterized(
    one_forward = { "1", b"100\n200\n".as_slice() },
    two_forward = { "2", b"200\n".as_slice() },
    pins_at_the_last_slot = { "9", b"".as_slice() },
)]
fn jro_dispatches_on_acc_without_wrapping(input: &str, expected: &[u8]) {
    let mut tis = grid(
        "1 1 C",
        "@0\nMOV UP ACC\nJRO ACC\nMOV 100 DOWN\nMOV 200 DOWN\nHCF\n",
    );
    feed(&mut tis, 0, IoKind::Numeric, input);
    let out = capture(&mut tis, 0, IoKind::Numeric, 10);

    assert_eq!(tis.run(Some(1000)), RunOutcome::Halted);
    assert_eq!(out.contents(), expected);
}

#[test]
fn backward_jro_pins_at_the_first_slot() {
    // JRO -9 can only reach slot 0; if it wrapped it would hit the HCF.
    let mut tis = grid("1 1 C", "@0\nMOV 5 ACC\nJRO -9\nMOV ACC DOWN\nHCF\n");
    let out = capture(&mut tis, 0, IoKind::Numeric, 10);

    assert_eq!(tis.run(Some(60)), RunOutcome::CycleLimit);
    assert_eq!(out.contents(), b"");
}

#[test]
fn stack_stores_pushes_and_returns_them_in_reverse() {
    let mut tis = grid(
        "1 2 C S",
        "@0\nMOV 1 RIGHT\nMOV 2 RIGHT\nMOV 3 RIGHT\nMOV UP ACC\n",
    );
    assert_eq!(tis.run(Some(100)), RunOutcome::Quiescent);
    match &tis.node(0, 1).kind {
        NodeKind::Stack { data, sp } => {
            assert_eq!(*sp, 3);
            assert_eq!(&data[..3], &[1, 2, 3]);
        }
        other => panic!("expected a stack node, found {other:?}"),
    }

    // Rewire the compute node to drain the stack; values come back LIFO.
    tis.load_source(Cursor::new(b"@0\nMOV RIGHT DOWN\n".to_vec()))
        .expect("replacement program failed to parse");
    let out = capture(&mut tis, 0, IoKind::Numeric, 10);
    assert_eq!(tis.run(Some(100)), RunOutcome::Quiescent);
    assert_eq!(out.contents(), b"3\n2\n1\n");
}

#[test]
fn an_empty_grid_is_quiescent_on_the_first_tick() {
    let mut tis = grid("1 1 C", "");
    assert!(tis.tick());
}

#[test]
fn hcf_stops_everything_immediately() {
    let mut tis = grid("1 1 C", "@0\nHCF\n");
    assert_eq!(tis.run(None), RunOutcome::Halted);
}

#[test]
fn a_label_may_share_its_name_with_an_opcode() {
    let mut tis = grid("1 1 C", "@0\nJMP:MOV 1 DOWN\nJMP JMP\n");
    let out = capture(&mut tis, 0, IoKind::Numeric, 10);

    assert_eq!(tis.run(Some(9)), RunOutcome::CycleLimit);
    let contents = out.contents();
    assert!(contents.starts_with(b"1\n"), "got {contents:?}");
    assert!(contents.chunks(2).all(|chunk| chunk == b"1\n"));
}

#[test]
fn an_any_write_goes_to_the_first_reader_in_visit_order() {
    let mut tis = grid(
        "1 3 C C C",
        "@0\nMOV RIGHT DOWN\n@1\nMOV 7 ANY\n@2\nMOV LEFT DOWN\n",
    );
    let left_out = capture(&mut tis, 0, IoKind::Numeric, 10);
    let right_out = capture(&mut tis, 2, IoKind::Numeric, 10);

    assert_eq!(tis.run(Some(12)), RunOutcome::CycleLimit);
    assert!(left_out.contents().starts_with(b"7\n"));
    assert_eq!(right_out.contents(), b"");
    // The word left the writer through its left port.
    assert_eq!(tis.node(0, 1).last, Some(Register::LEFT));
}

#[test]
fn a_zero_row_grid_pipes_input_straight_to_output() {
    let mut tis = Tis::from_layout("0 1").expect("layout failed to parse");
    feed(&mut tis, 0, IoKind::Ascii, "hello");
    let out = capture(&mut tis, 0, IoKind::Ascii, -1);

    assert_eq!(tis.run(Some(1000)), RunOutcome::Quiescent);
    assert_eq!(out.contents(), b"hello");
}

#[test]
fn a_move_from_a_dry_input_blocks_but_still_quiesces() {
    let mut tis = grid("1 1 C", "@0\nMOV UP DOWN\n");
    feed(&mut tis, 0, IoKind::Ascii, "");
    let out = capture(&mut tis, 0, IoKind::Ascii, -1);

    assert_eq!(tis.run(Some(50)), RunOutcome::Quiescent);
    assert_eq!(out.contents(), b"");
}

#[test]
fn damaged_nodes_are_permanent_walls() {
    let mut tis = grid("1 2 C D", "@0\nMOV RIGHT DOWN\n");
    assert_eq!(tis.run(Some(50)), RunOutcome::Quiescent);
}

#[test]
fn ascii_output_emits_words_modulo_256() {
    let mut tis = grid("1 1 C", "@0\nMOV UP ACC\nMOV ACC DOWN\n");
    feed(&mut tis, 0, IoKind::Numeric, "327");
    let out = capture(&mut tis, 0, IoKind::Ascii, -1);

    assert_eq!(tis.run(Some(100)), RunOutcome::Quiescent);
    assert_eq!(out.contents(), vec![327u32 as u8]);
}

#[test]
fn the_title_comes_from_the_source_text() {
    let tis = grid("1 1 C", "@0\n## BLINKENLIGHTS\nNOP\n");
    assert_eq!(tis.name(), Some("BLINKENLIGHTS"));
}
