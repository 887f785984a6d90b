mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{assign, files_with, func_block, interpreter, load_tot, ProgramBuilder};
use gob_engine::collision::CollisionArea;
use gob_engine::{DataCollection, ExecObserver, GameRules, Interpreter, ScriptedHost, Terminate};

/// `switchTotSub(index, skip_play)`.
fn switch_tot_sub(index: i16, skip_play: i16) -> Vec<u8> {
    let mut bytes = vec![0xF9];
    bytes.extend_from_slice(&index.to_le_bytes());
    bytes.extend_from_slice(&skip_play.to_le_bytes());
    bytes
}

/// Entry at 0x80; function 1 at 0xC0 sets var 50.
fn main_program() -> Vec<u8> {
    let mut function = func_block(&[assign(50, 5)]);
    function.push(0);
    ProgramBuilder::new(128)
        .place(0x68, &0xC0u16.to_le_bytes())
        .place(0x80, &[0])
        .place(0xC0, &function)
        .entry(0x80)
        .build()
}

fn program(ops: &[Vec<u8>]) -> Vec<u8> {
    let mut code = func_block(ops);
    code.push(0);
    ProgramBuilder::new(128).place(0x68, &code).build()
}

fn game(sub_ops: &[Vec<u8>]) -> DataCollection {
    files_with(&[("main.tot", main_program()), ("sub.tot", program(sub_ops))])
}

fn marker_area() -> CollisionArea {
    CollisionArea {
        id: 5,
        left: 0,
        top: 0,
        right: 9,
        bottom: 9,
        key: 0x20,
        ..CollisionArea::EMPTY
    }
}

#[test]
fn sub_program_returns_to_the_identical_context() {
    let mut interp = interpreter(game(&[assign(30, 7)]), ScriptedHost::new());
    assert!(interp.load_program("main.tot").unwrap());
    interp.collisions_mut().add(marker_area()).unwrap();
    let before = interp.snapshot().unwrap();
    let areas = interp.collisions().areas().to_vec();

    interp.tot_sub(0, "sub.tot").unwrap();

    let after = interp.snapshot().unwrap();
    assert!(before.same_as(&after));
    assert!(interp.stack().is_empty());
    assert_eq!(interp.collisions().areas(), areas.as_slice());
    assert_eq!(interp.terminate(), Terminate::Running);
    // the sub-program shared the caller's table
    assert_eq!(interp.var(30), 7);
}

#[test]
fn own_variables_stay_with_the_sub_program() {
    let mut interp = interpreter(game(&[assign(30, 7)]), ScriptedHost::new());
    assert!(interp.load_program("main.tot").unwrap());
    let before = interp.snapshot().unwrap();

    interp.tot_sub(1, "sub.tot").unwrap();

    assert!(before.same_as(&interp.snapshot().unwrap()));
    assert_eq!(interp.var(30), 0);
}

#[test]
fn switch_re_enters_the_caller_and_comes_back() {
    let sub = [switch_tot_sub(0, 1), assign(51, 6)];
    let mut interp = interpreter(game(&sub), ScriptedHost::new());
    assert!(interp.load_program("main.tot").unwrap());
    let before = interp.snapshot().unwrap();

    interp.tot_sub(0, "sub.tot").unwrap();

    assert_eq!(interp.var(50), 5);
    assert_eq!(interp.var(51), 6);
    assert!(interp.stack().is_empty());
    assert!(before.same_as(&interp.snapshot().unwrap()));
}

#[test]
fn full_stack_rejects_the_call_and_keeps_the_context() {
    let rules = GameRules {
        backup_depth: 0,
        ..GameRules::v1()
    };
    let mut interp = Interpreter::new(
        rules,
        game(&[assign(30, 7)]),
        Box::new(ScriptedHost::new()),
    );
    assert!(interp.load_program("main.tot").unwrap());
    let before = interp.snapshot().unwrap();

    let err = interp.tot_sub(0, "sub.tot").unwrap_err();
    assert!(err.is_recoverable());
    assert!(before.same_as(&interp.snapshot().unwrap()));
    assert_eq!(interp.var(30), 0);
}

#[derive(Default, Clone)]
struct Loads(Rc<RefCell<Vec<(String, usize)>>>);

impl ExecObserver for Loads {
    fn program_loaded(&mut self, name: &str, depth: usize) {
        self.0.borrow_mut().push((name.to_string(), depth));
    }
}

#[test]
fn load_tot_chains_to_the_next_program() {
    let files = files_with(&[
        ("main.tot", program(&[load_tot("next")])),
        ("next.tot", program(&[assign(40, 9)])),
    ]);
    let mut interp = interpreter(files, ScriptedHost::new());
    let loads = Loads::default();
    interp.set_observer(Box::new(loads.clone()));

    interp.run("main").unwrap();

    assert_eq!(
        *loads.0.borrow(),
        vec![("main.tot".to_string(), 0), ("next.tot".to_string(), 0)]
    );
    assert_eq!(interp.var(40), 9);
    assert!(interp.context().is_none());
    assert_eq!(interp.terminate(), Terminate::Running);
}

#[test]
fn missing_program_ends_the_run_quietly() {
    let mut interp = interpreter(game(&[]), ScriptedHost::new());
    interp.run("nowhere").unwrap();
    assert!(interp.context().is_none());
}
