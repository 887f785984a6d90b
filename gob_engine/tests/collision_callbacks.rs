mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{assign, files_with, func_block, interpreter, ProgramBuilder};
use gob_engine::collision::{kind, CollisionArea};
use gob_engine::input::InputEvent;
use gob_engine::interp::WaitMode;
use gob_engine::{CallbackKind, ExecObserver, ScriptedHost};

#[derive(Default, Clone)]
struct Recorder {
    callbacks: Rc<RefCell<Vec<(CallbackKind, usize, Option<usize>)>>>,
    blocks: Rc<RefCell<Vec<usize>>>,
}

impl ExecObserver for Recorder {
    fn block_entered(&mut self, offset: usize) {
        self.blocks.borrow_mut().push(offset);
    }

    fn callback(&mut self, kind: CallbackKind, offset: usize, saved_ip: Option<usize>) {
        self.callbacks.borrow_mut().push((kind, offset, saved_ip));
    }
}

fn hotspot_program() -> Vec<u8> {
    ProgramBuilder::new(64)
        .place(0x68, &[0])
        .place(0x100, &func_block(&[assign(20, 1)]))
        .place(0x200, &func_block(&[assign(21, 1)]))
        .build()
}

#[test]
fn hover_runs_enter_and_leave_scripts_and_restores_the_ip() {
    let mut host = ScriptedHost::new();
    host.push(0, InputEvent::MouseMove { x: 20, y: 20 });
    host.push(20, InputEvent::MouseMove { x: 200, y: 100 });
    let mut interp = interpreter(files_with(&[("main.tot", hotspot_program())]), host);
    assert!(interp.load_program("main.tot").unwrap());
    let entry = interp.ip();
    assert_eq!(entry, Some(0x68));

    let recorder = Recorder::default();
    interp.set_observer(Box::new(recorder.clone()));
    interp
        .collisions_mut()
        .add(CollisionArea {
            id: kind::HOTSPOT | 1,
            left: 10,
            top: 10,
            right: 50,
            bottom: 50,
            flags: 0,
            key: 0x1234,
            func_enter: 0x100,
            func_leave: 0x200,
            func_sub: 0,
        })
        .unwrap();

    let result = interp
        .check_collisions(
            true,
            WaitMode::Timeout {
                ms: 50,
                keep_hover: false,
            },
        )
        .unwrap();

    assert_eq!(result.key, 0);
    assert_eq!(interp.ip(), entry);
    assert_eq!(
        *recorder.callbacks.borrow(),
        vec![
            (CallbackKind::Enter, 0x100, entry),
            (CallbackKind::Leave, 0x200, entry)
        ]
    );
    assert_eq!(*recorder.blocks.borrow(), vec![0x100, 0x200]);
    assert_eq!(interp.var(20), 1);
    assert_eq!(interp.var(21), 1);
}

#[test]
fn areas_without_hover_scripts_only_track_the_cursor() {
    let mut host = ScriptedHost::new();
    host.push(0, InputEvent::MouseMove { x: 20, y: 20 });
    let mut interp = interpreter(files_with(&[("main.tot", hotspot_program())]), host);
    assert!(interp.load_program("main.tot").unwrap());
    interp
        .collisions_mut()
        .add(CollisionArea {
            id: kind::CLICK | 2,
            left: 10,
            top: 10,
            right: 50,
            bottom: 50,
            key: 0x55,
            func_enter: 0x100,
            ..CollisionArea::EMPTY
        })
        .unwrap();

    let result = interp.check_collisions(true, WaitMode::Poll).unwrap();
    assert_eq!(result.key, 0);
    assert_eq!(interp.var(20), 0);
    assert_eq!(interp.ip(), Some(0x68));
}
