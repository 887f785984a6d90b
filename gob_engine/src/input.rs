use std::collections::VecDeque;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
    pub struct MouseButtons: u8 {
        const LEFT = 0x01;
        const RIGHT = 0x02;
    }
}

/// BIOS-style key words as scripts see them (scan code high, ASCII low).
pub mod keys {
    pub const ESCAPE: u16 = 0x011B;
    pub const ENTER: u16 = 0x1C0D;
    pub const BACKSPACE: u16 = 0x0E08;
    pub const TAB: u16 = 0x0F09;
    pub const UP: u16 = 0x4800;
    pub const DOWN: u16 = 0x5000;
    pub const LEFT: u16 = 0x4B00;
    pub const RIGHT: u16 = 0x4D00;
    pub const DELETE: u16 = 0x5300;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputState {
    pub mouse_x: i16,
    pub mouse_y: i16,
    pub buttons: MouseButtons,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WallClock {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

/// Everything the interpreter needs from the outside world. Waiting is
/// expressed as `sleep_ms`, so a host may run on virtual time.
pub trait Host {
    fn now_ms(&self) -> u32;

    fn sleep_ms(&mut self, ms: u32);

    fn poll_input(&mut self) -> InputState;

    fn take_key(&mut self) -> Option<u16>;

    fn set_mouse_pos(&mut self, x: i16, y: i16);

    fn wall_clock(&self) -> WallClock {
        WallClock::default()
    }

    fn quit_requested(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputEvent {
    MouseMove { x: i16, y: i16 },
    MouseDown { buttons: MouseButtons },
    MouseUp,
    Key { code: u16 },
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedInput {
    pub at_ms: u32,
    pub event: InputEvent,
}

/// Replays a fixed list of input events against a manual clock. Once the
/// clock passes `max_ms` the host asks the interpreter to quit.
#[derive(Debug, Clone)]
pub struct ScriptedHost {
    now: u32,
    max_ms: Option<u32>,
    pending: VecDeque<TimedInput>,
    state: InputState,
    keys: VecDeque<u16>,
    quit: bool,
    clock: WallClock,
}

impl ScriptedHost {
    pub fn new() -> Self {
        ScriptedHost {
            now: 0,
            max_ms: None,
            pending: VecDeque::new(),
            state: InputState::default(),
            keys: VecDeque::new(),
            quit: false,
            clock: WallClock {
                year: 1991,
                month: 1,
                day: 1,
                hour: 12,
                minute: 0,
                second: 0,
            },
        }
    }

    pub fn with_budget(mut self, max_ms: u32) -> Self {
        self.max_ms = Some(max_ms);
        self
    }

    pub fn with_clock(mut self, clock: WallClock) -> Self {
        self.clock = clock;
        self
    }

    /// Events must be queued in time order.
    pub fn push(&mut self, at_ms: u32, event: InputEvent) {
        self.pending.push_back(TimedInput { at_ms, event });
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn deliver_due(&mut self) {
        while let Some(next) = self.pending.front().copied() {
            if next.at_ms > self.now {
                break;
            }
            self.pending.pop_front();
            match next.event {
                InputEvent::MouseMove { x, y } => {
                    self.state.mouse_x = x;
                    self.state.mouse_y = y;
                }
                InputEvent::MouseDown { buttons } => self.state.buttons = buttons,
                InputEvent::MouseUp => self.state.buttons = MouseButtons::empty(),
                InputEvent::Key { code } => self.keys.push_back(code),
                InputEvent::Quit => self.quit = true,
            }
        }
    }
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for ScriptedHost {
    fn now_ms(&self) -> u32 {
        self.now
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.now = self.now.saturating_add(ms);
        self.deliver_due();
    }

    fn poll_input(&mut self) -> InputState {
        self.deliver_due();
        self.state
    }

    fn take_key(&mut self) -> Option<u16> {
        self.deliver_due();
        self.keys.pop_front()
    }

    fn set_mouse_pos(&mut self, x: i16, y: i16) {
        self.state.mouse_x = x;
        self.state.mouse_y = y;
    }

    fn wall_clock(&self) -> WallClock {
        self.clock
    }

    fn quit_requested(&self) -> bool {
        self.quit || self.max_ms.is_some_and(|max| self.now >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_when_the_clock_reaches_them() {
        let mut host = ScriptedHost::new().with_budget(500);
        host.push(0, InputEvent::MouseMove { x: 10, y: 20 });
        host.push(100, InputEvent::MouseDown { buttons: MouseButtons::LEFT });
        host.push(100, InputEvent::Key { code: keys::ENTER });

        let state = host.poll_input();
        assert_eq!((state.mouse_x, state.mouse_y), (10, 20));
        assert!(state.buttons.is_empty());
        assert_eq!(host.take_key(), None);

        host.sleep_ms(100);
        assert_eq!(host.poll_input().buttons, MouseButtons::LEFT);
        assert_eq!(host.take_key(), Some(keys::ENTER));
        assert!(!host.quit_requested());

        host.sleep_ms(400);
        assert!(host.quit_requested());
    }

    #[test]
    fn scripted_input_reads_from_json() {
        let json = r#"[
            {"at_ms": 0, "event": {"kind": "mouse_move", "x": 4, "y": 8}},
            {"at_ms": 40, "event": {"kind": "mouse_down", "buttons": "LEFT | RIGHT"}},
            {"at_ms": 90, "event": {"kind": "quit"}}
        ]"#;
        let inputs: Vec<TimedInput> = serde_json::from_str(json).unwrap();
        assert_eq!(
            inputs[1].event,
            InputEvent::MouseDown {
                buttons: MouseButtons::LEFT | MouseButtons::RIGHT
            }
        );

        let text = serde_json::to_string(&inputs).unwrap();
        let back: Vec<TimedInput> = serde_json::from_str(&text).unwrap();
        assert_eq!(back, inputs);
    }
}
