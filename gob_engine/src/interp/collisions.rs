use log::{debug, warn};

use super::{CallbackKind, Interpreter, Terminate};
use crate::collision::{kind, CollisionArea, Hit};
use crate::error::{EngineError, Result};
use crate::input::{keys, MouseButtons};

const POLL_MS: u32 = 10;
/// Key reported when a click arrives while the mouse is not handled.
const CLICK_WITHOUT_MOUSE: u16 = 3;

/// How long `check_collisions` waits for input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// One pass over the input state.
    Poll,
    Forever,
    /// Give up after `ms`; `keep_hover` keeps the hotspot tracked by the
    /// previous call instead of starting over.
    Timeout { ms: u32, keep_hover: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollisionResult {
    /// Key code, area key of a clicked area, or 0 on timeout.
    pub key: u16,
    pub hit: Hit,
}

impl CollisionResult {
    const NONE: CollisionResult = CollisionResult {
        key: 0,
        hit: Hit::NONE,
    };
}

/// One text-input field of a collisions block.
#[derive(Debug, Clone, Copy)]
struct InputField {
    id: u16,
    var_offset: usize,
    max_len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Handler {
    id: u16,
    key: u16,
    offset: usize,
}

impl Interpreter {
    /// Hit-tests the live areas at the current mouse position.
    pub fn check_mouse_point(&self, all: bool) -> Hit {
        self.collisions.find_at(
            all,
            self.mouse.mouse_x,
            self.mouse.mouse_y,
            self.mouse.buttons,
            self.rules.escape_on_unmatched_click,
        )
    }

    /// Polls the host, returning a pending key (0 if none) and refreshing
    /// the mouse state.
    pub(crate) fn check_keys(&mut self) -> u16 {
        let mut state = self.host.poll_input();
        if state.buttons == MouseButtons::all() {
            state.buttons = MouseButtons::empty();
        }
        self.mouse = state;
        if self.rules.viewport_shift {
            self.video.shift_viewport(
                state.mouse_x,
                state.mouse_y,
                self.rules.screen_width,
                self.rules.screen_height,
            );
        }
        self.host.take_key().unwrap_or(0)
    }

    /// Runs the enter or leave script of area `index` with the instruction
    /// pointer redirected for the duration.
    fn hover_callback(&mut self, index: usize, callback: CallbackKind) -> Result<()> {
        let Some(area) = self.collisions.area(index).copied() else {
            return Ok(());
        };
        if !area.is_trackable() {
            return Ok(());
        }
        let offset = match callback {
            CallbackKind::Enter => area.func_enter,
            _ => area.func_leave,
        };
        if offset == 0 {
            return Ok(());
        }
        debug!("{callback:?} callback of {:#06x} at {offset:#06x}", area.id);
        let saved = self.ip;
        self.notify(|observer| observer.callback(callback, offset as usize, saved));
        self.coll_sub(offset)
    }

    /// Runs a collision callback: collisions the callback's own blocks add
    /// are pushed and popped around it, then dynamic areas are refreshed.
    pub fn coll_sub(&mut self, offset: u16) -> Result<()> {
        let saved = self.ip;
        self.ip = Some(offset as usize);
        self.should_push_colls = true;
        let result = self.func_block(0);
        self.should_push_colls = false;
        self.ip = saved;
        result?;
        self.set_collisions()
    }

    /// Re-evaluates the coordinate expressions of every dynamic area.
    pub fn set_collisions(&mut self) -> Result<()> {
        let dynamic: Vec<(usize, u16)> = self
            .collisions
            .live()
            .filter(|(_, area)| area.is_dynamic())
            .map(|(index, area)| (index, area.func_sub))
            .collect();
        if dynamic.is_empty() {
            return Ok(());
        }
        let saved = self.ip;
        let result = self.refresh_areas(&dynamic);
        self.ip = saved;
        result
    }

    fn refresh_areas(&mut self, dynamic: &[(usize, u16)]) -> Result<()> {
        for &(index, func_sub) in dynamic {
            self.ip = Some(func_sub as usize);
            let left = self.eval_value()? as i16;
            let top = self.eval_value()? as i16;
            let width = self.eval_value()? as i16;
            let height = self.eval_value()? as i16;
            if let Some(area) = self.collisions.area_mut(index) {
                area.left = left;
                area.top = top;
                area.right = left.wrapping_add(width).wrapping_sub(1);
                area.bottom = top.wrapping_add(height).wrapping_sub(1);
            }
        }
        Ok(())
    }

    fn leave_hover(&mut self) -> Result<()> {
        let last = std::mem::replace(&mut self.last_hover, Hit::NONE);
        if last.key != 0 {
            self.hover_callback(last.index, CallbackKind::Leave)?;
        }
        Ok(())
    }

    fn enter_hover(&mut self, hit: Hit) -> Result<()> {
        self.last_hover = hit;
        if hit.key != 0 {
            self.hover_callback(hit.index, CallbackKind::Enter)?;
        }
        Ok(())
    }

    fn wait_mouse_release(&mut self) {
        while !self.mouse.buttons.is_empty() && self.terminate == Terminate::Running {
            self.delay(POLL_MS);
            self.mouse = self.host.poll_input();
        }
    }

    /// Waits for a key or a click, running hover callbacks as the cursor
    /// crosses hotspots. A click returns the area's key and the hit.
    pub fn check_collisions(&mut self, handle_mouse: bool, wait: WaitMode) -> Result<CollisionResult> {
        let keep_hover = matches!(
            wait,
            WaitMode::Timeout {
                keep_hover: true,
                ..
            }
        );
        if !keep_hover {
            self.last_hover = Hit::NONE;
        }
        let start = self.host.now_ms();
        if handle_mouse && self.last_hover.key == 0 {
            self.mouse = self.host.poll_input();
            let hit = self.check_mouse_point(true);
            self.enter_hover(hit)?;
            self.cursor = (self.mouse.mouse_x, self.mouse.mouse_y);
        }

        loop {
            if self.terminate != Terminate::Running {
                return Ok(CollisionResult::NONE);
            }
            if self.host.quit_requested() {
                self.terminate = Terminate::Abort;
                return Ok(CollisionResult::NONE);
            }

            let mut key = self.check_keys();
            if !handle_mouse && !self.mouse.buttons.is_empty() {
                self.wait_mouse_release();
                key = CLICK_WITHOUT_MOUSE;
            }
            if key != 0 {
                if handle_mouse {
                    self.leave_hover()?;
                }
                return Ok(CollisionResult {
                    key,
                    hit: Hit::NONE,
                });
            }

            if handle_mouse {
                if !self.mouse.buttons.is_empty() {
                    let hit = self.check_mouse_point(false);
                    self.wait_mouse_release();
                    if hit.key != 0 || hit.id != 0 {
                        self.leave_hover()?;
                        debug!("click on {:#06x} key {:#x}", hit.id, hit.key);
                        return Ok(CollisionResult { key: hit.key, hit });
                    }
                } else if (self.mouse.mouse_x, self.mouse.mouse_y) != self.cursor {
                    self.cursor = (self.mouse.mouse_x, self.mouse.mouse_y);
                    let hit = self.check_mouse_point(true);
                    if hit.key != self.last_hover.key {
                        self.leave_hover()?;
                        self.enter_hover(hit)?;
                    } else {
                        self.last_hover = hit;
                    }
                }
            }

            match wait {
                WaitMode::Poll => return Ok(CollisionResult::NONE),
                WaitMode::Timeout { ms, .. } if self.host.now_ms().wrapping_sub(start) >= ms => {
                    if handle_mouse {
                        self.leave_hover()?;
                    }
                    return Ok(CollisionResult::NONE);
                }
                _ => {}
            }

            if let Some((dir, low, high)) = self.anim_pal {
                self.video.rotate_palette(dir, low, high);
            }
            self.delay(POLL_MS);
        }
    }

    /// Parses and runs a `[2]` collisions block: areas are declared, input
    /// is awaited, the matching handler runs, and the block's areas are
    /// dropped again.
    pub(crate) fn collisions_block(&mut self) -> Result<()> {
        let start = self.pos()?;
        self.ip = Some(start + 1);
        let count = self.read_u8()?;
        let handle_mouse = self.read_u8()? != 0;
        let delta = self.read_u8()?;
        let desc_index2 = self.read_u8()? as usize;
        let stack_pos2 = self.read_u8()? as usize;
        let desc_index = self.read_u8()? as usize;

        let pushed = std::mem::take(&mut self.should_push_colls);
        let pushed = pushed
            && match self.collisions.push(true) {
                Ok(()) => true,
                Err(err) => {
                    warn!("collisionsBlock: {err}");
                    false
                }
            };

        let mut added = Vec::new();
        let mut handlers = Vec::new();
        let mut fields = Vec::new();
        let mut timeout_handler = None;
        let mut default_handler = None;

        for index in 0..count as u16 {
            let cmd_at = self.pos()?;
            let raw = self.read_u8()?;
            if raw & 0x40 != 0 {
                self.read_u8()?;
            }
            let cmd = raw & 0x3F;
            let func_sub = if raw & 0x80 != 0 {
                self.pos()? as u16
            } else {
                0
            };
            let (left, top, width, height) = if raw & 0x80 != 0 {
                (
                    self.eval_value()? as i16,
                    self.eval_value()? as i16,
                    self.eval_value()? as i16,
                    self.eval_value()? as i16,
                )
            } else {
                (
                    self.read_i16()?,
                    self.read_i16()?,
                    self.read_i16()?,
                    self.read_i16()?,
                )
            };
            let mut area = CollisionArea {
                left,
                top,
                right: left.wrapping_add(width).wrapping_sub(1),
                bottom: top.wrapping_add(height).wrapping_sub(1),
                func_sub,
                ..CollisionArea::EMPTY
            };
            match cmd {
                0 => {
                    area.id = kind::HOTSPOT | index;
                    area.key = area.id;
                    area.flags = self.read_u16()?;
                    area.func_enter = self.pos()? as u16;
                    self.skip_block()?;
                    area.func_leave = self.pos()? as u16;
                    self.skip_block()?;
                }
                1 | 2 => {
                    area.id = kind::CLICK | index;
                    area.key = self.read_u16()?;
                    area.flags = self.read_u16()?;
                    handlers.push(Handler {
                        id: area.id,
                        key: area.key,
                        offset: self.pos()?,
                    });
                    self.skip_block()?;
                }
                3..=10 => {
                    area.id = kind::INPUT | index;
                    let var = self.read_u16()? as usize;
                    let max_len = self.read_u8()? as usize;
                    let _font = self.read_u8()?;
                    let _colors = self.read_u8()?;
                    area.key = self.read_u16()?;
                    fields.push(InputField {
                        id: area.id,
                        var_offset: var * 4,
                        max_len,
                    });
                }
                11 | 12 => {
                    area.id = kind::MENU | index;
                    area.key = self.read_u16()?;
                    handlers.push(Handler {
                        id: area.id,
                        key: area.key,
                        offset: self.pos()?,
                    });
                    self.skip_block()?;
                }
                20 => {
                    timeout_handler = Some(self.pos()?);
                    self.skip_block()?;
                    continue;
                }
                21 => {
                    default_handler = Some(self.pos()?);
                    self.skip_block()?;
                    continue;
                }
                other => {
                    return Err(EngineError::malformed(
                        cmd_at,
                        format!("unknown collision command {other}"),
                    ))
                }
            }
            match self.collisions.add(area) {
                Ok(_) => added.push(area.id),
                Err(err) => warn!("collisionsBlock: {err}"),
            }
        }
        let end = self.pos()?;

        let wait = match delta {
            0 => WaitMode::Forever,
            seconds => WaitMode::Timeout {
                ms: seconds as u32 * 1000,
                keep_hover: false,
            },
        };
        let (result, field) = if fields.is_empty() {
            (self.check_collisions(handle_mouse, wait)?, 0)
        } else {
            self.edit_fields(&fields, &handlers, handle_mouse, wait)?
        };

        let (handler, callback) = if self.terminate != Terminate::Running {
            (None, CallbackKind::Handler)
        } else if result.key == 0 && result.hit.id == 0 {
            (timeout_handler, CallbackKind::Timeout)
        } else {
            let matched = handlers
                .iter()
                .find(|h| {
                    if result.hit.id != 0 {
                        h.id == result.hit.id
                    } else {
                        h.key == result.key
                    }
                })
                .map(|h| h.offset);
            (matched.or(default_handler), CallbackKind::Handler)
        };
        debug!(
            "collisionsBlock at {start:#06x}: key {:#x} area {:#06x} field {field}",
            result.key, result.hit.id
        );
        self.set_var(desc_index, result.key as i32);
        self.set_var(desc_index2, result.hit.id as i32);
        self.set_var(stack_pos2, field as i32);

        for id in added {
            self.collisions.free(id);
        }
        if pushed {
            self.collisions.pop();
        }
        self.ip = Some(end);
        if let Some(offset) = handler {
            self.notify(|observer| observer.callback(callback, offset, Some(end)));
            self.run_block_at(offset, 0)?;
            self.ip = Some(end);
        }
        Ok(())
    }

    /// Input-field editing: printable keys append to the current field,
    /// Backspace deletes, Tab/Down/Enter move on (Enter on the last field
    /// accepts), Up moves back, Escape leaves. Keys bound to a handler and
    /// clicks on other areas also end editing.
    fn edit_fields(
        &mut self,
        fields: &[InputField],
        handlers: &[Handler],
        handle_mouse: bool,
        wait: WaitMode,
    ) -> Result<(CollisionResult, usize)> {
        let mut current = 0;
        loop {
            let result = self.check_collisions(handle_mouse, wait)?;
            if self.terminate != Terminate::Running {
                return Ok((CollisionResult::NONE, current));
            }
            if result.hit.id != 0 {
                if let Some(index) = fields.iter().position(|f| f.id == result.hit.id) {
                    current = index;
                    continue;
                }
                return Ok((result, current));
            }
            let field = fields[current];
            match result.key {
                0 | keys::ESCAPE => return Ok((result, current)),
                keys::ENTER if current + 1 == fields.len() => return Ok((result, current)),
                keys::ENTER | keys::TAB | keys::DOWN => current = (current + 1) % fields.len(),
                keys::UP => current = (current + fields.len() - 1) % fields.len(),
                keys::BACKSPACE => {
                    let mut text = self.field_text(field);
                    text.pop();
                    self.set_field_text(field, text);
                }
                key if handlers.iter().any(|h| h.key == key) => return Ok((result, current)),
                key => {
                    let ch = (key & 0xFF) as u8;
                    if (0x20..0x7F).contains(&ch) {
                        let mut text = self.field_text(field);
                        if text.len() < field.max_len {
                            text.push(ch);
                            self.set_field_text(field, text);
                        }
                    }
                }
            }
        }
    }

    fn field_text(&self, field: InputField) -> Vec<u8> {
        self.variables()
            .map(|table| table.borrow().read_str(field.var_offset))
            .unwrap_or_default()
    }

    fn set_field_text(&mut self, field: InputField, text: Vec<u8>) {
        if let Some(table) = self.variables() {
            table.borrow_mut().write_str(field.var_offset, &text);
        }
    }
}
