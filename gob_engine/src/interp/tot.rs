//! Program loading and the context stack: running a program to
//! completion, chaining to the next one, and nesting sub-programs.

use gob_formats::tot::function_offset;
use log::{debug, error, info, warn};

use super::{Interpreter, Terminate};
use crate::collision::Hit;
use crate::context::{ProgramContext, VariableSlot};
use crate::error::Result;
use crate::variables::{slots, Variables};

const VIDEO_MODE_VGA: i32 = 0x13;

/// `intro` becomes `intro.tot`; names with an extension are kept.
pub fn program_file_name(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{name}.tot")
    }
}

impl Interpreter {
    /// Runs `program` and whatever it chains to, until nothing is left to
    /// load or the run is aborted.
    pub fn run(&mut self, program: &str) -> Result<()> {
        self.tot_to_load = Some(program_file_name(program));
        self.play_tot(0)
    }

    /// Loads `name` as the active program. Returns `false` when no file of
    /// that name exists.
    pub fn load_program(&mut self, name: &str) -> Result<bool> {
        let Some(data) = self.files.read(name)? else {
            return Ok(false);
        };
        let context = ProgramContext::load(name, data, &self.files)?;
        if self.vars.is_none() {
            let count = context.header.variable_count as usize;
            self.vars = Some(VariableSlot::Owned(Variables::shared(count)));
        }
        self.ip = Some(context.header.entry_point as usize);
        self.start_time = self.host.now_ms();
        let depth = self.stack.len();
        info!("loaded {name} (depth {depth}, entry {:#06x})", context.header.entry_point);
        self.notify(|observer| observer.program_loaded(name, depth));
        self.context = Some(context);
        Ok(true)
    }

    /// With `skip_play > 0`, runs that function of the active program once.
    /// Otherwise loads and runs programs until none is chained; `-1` keeps
    /// the caller's per-program state instead of resetting it.
    pub fn play_tot(&mut self, skip_play: i16) -> Result<()> {
        if skip_play > 0 {
            let code = self.code()?;
            let offset = function_offset(&code, skip_play as u16)? as usize;
            let saved = self.ip;
            self.ip = Some(offset);
            let result = self.call_sub(2);
            self.ip = saved;
            if self.terminate != Terminate::Running {
                self.terminate = Terminate::Abort;
            }
            return result;
        }

        let fresh = skip_play != -1;
        loop {
            if self.terminate == Terminate::Abort {
                break;
            }
            let name = match self.tot_to_load.take() {
                Some(name) => name,
                None => match &self.context {
                    Some(context) => context.name.clone(),
                    None => break,
                },
            };
            if fresh {
                self.reset_program_state();
            }
            match self.load_program(&name) {
                Ok(true) => {}
                Ok(false) => {
                    warn!("program {name} not found");
                    break;
                }
                Err(err) => {
                    error!("loading {name}: {err}");
                    break;
                }
            }

            self.renew_time_in_vars();
            self.set_var(slots::USE_MOUSE, 1);
            self.set_var(slots::SOUND_FLAGS, self.sound_flags);
            self.set_var(slots::VIDEO_MODE, VIDEO_MODE_VGA);
            self.set_var(slots::LANGUAGE, 0);

            if let Err(err) = self.call_sub(2) {
                error!("{name} aborted: {err}");
            }
            if self.tot_to_load.is_some() && self.terminate == Terminate::Requested {
                self.terminate = Terminate::Running;
            }
            if fresh {
                self.tear_down_program();
            }
            self.context = None;
            self.ip = None;
            match &self.tot_to_load {
                Some(next) => debug!("{name} chains to {next}"),
                None => break,
            }
        }
        Ok(())
    }

    fn reset_program_state(&mut self) {
        self.brk = false;
        self.break_from_level = -1;
        self.nest_level = 0;
        self.collisions.clear();
        self.free_mult_keys();
        self.free_mult();
        self.video.free_sprites();
        self.sound.free_all();
        self.anim_pal = None;
        self.last_hover = Hit::NONE;
    }

    fn tear_down_program(&mut self) {
        while self.capture_count > 0 {
            self.video.capture_pop();
            self.capture_count -= 1;
        }
        self.free_mult_keys();
        self.free_mult();
        self.video.free_sprites();
        self.sound.free_all();
    }

    /// Runs program `name` nested inside the current one. Bit 0 of `flags`
    /// gives it a variable table of its own, bit 1 keeps the caller's
    /// per-program state.
    pub fn tot_sub(&mut self, flags: u8, name: &str) -> Result<()> {
        let Some(saved) = self.snapshot() else {
            warn!("totSub {name} with no active program");
            return Ok(());
        };
        self.stack.push(saved)?;
        debug!("totSub {name} (flags {flags:#04x}, depth {})", self.stack.len());

        self.vars = match &self.vars {
            Some(_) if flags & 1 != 0 => None,
            Some(slot) => Some(slot.borrowed()),
            None => None,
        };
        self.tot_to_load = Some(name.to_string());

        if self.terminate == Terminate::Running {
            let pushed = self.collisions.push(false);
            let result = self.play_tot(if flags & 2 != 0 { -1 } else { 0 });
            if self.terminate != Terminate::Abort {
                self.terminate = Terminate::Running;
            }
            if pushed.is_ok() {
                self.collisions.pop();
            }
            if let Err(err) = result {
                warn!("totSub {name}: {err}");
            }
        }
        self.tot_to_load = None;
        if let Some(saved) = self.stack.pop() {
            self.restore(saved);
        }
        Ok(())
    }

    /// Re-enters the context `index` levels up the stack (counting back
    /// from the one currently running), runs it, then comes back.
    pub fn switch_tot_sub(&mut self, index: i16, skip_play: i16) -> Result<()> {
        let len = self.stack.len() as i32;
        let cursor = self.stack.cursor() as i32;
        let index = index as i32;
        if len - index < 1 {
            return Ok(());
        }
        let target = cursor - index - i32::from(index >= 0);
        if target < 0 || target >= len {
            warn!("switchTotSub: no context at {target} (stack {len})");
            return Ok(());
        }
        let Some(current) = self.snapshot() else {
            return Ok(());
        };
        let (saved_cursor, saved_len) = (self.stack.cursor(), self.stack.len());
        if saved_cursor == saved_len {
            self.stack.push(current)?;
        } else if let Some(slot) = self.stack.get_mut(saved_cursor) {
            *slot = current;
        }
        let Some(entered) = self.stack.get(target as usize).cloned() else {
            return Ok(());
        };
        debug!("switchTotSub: {saved_cursor} -> {target}, skipPlay {skip_play}");
        self.stack.set_cursor(target as usize);
        self.restore(entered);

        let result = self.play_tot(skip_play);
        if self.terminate != Terminate::Abort {
            self.terminate = Terminate::Running;
        }

        let back = self.stack.get(saved_cursor).cloned();
        self.stack.truncate(saved_len);
        self.stack.set_cursor(saved_cursor);
        if let Some(back) = back {
            self.restore(back);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_names_get_the_program_extension() {
        assert_eq!(program_file_name("intro"), "intro.tot");
        assert_eq!(program_file_name("menu.tot"), "menu.tot");
    }
}
