//! The bytecode interpreter: block execution, control flow, and the state
//! every opcode works against.

mod collisions;
mod opcodes;
mod tot;

use std::rc::Rc;
use std::sync::Arc;

use gob_formats::reader::{read_i16_le_at, read_u16_le_at, read_u8_at};
use log::{debug, trace, warn};
use rand::SeedableRng;
use rand_pcg::Pcg32;
use serde::Serialize;

use crate::collision::{Collisions, Hit};
use crate::config::GameRules;
use crate::context::{ContextSnapshot, ContextStack, ProgramContext, VariableSlot};
use crate::data_io::DataCollection;
use crate::error::{EngineError, Result};
use crate::expr::{ExprReader, Value, VarRef};
use crate::input::{Host, InputState};
use crate::mult::MultState;
use crate::sound::SoundSystem;
use crate::variables::{slots, SharedVariables};
use crate::video::Video;

pub use collisions::{CollisionResult, WaitMode};
pub use opcodes::Opcode;
pub use tot::program_file_name;

/// Run state shared by every nesting level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminate {
    Running,
    /// Leave the current program (chaining or returning from a sub-program).
    Requested,
    /// Unwind everything.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    Enter,
    Leave,
    Handler,
    Timeout,
}

/// Hooks for watching execution without touching it.
pub trait ExecObserver {
    fn block_entered(&mut self, _offset: usize) {}

    fn opcode(&mut self, _offset: usize, _opcode: u8) {}

    fn callback(&mut self, _kind: CallbackKind, _offset: usize, _saved_ip: Option<usize>) {}

    fn program_loaded(&mut self, _name: &str, _depth: usize) {}
}

/// Per-block bookkeeping: opcodes can reset the counter (`setcmdCount`)
/// and compare it against the count to detect tail calls.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FuncParams {
    pub cmd_count: u8,
    pub counter: u8,
    pub ret_flag: i16,
}

impl FuncParams {
    pub fn is_tail(&self) -> bool {
        self.counter == self.cmd_count && self.ret_flag == 2
    }
}

pub struct Interpreter {
    pub(crate) rules: GameRules,
    pub(crate) files: DataCollection,
    pub(crate) host: Box<dyn Host>,
    pub(crate) context: Option<ProgramContext>,
    pub(crate) vars: Option<VariableSlot>,
    pub(crate) ip: Option<usize>,
    pub(crate) stack: ContextStack,
    pub(crate) collisions: Collisions,
    pub(crate) video: Video,
    pub(crate) sound: SoundSystem,
    pub(crate) mult: MultState,
    pub(crate) terminate: Terminate,
    pub(crate) brk: bool,
    pub(crate) break_from_level: i16,
    pub(crate) nest_level: i16,
    pub(crate) tot_to_load: Option<String>,
    pub(crate) rng: Pcg32,
    pub(crate) start_time: u32,
    pub(crate) should_push_colls: bool,
    pub(crate) mouse: InputState,
    pub(crate) cursor: (i16, i16),
    pub(crate) last_hover: Hit,
    pub(crate) anim_pal: Option<(i16, i16, i16)>,
    pub(crate) capture_count: u16,
    pub(crate) sound_flags: i32,
    observer: Option<Box<dyn ExecObserver>>,
}

impl Interpreter {
    pub fn new(rules: GameRules, files: DataCollection, host: Box<dyn Host>) -> Self {
        let video = Video::new(
            rules.screen_width,
            rules.screen_height,
            rules.sprite_slots,
            rules.capture_stack_depth,
        );
        Interpreter {
            files,
            host,
            context: None,
            vars: None,
            ip: None,
            stack: ContextStack::new(rules.backup_depth),
            collisions: Collisions::new(rules.collision_capacity, rules.collision_stack_depth),
            video,
            sound: SoundSystem::new(rules.sound_slots, rules.output_rate),
            mult: MultState::default(),
            terminate: Terminate::Running,
            brk: false,
            break_from_level: -1,
            nest_level: 0,
            tot_to_load: None,
            rng: Pcg32::seed_from_u64(rules.random_seed),
            start_time: 0,
            should_push_colls: false,
            mouse: InputState::default(),
            cursor: (-1, -1),
            last_hover: Hit::NONE,
            anim_pal: None,
            capture_count: 0,
            sound_flags: 3,
            observer: None,
            rules,
        }
    }

    pub fn set_observer(&mut self, observer: Box<dyn ExecObserver>) {
        self.observer = Some(observer);
    }

    pub fn rules(&self) -> &GameRules {
        &self.rules
    }

    pub fn ip(&self) -> Option<usize> {
        self.ip
    }

    pub fn set_ip(&mut self, ip: Option<usize>) {
        self.ip = ip;
    }

    pub fn terminate(&self) -> Terminate {
        self.terminate
    }

    pub fn context(&self) -> Option<&ProgramContext> {
        self.context.as_ref()
    }

    pub fn stack(&self) -> &ContextStack {
        &self.stack
    }

    pub fn collisions(&self) -> &Collisions {
        &self.collisions
    }

    pub fn collisions_mut(&mut self) -> &mut Collisions {
        &mut self.collisions
    }

    pub fn video(&self) -> &Video {
        &self.video
    }

    pub fn video_mut(&mut self) -> &mut Video {
        &mut self.video
    }

    pub fn sound(&self) -> &SoundSystem {
        &self.sound
    }

    pub fn sound_mut(&mut self) -> &mut SoundSystem {
        &mut self.sound
    }

    pub fn mult(&self) -> &MultState {
        &self.mult
    }

    /// The active variable table, if a program has allocated one.
    pub fn variables(&self) -> Option<SharedVariables> {
        self.vars.as_ref().map(|slot| Rc::clone(slot.table()))
    }

    /// Sound flag word exposed to scripts as variable 14.
    pub fn set_sound_flags(&mut self, flags: i32) {
        self.sound_flags = flags;
    }

    /// Passive copy of the active context, for comparison after nested
    /// calls.
    pub fn snapshot(&self) -> Option<ContextSnapshot> {
        Some(ContextSnapshot {
            context: self.context.clone(),
            variables: self.vars.clone()?,
            ip: self.ip,
        })
    }

    pub(crate) fn restore(&mut self, snapshot: ContextSnapshot) {
        self.context = snapshot.context;
        self.vars = Some(snapshot.variables);
        self.ip = snapshot.ip;
    }

    pub(crate) fn notify(&mut self, f: impl FnOnce(&mut dyn ExecObserver)) {
        if let Some(observer) = self.observer.as_deref_mut() {
            f(observer);
        }
    }

    // --- byte stream helpers -------------------------------------------

    pub(crate) fn code(&self) -> Result<Arc<[u8]>> {
        self.context
            .as_ref()
            .map(|context| Arc::clone(&context.data))
            .ok_or_else(|| EngineError::malformed(0, "no program loaded"))
    }

    pub(crate) fn pos(&self) -> Result<usize> {
        self.ip
            .ok_or_else(|| EngineError::malformed(0, "instruction pointer is not set"))
    }

    pub(crate) fn anim_data_size(&self) -> u16 {
        self.context
            .as_ref()
            .map_or(0, |context| context.header.anim_data_size)
    }

    pub(crate) fn peek_u8(&self, ahead: usize) -> Result<u8> {
        let code = self.code()?;
        Ok(read_u8_at(&code, self.pos()? + ahead)?)
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        let code = self.code()?;
        let pos = self.pos()?;
        let value = read_u8_at(&code, pos)?;
        self.ip = Some(pos + 1);
        Ok(value)
    }

    pub(crate) fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        let code = self.code()?;
        let pos = self.pos()?;
        let value = read_u16_le_at(&code, pos)?;
        self.ip = Some(pos + 2);
        Ok(value)
    }

    pub(crate) fn read_i16(&mut self) -> Result<i16> {
        let code = self.code()?;
        let pos = self.pos()?;
        let value = read_i16_le_at(&code, pos)?;
        self.ip = Some(pos + 2);
        Ok(value)
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let code = self.code()?;
        let pos = self.pos()?;
        let bytes = code.get(pos..pos + len).ok_or_else(|| {
            EngineError::malformed(pos, format!("{len} operand bytes run past the program"))
        })?;
        self.ip = Some(pos + len);
        Ok(bytes.to_vec())
    }

    /// Skips the function block at the instruction pointer.
    pub(crate) fn skip_block(&mut self) -> Result<()> {
        let code = self.code()?;
        let pos = self.pos()?;
        let len = read_u16_le_at(&code, pos + 2)? as usize;
        self.ip = Some(pos + len + 2);
        Ok(())
    }

    fn table(&self) -> Result<SharedVariables> {
        self.variables()
            .ok_or_else(|| EngineError::malformed(self.ip.unwrap_or(0), "no variable table"))
    }

    fn with_expr<T>(&mut self, f: impl FnOnce(&mut ExprReader<'_>) -> Result<T>) -> Result<T> {
        let code = self.code()?;
        let pos = self.pos()?;
        let anim_data_size = self.anim_data_size();
        let table = self.table()?;
        let vars = table.borrow();
        let mut reader = ExprReader::new(&code, pos, &vars, &mut self.rng, anim_data_size);
        let value = f(&mut reader)?;
        let end = reader.position();
        self.ip = Some(end);
        Ok(value)
    }

    pub(crate) fn eval_expr(&mut self) -> Result<Value> {
        self.with_expr(|reader| reader.eval_expr())
    }

    pub(crate) fn eval_value(&mut self) -> Result<i32> {
        self.with_expr(|reader| reader.eval_value())
    }

    pub(crate) fn eval_bool(&mut self) -> Result<bool> {
        self.with_expr(|reader| reader.eval_bool())
    }

    pub(crate) fn var_ref(&mut self) -> Result<VarRef> {
        self.with_expr(|reader| reader.var_ref())
    }

    // --- variables -------------------------------------------------------

    pub fn var(&self, index: usize) -> i32 {
        self.variables().map_or(0, |table| table.borrow().var(index))
    }

    pub fn set_var(&mut self, index: usize, value: i32) {
        if let Some(table) = self.variables() {
            table.borrow_mut().set_var(index, value);
        }
    }

    pub(crate) fn read_ref(&self, var: VarRef) -> Value {
        self.variables()
            .map_or(Value::Int(0), |table| var.read(&table.borrow()))
    }

    pub(crate) fn write_ref(&mut self, var: VarRef, value: &Value) {
        if let Some(table) = self.variables() {
            var.write(&mut table.borrow_mut(), value);
        }
    }

    // --- execution -------------------------------------------------------

    /// Runs consecutive blocks from the instruction pointer until one of
    /// them clears it or a `0` block ends the sequence.
    pub fn call_sub(&mut self, ret_flag: i16) -> Result<()> {
        while self.terminate == Terminate::Running {
            let Some(pos) = self.ip else {
                break;
            };
            let code = self.code()?;
            match code.get(pos).copied() {
                Some(1) => self.func_block(ret_flag)?,
                Some(2) => self.collisions_block()?,
                Some(0) | None => {
                    self.ip = None;
                    break;
                }
                Some(other) => {
                    return Err(EngineError::malformed(
                        pos,
                        format!("unknown block type {other}"),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Executes one `[1][count][len]` function block. On return the
    /// instruction pointer is cleared, unless an opcode handed control on
    /// (tail call), in which case it points at the continuation.
    pub fn func_block(&mut self, ret_flag: i16) -> Result<()> {
        let Some(start) = self.ip else {
            return Ok(());
        };
        self.brk = false;
        self.ip = Some(start + 1);
        let cmd_count = self.read_u8()?;
        self.read_u16()?;
        if cmd_count == 0 {
            self.ip = None;
            return Ok(());
        }
        debug!("funcBlock at {start:#06x}: {cmd_count} commands, retFlag {ret_flag}");
        self.notify(|observer| observer.block_entered(start));

        let mut params = FuncParams {
            cmd_count,
            counter: 0,
            ret_flag,
        };
        loop {
            if self.terminate != Terminate::Running {
                break;
            }
            if self.host.quit_requested() {
                self.terminate = Terminate::Abort;
                break;
            }
            let at = self.pos()?;
            let byte = self.read_u8()?;
            let high = byte >> 4;
            let index = if high >= 12 {
                (16 - high) * 16 + (byte & 0x0F)
            } else {
                high
            };
            params.counter = params.counter.wrapping_add(1);
            trace!("{at:#06x}: opcode {byte:#04x} (index {index})");
            self.notify(|observer| observer.opcode(at, byte));

            if self.execute(byte, index, at, &mut params)? {
                return Ok(());
            }
            if self.brk {
                if params.ret_flag == 2 && self.break_from_level == -1 {
                    self.brk = false;
                }
                break;
            }
            if params.counter == params.cmd_count {
                break;
            }
        }
        self.ip = None;
        Ok(())
    }

    fn execute(&mut self, byte: u8, index: u8, at: usize, params: &mut FuncParams) -> Result<bool> {
        let Some(opcode) = Opcode::from_index(index) else {
            return Err(EngineError::UnknownOpcode { opcode: byte, offset: at });
        };
        match self.run_opcode(opcode, params) {
            Err(err) if err.is_recoverable() => {
                warn!("{} at {at:#06x}: {err}", opcode.name());
                Ok(false)
            }
            other => other,
        }
    }

    /// Runs the block at `offset` with the instruction pointer redirected,
    /// restoring it afterwards.
    pub(crate) fn run_block_at(&mut self, offset: usize, ret_flag: i16) -> Result<()> {
        let saved = self.ip;
        self.ip = Some(offset);
        let result = self.func_block(ret_flag);
        self.ip = saved;
        result
    }

    pub(crate) fn elapsed(&self) -> u32 {
        self.host.now_ms().wrapping_sub(self.start_time)
    }

    /// Sleeps in virtual time while keeping audio moving.
    pub(crate) fn delay(&mut self, ms: u32) {
        self.host.sleep_ms(ms);
        self.sound.pump(ms);
        if self.host.quit_requested() {
            self.terminate = Terminate::Abort;
        }
    }

    pub(crate) fn renew_time_in_vars(&mut self) {
        let clock = self.host.wall_clock();
        self.set_var(slots::YEAR, clock.year as i32);
        self.set_var(slots::MONTH, clock.month as i32);
        self.set_var(slots::MONTH + 1, 0);
        self.set_var(slots::DAY, clock.day as i32);
        self.set_var(slots::HOUR, clock.hour as i32);
        self.set_var(slots::MINUTE, clock.minute as i32);
        self.set_var(slots::SECOND, clock.second as i32);
    }
}
