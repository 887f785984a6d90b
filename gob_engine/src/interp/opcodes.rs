use gob_formats::mult::Rgb;
use gob_formats::reader::fixed_name;
use gob_formats::tot::HEADER_SIZE;
use log::{debug, warn};

use super::{FuncParams, Interpreter, Terminate, WaitMode};
use crate::error::Result;
use crate::expr::Value;
use crate::input::keys;
use crate::sound::{SlotKind, SoundSource, COMPOSITION_LEN};
use crate::variables::slots;
use crate::video::VideoEvent;

const ELSE_MARKER: u8 = 0xC0;
const DEFAULT_MARKER: u8 = 0x40;
const SWITCH_END: i8 = -5;
const TEXT_END: u8 = 200;
const EXT_SOUND_BASE: i16 = 30000;
const REPORTED_FREE_MEM: i32 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    CallSub,
    SwitchDefault,
    Switch,
    RepeatUntil,
    WhileDo,
    If,
    Assign,
    Else,
    PrepareStr,
    StrStr,
    SetMousePos,
    ReturnTo,
    LoadSpriteToPos,
    PlaySound,
    StopSound,
    LoadSound,
    FreeSoundSlot,
    WaitEndPlay,
    PlayComposition,
    GetFreeMem,
    Return,
    RenewTimeInVars,
    SpeakerOn,
    SpeakerOff,
    PutPixel,
    CreateSprite,
    FreeSprite,
    PrintText,
    LoadTot,
    PalLoad,
    KeyFunc,
    CapturePush,
    CapturePop,
    AnimPalInit,
    TotSub,
    SwitchTotSub,
    PlayAdlib,
    StopAdlib,
    FreeCollision,
    SetCollisionsNow,
    DrawOperations,
    SetCmdCount,
}

impl Opcode {
    /// Maps a decoded opcode index (see `Interpreter::func_block`).
    pub fn from_index(index: u8) -> Option<Opcode> {
        let opcode = match index {
            0 | 1 => Opcode::CallSub,
            4 => Opcode::SwitchDefault,
            5 => Opcode::Switch,
            6 => Opcode::RepeatUntil,
            7 => Opcode::WhileDo,
            8 => Opcode::If,
            9 => Opcode::Assign,
            17 => Opcode::PrintText,
            18 => Opcode::LoadTot,
            19 => Opcode::PalLoad,
            20 => Opcode::KeyFunc,
            21 => Opcode::CapturePush,
            22 => Opcode::CapturePop,
            23 => Opcode::AnimPalInit,
            24 => Opcode::TotSub,
            25 => Opcode::SwitchTotSub,
            26 => Opcode::PlayAdlib,
            27 => Opcode::StopAdlib,
            28 => Opcode::FreeCollision,
            29 => Opcode::SetCollisionsNow,
            30 => Opcode::DrawOperations,
            31 => Opcode::SetCmdCount,
            32 => Opcode::Return,
            33 => Opcode::RenewTimeInVars,
            34 => Opcode::SpeakerOn,
            35 => Opcode::SpeakerOff,
            36 => Opcode::PutPixel,
            38 => Opcode::CreateSprite,
            39 => Opcode::FreeSprite,
            48 => Opcode::ReturnTo,
            49 => Opcode::LoadSpriteToPos,
            56 => Opcode::PlaySound,
            57 => Opcode::StopSound,
            58 => Opcode::LoadSound,
            59 => Opcode::FreeSoundSlot,
            60 => Opcode::WaitEndPlay,
            61 => Opcode::PlayComposition,
            62 => Opcode::GetFreeMem,
            64 => Opcode::Else,
            65 => Opcode::PrepareStr,
            68 => Opcode::StrStr,
            71 => Opcode::SetMousePos,
            _ => return None,
        };
        Some(opcode)
    }

    pub fn name(self) -> &'static str {
        match self {
            Opcode::CallSub => "callSub",
            Opcode::SwitchDefault => "switchDefault",
            Opcode::Switch => "switch",
            Opcode::RepeatUntil => "repeatUntil",
            Opcode::WhileDo => "whileDo",
            Opcode::If => "if",
            Opcode::Assign => "assign",
            Opcode::Else => "else",
            Opcode::PrepareStr => "prepareStr",
            Opcode::StrStr => "strstr",
            Opcode::SetMousePos => "setMousePos",
            Opcode::ReturnTo => "returnTo",
            Opcode::LoadSpriteToPos => "loadSpriteToPos",
            Opcode::PlaySound => "playSound",
            Opcode::StopSound => "stopSound",
            Opcode::LoadSound => "loadSound",
            Opcode::FreeSoundSlot => "freeSoundSlot",
            Opcode::WaitEndPlay => "waitEndPlay",
            Opcode::PlayComposition => "playComposition",
            Opcode::GetFreeMem => "getFreeMem",
            Opcode::Return => "return",
            Opcode::RenewTimeInVars => "renewTimeInVars",
            Opcode::SpeakerOn => "speakerOn",
            Opcode::SpeakerOff => "speakerOff",
            Opcode::PutPixel => "putPixel",
            Opcode::CreateSprite => "createSprite",
            Opcode::FreeSprite => "freeSprite",
            Opcode::PrintText => "printText",
            Opcode::LoadTot => "loadTot",
            Opcode::PalLoad => "palLoad",
            Opcode::KeyFunc => "keyFunc",
            Opcode::CapturePush => "capturePush",
            Opcode::CapturePop => "capturePop",
            Opcode::AnimPalInit => "animPalInit",
            Opcode::TotSub => "totSub",
            Opcode::SwitchTotSub => "switchTotSub",
            Opcode::PlayAdlib => "playAdlib",
            Opcode::StopAdlib => "stopAdlib",
            Opcode::FreeCollision => "freeCollision",
            Opcode::SetCollisionsNow => "setCollisionsNow",
            Opcode::DrawOperations => "drawOperations",
            Opcode::SetCmdCount => "setcmdCount",
        }
    }
}

fn to_i16(value: i32) -> i16 {
    value as i16
}

impl Interpreter {
    pub(super) fn run_opcode(&mut self, opcode: Opcode, params: &mut FuncParams) -> Result<bool> {
        match opcode {
            Opcode::CallSub => self.op_call_sub(params),
            Opcode::SwitchDefault | Opcode::Else => {
                // a marker outside its construct owns a block nobody runs
                self.skip_block()?;
                Ok(false)
            }
            Opcode::Switch => self.op_switch(params),
            Opcode::RepeatUntil => self.op_repeat_until(),
            Opcode::WhileDo => self.op_while_do(),
            Opcode::If => self.op_if(params),
            Opcode::Assign => {
                let dest = self.var_ref()?;
                let value = self.eval_expr()?;
                self.write_ref(dest, &value);
                Ok(false)
            }
            Opcode::PrepareStr => {
                let var = self.var_ref()?;
                let text = self.read_ref(var).to_bytes().to_ascii_uppercase();
                self.write_ref(var, &Value::Str(text));
                Ok(false)
            }
            Opcode::StrStr => self.op_strstr(),
            Opcode::SetMousePos => {
                let x = to_i16(self.eval_value()?);
                let y = to_i16(self.eval_value()?);
                self.host.set_mouse_pos(x, y);
                self.mouse.mouse_x = x;
                self.mouse.mouse_y = y;
                Ok(false)
            }
            Opcode::ReturnTo => Ok(self.op_return_to(params)),
            Opcode::LoadSpriteToPos => {
                let sprite = to_i16(self.eval_value()?);
                let x = to_i16(self.eval_value()?);
                let y = to_i16(self.eval_value()?);
                let transparency = self.read_u8()?;
                self.read_u8()?;
                self.video.record(VideoEvent::LoadSprite {
                    sprite,
                    x,
                    y,
                    transparent: transparency & 1 != 0,
                });
                Ok(false)
            }
            Opcode::PlaySound => self.op_play_sound(),
            Opcode::StopSound => {
                let fade = self.eval_value()?;
                self.sound.adlib_stop();
                self.sound.stop(fade.max(0) as u32);
                Ok(false)
            }
            Opcode::LoadSound => {
                let slot = self.eval_value()?;
                self.load_sound_into(slot)?;
                Ok(false)
            }
            Opcode::FreeSoundSlot => {
                let slot = self.eval_value()?;
                match usize::try_from(slot) {
                    Ok(slot) => self.sound.free(slot),
                    Err(_) => warn!("freeSoundSlot: bad slot {slot}"),
                }
                Ok(false)
            }
            Opcode::WaitEndPlay => {
                while self.sound.is_playing() && self.terminate == Terminate::Running {
                    self.delay(10);
                }
                Ok(false)
            }
            Opcode::PlayComposition => self.op_play_composition(),
            Opcode::GetFreeMem => {
                let free = self.var_ref()?;
                let max_free = self.var_ref()?;
                self.write_ref(free, &Value::Int(REPORTED_FREE_MEM));
                self.write_ref(max_free, &Value::Int(REPORTED_FREE_MEM));
                Ok(false)
            }
            Opcode::Return => {
                if params.ret_flag != 2 {
                    self.brk = true;
                }
                self.ip = None;
                Ok(true)
            }
            Opcode::RenewTimeInVars => {
                self.renew_time_in_vars();
                Ok(false)
            }
            Opcode::SpeakerOn => {
                let frequency = self.eval_value()?;
                self.sound.speaker_on(frequency.max(0) as u32);
                Ok(false)
            }
            Opcode::SpeakerOff => {
                self.sound.speaker_off();
                Ok(false)
            }
            Opcode::PutPixel => {
                let surface = self.read_i16()?;
                let x = to_i16(self.eval_value()?);
                let y = to_i16(self.eval_value()?);
                let color = self.eval_value()?;
                self.video.put_pixel(surface, x, y, color as u8);
                Ok(false)
            }
            Opcode::CreateSprite => self.op_create_sprite(),
            Opcode::FreeSprite => {
                let index = self.read_u16()?;
                self.video.free_sprite(index as i16);
                Ok(false)
            }
            Opcode::PrintText => self.op_print_text(),
            Opcode::LoadTot => self.op_load_tot(),
            Opcode::PalLoad => self.op_pal_load(),
            Opcode::KeyFunc => self.op_key_func(),
            Opcode::CapturePush => {
                let left = to_i16(self.eval_value()?);
                let top = to_i16(self.eval_value()?);
                let width = to_i16(self.eval_value()?);
                let height = to_i16(self.eval_value()?);
                if width < 0 || height < 0 {
                    return Ok(false);
                }
                self.video.capture_push(left, top, width, height)?;
                self.capture_count += 1;
                Ok(false)
            }
            Opcode::CapturePop => {
                if self.capture_count > 0 {
                    self.capture_count -= 1;
                    self.video.capture_pop();
                }
                Ok(false)
            }
            Opcode::AnimPalInit => {
                let dir = self.read_i16()?;
                let low = to_i16(self.eval_value()?);
                let high = to_i16(self.eval_value()?);
                self.anim_pal = (dir != 0).then_some((dir, low, high));
                Ok(false)
            }
            Opcode::TotSub => self.op_tot_sub(),
            Opcode::SwitchTotSub => {
                let index = self.read_i16()?;
                let skip_play = self.read_i16()?;
                self.switch_tot_sub(index, skip_play)?;
                Ok(false)
            }
            Opcode::PlayAdlib => {
                let slot = self.eval_value()?;
                let repeat = self.eval_value()?;
                match usize::try_from(slot) {
                    Ok(slot) => {
                        self.sound.adlib_play(slot, repeat);
                    }
                    Err(_) => warn!("playAdlib: bad slot {slot}"),
                }
                Ok(false)
            }
            Opcode::StopAdlib => {
                self.sound.adlib_stop();
                Ok(false)
            }
            Opcode::FreeCollision => {
                let id = self.eval_value()?;
                self.collisions.free(id as u16);
                Ok(false)
            }
            Opcode::SetCollisionsNow => {
                self.set_collisions()?;
                Ok(false)
            }
            Opcode::DrawOperations => {
                let sub = self.read_u8()?;
                self.draw_operation(sub)?;
                Ok(false)
            }
            Opcode::SetCmdCount => {
                params.cmd_count = self.read_u8()?;
                params.counter = 0;
                Ok(false)
            }
        }
    }

    fn peek_opt(&self) -> Option<u8> {
        let pos = self.ip?;
        self.context.as_ref()?.data.get(pos).copied()
    }

    fn op_call_sub(&mut self, params: &FuncParams) -> Result<bool> {
        let offset = self.read_u16()? as usize;
        if offset < HEADER_SIZE {
            warn!("callSub: offset {offset:#06x} points into the header, skipping");
            return Ok(false);
        }
        if params.is_tail() {
            self.ip = Some(offset);
            return Ok(true);
        }
        let saved = self.ip;
        self.ip = Some(offset);
        let result = self.call_sub(2);
        self.ip = saved;
        result?;
        Ok(false)
    }

    /// `var`, then groups of `len` case expressions each followed by a
    /// block, closed by `-5`, then an optional default block. The last
    /// group listing the value wins.
    fn op_switch(&mut self, params: &FuncParams) -> Result<bool> {
        let var = self.var_ref()?;
        let value = self.read_ref(var).as_int();
        let mut target = None;
        loop {
            let len = self.read_i8()?;
            if len == SWITCH_END {
                break;
            }
            let mut matched = false;
            for _ in 0..len.max(0) {
                if self.eval_value()? == value {
                    matched = true;
                }
            }
            if matched {
                target = Some(self.pos()?);
            }
            self.skip_block()?;
        }
        if self.peek_opt() == Some(DEFAULT_MARKER) {
            self.read_u8()?;
            let default = self.pos()?;
            self.skip_block()?;
            target = target.or(Some(default));
        }
        let Some(block) = target else {
            return Ok(false);
        };
        debug!("switch on {value}: block at {block:#06x}");
        if params.is_tail() {
            self.ip = Some(block);
            return Ok(true);
        }
        self.run_block_at(block, 0)?;
        Ok(false)
    }

    fn loop_finished(&mut self) {
        self.nest_level -= 1;
        if self.break_from_level > -1 {
            self.brk = false;
            self.break_from_level = -1;
        }
    }

    /// Body block, then the condition expression; the body runs until the
    /// condition holds.
    fn op_repeat_until(&mut self) -> Result<bool> {
        self.nest_level += 1;
        let block = self.pos()?;
        loop {
            self.run_block_at(block, 1)?;
            self.ip = Some(block);
            self.skip_block()?;
            let done = self.eval_bool()?;
            if done || self.brk || self.terminate != Terminate::Running {
                break;
            }
        }
        self.loop_finished();
        Ok(false)
    }

    /// Condition expression, then the body block.
    fn op_while_do(&mut self) -> Result<bool> {
        self.nest_level += 1;
        let condition = self.pos()?;
        loop {
            self.ip = Some(condition);
            let flag = self.eval_bool()?;
            let block = self.pos()?;
            if flag && self.terminate == Terminate::Running {
                self.run_block_at(block, 1)?;
            }
            if !flag || self.brk || self.terminate != Terminate::Running {
                self.skip_block()?;
                break;
            }
        }
        self.loop_finished();
        Ok(false)
    }

    fn op_if(&mut self, params: &FuncParams) -> Result<bool> {
        let flag = self.eval_bool()?;
        if flag {
            let block = self.pos()?;
            if params.is_tail() {
                return Ok(true);
            }
            self.run_block_at(block, 0)?;
            self.skip_block()?;
            if self.peek_opt() == Some(ELSE_MARKER) {
                self.read_u8()?;
                self.skip_block()?;
            }
        } else {
            self.skip_block()?;
            if self.peek_opt() == Some(ELSE_MARKER) {
                self.read_u8()?;
                let block = self.pos()?;
                if params.is_tail() {
                    return Ok(true);
                }
                self.run_block_at(block, 0)?;
                self.skip_block()?;
            }
        }
        Ok(false)
    }

    fn op_return_to(&mut self, params: &FuncParams) -> bool {
        if params.ret_flag == 1 {
            self.brk = true;
            self.ip = None;
            return true;
        }
        if self.nest_level == 0 {
            return false;
        }
        self.break_from_level = self.nest_level;
        self.brk = true;
        self.ip = None;
        true
    }

    /// Writes the 0-based position of the needle in the string variable,
    /// or -1.
    fn op_strstr(&mut self) -> Result<bool> {
        let haystack = self.var_ref()?;
        let needle = self.eval_expr()?.to_bytes();
        let result = self.var_ref()?;
        let text = self.read_ref(haystack).to_bytes();
        let position = if needle.is_empty() {
            Some(0)
        } else {
            text.windows(needle.len()).position(|window| window == needle)
        };
        let position = position.map_or(-1, |p| p as i32);
        self.write_ref(result, &Value::Int(position));
        Ok(false)
    }

    fn op_play_sound(&mut self) -> Result<bool> {
        let slot = self.eval_value()?;
        let mut rep_count = self.eval_value()?;
        let frequency = self.eval_value()?;
        if rep_count < 0 {
            if self.sound_flags < 2 {
                return Ok(false);
            }
            rep_count = -rep_count;
        }
        let Ok(slot) = usize::try_from(slot) else {
            warn!("playSound: bad slot {slot}");
            return Ok(false);
        };
        match self.sound.slot(slot).map(|s| s.kind) {
            Some(SlotKind::Adlib) => {
                self.sound.adlib_play(slot, rep_count - 1);
            }
            Some(SlotKind::Sample) => {
                self.sound.play(slot, to_i16(rep_count), to_i16(frequency));
            }
            None => warn!("playSound: slot {slot} is empty"),
        }
        Ok(false)
    }

    /// Loads a sound named by the script stream into `slot`; a negative slot
    /// marks an AdLib track. The id is `-1` for a 9-byte `.snd` file name,
    /// `>= 30000` for external data, anything else a program resource.
    pub(crate) fn load_sound_into(&mut self, slot: i32) -> Result<()> {
        let (adlib, slot) = if slot < 0 { (true, -slot) } else { (false, slot) };
        let id = self.read_i16()?;
        let (data, source) = if id == -1 {
            let raw = self.read_bytes(9)?;
            let name = format!("{}.snd", fixed_name(&raw));
            (self.files.read(&name)?, SoundSource::File)
        } else if id >= EXT_SOUND_BASE {
            let context = self.context.as_ref();
            let data = match context {
                Some(context) => context.ext_resource((id - EXT_SOUND_BASE) as usize)?,
                None => None,
            };
            (data, SoundSource::External)
        } else if id >= 0 {
            let data = self
                .context
                .as_ref()
                .and_then(|context| context.resource(id as usize))
                .map(<[u8]>::to_vec);
            (data, SoundSource::Program)
        } else {
            (None, SoundSource::Program)
        };
        let Some(data) = data else {
            warn!("loadSound: sound {id} not found");
            return Ok(());
        };
        let slot = slot as usize;
        let loaded = if adlib {
            self.sound.load_adlib(slot, &data, source)
        } else {
            self.sound.load_sample(slot, &data, source)
        };
        if let Err(err) = loaded {
            warn!("loadSound: slot {slot}: {err:#}");
        }
        Ok(())
    }

    fn op_play_composition(&mut self) -> Result<bool> {
        let var = self.var_ref()?;
        let frequency = self.eval_value()?;
        let slots: Vec<i16> = match self.variables() {
            Some(table) => {
                let table = table.borrow();
                (0..COMPOSITION_LEN)
                    .map(|i| table.read_i32(var.offset + i * 4) as i16)
                    .collect()
            }
            None => Vec::new(),
        };
        self.sound.play_composition(&slots, to_i16(frequency));
        Ok(false)
    }

    fn op_create_sprite(&mut self) -> Result<bool> {
        let (index, width, height) = if self.peek_u8(1)? == 0 {
            let index = self.read_u16()? as i16;
            let width = self.read_u16()? as i16;
            let height = self.read_u16()? as i16;
            (index, width, height)
        } else {
            let index = to_i16(self.eval_value()?);
            let width = to_i16(self.eval_value()?);
            let height = to_i16(self.eval_value()?);
            (index, width, height)
        };
        self.read_u16()?;
        self.video.create_sprite(index, width, height);
        Ok(false)
    }

    /// Text runs up to `.` (a variable is formatted in) or `200` (end).
    fn op_print_text(&mut self) -> Result<bool> {
        let x = to_i16(self.eval_value()?);
        let y = to_i16(self.eval_value()?);
        let _back = self.eval_value()?;
        let front = to_i16(self.eval_value()?);
        let font = to_i16(self.eval_value()?);
        loop {
            let mut segment = Vec::new();
            let terminator = loop {
                let byte = self.read_u8()?;
                if byte == b'.' || byte == TEXT_END {
                    break byte;
                }
                segment.push(byte);
            };
            if terminator == b'.' {
                let var = self.var_ref()?;
                match self.read_ref(var) {
                    Value::Int(value) => segment.extend(value.to_string().bytes()),
                    Value::Str(text) => segment.extend(text),
                }
                self.read_u8()?;
            }
            self.video.record(VideoEvent::PrintText {
                x,
                y,
                font,
                color: front,
                text: String::from_utf8_lossy(&segment).into_owned(),
            });
            if terminator == TEXT_END {
                break;
            }
            if self.peek_opt() == Some(TEXT_END) {
                self.read_u8()?;
                break;
            }
        }
        Ok(false)
    }

    fn op_load_tot(&mut self) -> Result<bool> {
        let name = if self.peek_u8(0)? & 0x80 != 0 {
            self.read_u8()?;
            let value = self.eval_expr()?;
            String::from_utf8_lossy(&value.to_bytes()).into_owned()
        } else {
            let size = self.read_i8()?.max(0) as usize;
            fixed_name(&self.read_bytes(size)?)
        };
        let name = format!("{name}.tot");
        debug!("loadTot: {name}");
        if self.terminate != Terminate::Abort {
            self.terminate = Terminate::Requested;
        }
        self.tot_to_load = Some(name);
        Ok(false)
    }

    /// `flags u8`; with bit 7 a `u16` resource holding RGB triplets from
    /// entry 0, otherwise `first u8`, `count u8` and the triplets inline.
    fn op_pal_load(&mut self) -> Result<bool> {
        let flags = self.read_u8()?;
        let (first, raw) = if flags & 0x80 != 0 {
            let id = self.read_u16()? as usize;
            let raw = self
                .context
                .as_ref()
                .and_then(|context| context.resource(id))
                .map(<[u8]>::to_vec);
            let Some(raw) = raw else {
                warn!("palLoad: resource {id} not found");
                return Ok(false);
            };
            (0, raw)
        } else {
            let first = self.read_u8()? as usize;
            let count = self.read_u8()? as usize;
            (first, self.read_bytes(count * 3)?)
        };
        let colors: Vec<Rgb> = raw
            .chunks_exact(3)
            .map(|c| Rgb {
                red: c[0],
                green: c[1],
                blue: c[2],
            })
            .collect();
        self.video.set_colors(first, &colors);
        Ok(false)
    }

    fn op_key_func(&mut self) -> Result<bool> {
        let cmd = self.read_u16()?;
        match cmd {
            0 => {
                let result = self.check_collisions(false, WaitMode::Poll)?;
                self.store_key(result.key);
            }
            1 => {
                let key = self.check_keys();
                self.store_key(key);
            }
            2 => {
                let key = self.check_keys();
                self.set_var(slots::KEY, key as i32);
            }
            ms => self.delay(ms as u32),
        }
        Ok(false)
    }

    fn op_tot_sub(&mut self) -> Result<bool> {
        let length = self.read_u8()?;
        if length & 0x7F > 13 {
            warn!("totSub: name length {} too long", length & 0x7F);
        }
        let name = if length & 0x80 != 0 {
            let value = self.eval_expr()?;
            String::from_utf8_lossy(&value.to_bytes()).into_owned()
        } else {
            fixed_name(&self.read_bytes(length as usize)?)
        };
        let flags = self.read_u8()?;
        self.tot_sub(flags, &format!("{name}.tot"))?;
        Ok(false)
    }

    /// Publishes the key plus mouse and sound state to the fixed variables.
    pub(crate) fn store_key(&mut self, key: u16) {
        self.set_var(slots::ELAPSED, self.elapsed() as i32);
        self.set_var(slots::MOUSE_X, self.mouse.mouse_x as i32);
        self.set_var(slots::MOUSE_Y, self.mouse.mouse_y as i32);
        self.set_var(slots::MOUSE_BUTTONS, self.mouse.buttons.bits() as i32);
        self.set_var(slots::SOUND_PLAYING, self.sound.is_playing() as i32);
        let key = match key {
            keys::UP => 0x0B,
            keys::DOWN => 0x0A,
            keys::RIGHT => 0x09,
            keys::LEFT => 0x08,
            keys::ESCAPE => 0x1B,
            keys::BACKSPACE => 0x19,
            keys::DELETE => 0x1A,
            key if key & 0xFF != 0 => key & 0xFF,
            key => key,
        };
        self.set_var(slots::KEY, key as i32);
    }
}
