use std::rc::Rc;

use gob_formats::mult::{AnimKey, SndCommand, TextCommand, ANIM_TRACKS, FADE_PALETTES};
use gob_formats::{AnimLayers, MultData};
use log::{debug, warn};

use super::compositor::{self, DrawCommand, ObjectView, Rect};
use super::{AnimData, MultObject, Track, TRACK_OBJECTS};
use crate::error::{EngineError, Result};
use crate::input::keys;
use crate::interp::{Interpreter, Terminate};
use crate::variables::{slots, Variables};
use crate::video::VideoEvent;

/// Objects the player allocates when a script plays keys without
/// `initMult`.
const DEFAULT_OBJECTS: usize = 4;
const DEFAULT_OBJECT_STRIDE: usize = 32;
/// Sound keys load into slots counting down from here.
const FIRST_MULT_SOUND_SLOT: i32 = 19;

mod anim_type {
    pub const LOOP: u8 = 0;
    pub const LOOP_MOVE: u8 = 1;
    pub const SWITCH: u8 = 2;
    pub const ONCE: u8 = 3;
    pub const DONE: u8 = 4;
    pub const HIDE: u8 = 5;
    pub const HOLD: u8 = 6;
}

impl Interpreter {
    /// `drawOperations` sub-ops.
    pub(crate) fn draw_operation(&mut self, sub: u8) -> Result<()> {
        match sub {
            0x00 => self.load_mult(),
            0x01 => {
                let check_escape = self.read_i16()?;
                let start = self.var(slots::MULT_FRAME) as i16;
                self.play_mult(start, -1, check_escape & 1 != 0)
            }
            0x02 => {
                self.free_mult_keys();
                Ok(())
            }
            0x03 => {
                let flags = self.eval_value()? as u16;
                let mut others = [-1i16; TRACK_OBJECTS - 1];
                for other in &mut others {
                    *other = self.eval_value()? as i16;
                }
                self.mult_sub(flags, &others);
                Ok(())
            }
            0x14 => self.init_mult(),
            0x15 => {
                self.free_mult();
                Ok(())
            }
            0x16 => {
                self.animate();
                Ok(())
            }
            other => Err(EngineError::malformed(
                self.ip.unwrap_or(0),
                format!("unknown draw operation {other:#04x}"),
            )),
        }
    }

    /// `i16` external resource id, then one sound reference in the script
    /// stream per sound key that needs a sample.
    fn load_mult(&mut self) -> Result<()> {
        let id = self.read_i16()?;
        let raw = match (self.context.as_ref(), usize::try_from(id)) {
            (Some(context), Ok(id)) => context.ext_resource(id)?,
            _ => None,
        };
        let raw = raw.ok_or_else(|| {
            EngineError::malformed(self.ip.unwrap_or(0), format!("mult data {id} is missing"))
        })?;
        let data = MultData::parse(&raw)?;

        let mut layers = Vec::with_capacity(data.anim_resources.len());
        for &resource in &data.anim_resources {
            let parsed = usize::try_from(resource)
                .ok()
                .and_then(|r| self.context.as_ref()?.resource(r))
                .map(AnimLayers::parse);
            match parsed {
                Some(Ok(anim)) => layers.push(anim),
                Some(Err(err)) => {
                    warn!("loadMult: animation {resource}: {err:#}");
                    layers.push(AnimLayers::default());
                }
                None => {
                    warn!("loadMult: animation {resource} not found");
                    layers.push(AnimLayers::default());
                }
            }
        }

        let mut sound_slots = vec![None; data.snd_keys.len()];
        let mut ids: Vec<Option<i16>> = vec![None; data.snd_keys.len()];
        let mut loaded = 0;
        for (index, key) in data.snd_keys.iter().enumerate() {
            match key.cmd {
                SndCommand::Start | SndCommand::Loop => {
                    let code = self.code()?;
                    let sound = gob_formats::reader::read_i16_le_at(&code, self.pos()?)?;
                    ids[index] = Some(sound);
                    if let Some(earlier) = (0..index).find(|&j| ids[j] == Some(sound)) {
                        sound_slots[index] = sound_slots[earlier];
                        self.read_bytes(if sound == -1 { 11 } else { 2 })?;
                        continue;
                    }
                    let slot = FIRST_MULT_SOUND_SLOT - loaded;
                    loaded += 1;
                    if slot < 0 {
                        warn!("loadMult: out of sound slots for key {index}");
                        self.read_bytes(if sound == -1 { 11 } else { 2 })?;
                        continue;
                    }
                    self.load_sound_into(slot)?;
                    sound_slots[index] = Some(slot as usize);
                }
                SndCommand::Other(3) => {
                    self.read_bytes(6)?;
                }
                SndCommand::Other(5) => {
                    self.read_bytes(key.freq.max(0) as usize * 2)?;
                }
                _ => {}
            }
        }
        debug!(
            "loadMult {id}: {} anims, {} sound keys, last frame {}",
            layers.len(),
            data.snd_keys.len(),
            data.last_frame()
        );
        self.mult.data = Some(data);
        self.mult.anim_layers = layers;
        self.mult.sound_slots = sound_slots;
        self.mult.tracks = [Track::default(); ANIM_TRACKS];
        Ok(())
    }

    pub(crate) fn free_mult_keys(&mut self) {
        for slot in self.mult.sound_slots.drain(..).flatten() {
            self.sound.free(slot);
        }
        self.mult.data = None;
        self.mult.anim_layers.clear();
        self.mult.tracks = [Track::default(); ANIM_TRACKS];
    }

    /// Area geometry, object count, then the variables holding the X
    /// positions, Y positions and animation records.
    fn init_mult(&mut self) -> Result<()> {
        let left = self.read_i16()?;
        let top = self.read_i16()?;
        let width = self.read_i16()?;
        let height = self.read_i16()?;
        let count = self.read_i16()?.max(0) as usize;
        let pos_x = self.var_ref()?;
        let pos_y = self.var_ref()?;
        let anim_data = self.var_ref()?;
        let Some(table) = self.variables() else {
            return Err(EngineError::malformed(self.ip.unwrap_or(0), "initMult without variables"));
        };
        let stride = (self.anim_data_size() as usize * 4).max(AnimData::SIZE);

        self.free_mult();
        self.mult.anim_area = Some(Rect {
            left,
            top,
            right: left.wrapping_add(width).wrapping_sub(1),
            bottom: top.wrapping_add(height).wrapping_sub(1),
        });
        for i in 0..count {
            let object = MultObject::new(
                Rc::clone(&table),
                pos_x.offset + i * 4,
                pos_y.offset + i * 4,
                anim_data.offset + i * stride,
            );
            let mut data = object.data();
            data.is_static = 1;
            object.set_data(&data);
            self.mult.objects.push(object);
        }
        self.mult.objects_owned = false;
        debug!("initMult: {count} objects in {width}x{height} at ({left},{top})");
        Ok(())
    }

    pub(crate) fn free_mult(&mut self) {
        self.mult.objects.clear();
        self.mult.objects_owned = false;
        self.mult.anim_area = None;
        self.mult.tracks = [Track::default(); ANIM_TRACKS];
    }

    fn allocate_default_objects(&mut self) {
        let table = Variables::shared(DEFAULT_OBJECTS * DEFAULT_OBJECT_STRIDE / 4);
        for i in 0..DEFAULT_OBJECTS {
            let base = i * DEFAULT_OBJECT_STRIDE;
            let object = MultObject::new(Rc::clone(&table), base, base + 4, base + 8);
            object.set_data(&AnimData {
                is_static: 1,
                ..AnimData::default()
            });
            self.mult.objects.push(object);
        }
        self.mult.objects_owned = true;
    }

    /// Plays the loaded keys from `start_frame` (`-1` starts over) until
    /// no key lies ahead, `end_frame` passes, a text key stops playback, or
    /// Escape is pressed when `check_escape` is set.
    pub fn play_mult(&mut self, start_frame: i16, end_frame: i16, check_escape: bool) -> Result<()> {
        let Some(data) = self.mult.data.clone() else {
            warn!("playMult without loaded keys");
            return Ok(());
        };
        let end_frame = if end_frame == -1 { i16::MAX } else { end_frame };
        if start_frame == -1 {
            self.mult.palette.reset(&self.video.palette);
            if self.mult.objects.is_empty() {
                self.allocate_default_objects();
            }
            self.mult.frame = 0;
        } else {
            self.mult.frame = start_frame;
        }
        let frame_ms = match data.frame_rate {
            rate if rate > 0 => 1000 / rate as u32,
            _ => self.rules.frame_rate_ms,
        };
        debug!("playMult from frame {} to {end_frame}", self.mult.frame);

        let mut stop_no_clear = false;
        let mut played = self.mult.frame;
        loop {
            let frame = self.mult.frame;
            played = frame;
            if self.var(slots::MULT_NO_DRAW) == 0 {
                self.draw_statics(&data, frame);
                self.draw_anims(&data, frame);
            }
            self.animate();
            stop_no_clear |= self.draw_text(&data, frame);
            self.prep_pal_anim(&data, frame);
            self.do_pal_anim(frame);
            self.do_fade_anim(&data, frame);
            self.do_sound_anim(&data, frame);
            for key in data.aux_keys.iter().filter(|k| k.frame == frame) {
                self.video.record(VideoEvent::MultAux {
                    frame,
                    values: key.values,
                });
            }

            let mut stop = data.last_frame() < frame || frame >= end_frame;
            if check_escape && self.check_keys() == keys::ESCAPE {
                stop = true;
            }
            self.mult.frame = frame.saturating_add(1);
            self.delay(frame_ms);
            if stop || stop_no_clear || self.terminate != Terminate::Running {
                break;
            }
        }

        if stop_no_clear {
            self.set_var(slots::MULT_FRAME, played as i32);
        } else {
            if self.mult.objects_owned {
                self.free_mult();
            }
            self.set_var(slots::MULT_FRAME, -1);
        }
        Ok(())
    }

    fn draw_statics(&mut self, data: &MultData, frame: i16) {
        for key in data.static_keys.iter().filter(|k| k.frame == frame) {
            if key.layer != -1 {
                self.video.record(VideoEvent::DrawStatic { layer: key.layer });
            }
        }
    }

    fn draw_anims(&mut self, data: &MultData, frame: i16) {
        for (track, keys) in data.anim_keys.iter().enumerate() {
            for key in keys.iter().filter(|k| k.frame == frame) {
                self.apply_anim_key(track, key);
            }
        }
    }

    /// Points object `object` at the key's layer and position, or hides it
    /// for layer `-1`.
    fn apply_anim_key(&mut self, object: usize, key: &AnimKey) {
        let Some(target) = self.mult.objects.get_mut(object) else {
            return;
        };
        let mut data = target.data();
        if key.layer == -1 {
            data.is_static = 1;
            target.set_data(&data);
            return;
        }
        target.set_position(key.pos_x, key.pos_y);
        target.tick = 0;
        data.frame = 0;
        data.order = key.order as i8;
        data.anim_type = anim_type::LOOP_MOVE;
        data.is_paused = 0;
        data.is_static = 0;
        data.max_tick = 0;
        match self.mult.resolve_layer(key.layer) {
            Some((animation, layer)) => {
                data.animation = animation as u8;
                data.layer = layer as u8;
            }
            None => warn!("mult: layer {} is not in any loaded animation", key.layer),
        }
        if let Some(target) = self.mult.objects.get(object) {
            target.set_data(&data);
        }
    }

    /// Returns true when a key asks to stop without clearing.
    fn draw_text(&mut self, data: &MultData, frame: i16) -> bool {
        let mut stop_no_clear = false;
        for key in data.text_keys.iter().filter(|k| k.frame == frame) {
            match key.cmd {
                TextCommand::Show | TextCommand::Clear => {
                    self.video.record(VideoEvent::MultText {
                        frame,
                        index: key.index,
                        visible: key.cmd == TextCommand::Show,
                    });
                }
                TextCommand::StopKeep => stop_no_clear = true,
                TextCommand::Other(cmd) => debug!("mult text key cmd {cmd} ignored"),
            }
        }
        stop_no_clear
    }

    fn prep_pal_anim(&mut self, data: &MultData, frame: i16) {
        let Some(key) = data.pal_keys.iter().find(|k| k.frame == frame) else {
            return;
        };
        if let Some(restore) = self.mult.palette.apply_key(key, &self.video.palette) {
            self.video.set_colors(0, &restore);
        }
    }

    fn do_pal_anim(&mut self, frame: i16) {
        let mut palette = self.video.palette;
        if self.mult.palette.step(frame, &mut palette) {
            self.video.set_colors(0, &palette);
        }
    }

    fn do_fade_anim(&mut self, data: &MultData, frame: i16) {
        for key in data.pal_fade_keys.iter().filter(|k| k.frame == frame) {
            let Some(palette) = usize::try_from(key.pal_index)
                .ok()
                .filter(|&i| i < FADE_PALETTES)
                .map(|i| data.fade_palettes[i])
            else {
                warn!("mult: fade palette {} out of range", key.pal_index);
                continue;
            };
            if key.fade != 0 {
                self.video.record(VideoEvent::PaletteFade {
                    palette: key.pal_index,
                    step: key.fade,
                });
            }
            self.video.set_colors(0, &palette);
        }
    }

    fn do_sound_anim(&mut self, data: &MultData, frame: i16) {
        for (index, key) in data.snd_keys.iter().enumerate() {
            if key.frame != frame {
                continue;
            }
            match key.cmd {
                SndCommand::Start | SndCommand::Loop => {
                    let Some(slot) = self.mult.sound_slots.get(index).copied().flatten() else {
                        continue;
                    };
                    self.sound.stop(0);
                    let rep_count = if key.cmd == SndCommand::Loop { 0 } else { key.rep_count };
                    self.sound.play(slot, rep_count, key.freq);
                }
                SndCommand::Stop => self.sound.stop(key.fade_length.max(0) as u32),
                SndCommand::Other(_) => {}
            }
        }
    }

    /// Starts a sub-sequence. Bits 7-9 pick the track, bit 10 plays it
    /// backwards, the low 7 bits give the first object, and bits 12-15
    /// select the text-key segment bounding it. `others` names up to three
    /// more objects; negative entries are unused.
    pub(crate) fn mult_sub(&mut self, flags: u16, others: &[i16]) {
        let Some(data) = self.mult.data.as_ref() else {
            warn!("multSub without loaded keys");
            return;
        };
        let track = if flags & 0x200 != 0 {
            3
        } else if flags & 0x100 != 0 {
            2
        } else if flags & 0x80 != 0 {
            1
        } else {
            0
        };
        let segment = (flags >> 12) as usize;
        let start = match segment {
            0 => 0,
            s => data.text_keys.get(s - 1).map_or(0, |k| k.frame),
        };
        let end = data
            .text_keys
            .get(segment)
            .map_or(data.last_frame(), |k| k.frame);
        let reverse = flags & 0x400 != 0;
        let mut objects = [None; TRACK_OBJECTS];
        objects[0] = Some((flags & 0x7F) as usize);
        for (slot, &other) in objects[1..].iter_mut().zip(others) {
            *slot = usize::try_from(other).ok();
        }
        self.mult.tracks[track] = Track {
            active: true,
            objects,
            frame: if reverse { end } else { start },
            start,
            end,
            dir: if reverse { -1 } else { 1 },
        };
        debug!("multSub: track {track} frames {start}..={end} reverse {reverse}");
    }

    fn step_tracks(&mut self) {
        let Some(data) = self.mult.data.clone() else {
            return;
        };
        for track in 0..ANIM_TRACKS {
            let state = self.mult.tracks[track];
            if !state.active {
                continue;
            }
            for key in data.anim_keys[track].iter().filter(|k| k.frame == state.frame) {
                for object in state.objects.iter().flatten() {
                    self.apply_anim_key(*object, key);
                }
            }
            let state = &mut self.mult.tracks[track];
            match state.frame.checked_add(state.dir) {
                Some(next) if (state.start..=state.end).contains(&next) => state.frame = next,
                _ => state.active = false,
            }
        }
    }

    /// Advances every object one tick and repaints what changed.
    pub fn animate(&mut self) {
        self.step_tracks();
        let mut views = Vec::with_capacity(self.mult.objects.len());
        let mut records = Vec::with_capacity(self.mult.objects.len());
        for index in 0..self.mult.objects.len() {
            let mut data = self.mult.objects[index].data();
            if data.is_static == 0 && data.is_paused == 0 {
                self.advance_frame(index, &mut data);
            }
            let current = if data.is_static == 0 {
                self.object_rect(index, &data)
            } else {
                None
            };
            views.push(ObjectView {
                object: index,
                order: data.order as i16,
                busy: data.is_static == 0 && data.is_paused == 0,
                last: self.mult.objects[index].last,
                current,
            });
            data.intersected = 0;
            records.push(data);
        }

        for command in compositor::compose(&views, self.rules.busy_tiebreak) {
            match command {
                DrawCommand::Erase { object, rect } => self.video.record(VideoEvent::Erase {
                    object,
                    left: rect.left,
                    top: rect.top,
                    right: rect.right,
                    bottom: rect.bottom,
                }),
                DrawCommand::Draw { object, rect, forced } => {
                    let data = &mut records[object];
                    if forced {
                        data.intersected = 1;
                    }
                    self.video.record(VideoEvent::DrawObject {
                        object,
                        animation: data.animation as i16,
                        layer: data.layer as i16,
                        frame: data.frame as i16,
                        left: rect.left,
                        top: rect.top,
                        right: rect.right,
                        bottom: rect.bottom,
                    });
                }
            }
        }
        for ((object, view), data) in self.mult.objects.iter_mut().zip(&views).zip(&records) {
            object.last = view.current;
            object.set_data(data);
        }
    }

    fn advance_frame(&mut self, index: usize, data: &mut AnimData) {
        let object = &mut self.mult.objects[index];
        if object.tick < data.max_tick {
            object.tick += 1;
            return;
        }
        object.tick = 0;
        if data.anim_type == anim_type::DONE {
            return;
        }
        let count = self
            .mult
            .frame_count(data.animation as usize, data.layer as usize);
        if (data.frame as usize) + 1 < count {
            data.frame += 1;
            return;
        }
        match data.anim_type {
            anim_type::LOOP | anim_type::LOOP_MOVE => data.frame = 0,
            anim_type::SWITCH => {
                data.frame = 0;
                data.animation = data.new_animation;
                data.layer = data.new_layer;
            }
            anim_type::ONCE => {
                data.frame = 0;
                data.anim_type = anim_type::DONE;
            }
            anim_type::HIDE => {
                data.frame = 0;
                data.is_static = 1;
            }
            anim_type::HOLD => data.is_paused = 1,
            other => debug!("mult: object {index} has unknown anim type {other}"),
        }
    }

    fn object_rect(&self, index: usize, data: &AnimData) -> Option<Rect> {
        let metrics = self
            .mult
            .anim_layers
            .get(data.animation as usize)?
            .frame(data.layer as usize, data.frame as usize)?;
        let (x, y) = self.mult.objects[index].position();
        let left = x.wrapping_add(metrics.dx);
        let top = y.wrapping_add(metrics.dy);
        Some(Rect {
            left,
            top,
            right: left.wrapping_add(metrics.width).wrapping_sub(1),
            bottom: top.wrapping_add(metrics.height).wrapping_sub(1),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameRules;
    use crate::context::VariableSlot;
    use crate::data_io::DataCollection;
    use crate::input::ScriptedHost;
    use gob_formats::mult::{Rgb, StaticKey, TextCommand, TextKey, FADE_PALETTE_COLORS};
    use gob_formats::FrameMetrics;

    fn interpreter() -> Interpreter {
        let mut interp = Interpreter::new(
            GameRules::v1(),
            DataCollection::new(),
            Box::new(ScriptedHost::new()),
        );
        interp.vars = Some(VariableSlot::Owned(Variables::shared(128)));
        interp
    }

    fn keys() -> MultData {
        MultData {
            static_resources: Vec::new(),
            anim_resources: Vec::new(),
            frame_rate: 0,
            static_keys: Vec::new(),
            anim_keys: Default::default(),
            fade_palettes: [[Rgb::default(); FADE_PALETTE_COLORS]; FADE_PALETTES],
            pal_fade_keys: Vec::new(),
            pal_keys: Vec::new(),
            text_keys: Vec::new(),
            snd_keys: Vec::new(),
            aux_keys: Vec::new(),
        }
    }

    fn text_key(frame: i16, cmd: TextCommand) -> TextKey {
        TextKey {
            frame,
            cmd,
            params: [0; 9],
            index: 0,
            extra: [0; 2],
        }
    }

    fn static_layers(interp: &Interpreter) -> Vec<i16> {
        interp
            .video
            .events()
            .iter()
            .filter_map(|event| match event {
                VideoEvent::DrawStatic { layer } => Some(*layer),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn text_key_stop_keeps_objects_and_the_resume_frame() {
        let mut interp = interpreter();
        let mut data = keys();
        data.static_keys.push(StaticKey { frame: 5, layer: 7 });
        data.text_keys.push(text_key(2, TextCommand::StopKeep));
        interp.mult.data = Some(data);

        interp.play_mult(-1, -1, false).unwrap();
        assert_eq!(interp.var(slots::MULT_FRAME), 2);
        assert_eq!(interp.mult.objects().len(), DEFAULT_OBJECTS);
        assert!(static_layers(&interp).is_empty());

        let resume = interp.var(slots::MULT_FRAME) as i16;
        interp.play_mult(resume + 1, -1, false).unwrap();
        assert_eq!(static_layers(&interp), vec![7]);
        assert_eq!(interp.var(slots::MULT_FRAME), -1);
        assert!(interp.mult.objects().is_empty());
    }

    #[test]
    fn end_frame_cuts_playback_short() {
        let mut interp = interpreter();
        let mut data = keys();
        data.static_keys.push(StaticKey { frame: 10, layer: 1 });
        interp.mult.data = Some(data);

        interp.play_mult(-1, 3, false).unwrap();
        assert_eq!(interp.mult.frame(), 4);
        assert_eq!(interp.var(slots::MULT_FRAME), -1);
        assert!(static_layers(&interp).is_empty());
    }

    #[test]
    fn playback_ends_once_no_key_lies_ahead() {
        let mut interp = interpreter();
        let mut data = keys();
        data.static_keys.push(StaticKey { frame: 2, layer: 4 });
        interp.mult.data = Some(data);

        interp.play_mult(-1, -1, false).unwrap();
        assert_eq!(static_layers(&interp), vec![4]);
        // frames 0 to 3 play; frame 3 is past the last key
        assert_eq!(interp.mult.frame(), 4);
    }

    #[test]
    fn resuming_at_the_highest_frame_stops_cleanly() {
        let mut interp = interpreter();
        let mut data = keys();
        data.static_keys.push(StaticKey { frame: 5, layer: 1 });
        interp.mult.data = Some(data.clone());
        interp.play_mult(i16::MAX, -1, false).unwrap();
        assert_eq!(interp.mult.frame(), i16::MAX);
        assert_eq!(interp.var(slots::MULT_FRAME), -1);

        data.text_keys.push(text_key(i16::MAX, TextCommand::StopKeep));
        interp.mult.data = Some(data);
        interp.play_mult(i16::MAX, -1, false).unwrap();
        assert_eq!(interp.var(slots::MULT_FRAME), i16::MAX as i32);
    }

    #[test]
    fn mult_sub_drives_every_listed_object_forwards() {
        let mut interp = interpreter();
        let mut data = keys();
        data.text_keys.push(text_key(4, TextCommand::Show));
        data.text_keys.push(text_key(8, TextCommand::Show));
        data.anim_keys[1].push(AnimKey {
            frame: 4,
            layer: 0,
            pos_x: 10,
            pos_y: 20,
            order: 2,
        });
        interp.mult.data = Some(data);
        interp.allocate_default_objects();

        // track 1, first object 2, text segment 1
        interp.mult_sub(0x80 | 2 | (1 << 12), &[3, -1, -1]);
        let track = interp.mult.tracks()[1];
        assert_eq!(track.objects, [Some(2), Some(3), None, None]);
        assert_eq!((track.start, track.end, track.frame, track.dir), (4, 8, 4, 1));

        interp.animate();
        for object in [2, 3] {
            let target = &interp.mult.objects()[object];
            assert_eq!(target.position(), (10, 20));
            assert_eq!(target.data().is_static, 0);
            assert_eq!(target.data().order, 2);
        }
        assert_eq!(interp.mult.objects()[0].data().is_static, 1);

        for _ in 0..3 {
            interp.animate();
        }
        assert!(interp.mult.tracks()[1].active);
        assert_eq!(interp.mult.tracks()[1].frame, 8);
        interp.animate();
        assert!(!interp.mult.tracks()[1].active);
    }

    #[test]
    fn reversed_mult_sub_walks_its_segment_backwards() {
        let mut interp = interpreter();
        let mut data = keys();
        data.text_keys.push(text_key(4, TextCommand::Show));
        interp.mult.data = Some(data);
        interp.allocate_default_objects();

        interp.mult_sub(0x400 | 0x200 | 1, &[]);
        let track = interp.mult.tracks()[3];
        assert_eq!(track.objects, [Some(1), None, None, None]);
        assert_eq!((track.start, track.end, track.frame, track.dir), (0, 4, 4, -1));

        for _ in 0..4 {
            interp.animate();
        }
        assert_eq!(interp.mult.tracks()[3].frame, 0);
        interp.animate();
        assert!(!interp.mult.tracks()[3].active);
    }

    fn animated(interp: &mut Interpreter, anim_type: u8) {
        let metrics = FrameMetrics {
            width: 8,
            height: 4,
            dx: 1,
            dy: 2,
        };
        interp.mult.anim_layers = vec![
            AnimLayers::new(vec![vec![metrics; 2]]),
            AnimLayers::new(vec![vec![metrics; 3]]),
        ];
        interp.allocate_default_objects();
        let object = &interp.mult.objects()[0];
        object.set_position(30, 40);
        object.set_data(&AnimData {
            anim_type,
            new_animation: 1,
            ..AnimData::default()
        });
    }

    #[test]
    fn animate_steps_frames_and_handles_the_last_one_by_type() {
        let base = AnimData {
            new_animation: 1,
            ..AnimData::default()
        };
        let cases = [
            (
                anim_type::LOOP,
                AnimData {
                    anim_type: anim_type::LOOP,
                    ..base
                },
            ),
            (
                anim_type::ONCE,
                AnimData {
                    anim_type: anim_type::DONE,
                    ..base
                },
            ),
            (
                anim_type::SWITCH,
                AnimData {
                    anim_type: anim_type::SWITCH,
                    animation: 1,
                    ..base
                },
            ),
            (
                anim_type::HIDE,
                AnimData {
                    anim_type: anim_type::HIDE,
                    is_static: 1,
                    ..base
                },
            ),
            (
                anim_type::HOLD,
                AnimData {
                    anim_type: anim_type::HOLD,
                    frame: 1,
                    is_paused: 1,
                    ..base
                },
            ),
        ];
        for (start, expected) in cases {
            let mut interp = interpreter();
            animated(&mut interp, start);
            interp.animate();
            assert_eq!(interp.mult.objects()[0].data().frame, 1, "type {start}");
            interp.animate();
            assert_eq!(interp.mult.objects()[0].data(), expected, "type {start}");
        }
    }

    #[test]
    fn done_objects_stay_on_their_frame() {
        let mut interp = interpreter();
        animated(&mut interp, anim_type::DONE);
        interp.animate();
        interp.animate();
        assert_eq!(interp.mult.objects()[0].data().frame, 0);
        assert_eq!(interp.mult.objects()[0].data().anim_type, anim_type::DONE);
    }

    #[test]
    fn animate_draws_objects_at_their_frame_rect() {
        let mut interp = interpreter();
        animated(&mut interp, anim_type::LOOP);
        interp.animate();
        let draws: Vec<&VideoEvent> = interp
            .video
            .events()
            .iter()
            .filter(|event| matches!(event, VideoEvent::DrawObject { .. }))
            .collect();
        assert_eq!(
            draws,
            vec![&VideoEvent::DrawObject {
                object: 0,
                animation: 0,
                layer: 0,
                frame: 1,
                left: 31,
                top: 42,
                right: 38,
                bottom: 45,
            }]
        );
        let expected = Rect {
            left: 31,
            top: 42,
            right: 38,
            bottom: 45,
        };
        assert_eq!(interp.mult.objects()[0].last, Some(expected));
    }
}
