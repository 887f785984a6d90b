//! The Mult sequencer: keyed animation timelines driving objects whose
//! position and animation state live in script variables.

pub mod compositor;
pub mod palette;
mod player;

use gob_formats::mult::ANIM_TRACKS;
use gob_formats::{AnimLayers, MultData};

use crate::variables::{SharedVariables, Variables};

pub use compositor::{DrawCommand, ObjectView, Rect};
pub use palette::PaletteAnimator;

/// Per-object animation record, laid out byte by byte in the variable
/// table so scripts can read and poke it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnimData {
    pub animation: u8,
    pub layer: u8,
    pub frame: u8,
    pub anim_type: u8,
    pub order: i8,
    pub is_paused: u8,
    pub is_static: u8,
    pub max_tick: u8,
    pub unknown: u8,
    pub new_layer: u8,
    pub new_animation: u8,
    pub intersected: u8,
    pub new_cycle: u8,
}

impl AnimData {
    pub const SIZE: usize = 13;

    pub fn load(vars: &Variables, offset: usize) -> AnimData {
        let byte = |i: usize| vars.read_u8(offset + i);
        AnimData {
            animation: byte(0),
            layer: byte(1),
            frame: byte(2),
            anim_type: byte(3),
            order: byte(4) as i8,
            is_paused: byte(5),
            is_static: byte(6),
            max_tick: byte(7),
            unknown: byte(8),
            new_layer: byte(9),
            new_animation: byte(10),
            intersected: byte(11),
            new_cycle: byte(12),
        }
    }

    pub fn store(&self, vars: &mut Variables, offset: usize) {
        let bytes = [
            self.animation,
            self.layer,
            self.frame,
            self.anim_type,
            self.order as u8,
            self.is_paused,
            self.is_static,
            self.max_tick,
            self.unknown,
            self.new_layer,
            self.new_animation,
            self.intersected,
            self.new_cycle,
        ];
        for (i, value) in bytes.into_iter().enumerate() {
            vars.write_u8(offset + i, value);
        }
    }
}

/// An animated object. Its position and record are addresses in a
/// variable table: the script's for `initMult` objects, a private one for
/// objects the player allocates itself.
#[derive(Debug, Clone)]
pub struct MultObject {
    table: SharedVariables,
    pos_x: usize,
    pos_y: usize,
    anim_data: usize,
    pub tick: u8,
    pub last: Option<Rect>,
}

impl MultObject {
    pub fn new(table: SharedVariables, pos_x: usize, pos_y: usize, anim_data: usize) -> Self {
        MultObject {
            table,
            pos_x,
            pos_y,
            anim_data,
            tick: 0,
            last: None,
        }
    }

    pub fn position(&self) -> (i16, i16) {
        let vars = self.table.borrow();
        (
            vars.read_i32(self.pos_x) as i16,
            vars.read_i32(self.pos_y) as i16,
        )
    }

    pub fn set_position(&self, x: i16, y: i16) {
        let mut vars = self.table.borrow_mut();
        vars.write_u32(self.pos_x, x as i32 as u32);
        vars.write_u32(self.pos_y, y as i32 as u32);
    }

    pub fn data(&self) -> AnimData {
        AnimData::load(&self.table.borrow(), self.anim_data)
    }

    pub fn set_data(&self, data: &AnimData) {
        data.store(&mut self.table.borrow_mut(), self.anim_data);
    }
}

/// Objects one `multSub` track can drive.
pub const TRACK_OBJECTS: usize = 4;

/// A sub-sequence started by `multSub`: up to four objects follow a
/// track's keys between two frames, forwards or backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Track {
    pub active: bool,
    pub objects: [Option<usize>; TRACK_OBJECTS],
    pub frame: i16,
    pub start: i16,
    pub end: i16,
    pub dir: i16,
}

#[derive(Debug, Default)]
pub struct MultState {
    pub(crate) data: Option<MultData>,
    /// Sample slot per sound key, filled by `loadMult`.
    pub(crate) sound_slots: Vec<Option<usize>>,
    pub(crate) anim_layers: Vec<AnimLayers>,
    pub(crate) objects: Vec<MultObject>,
    pub(crate) objects_owned: bool,
    pub(crate) anim_area: Option<Rect>,
    pub(crate) frame: i16,
    pub(crate) palette: PaletteAnimator,
    pub(crate) tracks: [Track; ANIM_TRACKS],
}

impl MultState {
    pub fn data(&self) -> Option<&MultData> {
        self.data.as_ref()
    }

    pub fn objects(&self) -> &[MultObject] {
        &self.objects
    }

    pub fn anim_area(&self) -> Option<Rect> {
        self.anim_area
    }

    pub fn frame(&self) -> i16 {
        self.frame
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn sound_slots(&self) -> &[Option<usize>] {
        &self.sound_slots
    }

    /// Splits a global layer number into (animation, layer) by walking the
    /// layer counts of the loaded animations.
    pub fn resolve_layer(&self, layer: i16) -> Option<(usize, usize)> {
        let mut layer = usize::try_from(layer).ok()?;
        for (index, anim) in self.anim_layers.iter().enumerate() {
            if layer < anim.layer_count() {
                return Some((index, layer));
            }
            layer -= anim.layer_count();
        }
        None
    }

    pub(crate) fn frame_count(&self, animation: usize, layer: usize) -> usize {
        self.anim_layers
            .get(animation)
            .map_or(0, |anim| anim.frame_count(layer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gob_formats::FrameMetrics;
    use std::rc::Rc;

    #[test]
    fn anim_data_lives_in_the_variable_bytes() {
        let table = Variables::shared(16);
        let object = MultObject::new(Rc::clone(&table), 0, 4, 8);
        object.set_position(-3, 120);
        let data = AnimData {
            layer: 2,
            order: -1,
            is_static: 1,
            ..AnimData::default()
        };
        object.set_data(&data);

        assert_eq!(object.position(), (-3, 120));
        assert_eq!(table.borrow().read_u8(8 + 1), 2);
        assert_eq!(table.borrow().read_u8(8 + 4), 0xFF);
        assert_eq!(object.data(), data);
    }

    #[test]
    fn layers_are_numbered_across_animations() {
        let metrics = FrameMetrics {
            width: 1,
            height: 1,
            dx: 0,
            dy: 0,
        };
        let state = MultState {
            anim_layers: vec![
                AnimLayers::new(vec![vec![metrics]; 2]),
                AnimLayers::new(vec![vec![metrics]; 3]),
            ],
            ..MultState::default()
        };
        assert_eq!(state.resolve_layer(1), Some((0, 1)));
        assert_eq!(state.resolve_layer(2), Some((1, 0)));
        assert_eq!(state.resolve_layer(4), Some((1, 2)));
        assert_eq!(state.resolve_layer(5), None);
        assert_eq!(state.resolve_layer(-1), None);
    }
}
