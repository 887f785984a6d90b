use gob_formats::mult::Rgb;
use log::{debug, warn};
use serde::Serialize;

use crate::error::{EngineError, Result};

pub const PALETTE_SIZE: usize = 256;

/// Sprite slot holding the back buffer. Scripts that make it larger than
/// the screen get a scrolling viewport.
pub const BACK_SURFACE: usize = 21;

const VIEWPORT_STEP: i16 = 8;

/// 8-bit indexed pixel buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Surface {
    width: i16,
    height: i16,
    pixels: Vec<u8>,
}

impl Surface {
    pub fn new(width: i16, height: i16) -> Self {
        let width = width.max(0);
        let height = height.max(0);
        Surface {
            width,
            height,
            pixels: vec![0; width as usize * height as usize],
        }
    }

    pub fn width(&self) -> i16 {
        self.width
    }

    pub fn height(&self) -> i16 {
        self.height
    }

    fn index(&self, x: i16, y: i16) -> Option<usize> {
        if x < 0 || y < 0 || x >= self.width || y >= self.height {
            return None;
        }
        Some(y as usize * self.width as usize + x as usize)
    }

    pub fn pixel(&self, x: i16, y: i16) -> Option<u8> {
        self.index(x, y).map(|i| self.pixels[i])
    }

    pub fn put_pixel(&mut self, x: i16, y: i16, color: u8) {
        if let Some(i) = self.index(x, y) {
            self.pixels[i] = color;
        }
    }

    /// Inclusive rectangle, clipped.
    pub fn fill_rect(&mut self, left: i16, top: i16, right: i16, bottom: i16, color: u8) {
        for y in top.max(0)..=bottom.min(self.height - 1) {
            for x in left.max(0)..=right.min(self.width - 1) {
                self.put_pixel(x, y, color);
            }
        }
    }

    /// Copies the inclusive rectangle of `src` to `(x, y)` in `self`.
    pub fn copy_rect(
        &mut self,
        src: &Surface,
        left: i16,
        top: i16,
        right: i16,
        bottom: i16,
        x: i16,
        y: i16,
    ) {
        for sy in top..=bottom {
            for sx in left..=right {
                if let Some(color) = src.pixel(sx, sy) {
                    self.put_pixel(x + (sx - left), y + (sy - top), color);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct CaptureFrame {
    left: i16,
    top: i16,
    pixels: Surface,
}

/// Saved screen regions for overlays. Captures are widened to 16-pixel
/// column boundaries.
#[derive(Debug, Clone)]
pub struct CaptureStack {
    capacity: usize,
    frames: Vec<CaptureFrame>,
}

impl CaptureStack {
    pub fn new(capacity: usize) -> Self {
        CaptureStack {
            capacity,
            frames: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Returns the aligned inclusive rectangle that was saved.
    pub fn push(
        &mut self,
        screen: &Surface,
        left: i16,
        top: i16,
        width: i16,
        height: i16,
    ) -> Result<(i16, i16, i16, i16)> {
        if self.frames.len() >= self.capacity {
            return Err(EngineError::CapacityExceeded {
                what: "capture stack",
                capacity: self.capacity,
            });
        }
        let right = (left + width - 1) | 0xF;
        let bottom = top + height - 1;
        let left = left & !0xF;
        let mut pixels = Surface::new(right - left + 1, bottom - top + 1);
        pixels.copy_rect(screen, left, top, right, bottom, 0, 0);
        self.frames.push(CaptureFrame { left, top, pixels });
        Ok((left, top, right, bottom))
    }

    pub fn pop(&mut self, screen: &mut Surface) -> bool {
        let Some(frame) = self.frames.pop() else {
            return false;
        };
        let surface = &frame.pixels;
        screen.copy_rect(
            surface,
            0,
            0,
            surface.width() - 1,
            surface.height() - 1,
            frame.left,
            frame.top,
        );
        true
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VideoEvent {
    PutPixel {
        surface: i16,
        x: i16,
        y: i16,
        color: u8,
    },
    LoadSprite {
        sprite: i16,
        x: i16,
        y: i16,
        transparent: bool,
    },
    PrintText {
        x: i16,
        y: i16,
        font: i16,
        color: i16,
        text: String,
    },
    CreateSprite {
        index: i16,
        width: i16,
        height: i16,
    },
    FreeSprite {
        index: i16,
    },
    CapturePush {
        left: i16,
        top: i16,
        right: i16,
        bottom: i16,
    },
    CapturePop,
    Palette {
        first: u16,
        count: u16,
    },
    PaletteFade {
        palette: i16,
        step: i16,
    },
    Erase {
        object: usize,
        left: i16,
        top: i16,
        right: i16,
        bottom: i16,
    },
    DrawObject {
        object: usize,
        animation: i16,
        layer: i16,
        frame: i16,
        left: i16,
        top: i16,
        right: i16,
        bottom: i16,
    },
    DrawStatic {
        layer: i16,
    },
    MultText {
        frame: i16,
        index: i16,
        visible: bool,
    },
    MultAux {
        frame: i16,
        values: [i16; 7],
    },
    ViewportShift {
        x: i16,
        y: i16,
    },
}

/// Screen, sprite slots, palette and the capture stack. Drawing is reduced
/// to what scripts can observe; every operation is also logged.
#[derive(Debug)]
pub struct Video {
    pub screen: Surface,
    sprites: Vec<Option<Surface>>,
    pub palette: [Rgb; PALETTE_SIZE],
    pub captures: CaptureStack,
    pub scroll_x: i16,
    pub scroll_y: i16,
    events: Vec<VideoEvent>,
}

impl Video {
    pub fn new(width: i16, height: i16, sprite_slots: usize, capture_depth: usize) -> Self {
        Video {
            screen: Surface::new(width, height),
            sprites: vec![None; sprite_slots],
            palette: [Rgb::default(); PALETTE_SIZE],
            captures: CaptureStack::new(capture_depth),
            scroll_x: 0,
            scroll_y: 0,
            events: Vec::new(),
        }
    }

    pub fn record(&mut self, event: VideoEvent) {
        self.events.push(event);
    }

    pub fn events(&self) -> &[VideoEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<VideoEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn sprite(&self, index: usize) -> Option<&Surface> {
        self.sprites.get(index).and_then(|slot| slot.as_ref())
    }

    pub fn create_sprite(&mut self, index: i16, width: i16, height: i16) {
        let Some(slot) = usize::try_from(index).ok().and_then(|i| self.sprites.get_mut(i)) else {
            warn!("createSprite: slot {index} out of range");
            return;
        };
        *slot = Some(Surface::new(width, height));
        self.record(VideoEvent::CreateSprite {
            index,
            width,
            height,
        });
    }

    pub fn free_sprite(&mut self, index: i16) {
        if let Some(slot) = usize::try_from(index).ok().and_then(|i| self.sprites.get_mut(i)) {
            *slot = None;
            self.record(VideoEvent::FreeSprite { index });
        }
    }

    /// Drops every sprite surface; used when a program is torn down.
    pub fn free_sprites(&mut self) {
        for slot in &mut self.sprites {
            *slot = None;
        }
    }

    /// Surface indices below the sprite table address sprites; anything
    /// else draws on the screen.
    pub fn put_pixel(&mut self, surface: i16, x: i16, y: i16, color: u8) {
        let target = usize::try_from(surface)
            .ok()
            .and_then(|i| self.sprites.get_mut(i))
            .and_then(|slot| slot.as_mut());
        match target {
            Some(sprite) => sprite.put_pixel(x, y, color),
            None => self.screen.put_pixel(x, y, color),
        }
        self.record(VideoEvent::PutPixel {
            surface,
            x,
            y,
            color,
        });
    }

    pub fn capture_push(&mut self, left: i16, top: i16, width: i16, height: i16) -> Result<()> {
        let (left, top, right, bottom) =
            self.captures
                .push(&self.screen, left, top, width, height)?;
        self.record(VideoEvent::CapturePush {
            left,
            top,
            right,
            bottom,
        });
        Ok(())
    }

    pub fn capture_pop(&mut self) {
        if self.captures.pop(&mut self.screen) {
            self.record(VideoEvent::CapturePop);
        } else {
            debug!("capturePop on empty stack");
        }
    }

    pub fn set_colors(&mut self, first: usize, colors: &[Rgb]) {
        let end = (first + colors.len()).min(PALETTE_SIZE);
        if first >= end {
            return;
        }
        self.palette[first..end].copy_from_slice(&colors[..end - first]);
        self.record(VideoEvent::Palette {
            first: first as u16,
            count: (end - first) as u16,
        });
    }

    /// Moves the visible window over an oversized back surface while the
    /// cursor sits on a screen edge.
    pub fn shift_viewport(&mut self, mouse_x: i16, mouse_y: i16, visible_w: i16, visible_h: i16) {
        let Some(back) = self.sprite(BACK_SURFACE) else {
            return;
        };
        let max_x = (back.width() - visible_w).max(0);
        let max_y = (back.height() - visible_h).max(0);
        if max_x == 0 && max_y == 0 {
            return;
        }
        let step = |pos: i16, edge: i16| {
            if pos <= 0 {
                -VIEWPORT_STEP
            } else if pos >= edge - 1 {
                VIEWPORT_STEP
            } else {
                0
            }
        };
        let x = (self.scroll_x + step(mouse_x, visible_w)).clamp(0, max_x);
        let y = (self.scroll_y + step(mouse_y, visible_h)).clamp(0, max_y);
        if (x, y) != (self.scroll_x, self.scroll_y) {
            self.scroll_x = x;
            self.scroll_y = y;
            self.record(VideoEvent::ViewportShift { x, y });
        }
    }

    /// Rotates entries `low..=high` one step; `dir > 0` moves each colour up
    /// one index, `dir < 0` down.
    pub fn rotate_palette(&mut self, dir: i16, low: i16, high: i16) {
        if dir == 0 || low < 0 || high <= low || high as usize >= PALETTE_SIZE {
            return;
        }
        let range = &mut self.palette[low as usize..=high as usize];
        if dir > 0 {
            range.rotate_right(1);
        } else {
            range.rotate_left(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_restores_the_widened_region() {
        let mut video = Video::new(64, 16, 4, 2);
        video.screen.fill_rect(0, 0, 63, 15, 3);
        video.capture_push(18, 2, 4, 4).unwrap();
        assert_eq!(
            video.events().last(),
            Some(&VideoEvent::CapturePush {
                left: 16,
                top: 2,
                right: 31,
                bottom: 5
            })
        );
        video.screen.fill_rect(0, 0, 63, 15, 9);
        video.capture_pop();
        assert_eq!(video.screen.pixel(16, 2), Some(3));
        assert_eq!(video.screen.pixel(31, 5), Some(3));
        assert_eq!(video.screen.pixel(32, 5), Some(9));
        assert_eq!(video.screen.pixel(16, 6), Some(9));
    }

    #[test]
    fn capture_depth_is_bounded() {
        let mut video = Video::new(32, 32, 0, 1);
        video.capture_push(0, 0, 8, 8).unwrap();
        let err = video.capture_push(0, 0, 8, 8).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(video.captures.len(), 1);
    }

    #[test]
    fn palette_rotation_wraps_inside_the_range() {
        let mut video = Video::new(1, 1, 0, 1);
        for i in 0..4u8 {
            video.palette[i as usize] = Rgb {
                red: i,
                green: 0,
                blue: 0,
            };
        }
        video.rotate_palette(1, 1, 3);
        let reds: Vec<u8> = video.palette[..4].iter().map(|c| c.red).collect();
        assert_eq!(reds, vec![0, 3, 1, 2]);
    }

    #[test]
    fn viewport_follows_the_cursor_to_the_edge() {
        let mut video = Video::new(32, 16, 24, 1);
        video.shift_viewport(31, 8, 32, 16);
        assert_eq!(video.scroll_x, 0);

        video.create_sprite(BACK_SURFACE as i16, 44, 16);
        video.shift_viewport(31, 8, 32, 16);
        video.shift_viewport(31, 8, 32, 16);
        assert_eq!((video.scroll_x, video.scroll_y), (12, 0));
        video.shift_viewport(0, 8, 32, 16);
        assert_eq!(
            video.events().last(),
            Some(&VideoEvent::ViewportShift { x: 4, y: 0 })
        );
    }
}
