use log::{debug, warn};
use serde::Serialize;

use crate::error::{EngineError, Result};
use crate::input::MouseButtons;

/// High nibble of an area id.
pub mod kind {
    pub const HOTSPOT: u16 = 0x8000;
    pub const CLICK: u16 = 0x9000;
    pub const INPUT: u16 = 0xA000;
    pub const MENU: u16 = 0xB000;
    pub const MASK: u16 = 0xF000;
    pub const DISABLED: u16 = 0x4000;
}

/// Sentinel escape code returned for an unmatched non-left click.
pub const UNMATCHED_CLICK_KEY: u16 = 0x11B;

/// Areas with ids below this survive a partial push.
const PERSISTENT_ID_LIMIT: u16 = 20;

const FREE: i16 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollisionArea {
    pub id: u16,
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
    pub flags: u16,
    pub key: u16,
    pub func_enter: u16,
    pub func_leave: u16,
    /// Program offset of the four coordinate expressions, 0 for fixed
    /// areas.
    pub func_sub: u16,
}

impl CollisionArea {
    pub const EMPTY: CollisionArea = CollisionArea {
        id: 0,
        left: FREE,
        top: 0,
        right: 0,
        bottom: 0,
        flags: 0,
        key: 0,
        func_enter: 0,
        func_leave: 0,
        func_sub: 0,
    };

    pub fn is_free(&self) -> bool {
        self.left == FREE
    }

    /// Hotspots run enter/leave scripts while the cursor hovers.
    pub fn is_trackable(&self) -> bool {
        self.id & kind::MASK == kind::HOTSPOT
    }

    /// Geometry comes from expressions re-evaluated by `set_collisions`.
    pub fn is_dynamic(&self) -> bool {
        self.id & 0xC000 == 0x8000 && self.func_sub != 0
    }

    pub fn contains(&self, x: i16, y: i16) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }
}

/// A hit from `find_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hit {
    pub key: u16,
    pub id: u16,
    pub index: usize,
}

impl Hit {
    pub const NONE: Hit = Hit {
        key: 0,
        id: 0,
        index: 0,
    };
}

/// Fixed array of hotspot rectangles plus a stack of saved copies.
#[derive(Debug, Clone)]
pub struct Collisions {
    areas: Vec<CollisionArea>,
    stack: Vec<Vec<CollisionArea>>,
    stack_depth: usize,
}

impl Collisions {
    pub fn new(capacity: usize, stack_depth: usize) -> Self {
        Collisions {
            areas: vec![CollisionArea::EMPTY; capacity],
            stack: Vec::new(),
            stack_depth,
        }
    }

    pub fn capacity(&self) -> usize {
        self.areas.len()
    }

    pub fn areas(&self) -> &[CollisionArea] {
        &self.areas
    }

    pub fn area(&self, index: usize) -> Option<&CollisionArea> {
        self.areas.get(index).filter(|area| !area.is_free())
    }

    pub fn area_mut(&mut self, index: usize) -> Option<&mut CollisionArea> {
        self.areas.get_mut(index).filter(|area| !area.is_free())
    }

    pub fn live(&self) -> impl Iterator<Item = (usize, &CollisionArea)> {
        self.areas
            .iter()
            .enumerate()
            .filter(|(_, area)| !area.is_free())
    }

    pub fn live_count(&self) -> usize {
        self.live().count()
    }

    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Places `area` in the first free slot and returns the slot.
    pub fn add(&mut self, area: CollisionArea) -> Result<usize> {
        let capacity = self.areas.len();
        let Some(index) = self.areas.iter().position(CollisionArea::is_free) else {
            return Err(EngineError::CapacityExceeded {
                what: "collision table",
                capacity,
            });
        };
        if area.is_free() {
            warn!("collision {:#06x} added with the free sentinel as left edge", area.id);
        }
        debug!(
            "collision {:#06x} -> slot {index} ({},{})-({},{}) key {:#x}",
            area.id, area.left, area.top, area.right, area.bottom, area.key
        );
        self.areas[index] = area;
        Ok(index)
    }

    pub fn free(&mut self, id: u16) {
        for area in self.areas.iter_mut().filter(|area| area.id == id) {
            *area = CollisionArea::EMPTY;
        }
    }

    pub fn clear(&mut self) {
        self.areas.fill(CollisionArea::EMPTY);
    }

    /// Saves the whole table, then frees either every area (`all`) or every
    /// area whose id is not in the persistent range.
    pub fn push(&mut self, all: bool) -> Result<()> {
        if self.stack.len() >= self.stack_depth {
            return Err(EngineError::CapacityExceeded {
                what: "collision stack",
                capacity: self.stack_depth,
            });
        }
        self.stack.push(self.areas.clone());
        for area in self.areas.iter_mut() {
            if all || area.id >= PERSISTENT_ID_LIMIT {
                *area = CollisionArea::EMPTY;
            }
        }
        Ok(())
    }

    /// Restores the table saved by the matching `push`.
    pub fn pop(&mut self) {
        match self.stack.pop() {
            Some(saved) => self.areas = saved,
            None => warn!("popCollisions with an empty stack"),
        }
    }

    /// Hit-tests the live areas at `(x, y)`.
    ///
    /// `all` looks for hover targets: plain areas without a button filter.
    /// Otherwise the area's button nibble (bits 4-6) has to accept
    /// `buttons`. An unmatched click with anything but the lone left button
    /// answers `UNMATCHED_CLICK_KEY` when `escape_quirk` is on.
    pub fn find_at(
        &self,
        all: bool,
        x: i16,
        y: i16,
        buttons: MouseButtons,
        escape_quirk: bool,
    ) -> Hit {
        let pressed = buttons.bits() as i32;
        for (index, area) in self.live() {
            if area.id & kind::DISABLED != 0 || area.flags & 0xFF00 != 0 {
                continue;
            }
            let class = area.flags & 0xF;
            if all {
                if class > 1 {
                    continue;
                }
            } else {
                if class != 1 && class != 2 {
                    continue;
                }
                let nibble = ((area.flags & 0x70) >> 4) as i32;
                if nibble - 1 != pressed && nibble + 2 != pressed {
                    continue;
                }
            }
            if !area.contains(x, y) {
                continue;
            }
            return Hit {
                key: area.key,
                id: area.id,
                index,
            };
        }
        if escape_quirk && !all && buttons != MouseButtons::LEFT {
            return Hit {
                key: UNMATCHED_CLICK_KEY,
                ..Hit::NONE
            };
        }
        Hit::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn area(id: u16, left: i16, flags: u16, key: u16) -> CollisionArea {
        CollisionArea {
            id,
            left,
            top: 0,
            right: left + 9,
            bottom: 9,
            flags,
            key,
            ..CollisionArea::EMPTY
        }
    }

    #[test]
    fn add_fills_the_first_free_slot_and_reports_overflow() {
        let mut table = Collisions::new(2, 4);
        assert_eq!(table.add(area(0x8001, 0, 0, 1)).unwrap(), 0);
        assert_eq!(table.add(area(0x8002, 20, 0, 2)).unwrap(), 1);
        let err = table.add(area(0x8003, 40, 0, 3)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapacityExceeded {
                capacity: 2,
                ..
            }
        ));
        table.free(0x8001);
        assert_eq!(table.add(area(0x8003, 40, 0, 3)).unwrap(), 0);
        assert!(table.live().all(|(_, a)| a.id != 0x8001));
    }

    #[test]
    fn push_pop_restores_the_table_exactly() {
        let mut table = Collisions::new(8, 4);
        table.add(area(3, 0, 0, 1)).unwrap();
        table.add(area(0x8001, 20, 0, 2)).unwrap();
        table.add(area(0x9002, 40, 0x21, 3)).unwrap();
        table.free(3);
        table.add(area(0x8005, 60, 0, 4)).unwrap();
        let before = table.areas().to_vec();

        table.push(false).unwrap();
        assert_eq!(table.live_count(), 0);
        table.add(area(0xA000, 0, 0, 9)).unwrap();
        table.pop();
        assert_eq!(table.areas(), &before[..]);
    }

    #[test]
    fn partial_push_keeps_low_ids_live() {
        let mut table = Collisions::new(4, 4);
        table.add(area(5, 0, 0, 1)).unwrap();
        table.add(area(0x8001, 20, 0, 2)).unwrap();
        table.push(false).unwrap();
        let ids: Vec<u16> = table.live().map(|(_, a)| a.id).collect();
        assert_eq!(ids, vec![5]);
        table.pop();
        table.push(true).unwrap();
        assert_eq!(table.live_count(), 0);
    }

    #[test]
    fn stack_depth_is_checked() {
        let mut table = Collisions::new(1, 1);
        table.push(true).unwrap();
        assert!(table.push(true).unwrap_err().is_recoverable());
    }

    #[test]
    fn hover_and_click_filters() {
        let mut table = Collisions::new(4, 1);
        table.add(area(0x8001, 0, 0, 0x41)).unwrap();
        // click class 1, button nibble 2 accepts the left button
        table.add(area(0x9001, 20, 0x21, 0x42)).unwrap();

        let none = MouseButtons::empty();
        assert_eq!(table.find_at(true, 5, 5, none, true).key, 0x41);
        // class 1 areas also count as hover targets
        assert_eq!(table.find_at(true, 25, 5, none, true).index, 1);

        let hit = table.find_at(false, 25, 5, MouseButtons::LEFT, true);
        assert_eq!((hit.key, hit.id), (0x42, 0x9001));
        assert_eq!(table.find_at(false, 5, 5, MouseButtons::LEFT, true), Hit::NONE);
        assert_eq!(
            table.find_at(false, 200, 5, MouseButtons::RIGHT, true).key,
            UNMATCHED_CLICK_KEY
        );
        assert_eq!(table.find_at(false, 200, 5, MouseButtons::RIGHT, false), Hit::NONE);
    }
}
