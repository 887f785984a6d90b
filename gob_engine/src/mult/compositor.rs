//! Draw ordering and dirty-rectangle bookkeeping for Mult objects.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rect {
    pub left: i16,
    pub top: i16,
    pub right: i16,
    pub bottom: i16,
}

impl Rect {
    pub fn intersects(&self, other: &Rect) -> bool {
        self.left <= other.right
            && other.left <= self.right
            && self.top <= other.bottom
            && other.top <= self.bottom
    }
}

/// What the compositor needs to know about one object this frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectView {
    pub object: usize,
    pub order: i16,
    /// Animating (not paused, not static).
    pub busy: bool,
    pub last: Option<Rect>,
    pub current: Option<Rect>,
}

impl ObjectView {
    fn changed(&self) -> bool {
        self.current != self.last
    }

    fn bottom(&self) -> i16 {
        self.current.or(self.last).map_or(i16::MIN, |r| r.bottom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawCommand {
    Erase { object: usize, rect: Rect },
    /// `forced` marks an unchanged object repainted because something
    /// beneath it was.
    Draw { object: usize, rect: Rect, forced: bool },
}

/// Back-to-front order: ascending `order`, then ascending bottom edge.
/// With `busy_tiebreak`, idle objects go before busy ones on a tie.
pub fn draw_order(views: &[ObjectView], busy_tiebreak: bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..views.len()).collect();
    order.sort_by_key(|&i| {
        let view = &views[i];
        let busy = busy_tiebreak && view.busy;
        (view.order, view.bottom(), busy)
    });
    order
}

/// Erases every moved object's old rectangle, then repaints back to front
/// everything that changed or overlaps an area already touched this frame.
pub fn compose(views: &[ObjectView], busy_tiebreak: bool) -> Vec<DrawCommand> {
    let mut commands = Vec::new();
    let mut dirty = Vec::new();
    for view in views.iter().filter(|v| v.changed()) {
        if let Some(rect) = view.last {
            commands.push(DrawCommand::Erase {
                object: view.object,
                rect,
            });
            dirty.push(rect);
        }
    }
    for index in draw_order(views, busy_tiebreak) {
        let view = &views[index];
        let Some(rect) = view.current else {
            continue;
        };
        let changed = view.changed();
        if changed || dirty.iter().any(|d| d.intersects(&rect)) {
            commands.push(DrawCommand::Draw {
                object: view.object,
                rect,
                forced: !changed,
            });
            dirty.push(rect);
        }
    }
    commands
}
