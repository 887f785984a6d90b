use std::rc::Rc;
use std::sync::Arc;

use anyhow::{Context, Result};
use gob_formats::tot::ResourceLocation;
use gob_formats::{ExtTable, ResourceTable, TextTable, TotHeader};
use log::debug;

use crate::data_io::DataCollection;
use crate::error::EngineError;
use crate::variables::SharedVariables;

/// An `.ext` table together with the file it indexes.
#[derive(Debug)]
pub struct ExtResources {
    pub table: ExtTable,
    pub data: Vec<u8>,
}

/// One loaded program and the tables that came with it. Clones share the
/// underlying buffers.
#[derive(Debug, Clone)]
pub struct ProgramContext {
    pub name: String,
    pub data: Arc<[u8]>,
    pub header: TotHeader,
    pub texts: Option<Arc<TextTable>>,
    pub resources: Option<Arc<ResourceTable>>,
    pub ext: Option<Arc<ExtResources>>,
    pub images: Option<Arc<[u8]>>,
    pub cursor_hot_x: i16,
    pub cursor_hot_y: i16,
}

fn same_arc<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

/// Contexts compare by identity of their buffers, not by content.
impl PartialEq for ProgramContext {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && Arc::ptr_eq(&self.data, &other.data)
            && self.header == other.header
            && same_arc(&self.texts, &other.texts)
            && same_arc(&self.resources, &other.resources)
            && same_arc(&self.ext, &other.ext)
            && same_arc(&self.images, &other.images)
            && self.cursor_hot_x == other.cursor_hot_x
            && self.cursor_hot_y == other.cursor_hot_y
    }
}

impl ProgramContext {
    /// Parses the program header and tables and picks up the companion
    /// image and external-data files when `files` carries them.
    pub fn load(name: &str, data: Vec<u8>, files: &DataCollection) -> Result<Self> {
        let header =
            TotHeader::parse(&data).with_context(|| format!("parsing program header of {name}"))?;
        let texts = header
            .text_table
            .map(|offset| TextTable::parse(&data, offset))
            .transpose()
            .with_context(|| format!("parsing text table of {name}"))?;
        let resources = header
            .resource_table
            .map(|offset| ResourceTable::parse(&data, offset))
            .transpose()
            .with_context(|| format!("parsing resource table of {name}"))?;

        let image_name = header.image_file_name(name);
        let images: Option<Arc<[u8]>> = files.read(&image_name)?.map(Arc::from);
        if images.is_none() {
            debug!("{name}: no image blob {image_name}");
        }

        let ext_name = header.ext_file_name(name);
        let ext = match files.read(&ext_name)? {
            Some(bytes) => {
                let table = ExtTable::parse(&bytes).with_context(|| format!("parsing {ext_name}"))?;
                Some(Arc::new(ExtResources { table, data: bytes }))
            }
            None => None,
        };

        Ok(ProgramContext {
            name: name.to_string(),
            data: Arc::from(data),
            header,
            texts: texts.map(Arc::new),
            resources: resources.map(Arc::new),
            ext,
            images,
            cursor_hot_x: 0,
            cursor_hot_y: 0,
        })
    }

    /// Payload of program resource `id`, from the program or the image blob.
    pub fn resource(&self, id: usize) -> Option<&[u8]> {
        match self.resources.as_ref()?.location(id)? {
            ResourceLocation::Program(range) => self.data.get(range),
            ResourceLocation::Image(range) => self.images.as_ref()?.get(range),
        }
    }

    pub fn ext_resource(&self, id: usize) -> Result<Option<Vec<u8>>> {
        match &self.ext {
            Some(ext) if id < ext.table.len() => ext.table.load(&ext.data, id).map(Some),
            _ => Ok(None),
        }
    }

    pub fn text(&self, id: usize) -> Option<&[u8]> {
        let range = self.texts.as_ref()?.range(id)?;
        self.data.get(range)
    }
}

/// Who is responsible for a variable table. A sub-program either gets a
/// table of its own or keeps using its caller's; only the owner's snapshot
/// keeps an owned table alive.
#[derive(Debug, Clone)]
pub enum VariableSlot {
    Owned(SharedVariables),
    Inherited(SharedVariables),
}

impl VariableSlot {
    pub fn table(&self) -> &SharedVariables {
        match self {
            VariableSlot::Owned(table) | VariableSlot::Inherited(table) => table,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, VariableSlot::Owned(_))
    }

    /// Same table, borrowed.
    pub fn borrowed(&self) -> VariableSlot {
        VariableSlot::Inherited(Rc::clone(self.table()))
    }

    pub fn same_table(&self, other: &VariableSlot) -> bool {
        Rc::ptr_eq(self.table(), other.table())
    }
}

/// A passive copy of the active program state.
#[derive(Debug, Clone)]
pub struct ContextSnapshot {
    pub context: Option<ProgramContext>,
    pub variables: VariableSlot,
    pub ip: Option<usize>,
}

impl ContextSnapshot {
    pub fn same_as(&self, other: &ContextSnapshot) -> bool {
        self.context == other.context && self.variables.same_table(&other.variables) && self.ip == other.ip
    }
}

/// Bounded stack of saved contexts. `cursor` marks the context currently
/// re-entered by a backward switch; it equals `len()` otherwise.
#[derive(Debug)]
pub struct ContextStack {
    capacity: usize,
    frames: Vec<ContextSnapshot>,
    cursor: usize,
}

impl ContextStack {
    pub fn new(capacity: usize) -> Self {
        ContextStack {
            capacity,
            frames: Vec::new(),
            cursor: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn set_cursor(&mut self, cursor: usize) {
        self.cursor = cursor.min(self.frames.len());
    }

    pub fn get(&self, index: usize) -> Option<&ContextSnapshot> {
        self.frames.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut ContextSnapshot> {
        self.frames.get_mut(index)
    }

    pub fn push(&mut self, snapshot: ContextSnapshot) -> Result<(), EngineError> {
        if self.frames.len() >= self.capacity {
            return Err(EngineError::CapacityExceeded {
                what: "program context stack",
                capacity: self.capacity,
            });
        }
        self.frames.push(snapshot);
        self.cursor = self.frames.len();
        Ok(())
    }

    pub fn pop(&mut self) -> Option<ContextSnapshot> {
        let frame = self.frames.pop();
        self.cursor = self.frames.len();
        frame
    }

    pub fn truncate(&mut self, len: usize) {
        self.frames.truncate(len);
        self.cursor = self.cursor.min(self.frames.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::Variables;

    fn snapshot(ip: usize) -> ContextSnapshot {
        ContextSnapshot {
            context: None,
            variables: VariableSlot::Owned(Variables::shared(4)),
            ip: Some(ip),
        }
    }

    #[test]
    fn pushes_beyond_capacity_are_rejected() {
        let mut stack = ContextStack::new(2);
        stack.push(snapshot(1)).unwrap();
        stack.push(snapshot(2)).unwrap();
        let err = stack.push(snapshot(3)).unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapacityExceeded {
                capacity: 2,
                ..
            }
        ));
        assert_eq!(stack.pop().and_then(|s| s.ip), Some(2));
        assert_eq!(stack.cursor(), 1);
    }

    #[test]
    fn borrowed_slots_share_the_table() {
        let owned = VariableSlot::Owned(Variables::shared(2));
        let borrowed = owned.borrowed();
        assert!(!borrowed.is_owned());
        assert!(owned.same_table(&borrowed));
        borrowed.table().borrow_mut().set_var(1, 7);
        assert_eq!(owned.table().borrow().var(1), 7);
        assert!(!owned.same_table(&VariableSlot::Owned(Variables::shared(2))));
    }
}
