use std::sync::Arc;
use crate::page::{CacheParams, FileId};
use crate::source::PageSource;

/// An open file and the cache it is attached to
pub struct FileEntry {
    pub name: String,
    pub source: Arc<dyn PageSource>,
    pub params: CacheParams,
    pub uses: usize,
}

struct FileSlot {
    generation: u32,
    entry: Option<FileEntry>,
}

/// Generational slab of open files
///
/// Removing an entry bumps its slot's generation, so a handle kept past
/// release no longer resolves.
#[derive(Default)]
pub struct FileTable {
    slots: Vec<FileSlot>,
    free: Vec<u32>,
}

impl FileTable {
    pub fn insert(&mut self, entry: FileEntry) -> FileId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.entry = Some(entry);
            return FileId::new(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(FileSlot {
            generation: 0,
            entry: Some(entry),
        });
        FileId::new(index, 0)
    }

    pub fn get(&self, id: FileId) -> Option<&FileEntry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    pub fn get_mut(&mut self, id: FileId) -> Option<&mut FileEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    pub fn remove(&mut self, id: FileId) -> Option<FileEntry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.entry.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = &FileEntry> {
        self.slots.iter().filter_map(|s| s.entry.as_ref())
    }
}
