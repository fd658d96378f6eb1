use std::fmt;
use crate::page::PageAddress;
use super::cache::SlotState;

/// One slot as seen by the diagnostic overlay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCell {
    pub address: Option<PageAddress>,
    pub state: SlotState,

    /// Frames since the slot was last touched
    pub age: u64,
}

/// Snapshot of a cache's slot table for on-screen debugging
///
/// `x0..x1` is the horizontal band of a normalized 0..1 overlay that this
/// cache occupies when several caches are drawn side by side.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheOverlay {
    pub index: usize,
    pub total: usize,
    pub x0: f32,
    pub x1: f32,
    pub frame: u64,
    pub cells: Vec<SlotCell>,
}

impl CacheOverlay {
    pub fn count(&self, state: SlotState) -> usize {
        self.cells.iter().filter(|cell| cell.state == state).count()
    }
}

impl fmt::Display for CacheOverlay {
    /// One character per slot: `.` empty, `o` loading, `#` ready, `x` failed
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] ", self.index, self.total)?;
        for cell in &self.cells {
            let c = match cell.state {
                SlotState::Empty => '.',
                SlotState::Loading => 'o',
                SlotState::Ready => '#',
                SlotState::Failed => 'x',
            };
            write!(f, "{}", c)?;
        }
        Ok(())
    }
}
