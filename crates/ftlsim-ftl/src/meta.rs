//! Per-page and per-block state machines, running page counts, and the
//! endurance heatmap.
//!
//! Page lifecycle: `Clean -write-> Dirty -abandon-> Abandoned`, with a
//! block erase taking every page back to `Clean`. `Dirty -> Dirty` has no
//! transition; attempting it is an engine bug that the page I/O wrapper
//! turns into a fatal error. Block state is derived: a block is `Dirty`
//! exactly while it holds at least one non-`Clean` page.
//!
//! State and heatmap are always indexed by the plain geometry-linear page
//! index, whatever linearization an engine uses for its mapping tables.

use ftlsim_geo::Geometry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    Clean,
    Dirty,
    Abandoned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Clean,
    Dirty,
}

/// Running totals over all page states; updated on every transition so
/// engines never rescan the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCounts {
    pub clean: u64,
    pub dirty: u64,
    pub abandoned: u64,
}

#[derive(Debug)]
pub struct StateTable {
    geo: Geometry,
    pages: Vec<PageState>,
    blocks: Vec<BlockState>,
    counts: PageCounts,
}

impl StateTable {
    pub fn new(geo: Geometry) -> Self {
        StateTable {
            geo,
            pages: vec![PageState::Clean; geo.total_pages() as usize],
            blocks: vec![BlockState::Clean; geo.total_blocks() as usize],
            counts: PageCounts {
                clean: geo.total_pages(),
                dirty: 0,
                abandoned: 0,
            },
        }
    }

    pub fn page(&self, vpg: u64) -> PageState {
        self.pages[vpg as usize]
    }

    pub fn block(&self, vblk: u64) -> BlockState {
        self.blocks[vblk as usize]
    }

    pub fn counts(&self) -> PageCounts {
        self.counts
    }

    /// Record a page program: `Clean -> Dirty`, block becomes `Dirty`.
    pub fn mark_dirty(&mut self, vpg: u64) {
        debug_assert_eq!(self.pages[vpg as usize], PageState::Clean);
        self.pages[vpg as usize] = PageState::Dirty;
        self.counts.clean -= 1;
        self.counts.dirty += 1;
        self.blocks[self.geo.vblk_of_vpg(vpg) as usize] = BlockState::Dirty;
    }

    /// Record that a page's content went stale: `Dirty -> Abandoned`.
    pub fn mark_abandoned(&mut self, vpg: u64) {
        debug_assert_eq!(self.pages[vpg as usize], PageState::Dirty);
        self.pages[vpg as usize] = PageState::Abandoned;
        self.counts.dirty -= 1;
        self.counts.abandoned += 1;
    }

    /// Record a block erase: every page in `vblk` back to `Clean`.
    pub fn reset_block(&mut self, vblk: u64) {
        let mut addr = self.geo.vblk_addr(vblk);
        for pg in 0..self.geo.npgs {
            addr.pg = pg;
            let vpg = self.geo.vpg(&addr) as usize;
            match self.pages[vpg] {
                PageState::Clean => {}
                PageState::Dirty => {
                    self.counts.dirty -= 1;
                    self.counts.clean += 1;
                }
                PageState::Abandoned => {
                    self.counts.abandoned -= 1;
                    self.counts.clean += 1;
                }
            }
            self.pages[vpg] = PageState::Clean;
        }
        self.blocks[vblk as usize] = BlockState::Clean;
    }

    /// Audit the block-state derivation and the running counts against the
    /// raw page table. Test support; linear in the device size.
    pub fn audit(&self) -> Result<(), String> {
        let mut counts = PageCounts {
            clean: 0,
            dirty: 0,
            abandoned: 0,
        };
        for state in &self.pages {
            match state {
                PageState::Clean => counts.clean += 1,
                PageState::Dirty => counts.dirty += 1,
                PageState::Abandoned => counts.abandoned += 1,
            }
        }
        if counts != self.counts {
            return Err(format!(
                "running counts {:?} disagree with page table {:?}",
                self.counts, counts
            ));
        }
        for vblk in 0..self.geo.total_blocks() {
            let mut addr = self.geo.vblk_addr(vblk);
            let mut any_used = false;
            for pg in 0..self.geo.npgs {
                addr.pg = pg;
                any_used |= self.pages[self.geo.vpg(&addr) as usize] != PageState::Clean;
            }
            let derived = if any_used {
                BlockState::Dirty
            } else {
                BlockState::Clean
            };
            if derived != self.blocks[vblk as usize] {
                return Err(format!(
                    "block {vblk} recorded {:?} but pages say {:?}",
                    self.blocks[vblk as usize], derived
                ));
            }
        }
        Ok(())
    }
}

/// Per-page counters of device operations that touched the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeatCell {
    pub reads: u64,
    pub writes: u64,
    pub erases: u64,
}

#[derive(Debug)]
pub struct Heatmap {
    cells: Vec<HeatCell>,
}

impl Heatmap {
    pub fn new(geo: &Geometry) -> Self {
        Heatmap {
            cells: vec![HeatCell::default(); geo.total_pages() as usize],
        }
    }

    pub fn cell(&self, vpg: u64) -> HeatCell {
        self.cells[vpg as usize]
    }

    pub fn record_read(&mut self, vpg: u64) {
        self.cells[vpg as usize].reads += 1;
    }

    pub fn record_write(&mut self, vpg: u64) {
        self.cells[vpg as usize].writes += 1;
    }

    pub fn record_erase(&mut self, vpg: u64) {
        self.cells[vpg as usize].erases += 1;
    }

    /// Sum across all pages; reads/writes count device page ops, erases
    /// count pages touched by block erases.
    pub fn totals(&self) -> HeatCell {
        let mut total = HeatCell::default();
        for cell in &self.cells {
            total.reads += cell.reads;
            total.writes += cell.writes;
            total.erases += cell.erases;
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> StateTable {
        StateTable::new(Geometry::new(2, 2, 4, 8, 2, 4096).unwrap())
    }

    #[test]
    fn write_abandon_erase_cycle() {
        let mut st = table();
        let geo = Geometry::new(2, 2, 4, 8, 2, 4096).unwrap();
        let vblk = geo.vblk_of_vpg(0);

        assert_eq!(st.page(0), PageState::Clean);
        assert_eq!(st.block(vblk), BlockState::Clean);

        st.mark_dirty(0);
        assert_eq!(st.page(0), PageState::Dirty);
        assert_eq!(st.block(vblk), BlockState::Dirty);
        assert_eq!(st.counts().dirty, 1);

        st.mark_abandoned(0);
        assert_eq!(st.page(0), PageState::Abandoned);
        assert_eq!(st.block(vblk), BlockState::Dirty);
        assert_eq!(st.counts().abandoned, 1);

        st.reset_block(vblk);
        assert_eq!(st.page(0), PageState::Clean);
        assert_eq!(st.block(vblk), BlockState::Clean);
        assert_eq!(st.counts().clean, 512);
        st.audit().unwrap();
    }

    #[test]
    fn counts_track_every_transition() {
        let mut st = table();
        st.mark_dirty(3);
        st.mark_dirty(7);
        st.mark_abandoned(3);
        let counts = st.counts();
        assert_eq!(counts.clean, 510);
        assert_eq!(counts.dirty, 1);
        assert_eq!(counts.abandoned, 1);
        st.audit().unwrap();
    }
}
