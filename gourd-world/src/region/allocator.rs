/// Tracks which 4 KiB sectors of the backing file are free.
///
/// `true` means free. Sectors 0 and 1 hold the offset and timestamp
/// tables and stay used for the lifetime of the file.
pub struct SectorAllocator {
    free: Vec<bool>,
}

/// Outcome of [`SectorAllocator::allocate`].
///
/// `appended` is how many sectors the file must grow by; it is zero when
/// an existing free run was reused and equal to the requested length
/// otherwise. The caller owns zero-filling the new file tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub start: u32,
    pub appended: u32,
}

impl SectorAllocator {
    pub fn from_sector_count(sectors: usize) -> Self {
        debug_assert!(sectors >= 2);
        let mut free = vec![true; sectors];
        free[0] = false; // chunk offset table
        free[1] = false; // timestamp table
        Self { free }
    }

    pub fn sector_count(&self) -> usize {
        self.free.len()
    }

    /// Marks a run used while replaying header entries at open time.
    /// The run must already fit in the file.
    pub fn mark_used(&mut self, start: u32, count: u32) {
        for sector in start..start + count {
            self.free[sector as usize] = false;
        }
    }

    /// Returns a run to the free pool, typically after its chunk was
    /// relocated. Freeing without reallocating is fine.
    pub fn free(&mut self, start: u32, count: u32) {
        for sector in start..start + count {
            self.free[sector as usize] = true;
        }
    }

    /// First-fit scan from the lowest sector for a contiguous free run,
    /// falling back to appending at the end of the file. Fragmentation
    /// alone can therefore never fail an allocation.
    pub fn allocate(&mut self, needed: u32) -> Allocation {
        debug_assert!(needed > 0);

        if let Some(start) = self.find_free_run(needed as usize) {
            self.mark_used(start, needed);
            return Allocation { start, appended: 0 };
        }

        let start = self.free.len();
        self.free.resize(start + needed as usize, false);
        Allocation {
            start: start as u32,
            appended: needed,
        }
    }

    fn find_free_run(&self, needed: usize) -> Option<u32> {
        let mut run_start = 0;
        let mut run_length = 0;

        for (sector, free) in self.free.iter().enumerate() {
            if !free {
                run_length = 0;
                continue;
            }
            if run_length == 0 {
                run_start = sector;
            }
            run_length += 1;
            if run_length == needed {
                return Some(run_start as u32);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_sectors_stay_reserved() {
        let mut allocator = SectorAllocator::from_sector_count(2);
        let allocation = allocator.allocate(1);
        assert_eq!(
            allocation,
            Allocation {
                start: 2,
                appended: 1
            }
        );
        assert_eq!(allocator.sector_count(), 3);
    }

    #[test]
    fn first_fit_prefers_lowest_run() {
        let mut allocator = SectorAllocator::from_sector_count(10);
        allocator.mark_used(2, 8);
        allocator.free(3, 2);
        allocator.free(7, 3);

        // both holes fit one sector; the scan starts at the bottom
        assert_eq!(
            allocator.allocate(1),
            Allocation {
                start: 3,
                appended: 0
            }
        );
        // the remainder of the first hole is still preferred
        assert_eq!(
            allocator.allocate(1),
            Allocation {
                start: 4,
                appended: 0
            }
        );
        // too big for any interior hole now
        assert_eq!(
            allocator.allocate(3),
            Allocation {
                start: 7,
                appended: 0
            }
        );
    }

    #[test]
    fn skips_runs_that_are_too_small() {
        let mut allocator = SectorAllocator::from_sector_count(12);
        allocator.mark_used(2, 10);
        allocator.free(3, 1);
        allocator.free(5, 2);

        assert_eq!(
            allocator.allocate(2),
            Allocation {
                start: 5,
                appended: 0
            }
        );
    }

    #[test]
    fn appends_when_nothing_fits() {
        let mut allocator = SectorAllocator::from_sector_count(4);
        allocator.mark_used(2, 2);

        let allocation = allocator.allocate(3);
        assert_eq!(
            allocation,
            Allocation {
                start: 4,
                appended: 3
            }
        );
        assert_eq!(allocator.sector_count(), 7);

        // the appended run is used until freed again
        allocator.free(4, 3);
        assert_eq!(
            allocator.allocate(3),
            Allocation {
                start: 4,
                appended: 0
            }
        );
    }
}
