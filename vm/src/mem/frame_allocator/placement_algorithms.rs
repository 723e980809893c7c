//! Frame placement for the user pool.

use super::CoreMapEntry;

/// Chooses which free frame the next allocation gets.
pub trait PlacementAlgorithm: Default {
    /// Index of a free frame in `core_map`, or `None` if every frame is taken.
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize>;
}

/// Resume the search where the last one succeeded, so freed frames are not
/// reused right away and allocations spread over the pool.
#[derive(Default)]
pub struct NextFit {
    position: usize,
}

impl PlacementAlgorithm for NextFit {
    fn place(&mut self, core_map: &[CoreMapEntry]) -> Option<usize> {
        let start = self.position.min(core_map.len());
        let found = (start..core_map.len())
            .chain(0..start)
            .find(|&i| !core_map[i].allocated())?;
        self.position = (found + 1) % core_map.len();
        Some(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocated(core_map: &mut [CoreMapEntry], frames: &[usize]) {
        for &i in frames {
            core_map[i] = core_map[i].with_allocated(true);
        }
    }

    #[test]
    fn test_next_fit() {
        let mut core_map = [CoreMapEntry::DEFAULT; 8];
        allocated(&mut core_map, &[0, 1, 4]);

        let mut algorithm = NextFit::default();
        assert_eq!(algorithm.place(&core_map), Some(2));
        allocated(&mut core_map, &[2]);
        assert_eq!(algorithm.place(&core_map), Some(3));
        allocated(&mut core_map, &[3]);
        assert_eq!(algorithm.place(&core_map), Some(5));
    }

    #[test]
    fn test_next_fit_wrap_around() {
        let mut core_map = [CoreMapEntry::DEFAULT; 4];
        allocated(&mut core_map, &[2, 3]);

        let mut algorithm = NextFit { position: 3 };
        assert_eq!(algorithm.place(&core_map), Some(0));
        assert_eq!(algorithm.position, 1);
    }

    #[test]
    fn test_next_fit_single_frames_cycle() {
        let mut core_map = [CoreMapEntry::DEFAULT; 3];
        let mut algorithm = NextFit::default();
        for expected in 0..3 {
            assert_eq!(algorithm.place(&core_map), Some(expected));
            allocated(&mut core_map, &[expected]);
        }
        assert_eq!(algorithm.place(&core_map), None);

        core_map[1] = core_map[1].with_allocated(false);
        assert_eq!(algorithm.place(&core_map), Some(1));
    }

    #[test]
    fn empty_pool_has_no_frames() {
        let mut algorithm = NextFit::default();
        assert_eq!(algorithm.place(&[]), None);
    }
}
