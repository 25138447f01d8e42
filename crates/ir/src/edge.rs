//! Flow edges and their `[min, max]` weight ranges.

use cranelift_entity::entity_impl;

use crate::{Block, Weight, MAX_WEIGHT};

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge(u32);
entity_impl!(Edge, "edge");

/// One control-flow edge occurrence. Ranges start fully open at
/// `[0, MAX_WEIGHT]` and are narrowed by the edge-weight solver.
///
/// Invariant: `0 <= min_weight <= max_weight`.
#[derive(Debug, Clone)]
pub struct EdgeData {
    src: Block,
    dst: Block,
    min_weight: Weight,
    max_weight: Weight,
}

impl EdgeData {
    pub fn new(src: Block, dst: Block) -> Self {
        Self {
            src,
            dst,
            min_weight: 0.0,
            max_weight: MAX_WEIGHT,
        }
    }

    pub fn src(&self) -> Block {
        self.src
    }

    pub fn dst(&self) -> Block {
        self.dst
    }

    pub fn min_weight(&self) -> Weight {
        self.min_weight
    }

    pub fn max_weight(&self) -> Weight {
        self.max_weight
    }

    /// Set both ends of the range unconditionally.
    pub fn set_weights(&mut self, min: Weight, max: Weight) {
        assert!(min <= max);

        self.min_weight = min;
        self.max_weight = max;
    }

    /// Try to raise the lower bound to `new`.
    ///
    /// When `new` lies outside the current range, the range may absorb an
    /// excursion of up to `slop`: above `max` the whole interval slides up
    /// to `[max, new]`, below `min` the lower bound drops to `new`. Sets
    /// `used_slop` when that happens. Returns false if the excursion
    /// exceeds `slop`.
    pub fn set_min_checked(&mut self, new: Weight, slop: Weight, used_slop: &mut bool) -> bool {
        let mut result = false;

        if new <= self.max_weight && new >= self.min_weight {
            self.min_weight = new;
            result = true;
        } else if slop > 0.0 {
            // Allow for a small amount of inaccuracy in the counts.
            if self.max_weight < new {
                if new <= self.max_weight + slop {
                    result = true;

                    if self.max_weight != 0.0 {
                        // Raise min and max towards new.
                        self.min_weight = self.max_weight;
                        self.max_weight = new;
                    }

                    *used_slop = true;
                }
            } else {
                debug_assert!(self.min_weight > new);

                if new + slop >= self.min_weight {
                    result = true;

                    debug_assert!(self.max_weight != 0.0);

                    // Lower min towards new, keep max.
                    self.min_weight = new;

                    *used_slop = true;
                }
            }

            if result {
                debug_assert!(
                    self.max_weight == 0.0
                        || (new <= self.max_weight && new >= self.min_weight)
                );
            }
        }

        result
    }

    /// Try to lower the upper bound to `new`. Mirror of
    /// [`set_min_checked`](Self::set_min_checked): above `max` the upper
    /// bound extends to `new`, below `min` the whole interval slides down
    /// to `[new, min]`.
    pub fn set_max_checked(&mut self, new: Weight, slop: Weight, used_slop: &mut bool) -> bool {
        let mut result = false;

        if new >= self.min_weight && new <= self.max_weight {
            self.max_weight = new;
            result = true;
        } else if slop > 0.0 {
            if self.max_weight < new {
                if new <= self.max_weight + slop {
                    result = true;

                    if self.max_weight != 0.0 {
                        // Raise max towards new, keep min.
                        self.max_weight = new;
                    }

                    *used_slop = true;
                }
            } else {
                debug_assert!(self.min_weight > new);

                if new + slop >= self.min_weight {
                    result = true;

                    debug_assert!(self.max_weight != 0.0);

                    // Slide min and max down towards new.
                    self.max_weight = self.min_weight;
                    self.min_weight = new;

                    *used_slop = true;
                }
            }

            if result {
                debug_assert!(
                    self.max_weight == 0.0
                        || (new <= self.max_weight && new >= self.min_weight)
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;

    use super::*;

    fn edge() -> EdgeData {
        EdgeData::new(Block::new(0), Block::new(1))
    }

    #[test]
    fn fresh_edge_is_fully_open() {
        let e = edge();
        assert_eq!(e.min_weight(), 0.0);
        assert_eq!(e.max_weight(), MAX_WEIGHT);
    }

    #[test]
    fn set_min_in_range() {
        let mut e = edge();
        e.set_weights(10.0, 50.0);

        let mut used_slop = false;
        assert!(e.set_min_checked(30.0, 0.0, &mut used_slop));
        assert!(!used_slop);
        assert_eq!(e.min_weight(), 30.0);
        assert_eq!(e.max_weight(), 50.0);
    }

    #[test]
    fn set_min_slides_interval_up_within_slop() {
        let mut e = edge();
        e.set_weights(10.0, 50.0);

        let mut used_slop = false;
        assert!(e.set_min_checked(52.0, 5.0, &mut used_slop));
        assert!(used_slop);
        // Interval slid up as a whole.
        assert_eq!(e.min_weight(), 50.0);
        assert_eq!(e.max_weight(), 52.0);
    }

    #[test]
    fn set_min_lowers_within_slop() {
        let mut e = edge();
        e.set_weights(10.0, 50.0);

        let mut used_slop = false;
        assert!(e.set_min_checked(8.0, 5.0, &mut used_slop));
        assert!(used_slop);
        assert_eq!(e.min_weight(), 8.0);
        assert_eq!(e.max_weight(), 50.0);
    }

    #[test]
    fn set_min_rejects_beyond_slop() {
        let mut e = edge();
        e.set_weights(10.0, 50.0);

        let mut used_slop = false;
        assert!(!e.set_min_checked(60.0, 5.0, &mut used_slop));
        assert!(!e.set_min_checked(2.0, 5.0, &mut used_slop));
        assert!(!used_slop);
        assert_eq!(e.min_weight(), 10.0);
        assert_eq!(e.max_weight(), 50.0);
    }

    #[test]
    fn set_min_rejects_without_slop() {
        let mut e = edge();
        e.set_weights(10.0, 50.0);

        let mut used_slop = false;
        assert!(!e.set_min_checked(51.0, 0.0, &mut used_slop));
        assert!(!used_slop);
    }

    #[test]
    fn set_max_in_range() {
        let mut e = edge();
        e.set_weights(10.0, 50.0);

        let mut used_slop = false;
        assert!(e.set_max_checked(20.0, 0.0, &mut used_slop));
        assert!(!used_slop);
        assert_eq!(e.min_weight(), 10.0);
        assert_eq!(e.max_weight(), 20.0);
    }

    #[test]
    fn set_max_extends_within_slop() {
        let mut e = edge();
        e.set_weights(10.0, 50.0);

        let mut used_slop = false;
        assert!(e.set_max_checked(53.0, 5.0, &mut used_slop));
        assert!(used_slop);
        assert_eq!(e.min_weight(), 10.0);
        assert_eq!(e.max_weight(), 53.0);
    }

    #[test]
    fn set_max_slides_interval_down_within_slop() {
        let mut e = edge();
        e.set_weights(10.0, 50.0);

        let mut used_slop = false;
        assert!(e.set_max_checked(7.0, 5.0, &mut used_slop));
        assert!(used_slop);
        assert_eq!(e.min_weight(), 7.0);
        assert_eq!(e.max_weight(), 10.0);
    }

    #[test]
    fn set_max_rejects_beyond_slop() {
        let mut e = edge();
        e.set_weights(10.0, 50.0);

        let mut used_slop = false;
        assert!(!e.set_max_checked(2.0, 5.0, &mut used_slop));
        assert!(!used_slop);
        assert_eq!(e.min_weight(), 10.0);
        assert_eq!(e.max_weight(), 50.0);
    }

    #[test]
    #[should_panic]
    fn set_weights_rejects_inverted_range() {
        let mut e = edge();
        e.set_weights(50.0, 10.0);
    }
}
