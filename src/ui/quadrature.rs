/// Step for each (previous AB, current AB) transition, indexed by
/// `(prev << 2) | curr`. Invalid transitions (both lines changed) and
/// no-ops are 0.
const TRANSITIONS: [i8; 16] = [
    0, -1, 1, 0, //
    1, 0, 0, -1, //
    -1, 0, 0, 1, //
    0, 1, -1, 0, //
];

/// Gray-code decoder for a two-channel quadrature encoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct Quadrature {
    state: u8,
    count: i32,
}

impl Quadrature {
    pub fn new(a: bool, b: bool) -> Self {
        Self {
            state: pack(a, b),
            count: 0,
        }
    }

    /// Feed the current pin levels; returns the step taken (-1, 0, +1).
    pub fn update(&mut self, a: bool, b: bool) -> i8 {
        let next = pack(a, b);
        let step = TRANSITIONS[((self.state << 2) | next) as usize];
        self.state = next;
        self.count = self.count.wrapping_add(step as i32);
        step
    }

    pub fn count(&self) -> i32 {
        self.count
    }
}

fn pack(a: bool, b: bool) -> u8 {
    ((a as u8) << 1) | b as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    // One full clockwise cycle: 00 -> 10 -> 11 -> 01 -> 00.
    const CW: [(bool, bool); 4] = [(true, false), (true, true), (false, true), (false, false)];

    #[test]
    fn clockwise_cycle_counts_four() {
        let mut q = Quadrature::new(false, false);
        for (a, b) in CW {
            q.update(a, b);
        }
        assert_eq!(q.count(), 4);
    }

    #[test]
    fn reverse_cycle_cancels() {
        let mut q = Quadrature::new(false, false);
        for (a, b) in CW {
            q.update(a, b);
        }
        for (a, b) in CW.iter().rev().skip(1).chain(core::iter::once(&(false, false))) {
            q.update(*a, *b);
        }
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn double_transition_is_ignored() {
        let mut q = Quadrature::new(false, false);
        assert_eq!(q.update(true, true), 0);
        assert_eq!(q.count(), 0);
    }

    #[test]
    fn repeated_level_is_noop() {
        let mut q = Quadrature::new(true, false);
        assert_eq!(q.update(true, false), 0);
    }
}
