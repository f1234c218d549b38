use std::{cmp::Ordering, fmt};

/// Wrapping 32-bit sequence number.
///
/// Ordering is wraparound-aware: `a < b` iff the forward distance from `a`
/// to `b` is at most half the sequence space.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub struct Seq {
    n: u32,
}

impl Seq {
    #[must_use]
    pub fn from_u32(n: u32) -> Self {
        Seq { n }
    }

    #[must_use]
    pub fn to_u32(self) -> u32 {
        self.n
    }

    #[must_use]
    pub fn add_u32(self, n: u32) -> Seq {
        Seq {
            n: self.n.wrapping_add(n),
        }
    }

    /// Forward distance from `other` to `self`.
    #[must_use]
    pub fn sub_seq(self, other: Seq) -> u32 {
        self.n.wrapping_sub(other.n)
    }

    pub fn increment(&mut self) {
        *self = self.add_u32(1);
    }
}

impl PartialOrd for Seq {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Seq {
    fn cmp(&self, other: &Self) -> Ordering {
        if self.n == other.n {
            return Ordering::Equal;
        }
        match other.n.wrapping_sub(self.n) <= u32::MAX / 2 {
            true => Ordering::Less,
            false => Ordering::Greater,
        }
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.n)
    }
}
