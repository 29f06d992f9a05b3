// vim: tw=80
//! Small shared types: byte addressing, child identity and geometry math.

/// Byte offset into a backend's own address space.
pub type ByteOffset = u64;

/// Byte length of a request.
pub type ByteLen = u64;

/// An immutable scatter/gather segment, ref-counted so it can be handed to
/// more than one child (e.g. a replicated write) without copying.
pub type IoVec = divbuf::DivBuf;

/// A mutable scatter/gather segment, used for reads.
pub type IoVecMut = divbuf::DivBufMut;

/// An ordered list of immutable segments describing one request's buffer.
pub type SGList = Vec<IoVec>;

/// An ordered list of mutable segments describing one request's buffer.
pub type SGListMut = Vec<IoVecMut>;

/// Identifies a child within a RAID personality.
///
/// RAID-1 always has exactly two children, `A` and `B`. RAID-0 has an
/// arbitrary ordered list and addresses children by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildId {
    A,
    B,
    Index(u32),
}

impl ChildId {
    /// The route-field value used to address this child on a RAID-1 array
    /// (0 = A, 1 = B).
    pub fn route(self) -> u32 {
        match self {
            ChildId::A => 0,
            ChildId::B => 1,
            ChildId::Index(i) => i,
        }
    }

    pub fn other(self) -> ChildId {
        match self {
            ChildId::A => ChildId::B,
            ChildId::B => ChildId::A,
            ChildId::Index(_) => panic!("ChildId::other is only defined for RAID-1's A/B pair"),
        }
    }

    pub fn from_route(route: u32) -> ChildId {
        match route {
            0 => ChildId::A,
            1 => ChildId::B,
            i => ChildId::Index(i),
        }
    }
}

/// Divide `n` by `d`, rounding up.
pub fn div_roundup(n: u64, d: u64) -> u64 {
    n.div_ceil(d)
}

/// `true` iff `n` is a nonzero power of two.
pub fn is_power_of_two(n: u64) -> bool {
    n != 0 && (n & (n - 1)) == 0
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn div_roundup_exact() {
        assert_eq!(div_roundup(16, 4), 4);
    }

    #[test]
    fn div_roundup_remainder() {
        assert_eq!(div_roundup(17, 4), 5);
    }

    #[test]
    fn child_id_route_roundtrip() {
        assert_eq!(ChildId::from_route(ChildId::A.route()), ChildId::A);
        assert_eq!(ChildId::from_route(ChildId::B.route()), ChildId::B);
    }

    #[test]
    fn child_id_other_swaps() {
        assert_eq!(ChildId::A.other(), ChildId::B);
        assert_eq!(ChildId::B.other(), ChildId::A);
    }

    #[test]
    fn power_of_two() {
        assert!(is_power_of_two(4096));
        assert!(!is_power_of_two(4095));
        assert!(!is_power_of_two(0));
    }
}
