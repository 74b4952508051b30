//! Local-index arithmetic.
//!
//! A node at level `l` is addressed by its local index: its position on that
//! level, a 256-bit unsigned integer carried big-endian in a `[u8; 32]`.
//! Only the low `l` bits are meaningful at level `l`; the root's index is
//! zero. Ancestry is purely arithmetic, so nodes store no parent or sibling
//! links.

/// A node's position within its level, as a big-endian 256-bit integer.
pub type Index = [u8; 32];

/// The root's local index.
pub const ROOT: Index = [0u8; 32];

/// Returns true iff the node sits in the left slot of its parent.
#[inline]
pub fn is_left_child(index: &Index) -> bool {
    index[31] & 1 == 0
}

/// Returns the index of the sibling on the same level.
#[inline]
pub fn sibling(index: &Index) -> Index {
    let mut s = *index;
    s[31] ^= 1;
    s
}

/// Returns the index of the parent, one level up.
#[inline]
pub fn parent(index: &Index) -> Index {
    let mut p = [0u8; 32];
    let mut carry = 0u8;
    for (i, byte) in index.iter().enumerate() {
        p[i] = (byte >> 1) | (carry << 7);
        carry = byte & 1;
    }
    p
}

/// Returns the index of the left child, one level down.
///
/// Never overflows for a node above the leaf level, because an index at
/// level `l` uses at most `l` of the 256 bits.
#[inline]
pub fn left_child(index: &Index) -> Index {
    let mut c = [0u8; 32];
    let mut carry = 0u8;
    for i in (0..32).rev() {
        c[i] = (index[i] << 1) | carry;
        carry = index[i] >> 7;
    }
    c
}

/// Returns the index of the right child, one level down.
#[inline]
pub fn right_child(index: &Index) -> Index {
    let mut c = left_child(index);
    c[31] |= 1;
    c
}

/// Builds an index from a small integer, for callers that address nodes
/// numerically.
#[inline]
pub fn from_u64(n: u64) -> Index {
    let mut ix = [0u8; 32];
    ix[24..].copy_from_slice(&n.to_be_bytes());
    ix
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn small_indices() {
        assert_eq!(parent(&from_u64(6)), from_u64(3));
        assert_eq!(parent(&from_u64(7)), from_u64(3));
        assert_eq!(sibling(&from_u64(6)), from_u64(7));
        assert_eq!(sibling(&from_u64(7)), from_u64(6));
        assert_eq!(left_child(&from_u64(3)), from_u64(6));
        assert_eq!(right_child(&from_u64(3)), from_u64(7));
        assert!(is_left_child(&from_u64(6)));
        assert!(!is_left_child(&from_u64(7)));
        assert!(is_left_child(&ROOT));
    }

    #[test]
    fn carries_cross_byte_boundaries() {
        assert_eq!(parent(&from_u64(0x100)), from_u64(0x80));
        assert_eq!(left_child(&from_u64(0xff)), from_u64(0x1fe));
        assert_eq!(right_child(&from_u64(0xff)), from_u64(0x1ff));
        assert_eq!(parent(&from_u64(0x1ff)), from_u64(0xff));
    }

    #[test]
    fn full_width_indices() {
        let mut ones = [0xffu8; 32];
        assert_eq!(sibling(&ones), {
            let mut s = ones;
            s[31] = 0xfe;
            s
        });
        let p = parent(&ones);
        assert_eq!(p[0], 0x7f);
        assert!(p[1..].iter().all(|&b| b == 0xff));
        // Shifting back down restores the index, minus the dropped low bit.
        ones[31] = 0xfe;
        assert_eq!(left_child(&p), ones);
    }

    #[test]
    fn parent_of_child_roundtrip() {
        let ix = hex_index("00a1b2c3d4e5f60718293a4b5c6d7e8f9fa0b1c2d3e4f5061728394a5b6c7d8e");
        assert_eq!(parent(&left_child(&ix)), ix);
        assert_eq!(parent(&right_child(&ix)), ix);
    }

    fn hex_index(s: &str) -> Index {
        let mut ix = [0u8; 32];
        hex::decode_to_slice(s, &mut ix).unwrap();
        ix
    }
}
