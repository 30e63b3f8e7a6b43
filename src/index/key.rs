use std::fmt;

/// A fixed-width key stored inline in B+tree nodes.
///
/// Keys are compile-time sized so node capacity is a constant per
/// instantiation; the comparator is a separate capability so the same byte
/// width can carry differently ordered key spaces.
pub trait IndexKey: Copy + Default + Send + Sync + fmt::Debug + 'static {
    /// Number of bytes the key occupies in a node slot
    const ENCODED_SIZE: usize;

    /// Writes the key into `buf` (exactly `ENCODED_SIZE` bytes).
    fn encode_into(&self, buf: &mut [u8]);

    /// Reads a key back from `buf`.
    fn decode_from(buf: &[u8]) -> Self;

    /// Derives a key from an integer, for batch loading.
    fn from_integer(v: i64) -> Self;
}

/// Fixed-width opaque key of `N` bytes. The usual instantiations are 4, 8,
/// 16, 32 and 64 bytes; the integer payload lives in the leading bytes and
/// the rest stay zero.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct GenericKey<const N: usize> {
    data: [u8; N],
}

impl<const N: usize> GenericKey<N> {
    pub fn from_bytes(data: [u8; N]) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.data
    }

    /// Reads the integer payload back out of the leading bytes.
    pub fn to_integer(&self) -> i64 {
        if N >= 8 {
            i64::from_le_bytes(self.data[..8].try_into().unwrap())
        } else {
            i32::from_le_bytes(self.data[..4].try_into().unwrap()) as i64
        }
    }
}

impl<const N: usize> Default for GenericKey<N> {
    fn default() -> Self {
        Self { data: [0u8; N] }
    }
}

impl<const N: usize> fmt::Debug for GenericKey<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GenericKey<{}>({})", N, self.to_integer())
    }
}

impl<const N: usize> IndexKey for GenericKey<N> {
    const ENCODED_SIZE: usize = N;

    fn encode_into(&self, buf: &mut [u8]) {
        buf[..N].copy_from_slice(&self.data);
    }

    fn decode_from(buf: &[u8]) -> Self {
        let mut data = [0u8; N];
        data.copy_from_slice(&buf[..N]);
        Self { data }
    }

    fn from_integer(v: i64) -> Self {
        let mut data = [0u8; N];
        if N >= 8 {
            data[..8].copy_from_slice(&v.to_le_bytes());
        } else {
            data[..4].copy_from_slice(&(v as i32).to_le_bytes());
        }
        Self { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_key_integer_round_trip() {
        let key = GenericKey::<8>::from_integer(-42);
        assert_eq!(key.to_integer(), -42);

        let key = GenericKey::<4>::from_integer(1234);
        assert_eq!(key.to_integer(), 1234);

        let key = GenericKey::<64>::from_integer(i64::MAX);
        assert_eq!(key.to_integer(), i64::MAX);
    }

    #[test]
    fn test_generic_key_encode_round_trip() {
        let key = GenericKey::<16>::from_integer(777);
        let mut buf = [0u8; 16];
        key.encode_into(&mut buf);
        assert_eq!(GenericKey::<16>::decode_from(&buf), key);
    }
}
