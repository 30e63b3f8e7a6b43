use std::cmp::Ordering;

use super::key::GenericKey;

/// Ordering capability for a key type. The tree never compares keys
/// directly; every comparison goes through the configured comparator.
pub trait KeyComparator<K>: Clone + Send + Sync {
    fn compare(&self, a: &K, b: &K) -> Ordering;
}

/// Orders `GenericKey<N>` by its integer payload.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenericComparator<const N: usize>;

impl<const N: usize> KeyComparator<GenericKey<N>> for GenericComparator<N> {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.to_integer().cmp(&b.to_integer())
    }
}

/// Orders `GenericKey<N>` lexicographically over the raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator<const N: usize>;

impl<const N: usize> KeyComparator<GenericKey<N>> for BytewiseComparator<N> {
    fn compare(&self, a: &GenericKey<N>, b: &GenericKey<N>) -> Ordering {
        a.as_bytes().cmp(b.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generic_comparator() {
        let cmp = GenericComparator::<8>;
        let a = GenericKey::<8>::from_integer(-5);
        let b = GenericKey::<8>::from_integer(3);
        assert_eq!(cmp.compare(&a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&b, &a), Ordering::Greater);
        assert_eq!(cmp.compare(&a, &a), Ordering::Equal);
    }
}
