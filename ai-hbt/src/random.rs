//! Random sources consumed by `Random` nodes.
//!
//! The engine never owns random state. Each `update` call receives a source,
//! so a tick is a pure function of the template, the caller's data, and the
//! source's state. Only `next_u32() % n` for small positive `n` is ever used.

/// Anything that produces an unsigned integer per call.
pub trait RandomSource {
    fn next_u32(&mut self) -> u32;
}

impl<F> RandomSource for F
where
    F: FnMut() -> u32,
{
    fn next_u32(&mut self) -> u32 {
        self()
    }
}

/// SplitMix64: small deterministic generator, good for seeding.
///
/// Not cryptographic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitMix64 {
    state: u64,
}

impl SplitMix64 {
    pub fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self.state.wrapping_add(0x9E3779B97F4A7C15);
        mix64(self.state)
    }
}

impl RandomSource for SplitMix64 {
    fn next_u32(&mut self) -> u32 {
        // High bits have the best avalanche behavior.
        (self.next_u64() >> 32) as u32
    }
}

pub fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xBF58476D1CE4E5B9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94D049BB133111EB);
    x ^ (x >> 31)
}

/// Seed for one tree instance's random stream, derived from a global seed.
pub fn derive_seed(global_seed: u64, instance_id: u64, stream: u64) -> u64 {
    let x = global_seed ^ mix64(instance_id.wrapping_add(0x9E3779B97F4A7C15)) ^ mix64(stream);
    mix64(x)
}

/// Reorders `candidates` by weighted selection without replacement.
///
/// Position `i` is filled by drawing from the candidates not yet placed, with
/// probability proportional to weight. Once the remaining weight reaches zero
/// the rest of the slice keeps its current order.
pub(crate) fn weighted_order<T, R>(candidates: &mut [(T, u32)], random: &mut R)
where
    R: RandomSource + ?Sized,
{
    let mut remaining: u64 = candidates.iter().map(|(_, w)| u64::from(*w)).sum();

    for index in 0..candidates.len().saturating_sub(1) {
        if remaining == 0 {
            return;
        }

        let mut draw = u64::from(random.next_u32()) % remaining;
        for pick in index..candidates.len() {
            let weight = u64::from(candidates[pick].1);
            if draw < weight {
                remaining -= weight;
                candidates.swap(index, pick);
                break;
            }
            draw -= weight;
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn order(weights: &[u32], draws: &[u32]) -> Vec<usize> {
        let mut items: Vec<(usize, u32)> = weights.iter().copied().enumerate().collect();
        let mut draws = draws.iter().copied().cycle();
        let mut random = move || draws.next().unwrap_or(0);
        weighted_order(&mut items, &mut random);
        items.into_iter().map(|(i, _)| i).collect()
    }

    #[test]
    fn draw_selects_the_candidate_covering_it() {
        // Cumulative bands: [0,10) -> 0, [10,30) -> 1, [30,60) -> 2.
        assert_eq!(order(&[10, 20, 30], &[0]), vec![0, 1, 2]);
        assert_eq!(order(&[10, 20, 30], &[15, 0]), vec![1, 0, 2]);
        assert_eq!(order(&[10, 20, 30], &[59, 0]), vec![2, 1, 0]);
    }

    #[test]
    fn zero_total_weight_keeps_declaration_order() {
        assert_eq!(order(&[0, 0, 0], &[7]), vec![0, 1, 2]);
    }

    #[test]
    fn zero_weight_candidate_goes_last() {
        for draw in 0..200 {
            assert_eq!(order(&[0, 100], &[draw]), vec![1, 0]);
        }
    }

    #[test]
    fn draw_is_taken_modulo_remaining_weight() {
        // 65 % 60 == 5 -> first band.
        assert_eq!(order(&[10, 20, 30], &[65, 0]), vec![0, 1, 2]);
    }

    #[test]
    fn split_mix_is_deterministic_per_seed() {
        let mut a = SplitMix64::new(42);
        let mut b = SplitMix64::new(42);
        let mut c = SplitMix64::new(43);
        let xs: Vec<u32> = (0..8).map(|_| a.next_u32()).collect();
        let ys: Vec<u32> = (0..8).map(|_| b.next_u32()).collect();
        let zs: Vec<u32> = (0..8).map(|_| c.next_u32()).collect();
        assert_eq!(xs, ys);
        assert_ne!(xs, zs);
    }

    #[test]
    fn derived_seeds_differ_per_instance() {
        let a = derive_seed(7, 1, 0);
        let b = derive_seed(7, 2, 0);
        assert_ne!(a, b);
        assert_eq!(a, derive_seed(7, 1, 0));
    }

    proptest! {
        #[test]
        fn ordering_is_a_permutation(
            weights in prop::collection::vec(0u32..1_000, 0..12),
            seed in any::<u64>(),
        ) {
            let mut items: Vec<(usize, u32)> = weights.iter().copied().enumerate().collect();
            weighted_order(&mut items, &mut SplitMix64::new(seed));

            let mut indices: Vec<usize> = items.iter().map(|(i, _)| *i).collect();
            indices.sort_unstable();
            prop_assert_eq!(indices, (0..weights.len()).collect::<Vec<_>>());
        }

        #[test]
        fn zero_weights_never_precede_positive_ones(
            weights in prop::collection::vec(0u32..4, 0..12),
            seed in any::<u64>(),
        ) {
            let mut items: Vec<(usize, u32)> = weights.iter().copied().enumerate().collect();
            weighted_order(&mut items, &mut SplitMix64::new(seed));

            let first_zero = items
                .iter()
                .position(|(_, w)| *w == 0)
                .unwrap_or(items.len());
            prop_assert!(items[first_zero..].iter().all(|(_, w)| *w == 0));
        }
    }
}
