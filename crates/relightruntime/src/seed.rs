use rand::Rng;

/// Largest seed drawn when the request does not supply one
pub const MAX_RANDOM_SEED: u64 = u16::MAX as u64;

/// Use the requested seed, or draw a random one
pub fn resolve(seed: Option<u64>) -> u64 {
    let seed = match seed {
        Some(seed) => seed,
        None => rand::rng().random_range(0..=MAX_RANDOM_SEED),
    };
    tracing::info!("Using seed: {}", seed);
    seed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_seed_kept() {
        assert_eq!(resolve(Some(42)), 42);
        assert_eq!(resolve(Some(u64::MAX)), u64::MAX);
    }

    #[test]
    fn test_random_seed_in_range() {
        for _ in 0..100 {
            assert!(resolve(None) <= MAX_RANDOM_SEED);
        }
    }
}
