//! Jitter for retry delays
//!
//! Spreads retries of concurrent runs so they do not hit a flaky feed at the same instant.

/// Random jitter between 0 and `max_jitter_ms` (inclusive)
///
/// # Examples
/// ```
/// use starpipe::runner::jitter::generate_jitter_ms;
///
/// let jitter = generate_jitter_ms(100);
/// assert!(jitter <= 100);
/// ```
pub fn generate_jitter_ms(max_jitter_ms: u64) -> u64 {
    if max_jitter_ms == 0 {
        return 0;
    }
    fastrand::u64(0..=max_jitter_ms)
}

/// Random jitter up to `jitter_percent` of `base_value`
///
/// # Examples
/// ```
/// use starpipe::runner::jitter::generate_jitter_percent;
///
/// let jitter = generate_jitter_percent(1000, 25); // 0-250ms
/// assert!(jitter <= 250);
/// ```
pub fn generate_jitter_percent(base_value: u64, jitter_percent: u8) -> u64 {
    if jitter_percent == 0 || base_value == 0 {
        return 0;
    }

    let max_jitter = base_value.saturating_mul(jitter_percent as u64) / 100;
    generate_jitter_ms(max_jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_jitter_ms() {
        assert_eq!(generate_jitter_ms(0), 0);

        for _ in 0..100 {
            assert!(generate_jitter_ms(50) <= 50);
        }
    }

    #[test]
    fn test_generate_jitter_percent() {
        assert_eq!(generate_jitter_percent(1000, 0), 0);
        assert_eq!(generate_jitter_percent(0, 25), 0);

        for _ in 0..100 {
            assert!(generate_jitter_percent(1000, 25) <= 250);
        }
    }
}
