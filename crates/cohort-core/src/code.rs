//! Access-code generation.
//!
//! Codes are short `[A-Za-z0-9]` strings that participants type by hand. A
//! fresh code is drawn until it collides with no existing code, whatever that
//! code's status.

use anyhow::{Result, bail};
use rand::{Rng, distributions::Alphanumeric};

/// Length of generated access codes.
pub const DEFAULT_CODE_LENGTH: usize = 8;

/// Draws attempted before giving up on finding an unused code.
pub const MAX_ATTEMPTS: usize = 64;

/// Draw one candidate code of `length` alphanumeric characters.
pub fn generate<R: Rng + ?Sized>(rng: &mut R, length: usize) -> String {
    (0..length)
        .map(|_| char::from(rng.sample(Alphanumeric)))
        .collect()
}

/// Draw codes until `taken` reports one as free.
///
/// # Errors
///
/// Returns an error if `taken` fails or no free code turns up within
/// [`MAX_ATTEMPTS`] draws.
pub fn generate_unique<R, F>(rng: &mut R, length: usize, mut taken: F) -> Result<String>
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> Result<bool>,
{
    if length == 0 {
        bail!("access code length must be positive");
    }

    for attempt in 1..=MAX_ATTEMPTS {
        let candidate = generate(rng, length);
        if !taken(&candidate)? {
            return Ok(candidate);
        }
        tracing::debug!(attempt, "access code collision, redrawing");
    }

    bail!("could not find an unused access code after {MAX_ATTEMPTS} attempts")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};
    use std::collections::HashSet;

    #[test]
    fn generated_codes_are_alphanumeric_with_requested_length() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let code = generate(&mut rng, DEFAULT_CODE_LENGTH);
            assert_eq!(code.len(), DEFAULT_CODE_LENGTH);
            assert!(code.chars().all(|c| c.is_ascii_alphanumeric()), "{code}");
        }
    }

    #[test]
    fn unique_generation_skips_taken_codes() {
        let mut probe = StdRng::seed_from_u64(11);
        let first = generate(&mut probe, DEFAULT_CODE_LENGTH);

        let taken: HashSet<String> = std::iter::once(first.clone()).collect();
        let mut rng = StdRng::seed_from_u64(11);
        let code = generate_unique(&mut rng, DEFAULT_CODE_LENGTH, |c| Ok(taken.contains(c)))
            .expect("free code");
        assert_ne!(code, first);
    }

    #[test]
    fn unique_generation_gives_up_when_everything_is_taken() {
        let mut rng = StdRng::seed_from_u64(3);
        let err = generate_unique(&mut rng, 4, |_| Ok(true)).expect_err("exhausted");
        assert!(err.to_string().contains("unused access code"));
    }

    #[test]
    fn zero_length_is_rejected() {
        let mut rng = StdRng::seed_from_u64(3);
        assert!(generate_unique(&mut rng, 0, |_| Ok(false)).is_err());
    }
}
