// Service-account password generation.
//
// Policy:
// - Length drawn uniformly from [12, 18).
// - Four character classes: lower, upper, digit, special.
// - A candidate is rejected unless every class appears at least twice and letters
//   (lower + upper) are not outnumbered by digits + specials.
// - Randomness comes from `ring::rand::SystemRandom` (OS CSPRNG).
// - The rejection loop is capped; a broken RNG surfaces as an error instead of a hang.

use log::{debug, warn};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;
use zeroize::Zeroize;

use crate::security::secret::Secret;

pub const MIN_PASSWORD_LEN: usize = 12;
pub const MAX_PASSWORD_LEN_EXCLUSIVE: usize = 18;
pub const MIN_PER_CLASS: usize = 2;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5_000;

const LOWER: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPER: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SPECIAL: &[u8] = b"!#$%&()*+,-.:;<=>?@[]^_{|}~";

// Upper bound on draws for a single unbiased index; only a stuck RNG gets near it.
const MAX_INDEX_DRAWS: u32 = 64;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("secure random source failed")]
    Rng,
    #[error("no policy-compliant password after {attempts} attempts")]
    Exhausted { attempts: u32 },
}

/// Byte source for the generator. Production uses the OS CSPRNG; tests inject fixed sources.
pub trait RandomSource: Send + Sync {
    fn fill(&self, dest: &mut [u8]) -> Result<(), PasswordError>;
}

pub struct SystemRandomSource {
    rng: SystemRandom,
}

impl SystemRandomSource {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }
}

impl Default for SystemRandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RandomSource for SystemRandomSource {
    fn fill(&self, dest: &mut [u8]) -> Result<(), PasswordError> {
        self.rng.fill(dest).map_err(|_| PasswordError::Rng)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ClassCounts {
    pub lower: usize,
    pub upper: usize,
    pub digit: usize,
    pub special: usize,
}

impl ClassCounts {
    pub fn of(candidate: &str) -> Self {
        let mut counts = ClassCounts::default();
        for b in candidate.bytes() {
            if b.is_ascii_lowercase() {
                counts.lower += 1;
            } else if b.is_ascii_uppercase() {
                counts.upper += 1;
            } else if b.is_ascii_digit() {
                counts.digit += 1;
            } else {
                counts.special += 1;
            }
        }
        counts
    }
}

/// True when `candidate` satisfies the complete password policy (length included).
pub fn meets_policy(candidate: &str) -> bool {
    let len = candidate.len();
    if !(MIN_PASSWORD_LEN..MAX_PASSWORD_LEN_EXCLUSIVE).contains(&len) {
        return false;
    }
    let c = ClassCounts::of(candidate);
    if c.lower < MIN_PER_CLASS
        || c.upper < MIN_PER_CLASS
        || c.digit < MIN_PER_CLASS
        || c.special < MIN_PER_CLASS
    {
        return false;
    }
    c.lower + c.upper >= c.digit + c.special
}

pub struct PasswordGenerator<R: RandomSource = SystemRandomSource> {
    rng: R,
    max_attempts: u32,
}

impl PasswordGenerator<SystemRandomSource> {
    pub fn system(max_attempts: u32) -> Self {
        Self::with_source(SystemRandomSource::new(), max_attempts)
    }
}

impl<R: RandomSource> PasswordGenerator<R> {
    pub fn with_source(rng: R, max_attempts: u32) -> Self {
        Self {
            rng,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn generate(&self) -> Result<Secret, PasswordError> {
        let alphabet: Vec<u8> = [LOWER, UPPER, DIGITS, SPECIAL].concat();
        let span = (MAX_PASSWORD_LEN_EXCLUSIVE - MIN_PASSWORD_LEN) as u32;

        for attempt in 1..=self.max_attempts {
            let len = MIN_PASSWORD_LEN + self.random_below(span)? as usize;
            let mut candidate = String::with_capacity(len);
            for _ in 0..len {
                let idx = self.random_below(alphabet.len() as u32)? as usize;
                candidate.push(alphabet[idx] as char);
            }

            if meets_policy(&candidate) {
                debug!(
                    "[PHASE: installation] [STEP: password] Generated compliant password (attempt={}, len={})",
                    attempt, len
                );
                return Ok(Secret::new(candidate));
            }
            candidate.zeroize();
        }

        warn!(
            "[PHASE: installation] [STEP: password] Password generation exhausted (max_attempts={})",
            self.max_attempts
        );
        Err(PasswordError::Exhausted {
            attempts: self.max_attempts,
        })
    }

    /// Unbiased integer in `[0, n)` via rejection sampling on a u32.
    fn random_below(&self, n: u32) -> Result<u32, PasswordError> {
        debug_assert!(n > 0);
        let zone = u32::MAX - (u32::MAX % n);
        for _ in 0..MAX_INDEX_DRAWS {
            let mut buf = [0u8; 4];
            self.rng.fill(&mut buf)?;
            let v = u32::from_le_bytes(buf);
            if v < zone {
                return Ok(v % n);
            }
        }
        Err(PasswordError::Rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ZeroSource;

    impl RandomSource for ZeroSource {
        fn fill(&self, dest: &mut [u8]) -> Result<(), PasswordError> {
            dest.iter_mut().for_each(|b| *b = 0);
            Ok(())
        }
    }

    struct FailingSource {
        calls: AtomicU32,
    }

    impl RandomSource for FailingSource {
        fn fill(&self, _dest: &mut [u8]) -> Result<(), PasswordError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(PasswordError::Rng)
        }
    }

    #[test]
    fn ten_thousand_generated_passwords_meet_policy() {
        let generator = PasswordGenerator::system(DEFAULT_MAX_ATTEMPTS);
        for _ in 0..10_000 {
            let pw = generator.generate().expect("generation should succeed");
            let s = pw.expose();
            assert!(
                (MIN_PASSWORD_LEN..MAX_PASSWORD_LEN_EXCLUSIVE).contains(&s.len()),
                "bad length {}",
                s.len()
            );
            let c = ClassCounts::of(s);
            assert!(c.lower >= 2 && c.upper >= 2 && c.digit >= 2 && c.special >= 2);
            assert!(c.lower + c.upper >= c.digit + c.special);
        }
    }

    #[test]
    fn generated_lengths_cover_the_whole_range() {
        let generator = PasswordGenerator::system(DEFAULT_MAX_ATTEMPTS);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..2_000 {
            seen.insert(generator.generate().unwrap().len());
        }
        let expected: std::collections::BTreeSet<usize> =
            (MIN_PASSWORD_LEN..MAX_PASSWORD_LEN_EXCLUSIVE).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn policy_rejects_short_long_and_unbalanced_candidates() {
        assert!(meets_policy("abCD12!@efGH"));
        // too short
        assert!(!meets_policy("aB1!aB1!aB1"));
        // too long (18)
        assert!(!meets_policy("abcdEFGH12!@abcdEF"));
        // only one digit
        assert!(!meets_policy("abCD1!@efGHij"));
        // letters outnumbered: 4 letters vs 8 digits+specials
        assert!(!meets_policy("abCD1234!@#$"));
        // tie is allowed: 6 letters vs 6 others
        assert!(meets_policy("abcDEF123!@#"));
    }

    #[test]
    fn stuck_rng_exhausts_instead_of_looping() {
        let generator = PasswordGenerator::with_source(ZeroSource, 250);
        match generator.generate() {
            Err(PasswordError::Exhausted { attempts }) => assert_eq!(attempts, 250),
            other => panic!("expected exhaustion, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn rng_failure_is_propagated() {
        let source = FailingSource {
            calls: AtomicU32::new(0),
        };
        let generator = PasswordGenerator::with_source(source, 10);
        assert!(matches!(generator.generate(), Err(PasswordError::Rng)));
        assert_eq!(generator.rng.calls.load(Ordering::SeqCst), 1);
    }
}
