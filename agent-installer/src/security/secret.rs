// In-memory secret handling for account passwords.
//
// SECURITY:
// - A `Secret` is never cloned and never formatted (Debug prints `***`).
// - `clear()` zeroes the backing buffer in place and flips an observable flag so callers (and
//   tests) can prove the plaintext did not outlive the step that consumed it.
// - Drop zeroes whatever is left.

use std::fmt;
use zeroize::Zeroize;

pub struct Secret {
    value: String,
    cleared: bool,
}

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            cleared: false,
        }
    }

    /// Borrow the plaintext. Returns an empty string once cleared.
    pub fn expose(&self) -> &str {
        &self.value
    }

    pub fn len(&self) -> usize {
        self.value.len()
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Zero the plaintext. Idempotent.
    pub fn clear(&mut self) {
        self.value.zeroize();
        self.cleared = true;
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.cleared {
            write!(f, "Secret(<cleared>)")
        } else {
            write!(f, "Secret(***)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_never_prints_plaintext() {
        let s = Secret::new("PASSWORD_SHOULD_BE_REDACTED");
        let dbg = format!("{:?}", s);
        assert_eq!(dbg, "Secret(***)");
        assert!(!dbg.contains("PASSWORD"));
    }

    #[test]
    fn clear_empties_buffer_and_sets_flag() {
        let mut s = Secret::new("hunter2hunter2");
        assert!(!s.is_cleared());
        assert_eq!(s.len(), 14);

        s.clear();
        assert!(s.is_cleared());
        assert!(s.is_empty());
        assert_eq!(s.expose(), "");
        assert_eq!(format!("{:?}", s), "Secret(<cleared>)");

        // Second clear is a no-op.
        s.clear();
        assert!(s.is_cleared());
    }
}
