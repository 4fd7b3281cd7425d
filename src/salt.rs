//! Sources of per-table salt.
//!
//! The table draws a fresh salt when it is created and again on every resize.
//! Salts are requested through the [`SaltSource`] capability so tests and
//! benchmarks can swap the operating-system generator for a seeded one.

use rand::RngCore;
use rand::SeedableRng;
use rand::TryRngCore;
use rand::rngs::OsRng;
use rand::rngs::SmallRng;

/// A provider of random bytes used to salt bucket selection.
pub trait SaltSource {
    /// Fills `dest` with random bytes.
    fn fill_bytes(&mut self, dest: &mut [u8]);

    /// Returns a fresh 64-bit salt.
    fn next_salt(&mut self) -> u64 {
        let mut bytes = [0u8; 8];
        self.fill_bytes(&mut bytes);
        u64::from_ne_bytes(bytes)
    }
}

impl<S: SaltSource + ?Sized> SaltSource for &mut S {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        (**self).fill_bytes(dest)
    }
}

/// Salt drawn from the operating system's cryptographically secure generator.
///
/// The OS generator is assumed to be always available. If it ever reports an
/// error the call panics.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSalt;

impl SaltSource for OsSalt {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        OsRng.unwrap_err().fill_bytes(dest);
    }
}

/// Deterministic salt for reproducible tests and benchmarks.
///
/// Not suitable where hash-flooding resistance matters: anyone who knows the
/// seed knows every salt the table will use.
///
/// # Examples
///
/// ```rust
/// use bag_hash::salt::SaltSource;
/// use bag_hash::salt::SeededSalt;
///
/// let mut a = SeededSalt::new(7);
/// let mut b = SeededSalt::new(7);
/// assert_eq!(a.next_salt(), b.next_salt());
/// ```
#[derive(Debug, Clone)]
pub struct SeededSalt {
    rng: SmallRng,
}

impl SeededSalt {
    /// Creates a source whose output is fully determined by `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl SaltSource for SeededSalt {
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.rng.fill_bytes(dest);
    }
}
