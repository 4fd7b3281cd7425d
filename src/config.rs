use thiserror::Error;

cfg_if::cfg_if! {
    if #[cfg(feature = "bag-sixteen")] {
        /// Number of node slots in every bag.
        pub const BAG_SIZE: usize = 16;
    } else if #[cfg(feature = "bag-four")] {
        /// Number of node slots in every bag.
        pub const BAG_SIZE: usize = 4;
    } else {
        /// Number of node slots in every bag.
        pub const BAG_SIZE: usize = 8;
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "fill-twenty-five")] {
        /// Default resize threshold, as a percentage of filled buckets.
        pub const FILL_PERCENT: u32 = 25;
    } else if #[cfg(feature = "fill-seventy-five")] {
        /// Default resize threshold, as a percentage of filled buckets.
        pub const FILL_PERCENT: u32 = 75;
    } else {
        /// Default resize threshold, as a percentage of filled buckets.
        pub const FILL_PERCENT: u32 = 50;
    }
}

/// Bucket count exponent used when a size hint of zero is given (1024
/// buckets).
pub const DEFAULT_SIZE_LOG2: u32 = 10;

/// Largest accepted bucket count exponent. Leaves headroom for the bucket
/// array to keep doubling.
pub const MAX_SIZE_LOG2: u32 = usize::BITS - 8;

/// Errors reported when validating a [`Config`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The requested bucket count exponent is too large for this platform.
    #[error("size_log2 {size_log2} exceeds the maximum of {max}")]
    SizeTooLarge {
        /// Requested exponent.
        size_log2: u32,
        /// Largest accepted exponent.
        max: u32,
    },

    /// The fill threshold is zero, or so high that filling every bucket
    /// would never trigger a resize.
    #[error("fill_percent {fill_percent} must be between 1 and {max}")]
    FillPercent {
        /// Requested threshold.
        fill_percent: u32,
        /// Largest threshold the initial bucket count can still cross.
        max: u32,
    },
}

/// Construction-time settings for a [`HashTable`](crate::HashTable).
///
/// # Examples
///
/// ```rust
/// use bag_hash::Config;
///
/// let config = Config::new().with_size_log2(4).with_fill_percent(75);
/// assert_eq!(config.bucket_count(), 16);
/// assert!(config.validate().is_ok());
///
/// assert!(Config::new().with_fill_percent(0).validate().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    size_log2: u32,
    fill_percent: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            size_log2: DEFAULT_SIZE_LOG2,
            fill_percent: FILL_PERCENT,
        }
    }
}

impl Config {
    /// Returns the default configuration: 1024 buckets and the
    /// feature-selected [`FILL_PERCENT`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial bucket count to `2^size_log2`. Zero selects
    /// [`DEFAULT_SIZE_LOG2`].
    pub fn with_size_log2(mut self, size_log2: u32) -> Self {
        self.size_log2 = if size_log2 == 0 {
            DEFAULT_SIZE_LOG2
        } else {
            size_log2
        };
        self
    }

    /// Sets the percentage of filled buckets above which the table doubles.
    ///
    /// Lower values resize earlier and keep bag chains shorter. The table
    /// only doubles once `fill * 100 / (buckets + 1)` exceeds the threshold,
    /// so the threshold must stay below what a completely filled bucket
    /// array reaches; see [`Config::max_fill_percent`].
    pub fn with_fill_percent(mut self, fill_percent: u32) -> Self {
        self.fill_percent = fill_percent;
        self
    }

    /// Bucket count exponent.
    pub fn size_log2(&self) -> u32 {
        self.size_log2
    }

    /// Resize threshold in percent.
    pub fn fill_percent(&self) -> u32 {
        self.fill_percent
    }

    /// Initial number of buckets.
    pub fn bucket_count(&self) -> usize {
        1usize << self.size_log2.min(MAX_SIZE_LOG2)
    }

    /// Largest fill threshold that the initial bucket array can cross.
    ///
    /// A full array of `n` buckets reaches `n * 100 / (n + 1)` percent, which
    /// never hits 100. Doubling only raises that figure, so a threshold the
    /// initial array can cross stays reachable after every resize.
    ///
    /// ```rust
    /// use bag_hash::Config;
    ///
    /// assert_eq!(Config::new().with_size_log2(1).max_fill_percent(), 65);
    /// assert_eq!(Config::new().with_size_log2(10).max_fill_percent(), 98);
    /// ```
    pub fn max_fill_percent(&self) -> u32 {
        let buckets = self.bucket_count() as u128;
        // Always below 100, so the cast cannot truncate.
        (buckets * 100 / (buckets + 1)).saturating_sub(1) as u32
    }

    /// Checks that the configuration describes a usable table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.size_log2 > MAX_SIZE_LOG2 {
            return Err(ConfigError::SizeTooLarge {
                size_log2: self.size_log2,
                max: MAX_SIZE_LOG2,
            });
        }
        let max = self.max_fill_percent();
        if !(1..=max).contains(&self.fill_percent) {
            return Err(ConfigError::FillPercent {
                fill_percent: self.fill_percent,
                max,
            });
        }
        Ok(())
    }
}
