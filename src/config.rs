//! Configure the registry and its database connections

use crate::{Registry, Result};

/// Registry capacity used when nothing else is configured.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Capacity of registries built without an explicit
/// [`RegistryBuilder::capacity`], including the one behind the C API.
///
/// Taken from the `SCC_MAXIMUM_CONNECTIONS` environment variable at build
/// time when set, [`DEFAULT_CAPACITY`] otherwise.
pub const MAXIMUM_CONNECTIONS: usize = parse_capacity(option_env!("SCC_MAXIMUM_CONNECTIONS"));

const fn parse_capacity(value: Option<&str>) -> usize {
    let bytes = match value {
        Some(s) => s.as_bytes(),
        None => return DEFAULT_CAPACITY,
    };
    if bytes.is_empty() {
        return DEFAULT_CAPACITY;
    }
    let mut n = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b < b'0' || b > b'9' {
            panic!("SCC_MAXIMUM_CONNECTIONS must be a decimal number");
        }
        n = n * 10 + (b - b'0') as usize;
        i += 1;
    }
    n
}

/// Database Connection Configuration Options
#[repr(i32)]
#[allow(non_snake_case, non_camel_case_types)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum DbConfig {
    SQLITE_DBCONFIG_ENABLE_FKEY = 1002,
    SQLITE_DBCONFIG_ENABLE_TRIGGER = 1003,
    SQLITE_DBCONFIG_DEFENSIVE = 1010, // 3.26.0
}

/// Builds a [`Registry`].
///
/// ```rust
/// use sqlite_connection_core::Registry;
///
/// let registry = Registry::builder().capacity(8).defensive(true).build().unwrap();
/// assert_eq!(registry.capacity(), 8);
/// ```
#[derive(Clone, Debug)]
pub struct RegistryBuilder {
    pub(crate) capacity: usize,
    pub(crate) defensive: bool,
}

impl Default for RegistryBuilder {
    fn default() -> RegistryBuilder {
        RegistryBuilder {
            capacity: MAXIMUM_CONNECTIONS,
            defensive: cfg!(not(feature = "no_defensive")),
        }
    }
}

impl RegistryBuilder {
    /// Upper bound on the number of handles the registry will ever issue.
    pub fn capacity(mut self, capacity: usize) -> RegistryBuilder {
        self.capacity = capacity;
        self
    }

    /// Whether every new connection is switched to
    /// `SQLITE_DBCONFIG_DEFENSIVE` right after it opens. On by default
    /// unless the `no_defensive` feature is enabled.
    pub fn defensive(mut self, defensive: bool) -> RegistryBuilder {
        self.defensive = defensive;
        self
    }

    /// Performs the one-time initialization and returns the registry.
    ///
    /// # Failure
    ///
    /// Returns `Error::SqliteSingleThreadedMode` when SQLite cannot be used
    /// from several threads.
    pub fn build(self) -> Result<Registry> {
        Registry::with_config(self)
    }
}
