//! A handle-based, thread-safe core over SQLite connections.
//!
//! Every open connection is identified by a small positive integer handle
//! issued by a [`Registry`]. Each connection owns at most one prepared
//! statement at a time, and the statement lifecycle is driven entirely
//! through the handle:
//!
//! ```rust
//! use sqlite_connection_core::{OpenFlags, Registry, Result, Step};
//!
//! fn main() -> Result<()> {
//!     let registry = Registry::new()?;
//!     let db = registry.open(":memory:", OpenFlags::default())?;
//!
//!     registry.begin(db, "CREATE TABLE t(a INTEGER)")?;
//!     assert_eq!(registry.step(db)?, Step::Done);
//!     registry.end(db)?;
//!
//!     registry.begin(db, "INSERT INTO t VALUES (?)")?;
//!     registry.bind_long(db, 1, 42)?;
//!     registry.step(db)?;
//!     registry.end(db)?;
//!
//!     registry.begin(db, "SELECT a FROM t")?;
//!     assert_eq!(registry.step(db)?, Step::Row);
//!     assert_eq!(registry.column_long(db, 0)?, 42);
//!     assert_eq!(registry.step(db)?, Step::Done);
//!     registry.end(db)?;
//!     Ok(())
//! }
//! ```
//!
//! Handles are never reused, not even after [`Registry::close`]. Calling
//! an operation out of order (no active statement, a second `begin`, an
//! unknown handle) fails with [`Error::Misuse`] before SQLite is touched.
//!
//! The [`capi`] module exposes the same operations as `extern "C"`
//! functions using plain integer result codes.
#![deny(unsafe_op_in_unsafe_fn)]

pub use libsqlite3_sys as ffi;

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::result;

pub use crate::column::ColumnType;
pub use crate::config::{DbConfig, RegistryBuilder, DEFAULT_CAPACITY, MAXIMUM_CONNECTIONS};
pub use crate::error::{Error, Misuse};
pub use crate::registry::{Handle, Registry};
pub use crate::statement::Step;
pub use ffi::ErrorCode;

pub mod capi;
mod column;
mod config;
mod error;
mod inner_connection;
mod raw_statement;
mod registry;
mod statement;
mod util;

/// A typedef of the result returned by many methods.
pub type Result<T, E = Error> = result::Result<T, E>;

/// Status code reported for every protocol violation, SQLite's own
/// `SQLITE_MISUSE`.
pub const MISUSE: c_int = ffi::SQLITE_MISUSE;

/// Result of `open` when the registry is not initialized or is full.
pub const INVALID_HANDLE: c_int = -1;

unsafe fn errmsg_to_string(errmsg: *const c_char) -> String {
    let c_slice = unsafe { CStr::from_ptr(errmsg) }.to_bytes();
    String::from_utf8_lossy(c_slice).into_owned()
}

#[inline]
fn len_as_c_int(len: usize) -> Result<c_int> {
    if len >= (c_int::MAX as usize) {
        Err(Error::InvalidTextLength(len))
    } else {
        Ok(len as c_int)
    }
}

bitflags::bitflags! {
    /// Flags for opening SQLite database connections.
    /// See [sqlite3_open_v2](http://www.sqlite.org/c3ref/open.html) for details.
    #[repr(C)]
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct OpenFlags: c_int {
        /// The database is opened in read-only mode.
        const SQLITE_OPEN_READ_ONLY = ffi::SQLITE_OPEN_READONLY;
        /// The database is opened for reading and writing if possible.
        const SQLITE_OPEN_READ_WRITE = ffi::SQLITE_OPEN_READWRITE;
        /// The database is created if it does not already exist.
        const SQLITE_OPEN_CREATE = ffi::SQLITE_OPEN_CREATE;
        /// The filename can be interpreted as a URI.
        const SQLITE_OPEN_URI = 0x0000_0040;
        /// The database will be opened as an in-memory database.
        const SQLITE_OPEN_MEMORY = 0x0000_0080;
        /// The connection uses the multi-thread threading mode.
        const SQLITE_OPEN_NO_MUTEX = ffi::SQLITE_OPEN_NOMUTEX;
        /// The connection uses the serialized threading mode.
        const SQLITE_OPEN_FULL_MUTEX = ffi::SQLITE_OPEN_FULLMUTEX;
        /// The database is opened with shared cache enabled.
        const SQLITE_OPEN_SHARED_CACHE = 0x0002_0000;
        /// The database is opened with shared cache disabled.
        const SQLITE_OPEN_PRIVATE_CACHE = 0x0004_0000;
    }
}

impl Default for OpenFlags {
    /// Read-write, create, URI filenames and the serialized threading mode.
    ///
    /// The connection-level accessors run without the record's statement
    /// lock, so connections default to `SQLITE_OPEN_FULL_MUTEX`.
    #[inline]
    fn default() -> OpenFlags {
        OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX
            | OpenFlags::SQLITE_OPEN_URI
    }
}
