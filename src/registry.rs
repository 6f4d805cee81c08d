//! Handle allocation and the per-connection records.

use std::cell::RefCell;
use std::fmt;
use std::os::raw::c_int;

use once_cell::sync::OnceCell;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::debug;

use crate::config::RegistryBuilder;
use crate::error::{decode_result, Error, Misuse};
use crate::ffi;
use crate::inner_connection::InnerConnection;
use crate::raw_statement::RawStatement;
use crate::util::SmallCString;
use crate::{DbConfig, OpenFlags, Result};

/// Identifies one connection of a [`Registry`].
///
/// Issued handles start at 1 and are never reused. A `Handle` built with
/// [`Handle::from_raw`] is not checked until it is used; unknown values are
/// rejected with [`Misuse::InvalidHandle`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Handle(c_int);

impl Handle {
    #[inline]
    pub const fn from_raw(raw: c_int) -> Handle {
        Handle(raw)
    }

    #[inline]
    pub const fn get(self) -> c_int {
        self.0
    }
}

impl From<Handle> for c_int {
    #[inline]
    fn from(handle: Handle) -> c_int {
        handle.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// The statement slot of a record.
pub(crate) enum Slot {
    Idle,
    Active(RawStatement),
    Closed,
}

pub(crate) struct Record {
    handle: Handle,
    // Lock order: `statement` before `conn`. Fields drop in declaration
    // order, so a leftover statement is finalized before its connection
    // closes.
    statement: ReentrantMutex<RefCell<Slot>>,
    conn: RwLock<Option<InnerConnection>>,
}

impl Record {
    fn new(handle: Handle, conn: InnerConnection) -> Record {
        Record {
            handle,
            statement: ReentrantMutex::new(RefCell::new(Slot::Idle)),
            conn: RwLock::new(Some(conn)),
        }
    }

    #[inline]
    fn closed(&self) -> Error {
        Error::Misuse(Misuse::Closed(self.handle.get()))
    }

    /// Runs `f` against the active statement under the statement lock.
    pub(crate) fn with_statement<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&RawStatement) -> Result<T>,
    {
        let guard = self.statement.lock();
        let slot = guard.borrow();
        match *slot {
            Slot::Active(ref stmt) => f(stmt),
            Slot::Idle => Err(Error::Misuse(Misuse::NoActiveStatement)),
            Slot::Closed => Err(self.closed()),
        }
    }

    /// Runs `f` with the statement slot borrowed mutably, under the
    /// statement lock.
    pub(crate) fn with_slot<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Slot, Option<&InnerConnection>) -> Result<T>,
    {
        let guard = self.statement.lock();
        let mut slot = guard.borrow_mut();
        if let Slot::Closed = *slot {
            return Err(self.closed());
        }
        let conn = self.conn.read();
        f(&mut *slot, conn.as_ref())
    }

    /// Connection-level access; does not take the statement lock.
    fn with_connection<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&InnerConnection) -> T,
    {
        let conn = self.conn.read();
        match *conn {
            Some(ref c) => Ok(f(c)),
            None => Err(self.closed()),
        }
    }
}

/// A bounded table of SQLite connections addressed by integer handles.
///
/// Creating the registry is the one-time initialization; it may be shared
/// between threads (`&Registry` or `Arc<Registry>`). Every operation on a
/// handle takes that connection's own re-entrant lock, so calls on
/// different handles never contend. Opens are serialized through a single
/// registry-wide lock.
///
/// The locks make each call atomic, they do not order calls: two threads
/// driving statements on one handle at the same time can interleave their
/// `begin`/`bind`/`step`/`end` calls. One statement sequence must have a
/// single owner at a time per handle, and a caller that reads several
/// columns of a row while other threads use the same handle needs its own
/// lock around the whole read.
pub struct Registry {
    // `records[h - 1]` holds the record for handle `h` once its open
    // succeeded.
    records: Box<[OnceCell<Record>]>,
    // Next handle to issue, guarded by the open lock.
    open_lock: Mutex<c_int>,
    defensive: bool,
}

impl Registry {
    /// A registry with the default configuration, see [`RegistryBuilder`].
    pub fn new() -> Result<Registry> {
        Registry::builder().build()
    }

    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub(crate) fn with_config(config: RegistryBuilder) -> Result<Registry> {
        ensure_safe_sqlite_threading_mode()?;

        let capacity = config.capacity.min(c_int::MAX as usize - 1);
        let records = (0..capacity).map(|_| OnceCell::new()).collect();
        Ok(Registry {
            records,
            open_lock: Mutex::new(1),
            defensive: config.defensive,
        })
    }

    /// Maximum number of handles this registry will ever issue.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// Number of handles issued so far, closed ones included.
    pub fn issued_handles(&self) -> usize {
        (*self.open_lock.lock() - 1) as usize
    }

    /// Opens a new connection and returns its handle.
    ///
    /// The handle is reserved before SQLite is called and released again
    /// if the open (or switching the connection to defensive mode) fails.
    /// Nothing is opened once every handle has been issued.
    ///
    /// # Failure
    ///
    /// * `Error::CapacityExhausted` when the registry is full,
    /// * `Error::OpenFailure` when SQLite cannot open `filename`,
    /// * `Error::HardeningFailure` when defensive mode cannot be applied,
    /// * `Error::NulError` when `filename` contains a nul byte.
    pub fn open(&self, filename: &str, flags: OpenFlags) -> Result<Handle> {
        self.open_bytes(filename.as_bytes(), flags)
    }

    /// Like [`Registry::open`], for filenames that need not be UTF-8. The
    /// bytes reach `sqlite3_open_v2` unchanged.
    pub fn open_bytes(&self, filename: &[u8], flags: OpenFlags) -> Result<Handle> {
        let c_path = SmallCString::new(filename)?;
        let filename = String::from_utf8_lossy(filename);
        let filename: &str = &filename;

        let (handle, conn) = {
            let mut next_handle = self.open_lock.lock();
            if *next_handle as usize > self.capacity() {
                debug!(capacity = self.capacity(), "connection registry is full");
                return Err(Error::CapacityExhausted(self.capacity()));
            }
            let handle = *next_handle;
            *next_handle += 1;

            match InnerConnection::open_with_flags(&c_path, flags, self.defensive) {
                Ok(conn) => (Handle(handle), conn),
                Err(e) => {
                    // Still under the open lock, so this only undoes our own
                    // increment.
                    *next_handle -= 1;
                    debug!(filename, "failed to open connection: {}", e);
                    return Err(e);
                }
            }
        };

        let slot = &self.records[handle.get() as usize - 1];
        let stored = slot.set(Record::new(handle, conn)).is_ok();
        debug_assert!(stored, "handle {} issued twice", handle);
        debug!(%handle, filename, "opened connection");
        Ok(handle)
    }

    pub(crate) fn record(&self, handle: Handle) -> Result<&Record> {
        let raw = handle.get();
        if raw < 1 || raw as usize > self.capacity() {
            return Err(Error::Misuse(Misuse::InvalidHandle(raw)));
        }
        self.records[raw as usize - 1]
            .get()
            .ok_or(Error::Misuse(Misuse::InvalidHandle(raw)))
    }

    /// Closes a connection, finalizing its active statement if there is one.
    ///
    /// The handle is retired for good: it is never issued again and every
    /// later call with it fails with [`Misuse::Closed`]. If SQLite refuses
    /// to close, the connection stays usable under the same handle with an
    /// empty statement slot, and the error is returned.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let record = self.record(handle)?;
        let guard = record.statement.lock();
        let mut slot = guard.borrow_mut();
        match std::mem::replace(&mut *slot, Slot::Idle) {
            Slot::Closed => {
                *slot = Slot::Closed;
                return Err(record.closed());
            }
            Slot::Active(stmt) => {
                stmt.finalize();
            }
            Slot::Idle => {}
        }
        let mut conn = record.conn.write();
        if let Some(ref mut c) = *conn {
            if let Err(e) = c.close() {
                debug!(%handle, "failed to close connection: {}", e);
                return Err(e);
            }
        }
        *conn = None;
        *slot = Slot::Closed;
        debug!(%handle, "closed connection");
        Ok(())
    }

    /// Text of the most recent error on the connection.
    pub fn last_error_message(&self, handle: Handle) -> Result<String> {
        self.record(handle)?.with_connection(|c| c.errmsg())
    }

    /// Rows changed by INSERT, UPDATE and DELETE since the connection opened.
    pub fn total_changes(&self, handle: Handle) -> Result<c_int> {
        self.record(handle)?.with_connection(|c| c.total_changes())
    }

    /// Rowid of the most recent successful INSERT on the connection.
    pub fn last_insert_id(&self, handle: Handle) -> Result<i64> {
        self.record(handle)?.with_connection(|c| c.last_insert_rowid())
    }

    /// Changes a `sqlite3_db_config` setting of the connection and returns
    /// the value now in effect.
    pub fn set_db_config(&self, handle: Handle, config: DbConfig, new_val: bool) -> Result<bool> {
        self.record(handle)?
            .with_connection(|c| c.set_db_config(config, new_val))?
    }

    /// Sets the encryption key of a SQLCipher database.
    #[cfg(feature = "sqlcipher")]
    pub fn key(&self, handle: Handle, key: &[u8]) -> Result<()> {
        let key = SmallCString::new(key)?;
        self.record(handle)?.with_connection(|c| c.key(&key))?
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("capacity", &self.capacity())
            .field("issued_handles", &self.issued_handles())
            .field("defensive", &self.defensive)
            .finish()
    }
}

fn ensure_safe_sqlite_threading_mode() -> Result<()> {
    // Ensure SQLite was compiled in thredsafe mode.
    if unsafe { ffi::sqlite3_threadsafe() == 0 } {
        return Err(Error::SqliteSingleThreadedMode);
    }

    // SQLite can still have been configured for single-thread mode before we
    // got here. In that mode `sqlite3_mutex_alloc` hands out the magic
    // value 8 instead of a real mutex.
    const SQLITE_SINGLETHREADED_MUTEX_MAGIC: usize = 8;
    let is_singlethreaded = unsafe {
        let mutex_ptr = ffi::sqlite3_mutex_alloc(0);
        let is_singlethreaded = mutex_ptr as usize == SQLITE_SINGLETHREADED_MUTEX_MAGIC;
        ffi::sqlite3_mutex_free(mutex_ptr);
        is_singlethreaded
    };
    if is_singlethreaded {
        Err(Error::SqliteSingleThreadedMode)
    } else {
        decode_result(unsafe { ffi::sqlite3_initialize() })
    }
}
