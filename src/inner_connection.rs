#[cfg(test)]
use std::cell::Cell;
use std::os::raw::{c_char, c_int};
use std::ptr;

use super::ffi;
use super::{errmsg_to_string, len_as_c_int};
use super::{DbConfig, OpenFlags, Result};
use crate::error::{decode_result, Error};
use crate::raw_statement::RawStatement;
use crate::util::SmallCString;

/// An owned `sqlite3*`, closed on drop.
pub struct InnerConnection {
    db: *mut ffi::sqlite3,
}

// The pointer is only handed to SQLite. Statement work is serialized by the
// owning record's lock; the connection-level readers (`errmsg`,
// `total_changes`, `last_insert_rowid`) rely on SQLite's own mutex, which the
// default open flags request.
unsafe impl Send for InnerConnection {}
unsafe impl Sync for InnerConnection {}

impl InnerConnection {
    /// Opens `c_path` and, when `defensive` is set, switches the new
    /// connection to `SQLITE_DBCONFIG_DEFENSIVE`. A connection that cannot
    /// be hardened is closed again.
    pub fn open_with_flags(
        c_path: &SmallCString,
        flags: OpenFlags,
        defensive: bool,
    ) -> Result<InnerConnection> {
        // Replicate the check for sane open flags from SQLite, because the check in
        // SQLite itself wasn't added until version 3.7.3.
        debug_assert_eq!(1 << OpenFlags::SQLITE_OPEN_READ_ONLY.bits(), 0x02);
        debug_assert_eq!(1 << OpenFlags::SQLITE_OPEN_READ_WRITE.bits(), 0x04);
        debug_assert_eq!(
            1 << (OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE).bits(),
            0x40
        );
        if (1 << (flags.bits() & 0x7)) & 0x46 == 0 {
            return Err(Error::OpenFailure(
                ffi::Error::new(ffi::SQLITE_MISUSE),
                None,
            ));
        }

        unsafe {
            let mut db: *mut ffi::sqlite3 = ptr::null_mut();
            let r = ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags.bits(), ptr::null());
            if r != ffi::SQLITE_OK {
                let message = if db.is_null() {
                    None
                } else {
                    let msg = errmsg_to_string(ffi::sqlite3_errmsg(db));
                    ffi::sqlite3_close(db);
                    Some(format!(
                        "{}: {}",
                        msg,
                        String::from_utf8_lossy(c_path.as_bytes_without_nul())
                    ))
                };
                return Err(Error::OpenFailure(ffi::Error::new(r), message));
            }

            let mut conn = InnerConnection { db };
            if defensive && !cfg!(feature = "no_defensive") {
                if let Err(e) = conn.harden() {
                    // closing a connection without statements cannot fail
                    let _ = conn.close();
                    return Err(match e {
                        Error::SqliteFailure(err) => Error::HardeningFailure(err),
                        other => other,
                    });
                }
            }
            Ok(conn)
        }
    }

    #[inline]
    pub fn db(&self) -> *mut ffi::sqlite3 {
        self.db
    }

    fn harden(&self) -> Result<bool> {
        #[cfg(test)]
        {
            if let Some(rc) = FAIL_HARDENING.with(Cell::get) {
                return Err(crate::error::error_from_sqlite_code(rc));
            }
        }
        self.set_db_config(DbConfig::SQLITE_DBCONFIG_DEFENSIVE, true)
    }

    /// Closes the connection. Statements still alive keep the native
    /// connection open until they are finalized, after which SQLite frees
    /// it (`sqlite3_close_v2`).
    pub fn close(&mut self) -> Result<()> {
        if self.db.is_null() {
            return Ok(());
        }
        let r = unsafe { ffi::sqlite3_close_v2(self.db) };
        decode_result(r)?;
        self.db = ptr::null_mut();
        Ok(())
    }

    /// Compiles the first statement of `sql`, passed to SQLite as is.
    ///
    /// `Ok(None)` means the text held no statement at all (empty or only a
    /// comment). Anything after the first statement is ignored.
    pub fn prepare(&self, sql: &[u8]) -> Result<Option<RawStatement>> {
        let mut c_stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let len = len_as_c_int(sql.len())?;
        let c_sql = sql.as_ptr() as *const c_char;
        let r = unsafe {
            ffi::sqlite3_prepare_v2(
                self.db(),
                c_sql,
                len,
                &mut c_stmt as *mut *mut ffi::sqlite3_stmt,
                ptr::null_mut(),
            )
        };
        // If there is an error, *ppStmt is set to NULL.
        decode_result(r)?;
        if c_stmt.is_null() {
            Ok(None)
        } else {
            Ok(Some(unsafe { RawStatement::new(c_stmt) }))
        }
    }

    /// Copy of the English-language text of the most recent error.
    pub fn errmsg(&self) -> String {
        unsafe { errmsg_to_string(ffi::sqlite3_errmsg(self.db())) }
    }

    pub fn total_changes(&self) -> c_int {
        unsafe { ffi::sqlite3_total_changes(self.db()) }
    }

    pub fn last_insert_rowid(&self) -> i64 {
        unsafe { ffi::sqlite3_last_insert_rowid(self.db()) }
    }

    /// Make configuration changes to a database connection, returning the
    /// value now in effect.
    pub fn set_db_config(&self, config: DbConfig, new_val: bool) -> Result<bool> {
        let mut val: c_int = 0;
        let r = unsafe {
            ffi::sqlite3_db_config(
                self.db(),
                config as c_int,
                new_val as c_int,
                &mut val as *mut c_int,
            )
        };
        decode_result(r)?;
        Ok(val != 0)
    }

    #[cfg(feature = "sqlcipher")]
    pub fn key(&self, key: &SmallCString) -> Result<()> {
        let len = len_as_c_int(key.as_bytes_without_nul().len())?;
        let r = unsafe {
            ffi::sqlite3_key(
                self.db(),
                key.as_ptr() as *const std::os::raw::c_void,
                len,
            )
        };
        decode_result(r)
    }
}

// Makes `open_with_flags` on the current thread fail hardening with the
// given SQLite code.
#[cfg(test)]
thread_local! {
    pub(crate) static FAIL_HARDENING: Cell<Option<c_int>> = Cell::new(None);
}

impl Drop for InnerConnection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("error while closing SQLite connection: {}", e);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn open_memory(defensive: bool) -> InnerConnection {
        let path = SmallCString::new(b":memory:").unwrap();
        InnerConnection::open_with_flags(&path, OpenFlags::default(), defensive).unwrap()
    }

    #[test]
    fn test_open_in_memory() {
        let mut conn = open_memory(true);
        assert!(!conn.db().is_null());
        assert_eq!(conn.total_changes(), 0);
        assert_eq!(conn.last_insert_rowid(), 0);
        conn.close().unwrap();
        assert!(conn.db().is_null());
        // second close is a no-op
        conn.close().unwrap();
    }

    #[test]
    #[cfg(not(feature = "no_defensive"))]
    fn test_defensive_applied() {
        let conn = open_memory(true);
        // Reading back uses -1, which leaves the setting untouched.
        let mut val: c_int = 0;
        let r = unsafe {
            ffi::sqlite3_db_config(
                conn.db(),
                DbConfig::SQLITE_DBCONFIG_DEFENSIVE as c_int,
                -1 as c_int,
                &mut val as *mut c_int,
            )
        };
        assert_eq!(r, ffi::SQLITE_OK);
        assert_eq!(val, 1);

        let conn = open_memory(false);
        assert!(!conn.set_db_config(DbConfig::SQLITE_DBCONFIG_DEFENSIVE, false).unwrap());
    }

    #[test]
    fn test_invalid_open_flags() {
        let path = SmallCString::new(b":memory:").unwrap();
        for bad_flags in &[
            OpenFlags::empty(),
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_READ_WRITE,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_CREATE,
        ] {
            let err = InnerConnection::open_with_flags(&path, *bad_flags, true)
                .err()
                .unwrap();
            assert_eq!(err.code(), -ffi::SQLITE_MISUSE);
        }
    }

    #[test]
    fn test_open_failure_message() {
        let path = SmallCString::new(b"/nonexistent/dir/for/sure/test.db").unwrap();
        let err = InnerConnection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY, true)
            .err()
            .unwrap();
        match err {
            Error::OpenFailure(e, Some(msg)) => {
                assert_eq!(e.code, ffi::ErrorCode::CannotOpen);
                assert!(msg.contains("/nonexistent/dir/for/sure/test.db"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_prepare() {
        let conn = open_memory(true);
        assert!(conn.prepare(b"SELECT 1").unwrap().is_some());
        assert!(conn.prepare(b"SELECT 'caf\xe9'").unwrap().is_some());
        assert!(conn.prepare(b"").unwrap().is_none());
        assert!(conn.prepare(b"-- nothing here").unwrap().is_none());

        let err = conn.prepare(b"SELEKT 1").err().unwrap();
        assert_eq!(err.code(), ffi::SQLITE_ERROR);
        assert!(conn.errmsg().contains("syntax error"));
    }

    #[test]
    #[cfg(not(feature = "no_defensive"))]
    fn test_hardening_failure_closes_connection() {
        let path = SmallCString::new(b":memory:").unwrap();
        FAIL_HARDENING.with(|f| f.set(Some(ffi::SQLITE_NOMEM)));
        let res = InnerConnection::open_with_flags(&path, OpenFlags::default(), true);
        FAIL_HARDENING.with(|f| f.set(None));
        match res {
            Err(err @ Error::HardeningFailure(_)) => assert_eq!(err.code(), -ffi::SQLITE_NOMEM),
            Err(other) => panic!("unexpected error: {:?}", other),
            Ok(_) => panic!("hardening failure was ignored"),
        }

        // not requested, not applied
        FAIL_HARDENING.with(|f| f.set(Some(ffi::SQLITE_NOMEM)));
        let res = InnerConnection::open_with_flags(&path, OpenFlags::default(), false);
        FAIL_HARDENING.with(|f| f.set(None));
        assert!(res.is_ok());
    }
}
