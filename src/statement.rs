//! The statement lifecycle: begin, bind, step, end.

use std::os::raw::c_int;

use tracing::trace;

use crate::error::{decode_result, error_from_sqlite_code, Error, Misuse};
use crate::ffi;
use crate::registry::{Handle, Registry, Slot};
use crate::Result;

/// Outcome of a successful [`Registry::step`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// A row is available through the column accessors (`SQLITE_ROW`).
    Row,
    /// The statement has run to completion (`SQLITE_DONE`).
    Done,
}

impl Step {
    /// The SQLite status code for this outcome.
    #[inline]
    pub fn code(self) -> c_int {
        match self {
            Step::Row => ffi::SQLITE_ROW,
            Step::Done => ffi::SQLITE_DONE,
        }
    }
}

impl Registry {
    /// Compiles `sql` into the connection's statement slot.
    ///
    /// Only the first statement of `sql` is compiled. Text holding no
    /// statement at all succeeds and leaves the slot empty.
    ///
    /// # Failure
    ///
    /// Fails with [`Misuse::StatementActive`] if the slot is taken; the
    /// active statement is left untouched and the call never waits for it.
    pub fn begin(&self, handle: Handle, sql: &str) -> Result<()> {
        self.begin_utf8_bytes(handle, sql.as_bytes())
    }

    /// Like [`Registry::begin`], with SQL text that is handed to SQLite
    /// without UTF-8 validation.
    pub fn begin_utf8_bytes(&self, handle: Handle, sql: &[u8]) -> Result<()> {
        self.record(handle)?.with_slot(|slot, conn| {
            if let Slot::Active(_) = *slot {
                return Err(Error::Misuse(Misuse::StatementActive));
            }
            let conn = conn.ok_or(Error::Misuse(Misuse::Closed(handle.get())))?;
            if let Some(stmt) = conn.prepare(sql)? {
                *slot = Slot::Active(stmt);
            }
            trace!(%handle, sql = %String::from_utf8_lossy(sql), "began statement");
            Ok(())
        })
    }

    /// Binds UTF-8 text to the 1-based parameter `index`.
    pub fn bind_text(&self, handle: Handle, index: c_int, text: &str) -> Result<()> {
        self.bind_text_utf8_bytes(handle, index, text.as_bytes())
    }

    /// Binds UTF-8 encoded bytes as text, without validating them.
    pub fn bind_text_utf8_bytes(&self, handle: Handle, index: c_int, text: &[u8]) -> Result<()> {
        self.record(handle)?
            .with_statement(|stmt| decode_result(stmt.bind_text(index, text)?))
    }

    /// Binds native-endian UTF-16 code units as text.
    pub fn bind_text_utf16(&self, handle: Handle, index: c_int, text: &[u16]) -> Result<()> {
        self.record(handle)?
            .with_statement(|stmt| decode_result(stmt.bind_text16(index, text)?))
    }

    pub fn bind_double(&self, handle: Handle, index: c_int, value: f64) -> Result<()> {
        self.record(handle)?
            .with_statement(|stmt| decode_result(stmt.bind_double(index, value)))
    }

    pub fn bind_long(&self, handle: Handle, index: c_int, value: i64) -> Result<()> {
        self.record(handle)?
            .with_statement(|stmt| decode_result(stmt.bind_int64(index, value)))
    }

    pub fn bind_null(&self, handle: Handle, index: c_int) -> Result<()> {
        self.record(handle)?
            .with_statement(|stmt| decode_result(stmt.bind_null(index)))
    }

    /// Advances the active statement by one row.
    ///
    /// `SQLITE_BUSY` and `SQLITE_LOCKED` come back as
    /// [`Error::SqliteFailure`] like every other failure; nothing is retried.
    pub fn step(&self, handle: Handle) -> Result<Step> {
        self.record(handle)?.with_statement(|stmt| match stmt.step() {
            ffi::SQLITE_ROW => Ok(Step::Row),
            ffi::SQLITE_DONE => Ok(Step::Done),
            rc => Err(error_from_sqlite_code(rc)),
        })
    }

    /// Finalizes the active statement and frees the slot.
    ///
    /// The slot is freed even when finalizing reports an error (the error
    /// of the last failed `step`).
    pub fn end(&self, handle: Handle) -> Result<()> {
        self.record(handle)?.with_slot(|slot, _| {
            if let Slot::Idle = *slot {
                return Err(Error::Misuse(Misuse::NoActiveStatement));
            }
            match std::mem::replace(slot, Slot::Idle) {
                Slot::Active(stmt) => {
                    trace!(%handle, "ended statement");
                    decode_result(stmt.finalize())
                }
                _ => Ok(()),
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::OpenFlags;

    fn open() -> (Registry, Handle) {
        let db = Registry::builder().capacity(4).build().unwrap();
        let h = db.open(":memory:", OpenFlags::default()).unwrap();
        (db, h)
    }

    #[test]
    fn test_step_codes() {
        assert_eq!(Step::Row.code(), 100);
        assert_eq!(Step::Done.code(), 101);
    }

    #[test]
    fn test_double_begin() {
        let (db, h) = open();
        db.begin(h, "SELECT 1").unwrap();
        assert_eq!(
            db.begin(h, "SELECT 2"),
            Err(Error::Misuse(Misuse::StatementActive))
        );
        assert_eq!(db.step(h), Ok(Step::Row));
        assert_eq!(db.column_long(h, 0), Ok(1));
        assert_eq!(db.step(h), Ok(Step::Done));
        db.end(h).unwrap();
    }

    #[test]
    fn test_no_active_statement() {
        let (db, h) = open();
        let misuse = Err(Error::Misuse(Misuse::NoActiveStatement));
        assert_eq!(db.bind_text(h, 1, "x"), misuse);
        assert_eq!(db.bind_text_utf16(h, 1, &[0x78]), misuse);
        assert_eq!(db.bind_double(h, 1, 1.5), misuse);
        assert_eq!(db.bind_long(h, 1, 1), misuse);
        assert_eq!(db.bind_null(h, 1), misuse);
        assert_eq!(db.step(h), Err(Error::Misuse(Misuse::NoActiveStatement)));
        assert_eq!(db.end(h), misuse);
    }

    #[test]
    fn test_empty_sql() {
        let (db, h) = open();
        db.begin(h, "  -- only a comment").unwrap();
        assert_eq!(db.step(h), Err(Error::Misuse(Misuse::NoActiveStatement)));
        db.begin(h, "SELECT 1").unwrap();
        db.end(h).unwrap();
    }

    #[test]
    fn test_compile_error() {
        let (db, h) = open();
        let err = db.begin(h, "SELECT * FROM missing").unwrap_err();
        assert_eq!(err.code(), ffi::SQLITE_ERROR);
        assert!(db
            .last_error_message(h)
            .unwrap()
            .contains("no such table: missing"));
        // the slot stays free
        db.begin(h, "SELECT 1").unwrap();
        db.end(h).unwrap();
    }

    #[test]
    fn test_begin_non_utf8_sql() {
        let (db, h) = open();
        db.begin_utf8_bytes(h, b"SELECT 'caf\xe9'").unwrap();
        assert_eq!(db.step(h), Ok(Step::Row));
        assert_eq!(db.column_text(h, 0).unwrap(), "caf\u{fffd}");
        db.end(h).unwrap();
    }

    #[test]
    fn test_bind_out_of_range() {
        let (db, h) = open();
        db.begin(h, "SELECT ?").unwrap();
        let err = db.bind_long(h, 2, 1).unwrap_err();
        assert_eq!(err.code(), ffi::SQLITE_RANGE);
        db.end(h).unwrap();
    }

    #[test]
    fn test_end_reports_step_failure() {
        let (db, h) = open();
        for sql in &["CREATE TABLE t(a INTEGER PRIMARY KEY)", "INSERT INTO t VALUES (1)"] {
            db.begin(h, sql).unwrap();
            assert_eq!(db.step(h), Ok(Step::Done));
            db.end(h).unwrap();
        }
        db.begin(h, "INSERT INTO t VALUES (1)").unwrap();
        let err = db.step(h).unwrap_err();
        assert_eq!(err.sqlite_error_code(), Some(ffi::ErrorCode::ConstraintViolation));
        let err = db.end(h).unwrap_err();
        assert_eq!(err.sqlite_error_code(), Some(ffi::ErrorCode::ConstraintViolation));
        // the slot is free again
        db.begin(h, "SELECT 1").unwrap();
        db.end(h).unwrap();
    }

    #[test]
    fn test_close_with_active_statement() {
        let (db, h) = open();
        db.begin(h, "SELECT 1").unwrap();
        db.close(h).unwrap();
        let closed = Err(Error::Misuse(Misuse::Closed(h.get())));
        assert_eq!(db.begin(h, "SELECT 1"), closed);
        assert_eq!(db.end(h), closed);
        assert_eq!(db.step(h), Err(Error::Misuse(Misuse::Closed(h.get()))));
    }
}
