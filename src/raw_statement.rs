use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::slice;

use super::ffi;
use super::len_as_c_int;
use crate::Result;

static EMPTY_UTF16: [u16; 1] = [0];

// Private newtype for raw sqlite3_stmts that finalize themselves when dropped.
#[derive(Debug)]
pub struct RawStatement(*mut ffi::sqlite3_stmt);

// Only ever touched while the owning record's statement lock is held.
unsafe impl Send for RawStatement {}

impl RawStatement {
    /// # Safety
    ///
    /// `stmt` must be a live statement handle that nothing else finalizes.
    #[inline]
    pub unsafe fn new(stmt: *mut ffi::sqlite3_stmt) -> RawStatement {
        RawStatement(stmt)
    }

    #[inline]
    pub fn column_count(&self) -> usize {
        unsafe { ffi::sqlite3_column_count(self.0) as usize }
    }

    #[inline]
    pub fn column_type(&self, idx: usize) -> c_int {
        unsafe { ffi::sqlite3_column_type(self.0, idx as c_int) }
    }

    #[inline]
    pub fn column_name(&self, idx: usize) -> Option<&CStr> {
        let idx = idx as c_int;
        if idx < 0 || idx >= self.column_count() as c_int {
            return None;
        }
        unsafe {
            let ptr = ffi::sqlite3_column_name(self.0, idx);
            // null only when SQLite runs out of memory
            if ptr.is_null() {
                None
            } else {
                Some(CStr::from_ptr(ptr))
            }
        }
    }

    /// UTF-8 text of a column of the current row, `None` for SQL NULL.
    ///
    /// The slice stays valid until the next step, finalize or type
    /// conversion on this column; callers copy it out under the lock.
    pub fn column_text(&self, idx: usize) -> Option<&[u8]> {
        unsafe {
            let text = ffi::sqlite3_column_text(self.0, idx as c_int);
            if text.is_null() {
                return None;
            }
            let len = ffi::sqlite3_column_bytes(self.0, idx as c_int);
            Some(slice::from_raw_parts(text as *const u8, len.max(0) as usize))
        }
    }

    #[inline]
    pub fn column_double(&self, idx: usize) -> f64 {
        unsafe { ffi::sqlite3_column_double(self.0, idx as c_int) }
    }

    #[inline]
    pub fn column_int64(&self, idx: usize) -> i64 {
        unsafe { ffi::sqlite3_column_int64(self.0, idx as c_int) }
    }

    #[inline]
    pub fn step(&self) -> c_int {
        unsafe { ffi::sqlite3_step(self.0) }
    }

    /// Binds UTF-8 text. SQLite copies the bytes before returning.
    pub fn bind_text(&self, col: c_int, text: &[u8]) -> Result<c_int> {
        let len = len_as_c_int(text.len())?;
        // A null pointer would bind NULL instead of ''.
        let c_str = if text.is_empty() {
            "".as_ptr() as *const c_char
        } else {
            text.as_ptr() as *const c_char
        };
        Ok(unsafe { ffi::sqlite3_bind_text(self.0, col, c_str, len, ffi::SQLITE_TRANSIENT()) })
    }

    /// Binds native-endian UTF-16 text. SQLite copies the code units before
    /// returning.
    pub fn bind_text16(&self, col: c_int, text: &[u16]) -> Result<c_int> {
        let len = len_as_c_int(text.len().saturating_mul(2))?;
        // A null pointer would bind NULL instead of ''.
        let c_str = if text.is_empty() {
            EMPTY_UTF16.as_ptr() as *const c_void
        } else {
            text.as_ptr() as *const c_void
        };
        Ok(unsafe {
            ffi::sqlite3_bind_text16(self.0, col, c_str, len, ffi::SQLITE_TRANSIENT())
        })
    }

    #[inline]
    pub fn bind_double(&self, col: c_int, value: f64) -> c_int {
        unsafe { ffi::sqlite3_bind_double(self.0, col, value) }
    }

    #[inline]
    pub fn bind_int64(&self, col: c_int, value: i64) -> c_int {
        unsafe { ffi::sqlite3_bind_int64(self.0, col, value) }
    }

    #[inline]
    pub fn bind_null(&self, col: c_int) -> c_int {
        unsafe { ffi::sqlite3_bind_null(self.0, col) }
    }

    #[inline]
    pub fn finalize(mut self) -> c_int {
        self.finalize_()
    }

    #[inline]
    fn finalize_(&mut self) -> c_int {
        let r = unsafe { ffi::sqlite3_finalize(self.0) };
        self.0 = ptr::null_mut();
        r
    }
}

impl Drop for RawStatement {
    fn drop(&mut self) {
        self.finalize_();
    }
}
