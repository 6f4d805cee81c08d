use std::os::raw::c_int;

use crate::error::Error;
use crate::ffi;
use crate::raw_statement::RawStatement;
use crate::registry::{Handle, Registry};
use crate::Result;

/// Fundamental datatype of a column value, as reported by
/// `sqlite3_column_type`.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnType {
    Integer = 1,
    Float = 2,
    Text = 3,
    Blob = 4,
    Null = 5,
}

impl ColumnType {
    pub fn from_raw(raw: c_int) -> Option<ColumnType> {
        match raw {
            ffi::SQLITE_INTEGER => Some(ColumnType::Integer),
            ffi::SQLITE_FLOAT => Some(ColumnType::Float),
            ffi::SQLITE_TEXT => Some(ColumnType::Text),
            ffi::SQLITE_BLOB => Some(ColumnType::Blob),
            ffi::SQLITE_NULL => Some(ColumnType::Null),
            _ => None,
        }
    }

    #[inline]
    pub fn code(self) -> c_int {
        self as c_int
    }
}

fn checked(stmt: &RawStatement, idx: usize) -> Result<usize> {
    if idx < stmt.column_count() {
        Ok(idx)
    } else {
        Err(Error::InvalidColumnIndex(idx))
    }
}

/// Column accessors for the current row of a handle's active statement.
///
/// Each call takes the statement lock on its own. Nothing stops another
/// thread from stepping the same handle between two reads of one row.
impl Registry {
    /// Number of columns in the result set of the active statement, 0 for
    /// statements that return no data.
    pub fn column_count(&self, handle: Handle) -> Result<usize> {
        self.record(handle)?
            .with_statement(|stmt| Ok(stmt.column_count()))
    }

    /// Name of the result column at `idx`.
    pub fn column_name(&self, handle: Handle, idx: usize) -> Result<String> {
        self.record(handle)?.with_statement(|stmt| {
            stmt.column_name(idx)
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or(Error::InvalidColumnIndex(idx))
        })
    }

    /// Datatype of the value at `idx` in the current row.
    ///
    /// Only meaningful after a `step` returned a row; the type may change
    /// once the value has been read through another accessor.
    pub fn column_type(&self, handle: Handle, idx: usize) -> Result<ColumnType> {
        self.record(handle)?.with_statement(|stmt| {
            let raw = stmt.column_type(checked(stmt, idx)?);
            // SQLite documents no other values.
            Ok(ColumnType::from_raw(raw).unwrap_or(ColumnType::Null))
        })
    }

    /// The value at `idx` as text, copied out of SQLite.
    ///
    /// SQL NULL reads as the empty string. Bytes that are not valid UTF-8
    /// are replaced with U+FFFD.
    pub fn column_text(&self, handle: Handle, idx: usize) -> Result<String> {
        self.record(handle)?.with_statement(|stmt| {
            let text = stmt.column_text(checked(stmt, idx)?);
            Ok(text
                .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
                .unwrap_or_default())
        })
    }

    pub fn column_double(&self, handle: Handle, idx: usize) -> Result<f64> {
        self.record(handle)?
            .with_statement(|stmt| Ok(stmt.column_double(checked(stmt, idx)?)))
    }

    pub fn column_long(&self, handle: Handle, idx: usize) -> Result<i64> {
        self.record(handle)?
            .with_statement(|stmt| Ok(stmt.column_int64(checked(stmt, idx)?)))
    }
}
