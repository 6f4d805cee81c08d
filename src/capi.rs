//! `extern "C"` entry points over one process-wide [`Registry`].
//!
//! Every function takes and returns plain integers, doubles and C strings.
//! Status results use SQLite's codes plus [`MISUSE`] for protocol
//! violations; `scc_open_connection` returns a positive handle, `-1` when
//! the registry is not initialized or full, and the negated SQLite code when
//! the open itself fails.
//!
//! Strings returned by this module are fresh copies owned by the caller and
//! must be released with [`scc_free_string`].
//!
//! No function panics or unwinds into the caller.

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::slice;

use once_cell::sync::OnceCell;
use tracing::warn;

use crate::{ffi, Handle, OpenFlags, Registry, Result, INVALID_HANDLE, MISUSE};

/// `scc_get_column_type` results.
pub const SCC_COLUMN_TYPE_INTEGER: c_int = ffi::SQLITE_INTEGER;
pub const SCC_COLUMN_TYPE_FLOAT: c_int = ffi::SQLITE_FLOAT;
pub const SCC_COLUMN_TYPE_TEXT: c_int = ffi::SQLITE_TEXT;
pub const SCC_COLUMN_TYPE_BLOB: c_int = ffi::SQLITE_BLOB;
pub const SCC_COLUMN_TYPE_NULL: c_int = ffi::SQLITE_NULL;

static REGISTRY: OnceCell<Registry> = OnceCell::new();

#[inline]
fn registry() -> Option<&'static Registry> {
    REGISTRY.get()
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => ffi::SQLITE_OK,
        Err(e) => e.code(),
    }
}

/// Runs a statement-level operation. Before `scc_init` no handle can have
/// been issued, so every handle is reported as misuse.
fn with_registry<F>(f: F) -> c_int
where
    F: FnOnce(&Registry) -> Result<()>,
{
    match registry() {
        Some(registry) => status(f(registry)),
        None => MISUSE,
    }
}

fn into_c_string(s: String) -> *mut c_char {
    let c = match CString::new(s) {
        Ok(c) => c,
        Err(e) => {
            // Text with an embedded nul is cut at the nul.
            let pos = e.nul_position();
            let mut bytes = e.into_vec();
            bytes.truncate(pos);
            // SAFETY: `bytes` holds no nul after truncating at the first one.
            unsafe { CString::from_vec_unchecked(bytes) }
        }
    };
    c.into_raw()
}

fn empty_c_string() -> *mut c_char {
    into_c_string(String::new())
}

/// Bytes of a C string argument, not required to be UTF-8.
///
/// # Safety
///
/// `ptr` is null or points at a nul-terminated string.
unsafe fn bytes_arg<'a>(ptr: *const c_char) -> Option<&'a [u8]> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_bytes())
}

/// Creates the process-wide registry. Calling it again does nothing.
///
/// If SQLite cannot be used from several threads the registry stays
/// uncreated and `scc_open_connection` keeps returning `-1`.
#[no_mangle]
pub extern "C" fn scc_init() {
    if let Err(e) = REGISTRY.get_or_try_init(Registry::new) {
        warn!("unable to initialize the connection registry: {}", e);
    }
}

/// Opens `filename` with `sqlite3_open_v2` flags. The filename bytes are
/// passed to SQLite unchanged, whatever their encoding.
///
/// # Safety
///
/// `filename` is null or points at a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn scc_open_connection(filename: *const c_char, flags: c_int) -> c_int {
    let registry = match registry() {
        Some(registry) => registry,
        None => return INVALID_HANDLE,
    };
    let filename = match unsafe { bytes_arg(filename) } {
        Some(filename) => filename,
        None => return -MISUSE,
    };
    match registry.open_bytes(filename, OpenFlags::from_bits_retain(flags)) {
        Ok(handle) => handle.get(),
        Err(e) => e.code(),
    }
}

/// Applies a SQLCipher key. Returns `-1` when built without SQLCipher.
///
/// # Safety
///
/// `key` is null or points at a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn scc_key(connection_id: c_int, key: *const c_char) -> c_int {
    #[cfg(feature = "sqlcipher")]
    {
        let key = match unsafe { bytes_arg(key) } {
            Some(key) => key,
            None => return MISUSE,
        };
        with_registry(|r| r.key(Handle::from_raw(connection_id), key))
    }
    #[cfg(not(feature = "sqlcipher"))]
    {
        let _ = (connection_id, key);
        INVALID_HANDLE
    }
}

/// Compiles the first statement of `statement`. The bytes are passed to
/// SQLite unchanged.
///
/// # Safety
///
/// `statement` is null or points at a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn scc_begin_statement(
    connection_id: c_int,
    statement: *const c_char,
) -> c_int {
    let sql = match unsafe { bytes_arg(statement) } {
        Some(sql) => sql,
        None => return MISUSE,
    };
    with_registry(|r| r.begin_utf8_bytes(Handle::from_raw(connection_id), sql))
}

/// Binds nul-terminated UTF-8 text; a null `text` binds SQL NULL.
///
/// # Safety
///
/// `text` is null or points at a nul-terminated string.
#[no_mangle]
pub unsafe extern "C" fn scc_bind_text(
    connection_id: c_int,
    index: c_int,
    text: *const c_char,
) -> c_int {
    let handle = Handle::from_raw(connection_id);
    match unsafe { bytes_arg(text) } {
        Some(bytes) => with_registry(|r| r.bind_text_utf8_bytes(handle, index, bytes)),
        None => with_registry(|r| r.bind_null(handle, index)),
    }
}

/// Binds `length` bytes of UTF-8 text. A negative `length` reads up to the
/// first nul byte.
///
/// # Safety
///
/// `text` points at `length` readable bytes, or at a nul-terminated string
/// when `length` is negative. It may be null only when `length` is 0.
#[no_mangle]
pub unsafe extern "C" fn scc_bind_text_utf8_bytes(
    connection_id: c_int,
    index: c_int,
    text: *const c_void,
    length: c_int,
) -> c_int {
    let bytes: &[u8] = if length < 0 {
        if text.is_null() {
            return MISUSE;
        }
        unsafe { CStr::from_ptr(text as *const c_char) }.to_bytes()
    } else if length == 0 {
        &[]
    } else if text.is_null() {
        return MISUSE;
    } else {
        unsafe { slice::from_raw_parts(text as *const u8, length as usize) }
    };
    with_registry(|r| r.bind_text_utf8_bytes(Handle::from_raw(connection_id), index, bytes))
}

/// Binds `length` bytes of native-endian UTF-16 text. A negative `length`
/// reads up to the first zero code unit; a trailing odd byte is ignored.
///
/// # Safety
///
/// `text` points at `length` readable bytes, or at a zero-terminated UTF-16
/// string when `length` is negative. It may be null only when `length` is 0.
/// No alignment is required.
#[no_mangle]
pub unsafe extern "C" fn scc_bind_text_utf16_bytes(
    connection_id: c_int,
    index: c_int,
    text: *const c_void,
    length: c_int,
) -> c_int {
    if text.is_null() && length != 0 {
        return MISUSE;
    }
    let units: Vec<u16> = if length < 0 {
        let p = text as *const u16;
        let mut units = Vec::new();
        loop {
            let unit = unsafe { ptr::read_unaligned(p.add(units.len())) };
            if unit == 0 {
                break;
            }
            units.push(unit);
        }
        units
    } else if length == 0 {
        Vec::new()
    } else {
        let bytes = unsafe { slice::from_raw_parts(text as *const u8, length as usize) };
        bytes
            .chunks_exact(2)
            .map(|pair| u16::from_ne_bytes([pair[0], pair[1]]))
            .collect()
    };
    with_registry(|r| r.bind_text_utf16(Handle::from_raw(connection_id), index, &units))
}

#[no_mangle]
pub extern "C" fn scc_bind_double(connection_id: c_int, index: c_int, value: f64) -> c_int {
    with_registry(|r| r.bind_double(Handle::from_raw(connection_id), index, value))
}

#[no_mangle]
pub extern "C" fn scc_bind_long(connection_id: c_int, index: c_int, value: i64) -> c_int {
    with_registry(|r| r.bind_long(Handle::from_raw(connection_id), index, value))
}

#[no_mangle]
pub extern "C" fn scc_bind_null(connection_id: c_int, index: c_int) -> c_int {
    with_registry(|r| r.bind_null(Handle::from_raw(connection_id), index))
}

/// Returns `SQLITE_ROW` (100), `SQLITE_DONE` (101) or an error code.
#[no_mangle]
pub extern "C" fn scc_step(connection_id: c_int) -> c_int {
    match registry() {
        Some(r) => match r.step(Handle::from_raw(connection_id)) {
            Ok(step) => step.code(),
            Err(e) => e.code(),
        },
        None => MISUSE,
    }
}

/// Message of the most recent error on the connection, or a description of
/// why the handle was rejected.
#[no_mangle]
pub extern "C" fn scc_get_last_error_message(connection_id: c_int) -> *mut c_char {
    let message = match registry() {
        Some(r) => match r.last_error_message(Handle::from_raw(connection_id)) {
            Ok(msg) => msg,
            Err(e) => e.to_string(),
        },
        None => crate::Error::NotInitialized.to_string(),
    };
    into_c_string(message)
}

/// Column count of the active statement, `-1` on error.
#[no_mangle]
pub extern "C" fn scc_get_column_count(connection_id: c_int) -> c_int {
    registry()
        .and_then(|r| r.column_count(Handle::from_raw(connection_id)).ok())
        .map_or(-1, |count| count as c_int)
}

/// Column name, the empty string on error.
#[no_mangle]
pub extern "C" fn scc_get_column_name(connection_id: c_int, column: c_int) -> *mut c_char {
    match column_arg(column).and_then(|idx| {
        registry()?
            .column_name(Handle::from_raw(connection_id), idx)
            .ok()
    }) {
        Some(name) => into_c_string(name),
        None => empty_c_string(),
    }
}

/// One of the `SCC_COLUMN_TYPE_*` values, `-1` on error.
#[no_mangle]
pub extern "C" fn scc_get_column_type(connection_id: c_int, column: c_int) -> c_int {
    column_arg(column)
        .and_then(|idx| {
            registry()?
                .column_type(Handle::from_raw(connection_id), idx)
                .ok()
        })
        .map_or(-1, |t| t.code())
}

/// Column value as text; SQL NULL and errors give the empty string.
#[no_mangle]
pub extern "C" fn scc_get_column_text(connection_id: c_int, column: c_int) -> *mut c_char {
    match column_arg(column).and_then(|idx| {
        registry()?
            .column_text(Handle::from_raw(connection_id), idx)
            .ok()
    }) {
        Some(text) => into_c_string(text),
        None => empty_c_string(),
    }
}

/// Column value as a double, NaN on error.
#[no_mangle]
pub extern "C" fn scc_get_column_double(connection_id: c_int, column: c_int) -> f64 {
    column_arg(column)
        .and_then(|idx| {
            registry()?
                .column_double(Handle::from_raw(connection_id), idx)
                .ok()
        })
        .unwrap_or(f64::NAN)
}

/// Column value as a 64-bit integer, 0 on error.
#[no_mangle]
pub extern "C" fn scc_get_column_long(connection_id: c_int, column: c_int) -> i64 {
    column_arg(column)
        .and_then(|idx| {
            registry()?
                .column_long(Handle::from_raw(connection_id), idx)
                .ok()
        })
        .unwrap_or(0)
}

fn column_arg(column: c_int) -> Option<usize> {
    usize::try_from(column).ok()
}

/// Total changes on the connection, 0 on error.
#[no_mangle]
pub extern "C" fn scc_get_total_changes(connection_id: c_int) -> c_int {
    registry()
        .and_then(|r| r.total_changes(Handle::from_raw(connection_id)).ok())
        .unwrap_or(0)
}

/// Rowid of the last insert on the connection, 0 on error.
#[no_mangle]
pub extern "C" fn scc_get_last_insert_rowid(connection_id: c_int) -> i64 {
    registry()
        .and_then(|r| r.last_insert_id(Handle::from_raw(connection_id)).ok())
        .unwrap_or(0)
}

#[no_mangle]
pub extern "C" fn scc_end_statement(connection_id: c_int) -> c_int {
    with_registry(|r| r.end(Handle::from_raw(connection_id)))
}

/// Closes the connection; its handle is never valid again.
#[no_mangle]
pub extern "C" fn scc_close_connection(connection_id: c_int) -> c_int {
    with_registry(|r| r.close(Handle::from_raw(connection_id)))
}

/// Releases a string returned by this module. Null is ignored.
///
/// # Safety
///
/// `s` is null or a pointer returned by one of the `scc_get_*` string
/// functions that has not been freed yet.
#[no_mangle]
pub unsafe extern "C" fn scc_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_into_c_string() {
        unsafe {
            let s = into_c_string("abc".to_owned());
            assert_eq!(CStr::from_ptr(s).to_str().unwrap(), "abc");
            scc_free_string(s);

            let s = into_c_string("ab\0cd".to_owned());
            assert_eq!(CStr::from_ptr(s).to_str().unwrap(), "ab");
            scc_free_string(s);

            scc_free_string(ptr::null_mut());
        }
    }

    #[test]
    fn test_column_arg() {
        assert_eq!(column_arg(0), Some(0));
        assert_eq!(column_arg(-1), None);
    }

    #[test]
    fn test_column_type_constants() {
        assert_eq!(SCC_COLUMN_TYPE_INTEGER, 1);
        assert_eq!(SCC_COLUMN_TYPE_FLOAT, 2);
        assert_eq!(SCC_COLUMN_TYPE_TEXT, 3);
        assert_eq!(SCC_COLUMN_TYPE_BLOB, 4);
        assert_eq!(SCC_COLUMN_TYPE_NULL, 5);
    }
}
