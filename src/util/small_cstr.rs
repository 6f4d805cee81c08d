use smallvec::SmallVec;
use std::ffi::{CStr, CString, NulError};

/// A nul-terminated copy of a database filename or key, kept inline when it
/// fits. The bytes are passed to SQLite as they are, UTF-8 or not.
#[derive(Clone, PartialEq, Eq)]
pub struct SmallCString(SmallVec<[u8; 64]>);

impl SmallCString {
    pub fn new(bytes: &[u8]) -> Result<SmallCString, NulError> {
        if bytes.contains(&0u8) {
            return Err(nul_error(bytes));
        }
        let mut buf = SmallVec::with_capacity(bytes.len() + 1);
        buf.extend_from_slice(bytes);
        buf.push(0);
        Ok(SmallCString(buf))
    }

    #[inline]
    pub fn as_bytes_without_nul(&self) -> &[u8] {
        &self.0[..self.0.len() - 1]
    }

    #[inline]
    pub fn as_cstr(&self) -> &CStr {
        debug_assert!(CStr::from_bytes_with_nul(&self.0).is_ok());
        unsafe { CStr::from_bytes_with_nul_unchecked(&self.0) }
    }
}

#[cold]
fn nul_error(bytes: &[u8]) -> NulError {
    match CString::new(bytes) {
        Err(e) => e,
        Ok(_) => unreachable!("bytes without nul"),
    }
}

impl std::fmt::Debug for SmallCString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SmallCString")
            .field(&String::from_utf8_lossy(self.as_bytes_without_nul()))
            .finish()
    }
}

impl std::ops::Deref for SmallCString {
    type Target = CStr;
    #[inline]
    fn deref(&self) -> &CStr {
        self.as_cstr()
    }
}
