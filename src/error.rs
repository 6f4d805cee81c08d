use crate::ffi;
use std::error;
use std::ffi::NulError;
use std::fmt;
use std::os::raw::c_int;

/// Enum listing possible errors from the connection core.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// Error reported when the registry is created while SQLite was
    /// configured to allow single-threaded use only.
    SqliteSingleThreadedMode,

    /// The process-wide registry was used before `scc_init`.
    NotInitialized,

    /// Every handle the registry may issue is in use. The associated
    /// `usize` is the registry capacity.
    CapacityExhausted(usize),

    /// `sqlite3_open_v2` failed. The message is captured before the
    /// half-open connection is closed, since no handle survives to fetch
    /// it later.
    OpenFailure(ffi::Error, Option<String>),

    /// The connection opened but `SQLITE_DBCONFIG_DEFENSIVE` could not be
    /// applied; the connection was closed.
    HardeningFailure(ffi::Error),

    /// An operation was called out of protocol.
    Misuse(Misuse),

    /// An error from an underlying SQLite call on an open connection. The
    /// message is available from `Registry::last_error_message`.
    SqliteFailure(ffi::Error),

    /// Error when the value of a particular column is requested, but the index
    /// is out of range for the statement.
    InvalidColumnIndex(usize),

    /// Error converting a string to a C-compatible string because it contained
    /// an embedded nul.
    NulError(NulError),

    /// Text or byte length does not fit in a C `int`.
    InvalidTextLength(usize),
}

/// The protocol violations reported as [`Error::Misuse`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Misuse {
    /// The handle is not positive, was never issued, or is still being opened.
    InvalidHandle(c_int),
    /// The handle was closed.
    Closed(c_int),
    /// `begin` was called while a statement is still active.
    StatementActive,
    /// A statement operation was called with no active statement.
    NoActiveStatement,
}

impl Error {
    /// The integer status reported for this error on the handle-based
    /// surface.
    ///
    /// Registry-level failures map to `-1`, failed opens to the negated
    /// SQLite code, everything else to a positive SQLite status.
    pub fn code(&self) -> c_int {
        match *self {
            Error::SqliteSingleThreadedMode
            | Error::NotInitialized
            | Error::CapacityExhausted(_) => crate::INVALID_HANDLE,
            Error::OpenFailure(ref err, _) | Error::HardeningFailure(ref err) => {
                -err.extended_code
            }
            Error::Misuse(_) | Error::NulError(_) => ffi::SQLITE_MISUSE,
            Error::SqliteFailure(ref err) => err.extended_code,
            Error::InvalidColumnIndex(_) => ffi::SQLITE_RANGE,
            Error::InvalidTextLength(_) => ffi::SQLITE_TOOBIG,
        }
    }

    /// Returns the underlying SQLite error code, if any.
    pub fn sqlite_error_code(&self) -> Option<ffi::ErrorCode> {
        match *self {
            Error::OpenFailure(ref err, _)
            | Error::HardeningFailure(ref err)
            | Error::SqliteFailure(ref err) => Some(err.code),
            _ => None,
        }
    }

    /// `true` for [`Error::Misuse`].
    #[inline]
    pub fn is_misuse(&self) -> bool {
        matches!(*self, Error::Misuse(_))
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        match (self, other) {
            (Error::SqliteSingleThreadedMode, Error::SqliteSingleThreadedMode) => true,
            (Error::NotInitialized, Error::NotInitialized) => true,
            (Error::CapacityExhausted(c1), Error::CapacityExhausted(c2)) => c1 == c2,
            (Error::OpenFailure(e1, s1), Error::OpenFailure(e2, s2)) => e1 == e2 && s1 == s2,
            (Error::HardeningFailure(e1), Error::HardeningFailure(e2)) => e1 == e2,
            (Error::Misuse(m1), Error::Misuse(m2)) => m1 == m2,
            (Error::SqliteFailure(e1), Error::SqliteFailure(e2)) => e1 == e2,
            (Error::InvalidColumnIndex(i1), Error::InvalidColumnIndex(i2)) => i1 == i2,
            (Error::NulError(e1), Error::NulError(e2)) => e1 == e2,
            (Error::InvalidTextLength(l1), Error::InvalidTextLength(l2)) => l1 == l2,
            (..) => false,
        }
    }
}

impl From<NulError> for Error {
    #[cold]
    fn from(err: NulError) -> Error {
        Error::NulError(err)
    }
}

impl From<Misuse> for Error {
    #[cold]
    fn from(misuse: Misuse) -> Error {
        Error::Misuse(misuse)
    }
}

impl fmt::Display for Misuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Misuse::InvalidHandle(h) => write!(f, "invalid connection handle {}", h),
            Misuse::Closed(h) => write!(f, "connection handle {} is closed", h),
            Misuse::StatementActive => write!(f, "a statement is already active"),
            Misuse::NoActiveStatement => write!(f, "no active statement"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::SqliteSingleThreadedMode => write!(
                f,
                "SQLite was compiled or configured for single-threaded use only"
            ),
            Error::NotInitialized => write!(f, "connection registry is not initialized"),
            Error::CapacityExhausted(cap) => {
                write!(f, "connection registry is full ({} handles)", cap)
            }
            Error::OpenFailure(ref err, None) => err.fmt(f),
            Error::OpenFailure(_, Some(ref s)) => write!(f, "{}", s),
            Error::HardeningFailure(ref err) => {
                write!(f, "unable to enable defensive mode: {}", err)
            }
            Error::Misuse(ref m) => write!(f, "API misuse: {}", m),
            Error::SqliteFailure(ref err) => err.fmt(f),
            Error::InvalidColumnIndex(i) => write!(f, "Invalid column index: {}", i),
            Error::NulError(ref err) => err.fmt(f),
            Error::InvalidTextLength(len) => write!(f, "text of {} bytes is too long", len),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::OpenFailure(ref err, _)
            | Error::HardeningFailure(ref err)
            | Error::SqliteFailure(ref err) => Some(err),
            Error::NulError(ref err) => Some(err),

            Error::SqliteSingleThreadedMode
            | Error::NotInitialized
            | Error::CapacityExhausted(_)
            | Error::Misuse(_)
            | Error::InvalidColumnIndex(_)
            | Error::InvalidTextLength(_) => None,
        }
    }
}

// These are public but not re-exported by lib.rs, so only visible within crate.

#[inline]
pub fn error_from_sqlite_code(code: c_int) -> Error {
    Error::SqliteFailure(ffi::Error::new(code))
}

/// Turns a native status into `Ok(())` for `SQLITE_OK` and a
/// [`Error::SqliteFailure`] otherwise.
#[inline]
pub fn decode_result(code: c_int) -> crate::Result<()> {
    if code == ffi::SQLITE_OK {
        Ok(())
    } else {
        Err(error_from_sqlite_code(code))
    }
}
