// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use std::error;
use std::fmt;

use crate::hsm::HsmStatus;
use crate::pkcs11::*;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Error carried by every fallible operation
///
/// Each error maps to the PKCS#11 return value reported by [Error::rv].
#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    origin: Option<Box<dyn error::Error>>,
    errmsg: Option<String>,
    ckrv: CK_RV,
    needed: usize,
    status: Option<HsmStatus>,
}

/// Broad classification of an [Error]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum ErrorKind {
    /// A Cryptoki-style error, see the ckrv field
    CkError,
    /// A key token failed classification or field extraction
    MalformedToken,
    /// Output buffer too small, see [Error::required_size]
    BufferTooSmall,
    /// The HSM returned a failure, see [Error::hsm_status]
    Hsm,
    /// Other error, see origin
    Nested,
}

impl Error {
    fn build(kind: ErrorKind, ckrv: CK_RV) -> Error {
        Error {
            kind: kind,
            origin: None,
            errmsg: None,
            ckrv: ckrv,
            needed: 0,
            status: None,
        }
    }

    /// Plain PKCS#11 error
    pub fn ck_rv(ckrv: CK_RV) -> Error {
        Error::build(ErrorKind::CkError, ckrv)
    }

    /// PKCS#11 error caused by another error
    pub fn ck_rv_from_error<E>(ckrv: CK_RV, error: E) -> Error
    where
        E: Into<Box<dyn error::Error>>,
    {
        let mut e = Error::build(ErrorKind::CkError, ckrv);
        e.origin = Some(error.into());
        e
    }

    /// PKCS#11 error with a message
    pub fn ck_rv_with_errmsg(ckrv: CK_RV, errmsg: String) -> Error {
        let mut e = Error::build(ErrorKind::CkError, ckrv);
        e.errmsg = Some(errmsg);
        e
    }

    /// A token did not classify, or one of its sections did not carry
    /// the expected marker
    pub fn malformed_token(errmsg: &str) -> Error {
        let mut e = Error::build(
            ErrorKind::MalformedToken,
            CKR_ATTRIBUTE_VALUE_INVALID,
        );
        e.errmsg = Some(errmsg.to_string());
        e
    }

    /// The caller buffer cannot hold the result, `needed` is the size
    /// that would be required
    pub fn buffer_too_small(needed: usize) -> Error {
        let mut e =
            Error::build(ErrorKind::BufferTooSmall, CKR_BUFFER_TOO_SMALL);
        e.needed = needed;
        e
    }

    /// A failed HSM verb, the vendor status is kept for diagnostics only
    pub fn hsm(ckrv: CK_RV, status: HsmStatus) -> Error {
        let mut e = Error::build(ErrorKind::Hsm, ckrv);
        e.status = Some(status);
        e
    }

    /// Wraps a foreign error as CKR_GENERAL_ERROR
    pub fn other_error<E>(error: E) -> Error
    where
        E: Into<Box<dyn error::Error>>,
    {
        let mut e = Error::build(ErrorKind::Nested, CKR_GENERAL_ERROR);
        e.origin = Some(error.into());
        e
    }

    /// Kind of the error
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The PKCS#11 return value
    pub fn rv(&self) -> CK_RV {
        self.ckrv
    }

    /// Size the output buffer needs, for buffer too small errors
    pub fn required_size(&self) -> Option<usize> {
        match self.kind {
            ErrorKind::BufferTooSmall => Some(self.needed),
            _ => None,
        }
    }

    /// Return and reason code of a failed HSM verb
    pub fn hsm_status(&self) -> Option<HsmStatus> {
        self.status
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            ErrorKind::CkError => match self.errmsg {
                Some(ref e) => write!(f, "{}", e),
                None => match self.origin {
                    Some(ref o) => write!(f, "{:#x}: {}", self.ckrv, o),
                    None => write!(f, "{:#x}", self.ckrv),
                },
            },
            ErrorKind::MalformedToken => match self.errmsg {
                Some(ref e) => write!(f, "malformed key token: {}", e),
                None => write!(f, "malformed key token"),
            },
            ErrorKind::BufferTooSmall => {
                write!(f, "buffer too small, {} bytes required", self.needed)
            }
            ErrorKind::Hsm => match self.status {
                Some(s) => write!(f, "{:#x}: HSM failure {}", self.ckrv, s),
                None => write!(f, "{:#x}: HSM failure", self.ckrv),
            },
            ErrorKind::Nested => match self.origin {
                Some(ref o) => o.fmt(f),
                None => write!(f, "{:#x}", self.ckrv),
            },
        }
    }
}

impl error::Error for Error {}

impl From<CK_RV> for Error {
    fn from(error: CK_RV) -> Error {
        Error::ck_rv(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Error {
        Error::other_error(error)
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(error: std::num::TryFromIntError) -> Error {
        Error::other_error(error)
    }
}

impl From<asn1::WriteError> for Error {
    fn from(_: asn1::WriteError) -> Error {
        Error::ck_rv(CKR_GENERAL_ERROR)
    }
}

impl From<asn1::ParseError> for Error {
    fn from(_: asn1::ParseError) -> Error {
        Error::ck_rv(CKR_ATTRIBUTE_VALUE_INVALID)
    }
}

/// Shorthand for `Err(Error::ck_rv(...))`
#[macro_export]
macro_rules! err_rv {
    ($ck_err:expr) => {
        Err($crate::error::Error::ck_rv($ck_err))
    };
}
