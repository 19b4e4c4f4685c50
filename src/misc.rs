// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use crate::error::{Error, Result};
use crate::pkcs11::*;

use zeroize::Zeroizing;

/// Maps a foreign error to the given PKCS#11 return value
#[macro_export]
macro_rules! map_err {
    ($map:expr, $err:tt) => {{
        $map.map_err(|e| $crate::error::Error::ck_rv_from_error($err, e))
    }};
}

/// Logs at error level when the `log` feature is enabled
#[macro_export]
macro_rules! trace_error {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        ::log::error!($($arg)+);
    }};
}

/// Logs at warn level when the `log` feature is enabled
#[macro_export]
macro_rules! trace_warn {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        ::log::warn!($($arg)+);
    }};
}

/// Logs at debug level when the `log` feature is enabled
#[macro_export]
macro_rules! trace_debug {
    ($($arg:tt)+) => {{
        #[cfg(feature = "log")]
        ::log::debug!($($arg)+);
    }};
}

/// Reads a big endian 16 bit field, `None` if it would overrun `buf`
pub fn get_be16(buf: &[u8], offset: usize) -> Option<usize> {
    let end = offset.checked_add(2)?;
    let b = buf.get(offset..end)?;
    Some(usize::from(u16::from_be_bytes([b[0], b[1]])))
}

pub fn get_u8(buf: &[u8], offset: usize) -> Option<u8> {
    buf.get(offset).copied()
}

/// Returns `len` bytes at `offset`, `None` if they are not all there
pub fn get_slice(buf: &[u8], offset: usize, len: usize) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    buf.get(offset..end)
}

pub fn put_be16(buf: &mut [u8], offset: usize, val: usize) -> Result<()> {
    let v = u16::try_from(val).map_err(|_| Error::ck_rv(CKR_KEY_SIZE_RANGE))?;
    match buf.get_mut(offset..offset + 2) {
        Some(b) => {
            b.copy_from_slice(&v.to_be_bytes());
            Ok(())
        }
        None => Err(CKR_KEY_SIZE_RANGE)?,
    }
}

/// Copies `data` into `output` or reports how large `output` needs to be
pub fn copy_out(data: &[u8], output: &mut [u8]) -> Result<usize> {
    if output.len() < data.len() {
        return Err(Error::buffer_too_small(data.len()));
    }
    output[..data.len()].copy_from_slice(data);
    Ok(data.len())
}

/// Runs `op` directly on `output` if it can hold `expected` bytes,
/// otherwise on a scratch buffer of that size whose result is then
/// copied back. The scratch buffer is wiped when done.
pub fn with_staging<F>(
    output: &mut [u8],
    expected: usize,
    op: F,
) -> Result<usize>
where
    F: FnOnce(&mut [u8]) -> Result<usize>,
{
    if output.len() >= expected {
        return op(output);
    }
    let mut scratch = Zeroizing::new(vec![0u8; expected]);
    let len = op(scratch.as_mut_slice())?;
    copy_out(&scratch[..len], output)
}

pub fn ulong_to_bytes(val: CK_ULONG) -> Vec<u8> {
    val.to_ne_bytes().to_vec()
}

pub fn bytes_to_ulong(val: &[u8]) -> Result<CK_ULONG> {
    match <[u8; std::mem::size_of::<CK_ULONG>()]>::try_from(val) {
        Ok(b) => Ok(CK_ULONG::from_ne_bytes(b)),
        Err(_) => Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
    }
}

/// Strips leading zero bytes from a big endian integer
pub fn trim_leading_zeros(val: &[u8]) -> &[u8] {
    let start = val.iter().position(|b| *b != 0).unwrap_or(val.len());
    &val[start..]
}
