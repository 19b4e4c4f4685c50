// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! Key value structures for the PKA key token build verb
//!
//! These are the clear inputs CSNDPKB turns into skeleton, external or
//! clear private key tokens. All length fields are big endian 16 bit
//! integers. Buffers that may hold private key material are returned as
//! [Zeroizing] vectors.

use crate::curves::CurveDescriptor;
use crate::error::{Error, Result};
use crate::misc::{put_be16, trim_leading_zeros};
use crate::pkcs11::*;

use zeroize::Zeroizing;

/// Maximum size CSNDPKB accepts for a key value structure
pub const KEY_VALUE_STRUCT_SIZE: usize = 2500;

/* RSA generate and public structures */
pub const RSA_MOD_BITS_OFFSET: usize = 0;
pub const RSA_MOD_LEN_OFFSET: usize = 2;
pub const RSA_E_LEN_OFFSET: usize = 4;
pub const RSA_GEN_E_OFFSET: usize = 18;
pub const RSA_PUB_N_OFFSET: usize = 8;

/* RSA CRT structure, lengths of p, q, dp, dq and u follow e */
pub const RSA_CRT_P_LEN_OFFSET: usize = 8;
pub const RSA_CRT_DATA_OFFSET: usize = 18;

/* EC structures */
pub const EC_CURVE_TYPE_OFFSET: usize = 0;
pub const EC_BITS_OFFSET: usize = 2;
pub const EC_PAIR_D_LEN_OFFSET: usize = 4;
pub const EC_PAIR_Q_LEN_OFFSET: usize = 6;
pub const EC_PAIR_HDR_LEN: usize = 8;
pub const EC_PUBL_Q_LEN_OFFSET: usize = 4;
pub const EC_PUBL_HDR_LEN: usize = 6;

/* Point format markers */
pub const POINT_UNCOMPRESSED: u8 = 0x04;
pub const POINT_HYBRID: u8 = 0x06;
pub const POINT_HYBRID_ODD: u8 = 0x07;

/// RSA moduli above this size cannot have their exponent picked by CCA
pub const MAX_AUTO_EXPONENT_BITS: usize = 2048;

fn new_kvs(len: usize) -> Result<Zeroizing<Vec<u8>>> {
    if len > KEY_VALUE_STRUCT_SIZE {
        return Err(CKR_KEY_SIZE_RANGE)?;
    }
    Ok(Zeroizing::new(vec![0u8; len]))
}

/// Validates a requested RSA public exponent
///
/// Returns the exponent with leading zeros removed, an empty slice
/// stands for "let the HSM choose". Only 0, 3 and 65537 are accepted.
pub fn check_public_exponent(e: &[u8]) -> Result<&[u8]> {
    let trimmed = trim_leading_zeros(e);
    match trimmed {
        [] | [0x03] | [0x01, 0x00, 0x01] => Ok(trimmed),
        _ => Err(CKR_TEMPLATE_INCONSISTENT)?,
    }
}

/// Structure for an RSA key pair generation request
pub fn rsa_generate_kvs(
    mod_bits: usize,
    exponent: Option<&[u8]>,
) -> Result<Zeroizing<Vec<u8>>> {
    let e = match exponent {
        Some(e) => check_public_exponent(e)?,
        None => &[],
    };
    if e.is_empty() && mod_bits > MAX_AUTO_EXPONENT_BITS {
        return Err(CKR_TEMPLATE_INCONSISTENT)?;
    }
    let mut kvs = new_kvs(RSA_GEN_E_OFFSET + e.len())?;
    put_be16(&mut kvs, RSA_MOD_BITS_OFFSET, mod_bits)?;
    put_be16(&mut kvs, RSA_E_LEN_OFFSET, e.len())?;
    kvs[RSA_GEN_E_OFFSET..].copy_from_slice(e);
    Ok(kvs)
}

/// The clear components of an RSA private key in CRT form
#[derive(Debug)]
pub struct RsaCrtKey<'a> {
    pub modulus: &'a [u8],
    pub public_exponent: &'a [u8],
    pub prime_1: &'a [u8],
    pub prime_2: &'a [u8],
    pub exponent_1: &'a [u8],
    pub exponent_2: &'a [u8],
    pub coefficient: &'a [u8],
}

impl RsaCrtKey<'_> {
    fn private_parts(&self) -> [&[u8]; 5] {
        [
            self.prime_1,
            self.prime_2,
            self.exponent_1,
            self.exponent_2,
            self.coefficient,
        ]
    }
}

/// Structure for importing a clear RSA private key in CRT form
pub fn rsa_crt_kvs(key: &RsaCrtKey) -> Result<Zeroizing<Vec<u8>>> {
    let parts = key.private_parts();
    let total = key.modulus.len()
        + key.public_exponent.len()
        + parts.iter().map(|p| p.len()).sum::<usize>();
    let mut kvs = new_kvs(RSA_CRT_DATA_OFFSET + total)?;

    put_be16(&mut kvs, RSA_MOD_BITS_OFFSET, key.modulus.len() * 8)?;
    put_be16(&mut kvs, RSA_MOD_LEN_OFFSET, key.modulus.len())?;
    put_be16(&mut kvs, RSA_E_LEN_OFFSET, key.public_exponent.len())?;
    for (i, p) in parts.iter().enumerate() {
        put_be16(&mut kvs, RSA_CRT_P_LEN_OFFSET + 2 * i, p.len())?;
    }

    let mut offset = RSA_CRT_DATA_OFFSET;
    for field in [key.modulus, key.public_exponent]
        .iter()
        .chain(parts.iter())
    {
        kvs[offset..offset + field.len()].copy_from_slice(field);
        offset += field.len();
    }
    Ok(kvs)
}

/// Structure for an external RSA public key token
///
/// A `mod_bits` of 0 means the size is derived from the modulus.
pub fn rsa_public_kvs(
    mod_bits: usize,
    modulus: &[u8],
    exponent: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let bits = match mod_bits {
        0 => modulus.len() * 8,
        b => b,
    };
    let mut kvs =
        new_kvs(RSA_PUB_N_OFFSET + modulus.len() + exponent.len())?;
    put_be16(&mut kvs, RSA_MOD_BITS_OFFSET, bits)?;
    put_be16(&mut kvs, RSA_MOD_LEN_OFFSET, modulus.len())?;
    put_be16(&mut kvs, RSA_E_LEN_OFFSET, exponent.len())?;
    let e_off = RSA_PUB_N_OFFSET + modulus.len();
    kvs[RSA_PUB_N_OFFSET..e_off].copy_from_slice(modulus);
    kvs[e_off..].copy_from_slice(exponent);
    Ok(kvs)
}

fn ec_header(kvs: &mut [u8], curve: &CurveDescriptor) -> Result<()> {
    kvs[EC_CURVE_TYPE_OFFSET] = curve.cca_type();
    put_be16(kvs, EC_BITS_OFFSET, curve.bits)
}

/// Structure for an EC key pair generation request
pub fn ec_generate_kvs(curve: &CurveDescriptor) -> Result<Zeroizing<Vec<u8>>> {
    let mut kvs = new_kvs(EC_PAIR_HDR_LEN)?;
    ec_header(&mut kvs, curve)?;
    Ok(kvs)
}

/// Normalizes a public point against the expected coordinate length
///
/// A point of `2 * coord_len + 1` bytes must start with an uncompressed
/// or hybrid marker, a point of exactly `2 * coord_len` bytes gets the
/// uncompressed marker prepended. Compressed points are rejected.
fn point_with_marker(point: &[u8], coord_len: usize) -> Result<Vec<u8>> {
    if point.len() == 2 * coord_len + 1 {
        match point[0] {
            POINT_UNCOMPRESSED | POINT_HYBRID | POINT_HYBRID_ODD => {
                Ok(point.to_vec())
            }
            _ => Err(Error::ck_rv_with_errmsg(
                CKR_TEMPLATE_INCONSISTENT,
                "unsupported EC point format".to_string(),
            )),
        }
    } else if point.len() == 2 * coord_len {
        let mut q = Vec::with_capacity(point.len() + 1);
        q.push(POINT_UNCOMPRESSED);
        q.extend_from_slice(point);
        Ok(q)
    } else {
        Err(Error::ck_rv_with_errmsg(
            CKR_TEMPLATE_INCONSISTENT,
            format!("unsupported EC point length {}", point.len()),
        ))
    }
}

/// Structure for importing a clear EC private key
///
/// The expected point size is derived from the private scalar length.
pub fn ec_private_kvs(
    curve: &CurveDescriptor,
    private: &[u8],
    point: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let q = point_with_marker(point, private.len())?;
    let mut kvs = new_kvs(EC_PAIR_HDR_LEN + private.len() + q.len())?;
    ec_header(&mut kvs, curve)?;
    put_be16(&mut kvs, EC_PAIR_D_LEN_OFFSET, private.len())?;
    put_be16(&mut kvs, EC_PAIR_Q_LEN_OFFSET, q.len())?;
    let q_off = EC_PAIR_HDR_LEN + private.len();
    kvs[EC_PAIR_HDR_LEN..q_off].copy_from_slice(private);
    kvs[q_off..].copy_from_slice(&q);
    Ok(kvs)
}

/// Structure for an external EC public key token
pub fn ec_public_kvs(
    curve: &CurveDescriptor,
    point: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    let q = point_with_marker(point, curve.coordinate_len())?;
    let mut kvs = new_kvs(EC_PUBL_HDR_LEN + q.len())?;
    ec_header(&mut kvs, curve)?;
    put_be16(&mut kvs, EC_PUBL_Q_LEN_OFFSET, q.len())?;
    kvs[EC_PUBL_HDR_LEN..].copy_from_slice(&q);
    Ok(kvs)
}
