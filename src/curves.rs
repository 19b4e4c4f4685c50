// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! Elliptic curves known to CCA
//!
//! CCA identifies a curve by a curve type byte (the family) and the
//! prime bit length, PKCS#11 by the DER encoding of its OID in
//! CKA_EC_PARAMS.

use crate::error::Result;
use crate::pkcs11::*;

/// Curve family, CCA calls it the curve type
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CurveFamily {
    /// NIST prime curves
    Prime,
    /// Brainpool curves
    Brainpool,
    /// Edwards curves
    Edwards,
}

impl CurveFamily {
    /// Curve type byte used in key tokens and skeletons
    pub fn cca_type(&self) -> u8 {
        match self {
            CurveFamily::Prime => 0x00,
            CurveFamily::Brainpool => 0x01,
            CurveFamily::Edwards => 0x02,
        }
    }
}

/// A curve known to CCA
#[derive(Debug)]
pub struct CurveDescriptor {
    /// Family the curve belongs to
    pub family: CurveFamily,
    /// Prime bit length
    pub bits: usize,
    /// OpenSSL style short name
    pub name: &'static str,
    /// Object identifier, DER encoded in CKA_EC_PARAMS
    pub oid: asn1::ObjectIdentifier,
}

impl CurveDescriptor {
    /// Curve type byte of the family
    pub fn cca_type(&self) -> u8 {
        self.family.cca_type()
    }

    /// DER encoding suitable for CKA_EC_PARAMS
    pub fn ec_params(&self) -> Result<Vec<u8>> {
        Ok(asn1::write_single(&self.oid)?)
    }

    /// Length of one point coordinate or of the private scalar
    pub fn coordinate_len(&self) -> usize {
        (self.bits + 7) / 8
    }

    /// Only the non twisted prime and brainpool curves can be
    /// generated or imported
    pub fn is_importable(&self) -> bool {
        self.family != CurveFamily::Edwards
    }
}

macro_rules! curve {
    ($family:ident, $bits:expr, $name:expr, $($arc:tt),+) => {
        CurveDescriptor {
            family: CurveFamily::$family,
            bits: $bits,
            name: $name,
            oid: asn1::oid!($($arc),+),
        }
    };
}

/// All the curves CCA can handle
pub static CURVES: [CurveDescriptor; 14] = [
    curve!(Prime, 192, "prime192v1", 1, 2, 840, 10045, 3, 1, 1),
    curve!(Prime, 224, "secp224r1", 1, 3, 132, 0, 33),
    curve!(Prime, 256, "prime256v1", 1, 2, 840, 10045, 3, 1, 7),
    curve!(Prime, 384, "secp384r1", 1, 3, 132, 0, 34),
    curve!(Prime, 521, "secp521r1", 1, 3, 132, 0, 35),
    curve!(Brainpool, 160, "brainpoolP160r1", 1, 3, 36, 3, 3, 2, 8, 1, 1, 1),
    curve!(Brainpool, 192, "brainpoolP192r1", 1, 3, 36, 3, 3, 2, 8, 1, 1, 3),
    curve!(Brainpool, 224, "brainpoolP224r1", 1, 3, 36, 3, 3, 2, 8, 1, 1, 5),
    curve!(Brainpool, 256, "brainpoolP256r1", 1, 3, 36, 3, 3, 2, 8, 1, 1, 7),
    curve!(Brainpool, 320, "brainpoolP320r1", 1, 3, 36, 3, 3, 2, 8, 1, 1, 9),
    curve!(Brainpool, 384, "brainpoolP384r1", 1, 3, 36, 3, 3, 2, 8, 1, 1, 11),
    curve!(Brainpool, 512, "brainpoolP512r1", 1, 3, 36, 3, 3, 2, 8, 1, 1, 13),
    curve!(Edwards, 255, "ed25519", 1, 3, 101, 112),
    curve!(Edwards, 448, "ed448", 1, 3, 101, 113),
];

/// Maps the curve type and bit length found in a CCA token back to a
/// curve, CKR_ATTRIBUTE_VALUE_INVALID if CCA reports an unknown one
pub fn curve_by_type_and_bits(
    cca_type: u8,
    bits: usize,
) -> Result<&'static CurveDescriptor> {
    match CURVES
        .iter()
        .find(|c| c.cca_type() == cca_type && c.bits == bits)
    {
        Some(c) => Ok(c),
        None => Err(CKR_ATTRIBUTE_VALUE_INVALID)?,
    }
}

/// Finds the curve named by a CKA_EC_PARAMS value
pub fn curve_by_params(params: &[u8]) -> Result<&'static CurveDescriptor> {
    let oid = match asn1::parse_single::<asn1::ObjectIdentifier>(params) {
        Ok(o) => o,
        Err(_) => return Err(CKR_CURVE_NOT_SUPPORTED)?,
    };
    match CURVES.iter().find(|c| c.oid == oid) {
        Some(c) => Ok(c),
        None => Err(CKR_CURVE_NOT_SUPPORTED)?,
    }
}

/// Like [curve_by_params] but restricted to curves CCA can generate
/// and import keys for
pub fn importable_curve(params: &[u8]) -> Result<&'static CurveDescriptor> {
    let curve = curve_by_params(params)?;
    if !curve.is_importable() {
        return Err(CKR_CURVE_NOT_SUPPORTED)?;
    }
    Ok(curve)
}

/// DER OCTET STRING wrapping of an EC point for CKA_EC_POINT
pub fn encode_ec_point(point: &[u8]) -> Result<Vec<u8>> {
    Ok(asn1::write_single(&point)?)
}
