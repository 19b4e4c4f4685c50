// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use crate::error::Result;
use crate::pkcs11::*;

/// Largest hash output of the supported algorithms
pub const MAX_HASH_SIZE: usize = 64;

/// Largest HMAC key CCA accepts, in bits
pub const MAX_HMAC_KEY_BITS: usize = 2048;

#[derive(Debug)]
pub struct HashBasedOp {
    pub hash: CK_MECHANISM_TYPE,
    pub mac: CK_MECHANISM_TYPE,
    pub mac_general: CK_MECHANISM_TYPE,
    pub mgf: CK_RSA_PKCS_MGF_TYPE,
    /// CCA rule array keyword selecting the algorithm
    pub keyword: &'static str,
    pub hash_size: usize,
    pub block_size: usize,
    pub min_hmac_key_bits: usize,
}

pub static HASH_MECH_SET: [HashBasedOp; 5] = [
    HashBasedOp {
        hash: CKM_SHA_1,
        mac: CKM_SHA_1_HMAC,
        mac_general: CKM_SHA_1_HMAC_GENERAL,
        mgf: CKG_MGF1_SHA1,
        keyword: "SHA-1",
        hash_size: 20,
        block_size: 64,
        min_hmac_key_bits: 80,
    },
    HashBasedOp {
        hash: CKM_SHA224,
        mac: CKM_SHA224_HMAC,
        mac_general: CKM_SHA224_HMAC_GENERAL,
        mgf: CKG_MGF1_SHA224,
        keyword: "SHA-224",
        hash_size: 28,
        block_size: 64,
        min_hmac_key_bits: 112,
    },
    HashBasedOp {
        hash: CKM_SHA256,
        mac: CKM_SHA256_HMAC,
        mac_general: CKM_SHA256_HMAC_GENERAL,
        mgf: CKG_MGF1_SHA256,
        keyword: "SHA-256",
        hash_size: 32,
        block_size: 64,
        min_hmac_key_bits: 128,
    },
    HashBasedOp {
        hash: CKM_SHA384,
        mac: CKM_SHA384_HMAC,
        mac_general: CKM_SHA384_HMAC_GENERAL,
        mgf: CKG_MGF1_SHA384,
        keyword: "SHA-384",
        hash_size: 48,
        block_size: 128,
        min_hmac_key_bits: 192,
    },
    HashBasedOp {
        hash: CKM_SHA512,
        mac: CKM_SHA512_HMAC,
        mac_general: CKM_SHA512_HMAC_GENERAL,
        mgf: CKG_MGF1_SHA512,
        keyword: "SHA-512",
        hash_size: 64,
        block_size: 128,
        min_hmac_key_bits: 256,
    },
];

/// Looks up a digest mechanism
pub fn hash_op(hash: CK_MECHANISM_TYPE) -> Result<&'static HashBasedOp> {
    match HASH_MECH_SET.iter().find(|hs| hs.hash == hash) {
        Some(hs) => Ok(hs),
        None => Err(CKR_MECHANISM_INVALID)?,
    }
}

/// Looks up an HMAC mechanism, the flag is true for the _GENERAL
/// variants that carry an explicit output length
pub fn hmac_op(mac: CK_MECHANISM_TYPE) -> Result<(&'static HashBasedOp, bool)> {
    for hs in &HASH_MECH_SET {
        if hs.mac == mac {
            return Ok((hs, false));
        }
        if hs.mac_general == mac {
            return Ok((hs, true));
        }
    }
    Err(CKR_MECHANISM_INVALID)?
}

/// Checks that a mask generation function is MGF1 over `hash`
pub fn mgf_matches(hash: CK_MECHANISM_TYPE, mgf: CK_RSA_PKCS_MGF_TYPE) -> bool {
    match hash_op(hash) {
        Ok(hs) => hs.mgf == mgf,
        Err(_) => false,
    }
}
