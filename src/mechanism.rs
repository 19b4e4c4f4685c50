// Copyright 2023 Simo Sorce
// See LICENSE.txt file for terms

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::err_rv;
use crate::error::Result;
use crate::hash;
use crate::pkcs11::*;

use once_cell::sync::Lazy;

/// Mechanism parameters in a safe Rust representation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MechParams {
    /// No parameters
    None,
    /// Output length of the _GENERAL MAC mechanisms
    MacLength(CK_ULONG),
    /// CK_RSA_PKCS_OAEP_PARAMS
    Oaep {
        /// Digest applied to the label
        hash: CK_MECHANISM_TYPE,
        /// Mask generation function
        mgf: CK_RSA_PKCS_MGF_TYPE,
        /// Source of the label
        source: CK_RSA_PKCS_OAEP_SOURCE_TYPE,
        /// The label, must be empty
        source_data: Vec<u8>,
    },
    /// CK_RSA_PKCS_PSS_PARAMS
    Pss {
        /// Digest of the message
        hash: CK_MECHANISM_TYPE,
        /// Mask generation function
        mgf: CK_RSA_PKCS_MGF_TYPE,
        /// Salt length in bytes
        salt_len: CK_ULONG,
    },
    /// Initialization vector
    Iv(Vec<u8>),
}

/// A mechanism with its parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CkMechanism {
    /// The mechanism type
    pub mechanism: CK_MECHANISM_TYPE,
    /// Its parameters
    pub params: MechParams,
}

impl CkMechanism {
    /// A mechanism without parameters
    pub fn new(mechanism: CK_MECHANISM_TYPE) -> CkMechanism {
        CkMechanism {
            mechanism: mechanism,
            params: MechParams::None,
        }
    }

    /// A mechanism with parameters
    pub fn with_params(
        mechanism: CK_MECHANISM_TYPE,
        params: MechParams,
    ) -> CkMechanism {
        CkMechanism {
            mechanism: mechanism,
            params: params,
        }
    }
}

/// A registered mechanism
pub trait Mechanism: Debug + Send + Sync {
    /// Key sizes and flags
    fn info(&self) -> &CK_MECHANISM_INFO;
}

#[derive(Debug)]
struct CcaMechanism {
    info: CK_MECHANISM_INFO,
}

impl Mechanism for CcaMechanism {
    fn info(&self) -> &CK_MECHANISM_INFO {
        &self.info
    }
}

/// Registry of the mechanisms this token implements
#[derive(Debug)]
pub struct Mechanisms {
    tree: BTreeMap<CK_MECHANISM_TYPE, Box<dyn Mechanism>>,
}

impl Mechanisms {
    /// Empty registry
    pub fn new() -> Mechanisms {
        Mechanisms {
            tree: BTreeMap::new(),
        }
    }

    /// Registers or replaces a mechanism
    pub fn add_mechanism(
        &mut self,
        typ: CK_MECHANISM_TYPE,
        info: Box<dyn Mechanism>,
    ) {
        self.tree.insert(typ, info);
    }

    /// Number of registered mechanisms
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Registered mechanism types, in ascending order
    pub fn list(&self) -> Vec<CK_MECHANISM_TYPE> {
        self.tree.keys().cloned().collect()
    }

    /// Info of a registered mechanism
    pub fn info(&self, typ: CK_MECHANISM_TYPE) -> Result<&CK_MECHANISM_INFO> {
        match self.tree.get(&typ) {
            Some(m) => Ok(m.info()),
            None => err_rv!(CKR_MECHANISM_INVALID),
        }
    }

    fn add(
        &mut self,
        typs: &[CK_MECHANISM_TYPE],
        min: usize,
        max: usize,
        flags: CK_FLAGS,
    ) {
        for typ in typs {
            self.add_mechanism(
                *typ,
                Box::new(CcaMechanism {
                    info: CK_MECHANISM_INFO {
                        ulMinKeySize: min as CK_ULONG,
                        ulMaxKeySize: max as CK_ULONG,
                        flags: flags,
                    },
                }),
            );
        }
    }
}

const RSA_MIN_BITS: usize = 512;
const RSA_MAX_BITS: usize = 4096;
const EC_MIN_BITS: usize = 160;
const EC_MAX_BITS: usize = 521;
const EC_FLAGS: CK_FLAGS = CKF_HW | CKF_EC_NAMEDCURVE | CKF_EC_F_P;

fn register_mechanisms(mechs: &mut Mechanisms) {
    mechs.add(&[CKM_DES_KEY_GEN], 8, 8, CKF_HW | CKF_GENERATE);
    mechs.add(&[CKM_DES3_KEY_GEN], 24, 24, CKF_HW | CKF_GENERATE);
    mechs.add(
        &[CKM_RSA_PKCS_KEY_PAIR_GEN, CKM_RSA_X9_31_KEY_PAIR_GEN],
        RSA_MIN_BITS,
        RSA_MAX_BITS,
        CKF_HW | CKF_GENERATE_KEY_PAIR,
    );
    mechs.add(
        &[CKM_RSA_PKCS],
        RSA_MIN_BITS,
        RSA_MAX_BITS,
        CKF_HW
            | CKF_ENCRYPT
            | CKF_DECRYPT
            | CKF_SIGN
            | CKF_VERIFY
            | CKF_WRAP
            | CKF_UNWRAP,
    );
    mechs.add(
        &[
            CKM_SHA1_RSA_PKCS,
            CKM_SHA224_RSA_PKCS,
            CKM_SHA256_RSA_PKCS,
            CKM_SHA384_RSA_PKCS,
            CKM_SHA512_RSA_PKCS,
            CKM_RSA_PKCS_PSS,
            CKM_SHA1_RSA_PKCS_PSS,
            CKM_SHA224_RSA_PKCS_PSS,
            CKM_SHA256_RSA_PKCS_PSS,
            CKM_SHA384_RSA_PKCS_PSS,
            CKM_SHA512_RSA_PKCS_PSS,
        ],
        RSA_MIN_BITS,
        RSA_MAX_BITS,
        CKF_HW | CKF_SIGN | CKF_VERIFY,
    );
    mechs.add(
        &[CKM_RSA_PKCS_OAEP],
        RSA_MIN_BITS,
        RSA_MAX_BITS,
        CKF_HW | CKF_ENCRYPT | CKF_DECRYPT | CKF_WRAP | CKF_UNWRAP,
    );
    mechs.add(
        &[CKM_DES_CBC, CKM_DES_CBC_PAD],
        8,
        8,
        CKF_HW | CKF_ENCRYPT | CKF_DECRYPT,
    );
    mechs.add(
        &[CKM_DES3_CBC, CKM_DES3_CBC_PAD],
        24,
        24,
        CKF_HW | CKF_ENCRYPT | CKF_DECRYPT,
    );
    mechs.add(&[CKM_AES_KEY_GEN], 16, 32, CKF_HW | CKF_GENERATE);
    mechs.add(
        &[CKM_AES_ECB, CKM_AES_CBC, CKM_AES_CBC_PAD],
        16,
        32,
        CKF_HW | CKF_ENCRYPT | CKF_DECRYPT,
    );
    for hs in &hash::HASH_MECH_SET {
        mechs.add(&[hs.hash], 0, 0, CKF_HW | CKF_DIGEST);
        mechs.add(
            &[hs.mac, hs.mac_general],
            hs.min_hmac_key_bits,
            hash::MAX_HMAC_KEY_BITS,
            CKF_SIGN | CKF_VERIFY,
        );
    }
    mechs.add(
        &[CKM_EC_KEY_PAIR_GEN],
        EC_MIN_BITS,
        EC_MAX_BITS,
        EC_FLAGS | CKF_GENERATE_KEY_PAIR,
    );
    mechs.add(
        &[
            CKM_ECDSA,
            CKM_ECDSA_SHA1,
            CKM_ECDSA_SHA224,
            CKM_ECDSA_SHA256,
            CKM_ECDSA_SHA384,
            CKM_ECDSA_SHA512,
        ],
        EC_MIN_BITS,
        EC_MAX_BITS,
        EC_FLAGS | CKF_SIGN | CKF_VERIFY,
    );
    mechs.add(&[CKM_GENERIC_SECRET_KEY_GEN], 80, 2048, CKF_HW | CKF_GENERATE);
}

/// Mechanisms this token can serve, built once and never modified
pub static MECHANISMS: Lazy<Mechanisms> = Lazy::new(|| {
    let mut mechs = Mechanisms::new();
    register_mechanisms(&mut mechs);
    mechs
});
