// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

use std::sync::Arc;

use crate::digest::DigestOperation;
use crate::error::Result;
use crate::hash;
use crate::hsm::HsmClient;
use crate::pkcs11::*;

use constant_time_eq::constant_time_eq;
use zeroize::Zeroizing;

/* HMAC as defined in FIPS 198-1, over HSM computed digests */

/// HMAC over a clear key, for coprocessors without the HMAC verbs
#[derive(Debug)]
pub struct SoftHmac {
    hsm: Arc<dyn HsmClient>,
    hash: CK_MECHANISM_TYPE,
    hashlen: usize,
    opad: Zeroizing<Vec<u8>>,
    inner: DigestOperation,
    finalized: bool,
}

impl SoftHmac {
    /// Starts an HMAC with the digest `hash` over `key`
    pub fn new(
        hsm: Arc<dyn HsmClient>,
        hash: CK_MECHANISM_TYPE,
        key: &[u8],
    ) -> Result<SoftHmac> {
        let hashop = hash::hash_op(hash)?;
        let blocklen = hashop.block_size;
        let hashlen = hashop.hash_size;

        /* K0 */
        let mut state = Zeroizing::new(Vec::with_capacity(blocklen));
        if key.len() <= blocklen {
            state.extend_from_slice(key);
        } else {
            state.resize(hashlen, 0);
            DigestOperation::new(hsm.clone(), hash)?
                .digest(key, state.as_mut_slice())?;
        }
        state.resize(blocklen, 0);

        /* K0 ^ ipad */
        let mut ipad = Zeroizing::new(vec![0x36u8; blocklen]);
        ipad.iter_mut()
            .zip(state.iter())
            .for_each(|(i1, i2)| *i1 ^= *i2);
        /* K0 ^ opad */
        let mut opad = Zeroizing::new(vec![0x5cu8; blocklen]);
        opad.iter_mut()
            .zip(state.iter())
            .for_each(|(i1, i2)| *i1 ^= *i2);

        /* H((K0 ^ ipad) || .. ) */
        let mut inner = DigestOperation::new(hsm.clone(), hash)?;
        inner.digest_update(ipad.as_slice())?;

        Ok(SoftHmac {
            hsm: hsm,
            hash: hash,
            hashlen: hashlen,
            opad: opad,
            inner: inner,
            finalized: false,
        })
    }

    /// Length of the full MAC
    pub fn mac_len(&self) -> usize {
        self.hashlen
    }

    /// Bytes held back by the inner digest
    pub fn tail_len(&self) -> usize {
        self.inner.tail_len()
    }

    /// Feeds more data
    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        if self.finalized {
            return Err(CKR_OPERATION_NOT_INITIALIZED)?;
        }
        /* H( .. || text ..) */
        let ret = self.inner.digest_update(data);
        if ret.is_err() {
            self.finalized = true;
        }
        ret
    }

    fn finalize(&mut self) -> Result<Vec<u8>> {
        if self.finalized {
            return Err(CKR_OPERATION_NOT_INITIALIZED)?;
        }
        self.finalized = true;

        /* state = H((K0 ^ ipad) || text) */
        let mut state = Zeroizing::new(vec![0u8; self.hashlen]);
        self.inner.digest_final(state.as_mut_slice())?;

        /* H((K0 ^ opad) || state) */
        let mut outer = DigestOperation::new(self.hsm.clone(), self.hash)?;
        outer.digest_update(self.opad.as_slice())?;
        outer.digest_update(state.as_slice())?;
        let mut output = vec![0u8; self.hashlen];
        outer.digest_final(output.as_mut_slice())?;
        Ok(output)
    }

    /// Writes the first `mac.len()` bytes of the HMAC into `mac`
    pub fn sign_final(&mut self, mac: &mut [u8]) -> Result<()> {
        if mac.len() > self.hashlen {
            return Err(CKR_GENERAL_ERROR)?;
        }
        let output = self.finalize()?;
        mac.copy_from_slice(&output[..mac.len()]);
        Ok(())
    }

    /// Compares `mac` with the same number of leading HMAC bytes
    pub fn verify_final(&mut self, mac: &[u8]) -> Result<()> {
        if mac.len() > self.hashlen {
            return Err(CKR_SIGNATURE_LEN_RANGE)?;
        }
        let output = self.finalize()?;
        if !constant_time_eq(&output[..mac.len()], mac) {
            return Err(CKR_SIGNATURE_INVALID)?;
        }
        Ok(())
    }
}
