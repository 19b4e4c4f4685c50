// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! DES and AES encryption with secure key tokens

use crate::error::{Error, Result};
use crate::hsm::{HsmReply, RuleArray};
use crate::misc::with_staging;
use crate::object::key_token;
use crate::pkcs11::*;
use crate::template::Template;
use crate::{trace_error, Cca};

const DES_BLOCK_SIZE: usize = 8;
const AES_BLOCK_SIZE: usize = 16;

/// Turns a cipher reply into a result, a failure that reports a size
/// larger than the output buffer is a short buffer
fn cipher_result(
    reply: HsmReply<usize>,
    verb: &str,
    output_len: usize,
) -> Result<usize> {
    let needed = reply.value;
    match reply.check(verb) {
        Ok(len) => Ok(len),
        Err(_) if needed > output_len => Err(Error::buffer_too_small(needed)),
        Err(status) => Err(Error::hsm(CKR_FUNCTION_FAILED, status)),
    }
}

fn check_iv(iv: &[u8], len: usize) -> Result<()> {
    if iv.len() != len {
        trace_error!("Invalid IV length {}", iv.len());
        return Err(CKR_MECHANISM_PARAM_INVALID)?;
    }
    Ok(())
}

impl Cca {
    /// DES CBC with a key identifier or DES key token
    ///
    /// CCA may pad the output by up to one block, so a caller buffer
    /// that lacks this room is replaced by a scratch buffer.
    pub fn des_cbc(
        &self,
        key: &Template,
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
        encrypt: bool,
    ) -> Result<usize> {
        let token = key_token(key)?;
        check_iv(iv, DES_BLOCK_SIZE)?;
        let rules = RuleArray::from_keywords(&["CBC"]);
        let hsm = self.hsm();
        with_staging(output, data.len() + DES_BLOCK_SIZE, |out| {
            let len = out.len();
            if encrypt {
                let reply = hsm.des_encipher(&rules, token, iv, data, out);
                cipher_result(reply, "CSNBENC (DES ENCRYPT)", len)
            } else {
                let reply = hsm.des_decipher(&rules, token, iv, data, out);
                cipher_result(reply, "CSNBDEC (DES DECRYPT)", len)
            }
        })
    }

    /// Triple DES CBC, keys are opaque so the DES verbs handle both
    pub fn tdes_cbc(
        &self,
        key: &Template,
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
        encrypt: bool,
    ) -> Result<usize> {
        self.des_cbc(key, iv, data, output, encrypt)
    }

    /// Always fails, DES ECB is not offered
    pub fn des_ecb(
        &self,
        _key: &Template,
        _data: &[u8],
        _output: &mut [u8],
        _encrypt: bool,
    ) -> Result<usize> {
        trace_error!("DES ECB is not supported");
        Err(CKR_FUNCTION_NOT_SUPPORTED)?
    }

    /// Always fails, 3DES ECB is not offered
    pub fn tdes_ecb(
        &self,
        _key: &Template,
        _data: &[u8],
        _output: &mut [u8],
        _encrypt: bool,
    ) -> Result<usize> {
        trace_error!("3DES ECB is not supported");
        Err(CKR_FUNCTION_NOT_SUPPORTED)?
    }

    fn aes_cipher(
        &self,
        rules: &RuleArray,
        token: &[u8],
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
        encrypt: bool,
    ) -> Result<usize> {
        let len = output.len();
        if encrypt {
            let reply = self.hsm().aes_encipher(rules, token, iv, data, output);
            cipher_result(reply, "CSNBSAE (AES ENCRYPT)", len)
        } else {
            let reply = self.hsm().aes_decipher(rules, token, iv, data, output);
            cipher_result(reply, "CSNBSAD (AES DECRYPT)", len)
        }
    }

    /// AES ECB, `data` must be block aligned
    pub fn aes_ecb(
        &self,
        key: &Template,
        data: &[u8],
        output: &mut [u8],
        encrypt: bool,
    ) -> Result<usize> {
        let token = key_token(key)?;
        let rules =
            RuleArray::from_keywords(&["AES", "ECB", "KEYIDENT", "INITIAL"]);
        self.aes_cipher(&rules, token, &[], data, output, encrypt)
    }

    /// AES CBC, input that is not block aligned is processed with
    /// PKCS#7 padding
    pub fn aes_cbc(
        &self,
        key: &Template,
        iv: &[u8],
        data: &[u8],
        output: &mut [u8],
        encrypt: bool,
    ) -> Result<usize> {
        let token = key_token(key)?;
        check_iv(iv, AES_BLOCK_SIZE)?;
        if data.len() % AES_BLOCK_SIZE == 0 {
            let rules =
                RuleArray::from_keywords(&["AES", "KEYIDENT", "INITIAL"]);
            return self.aes_cipher(&rules, token, iv, data, output, encrypt);
        }
        let rules = RuleArray::from_keywords(&["AES", "PKCS-PAD", "KEYIDENT"]);
        if !encrypt {
            return self.aes_cipher(&rules, token, iv, data, output, false);
        }
        with_staging(output, data.len() + AES_BLOCK_SIZE, |out| {
            self.aes_cipher(&rules, token, iv, data, out, true)
        })
    }
}
