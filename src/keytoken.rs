// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! CCA key token classification and field extraction
//!
//! A key token is a self describing blob: byte 0 tells internal
//! symmetric tokens (0x01) from internal (0x1f) and external (0x1e) PKA
//! tokens, then section identifiers and format bytes at fixed offsets
//! select the exact kind. All multi byte fields are big endian.
//!
//! PKA tokens carry an 8 byte header followed by the private key
//! section (if any) and then the public key section. The offset of the
//! public section depends on the length the private section reports
//! about itself.

use crate::error::{Error, Result};
use crate::misc::{copy_out, get_be16, get_slice, get_u8};

pub const TOKEN_HDR_LEN: usize = 8;

/* Token identifiers, byte 0 */
pub const TOKEN_ID_INTERNAL_SYM: u8 = 0x01;
pub const TOKEN_ID_EXTERNAL_PKA: u8 = 0x1e;
pub const TOKEN_ID_INTERNAL_PKA: u8 = 0x1f;

/* Fixed length DES and AES data key tokens */
pub const SYM_TOKEN_LEN: usize = 64;
pub const SYM_VERSION_OFFSET: usize = 4;
pub const SYM_VERSION_DES: u8 = 0x00;
pub const SYM_VERSION_DES_DOUBLE: u8 = 0x01;
pub const SYM_VERSION_AES: u8 = 0x04;
pub const SYM_VERSION_VARIABLE: u8 = 0x05;
pub const DES_KEY_LEN_OFFSET: usize = 59;
pub const DES_KEY_LEN_DOUBLE: u8 = 0x10;
pub const DES_KEY_LEN_TRIPLE: u8 = 0x20;
pub const AES_BITS_OFFSET: usize = 56;

/* Variable length symmetric tokens */
pub const VAR_ALGORITHM_OFFSET: usize = 41;
pub const VAR_KEY_TYPE_OFFSET: usize = 42;
pub const VAR_ALGORITHM_AES: u8 = 0x02;
pub const VAR_ALGORITHM_HMAC: u8 = 0x03;
pub const VAR_KEY_TYPE_CIPHER: usize = 0x0001;
pub const VAR_KEY_TYPE_MAC: usize = 0x0002;
pub const HMAC_FORMAT_OFFSET: usize = 8;
pub const HMAC_PAYLOAD_BITS_OFFSET: usize = 38;
pub const HMAC_MIN_PAYLOAD_BITS: usize = 80;
pub const HMAC_MAX_PAYLOAD_BITS: usize = 2432;

/* PKA section identifiers */
pub const SECTION_RSA_ME: u8 = 0x30;
pub const SECTION_RSA_CRT: u8 = 0x31;
pub const SECTION_RSA_PUBLIC: u8 = 0x04;
pub const SECTION_EC_PRIVATE: u8 = 0x20;
pub const SECTION_EC_PUBLIC: u8 = 0x21;
pub const SECTION_LEN_OFFSET: usize = 2;

/* RSA private sections, relative to the section start */
pub const RSA_ME_N_LEN_OFFSET: usize = 64;
pub const RSA_ME_N_OFFSET: usize = 122;
pub const RSA_CRT_N_LEN_OFFSET: usize = 64;
pub const RSA_CRT_N_OFFSET: usize = 134;

/* RSA public section, relative to the section start */
pub const RSA_PUB_E_LEN_OFFSET: usize = 6;
pub const RSA_PUB_BITS_OFFSET: usize = 8;
pub const RSA_PUB_N_LEN_OFFSET: usize = 10;
pub const RSA_PUB_E_OFFSET: usize = 12;

/* EC sections, relative to the section start */
pub const EC_PRIV_WRAP_OFFSET: usize = 4;
pub const EC_PRIV_WRAP_AESKW: u8 = 0x01;
pub const EC_PRIV_CURVE_TYPE_OFFSET: usize = 9;
pub const EC_PRIV_FORMAT_OFFSET: usize = 10;
pub const EC_PRIV_FORMAT_ENCRYPTED: u8 = 0x08;
pub const EC_PRIV_BITS_OFFSET: usize = 12;
pub const EC_PUB_CURVE_TYPE_OFFSET: usize = 8;
pub const EC_PUB_BITS_OFFSET: usize = 10;
pub const EC_PUB_Q_LEN_OFFSET: usize = 12;
pub const EC_PUB_Q_OFFSET: usize = 14;

pub const MAX_RSA_N_LEN: usize = 512;
pub const MAX_RSA_E_LEN: usize = 256;
pub const MAX_EC_Q_LEN: usize = 133;

/// Kind of a classified key token
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TokenKind {
    /// Fixed length DES or TDES data key
    DesData,
    /// Fixed length AES data key
    AesData,
    /// Variable length AES CIPHER key
    AesCipher,
    /// Variable length HMAC key
    Hmac,
    /// Internal RSA private key, ME or CRT form
    RsaPrivate,
    /// External RSA public key
    RsaPublic,
    /// Internal EC private key
    EcPrivate,
    /// External EC public key
    EcPublic,
}

/// A recognized key token
///
/// The only way to obtain one is [KeyToken::classify], so every
/// instance has passed the structural checks for its kind and the
/// extractors can rely on them.
#[derive(Clone, Copy, Debug)]
pub struct KeyToken<'a> {
    kind: TokenKind,
    bits: usize,
    curve_type: u8,
    data: &'a [u8],
}

fn malformed(what: &str) -> Error {
    Error::malformed_token(what)
}

fn be16(data: &[u8], offset: usize) -> Result<usize> {
    get_be16(data, offset).ok_or_else(|| malformed("truncated token"))
}

fn byte(data: &[u8], offset: usize) -> Result<u8> {
    get_u8(data, offset).ok_or_else(|| malformed("truncated token"))
}

impl<'a> KeyToken<'a> {
    fn new(kind: TokenKind, bits: usize, data: &'a [u8]) -> KeyToken<'a> {
        KeyToken {
            kind: kind,
            bits: bits,
            curve_type: 0,
            data: data,
        }
    }

    /// Identifies the kind and key size of a token
    ///
    /// The first matching discriminant decides which structural checks
    /// apply, if those fail the token is rejected rather than tried
    /// against other kinds.
    pub fn classify(data: &'a [u8]) -> Result<KeyToken<'a>> {
        let id = byte(data, 0)?;
        let version = get_u8(data, SYM_VERSION_OFFSET);
        let section = get_u8(data, TOKEN_HDR_LEN);

        match (id, version, section) {
            (TOKEN_ID_INTERNAL_SYM, Some(SYM_VERSION_DES), _)
            | (TOKEN_ID_INTERNAL_SYM, Some(SYM_VERSION_DES_DOUBLE), _) => {
                Self::classify_des(data)
            }
            (TOKEN_ID_INTERNAL_SYM, Some(SYM_VERSION_AES), _) => {
                Self::classify_aes(data)
            }
            (TOKEN_ID_INTERNAL_SYM, Some(SYM_VERSION_VARIABLE), _) => {
                match get_u8(data, VAR_ALGORITHM_OFFSET) {
                    Some(VAR_ALGORITHM_AES) => Self::classify_aes_cipher(data),
                    Some(VAR_ALGORITHM_HMAC) => Self::classify_hmac(data),
                    _ => Err(malformed("unknown variable length token")),
                }
            }
            (TOKEN_ID_INTERNAL_PKA, _, Some(SECTION_RSA_ME))
            | (TOKEN_ID_INTERNAL_PKA, _, Some(SECTION_RSA_CRT)) => {
                Self::classify_rsa_private(data)
            }
            (TOKEN_ID_EXTERNAL_PKA, _, Some(SECTION_RSA_PUBLIC)) => {
                let bits = be16(data, TOKEN_HDR_LEN + RSA_PUB_BITS_OFFSET)?;
                Ok(KeyToken::new(TokenKind::RsaPublic, bits, data))
            }
            (TOKEN_ID_INTERNAL_PKA, _, Some(SECTION_EC_PRIVATE)) => {
                Self::classify_ec_private(data)
            }
            (TOKEN_ID_EXTERNAL_PKA, _, Some(SECTION_EC_PUBLIC)) => {
                let sec = TOKEN_HDR_LEN;
                let mut tok = KeyToken::new(
                    TokenKind::EcPublic,
                    be16(data, sec + EC_PUB_BITS_OFFSET)?,
                    data,
                );
                tok.curve_type = byte(data, sec + EC_PUB_CURVE_TYPE_OFFSET)?;
                Ok(tok)
            }
            _ => Err(malformed("unknown token type")),
        }
    }

    fn classify_des(data: &'a [u8]) -> Result<KeyToken<'a>> {
        if data.len() != SYM_TOKEN_LEN {
            return Err(malformed("DES token must be 64 bytes"));
        }
        let bits = if data[SYM_VERSION_OFFSET] == SYM_VERSION_DES {
            64
        } else {
            match data[DES_KEY_LEN_OFFSET] {
                DES_KEY_LEN_DOUBLE => 128,
                DES_KEY_LEN_TRIPLE => 192,
                _ => return Err(malformed("unknown DES key size")),
            }
        };
        Ok(KeyToken::new(TokenKind::DesData, bits, data))
    }

    fn classify_aes(data: &'a [u8]) -> Result<KeyToken<'a>> {
        if data.len() != SYM_TOKEN_LEN {
            return Err(malformed("AES token must be 64 bytes"));
        }
        let bits = be16(data, AES_BITS_OFFSET)?;
        match bits {
            128 | 192 | 256 => {
                Ok(KeyToken::new(TokenKind::AesData, bits, data))
            }
            _ => Err(malformed("unknown AES key size")),
        }
    }

    fn classify_aes_cipher(data: &'a [u8]) -> Result<KeyToken<'a>> {
        if be16(data, VAR_KEY_TYPE_OFFSET)? != VAR_KEY_TYPE_CIPHER {
            return Err(malformed("unknown AES cipher key type"));
        }
        /* the key size of a cipher key is not visible */
        Ok(KeyToken::new(TokenKind::AesCipher, 0, data))
    }

    fn classify_hmac(data: &'a [u8]) -> Result<KeyToken<'a>> {
        if be16(data, VAR_KEY_TYPE_OFFSET)? != VAR_KEY_TYPE_MAC {
            return Err(malformed("unknown HMAC key type"));
        }
        let format = [
            byte(data, HMAC_FORMAT_OFFSET)?,
            byte(data, 26)?,
            byte(data, 27)?,
            byte(data, 28)?,
        ];
        if format != [0x03, 0x02, 0x02, 0x00] {
            return Err(malformed("unsupported HMAC token format"));
        }
        let bits = be16(data, HMAC_PAYLOAD_BITS_OFFSET)?;
        if bits < HMAC_MIN_PAYLOAD_BITS || bits > HMAC_MAX_PAYLOAD_BITS {
            return Err(malformed("HMAC payload size out of range"));
        }
        Ok(KeyToken::new(TokenKind::Hmac, bits, data))
    }

    fn classify_rsa_private(data: &'a [u8]) -> Result<KeyToken<'a>> {
        let pubsec = Self::public_section_offset(data)?;
        if pubsec >= data.len() {
            return Err(malformed("RSA private section overruns token"));
        }
        if data[pubsec] != SECTION_RSA_PUBLIC {
            return Err(malformed("missing RSA public section"));
        }
        let bits = be16(data, pubsec + RSA_PUB_BITS_OFFSET)?;
        Ok(KeyToken::new(TokenKind::RsaPrivate, bits, data))
    }

    fn classify_ec_private(data: &'a [u8]) -> Result<KeyToken<'a>> {
        let sec = TOKEN_HDR_LEN;
        if byte(data, sec + EC_PRIV_WRAP_OFFSET)? != EC_PRIV_WRAP_AESKW {
            return Err(malformed("unknown EC wrapping method"));
        }
        if byte(data, sec + EC_PRIV_FORMAT_OFFSET)? != EC_PRIV_FORMAT_ENCRYPTED
        {
            return Err(malformed("unknown EC key format"));
        }
        let mut tok = KeyToken::new(
            TokenKind::EcPrivate,
            be16(data, sec + EC_PRIV_BITS_OFFSET)?,
            data,
        );
        tok.curve_type = byte(data, sec + EC_PRIV_CURVE_TYPE_OFFSET)?;
        Ok(tok)
    }

    fn public_section_offset(data: &[u8]) -> Result<usize> {
        let privsec_len = be16(data, TOKEN_HDR_LEN + SECTION_LEN_OFFSET)?;
        Ok(TOKEN_HDR_LEN + privsec_len)
    }

    /// Kind found by classification
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Key size in bits, for HMAC tokens the payload size, for AES
    /// cipher tokens always 0
    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Curve type byte of EC tokens
    pub fn curve_type(&self) -> u8 {
        self.curve_type
    }

    /// The token bytes
    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    fn public_section(&self) -> Result<&'a [u8]> {
        let offset = match self.kind {
            TokenKind::RsaPrivate | TokenKind::EcPrivate => {
                Self::public_section_offset(self.data)?
            }
            TokenKind::RsaPublic | TokenKind::EcPublic => TOKEN_HDR_LEN,
            _ => return Err(malformed("token has no public section")),
        };
        match self.data.get(offset..) {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(malformed("public section overruns token")),
        }
    }

    /// Copies the RSA modulus into `out`
    ///
    /// Internal tokens keep the modulus in the private section, external
    /// ones in the public section after the exponent.
    pub fn rsa_modulus(&self, out: &mut [u8]) -> Result<usize> {
        match self.kind {
            TokenKind::RsaPrivate => {
                let sec = &self.data[TOKEN_HDR_LEN..];
                let (len_off, n_off) = match sec[0] {
                    SECTION_RSA_ME => (RSA_ME_N_LEN_OFFSET, RSA_ME_N_OFFSET),
                    SECTION_RSA_CRT => (RSA_CRT_N_LEN_OFFSET, RSA_CRT_N_OFFSET),
                    _ => return Err(malformed("invalid RSA private section")),
                };
                let n_len = be16(sec, len_off)?;
                let n = get_slice(sec, n_off, n_len)
                    .ok_or_else(|| malformed("RSA modulus overruns token"))?;
                copy_out(n, out)
            }
            TokenKind::RsaPublic => {
                let sec = self.public_section()?;
                if sec[0] != SECTION_RSA_PUBLIC {
                    return Err(malformed("invalid RSA public section"));
                }
                let n_len = be16(sec, RSA_PUB_N_LEN_OFFSET)?;
                if n_len == 0 {
                    return Err(malformed("RSA public section without modulus"));
                }
                let e_len = be16(sec, RSA_PUB_E_LEN_OFFSET)?;
                let n = get_slice(sec, RSA_PUB_E_OFFSET + e_len, n_len)
                    .ok_or_else(|| malformed("RSA modulus overruns token"))?;
                copy_out(n, out)
            }
            _ => Err(malformed("not an RSA token")),
        }
    }

    /// Copies the RSA public exponent into `out`
    pub fn rsa_public_exponent(&self, out: &mut [u8]) -> Result<usize> {
        match self.kind {
            TokenKind::RsaPrivate | TokenKind::RsaPublic => (),
            _ => return Err(malformed("not an RSA token")),
        }
        let sec = self.public_section()?;
        if sec[0] != SECTION_RSA_PUBLIC {
            return Err(malformed("invalid RSA public section"));
        }
        let e_len = be16(sec, RSA_PUB_E_LEN_OFFSET)?;
        let e = get_slice(sec, RSA_PUB_E_OFFSET, e_len)
            .ok_or_else(|| malformed("RSA exponent overruns token"))?;
        copy_out(e, out)
    }

    /// The public key section of an EC private token
    pub fn ec_public_section(&self) -> Result<&'a [u8]> {
        if self.kind != TokenKind::EcPrivate {
            return Err(malformed("not an EC private token"));
        }
        let sec = self.public_section()?;
        if sec[0] != SECTION_EC_PUBLIC {
            return Err(malformed("invalid EC public section"));
        }
        Ok(sec)
    }

    /// Copies the EC public point Q into `out`
    pub fn ec_point(&self, out: &mut [u8]) -> Result<usize> {
        let sec = match self.kind {
            TokenKind::EcPrivate => self.ec_public_section()?,
            TokenKind::EcPublic => self.public_section()?,
            _ => return Err(malformed("not an EC token")),
        };
        let q_len = be16(sec, EC_PUB_Q_LEN_OFFSET)?;
        if q_len > MAX_EC_Q_LEN {
            return Err(malformed("EC point too long"));
        }
        let q = get_slice(sec, EC_PUB_Q_OFFSET, q_len)
            .ok_or_else(|| malformed("EC point overruns token"))?;
        copy_out(q, out)
    }

    /// The RSA modulus as an owned buffer
    pub fn rsa_modulus_vec(&self) -> Result<Vec<u8>> {
        let mut n = vec![0u8; MAX_RSA_N_LEN];
        let len = self.rsa_modulus(&mut n)?;
        n.truncate(len);
        Ok(n)
    }

    /// The RSA public exponent as an owned buffer
    pub fn rsa_public_exponent_vec(&self) -> Result<Vec<u8>> {
        let mut e = vec![0u8; MAX_RSA_E_LEN];
        let len = self.rsa_public_exponent(&mut e)?;
        e.truncate(len);
        Ok(e)
    }

    /// The EC point as an owned buffer
    pub fn ec_point_vec(&self) -> Result<Vec<u8>> {
        let mut q = vec![0u8; MAX_EC_Q_LEN];
        let len = self.ec_point(&mut q)?;
        q.truncate(len);
        Ok(q)
    }
}
