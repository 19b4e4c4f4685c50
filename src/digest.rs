// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

//! Multi-part hashing over the CCA one-way hash verb
//!
//! CSNBOWH only accepts block aligned input on FIRST and MIDDLE calls.
//! [BlockStream] keeps the misaligned remainder of every update around
//! until more data arrives or the operation is finalized, so callers
//! can feed chunks of any size.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::hash::{hash_op, HashBasedOp, MAX_HASH_SIZE};
use crate::hsm::{HsmClient, RuleArray, CHAIN_VECTOR_SIZE};
use crate::pkcs11::*;
use crate::{trace_debug, Cca};

use zeroize::Zeroizing;

/// Position of a call within a multi-part sequence
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Phase {
    Only,
    First,
    Middle,
    Last,
}

impl Phase {
    pub fn keyword(&self) -> &'static str {
        match self {
            Phase::Only => "ONLY",
            Phase::First => "FIRST",
            Phase::Middle => "MIDDLE",
            Phase::Last => "LAST",
        }
    }
}

/// Block aligned buffering shared by the hash and HMAC operations
#[derive(Debug)]
pub(crate) struct BlockStream {
    block_size: usize,
    tail: Zeroizing<Vec<u8>>,
    started: bool,
}

impl BlockStream {
    pub fn new(block_size: usize) -> BlockStream {
        BlockStream {
            block_size: block_size,
            tail: Zeroizing::new(Vec::with_capacity(block_size)),
            started: false,
        }
    }

    pub fn tail_len(&self) -> usize {
        self.tail.len()
    }

    /// Whether a FIRST call was already issued
    pub fn started(&self) -> bool {
        self.started
    }

    fn next_phase(&self) -> Phase {
        if self.started {
            Phase::Middle
        } else {
            Phase::First
        }
    }

    /// Forwards the block aligned part of tail + `data` through `send`
    /// and keeps the rest, `send` is not called if less than a block is
    /// available
    pub fn update<F>(&mut self, data: &[u8], send: F) -> Result<()>
    where
        F: FnOnce(Phase, &[u8]) -> Result<()>,
    {
        if data.is_empty() {
            return Ok(());
        }
        let phase = self.next_phase();

        if self.tail.is_empty() && data.len() % self.block_size == 0 {
            send(phase, data)?;
            self.started = true;
            return Ok(());
        }

        let total = self.tail.len() + data.len();
        if total < self.block_size {
            self.tail.extend_from_slice(data);
            return Ok(());
        }

        let remainder = total % self.block_size;
        let split = data.len() - remainder;
        let mut buffer = Zeroizing::new(Vec::with_capacity(total - remainder));
        buffer.extend_from_slice(&self.tail);
        buffer.extend_from_slice(&data[..split]);

        self.tail.clear();
        self.tail.extend_from_slice(&data[split..]);

        send(phase, &buffer)?;
        self.started = true;
        Ok(())
    }

    /// Forwards whatever is left as the ONLY or LAST call
    pub fn finish<F, T>(&mut self, send: F) -> Result<T>
    where
        F: FnOnce(Phase, &[u8]) -> Result<T>,
    {
        let phase = if self.started {
            Phase::Last
        } else {
            Phase::Only
        };
        let tail = std::mem::take(&mut *self.tail);
        let tail = Zeroizing::new(tail);
        send(phase, &tail)
    }
}

/// A hash computed by the HSM, possibly over several calls
#[derive(Debug)]
pub struct DigestOperation {
    hsm: Arc<dyn HsmClient>,
    op: &'static HashBasedOp,
    stream: BlockStream,
    chain_vector: [u8; CHAIN_VECTOR_SIZE],
    finalized: bool,
}

impl DigestOperation {
    /// Starts a digest with one of the SHA mechanisms
    pub fn new(
        hsm: Arc<dyn HsmClient>,
        mech: CK_MECHANISM_TYPE,
    ) -> Result<DigestOperation> {
        let op = hash_op(mech)?;
        Ok(DigestOperation {
            hsm: hsm,
            op: op,
            stream: BlockStream::new(op.block_size),
            chain_vector: [0u8; CHAIN_VECTOR_SIZE],
            finalized: false,
        })
    }

    /// The digest mechanism
    pub fn mechanism(&self) -> CK_MECHANISM_TYPE {
        self.op.hash
    }

    /// Length of the digest produced
    pub fn digest_len(&self) -> usize {
        self.op.hash_size
    }

    /// Whether the operation is over, successfully or not
    pub fn finalized(&self) -> bool {
        self.finalized
    }

    /// Bytes held back until a full block is available
    pub fn tail_len(&self) -> usize {
        self.stream.tail_len()
    }

    fn check_output(&self, digest: &[u8]) -> Result<()> {
        if self.finalized {
            return Err(CKR_OPERATION_NOT_INITIALIZED)?;
        }
        if digest.len() < self.op.hash_size {
            return Err(Error::buffer_too_small(self.op.hash_size));
        }
        Ok(())
    }

    fn owh(
        hsm: &dyn HsmClient,
        op: &HashBasedOp,
        chain_vector: &mut [u8],
        phase: Phase,
        data: &[u8],
        hash: &mut [u8],
    ) -> Result<()> {
        let rules = RuleArray::from_keywords(&[op.keyword, phase.keyword()]);
        hsm.one_way_hash(&rules, data, chain_vector, hash)
            .or_failed("CSNBOWH")
    }

    /// Hashes `data` in a single ONLY call
    pub fn digest(&mut self, data: &[u8], digest: &mut [u8]) -> Result<usize> {
        self.check_output(digest)?;
        if self.stream.started() || self.stream.tail_len() != 0 {
            return Err(CKR_OPERATION_ACTIVE)?;
        }
        self.finalized = true;
        let len = self.op.hash_size;
        Self::owh(
            self.hsm.as_ref(),
            self.op,
            &mut self.chain_vector,
            Phase::Only,
            data,
            &mut digest[..len],
        )?;
        Ok(len)
    }

    /// Feeds more data, only whole blocks reach the HSM
    pub fn digest_update(&mut self, data: &[u8]) -> Result<()> {
        if self.finalized {
            return Err(CKR_OPERATION_NOT_INITIALIZED)?;
        }
        let hsm = self.hsm.as_ref();
        let op = self.op;
        let chain_vector = &mut self.chain_vector;
        let ret = self.stream.update(data, |phase, block| {
            let mut scratch = [0u8; MAX_HASH_SIZE];
            Self::owh(
                hsm,
                op,
                chain_vector,
                phase,
                block,
                &mut scratch[..op.hash_size],
            )
        });
        if ret.is_err() {
            self.finalized = true;
        }
        ret
    }

    /// Hashes the held back data and returns the digest length
    pub fn digest_final(&mut self, digest: &mut [u8]) -> Result<usize> {
        self.check_output(digest)?;
        self.finalized = true;
        let hsm = self.hsm.as_ref();
        let op = self.op;
        let chain_vector = &mut self.chain_vector;
        let len = op.hash_size;
        trace_debug!("final hash call with {} bytes", self.stream.tail_len());
        self.stream.finish(|phase, tail| {
            Self::owh(hsm, op, chain_vector, phase, tail, &mut digest[..len])
        })?;
        Ok(len)
    }
}

impl Cca {
    /// Starts a multi-part digest
    pub fn digest_init(
        &self,
        mech: CK_MECHANISM_TYPE,
    ) -> Result<DigestOperation> {
        DigestOperation::new(self.hsm.clone(), mech)
    }

    /// One-shot digest of `data`
    pub fn digest(
        &self,
        mech: CK_MECHANISM_TYPE,
        data: &[u8],
        digest: &mut [u8],
    ) -> Result<usize> {
        self.digest_init(mech)?.digest(data, digest)
    }
}
