// Copyright 2025 The ccatok Authors
// See LICENSE.txt file for terms

use crate::error::Result;
use crate::hsm::RuleArray;
use crate::Cca;

impl Cca {
    /// Fills `output` with random bytes from the coprocessor
    pub fn generate_random(&self, output: &mut [u8]) -> Result<()> {
        let rules = RuleArray::from_keywords(&["RANDOM"]);
        for chunk in output.chunks_mut(self.config.rng_chunk()) {
            self.hsm()
                .random_number_generate(&rules, chunk)
                .or_failed("CSNBRNGL")?;
        }
        Ok(())
    }
}
