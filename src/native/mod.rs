// Copyright 2024 Simo Sorce
// See LICENSE.txt file for terms

//! Constructions computed on the host out of HSM primitives, used when
//! the coprocessor lacks a native verb for them

pub mod hmac;
