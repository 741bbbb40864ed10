// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Peripheral implementations for the STM32F10x family.
//!
//! Only the full-speed USB device controller of the STM32F102/F103
//! (medium and high density) parts is implemented.

#![no_std]

mod errorcode;
pub mod usb;

pub use crate::errorcode::ErrorCode;
