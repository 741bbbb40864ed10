// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Build-time configuration of the USB device driver.
//!
//! As with the kernel's `CONFIG` object, options are carried in a typed
//! `const` value rather than sprinkled `#[cfg]`s, so every code path is
//! type-checked and disabled paths fold away. Boards pass [`Config::DEFAULT`]
//! (or a modified copy) to [`super::Usb::new`].

use super::registers::NUM_ENDPOINTS;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Notify the bus client of bus resets.
    pub reset_event: bool,

    /// Unmask the suspend interrupt and notify the bus client on suspend.
    pub suspend_event: bool,

    /// Unmask the wakeup interrupt and notify the bus client on resume.
    pub wakeup_event: bool,

    /// Unmask the start-of-frame interrupt and notify the bus client every
    /// frame.
    pub sof_event: bool,

    /// Unmask the packet memory overrun and bus error interrupts and report
    /// them to the bus client.
    pub error_event: bool,

    /// Endpoints (bit n for endpoint n) requesting double buffering.
    ///
    /// Double buffering is not supported by this driver. Configuring an
    /// endpoint whose bit is set fails with `NOSUPPORT` instead of silently
    /// running it single-buffered.
    pub double_buffered: u8,

    /// Maximum packet size of the control endpoint: 8, 16, 32 or 64.
    pub max_packet0: u16,
}

impl Config {
    pub const DEFAULT: Config = Config {
        reset_event: true,
        suspend_event: true,
        wakeup_event: true,
        sof_event: cfg!(feature = "sof_event"),
        error_event: cfg!(feature = "error_event"),
        double_buffered: 0,
        max_packet0: 64,
    };

    pub fn is_valid(&self) -> bool {
        matches!(self.max_packet0, 8 | 16 | 32 | 64)
    }

    pub fn is_double_buffered(&self, index: usize) -> bool {
        index < NUM_ENDPOINTS && self.double_buffered & (1 << index) != 0
    }
}

impl Default for Config {
    fn default() -> Self {
        Config::DEFAULT
    }
}
