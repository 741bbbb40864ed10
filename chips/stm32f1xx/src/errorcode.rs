// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Standard error enum for driver operations.

/// Errors returned by the USB device driver.
///
/// The variants and their numbering follow the Tock kernel's `ErrorCode`,
/// restricted to the conditions this driver can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(usize)]
pub enum ErrorCode {
    /// The state requested is already set
    ALREADY = 2,
    /// The component is powered down or not attached
    OFF = 3,
    /// An invalid parameter was passed
    INVAL = 5,
    /// Parameter passed was too large
    SIZE = 6,
    /// Memory required not available
    NOMEM = 8,
    /// Operation or command is unsupported
    NOSUPPORT = 9,
}

impl From<ErrorCode> for usize {
    fn from(err: ErrorCode) -> usize {
        err as usize
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            ErrorCode::ALREADY => "already in requested state",
            ErrorCode::OFF => "not powered or not attached",
            ErrorCode::INVAL => "invalid parameter",
            ErrorCode::SIZE => "size out of range",
            ErrorCode::NOMEM => "packet memory exhausted",
            ErrorCode::NOSUPPORT => "unsupported",
        };
        f.write_str(msg)
    }
}
