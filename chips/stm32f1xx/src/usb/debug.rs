// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! `Debug` formatters for register values and packets in log output.

use core::fmt;

pub struct HexBuf<'a>(pub &'a [u8]);

impl fmt::Debug for HexBuf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, b) in self.0.iter().enumerate() {
            write!(f, "{}{:02x}", if i > 0 { " " } else { "" }, b)?;
        }
        write!(f, "]")
    }
}

/// Write the names of the bits set in `value`, in table order.
fn write_flags(f: &mut fmt::Formatter, value: u32, names: &[(&str, u32)]) -> fmt::Result {
    f.write_str("{")?;
    for &(name, bit) in names {
        if value & (1 << bit) != 0 {
            write!(f, " {}", name)?;
        }
    }
    f.write_str(" }")
}

macro_rules! register_flags {
    ($tyname:ident: $($flag:ident @ $bit:literal),* $(,)?) => {
        pub struct $tyname(pub u32);

        impl $tyname {
            const NAMES: &'static [(&'static str, u32)] = &[$((stringify!($flag), $bit)),*];
        }

        impl fmt::Debug for $tyname {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write_flags(f, self.0, Self::NAMES)
            }
        }
    };
}

register_flags!(IstrFlags: ESOF @ 8, SOF @ 9, RESET @ 10, SUSP @ 11, WKUP @ 12, ERR @ 13, PMAOVR @ 14, CTR @ 15);

register_flags!(EprFlags: DTOG_TX @ 6, CTR_TX @ 7, EP_KIND @ 8, SETUP @ 11, DTOG_RX @ 14, CTR_RX @ 15);
