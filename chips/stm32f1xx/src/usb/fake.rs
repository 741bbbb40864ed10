// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! In-memory model of the USB peripheral for host tests.
//!
//! Writes go through the same bit semantics as the silicon: toggle bits flip
//! on 1, CTR flags and ISTR event flags clear on 0, SETUP is read only.
//! ISTR.CTR, DIR and EP_ID are derived from the endpoint registers, the way
//! the hardware reports the highest priority pending endpoint.

use core::cell::Cell;

use tock_registers::LocalRegisterCopy;

use super::pma::BufferDescriptor;
use super::registers::{
    ControlRegister, DeviceAddress, EndpointRegister, FrameNumber, InterruptStatus,
    UsbPeripheral, EPR, ISTR, NUM_ENDPOINTS, PMA_SIZE,
};

const fn bits(mask: u32, shift: usize) -> u32 {
    mask << shift
}

const TOGGLE: u32 = bits(EPR::STAT_RX.mask, EPR::STAT_RX.shift)
    | bits(EPR::DTOG_RX.mask, EPR::DTOG_RX.shift)
    | bits(EPR::STAT_TX.mask, EPR::STAT_TX.shift)
    | bits(EPR::DTOG_TX.mask, EPR::DTOG_TX.shift);
const CLEAR_ON_ZERO: u32 =
    bits(EPR::CTR_RX.mask, EPR::CTR_RX.shift) | bits(EPR::CTR_TX.mask, EPR::CTR_TX.shift);
const READ_ONLY: u32 = bits(EPR::SETUP.mask, EPR::SETUP.shift);
const READ_WRITE: u32 = bits(EPR::EA.mask, EPR::EA.shift)
    | bits(EPR::EP_TYPE.mask, EPR::EP_TYPE.shift)
    | bits(EPR::EP_KIND.mask, EPR::EP_KIND.shift);

/// ISTR flags cleared by writing 0.
const ISTR_EVENTS: u32 = bits(ISTR::PMAOVR.mask, ISTR::PMAOVR.shift)
    | bits(ISTR::ERR.mask, ISTR::ERR.shift)
    | bits(ISTR::WKUP.mask, ISTR::WKUP.shift)
    | bits(ISTR::SUSP.mask, ISTR::SUSP.shift)
    | bits(ISTR::RESET.mask, ISTR::RESET.shift)
    | bits(ISTR::SOF.mask, ISTR::SOF.shift)
    | bits(ISTR::ESOF.mask, ISTR::ESOF.shift);

pub struct FakeUsb {
    cntr: Cell<u32>,
    istr: Cell<u32>,
    fnr: Cell<u32>,
    daddr: Cell<u32>,
    btable: Cell<u16>,
    epr: [Cell<u32>; NUM_ENDPOINTS],
    pma: [Cell<u16>; PMA_SIZE / 2],
    cntr_writes: Cell<usize>,
}

impl FakeUsb {
    pub fn new() -> Self {
        FakeUsb {
            // PDWN and FRES are set out of reset.
            cntr: Cell::new(0b11),
            istr: Cell::new(0),
            fnr: Cell::new(0),
            daddr: Cell::new(0),
            btable: Cell::new(0),
            epr: core::array::from_fn(|_| Cell::new(0)),
            pma: core::array::from_fn(|_| Cell::new(0)),
            cntr_writes: Cell::new(0),
        }
    }

    /// Raise ISTR event flags, as the hardware does on bus events.
    pub fn raise(&self, flags: u32) {
        self.istr.set(self.istr.get() | (flags & ISTR_EVENTS));
    }

    /// Event flags still pending in ISTR.
    pub fn pending_events(&self) -> u32 {
        self.istr.get()
    }

    /// Set endpoint register bits from the hardware side.
    pub fn force_epr_bits(&self, index: usize, bits: u32) {
        self.epr[index].set(self.epr[index].get() | bits);
    }

    pub fn set_frame(&self, frame: u32) {
        self.fnr.set(frame & 0x7FF);
    }

    pub fn btable(&self) -> u16 {
        self.btable.get()
    }

    pub fn cntr_writes(&self) -> usize {
        self.cntr_writes.get()
    }

    /// Complete an OUT or SETUP transaction carrying `data` on endpoint
    /// `index`: fill its receive buffer, record the count, NAK further
    /// receptions and raise CTR_RX.
    pub fn receive(&self, index: usize, data: &[u8], setup: bool) {
        let desc = BufferDescriptor::new(self, index);
        let rx = desc.rx_addr();
        for (i, chunk) in data.chunks(2).enumerate() {
            let hi = chunk.get(1).map_or(0, |b| *b as u16);
            self.pma_write(rx + 2 * i, chunk[0] as u16 | (hi << 8));
        }
        let count = desc.rx_count_register().get() & !0x3FF;
        self.pma_write(rx_count_offset(index), count | data.len() as u16);

        let mut epr = self.epr[index].get();
        epr &= !bits(EPR::STAT_RX.mask, EPR::STAT_RX.shift);
        epr |= 0b10 << EPR::STAT_RX.shift;
        epr |= bits(EPR::CTR_RX.mask, EPR::CTR_RX.shift);
        if setup {
            epr |= READ_ONLY;
        } else {
            epr &= !READ_ONLY;
        }
        self.epr[index].set(epr);
    }

    /// Complete an IN transaction on endpoint `index`.
    pub fn transmit(&self, index: usize) {
        let mut epr = self.epr[index].get();
        epr &= !bits(EPR::STAT_TX.mask, EPR::STAT_TX.shift);
        epr |= 0b10 << EPR::STAT_TX.shift;
        epr |= bits(EPR::CTR_TX.mask, EPR::CTR_TX.shift);
        self.epr[index].set(epr);
    }

    /// Send whatever is queued in the transmit buffer of endpoint `index`
    /// back into its receive buffer, as a host echoing the data would.
    pub fn loopback(&self, index: usize) {
        let desc = BufferDescriptor::new(self, index);
        let tx = desc.tx_addr();
        let count = desc.tx_count();
        let mut data = [0u8; PMA_SIZE];
        for i in 0..count {
            let word = self.pma_read(tx + (i & !1));
            data[i] = if i % 2 == 0 { word as u8 } else { (word >> 8) as u8 };
        }
        self.transmit(index);
        self.receive(index, &data[..count], false);
    }

    fn pending_endpoint(&self) -> Option<(usize, bool)> {
        self.epr.iter().enumerate().find_map(|(i, epr)| {
            let value = epr.get();
            if value & CLEAR_ON_ZERO != 0 {
                let out = value & bits(EPR::CTR_RX.mask, EPR::CTR_RX.shift) != 0;
                Some((i, out))
            } else {
                None
            }
        })
    }
}

fn rx_count_offset(index: usize) -> usize {
    index * 8 + 6
}

impl UsbPeripheral for FakeUsb {
    fn cntr(&self) -> ControlRegister {
        LocalRegisterCopy::new(self.cntr.get())
    }

    fn set_cntr(&self, value: ControlRegister) {
        self.cntr_writes.set(self.cntr_writes.get() + 1);
        self.cntr.set(value.get());
    }

    fn istr(&self) -> InterruptStatus {
        let mut value = self.istr.get();
        if let Some((index, out)) = self.pending_endpoint() {
            value |= bits(ISTR::CTR.mask, ISTR::CTR.shift) | index as u32;
            if out {
                value |= bits(ISTR::DIR.mask, ISTR::DIR.shift);
            }
        }
        LocalRegisterCopy::new(value)
    }

    fn set_istr(&self, value: InterruptStatus) {
        let events = self.istr.get() & ISTR_EVENTS;
        self.istr.set(events & (value.get() | !ISTR_EVENTS));
    }

    fn fnr(&self) -> FrameNumber {
        LocalRegisterCopy::new(self.fnr.get())
    }

    fn daddr(&self) -> DeviceAddress {
        LocalRegisterCopy::new(self.daddr.get())
    }

    fn set_daddr(&self, value: DeviceAddress) {
        self.daddr.set(value.get() & 0xFF);
    }

    fn set_btable(&self, offset: u16) {
        self.btable.set(offset & !0x7);
    }

    fn epr(&self, index: usize) -> EndpointRegister {
        LocalRegisterCopy::new(self.epr[index].get())
    }

    fn set_epr(&self, index: usize, value: EndpointRegister) {
        let old = self.epr[index].get();
        let written = value.get();
        let new = ((old ^ written) & TOGGLE)
            | (old & written & CLEAR_ON_ZERO)
            | (old & READ_ONLY)
            | (written & READ_WRITE);
        self.epr[index].set(new);
    }

    fn pma_read(&self, offset: usize) -> u16 {
        self.pma[offset / 2].get()
    }

    fn pma_write(&self, offset: usize, value: u16) {
        self.pma[offset / 2].set(value);
    }
}
