// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Register layout of the STM32F10x USB full-speed device peripheral.
//!
//! The peripheral is reached through the [`UsbPeripheral`] trait rather than
//! through a global `StaticRef`, so that the driver can be exercised against
//! an in-memory model of the hardware. [`UsbRegisterBlock`] is the MMIO
//! implementation used on the chip.
//!
//! Reference: RM0008, section 23 "Universal serial bus full-speed device
//! interface (USB)".

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs, LocalRegisterCopy};

/// Number of endpoint registers (EP0R..EP7R) implemented by the peripheral.
pub const NUM_ENDPOINTS: usize = 8;

/// Size in bytes of the packet memory area.
pub const PMA_SIZE: usize = 512;

/// Base address of the USB register block.
pub const USB_BASE: usize = 0x4000_5C00;

/// Base address of the packet memory area as seen by the CPU.
pub const PMA_BASE: usize = 0x4000_6000;

register_structs! {
    pub UsbRegisters {
        (0x000 => epr: [ReadWrite<u32, EPR::Register>; NUM_ENDPOINTS]),
        (0x020 => _reserved0),
        (0x040 => cntr: ReadWrite<u32, CNTR::Register>),
        (0x044 => istr: ReadWrite<u32, ISTR::Register>),
        (0x048 => fnr: ReadOnly<u32, FNR::Register>),
        (0x04C => daddr: ReadWrite<u32, DADDR::Register>),
        (0x050 => btable: ReadWrite<u32, BTABLE::Register>),
        (0x054 => @END),
    }
}

register_structs! {
    /// The PMA is 256 half-words, each one occupying the low half of a
    /// 32-bit slot on the APB1 bus.
    pub PacketMemory {
        (0x000 => words: [ReadWrite<u32>; PMA_SIZE / 2]),
        (0x400 => @END),
    }
}

register_bitfields![u32,
    pub EPR [
        /// Transfer complete for reception. Cleared by writing 0.
        CTR_RX OFFSET(15) NUMBITS(1) [],
        /// Data toggle for reception. Toggled by writing 1.
        DTOG_RX OFFSET(14) NUMBITS(1) [],
        /// Status for reception. Toggled by writing 1.
        STAT_RX OFFSET(12) NUMBITS(2) [
            Disabled = 0b00,
            Stall = 0b01,
            Nak = 0b10,
            Valid = 0b11
        ],
        /// Last completed reception was a SETUP transaction. Read only.
        SETUP OFFSET(11) NUMBITS(1) [],
        EP_TYPE OFFSET(9) NUMBITS(2) [
            Bulk = 0b00,
            Control = 0b01,
            Isochronous = 0b10,
            Interrupt = 0b11
        ],
        /// Double buffering for bulk endpoints, STATUS_OUT for control.
        EP_KIND OFFSET(8) NUMBITS(1) [],
        /// Transfer complete for transmission. Cleared by writing 0.
        CTR_TX OFFSET(7) NUMBITS(1) [],
        /// Data toggle for transmission. Toggled by writing 1.
        DTOG_TX OFFSET(6) NUMBITS(1) [],
        /// Status for transmission. Toggled by writing 1.
        STAT_TX OFFSET(4) NUMBITS(2) [
            Disabled = 0b00,
            Stall = 0b01,
            Nak = 0b10,
            Valid = 0b11
        ],
        EA OFFSET(0) NUMBITS(4) []
    ],
    pub CNTR [
        CTRM OFFSET(15) NUMBITS(1) [],
        PMAOVRM OFFSET(14) NUMBITS(1) [],
        ERRM OFFSET(13) NUMBITS(1) [],
        WKUPM OFFSET(12) NUMBITS(1) [],
        SUSPM OFFSET(11) NUMBITS(1) [],
        RESETM OFFSET(10) NUMBITS(1) [],
        SOFM OFFSET(9) NUMBITS(1) [],
        ESOFM OFFSET(8) NUMBITS(1) [],
        RESUME OFFSET(4) NUMBITS(1) [],
        FSUSP OFFSET(3) NUMBITS(1) [],
        LP_MODE OFFSET(2) NUMBITS(1) [],
        PDWN OFFSET(1) NUMBITS(1) [],
        FRES OFFSET(0) NUMBITS(1) []
    ],
    pub ISTR [
        CTR OFFSET(15) NUMBITS(1) [],
        PMAOVR OFFSET(14) NUMBITS(1) [],
        ERR OFFSET(13) NUMBITS(1) [],
        WKUP OFFSET(12) NUMBITS(1) [],
        SUSP OFFSET(11) NUMBITS(1) [],
        RESET OFFSET(10) NUMBITS(1) [],
        SOF OFFSET(9) NUMBITS(1) [],
        ESOF OFFSET(8) NUMBITS(1) [],
        DIR OFFSET(4) NUMBITS(1) [],
        EP_ID OFFSET(0) NUMBITS(4) []
    ],
    pub FNR [
        RXDP OFFSET(15) NUMBITS(1) [],
        RXDM OFFSET(14) NUMBITS(1) [],
        LCK OFFSET(13) NUMBITS(1) [],
        LSOF OFFSET(11) NUMBITS(2) [],
        FN OFFSET(0) NUMBITS(11) []
    ],
    pub DADDR [
        EF OFFSET(7) NUMBITS(1) [],
        ADD OFFSET(0) NUMBITS(7) []
    ],
    pub BTABLE [
        BTABLE OFFSET(3) NUMBITS(13) []
    ]
];

pub type EndpointRegister = LocalRegisterCopy<u32, EPR::Register>;
pub type ControlRegister = LocalRegisterCopy<u32, CNTR::Register>;
pub type InterruptStatus = LocalRegisterCopy<u32, ISTR::Register>;
pub type FrameNumber = LocalRegisterCopy<u32, FNR::Register>;
pub type DeviceAddress = LocalRegisterCopy<u32, DADDR::Register>;

/// Access to the USB peripheral's registers and packet memory.
///
/// Every method is a single bus access. In particular `set_epr` and
/// `set_istr` are raw writes: the hardware applies its own toggle and
/// clear-by-writing-0 semantics to the written value. Only
/// [`super::endpoint`] may call `set_epr`.
pub trait UsbPeripheral {
    fn cntr(&self) -> ControlRegister;
    fn set_cntr(&self, value: ControlRegister);

    fn istr(&self) -> InterruptStatus;
    fn set_istr(&self, value: InterruptStatus);

    fn fnr(&self) -> FrameNumber;

    fn daddr(&self) -> DeviceAddress;
    fn set_daddr(&self, value: DeviceAddress);

    /// Set the PMA offset of the buffer descriptor table.
    fn set_btable(&self, offset: u16);

    fn epr(&self, index: usize) -> EndpointRegister;
    fn set_epr(&self, index: usize, value: EndpointRegister);

    /// Read the half-word at byte `offset` of the packet memory area.
    fn pma_read(&self, offset: usize) -> u16;

    /// Write the half-word at byte `offset` of the packet memory area.
    fn pma_write(&self, offset: usize, value: u16);

    /// Wait out the analog transceiver startup time after leaving power-down.
    fn startup_delay(&self) {}
}

/// MMIO implementation of [`UsbPeripheral`].
pub struct UsbRegisterBlock {
    registers: &'static UsbRegisters,
    pma: &'static PacketMemory,
}

impl UsbRegisterBlock {
    /// # Safety
    ///
    /// `usb_base` and `pma_base` must be the addresses of the USB register
    /// block and packet memory area, and only one `UsbRegisterBlock` may
    /// exist.
    pub unsafe fn new(usb_base: usize, pma_base: usize) -> Self {
        Self {
            registers: unsafe { &*(usb_base as *const UsbRegisters) },
            pma: unsafe { &*(pma_base as *const PacketMemory) },
        }
    }

    /// # Safety
    ///
    /// Only one `UsbRegisterBlock` may exist.
    pub unsafe fn stm32f10x() -> Self {
        unsafe { Self::new(USB_BASE, PMA_BASE) }
    }
}

impl UsbPeripheral for UsbRegisterBlock {
    fn cntr(&self) -> ControlRegister {
        self.registers.cntr.extract()
    }

    fn set_cntr(&self, value: ControlRegister) {
        self.registers.cntr.set(value.get());
    }

    fn istr(&self) -> InterruptStatus {
        self.registers.istr.extract()
    }

    fn set_istr(&self, value: InterruptStatus) {
        self.registers.istr.set(value.get());
    }

    fn fnr(&self) -> FrameNumber {
        self.registers.fnr.extract()
    }

    fn daddr(&self) -> DeviceAddress {
        self.registers.daddr.extract()
    }

    fn set_daddr(&self, value: DeviceAddress) {
        self.registers.daddr.set(value.get());
    }

    fn set_btable(&self, offset: u16) {
        self.registers
            .btable
            .write(BTABLE::BTABLE.val(offset as u32 >> 3));
    }

    fn epr(&self, index: usize) -> EndpointRegister {
        self.registers.epr[index].extract()
    }

    fn set_epr(&self, index: usize, value: EndpointRegister) {
        self.registers.epr[index].set(value.get());
    }

    fn pma_read(&self, offset: usize) -> u16 {
        self.pma.words[offset / 2].get() as u16
    }

    fn pma_write(&self, offset: usize, value: u16) {
        self.pma.words[offset / 2].set(value as u32);
    }

    fn startup_delay(&self) {
        // tSTARTUP is 1us; 72 cycles at the maximum 72MHz core clock.
        for _ in 0..72 {
            core::hint::spin_loop();
        }
    }
}
