// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Endpoint control register (EPnR) access.
//!
//! The EPnR registers mix four kinds of bits:
//!
//! * `STAT_RX`, `STAT_TX`, `DTOG_RX`, `DTOG_TX` toggle when written with 1
//!   and are left alone when written with 0.
//! * `CTR_RX`, `CTR_TX` are cleared when written with 0 and left alone when
//!   written with 1.
//! * `SETUP` is read only.
//! * `EA`, `EP_TYPE`, `EP_KIND` are plain read/write.
//!
//! A naive read-modify-write therefore flips unrelated status bits or drops
//! a transfer-complete flag raised between the read and the write. The
//! functions in this module are the only code that writes an EPnR, and each
//! computes its write value with [`status_update`] or the helpers next to it.

use tock_registers::LocalRegisterCopy;

use super::registers::{EndpointRegister, UsbPeripheral, EPR, NUM_ENDPOINTS};
use crate::ErrorCode;

/// Bits written back unchanged by every update: the read/write fields, plus
/// the read-only and clear-by-writing-0 flags which a written 1 preserves.
const EPR_MASK: u32 = field_mask(EPR::CTR_RX.mask, EPR::CTR_RX.shift)
    | field_mask(EPR::SETUP.mask, EPR::SETUP.shift)
    | field_mask(EPR::EP_TYPE.mask, EPR::EP_TYPE.shift)
    | field_mask(EPR::EP_KIND.mask, EPR::EP_KIND.shift)
    | field_mask(EPR::CTR_TX.mask, EPR::CTR_TX.shift)
    | field_mask(EPR::EA.mask, EPR::EA.shift);

const CTR_RX: u32 = field_mask(EPR::CTR_RX.mask, EPR::CTR_RX.shift);
const CTR_TX: u32 = field_mask(EPR::CTR_TX.mask, EPR::CTR_TX.shift);
const STAT_RX: u32 = field_mask(EPR::STAT_RX.mask, EPR::STAT_RX.shift);
const STAT_TX: u32 = field_mask(EPR::STAT_TX.mask, EPR::STAT_TX.shift);
const DTOG_RX: u32 = field_mask(EPR::DTOG_RX.mask, EPR::DTOG_RX.shift);
const DTOG_TX: u32 = field_mask(EPR::DTOG_TX.mask, EPR::DTOG_TX.shift);

const fn field_mask(mask: u32, shift: usize) -> u32 {
    mask << shift
}

/// Direction of an endpoint, as seen from the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Host to device; uses the RX half of the endpoint register.
    Out,
    /// Device to host; uses the TX half of the endpoint register.
    In,
}

/// Endpoint address as presented to software: bits 0..3 hold the endpoint
/// number, bit 7 is set for IN endpoints.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointAddress(u8);

impl EndpointAddress {
    const DIRECTION_IN: u8 = 0x80;
    const NUMBER_MASK: u8 = 0x0F;

    pub const fn new(number: u8, direction: Direction) -> Self {
        let dir = match direction {
            Direction::Out => 0,
            Direction::In => Self::DIRECTION_IN,
        };
        EndpointAddress((number & Self::NUMBER_MASK) | dir)
    }

    pub const fn from_raw(raw: u8) -> Self {
        EndpointAddress(raw & (Self::NUMBER_MASK | Self::DIRECTION_IN))
    }

    pub const fn raw(&self) -> u8 {
        self.0
    }

    pub const fn number(&self) -> usize {
        (self.0 & Self::NUMBER_MASK) as usize
    }

    pub const fn direction(&self) -> Direction {
        if self.0 & Self::DIRECTION_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    /// The endpoint register index, if this chip implements one for the
    /// endpoint number.
    pub fn index(&self) -> Result<usize, ErrorCode> {
        let n = self.number();
        if n < NUM_ENDPOINTS {
            Ok(n)
        } else {
            Err(ErrorCode::INVAL)
        }
    }
}

impl From<u8> for EndpointAddress {
    fn from(raw: u8) -> Self {
        EndpointAddress::from_raw(raw)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferType {
    /// Decode the transfer type bits of a `bmAttributes` field.
    pub const fn from_attributes(attributes: u8) -> Self {
        match attributes & 0x03 {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            _ => TransferType::Interrupt,
        }
    }

    const fn ep_type(self) -> u32 {
        match self {
            TransferType::Bulk => 0b00,
            TransferType::Control => 0b01,
            TransferType::Isochronous => 0b10,
            TransferType::Interrupt => 0b11,
        }
    }
}

/// Handshake state of one direction of an endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndpointStatus {
    Disabled,
    Stall,
    Nak,
    Valid,
}

impl EndpointStatus {
    const fn bits(self) -> u32 {
        match self {
            EndpointStatus::Disabled => 0b00,
            EndpointStatus::Stall => 0b01,
            EndpointStatus::Nak => 0b10,
            EndpointStatus::Valid => 0b11,
        }
    }

    const fn from_bits(bits: u32) -> Self {
        match bits & 0b11 {
            0b00 => EndpointStatus::Disabled,
            0b01 => EndpointStatus::Stall,
            0b10 => EndpointStatus::Nak,
            _ => EndpointStatus::Valid,
        }
    }
}

/// Compute the value to write so that the hardware ends up with `status` in
/// the given direction and every other bit unchanged.
///
/// `(current ^ desired) & (EPR_MASK | STAT)`: the status field is written
/// with the bits that differ, so the toggle lands on `desired`; the data
/// toggle and the other direction's status are written as 0. Both CTR flags
/// are written as 1 so that a completion raised after `current` was read
/// survives the write.
pub fn status_update(
    current: EndpointRegister,
    direction: Direction,
    status: EndpointStatus,
) -> EndpointRegister {
    let (field, shift) = match direction {
        Direction::Out => (STAT_RX, EPR::STAT_RX.shift),
        Direction::In => (STAT_TX, EPR::STAT_TX.shift),
    };
    let desired = status.bits() << shift;
    let value = ((current.get() ^ desired) & (EPR_MASK | field)) | CTR_RX | CTR_TX;
    LocalRegisterCopy::new(value)
}

/// Current status of one direction of an endpoint register value.
pub fn status(value: EndpointRegister, direction: Direction) -> EndpointStatus {
    match direction {
        Direction::Out => EndpointStatus::from_bits(value.read(EPR::STAT_RX)),
        Direction::In => EndpointStatus::from_bits(value.read(EPR::STAT_TX)),
    }
}

/// Arm one direction of an endpoint with the given handshake.
pub fn set_status<P: UsbPeripheral>(
    registers: &P,
    index: usize,
    direction: Direction,
    status: EndpointStatus,
) {
    let current = registers.epr(index);
    registers.set_epr(index, status_update(current, direction, status));
}

/// Reset the data toggle of one direction to DATA0, keeping type, kind,
/// address and status.
pub fn reset_toggle<P: UsbPeripheral>(registers: &P, index: usize, direction: Direction) {
    let current = registers.epr(index).get();
    let dtog = match direction {
        Direction::Out => DTOG_RX,
        Direction::In => DTOG_TX,
    };
    // Writing the current DTOG value back toggles a 1 to 0 and leaves a 0.
    let value = (current & (EPR_MASK | dtog)) | CTR_RX | CTR_TX;
    registers.set_epr(index, LocalRegisterCopy::new(value));
}

/// Acknowledge a completed reception. Only `CTR_RX` is cleared.
pub fn clear_ctr_rx<P: UsbPeripheral>(registers: &P, index: usize, current: EndpointRegister) {
    let value = (current.get() & EPR_MASK & !CTR_RX) | CTR_TX;
    registers.set_epr(index, LocalRegisterCopy::new(value));
}

/// Acknowledge a completed transmission. Only `CTR_TX` is cleared.
pub fn clear_ctr_tx<P: UsbPeripheral>(registers: &P, index: usize, current: EndpointRegister) {
    let value = (current.get() & EPR_MASK & !CTR_TX) | CTR_RX;
    registers.set_epr(index, LocalRegisterCopy::new(value));
}

/// Program the type, kind and address fields of an endpoint register.
/// Status, data toggles and pending completions are left untouched.
pub fn configure<P: UsbPeripheral>(
    registers: &P,
    index: usize,
    transfer_type: TransferType,
    kind: bool,
) {
    let mut value: EndpointRegister = LocalRegisterCopy::new(CTR_RX | CTR_TX);
    value.modify(
        EPR::EP_TYPE.val(transfer_type.ep_type())
            + EPR::EP_KIND.val(kind as u32)
            + EPR::EA.val(index as u32),
    );
    registers.set_epr(index, value);
}
