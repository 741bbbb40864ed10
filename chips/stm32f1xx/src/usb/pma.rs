// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Packet memory area: buffer allocation, the buffer descriptor table and
//! half-word copies between RAM and PMA.
//!
//! The buffer descriptor table sits at PMA offset 0 (BTABLE = 0) and holds
//! four half-words per endpoint: ADDRn_TX, COUNTn_TX, ADDRn_RX, COUNTn_RX.
//! Endpoint buffers are handed out by a bump allocator starting right after
//! the table. There is no free operation; the whole area is reclaimed on
//! every bus reset.

use core::cell::Cell;

use tock_registers::{register_bitfields, LocalRegisterCopy};

use super::registers::{UsbPeripheral, NUM_ENDPOINTS, PMA_SIZE};
use crate::ErrorCode;

/// Bytes used by one buffer descriptor table entry.
const DESCRIPTOR_SIZE: usize = 8;

/// PMA offset of the buffer descriptor table.
pub const BTABLE_OFFSET: usize = 0;

/// First PMA offset available to endpoint buffers.
pub const BUFFER_BASE: usize = BTABLE_OFFSET + DESCRIPTOR_SIZE * NUM_ENDPOINTS;

/// Largest buffer whose size is encoded in 2-byte blocks.
const SMALL_BLOCK_LIMIT: usize = 62;

register_bitfields![u16,
    pub COUNT_RX [
        /// Block size: 0 for 2 bytes, 1 for 32 bytes.
        BL_SIZE OFFSET(15) NUMBITS(1) [],
        NUM_BLOCK OFFSET(10) NUMBITS(5) [],
        /// Bytes received, written by the hardware.
        COUNT OFFSET(0) NUMBITS(10) []
    ]
];

pub type ReceiveCount = LocalRegisterCopy<u16, COUNT_RX::Register>;

/// Round a requested buffer size to what the hardware can describe: an even
/// number of bytes up to 62, a multiple of 32 above that.
pub const fn buffer_size(requested: usize) -> usize {
    if requested > SMALL_BLOCK_LIMIT {
        (requested + 31) & !31
    } else {
        (requested + 1) & !1
    }
}

/// COUNTn_RX value describing a receive buffer of `size` bytes, which must
/// already be rounded with [`buffer_size`].
pub fn rx_count_encoding(size: usize) -> ReceiveCount {
    let mut count: ReceiveCount = LocalRegisterCopy::new(0);
    if size > SMALL_BLOCK_LIMIT {
        count.modify(COUNT_RX::BL_SIZE::SET + COUNT_RX::NUM_BLOCK.val((size / 32 - 1) as u16));
    } else {
        count.modify(COUNT_RX::NUM_BLOCK.val((size / 2) as u16));
    }
    count
}

/// A region of the PMA assigned to one direction of an endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PmaBuffer {
    pub offset: usize,
    pub size: usize,
}

/// Bump allocator over the endpoint buffer part of the PMA.
pub struct PacketMemoryAllocator {
    next: Cell<usize>,
}

impl PacketMemoryAllocator {
    pub const fn new() -> Self {
        PacketMemoryAllocator {
            next: Cell::new(BUFFER_BASE),
        }
    }

    /// Forget every allocation.
    pub fn reset(&self) {
        self.next.set(BUFFER_BASE);
    }

    /// Offset the next allocation will start at.
    pub fn next_free(&self) -> usize {
        self.next.get()
    }

    /// Reserve a buffer of at least `requested` bytes. Fails with `NOMEM`,
    /// leaving the allocator unchanged, if the PMA is exhausted.
    pub fn allocate(&self, requested: usize) -> Result<PmaBuffer, ErrorCode> {
        let size = buffer_size(requested);
        let offset = self.next.get();
        if offset + size > PMA_SIZE {
            return Err(ErrorCode::NOMEM);
        }
        self.next.set(offset + size);
        Ok(PmaBuffer { offset, size })
    }
}

/// One entry of the buffer descriptor table.
pub struct BufferDescriptor<'a, P: UsbPeripheral> {
    registers: &'a P,
    base: usize,
}

impl<'a, P: UsbPeripheral> BufferDescriptor<'a, P> {
    const ADDR_TX: usize = 0;
    const COUNT_TX: usize = 2;
    const ADDR_RX: usize = 4;
    const COUNT_RX: usize = 6;

    pub fn new(registers: &'a P, index: usize) -> Self {
        BufferDescriptor {
            registers,
            base: BTABLE_OFFSET + index * DESCRIPTOR_SIZE,
        }
    }

    pub fn tx_addr(&self) -> usize {
        self.registers.pma_read(self.base + Self::ADDR_TX) as usize
    }

    pub fn set_tx_addr(&self, offset: usize) {
        self.registers
            .pma_write(self.base + Self::ADDR_TX, offset as u16);
    }

    pub fn tx_count(&self) -> usize {
        self.registers.pma_read(self.base + Self::COUNT_TX) as usize
    }

    pub fn set_tx_count(&self, count: usize) {
        self.registers
            .pma_write(self.base + Self::COUNT_TX, count as u16);
    }

    pub fn rx_addr(&self) -> usize {
        self.registers.pma_read(self.base + Self::ADDR_RX) as usize
    }

    pub fn set_rx_addr(&self, offset: usize) {
        self.registers
            .pma_write(self.base + Self::ADDR_RX, offset as u16);
    }

    pub fn rx_count_register(&self) -> ReceiveCount {
        LocalRegisterCopy::new(self.registers.pma_read(self.base + Self::COUNT_RX))
    }

    /// Bytes in the last packet received on this endpoint.
    pub fn rx_count(&self) -> usize {
        self.rx_count_register().read(COUNT_RX::COUNT) as usize
    }

    /// Describe the receive buffer size to the hardware.
    pub fn set_rx_size(&self, size: usize) {
        self.registers
            .pma_write(self.base + Self::COUNT_RX, rx_count_encoding(size).get());
    }

    /// Point both directions at a transmit and receive buffer.
    pub fn program(&self, tx: Option<PmaBuffer>, rx: Option<PmaBuffer>) {
        if let Some(tx) = tx {
            self.set_tx_addr(tx.offset);
            self.set_tx_count(0);
        }
        if let Some(rx) = rx {
            self.set_rx_addr(rx.offset);
            self.set_rx_size(rx.size);
        }
    }

    pub fn clear(&self) {
        for field in [Self::ADDR_TX, Self::COUNT_TX, Self::ADDR_RX, Self::COUNT_RX] {
            self.registers.pma_write(self.base + field, 0);
        }
    }
}

/// Copy `data` into the PMA at `offset`, one half-word at a time. An odd
/// trailing byte is padded with zero in the high half.
pub fn copy_to_pma<P: UsbPeripheral>(registers: &P, offset: usize, data: &[u8]) {
    for (i, chunk) in data.chunks(2).enumerate() {
        let lo = chunk[0] as u16;
        let hi = chunk.get(1).map_or(0, |b| *b as u16);
        registers.pma_write(offset + 2 * i, lo | (hi << 8));
    }
}

/// Copy `buf.len()` bytes out of the PMA at `offset`, reading whole
/// half-words. The high byte of a trailing odd half-word is dropped.
pub fn copy_from_pma<P: UsbPeripheral>(registers: &P, offset: usize, buf: &mut [u8]) {
    for (i, chunk) in buf.chunks_mut(2).enumerate() {
        let word = registers.pma_read(offset + 2 * i);
        chunk[0] = word as u8;
        if let Some(hi) = chunk.get_mut(1) {
            *hi = (word >> 8) as u8;
        }
    }
}
