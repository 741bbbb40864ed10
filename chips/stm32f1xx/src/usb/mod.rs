// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! STM32F10x USB full-speed device controller.
//!
//! The driver owns the packet memory area, the buffer descriptor table and
//! the endpoint registers. The class layer (descriptors, standard requests)
//! sits above it: it configures endpoints, moves packets with
//! [`Usb::read_endpoint`] and [`Usb::write_endpoint`], and receives
//! completions through [`EndpointClient`] and bus events through
//! [`BusClient`].
//!
//! Usage:
//!
//! ```ignore
//! // Both live for the rest of the board's `main`.
//! let registers = unsafe { UsbRegisterBlock::stm32f10x() };
//! let usb = Usb::new(&registers, Config::DEFAULT);
//! usb.set_endpoint_client(0, control)?;
//! usb.initialize()?;
//! usb.connect(true)?;
//! // USB_LP_CAN1_RX0 interrupt:
//! usb.handle_interrupt();
//! ```
//!
//! Configuration happens before connecting and from client callbacks;
//! transfers only from client callbacks. The driver does no locking of its
//! own.
//!
//! Only single-buffered endpoints are supported.

pub mod client;
pub mod config;
pub mod debug;
pub mod endpoint;
pub mod pma;
pub mod registers;

#[cfg(test)]
mod fake;

use core::cell::Cell;

use log::{debug, trace, warn};
use tock_registers::fields::Field;
use tock_registers::LocalRegisterCopy;

pub use self::client::{BusClient, EndpointClient, EndpointEvent, ErrorKind, NoClient};
pub use self::config::Config;
pub use self::endpoint::{Direction, EndpointAddress, EndpointStatus, TransferType};
pub use self::registers::{UsbPeripheral, UsbRegisterBlock, NUM_ENDPOINTS};

use self::client::NO_CLIENT;
use self::debug::{EprFlags, HexBuf, IstrFlags};
use self::pma::{BufferDescriptor, PacketMemoryAllocator, PmaBuffer, BTABLE_OFFSET};
use self::registers::{CNTR, DADDR, EPR, FNR, ISTR};
use crate::ErrorCode;

/// Largest max packet size a full-speed endpoint can declare.
const MAX_PACKET_SIZE: u16 = 1023;

/// Device state as seen by the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceState {
    /// `initialize()` has not been called.
    PoweredOff,
    /// Powered, not signalling presence on the bus.
    Detached,
    /// Connected, waiting for the host's first bus reset.
    AwaitingReset,
    /// Reset by the host, answering on address 0.
    Default,
    /// Answering on the address assigned by the host.
    Addressed,
    /// A configuration has been selected.
    Configured,
}

/// The fields of a standard USB endpoint descriptor this driver needs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EndpointDescriptor {
    pub address: EndpointAddress,
    pub transfer_type: TransferType,
    pub max_packet_size: u16,
}

impl EndpointDescriptor {
    const LENGTH: usize = 7;
    const DESCRIPTOR_TYPE: u8 = 0x05;

    pub const fn new(
        address: EndpointAddress,
        transfer_type: TransferType,
        max_packet_size: u16,
    ) -> Self {
        EndpointDescriptor {
            address,
            transfer_type,
            max_packet_size,
        }
    }

    /// Parse a raw endpoint descriptor, as found in a configuration
    /// descriptor.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ErrorCode> {
        if bytes.len() < Self::LENGTH
            || (bytes[0] as usize) < Self::LENGTH
            || bytes[1] != Self::DESCRIPTOR_TYPE
        {
            return Err(ErrorCode::INVAL);
        }
        let max_packet_size = u16::from_le_bytes([bytes[4], bytes[5]]) & 0x07FF;
        Ok(EndpointDescriptor {
            address: EndpointAddress::from_raw(bytes[2]),
            transfer_type: TransferType::from_attributes(bytes[3]),
            max_packet_size,
        })
    }
}

/// Buffers and type assigned to one endpoint register since the last bus
/// reset.
struct Endpoint {
    transfer_type: Cell<Option<TransferType>>,
    tx: Cell<Option<PmaBuffer>>,
    rx: Cell<Option<PmaBuffer>>,
}

impl Endpoint {
    const fn new() -> Self {
        Endpoint {
            transfer_type: Cell::new(None),
            tx: Cell::new(None),
            rx: Cell::new(None),
        }
    }

    fn clear(&self) {
        self.transfer_type.set(None);
        self.tx.set(None);
        self.rx.set(None);
    }

    fn buffer(&self, direction: Direction) -> Option<PmaBuffer> {
        match direction {
            Direction::In => self.tx.get(),
            Direction::Out => self.rx.get(),
        }
    }
}

pub struct Usb<'a, P: UsbPeripheral> {
    registers: &'a P,
    config: Config,
    state: Cell<DeviceState>,
    suspended: Cell<bool>,
    pma: PacketMemoryAllocator,
    endpoints: [Endpoint; NUM_ENDPOINTS],
    clients: [Cell<&'a dyn EndpointClient>; NUM_ENDPOINTS],
    bus_client: Cell<&'a dyn BusClient>,
}

impl<'a, P: UsbPeripheral> Usb<'a, P> {
    pub fn new(registers: &'a P, config: Config) -> Self {
        Usb {
            registers,
            config,
            state: Cell::new(DeviceState::PoweredOff),
            suspended: Cell::new(false),
            pma: PacketMemoryAllocator::new(),
            endpoints: [const { Endpoint::new() }; NUM_ENDPOINTS],
            clients: core::array::from_fn(|_| Cell::new(&NO_CLIENT as &dyn EndpointClient)),
            bus_client: Cell::new(&NO_CLIENT),
        }
    }

    pub fn set_endpoint_client(
        &self,
        endpoint: usize,
        client: &'a dyn EndpointClient,
    ) -> Result<(), ErrorCode> {
        let slot = self.clients.get(endpoint).ok_or(ErrorCode::INVAL)?;
        slot.set(client);
        Ok(())
    }

    pub fn set_bus_client(&self, client: &'a dyn BusClient) {
        self.bus_client.set(client);
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> DeviceState {
        self.state.get()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended.get()
    }

    /// Bring the transceiver out of power down. The peripheral clock and the
    /// interrupt line must already be enabled by the board.
    pub fn initialize(&self) -> Result<(), ErrorCode> {
        if !self.config.is_valid() {
            warn!("usb: invalid control packet size {}", self.config.max_packet0);
            return Err(ErrorCode::INVAL);
        }
        if self.state.get() != DeviceState::PoweredOff {
            return Err(ErrorCode::ALREADY);
        }

        // Leave power down but hold the peripheral in reset.
        self.registers
            .set_cntr(LocalRegisterCopy::new(CNTR::FRES::SET.value));
        self.registers.startup_delay();
        self.registers.set_istr(LocalRegisterCopy::new(0));

        self.state.set(DeviceState::Detached);
        debug!("usb: initialized");
        Ok(())
    }

    /// Attach to or detach from the bus. Driving the D+ pull-up, where the
    /// board has a switchable one, is up to the board.
    pub fn connect(&self, enable: bool) -> Result<(), ErrorCode> {
        if self.state.get() == DeviceState::PoweredOff {
            return Err(ErrorCode::OFF);
        }

        self.registers
            .set_cntr(LocalRegisterCopy::new(CNTR::FRES::SET.value));
        self.registers.set_istr(LocalRegisterCopy::new(0));
        if enable {
            self.registers
                .set_cntr(LocalRegisterCopy::new(CNTR::RESETM::SET.value));
            self.state.set(DeviceState::AwaitingReset);
        } else {
            self.registers.set_cntr(LocalRegisterCopy::new(
                (CNTR::FRES::SET + CNTR::LP_MODE::SET + CNTR::FSUSP::SET).value,
            ));
            self.state.set(DeviceState::Detached);
        }
        self.suspended.set(false);
        debug!("usb: {}", if enable { "connected" } else { "disconnected" });
        Ok(())
    }

    /// Answer on `address` from now on. Called by the class layer once the
    /// status stage of SET_ADDRESS has completed.
    pub fn set_address(&self, address: u8) -> Result<(), ErrorCode> {
        if address > 127 {
            return Err(ErrorCode::INVAL);
        }
        match self.state.get() {
            DeviceState::Default | DeviceState::Addressed => {}
            DeviceState::Configured => return Err(ErrorCode::INVAL),
            _ => return Err(ErrorCode::OFF),
        }

        self.registers.set_daddr(LocalRegisterCopy::new(
            (DADDR::EF::SET + DADDR::ADD.val(address as u32)).value,
        ));
        self.state.set(if address == 0 {
            DeviceState::Default
        } else {
            DeviceState::Addressed
        });
        debug!("usb: address {}", address);
        Ok(())
    }

    /// Record that the host selected (`true`) or cleared (`false`) a
    /// configuration.
    pub fn configure(&self, configured: bool) -> Result<(), ErrorCode> {
        match self.state.get() {
            DeviceState::Addressed | DeviceState::Configured => {
                self.state.set(if configured {
                    DeviceState::Configured
                } else {
                    DeviceState::Addressed
                });
                debug!("usb: configured={}", configured);
                Ok(())
            }
            DeviceState::Default => Err(ErrorCode::INVAL),
            _ => Err(ErrorCode::OFF),
        }
    }

    /// Assign packet memory to one direction of an endpoint and program its
    /// type. Endpoint 0 is set up by bus reset and cannot be configured here.
    pub fn configure_endpoint(&self, descriptor: &EndpointDescriptor) -> Result<(), ErrorCode> {
        let index = descriptor.address.index()?;
        if index == 0 {
            return Err(ErrorCode::INVAL);
        }
        match self.state.get() {
            DeviceState::Default | DeviceState::Addressed | DeviceState::Configured => {}
            _ => return Err(ErrorCode::OFF),
        }
        if self.config.is_double_buffered(index) {
            warn!("usb: ep{} requests double buffering, not supported", index);
            return Err(ErrorCode::NOSUPPORT);
        }
        if descriptor.transfer_type == TransferType::Isochronous {
            // The peripheral always double-buffers isochronous endpoints.
            warn!("usb: ep{} is isochronous, not supported", index);
            return Err(ErrorCode::NOSUPPORT);
        }
        if descriptor.max_packet_size == 0 || descriptor.max_packet_size > MAX_PACKET_SIZE {
            return Err(ErrorCode::INVAL);
        }
        let endpoint = &self.endpoints[index];
        if let Some(existing) = endpoint.transfer_type.get() {
            // Both directions share the type field of the register.
            if existing != descriptor.transfer_type {
                return Err(ErrorCode::INVAL);
            }
        }

        let buffer = match self.pma.allocate(descriptor.max_packet_size as usize) {
            Ok(buffer) => buffer,
            Err(err) => {
                warn!("usb: packet memory exhausted configuring ep{}", index);
                return Err(err);
            }
        };
        let entry = BufferDescriptor::new(self.registers, index);
        match descriptor.address.direction() {
            Direction::In => {
                entry.program(Some(buffer), None);
                endpoint.tx.set(Some(buffer));
            }
            Direction::Out => {
                entry.program(None, Some(buffer));
                endpoint.rx.set(Some(buffer));
            }
        }
        endpoint::configure(self.registers, index, descriptor.transfer_type, false);
        endpoint.transfer_type.set(Some(descriptor.transfer_type));

        debug!(
            "usb: ep{:#04x} {:?} at {:#05x}+{}",
            descriptor.address.raw(),
            descriptor.transfer_type,
            buffer.offset,
            buffer.size
        );
        Ok(())
    }

    /// Start handshaking on an endpoint: OUT accepts packets, IN NAKs until
    /// a packet is written.
    pub fn enable_endpoint(&self, address: EndpointAddress) -> Result<(), ErrorCode> {
        let index = self.configured_index(address)?;
        let status = match address.direction() {
            Direction::Out => EndpointStatus::Valid,
            Direction::In => EndpointStatus::Nak,
        };
        endpoint::set_status(self.registers, index, address.direction(), status);
        Ok(())
    }

    pub fn disable_endpoint(&self, address: EndpointAddress) -> Result<(), ErrorCode> {
        let index = address.index()?;
        endpoint::set_status(
            self.registers,
            index,
            address.direction(),
            EndpointStatus::Disabled,
        );
        Ok(())
    }

    /// Reset the data toggle of an endpoint to DATA0.
    pub fn reset_endpoint(&self, address: EndpointAddress) -> Result<(), ErrorCode> {
        let index = address.index()?;
        endpoint::reset_toggle(self.registers, index, address.direction());
        Ok(())
    }

    pub fn stall_endpoint(&self, address: EndpointAddress) -> Result<(), ErrorCode> {
        let index = address.index()?;
        endpoint::set_status(
            self.registers,
            index,
            address.direction(),
            EndpointStatus::Stall,
        );
        Ok(())
    }

    /// Leave the halt condition. The data toggle restarts at DATA0.
    pub fn clear_stall(&self, address: EndpointAddress) -> Result<(), ErrorCode> {
        let index = address.index()?;
        endpoint::reset_toggle(self.registers, index, address.direction());
        let status = match address.direction() {
            Direction::Out => EndpointStatus::Valid,
            Direction::In => EndpointStatus::Nak,
        };
        endpoint::set_status(self.registers, index, address.direction(), status);
        Ok(())
    }

    pub fn endpoint_status(&self, address: EndpointAddress) -> Result<EndpointStatus, ErrorCode> {
        let index = address.index()?;
        Ok(endpoint::status(
            self.registers.epr(index),
            address.direction(),
        ))
    }

    /// Copy the last packet received on an endpoint into `buf` and accept
    /// the next one. Returns the packet length.
    ///
    /// If `buf` is too short nothing is copied, the endpoint keeps NAKing
    /// and the packet stays available. `address` must be an OUT address.
    pub fn read_endpoint(&self, address: EndpointAddress, buf: &mut [u8]) -> Result<usize, ErrorCode> {
        let index = address.index()?;
        if address.direction() != Direction::Out || self.endpoints[index].rx.get().is_none() {
            return Err(ErrorCode::INVAL);
        }
        let entry = BufferDescriptor::new(self.registers, index);
        let count = entry.rx_count();
        if count > buf.len() {
            return Err(ErrorCode::SIZE);
        }

        pma::copy_from_pma(self.registers, entry.rx_addr(), &mut buf[..count]);
        trace!("usb: ep{} out {:?}", index, HexBuf(&buf[..count]));
        endpoint::set_status(self.registers, index, Direction::Out, EndpointStatus::Valid);
        Ok(count)
    }

    /// Queue `data` as the next IN packet of an endpoint. Returns the number
    /// of bytes queued. Completion is reported later as
    /// [`EndpointEvent::In`].
    pub fn write_endpoint(&self, address: EndpointAddress, data: &[u8]) -> Result<usize, ErrorCode> {
        let index = address.index()?;
        if address.direction() != Direction::In {
            return Err(ErrorCode::INVAL);
        }
        let tx = self.endpoints[index].tx.get().ok_or(ErrorCode::INVAL)?;
        if data.len() > tx.size {
            return Err(ErrorCode::SIZE);
        }

        let entry = BufferDescriptor::new(self.registers, index);
        pma::copy_to_pma(self.registers, entry.tx_addr(), data);
        entry.set_tx_count(data.len());
        trace!("usb: ep{} in {:?}", index, HexBuf(data));
        endpoint::set_status(self.registers, index, Direction::In, EndpointStatus::Valid);
        Ok(data.len())
    }

    /// Number of the last start-of-frame seen on the bus.
    pub fn frame_number(&self) -> u16 {
        self.registers.fnr().read(FNR::FN) as u16
    }

    /// Service the USB low-priority interrupt.
    ///
    /// Bus events are handled and acknowledged one at a time from a single
    /// ISTR snapshot, then endpoint completions are drained until the
    /// hardware reports none pending.
    pub fn handle_interrupt(&self) {
        let istr = self.registers.istr();
        trace!("usb: irq {:?}", IstrFlags(istr.get()));

        if istr.is_set(ISTR::RESET) {
            self.bus_reset();
            if self.config.reset_event {
                self.bus_client.get().bus_reset();
            }
            self.acknowledge(ISTR::RESET);
        }

        if istr.is_set(ISTR::SUSP) {
            self.suspend();
            if self.config.suspend_event {
                self.bus_client.get().suspend();
            }
            self.acknowledge(ISTR::SUSP);
        }

        if istr.is_set(ISTR::WKUP) {
            self.wakeup();
            if self.config.wakeup_event {
                self.bus_client.get().wakeup();
            }
            self.acknowledge(ISTR::WKUP);
        }

        if istr.is_set(ISTR::SOF) {
            if self.config.sof_event {
                self.bus_client.get().start_of_frame(self.frame_number());
            }
            self.acknowledge(ISTR::SOF);
        }

        if self.config.error_event {
            if istr.is_set(ISTR::PMAOVR) {
                warn!("usb: packet memory overrun");
                self.bus_client
                    .get()
                    .error(ErrorKind::PacketMemoryOverrun);
                self.acknowledge(ISTR::PMAOVR);
            }

            if istr.is_set(ISTR::ERR) {
                warn!("usb: bus error");
                self.bus_client.get().error(ErrorKind::Bus);
                self.acknowledge(ISTR::ERR);
            }
        }

        self.drain_transfers();
    }

    fn drain_transfers(&self) {
        loop {
            let istr = self.registers.istr();
            if !istr.is_set(ISTR::CTR) {
                break;
            }
            self.acknowledge(ISTR::CTR);

            let index = istr.read(ISTR::EP_ID) as usize;
            if index >= NUM_ENDPOINTS {
                warn!("usb: completion on missing endpoint {}", index);
                break;
            }

            let epr = self.registers.epr(index);
            trace!("usb: ep{} {:?}", index, EprFlags(epr.get()));
            let client = self.clients[index].get();

            if epr.is_set(EPR::CTR_RX) {
                endpoint::clear_ctr_rx(self.registers, index, epr);
                let event = if epr.is_set(EPR::SETUP) {
                    EndpointEvent::Setup
                } else {
                    EndpointEvent::Out
                };
                client.endpoint_event(index, event);
            }

            if epr.is_set(EPR::CTR_TX) {
                endpoint::clear_ctr_tx(self.registers, index, epr);
                client.endpoint_event(index, EndpointEvent::In);
            }
        }
    }

    /// Clear one ISTR flag. The flags are cleared by writing 0 and held by
    /// writing 1, so every other flag is written as 1.
    fn acknowledge(&self, flag: Field<u32, ISTR::Register>) {
        self.registers
            .set_istr(LocalRegisterCopy::new(!(flag.mask << flag.shift)));
    }

    fn interrupt_mask(&self) -> u32 {
        let mut mask = CNTR::CTRM::SET + CNTR::RESETM::SET;
        if self.config.suspend_event {
            mask += CNTR::SUSPM::SET;
        }
        if self.config.wakeup_event {
            mask += CNTR::WKUPM::SET;
        }
        if self.config.error_event {
            mask += CNTR::ERRM::SET + CNTR::PMAOVRM::SET;
        }
        if self.config.sof_event {
            mask += CNTR::SOFM::SET;
        }
        mask.value
    }

    /// The host reset the bus: everything but the interrupt enables is
    /// rebuilt from scratch and endpoint 0 is made ready for SETUP.
    fn bus_reset(&self) {
        self.registers
            .set_cntr(LocalRegisterCopy::new(self.interrupt_mask()));

        self.pma.reset();
        self.registers.set_btable(BTABLE_OFFSET as u16);
        for (index, endpoint) in self.endpoints.iter().enumerate() {
            endpoint.clear();
            BufferDescriptor::new(self.registers, index).clear();
        }
        for index in 1..NUM_ENDPOINTS {
            endpoint::set_status(self.registers, index, Direction::Out, EndpointStatus::Disabled);
            endpoint::set_status(self.registers, index, Direction::In, EndpointStatus::Disabled);
        }

        let max_packet0 = self.config.max_packet0 as usize;
        let buffers = self
            .pma
            .allocate(max_packet0)
            .and_then(|tx| self.pma.allocate(max_packet0).map(|rx| (tx, rx)));
        match buffers {
            Ok((tx, rx)) => {
                BufferDescriptor::new(self.registers, 0).program(Some(tx), Some(rx));
                let ep0 = &self.endpoints[0];
                ep0.tx.set(Some(tx));
                ep0.rx.set(Some(rx));
                ep0.transfer_type.set(Some(TransferType::Control));

                endpoint::configure(self.registers, 0, TransferType::Control, false);
                endpoint::reset_toggle(self.registers, 0, Direction::Out);
                endpoint::reset_toggle(self.registers, 0, Direction::In);
                endpoint::set_status(self.registers, 0, Direction::Out, EndpointStatus::Valid);
                endpoint::set_status(self.registers, 0, Direction::In, EndpointStatus::Nak);
            }
            Err(err) => warn!("usb: no packet memory for ep0: {}", err),
        }

        self.registers
            .set_daddr(LocalRegisterCopy::new(DADDR::EF::SET.value));
        self.state.set(DeviceState::Default);
        self.suspended.set(false);
        debug!("usb: bus reset");
    }

    fn suspend(&self) {
        // FSUSP must be set before LP_MODE.
        let mut cntr = self.registers.cntr();
        cntr.modify(CNTR::FSUSP::SET);
        self.registers.set_cntr(cntr);
        cntr.modify(CNTR::LP_MODE::SET);
        self.registers.set_cntr(cntr);

        self.suspended.set(true);
        debug!("usb: suspend");
    }

    fn wakeup(&self) {
        // LP_MODE is cleared by the hardware on wakeup.
        let mut cntr = self.registers.cntr();
        cntr.modify(CNTR::FSUSP::CLEAR);
        self.registers.set_cntr(cntr);

        self.suspended.set(false);
        debug!("usb: wakeup");
    }

    fn configured_index(&self, address: EndpointAddress) -> Result<usize, ErrorCode> {
        let index = address.index()?;
        self.endpoints[index]
            .buffer(address.direction())
            .map(|_| index)
            .ok_or(ErrorCode::INVAL)
    }
}
