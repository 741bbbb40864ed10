// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright Tock Contributors 2026.

//! Interfaces the USB class layer implements to receive events from the
//! device driver.

/// Transfer completion on an endpoint.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EndpointEvent {
    /// A SETUP packet was received on a control endpoint.
    Setup,
    /// An OUT packet was received.
    Out,
    /// An IN packet was sent and acknowledged.
    In,
}

/// Kind of error reported by the peripheral.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// No answer, CRC, bit stuffing or frame format error.
    Bus,
    /// The peripheral could not access packet memory in time.
    PacketMemoryOverrun,
}

/// Receives transfer completions for one endpoint.
///
/// Called from interrupt context. The client typically reads the received
/// packet with `read_endpoint` (which re-arms reception) or queues the next
/// packet with `write_endpoint`.
pub trait EndpointClient {
    fn endpoint_event(&self, endpoint: usize, event: EndpointEvent);
}

/// Receives bus-level events. Each is only delivered if enabled in the
/// driver's [`super::Config`].
pub trait BusClient {
    fn bus_reset(&self) {}
    fn suspend(&self) {}
    fn wakeup(&self) {}
    fn start_of_frame(&self, _frame: u16) {}
    fn error(&self, _kind: ErrorKind) {}
}

/// Client installed on every endpoint and on the bus until the class layer
/// provides its own.
pub struct NoClient;

impl EndpointClient for NoClient {
    fn endpoint_event(&self, _endpoint: usize, _event: EndpointEvent) {}
}

impl BusClient for NoClient {}

pub(crate) static NO_CLIENT: NoClient = NoClient;
