//! Raw-packet TCP reassembly capture backend. See spec section 4.6.
//!
//! Listens on a network interface via libpcap, reassembles TCP flows
//! into byte-exact HTTP messages, and emits them as a [`sidecast_core::Input`].

mod flow;
mod reassembler;
mod sniffer;

pub use flow::{Flow, FlowKey, FlowState};
pub use reassembler::{RawCaptureInput, ReassemblerConfig};
pub use sniffer::RawPacket;
