//! Packet input and parsed metadata.

use std::net::Ipv4Addr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Verdict for a processed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Allow,
    Drop,
}

impl Decision {
    pub fn is_allowed(self) -> bool {
        self == Decision::Allow
    }
}

/// Industrial protocol carried by a packet, classified by port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolKind {
    ModbusTcp,
    Dnp3,
    Iec104,
    OpcUa,
    Unknown,
}

impl ProtocolKind {
    /// Classify by the well-known port seen on either side.
    pub fn from_port(src_port: u16, dst_port: u16) -> Self {
        let hit = |p: u16| src_port == p || dst_port == p;
        if hit(502) {
            ProtocolKind::ModbusTcp
        } else if hit(20000) {
            ProtocolKind::Dnp3
        } else if hit(2404) {
            ProtocolKind::Iec104
        } else if hit(4840) {
            ProtocolKind::OpcUa
        } else {
            ProtocolKind::Unknown
        }
    }
}

/// Modbus function code class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKind {
    Read,
    Write,
    Diagnostic,
    Exception,
    Other,
}

impl Default for FunctionKind {
    fn default() -> Self {
        FunctionKind::Other
    }
}

/// Fields extracted from a Modbus/TCP frame. Populated best-effort; a
/// malformed frame keeps whatever was extractable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModbusFields {
    pub transaction_id: u16,
    pub unit_id: u8,
    pub function_code: u8,
    pub function: FunctionKind,
    pub register_address: u16,
    pub register_count: u16,
    pub is_response: bool,
    pub has_exception: bool,
}

/// Raw packet handed to the engine by the capture layer.
#[derive(Debug, Clone)]
pub struct PacketInput {
    pub payload: Vec<u8>,
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    /// Monotonic arrival instant. All window and expiry arithmetic keys off
    /// this, not wall time.
    pub received_at: Instant,
}

impl PacketInput {
    pub fn new(
        payload: Vec<u8>,
        src_addr: Ipv4Addr,
        dst_addr: Ipv4Addr,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        Self {
            payload,
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            received_at: Instant::now(),
        }
    }

    /// Override the arrival instant (testing and replay).
    pub fn with_received_at(mut self, at: Instant) -> Self {
        self.received_at = at;
        self
    }
}

/// Metadata derived from a packet. For unmonitored ports this is minimal
/// (addresses and size only).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketMetadata {
    pub src_addr: Ipv4Addr,
    pub dst_addr: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: ProtocolKind,
    pub packet_size: usize,
    pub is_malformed: bool,
    pub modbus: Option<ModbusFields>,
}

impl PacketMetadata {
    /// Minimal metadata for traffic on unmonitored ports.
    pub fn minimal(input: &PacketInput) -> Self {
        Self {
            src_addr: input.src_addr,
            dst_addr: input.dst_addr,
            src_port: input.src_port,
            dst_port: input.dst_port,
            protocol: ProtocolKind::Unknown,
            packet_size: input.payload.len(),
            is_malformed: false,
            modbus: None,
        }
    }

    pub fn function(&self) -> FunctionKind {
        self.modbus.map(|m| m.function).unwrap_or(FunctionKind::Other)
    }

    pub fn is_exception_response(&self) -> bool {
        self.modbus.map(|m| m.has_exception).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_from_port() {
        assert_eq!(ProtocolKind::from_port(49152, 502), ProtocolKind::ModbusTcp);
        assert_eq!(ProtocolKind::from_port(502, 49152), ProtocolKind::ModbusTcp);
        assert_eq!(ProtocolKind::from_port(49152, 20000), ProtocolKind::Dnp3);
        assert_eq!(ProtocolKind::from_port(49152, 2404), ProtocolKind::Iec104);
        assert_eq!(ProtocolKind::from_port(49152, 4840), ProtocolKind::OpcUa);
        assert_eq!(ProtocolKind::from_port(49152, 8080), ProtocolKind::Unknown);
    }

    #[test]
    fn test_minimal_metadata() {
        let input = PacketInput::new(
            vec![0u8; 64],
            Ipv4Addr::new(192, 168, 1, 10),
            Ipv4Addr::new(192, 168, 1, 100),
            49152,
            8080,
        );
        let meta = PacketMetadata::minimal(&input);
        assert_eq!(meta.packet_size, 64);
        assert_eq!(meta.protocol, ProtocolKind::Unknown);
        assert!(!meta.is_malformed);
        assert!(meta.modbus.is_none());
    }
}
