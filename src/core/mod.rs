//! Core data model shared by every subsystem.

pub mod alert;
pub mod packet;

pub use alert::{AttackKind, Severity, ThreatAlert};
pub use packet::{Decision, FunctionKind, ModbusFields, PacketInput, PacketMetadata, ProtocolKind};
