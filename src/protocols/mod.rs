//! Industrial protocol parsing.
//!
//! Only Modbus/TCP gets a full parser; DNP3, IEC-104, and OPC-UA traffic is
//! tagged by port and passed through the behavioral rules untouched.

pub mod modbus;
