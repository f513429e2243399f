//! Modbus/TCP frame parser
//!
//! Stateless and side-effect-free: the same bytes always produce the same
//! result. A constraint violation marks the frame malformed but keeps every
//! field that was extractable, so the analyzer still sees partial context.
//!
//! Frame layout (big-endian):
//! ```text
//! 0..2   transaction id
//! 2..4   protocol id (must be 0)
//! 4..6   length (bytes remaining after this field)
//! 6      unit id
//! 7      function code
//! 8..10  register address
//! 10..12 register count
//! ```

use crate::core::packet::{FunctionKind, ModbusFields};

/// MBAP header (7 bytes) plus the shortest useful PDU.
pub const MIN_FRAME_LEN: usize = 12;

/// Function codes that read process data.
pub const READ_FUNCTIONS: &[u8] = &[1, 2, 3, 4];
/// Function codes that write coils or registers.
pub const WRITE_FUNCTIONS: &[u8] = &[5, 6, 15, 16, 22, 23];
/// Diagnostic and device-identification function codes.
pub const DIAGNOSTIC_FUNCTIONS: &[u8] = &[7, 8, 11, 12, 17];

/// Exception responses set the top bit of the echoed function code.
const EXCEPTION_BIT: u8 = 0x80;

/// Result of parsing one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModbusParse {
    /// Extracted fields, absent only when the buffer is too short to carry
    /// even the MBAP header.
    pub fields: Option<ModbusFields>,
    pub malformed: bool,
}

/// Classify a raw function code.
pub fn classify_function(code: u8) -> FunctionKind {
    if code & EXCEPTION_BIT != 0 {
        return FunctionKind::Exception;
    }
    if READ_FUNCTIONS.contains(&code) {
        FunctionKind::Read
    } else if WRITE_FUNCTIONS.contains(&code) {
        FunctionKind::Write
    } else if DIAGNOSTIC_FUNCTIONS.contains(&code) {
        FunctionKind::Diagnostic
    } else {
        FunctionKind::Other
    }
}

#[inline]
fn be_u16(payload: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([payload[at], payload[at + 1]])
}

/// Parse a Modbus/TCP frame.
///
/// `src_port` decides response direction: replies come from the server side
/// of the conversation (port 502).
pub fn parse(payload: &[u8], src_port: u16) -> ModbusParse {
    if payload.len() < 8 {
        // Not even a full header; nothing worth extracting.
        return ModbusParse {
            fields: None,
            malformed: true,
        };
    }

    let mut malformed = payload.len() < MIN_FRAME_LEN;

    let transaction_id = be_u16(payload, 0);
    let protocol_id = be_u16(payload, 2);
    let length = be_u16(payload, 4);
    let unit_id = payload[6];
    let function_code = payload[7];

    if protocol_id != 0 {
        malformed = true;
    }
    // Length field counts everything after itself (unit id onward).
    if length as usize != payload.len() - 6 {
        malformed = true;
    }

    let function = classify_function(function_code);
    let has_exception = function == FunctionKind::Exception;

    let (register_address, register_count) = if payload.len() >= MIN_FRAME_LEN {
        (be_u16(payload, 8), be_u16(payload, 10))
    } else {
        (0, 0)
    };

    ModbusParse {
        fields: Some(ModbusFields {
            transaction_id,
            unit_id,
            function_code,
            function,
            register_address,
            register_count,
            is_response: src_port == 502 || has_exception,
            has_exception,
        }),
        malformed,
    }
}

/// Build a well-formed request frame. Test and traffic-generation helper.
pub fn build_frame(
    transaction_id: u16,
    unit_id: u8,
    function_code: u8,
    register_address: u16,
    register_count: u16,
) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MIN_FRAME_LEN);
    frame.extend_from_slice(&transaction_id.to_be_bytes());
    frame.extend_from_slice(&0u16.to_be_bytes());
    frame.extend_from_slice(&6u16.to_be_bytes());
    frame.push(unit_id);
    frame.push(function_code);
    frame.extend_from_slice(&register_address.to_be_bytes());
    frame.extend_from_slice(&register_count.to_be_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_read_holding_registers() {
        let frame = build_frame(0x0001, 1, 3, 100, 10);
        let parsed = parse(&frame, 49152);
        assert!(!parsed.malformed);
        let fields = parsed.fields.unwrap();
        assert_eq!(fields.transaction_id, 1);
        assert_eq!(fields.unit_id, 1);
        assert_eq!(fields.function_code, 3);
        assert_eq!(fields.function, FunctionKind::Read);
        assert_eq!(fields.register_address, 100);
        assert_eq!(fields.register_count, 10);
        assert!(!fields.is_response);
        assert!(!fields.has_exception);
    }

    #[test]
    fn test_parse_is_pure() {
        let frame = build_frame(7, 2, 16, 40001, 4);
        assert_eq!(parse(&frame, 1234), parse(&frame, 1234));
        let garbage = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03];
        assert_eq!(parse(&garbage, 502), parse(&garbage, 502));
    }

    #[test]
    fn test_short_buffer_is_malformed() {
        let parsed = parse(&[0x00, 0x01, 0x00, 0x00, 0x00], 502);
        assert!(parsed.malformed);
        assert!(parsed.fields.is_none());
    }

    #[test]
    fn test_header_only_keeps_partial_fields() {
        // 8 bytes: header through function code, no register fields.
        let parsed = parse(&[0x00, 0x05, 0x00, 0x00, 0x00, 0x02, 0x11, 0x03], 49152);
        assert!(parsed.malformed);
        let fields = parsed.fields.unwrap();
        assert_eq!(fields.transaction_id, 5);
        assert_eq!(fields.unit_id, 0x11);
        assert_eq!(fields.function, FunctionKind::Read);
        assert_eq!(fields.register_address, 0);
    }

    #[test]
    fn test_nonzero_protocol_id_is_malformed() {
        let mut frame = build_frame(1, 1, 3, 0, 1);
        frame[2] = 0xff;
        let parsed = parse(&frame, 49152);
        assert!(parsed.malformed);
        // Fields still extracted.
        assert_eq!(parsed.fields.unwrap().function_code, 3);
    }

    #[test]
    fn test_length_mismatch_is_malformed() {
        let mut frame = build_frame(1, 1, 3, 0, 1);
        frame[5] = 99;
        assert!(parse(&frame, 49152).malformed);
    }

    #[test]
    fn test_exception_response() {
        let frame = build_frame(9, 1, 0x83, 0, 0);
        let parsed = parse(&frame, 502);
        assert!(!parsed.malformed);
        let fields = parsed.fields.unwrap();
        assert_eq!(fields.function, FunctionKind::Exception);
        assert!(fields.has_exception);
        assert!(fields.is_response);
    }

    #[test]
    fn test_function_classification() {
        for code in READ_FUNCTIONS {
            assert_eq!(classify_function(*code), FunctionKind::Read);
        }
        for code in WRITE_FUNCTIONS {
            assert_eq!(classify_function(*code), FunctionKind::Write);
        }
        for code in DIAGNOSTIC_FUNCTIONS {
            assert_eq!(classify_function(*code), FunctionKind::Diagnostic);
        }
        assert_eq!(classify_function(0x2b), FunctionKind::Other);
        assert_eq!(classify_function(0x81), FunctionKind::Exception);
    }

    #[test]
    fn test_response_direction_from_server_port() {
        let frame = build_frame(1, 1, 3, 0, 1);
        assert!(parse(&frame, 502).fields.unwrap().is_response);
        assert!(!parse(&frame, 49152).fields.unwrap().is_response);
    }
}
