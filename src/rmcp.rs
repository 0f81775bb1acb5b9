//! A minimal RMCP / IPMI-session framing layer.
//!
//! spec.md §6 treats the real RMCP+/IPMI 2.0 codec — session key agreement,
//! the full authentication handshake, AES/HMAC payload encryption — as an
//! external collaborator supplied by a dedicated IPMI server library. This
//! crate has no such library to link against (DESIGN.md "what gets
//! dropped": `ipmi-rs` has no server-side API), so this module stands in
//! for it with just enough wire framing to carry requests in and responses
//! out over UDP: RMCP class/version header, ASF presence ping/pong (so
//! generic IPMI discovery tools see something alive on the port), and an
//! unauthenticated session envelope carrying `(session_id, sequence, netfn,
//! command, data)`. It is explicitly not a spec-complete IPMI 2.0 codec —
//! no RAKP handshake, no integrity/confidentiality payloads.

use crate::bmc::{IpmiRequest, IpmiResponse};

pub const RMCP_VERSION: u8 = 0x06;
const RMCP_CLASS_ASF: u8 = 0x06;
const RMCP_CLASS_IPMI: u8 = 0x07;
const RMCP_CLASS_SOL: u8 = 0x08;
const ASF_IANA_ENTERPRISE: [u8; 4] = [0x00, 0x00, 0x00, 0x00];
const ASF_MESSAGE_TYPE_PRESENCE_PING: u8 = 0x80;
const ASF_MESSAGE_TYPE_PRESENCE_PONG: u8 = 0x40;

pub enum IncomingDatagram {
    AsfPresencePing { message_tag: u8 },
    Ipmi(IpmiRequest),
    Sol { session_id: u32, data: Vec<u8> },
    Unrecognized,
}

/// Parses one UDP datagram into either an ASF presence ping or an IPMI
/// request. Malformed or unsupported datagrams decode to `Unrecognized`
/// rather than erroring, matching how an RMCP+ listener silently ignores
/// noise on the port.
pub fn parse_datagram(bytes: &[u8]) -> IncomingDatagram {
    if bytes.len() < 4 || bytes[0] != RMCP_VERSION {
        return IncomingDatagram::Unrecognized;
    }
    let class = bytes[3];
    let body = &bytes[4..];

    match class {
        RMCP_CLASS_ASF => parse_asf(body),
        RMCP_CLASS_IPMI => parse_ipmi_session(body),
        RMCP_CLASS_SOL => parse_sol(body),
        _ => IncomingDatagram::Unrecognized,
    }
}

/// Inbound SOL datagram: `session_id(4 LE) | data...` — the client→BMC half
/// of the serial shuttle (spec.md §4.6's `io_handler`). Mirrors the envelope
/// `encode_sol_payload` writes for the host→client half.
fn parse_sol(body: &[u8]) -> IncomingDatagram {
    if body.len() < 4 {
        return IncomingDatagram::Unrecognized;
    }
    let session_id = u32::from_le_bytes([body[0], body[1], body[2], body[3]]);
    IncomingDatagram::Sol {
        session_id,
        data: body[4..].to_vec(),
    }
}

fn parse_asf(body: &[u8]) -> IncomingDatagram {
    // IANA enterprise (4) + message type (1) + message tag (1) + reserved (1) + data len (1)
    if body.len() < 8 {
        return IncomingDatagram::Unrecognized;
    }
    let message_type = body[4];
    let message_tag = body[5];
    if message_type == ASF_MESSAGE_TYPE_PRESENCE_PING {
        IncomingDatagram::AsfPresencePing { message_tag }
    } else {
        IncomingDatagram::Unrecognized
    }
}

/// Unauthenticated session envelope: `auth_type(1=0x00) | session_id(4 LE) |
/// sequence(1) | netfn(1) | command(1) | data_len(1) | data...`.
fn parse_ipmi_session(body: &[u8]) -> IncomingDatagram {
    if body.len() < 8 {
        return IncomingDatagram::Unrecognized;
    }
    let session_id = u32::from_le_bytes([body[1], body[2], body[3], body[4]]);
    let sequence = body[5];
    let netfn = body[6];
    let command = body[7];
    let data_len = *body.get(8).unwrap_or(&0) as usize;
    let data = body.get(9..9 + data_len).unwrap_or(&[]).to_vec();

    IncomingDatagram::Ipmi(IpmiRequest {
        netfn,
        command,
        data,
        session_id,
        sequence,
    })
}

/// Builds the ASF presence pong reply to a presence ping.
pub fn encode_asf_pong(message_tag: u8) -> Vec<u8> {
    let mut out = vec![RMCP_VERSION, 0x00, 0xff, RMCP_CLASS_ASF];
    out.extend_from_slice(&ASF_IANA_ENTERPRISE);
    out.push(ASF_MESSAGE_TYPE_PRESENCE_PONG);
    out.push(message_tag);
    out.push(0x00); // reserved
    out.push(0x00); // data length (no optional fields)
    out
}

/// Wraps an [`IpmiResponse`] back into the same session envelope shape
/// `parse_ipmi_session` reads, so a retransmit and its replay round-trip
/// byte-identically (spec.md §8 invariant 1).
pub fn encode_ipmi_response(session_id: u32, sequence: u8, response: &IpmiResponse) -> Vec<u8> {
    let mut out = vec![RMCP_VERSION, 0x00, 0xff, RMCP_CLASS_IPMI];
    out.push(0x00); // auth type: none
    out.extend_from_slice(&session_id.to_le_bytes());
    out.push(sequence);
    out.push(response.code);
    out.push(response.data.len() as u8);
    out.extend_from_slice(&response.data);
    out
}

/// Wraps a chunk of relayed serial bytes for delivery back to the IPMI
/// client as an out-of-band SOL datagram (spec.md §4.6's "forward it to
/// the SOL channel").
pub fn encode_sol_payload(session_id: u32, data: &[u8]) -> Vec<u8> {
    let mut out = vec![RMCP_VERSION, 0x00, 0xff, RMCP_CLASS_SOL];
    out.extend_from_slice(&session_id.to_le_bytes());
    out.extend_from_slice(data);
    out
}
