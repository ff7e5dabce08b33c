//! Sniffing the first bytes a new client sends.

use crate::protocols::websocket::handshake::{HEADER_TERMINATOR, KEY3_LEN, MAX_HEADER_LEN};
use crate::util::find_ignore_case;

pub const POLICY_REQUEST: &[u8] = b"<policy-file-request/>\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    NeedMore,
    Handshake,
    PolicyRequest,
    HeadersTooLarge,
    Unknown,
}

pub fn detect(prebuf: &[u8]) -> Detection {
    if prebuf.starts_with(b"GET ") {
        return match find_ignore_case(prebuf, HEADER_TERMINATOR) {
            None if prebuf.len() > MAX_HEADER_LEN => Detection::HeadersTooLarge,
            None => Detection::NeedMore,
            Some(at) if at + HEADER_TERMINATOR.len() > MAX_HEADER_LEN => Detection::HeadersTooLarge,
            // Terminator plus the 8 key bytes that follow it.
            Some(at) if prebuf.len() - at < HEADER_TERMINATOR.len() + KEY3_LEN => Detection::NeedMore,
            Some(_) => Detection::Handshake,
        };
    }

    if prebuf.len() < POLICY_REQUEST.len() {
        return Detection::NeedMore;
    }
    if prebuf.starts_with(POLICY_REQUEST) {
        return Detection::PolicyRequest;
    }
    Detection::Unknown
}

/// Flash cross-domain policy allowing sockets to `port`.
pub fn policy_document(port: u16) -> String {
    format!(
        "<?xml version=\"1.0\"?>\n\
         <!DOCTYPE cross-domain-policy SYSTEM \"/xml/dtds/cross-domain-policy.dtd\">\n\
         <cross-domain-policy>\n    \
         <allow-access-from domain=\"*\" to-ports=\"{}\" />\n\
         </cross-domain-policy>",
        port
    )
}
