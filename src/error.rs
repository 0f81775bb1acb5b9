//! The error taxonomy every handler in this crate returns through, and its
//! mapping onto IPMI completion codes at the dispatch boundary.

use thiserror::Error;

/// IPMI completion code for a normal, successful response.
pub const CC_OK: u8 = 0x00;
/// "Already active"/"already inactive" — SOL activate/deactivate conflict.
pub const CC_SOL_ALREADY_IN_STATE: u8 = 0x80;
/// "Out of resources" — SOL activate with no io handler or an inactive chassis.
pub const CC_SOL_UNAVAILABLE: u8 = 0x81;
/// "Invalid command" — unrecognized netFn/command pair.
pub const CC_INVALID_COMMAND: u8 = 0xc1;
/// "Request data/sensor not present" — IPMB bridge target address unregistered.
pub const CC_DESTINATION_UNAVAILABLE: u8 = 0xcb;
/// "Command not supported in present state" — capability not implemented.
pub const CC_INVALID_IN_STATE: u8 = 0xcc;
/// "Unspecified error."
pub const CC_UNSPECIFIED: u8 = 0xff;

#[derive(Debug, Error)]
pub enum BmcError {
    #[error("directive not implemented on this chassis")]
    NotImplemented,

    #[error("pin {0} is not wired on this target")]
    PinUnwired(&'static str),

    #[error("telnet session to {host}:{port} timed out waiting for a response")]
    TelnetTimeout { host: String, port: u16 },

    #[error("telnet session to {host}:{port} closed unexpectedly")]
    TelnetEof { host: String, port: u16 },

    #[error("no bridge target registered at IPMB address {0:#04x}")]
    BridgeTargetAbsent(u8),

    #[error("post-condition for {0} did not hold after the directive completed")]
    PostConditionFailed(&'static str),

    #[error("SOL payload is already {0}")]
    SolAlreadyInState(&'static str),

    #[error("SOL payload unavailable: {0}")]
    SolUnavailable(&'static str),

    #[error(transparent)]
    Unspecified(#[from] anyhow::Error),
}

impl BmcError {
    /// Maps this error onto the completion code the dispatcher should place
    /// in the IPMI response, per the taxonomy's mapping table (spec.md §7).
    pub fn completion_code(&self) -> u8 {
        match self {
            BmcError::NotImplemented => CC_INVALID_IN_STATE,
            BmcError::PinUnwired(_) => CC_UNSPECIFIED,
            BmcError::TelnetTimeout { .. } => CC_UNSPECIFIED,
            BmcError::TelnetEof { .. } => CC_UNSPECIFIED,
            BmcError::BridgeTargetAbsent(_) => CC_DESTINATION_UNAVAILABLE,
            BmcError::PostConditionFailed(_) => CC_UNSPECIFIED,
            BmcError::SolAlreadyInState(_) => CC_SOL_ALREADY_IN_STATE,
            BmcError::SolUnavailable(_) => CC_SOL_UNAVAILABLE,
            BmcError::Unspecified(_) => CC_UNSPECIFIED,
        }
    }
}

pub type BmcResult<T> = Result<T, BmcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bridge_target_absent_maps_to_destination_unavailable() {
        let err = BmcError::BridgeTargetAbsent(0x72);
        assert_eq!(err.completion_code(), CC_DESTINATION_UNAVAILABLE);
    }

    #[test]
    fn not_implemented_maps_to_invalid_in_state() {
        assert_eq!(
            BmcError::NotImplemented.completion_code(),
            CC_INVALID_IN_STATE
        );
    }
}
