//! When a downlink payload goes on air

use crate::radio::{Radio, RadioError};
use tracing::trace;

/// Decides how a PULL_RESP payload reaches the radio
///
/// Returning `Ok` means the radio accepted the payload and the receiver may
/// acknowledge it.
pub trait DownlinkPolicy {
    fn schedule<R: Radio + ?Sized>(&mut self, payload: &[u8], radio: &mut R) -> Result<(), RadioError>;
}

/// Transmit as soon as the payload arrives, ignoring any requested timestamp
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateTransmit;

impl DownlinkPolicy for ImmediateTransmit {
    fn schedule<R: Radio + ?Sized>(&mut self, payload: &[u8], radio: &mut R) -> Result<(), RadioError> {
        trace!("[DOWNLINK] Immediate transmit of {} bytes", payload.len());
        radio.transmit(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockRadio;

    #[test]
    fn test_immediate_transmit() {
        let mut radio = MockRadio::new();
        ImmediateTransmit.schedule(b"down", &mut radio).unwrap();
        assert_eq!(radio.transmitted, vec![b"down".to_vec()]);

        radio.busy = true;
        assert!(matches!(
            ImmediateTransmit.schedule(b"again", &mut radio),
            Err(RadioError::Busy)
        ));
    }
}
