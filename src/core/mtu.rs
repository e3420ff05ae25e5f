//! MTU probing
//!
//! Sweeps downward from [`MTU_CEILING`] with `test_mtu <n>` until the device
//! answers, then pins the usable payload size with `set_mtu`.

use tracing::{debug, info, warn};

use crate::{
    backend::GattBackend,
    core::{
        commands::{Command, CommandChannel},
        error::{GattError, LinkError, LinkResult},
        types::MtuOutcome,
    },
};

pub const MTU_CEILING: usize = 512;
pub const MTU_FLOOR: usize = 20;
/// Bytes of each test response not available to payload
pub const FRAME_OVERHEAD: usize = 4;

/// Next candidate: floor(candidate * 0.875)
fn shrink(candidate: usize) -> usize {
    candidate * 7 / 8
}

pub struct MtuNegotiator<B: GattBackend> {
    commands: CommandChannel<B>,
}

impl<B: GattBackend> MtuNegotiator<B> {
    pub fn new(commands: CommandChannel<B>) -> Self {
        Self { commands }
    }

    /// Find and pin the largest workable payload size
    pub async fn negotiate(&self) -> MtuOutcome {
        match self.probe().await {
            Ok(size) => {
                info!("MTU negotiated: {} bytes", size);
                MtuOutcome::negotiated(size)
            }
            Err(e) => {
                warn!("MTU negotiation failed: {}", e);
                MtuOutcome::failed(e.to_string())
            }
        }
    }

    async fn probe(&self) -> LinkResult<usize> {
        let mut candidate = MTU_CEILING;
        let mut last_error = None;

        while candidate >= MTU_FLOOR {
            match self.commands.execute(Command::TestMtu(candidate)).await {
                Ok(response) => {
                    if response.len() <= FRAME_OVERHEAD {
                        return Err(LinkError::CommandError(format!(
                            "Could not determine a valid MTU size from a {}-byte response",
                            response.len()
                        )));
                    }
                    let size = response.len() - FRAME_OVERHEAD;
                    debug!(
                        "MTU {} accepted, response of {} bytes",
                        candidate,
                        response.len()
                    );
                    self.commands.execute(Command::SetMtu(size)).await?;
                    return Ok(size);
                }
                Err(
                    e @ (LinkError::LinkLost
                    | LinkError::NotConnected
                    | LinkError::Abandoned
                    | LinkError::Gatt(GattError::NotConnected)),
                ) => return Err(e),
                Err(e) => {
                    debug!("MTU {} rejected: {}", candidate, e);
                    last_error = Some(e);
                    candidate = shrink(candidate);
                }
            }
        }

        Err(LinkError::CommandError(match last_error {
            Some(e) => format!("No MTU of at least {} bytes accepted: {}", MTU_FLOOR, e),
            None => format!("No MTU of at least {} bytes accepted", MTU_FLOOR),
        }))
    }
}
