//! Per-connection handshake state machine

use super::protocol::{parse_auth, parse_connect, AUTH_REPLY};
use super::{Destination, Stage};
use crate::error::HandshakeError;
use tracing::debug;

/// Outcome of interpreting one inbound chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Write these bytes back to the client
    Reply(&'static [u8]),
    /// Open an upstream connection; the stage stays at `Connect` until the
    /// outcome is reported through [`HandshakeEngine::upstream_connected`]
    Connect(Destination),
    /// Forward the chunk verbatim to the upstream socket
    Forward,
}

/// Drives [`Stage`] forward, one chunk at a time.
///
/// The engine performs no I/O and keeps no buffer between chunks.
#[derive(Debug, Clone)]
pub struct HandshakeEngine {
    stage: Stage,
    strict_auth_version: bool,
}

impl HandshakeEngine {
    pub fn new(strict_auth_version: bool) -> Self {
        Self {
            stage: Stage::Auth,
            strict_auth_version,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Interpret `chunk` according to the current stage
    pub fn on_chunk(&mut self, chunk: &[u8]) -> Result<Step, HandshakeError> {
        match self.stage {
            Stage::Auth => {
                let request = parse_auth(chunk, self.strict_auth_version)?;
                debug!(
                    version = request.version,
                    nmethods = request.method_count,
                    methods = ?request.methods,
                    "method selection received"
                );
                self.advance(Stage::Connect);
                Ok(Step::Reply(&AUTH_REPLY))
            }
            Stage::Connect => {
                let request = parse_connect(chunk)?;
                if request.reserved != 0x00 {
                    debug!(reserved = request.reserved, "non-zero reserved byte ignored");
                }
                Ok(Step::Connect(request.destination))
            }
            Stage::Deliver => Ok(Step::Forward),
        }
    }

    /// Record that the upstream connection is established
    pub fn upstream_connected(&mut self) {
        self.advance(Stage::Deliver);
    }

    fn advance(&mut self, next: Stage) {
        debug_assert!(next > self.stage, "stage must advance monotonically");
        debug!(from = %self.stage, to = %next, "stage transition");
        self.stage = next;
    }
}
