//! Serial-Over-LAN: payload activation/deactivation and the serial-poll
//! relay task (`original_source/asyncbmc.py::activate_payload`,
//! `deactivate_payload`, `_poll_serial`).

use crate::error::{BmcError, BmcResult};
use crate::telnet::TelnetTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// How often the poll loop checks the SOL telnet session for new bytes,
/// matching the cadence implied by `telnetbmc.py`'s short `response_timeout`
/// on the SOL config.
const POLL_CHUNK_BYTES: usize = 256;

pub struct SolSession {
    transport: Arc<dyn TelnetTransport>,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    active: AtomicBool,
}

impl SolSession {
    pub fn new(transport: Arc<dyn TelnetTransport>) -> Self {
        SolSession {
            transport,
            poll_task: Mutex::new(None),
            active: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    /// Builds the activate-payload response body: a fixed 8-byte header,
    /// the SOL port in big-endian, and a trailing `0xffff` (exact layout of
    /// `asyncbmc.py::activate_payload`'s response), and starts the relay
    /// task pumping bytes between the SOL telnet session and `outbound`.
    pub async fn activate(&self, sol_port: u16, chassis_active: bool, outbound: mpsc::Sender<Vec<u8>>) -> BmcResult<Vec<u8>> {
        if !chassis_active {
            return Err(BmcError::SolUnavailable("chassis is not powered on"));
        }
        if self.active.swap(true, Ordering::SeqCst) {
            return Err(BmcError::SolAlreadyInState("active"));
        }

        self.transport.connect().await?;

        let transport = Arc::clone(&self.transport);
        let handle = tokio::spawn(poll_serial(transport, outbound));
        *self.poll_task.lock().await = Some(handle);

        let port_bytes = sol_port.to_be_bytes();
        let mut response = vec![0u8, 0, 0, 0, 1, 0, 1, 0];
        response.extend_from_slice(&port_bytes);
        response.extend_from_slice(&[0xff, 0xff]);
        Ok(response)
    }

    /// Cancels the relay task and disconnects the SOL telnet session.
    pub async fn deactivate(&self) -> BmcResult<()> {
        if !self.active.swap(false, Ordering::SeqCst) {
            return Err(BmcError::SolAlreadyInState("inactive"));
        }
        if let Some(handle) = self.poll_task.lock().await.take() {
            handle.abort();
        }
        self.transport.disconnect().await;
        Ok(())
    }

    /// Writes a chunk of inbound SOL data (from the IPMI client) out to the
    /// serial bridge.
    pub async fn send(&self, data: &[u8]) -> BmcResult<()> {
        if !self.is_active() {
            return Err(BmcError::SolAlreadyInState("inactive"));
        }
        self.transport.write(&String::from_utf8_lossy(data)).await
    }
}

async fn poll_serial(transport: Arc<dyn TelnetTransport>, outbound: mpsc::Sender<Vec<u8>>) {
    loop {
        match transport.read(POLL_CHUNK_BYTES).await {
            Ok(chunk) if !chunk.is_empty() => {
                if outbound.send(chunk.into_bytes()).await.is_err() {
                    return;
                }
            }
            Ok(_) => continue,
            Err(BmcError::TelnetTimeout { .. }) => continue,
            Err(_) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telnet::tests::FakeTelnetTransport;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Mutex as TokioMutex;

    fn transport() -> Arc<FakeTelnetTransport> {
        Arc::new(FakeTelnetTransport {
            script: Arc::new(TokioMutex::new(vec![])),
            crlf: "\r\n".into(),
            writes: Arc::new(AtomicU32::new(0)),
        })
    }

    #[tokio::test]
    async fn activate_response_encodes_sol_port() {
        let (tx, _rx) = mpsc::channel(8);
        let sol = SolSession::new(transport());
        let response = sol.activate(623, true, tx).await.unwrap();
        assert_eq!(&response[0..8], &[0, 0, 0, 0, 1, 0, 1, 0]);
        assert_eq!(&response[8..10], &623u16.to_be_bytes());
        assert_eq!(&response[10..12], &[0xff, 0xff]);
        sol.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn double_activate_is_rejected() {
        let (tx, _rx) = mpsc::channel(8);
        let sol = SolSession::new(transport());
        sol.activate(623, true, tx.clone()).await.unwrap();
        assert!(sol.activate(623, true, tx).await.is_err());
        sol.deactivate().await.unwrap();
    }

    #[tokio::test]
    async fn deactivate_without_activate_is_rejected() {
        let sol = SolSession::new(transport());
        assert!(sol.deactivate().await.is_err());
    }

    #[tokio::test]
    async fn activate_without_powered_chassis_is_unavailable() {
        let (tx, _rx) = mpsc::channel(8);
        let sol = SolSession::new(transport());
        assert!(matches!(sol.activate(623, false, tx).await, Err(BmcError::SolUnavailable(_))));
    }
}
