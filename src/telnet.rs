//! Command and SOL telnet sessions. The wire client (the `telnet` crate) is
//! synchronous, so every operation is driven through `spawn_blocking` —
//! the same trick `plietar/src/ipmi.rs::ipmi_do` uses to drive the
//! synchronous `ipmi_rs` client from async code.
//!
//! `original_source/telnetbmc.py::TelnetSession` reconnects lazily on every
//! `write`/`read`/`readline` call and gives up after `connection_retries`
//! attempts; this implementation preserves that lazy-reconnect contract but
//! drops a connected handle and re-dials on the next use rather than
//! tracking two long-lived "connected"/"closed" futures (§4 SPEC_FULL note).

use crate::config::TelnetConfig;
use crate::error::{BmcError, BmcResult};
use async_trait::async_trait;
use std::time::Duration;
use telnet::{Telnet, TelnetEvent};
use tokio::sync::{Mutex, RwLock};

/// The seam the command engine and chassis code depend on, so tests can
/// swap in an in-memory double instead of a real socket.
#[async_trait]
pub trait TelnetTransport: Send + Sync {
    async fn write(&self, text: &str) -> BmcResult<()>;
    async fn read_line(&self) -> BmcResult<String>;
    async fn read(&self, max_bytes: usize) -> BmcResult<String>;
    async fn disconnect(&self);
    async fn connect(&self) -> BmcResult<bool>;
    /// Whether the underlying transport currently holds a live connection —
    /// no EOF observed, no reconnect pending (spec.md §8 invariant 5).
    async fn is_connected(&self) -> bool;
    fn crlf(&self) -> String;
}

struct RetryBudget {
    connection_retries: u32,
    connection_timeout: Duration,
}

pub struct TelnetSession {
    host: String,
    port: u16,
    crlf: String,
    response_timeout: Duration,
    budget: RwLock<RetryBudget>,
    handle: Mutex<Option<Telnet>>,
}

impl TelnetSession {
    pub fn new(config: &TelnetConfig) -> Self {
        TelnetSession {
            host: config.host.clone(),
            port: config.port,
            crlf: config.crlf.clone(),
            response_timeout: Duration::from_secs_f64(config.response_timeout_secs),
            budget: RwLock::new(RetryBudget {
                connection_retries: config.connection_retries,
                connection_timeout: Duration::from_secs_f64(config.connection_timeout_secs),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Widens the retry budget for the duration of a Wake-on-LAN
    /// reconnect attempt, returning the previous budget to restore
    /// afterward (`esp8266wakeonlanbmc.py::press_power_on`).
    pub async fn widen_retry_budget(&self, connection_retries: u32, connection_timeout: Duration) -> (u32, Duration) {
        let mut budget = self.budget.write().await;
        let previous = (budget.connection_retries, budget.connection_timeout);
        budget.connection_retries = connection_retries;
        budget.connection_timeout = connection_timeout;
        previous
    }

    pub async fn restore_retry_budget(&self, (connection_retries, connection_timeout): (u32, Duration)) {
        let mut budget = self.budget.write().await;
        budget.connection_retries = connection_retries;
        budget.connection_timeout = connection_timeout;
    }

    async fn ensure_connected(&self) -> BmcResult<()> {
        let mut handle = self.handle.lock().await;
        if handle.is_some() {
            return Ok(());
        }

        let (retries, timeout) = {
            let budget = self.budget.read().await;
            (budget.connection_retries, budget.connection_timeout)
        };

        let host = self.host.clone();
        let port = self.port;
        let connected = tokio::task::spawn_blocking(move || {
            let mut last_err = None;
            for _ in 0..retries.max(1) {
                match Telnet::connect_timeout(&(host.as_str(), port), 4096, timeout) {
                    Ok(client) => return Ok(client),
                    Err(e) => last_err = Some(e),
                }
            }
            Err(last_err)
        })
        .await
        .map_err(|e| BmcError::Unspecified(e.into()))?;

        match connected {
            Ok(client) => {
                *handle = Some(client);
                Ok(())
            }
            Err(_) => Err(BmcError::TelnetTimeout {
                host: self.host.clone(),
                port: self.port,
            }),
        }
    }
}

#[async_trait]
impl TelnetTransport for TelnetSession {
    async fn connect(&self) -> BmcResult<bool> {
        self.ensure_connected().await.map(|_| true)
    }

    async fn disconnect(&self) {
        let mut handle = self.handle.lock().await;
        *handle = None;
    }

    async fn is_connected(&self) -> bool {
        self.handle.lock().await.is_some()
    }

    async fn write(&self, text: &str) -> BmcResult<()> {
        self.ensure_connected().await?;
        let mut guard = self.handle.lock().await;
        let mut client = guard.take().expect("connected above");
        let payload = text.as_bytes().to_vec();
        let host = self.host.clone();
        let port = self.port;
        let result = tokio::task::spawn_blocking(move || client.write(&payload).map(|_| client))
            .await
            .map_err(|e| BmcError::Unspecified(e.into()))?;
        match result {
            Ok(client) => {
                *guard = Some(client);
                Ok(())
            }
            Err(_) => Err(BmcError::TelnetEof { host, port }),
        }
    }

    async fn read_line(&self) -> BmcResult<String> {
        self.read_until(self.response_timeout, true).await
    }

    async fn read(&self, max_bytes: usize) -> BmcResult<String> {
        let _ = max_bytes;
        self.read_until(self.response_timeout, false).await
    }

    fn crlf(&self) -> String {
        self.crlf.clone()
    }
}

impl TelnetSession {
    async fn read_until(&self, timeout: Duration, stop_at_newline: bool) -> BmcResult<String> {
        self.ensure_connected().await?;
        let mut guard = self.handle.lock().await;
        let mut client = guard.take().expect("connected above");
        let host = self.host.clone();
        let port = self.port;

        let result = tokio::task::spawn_blocking(move || {
            let mut buf = Vec::new();
            loop {
                match client.read_timeout(timeout) {
                    Ok(TelnetEvent::Data(bytes)) => {
                        buf.extend_from_slice(&bytes);
                        if !stop_at_newline || buf.contains(&b'\n') {
                            return (Ok(buf), client);
                        }
                    }
                    Ok(TelnetEvent::TimedOut) => {
                        if buf.is_empty() {
                            return (Err("timeout"), client);
                        }
                        return (Ok(buf), client);
                    }
                    Ok(TelnetEvent::Error(_)) | Err(_) => return (Err("eof"), client),
                    Ok(_) => continue,
                }
            }
        })
        .await
        .map_err(|e| BmcError::Unspecified(e.into()))?;

        let (outcome, client) = result;
        *guard = Some(client);

        match outcome {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Err("timeout") => Err(BmcError::TelnetTimeout { host, port }),
            Err(_) => Err(BmcError::TelnetEof { host, port }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    /// In-memory transport double, used by `command.rs`/`esp8266.rs` tests
    /// so the command engine can be exercised without a real socket.
    pub struct FakeTelnetTransport {
        pub script: Arc<Mutex<Vec<(String, String)>>>,
        pub crlf: String,
        pub writes: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TelnetTransport for FakeTelnetTransport {
        async fn write(&self, _text: &str) -> BmcResult<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn read_line(&self) -> BmcResult<String> {
            let mut script = self.script.lock().await;
            if script.is_empty() {
                return Err(BmcError::TelnetEof {
                    host: "fake".into(),
                    port: 0,
                });
            }
            Ok(script.remove(0).1)
        }

        async fn read(&self, _max_bytes: usize) -> BmcResult<String> {
            self.read_line().await
        }

        async fn disconnect(&self) {}

        async fn connect(&self) -> BmcResult<bool> {
            Ok(true)
        }

        async fn is_connected(&self) -> bool {
            true
        }

        fn crlf(&self) -> String {
            self.crlf.clone()
        }
    }

    #[tokio::test]
    async fn fake_transport_replays_scripted_responses() {
        let transport = FakeTelnetTransport {
            script: Arc::new(Mutex::new(vec![("cmd".into(), "digital output: [1]\n".into())])),
            crlf: "\r\n".into(),
            writes: Arc::new(AtomicU32::new(0)),
        };
        transport.write("iw 0 0 1").await.unwrap();
        let line = transport.read_line().await.unwrap();
        assert_eq!(line, "digital output: [1]\n");
        assert_eq!(transport.writes.load(Ordering::SeqCst), 1);
    }
}
