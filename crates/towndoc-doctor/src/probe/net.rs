use std::collections::BTreeSet;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;
use std::time::Duration;

use super::lock;

/// TCP reachability.
pub trait Dialer: Send + Sync {
    /// Open and immediately drop a connection to `addr` (`host:port`).
    fn dial(&self, addr: &str, timeout: Duration) -> Result<(), String>;
}

pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, addr: &str, timeout: Duration) -> Result<(), String> {
        let addrs = addr
            .to_socket_addrs()
            .map_err(|e| format!("resolve {addr}: {e}"))?;
        let mut last_err = format!("resolve {addr}: no addresses");
        for sock in addrs {
            match TcpStream::connect_timeout(&sock, timeout) {
                Ok(_) => return Ok(()),
                Err(e) => last_err = format!("dial {sock}: {e}"),
            }
        }
        Err(last_err)
    }
}

/// Accepts exactly the listed addresses and records every attempt.
#[derive(Debug, Default)]
pub struct StaticDialer {
    open: BTreeSet<String>,
    attempts: Mutex<Vec<String>>,
}

impl StaticDialer {
    pub fn refusing() -> Self {
        Self::default()
    }

    pub fn accepting(addrs: &[&str]) -> Self {
        Self {
            open: addrs.iter().map(|a| a.to_string()).collect(),
            attempts: Mutex::new(Vec::new()),
        }
    }

    pub fn attempts(&self) -> Vec<String> {
        lock(&self.attempts).clone()
    }
}

impl Dialer for StaticDialer {
    fn dial(&self, addr: &str, _timeout: Duration) -> Result<(), String> {
        lock(&self.attempts).push(addr.to_string());
        if self.open.contains(addr) {
            Ok(())
        } else {
            Err(format!("dial tcp {addr}: connection refused"))
        }
    }
}
