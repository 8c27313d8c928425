//! Split-brain detection: rigs configured for the Dolt server while the
//! server is not accepting connections.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use towndoc_core::layout::HQ;
use towndoc_core::state::BeadsMetadata;

use crate::check::{Check, Outcome};
use crate::checks::registered_rigs;
use crate::probe::Dialer;
use crate::types::{Category, CheckContext, CheckResult};

pub const DEFAULT_DOLT_HOST: &str = "127.0.0.1";

pub struct DoltServerReachableCheck {
    dialer: Arc<dyn Dialer>,
    host_override: Option<String>,
    default_port: u16,
    timeout: Duration,
}

impl DoltServerReachableCheck {
    pub fn new(
        dialer: Arc<dyn Dialer>,
        host_override: Option<String>,
        default_port: u16,
        timeout: Duration,
    ) -> Self {
        Self {
            dialer,
            host_override,
            default_port,
            timeout,
        }
    }

    fn address(&self, meta: &BeadsMetadata) -> String {
        let host = self
            .host_override
            .as_deref()
            .or_else(|| meta.server_host())
            .unwrap_or(DEFAULT_DOLT_HOST);
        join_host_port(host, meta.server_port().unwrap_or(self.default_port))
    }
}

/// `host:port`, bracketing IPv6 literals.
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

impl Check for DoltServerReachableCheck {
    fn name(&self) -> &'static str {
        "dolt-server-reachable"
    }

    fn description(&self) -> &'static str {
        "Check that the Dolt server is reachable when rigs expect it"
    }

    fn category(&self) -> Category {
        Category::Infrastructure
    }

    fn run(&self, ctx: &CheckContext) -> Outcome {
        let layout = ctx.layout();
        let rigs = match registered_rigs(&layout) {
            Ok(rigs) => rigs,
            Err(result) => return result.into(),
        };

        let mut dirs = vec![(HQ.to_string(), layout.town_beads_dir())];
        dirs.extend(rigs.into_iter().map(|rig| {
            let dir = layout.rig_beads_dir(&rig);
            (rig, dir)
        }));

        // address -> rigs expecting a server there
        let mut expected: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, dir) in dirs {
            let Ok(Some(meta)) = BeadsMetadata::load(&dir) else {
                continue;
            };
            if meta.is_server_mode() {
                expected.entry(self.address(&meta)).or_default().push(name);
            }
        }

        if expected.is_empty() {
            return CheckResult::ok("No rigs configured for Dolt server mode").into();
        }
        let total: usize = expected.values().map(Vec::len).sum();

        let mut down_addrs = Vec::new();
        let mut stranded = Vec::new();
        let mut errors = Vec::new();
        for (addr, names) in expected {
            match self.dialer.dial(&addr, self.timeout) {
                Ok(()) => debug!(addr = %addr, "dolt server reachable"),
                Err(err) => {
                    errors.push(format!("{addr}: {err}"));
                    down_addrs.push(addr);
                    stranded.extend(names);
                }
            }
        }

        if stranded.is_empty() {
            return CheckResult::ok(format!(
                "Dolt server reachable ({total} rig(s) in server mode)"
            ))
            .into();
        }

        CheckResult::error(format!(
            "SPLIT-BRAIN RISK: {} rig(s) configured for Dolt server mode but server unreachable at {}",
            stranded.len(),
            down_addrs.join(", ")
        ))
        .with_detail(format!("Rigs expecting server: {}", stranded.join(", ")))
        .with_detail("bd commands will fail or create isolated local databases")
        .with_detail(
            "This is the split-brain scenario: data written now may be invisible to the server later",
        )
        .with_details(errors)
        .with_hint("Run 'gt dolt start' to start the Dolt server")
        .into()
    }
}
