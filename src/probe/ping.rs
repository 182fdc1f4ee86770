//! ICMP reachability through the system `ping` binary

use std::ffi::OsStr;
use std::net::IpAddr;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::process::Command;
use tracing::trace;

/// Outcome of a single ping invocation
#[derive(Debug, Clone, PartialEq)]
pub struct PingReply {
    pub success: bool,
    pub latency_ms: Option<f64>,
    pub exit_code: Option<i32>,
}

static LATENCY_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // linux/macos per-reply line: "time=0.045 ms", windows: "time<1ms"
        r"(?i)time[=<]\s*(\d+(?:\.\d+)?)\s*ms",
        // summary lines: "rtt min/avg/max/mdev = 0.045/..." and "round-trip min/avg/max/stddev = ..."
        r"(?i)(?:rtt|round-trip)[^=]*=\s*(\d+(?:\.\d+)?)/",
        // windows summary: "Average = 3ms"
        r"(?i)average\s*=\s*(\d+(?:\.\d+)?)\s*ms",
    ]
    .iter()
    .filter_map(|pattern| Regex::new(pattern).ok())
    .collect()
});

/// Pull the round-trip time out of ping output, if the output has one
pub fn extract_latency(output: &str) -> Option<f64> {
    LATENCY_PATTERNS.iter().find_map(|re| {
        re.captures(output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    })
}

/// The binary invoked when no other is configured
pub const PING_PROGRAM: &str = "ping";

fn ping_command(program: &OsStr, ip: IpAddr, timeout: Duration) -> Command {
    let mut cmd = Command::new(program);
    if cfg!(windows) {
        cmd.args(["-n", "1", "-w"])
            .arg(timeout.as_millis().max(1).to_string());
    } else {
        cmd.args(["-c", "1", "-W"])
            .arg(timeout.as_secs().max(1).to_string());
    }
    cmd.arg(ip.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    cmd
}

/// Send one echo request and wait for the binary to exit
///
/// Errors only when `ping` itself cannot be run. An unreachable host is a
/// successful call with `success == false`.
pub async fn ping(ip: IpAddr, timeout: Duration) -> Result<PingReply> {
    ping_with(PING_PROGRAM.as_ref(), ip, timeout).await
}

/// [`ping`] through a specific binary
///
/// The process is killed once `timeout` has passed, whatever its own `-W`
/// handling does, and the host counts as not answering.
pub async fn ping_with(program: &OsStr, ip: IpAddr, timeout: Duration) -> Result<PingReply> {
    trace!("pinging {ip}");

    let running = ping_command(program, ip, timeout).output();
    let Ok(output) = tokio::time::timeout(timeout, running).await else {
        trace!("ping gave no verdict within {timeout:?}");
        return Ok(PingReply {
            success: false,
            latency_ms: None,
            exit_code: None,
        });
    };
    let output = output.context("failed to run ping")?;

    let success = output.status.success();
    let latency_ms = if success {
        extract_latency(&String::from_utf8_lossy(&output.stdout))
    } else {
        None
    };

    Ok(PingReply {
        success,
        latency_ms,
        exit_code: output.status.code(),
    })
}
