use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use spinet_endpoint::{ChannelAdapter, Endpoint, EndpointConfig, EndpointError, StatsSnapshot};
use spinet_link::sim;
use tracing::{info, warn};

use crate::cmd::{Context, LoopbackArgs};
use crate::exit::{
    endpoint_error, link_error, CliError, CliResult, DATA_INVALID, FAILURE, INTERNAL, SUCCESS,
    TIMEOUT, USAGE,
};
use crate::output::{print_report, Report};

const DELIVERY_QUEUE: usize = 64;

#[derive(Debug, Serialize)]
struct LoopbackReport {
    sent: u64,
    delivered: u64,
    mismatched: u64,
    lost: u64,
    payload_len: usize,
    elapsed_ms: u64,
    kbit_per_s: u64,
    left: StatsSnapshot,
    right: StatsSnapshot,
}

impl Report for LoopbackReport {
    fn rows(&self) -> Vec<(&'static str, String)> {
        vec![
            ("sent", self.sent.to_string()),
            ("delivered", self.delivered.to_string()),
            ("mismatched", self.mismatched.to_string()),
            ("lost", self.lost.to_string()),
            ("payload_len", self.payload_len.to_string()),
            ("elapsed_ms", self.elapsed_ms.to_string()),
            ("kbit_per_s", self.kbit_per_s.to_string()),
            ("exchanges", self.left.exchanges_completed.to_string()),
            ("invalid_frames", (self.left.invalid_frames + self.right.invalid_frames).to_string()),
            ("busy_rejections", (self.left.busy_rejections + self.right.busy_rejections).to_string()),
            ("recoveries", (self.left.recoveries + self.right.recoveries).to_string()),
        ]
    }
}

struct Side {
    endpoint: Endpoint,
    rx: Receiver<Bytes>,
}

pub fn run(args: LoopbackArgs, ctx: &Context) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let interval = args.interval.as_deref().map(parse_duration).transpose()?;
    let frame_config = ctx.frame_config(None)?;
    let size = payload_size(args.size, frame_config.max_payload())?;

    let running = Arc::new(AtomicBool::new(true));
    if args.count == 0 {
        install_ctrlc_handler(running.clone())?;
    }

    let (a, b) = sim::pair(frame_config.envelope_len())
        .map_err(|err| link_error("failed to create simulated wire", err))?;
    let (a, b) = (Arc::new(a), Arc::new(b));
    let left = start_side(ctx, "a", Arc::clone(&a))?;
    let right = start_side(ctx, "b", Arc::clone(&b))?;
    // Both start-up sync pulses must land before traffic starts.
    if !(a.wait_quiet(timeout) && b.wait_quiet(timeout)) {
        return Err(CliError::new(TIMEOUT, "link did not settle after start"));
    }

    let started = Instant::now();
    let mut report = LoopbackReport {
        sent: 0,
        delivered: 0,
        mismatched: 0,
        lost: 0,
        payload_len: size,
        elapsed_ms: 0,
        kbit_per_s: 0,
        left: StatsSnapshot::default(),
        right: StatsSnapshot::default(),
    };

    let mut seq = 0u64;
    while running.load(Ordering::SeqCst) && (args.count == 0 || seq < args.count) {
        let (from, to) = if args.bidirectional && seq % 2 == 1 {
            (&right, &left)
        } else {
            (&left, &right)
        };

        let payload = pattern(seq, size);
        send_with_retry(&from.endpoint, &payload, timeout)?;
        report.sent += 1;

        match to.rx.recv_timeout(timeout) {
            Ok(frame) if frame[..] == payload[..] => report.delivered += 1,
            Ok(frame) => {
                report.mismatched += 1;
                warn!(seq, expected = payload.len(), got = frame.len(), "delivered frame differs");
            }
            Err(_) => {
                report.lost += 1;
                warn!(seq, "frame not delivered in time");
            }
        }

        seq += 1;
        if let Some(interval) = interval {
            thread::sleep(interval);
        }
    }

    let elapsed = started.elapsed();
    report.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    let bits = report.delivered.saturating_mul(size as u64).saturating_mul(8);
    report.kbit_per_s = match u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX) {
        0 => 0,
        micros => bits.saturating_mul(1_000) / micros,
    };
    report.left = left.endpoint.stats();
    report.right = right.endpoint.stats();

    info!(
        sent = report.sent,
        delivered = report.delivered,
        elapsed_ms = report.elapsed_ms,
        "loopback finished"
    );
    print_report(&report, ctx.format);

    if report.delivered == report.sent {
        Ok(SUCCESS)
    } else {
        Ok(FAILURE)
    }
}

fn start_side(ctx: &Context, suffix: &str, port: Arc<sim::SimPort>) -> CliResult<Side> {
    let config = EndpointConfig {
        name: format!("{}-{suffix}", ctx.config.name),
        ..ctx.config.clone()
    };
    let (adapter, rx) = ChannelAdapter::new(DELIVERY_QUEUE);
    let endpoint = Endpoint::start(&config, port, Arc::new(adapter))
        .map_err(|err| endpoint_error("failed to start endpoint", err))?;
    Ok(Side { endpoint, rx })
}

fn send_with_retry(endpoint: &Endpoint, payload: &[u8], timeout: Duration) -> CliResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        match endpoint.send(payload) {
            Ok(()) => return Ok(()),
            Err(EndpointError::Busy) if Instant::now() < deadline => {
                thread::sleep(Duration::from_micros(100));
            }
            Err(err) => return Err(endpoint_error("send failed", err)),
        }
    }
}

/// Empty payloads are valid frames but never delivered, so they cannot be
/// counted as received.
fn payload_size(requested: Option<usize>, max: usize) -> CliResult<usize> {
    match requested {
        None => Ok(max),
        Some(0) => Err(CliError::new(
            USAGE,
            "--size must be at least 1: empty frames are not delivered",
        )),
        Some(size) if size > max => Err(CliError::new(
            DATA_INVALID,
            format!("--size {size} exceeds the largest payload ({max} bytes)"),
        )),
        Some(size) => Ok(size),
    }
}

fn pattern(seq: u64, size: usize) -> Vec<u8> {
    (0..size).map(|i| (seq as usize).wrapping_add(i) as u8).collect()
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
