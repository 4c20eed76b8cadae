//! Worker binary spawned by `aperture-executor` (specification §6.2, §4.10).
//!
//! Invoked as `aperture-worker <read_fd> <write_fd>`: performs the
//! handshake, waits for an `Execute` message, runs the requested script
//! through the minimal expression-stepper in [`script`], streaming
//! `Progress`/`Log` messages and checking for `Cancel` between steps, then
//! replies with a `Result`.

mod script;

use aperture_ipc::{
    BidirectionalChannel, ExecuteRequest, ExecutionResult, LogMessage, Message, MessageType,
    ProgressUpdate,
};
use script::Command;
use std::time::{Duration, Instant};
use tracing::{error, info};

const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");
const STEP_POLL: Duration = Duration::from_millis(100);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("usage: {} <read_fd> <write_fd>", args.first().map(String::as_str).unwrap_or("aperture-worker"));
        std::process::exit(2);
    }

    let read_fd: RawHandleArg = match args[1].parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("invalid read handle argument: {}", args[1]);
            std::process::exit(2);
        }
    };
    let write_fd: RawHandleArg = match args[2].parse() {
        Ok(v) => v,
        Err(_) => {
            eprintln!("invalid write handle argument: {}", args[2]);
            std::process::exit(2);
        }
    };

    let channel = BidirectionalChannel::from_worker_handles(read_fd, write_fd);

    if let Err(e) = channel.respond_to_handshake(WORKER_VERSION) {
        error!(error = %e, "handshake with parent failed");
        std::process::exit(1);
    }
    info!("handshake complete, waiting for Execute");

    let execute_msg = match channel.receive(Duration::from_secs(30)) {
        Ok(msg) if msg.header.message_type == MessageType::Execute => msg,
        Ok(msg) => {
            error!(message_type = ?msg.header.message_type, "expected Execute as first post-handshake message");
            std::process::exit(1);
        }
        Err(e) => {
            error!(error = %e, "failed to receive Execute");
            std::process::exit(1);
        }
    };

    let request: ExecuteRequest = match execute_msg.decode_payload() {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "malformed Execute payload");
            std::process::exit(1);
        }
    };

    let result = run_script(&channel, &request);

    let seq = channel.next_sequence_id();
    match Message::encode(MessageType::Result, seq, &result) {
        Ok(msg) => {
            if let Err(e) = channel.send(&msg) {
                error!(error = %e, "failed to send Result to parent");
            }
        }
        Err(e) => error!(error = %e, "failed to encode Result"),
    }
}

#[cfg(unix)]
type RawHandleArg = i32;
#[cfg(windows)]
type RawHandleArg = isize;

fn send_progress(channel: &BidirectionalChannel, percentage: f64, step: &str, message: &str, started: Instant) {
    let update = ProgressUpdate {
        percentage,
        message: message.to_string(),
        current_step: step.to_string(),
        elapsed_ms: started.elapsed().as_millis() as u64,
        est_remaining_ms: None,
    };
    if let Ok(msg) = Message::encode(MessageType::Progress, channel.next_sequence_id(), &update) {
        let _ = channel.send(&msg);
    }
}

fn send_log(channel: &BidirectionalChannel, level: &str, message: &str) {
    let log = LogMessage {
        level: level.to_string(),
        message: message.to_string(),
    };
    if let Ok(msg) = Message::encode(MessageType::Log, channel.next_sequence_id(), &log) {
        let _ = channel.send(&msg);
    }
}

/// Checks for an incoming `Cancel` without blocking; if one is pending,
/// acknowledges it and returns true.
fn check_cancelled(channel: &BidirectionalChannel) -> bool {
    if !channel.has_data() {
        return false;
    }
    match channel.receive(Duration::from_millis(0)) {
        Ok(msg) if msg.header.message_type == MessageType::Cancel => {
            let seq = channel.next_sequence_id();
            if let Ok(ack) = Message::encode(MessageType::CancelAck, seq, &serde_json::json!({})) {
                let _ = channel.send(&ack);
            }
            true
        }
        _ => false,
    }
}

/// Sleep for `total`, checking for cancellation every [`STEP_POLL`].
fn interruptible_sleep(channel: &BidirectionalChannel, total: Duration) -> bool {
    let deadline = Instant::now() + total;
    while Instant::now() < deadline {
        if check_cancelled(channel) {
            return true;
        }
        std::thread::sleep(STEP_POLL.min(deadline.saturating_duration_since(Instant::now())));
    }
    false
}

fn run_script(channel: &BidirectionalChannel, request: &ExecuteRequest) -> ExecutionResult {
    let started = Instant::now();
    let commands = match script::parse(&request.script_content) {
        Ok(commands) => commands,
        Err(e) => {
            return ExecutionResult {
                success: false,
                result: serde_json::Value::Null,
                output: String::new(),
                error_output: e.0.clone(),
                exception: Some(e.0),
                exception_type: Some("ScriptParseError".into()),
                traceback: None,
                execution_time_ms: started.elapsed().as_millis() as u64,
                peak_memory_bytes: 0,
            }
        }
    };

    let mut pending_result = serde_json::Value::Null;
    let mut memory_anchor: Vec<Vec<u8>> = Vec::new();

    for command in commands {
        if check_cancelled(channel) {
            return ExecutionResult {
                success: false,
                result: serde_json::Value::Null,
                output: String::new(),
                error_output: "cancelled".into(),
                exception: None,
                exception_type: None,
                traceback: None,
                execution_time_ms: started.elapsed().as_millis() as u64,
                peak_memory_bytes: 0,
            };
        }

        match command {
            Command::Progress { percentage, step, message } => {
                send_progress(channel, percentage, &step, &message, started);
            }
            Command::Log { level, message } => {
                send_log(channel, &level, &message);
            }
            Command::Sleep(duration) => {
                if interruptible_sleep(channel, duration) {
                    return ExecutionResult {
                        success: false,
                        result: serde_json::Value::Null,
                        output: String::new(),
                        error_output: "cancelled during sleep".into(),
                        exception: None,
                        exception_type: None,
                        traceback: None,
                        execution_time_ms: started.elapsed().as_millis() as u64,
                        peak_memory_bytes: 0,
                    };
                }
            }
            Command::AllocMb(mb) => {
                // Touch every page so the allocation actually shows up in
                // RSS, not just virtual address space.
                let mut block = vec![0u8; (mb * 1024 * 1024) as usize];
                for byte in block.iter_mut().step_by(4096) {
                    *byte = 1;
                }
                memory_anchor.push(block);
            }
            Command::Fail(message) => {
                return ExecutionResult {
                    success: false,
                    result: serde_json::Value::Null,
                    output: String::new(),
                    error_output: message.clone(),
                    exception: Some(message),
                    exception_type: Some("ScriptFailure".into()),
                    traceback: None,
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    peak_memory_bytes: 0,
                };
            }
            Command::Return(value) => pending_result = value,
            Command::Eval(a, op, b) => pending_result = serde_json::json!(script::eval(a, op, b)),
        }
    }

    drop(memory_anchor);
    info!("script completed");
    ExecutionResult {
        success: true,
        result: pending_result,
        output: String::new(),
        error_output: String::new(),
        exception: None,
        exception_type: None,
        traceback: None,
        execution_time_ms: started.elapsed().as_millis() as u64,
        peak_memory_bytes: 0,
    }
}
