//! A minimal expression-stepper for scripts the isolated executor runs.
//!
//! The specification treats script content as externally supplied and out
//! of scope to define a language for (§1 Non-goals), but the executor
//! still needs a real worker to drive in tests and as a shippable default.
//! This interpreter is deliberately small: one command per line, enough to
//! exercise progress reporting, logging, cancellation, timeouts, and memory
//! pressure end-to-end without pretending to be a general-purpose runtime.

use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Command {
    /// `progress <percentage 0-100> <step name> <message...>`
    Progress { percentage: f64, step: String, message: String },
    /// `log <level> <message...>`
    Log { level: String, message: String },
    /// `sleep <seconds>`
    Sleep(Duration),
    /// `alloc_mb <n>` — touch `n` megabytes so RSS actually grows.
    AllocMb(u64),
    /// `fail <message>`
    Fail(String),
    /// `return <json>`
    Return(Value),
    /// A bare arithmetic expression `<a> <+|-|*|/> <b>`, evaluated and held
    /// as the pending result unless a later `return` overrides it.
    Eval(f64, char, f64),
}

#[derive(Debug)]
pub struct ParseError(pub String);

pub fn parse(script: &str) -> Result<Vec<Command>, ParseError> {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<Command, ParseError> {
    let mut parts = line.splitn(2, char::is_whitespace);
    let keyword = parts.next().unwrap_or_default();
    let rest = parts.next().unwrap_or_default().trim();

    match keyword {
        "progress" => {
            let mut fields = rest.splitn(3, char::is_whitespace);
            let percentage: f64 = fields
                .next()
                .ok_or_else(|| ParseError("progress requires a percentage".into()))?
                .parse()
                .map_err(|_| ParseError("progress percentage must be numeric".into()))?;
            let step = fields.next().unwrap_or("step").to_string();
            let message = fields.next().unwrap_or("").to_string();
            Ok(Command::Progress { percentage, step, message })
        }
        "log" => {
            let mut fields = rest.splitn(2, char::is_whitespace);
            let level = fields.next().unwrap_or("info").to_string();
            let message = fields.next().unwrap_or("").to_string();
            Ok(Command::Log { level, message })
        }
        "sleep" => {
            let seconds: f64 = rest
                .parse()
                .map_err(|_| ParseError("sleep requires a numeric duration".into()))?;
            Ok(Command::Sleep(Duration::from_secs_f64(seconds.max(0.0))))
        }
        "alloc_mb" => {
            let mb: u64 = rest
                .parse()
                .map_err(|_| ParseError("alloc_mb requires an integer".into()))?;
            Ok(Command::AllocMb(mb))
        }
        "fail" => Ok(Command::Fail(rest.to_string())),
        "return" => {
            let value: Value = serde_json::from_str(rest)
                .map_err(|e| ParseError(format!("invalid return value: {e}")))?;
            Ok(Command::Return(value))
        }
        _ => parse_expression(line),
    }
}

fn parse_expression(line: &str) -> Result<Command, ParseError> {
    for op in ['+', '-', '*', '/'] {
        if let Some((lhs, rhs)) = line.split_once(op) {
            if let (Ok(a), Ok(b)) = (lhs.trim().parse::<f64>(), rhs.trim().parse::<f64>()) {
                return Ok(Command::Eval(a, op, b));
            }
        }
    }
    Err(ParseError(format!("unrecognized script line: {line:?}")))
}

pub fn eval(a: f64, op: char, b: f64) -> f64 {
    match op {
        '+' => a + b,
        '-' => a - b,
        '*' => a * b,
        '/' => a / b,
        _ => unreachable!("parse_expression only emits known operators"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_progress_log_sleep_and_return() {
        let script = "progress 50 halfway on the way\nlog info hello\nsleep 0.1\nreturn 42";
        let commands = parse(script).unwrap();
        assert_eq!(commands.len(), 4);
        assert!(matches!(commands[0], Command::Progress { .. }));
        assert!(matches!(commands[1], Command::Log { .. }));
        assert!(matches!(commands[2], Command::Sleep(_)));
        assert!(matches!(commands[3], Command::Return(_)));
    }

    #[test]
    fn parses_bare_arithmetic() {
        let commands = parse("2 + 2").unwrap();
        assert!(matches!(commands[0], Command::Eval(2.0, '+', 2.0)));
        assert_eq!(eval(2.0, '+', 2.0), 4.0);
    }

    #[test]
    fn rejects_unrecognized_lines() {
        assert!(parse("frobnicate the widget").is_err());
    }

    #[test]
    fn ignores_blank_lines_and_comments() {
        let commands = parse("# a comment\n\nreturn 1").unwrap();
        assert_eq!(commands.len(), 1);
    }
}
