//! Access-log line parser.
//!
//! Expected layout (nginx `log_format`):
//!
//! ```text
//! $host $remote_addr [$time_local] "$request" $status $body_bytes_sent $request_time
//! ```
//!
//! Anything after `$request_time` is ignored. Lines from hosts outside the
//! static host table are dropped without error since several virtual hosts
//! share one access log.

use super::RequestEvent;
use crate::service::Service;
use chrono::DateTime;
use regex::Regex;
use std::sync::LazyLock;

static LOG_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^(\S+)\s+\S+\s+\[([^\]]+)\]\s+"[^"]*"\s+(\d+)\s+\S+\s+(\S+)"#)
        .expect("access log pattern is valid")
});

/// `$time_local`, e.g. `28/Feb/2026:09:41:00 +0300`.
const TIME_LOCAL_FORMAT: &str = "%d/%b/%Y:%H:%M:%S %z";

/// Map a `$host` value to the service it serves. Case-sensitive.
pub fn service_for_host(host: &str) -> Option<Service> {
    match host {
        // mainnet
        "monad-rpc.huginn.tech" => Some(Service::Rpc),
        "wss.monad-rpc.huginn.tech" => Some(Service::Wss),
        "validator-api.huginn.tech" | "validators-api.huginn.tech" => Some(Service::ValidatorApi),
        // testnet
        "monad-testnet-rpc.huginn.tech" => Some(Service::Rpc),
        "wss.monad-testnet-rpc.huginn.tech" => Some(Service::Wss),
        "validator-api-testnet.huginn.tech" => Some(Service::ValidatorApi),
        _ => None,
    }
}

/// Parse one access-log line. Returns `None` for malformed lines and for
/// hosts that are not monitored.
pub fn parse_line(line: &str) -> Option<RequestEvent> {
    let line = line.trim_end_matches(['\r', '\n']);
    let caps = LOG_LINE.captures(line)?;

    let service = service_for_host(caps.get(1)?.as_str())?;
    let timestamp = parse_time_local(caps.get(2)?.as_str())?;
    let status = caps.get(3)?.as_str().parse::<u16>().ok()?;
    let response_time_seconds = parse_request_time(caps.get(4)?.as_str())?;

    Some(RequestEvent {
        service,
        timestamp,
        status: Some(status),
        response_time_seconds,
    })
}

/// Convert `$time_local` to unix seconds using the offset embedded in the
/// string, never the host timezone.
fn parse_time_local(value: &str) -> Option<i64> {
    DateTime::parse_from_str(value, TIME_LOCAL_FORMAT)
        .ok()
        .map(|dt| dt.timestamp())
}

fn parse_request_time(value: &str) -> Option<f64> {
    // f64::from_str also accepts "inf", "NaN" and exponents
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(host: &str, time: &str, status: &str, request_time: &str) -> String {
        format!(
            r#"{host} 203.0.113.7 [{time}] "POST / HTTP/1.1" {status} 512 {request_time} "-" "curl/8.5""#
        )
    }

    #[test]
    fn parses_known_hosts_into_services() {
        let fixtures = [
            ("monad-rpc.huginn.tech", Service::Rpc),
            ("monad-testnet-rpc.huginn.tech", Service::Rpc),
            ("wss.monad-rpc.huginn.tech", Service::Wss),
            ("wss.monad-testnet-rpc.huginn.tech", Service::Wss),
            ("validator-api.huginn.tech", Service::ValidatorApi),
            ("validators-api.huginn.tech", Service::ValidatorApi),
            ("validator-api-testnet.huginn.tech", Service::ValidatorApi),
        ];

        for (host, expected) in fixtures {
            let event = parse_line(&line(host, "28/Feb/2026:09:41:00 +0000", "200", "0.012"))
                .unwrap_or_else(|| panic!("{host} should parse"));
            assert_eq!(event.service, expected, "{host}");
        }
    }

    #[test]
    fn honours_embedded_offset() {
        // 2026-02-28T06:41:00Z
        let expected = 1_772_260_860;
        let fixtures = [
            "28/Feb/2026:09:41:00 +0300",
            "28/Feb/2026:06:41:00 +0000",
            "28/Feb/2026:01:41:00 -0500",
            "28/Feb/2026:12:11:00 +0530",
        ];

        for time in fixtures {
            let event = parse_line(&line("monad-rpc.huginn.tech", time, "200", "0.1")).unwrap();
            assert_eq!(event.timestamp, expected, "{time}");
        }
    }

    #[test]
    fn extracts_status_and_request_time() {
        let event = parse_line(&line(
            "monad-rpc.huginn.tech",
            "01/Jan/2026:00:00:00 +0000",
            "503",
            "1.250",
        ))
        .unwrap();

        assert_eq!(event.timestamp, 1_767_225_600);
        assert_eq!(event.status, Some(503));
        assert_eq!(event.response_time_seconds, 1.25);
        assert!(event.is_error());
    }

    #[test]
    fn ignores_trailing_fields_and_carriage_return() {
        let raw = "monad-rpc.huginn.tech 10.0.0.1 [01/Jan/2026:00:00:00 +0000] \"GET /health HTTP/1.1\" 200 2 0.000 extra fields here\r\n";
        let event = parse_line(raw).unwrap();
        assert_eq!(event.status, Some(200));
        assert_eq!(event.response_time_seconds, 0.0);
    }

    #[test]
    fn rejects_unknown_hosts_and_malformed_lines() {
        let rejected = [
            line("example.com", "28/Feb/2026:09:41:00 +0300", "200", "0.1"),
            // hosts are case-sensitive
            line("MONAD-RPC.huginn.tech", "28/Feb/2026:09:41:00 +0300", "200", "0.1"),
            line("monad-rpc.huginn.tech", "28/Foo/2026:09:41:00 +0300", "200", "0.1"),
            line("monad-rpc.huginn.tech", "2026-02-28T09:41:00Z", "200", "0.1"),
            line("monad-rpc.huginn.tech", "28/Feb/2026:09:41:00 +0300", "OK", "0.1"),
            // status must be plain digits
            line("monad-rpc.huginn.tech", "28/Feb/2026:09:41:00 +0300", "+200", "0.1"),
            line("monad-rpc.huginn.tech", "28/Feb/2026:09:41:00 +0300", "20x", "0.1"),
            line("monad-rpc.huginn.tech", "28/Feb/2026:09:41:00 +0300", "99999", "0.1"),
            line("monad-rpc.huginn.tech", "28/Feb/2026:09:41:00 +0300", "200", "-"),
            line("monad-rpc.huginn.tech", "28/Feb/2026:09:41:00 +0300", "200", "inf"),
            line("monad-rpc.huginn.tech", "28/Feb/2026:09:41:00 +0300", "200", "-0.5"),
            String::new(),
            "monad-rpc.huginn.tech garbage".to_string(),
            "monad-rpc.huginn.tech 1.2.3.4 [28/Feb/2026:09:41:00 +0300] \"GET /\" 200".to_string(),
        ];

        for raw in &rejected {
            assert_eq!(parse_line(raw), None, "{raw:?}");
        }
    }
}
