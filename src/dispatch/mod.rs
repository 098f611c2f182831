//! Command dispatch to the device communication server.
//!
//! One request per TCP connection: a `key=value` line naming the device and
//! command, answered by a single `key=value` line carrying a `result` code.
//! Every failure collapses to an unsuccessful [`CommandResponse`]; nothing
//! here retries.

pub mod props;

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::config::DispatchConfig;
use crate::error::GateError;

/// Command type used when the caller leaves it blank.
pub const DEFAULT_COMMAND_TYPE: &str = "config";

/// Command name the operator ping workflow sends.
pub const PING_COMMAND: &str = "LocateNow";

/// Status codes returned by the communication server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Success,
    InvalidAccount,
    InvalidDevice,
    InvalidServer,
    NotAuthorized,
    OverLimit,
    InvalidCommand,
    InvalidArg,
    InvalidType,
    EmptyRequest,
    NotSupported,
    UnknownHost,
    TransmitFail,
    NoSession,
    InvalidPacket,
    InternalError,
}

impl ResultCode {
    pub fn code(self) -> &'static str {
        match self {
            Self::Success => "OK000",
            Self::InvalidAccount => "AC001",
            Self::InvalidDevice => "DV001",
            Self::InvalidServer => "SR001",
            Self::NotAuthorized => "AU001",
            Self::OverLimit => "AU002",
            Self::InvalidCommand => "CM001",
            Self::InvalidArg => "CM002",
            Self::InvalidType => "CM003",
            Self::EmptyRequest => "CM004",
            Self::NotSupported => "CM005",
            Self::UnknownHost => "HP001",
            Self::TransmitFail => "TX001",
            Self::NoSession => "TX002",
            Self::InvalidPacket => "PK001",
            Self::InternalError => "XX001",
        }
    }

    /// Map a wire code back to its variant. Blank means success.
    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        if code.is_empty() {
            return Some(Self::Success);
        }
        [
            Self::Success,
            Self::InvalidAccount,
            Self::InvalidDevice,
            Self::InvalidServer,
            Self::NotAuthorized,
            Self::OverLimit,
            Self::InvalidCommand,
            Self::InvalidArg,
            Self::InvalidType,
            Self::EmptyRequest,
            Self::NotSupported,
            Self::UnknownHost,
            Self::TransmitFail,
            Self::NoSession,
            Self::InvalidPacket,
            Self::InternalError,
        ]
        .into_iter()
        .find(|rc| rc.code().eq_ignore_ascii_case(code))
    }

    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Outcome of one dispatched command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub result: ResultCode,
    pub message: Option<String>,
}

impl CommandResponse {
    fn local(result: ResultCode, message: impl Into<String>) -> Self {
        Self {
            result,
            message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_success()
    }
}

/// Identity of the device a command is addressed to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceRef {
    pub account_id: String,
    pub device_id: String,
    pub unique_id: String,
    /// Communication server the device is bound to. Blank means none.
    pub device_code: Option<String>,
}

impl DeviceRef {
    pub fn new(account_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            account_id: account_id.into(),
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn with_device_code(mut self, device_code: impl Into<String>) -> Self {
        self.device_code = Some(device_code.into());
        self
    }

    fn server_code(&self) -> Option<&str> {
        self.device_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
    }
}

/// Sends commands to devices through the communication server.
pub struct CommandDispatcher {
    config: DispatchConfig,
    limiter: DefaultDirectRateLimiter,
}

impl CommandDispatcher {
    pub fn new(config: &DispatchConfig) -> Result<Self, GateError> {
        let per_sec = NonZeroU32::new(config.max_commands_per_sec).ok_or_else(|| {
            GateError::Config("dispatch.max_commands_per_sec must be greater than 0".to_string())
        })?;
        Ok(Self {
            config: config.clone(),
            limiter: RateLimiter::direct(Quota::per_second(per_sec)),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// True if the device is bound to a server and a command port is configured.
    pub fn is_ping_supported(&self, device: &DeviceRef) -> bool {
        device.server_code().is_some() && self.config.port != 0
    }

    /// Send a command. True only if the server acknowledged it with success.
    pub async fn send(&self, device: &DeviceRef, cmd_type: &str, cmd_name: &str, args: &[&str]) -> bool {
        self.dispatch(device, cmd_type, cmd_name, args).await.is_success()
    }

    /// Like [`send`](Self::send), bounded by `timeout` instead of the
    /// configured default.
    pub async fn send_with_timeout(
        &self,
        device: &DeviceRef,
        cmd_type: &str,
        cmd_name: &str,
        args: &[&str],
        timeout: Duration,
    ) -> bool {
        self.dispatch_with_timeout(device, cmd_type, cmd_name, args, timeout)
            .await
            .is_success()
    }

    /// Send a command and return the server's result code.
    pub async fn dispatch(
        &self,
        device: &DeviceRef,
        cmd_type: &str,
        cmd_name: &str,
        args: &[&str],
    ) -> CommandResponse {
        let timeout = Duration::from_millis(self.config.timeout_ms);
        self.dispatch_with_timeout(device, cmd_type, cmd_name, args, timeout)
            .await
    }

    /// Send a command, giving up after `timeout`. Expiry is reported as
    /// [`ResultCode::TransmitFail`].
    pub async fn dispatch_with_timeout(
        &self,
        device: &DeviceRef,
        cmd_type: &str,
        cmd_name: &str,
        args: &[&str],
        timeout: Duration,
    ) -> CommandResponse {
        let Some(server) = device.server_code() else {
            return CommandResponse::local(ResultCode::NotSupported, "device has no server binding");
        };
        if self.config.port == 0 {
            return CommandResponse::local(ResultCode::InvalidServer, "command port not configured");
        }
        if self.limiter.check().is_err() {
            tracing::warn!(
                "Command '{cmd_name}' for {}/{} dropped: dispatch rate exceeded",
                device.account_id,
                device.device_id
            );
            return CommandResponse::local(ResultCode::OverLimit, "dispatch rate exceeded");
        }

        let request = build_request(device, server, cmd_type, cmd_name, args);
        let response = match tokio::time::timeout(timeout, self.exchange(&request)).await {
            Ok(Ok(line)) => parse_response(&line),
            Ok(Err(e)) => CommandResponse::local(ResultCode::TransmitFail, e.to_string()),
            Err(_) => CommandResponse::local(
                ResultCode::TransmitFail,
                format!("no response within {}ms", timeout.as_millis()),
            ),
        };

        if response.is_success() {
            tracing::info!(
                "Command '{cmd_name}' acknowledged for {}/{}",
                device.account_id,
                device.device_id
            );
        } else {
            tracing::warn!(
                "Command '{cmd_name}' failed for {}/{}: {} {}",
                device.account_id,
                device.device_id,
                response.result.code(),
                response.message.as_deref().unwrap_or("")
            );
        }
        response
    }

    async fn exchange(&self, request: &str) -> std::io::Result<String> {
        let stream = TcpStream::connect((self.config.host.as_str(), self.config.port)).await?;
        let mut reader = BufReader::new(stream);
        reader.get_mut().write_all(request.as_bytes()).await?;
        reader.get_mut().write_all(b"\n").await?;
        reader.get_mut().flush().await?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "server closed connection without a response",
            ));
        }
        Ok(line)
    }
}

fn build_request(device: &DeviceRef, server: &str, cmd_type: &str, cmd_name: &str, args: &[&str]) -> String {
    let cmd_type = match cmd_type.trim() {
        "" => DEFAULT_COMMAND_TYPE,
        t => t,
    };
    let mut pairs: Vec<(String, &str)> = vec![
        ("account".to_string(), device.account_id.as_str()),
        ("device".to_string(), device.device_id.as_str()),
        ("unique".to_string(), device.unique_id.as_str()),
        ("server".to_string(), server),
        ("cmdtype".to_string(), cmd_type),
        ("cmdname".to_string(), cmd_name),
    ];
    for (i, arg) in args.iter().enumerate() {
        pairs.push((format!("arg{i}"), *arg));
    }
    props::encode(&pairs)
}

fn parse_response(line: &str) -> CommandResponse {
    let pairs = match props::parse(line) {
        Ok(pairs) => pairs,
        Err(e) => return CommandResponse::local(ResultCode::InvalidPacket, e.to_string()),
    };
    let message = props::get(&pairs, "message").map(str::to_string);
    let code = props::get(&pairs, "result").unwrap_or("");
    match ResultCode::from_code(code) {
        Some(result) => CommandResponse { result, message },
        None => CommandResponse::local(ResultCode::InternalError, format!("unrecognized result code '{code}'")),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    fn device() -> DeviceRef {
        DeviceRef::new("acme", "truck7")
            .with_unique_id("imei_353")
            .with_device_code("gtsdmtp")
    }

    fn config(port: u16, timeout_ms: u64, max_commands_per_sec: u32) -> DispatchConfig {
        DispatchConfig {
            host: "127.0.0.1".to_string(),
            port,
            timeout_ms,
            max_commands_per_sec,
        }
    }

    /// Accept one connection, capture its request line, reply with `reply`.
    async fn one_shot_server(reply: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await.unwrap();
            reader.get_mut().write_all(reply.as_bytes()).await.unwrap();
            line
        });
        (port, handle)
    }

    #[test]
    fn test_result_code_mapping() {
        assert_eq!(ResultCode::from_code("OK000"), Some(ResultCode::Success));
        assert_eq!(ResultCode::from_code(""), Some(ResultCode::Success));
        assert_eq!(ResultCode::from_code("au002"), Some(ResultCode::OverLimit));
        assert_eq!(ResultCode::from_code("CM005"), Some(ResultCode::NotSupported));
        assert_eq!(ResultCode::from_code("ZZ999"), None);
        assert_eq!(ResultCode::TransmitFail.code(), "TX001");
    }

    #[test]
    fn test_build_request_defaults_command_type() {
        let line = build_request(&device(), "gtsdmtp", "  ", "LocateNow", &["now", "two words"]);
        assert_eq!(
            line,
            "account=acme device=truck7 unique=imei_353 server=gtsdmtp cmdtype=config cmdname=LocateNow arg0=now arg1=\"two words\""
        );
    }

    #[test]
    fn test_parse_response_variants() {
        assert!(parse_response("result=OK000\n").is_success());
        assert!(parse_response("server=gtsdmtp\n").is_success());
        let resp = parse_response("result=TX001 message=\"device offline\"");
        assert_eq!(resp.result, ResultCode::TransmitFail);
        assert_eq!(resp.message.as_deref(), Some("device offline"));
        assert_eq!(parse_response("result=\"open").result, ResultCode::InvalidPacket);
        assert_eq!(parse_response("result=QQ123").result, ResultCode::InternalError);
    }

    #[test]
    fn test_is_ping_supported() {
        let dispatcher = CommandDispatcher::new(&config(31000, 100, 10)).unwrap();
        assert!(dispatcher.is_ping_supported(&device()));
        assert!(!dispatcher.is_ping_supported(&DeviceRef::new("acme", "truck7")));
        assert!(!dispatcher.is_ping_supported(&DeviceRef::new("acme", "truck7").with_device_code(" ")));

        let disabled = CommandDispatcher::new(&config(0, 100, 10)).unwrap();
        assert!(!disabled.is_ping_supported(&device()));
    }

    #[test]
    fn test_zero_rate_is_config_error() {
        let err = CommandDispatcher::new(&config(31000, 100, 0)).err().unwrap();
        assert_eq!(err.kind(), "Config");
    }

    #[tokio::test]
    async fn test_send_acknowledged() {
        let (port, server) = one_shot_server("result=OK000\n").await;
        let dispatcher = CommandDispatcher::new(&config(port, 2000, 10)).unwrap();

        assert!(dispatcher.send(&device(), "", "LocateNow", &[]).await);
        let request = server.await.unwrap();
        assert!(request.starts_with("account=acme device=truck7"));
        assert!(request.contains("cmdtype=config cmdname=LocateNow"));
        assert!(request.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_send_failure_code() {
        let (port, server) = one_shot_server("result=CM005 message=\"Not Supported\"\n").await;
        let dispatcher = CommandDispatcher::new(&config(port, 2000, 10)).unwrap();

        let resp = dispatcher.dispatch(&device(), "config", "Reboot", &[]).await;
        assert_eq!(resp.result, ResultCode::NotSupported);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(stream);
        });
        let dispatcher = CommandDispatcher::new(&config(port, 50, 10)).unwrap();

        let resp = dispatcher.dispatch(&device(), "", "LocateNow", &[]).await;
        assert_eq!(resp.result, ResultCode::TransmitFail);
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_caller_timeout_overrides_configured() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(500)).await;
            drop(stream);
        });
        // The configured timeout would wait far longer than the server stalls.
        let dispatcher = CommandDispatcher::new(&config(port, 60_000, 10)).unwrap();

        let started = std::time::Instant::now();
        let sent = dispatcher
            .send_with_timeout(&device(), "", "LocateNow", &[], Duration::from_millis(50))
            .await;
        assert!(!sent);
        assert!(started.elapsed() < Duration::from_millis(450));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_connection_refused() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let dispatcher = CommandDispatcher::new(&config(port, 500, 10)).unwrap();
        assert!(!dispatcher.send(&device(), "", "LocateNow", &[]).await);
    }

    #[tokio::test]
    async fn test_unsupported_device_not_sent() {
        let dispatcher = CommandDispatcher::new(&config(1, 50, 10)).unwrap();
        let resp = dispatcher
            .dispatch(&DeviceRef::new("acme", "truck7"), "", "LocateNow", &[])
            .await;
        assert_eq!(resp.result, ResultCode::NotSupported);
    }

    #[tokio::test]
    async fn test_dispatch_rate_limited() {
        let (port, server) = one_shot_server("result=OK000\n").await;
        let dispatcher = CommandDispatcher::new(&config(port, 2000, 1)).unwrap();

        assert!(dispatcher.send(&device(), "", "LocateNow", &[]).await);
        server.await.unwrap();

        let resp = dispatcher.dispatch(&device(), "", "LocateNow", &[]).await;
        assert_eq!(resp.result, ResultCode::OverLimit);
    }
}
