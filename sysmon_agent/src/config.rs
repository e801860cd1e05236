//! Agent configuration and command-line parsing.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use thiserror::Error;

use crate::cpu::DEFAULT_WINDOW;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(2000);

pub const USAGE: &str = "Usage: sysmon_agent [--port PORT|-p PORT] [--host ADDR] [--cpu] [--ram] [--cpu-cores] [--interval MS|-i MS]";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0}")]
    Help(String),
    #[error("missing value for {0}")]
    MissingValue(&'static str),
    #[error("invalid value {value:?} for {flag}")]
    InvalidValue { flag: &'static str, value: String },
    #[error("unexpected argument {0:?}")]
    Unexpected(String),
}

/// Read-only settings shared by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Report aggregate CPU usage and core count.
    pub cpu: bool,
    /// Report total memory and memory usage.
    pub ram: bool,
    /// Add the per-core breakdown to the CPU section.
    pub cpu_cores: bool,
    /// Period of each connection's broadcast timer.
    pub interval: Duration,
    /// Gap between the two tick reads of a CPU estimate.
    pub cpu_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            cpu: false,
            ram: false,
            cpu_cores: false,
            interval: DEFAULT_INTERVAL,
            cpu_window: DEFAULT_WINDOW,
        }
    }
}

impl Config {
    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                flag: "--interval",
                value: "0".into(),
            });
        }
        if self.cpu_window.is_zero() {
            return Err(ConfigError::InvalidValue {
                flag: "cpu window",
                value: "0".into(),
            });
        }
        Ok(self)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Parses `argv` (program name first). Without any metric flag the
    /// agent reports CPU and RAM.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self, ConfigError> {
        let mut it = args.into_iter();
        let _ = it.next(); // program name
        let mut cfg = Config::default();
        let mut any_metric = false;

        while let Some(arg) = it.next() {
            let (flag, inline) = match arg.split_once('=') {
                Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
                _ => (arg.clone(), None),
            };
            match flag.as_str() {
                "-h" | "--help" => return Err(ConfigError::Help(USAGE.to_string())),
                "--port" | "-p" => {
                    let v = value_for("--port", inline, &mut it)?;
                    cfg.port = parse_num("--port", &v)?;
                }
                "--host" => {
                    let v = value_for("--host", inline, &mut it)?;
                    cfg.host = v.parse().map_err(|_| ConfigError::InvalidValue {
                        flag: "--host",
                        value: v.clone(),
                    })?;
                }
                "--interval" | "-i" => {
                    let v = value_for("--interval", inline, &mut it)?;
                    cfg.interval = Duration::from_millis(parse_num("--interval", &v)?);
                }
                "--cpu" => {
                    cfg.cpu = true;
                    any_metric = true;
                }
                "--ram" => {
                    cfg.ram = true;
                    any_metric = true;
                }
                "--cpu-cores" => {
                    cfg.cpu = true;
                    cfg.cpu_cores = true;
                    any_metric = true;
                }
                _ => return Err(ConfigError::Unexpected(arg)),
            }
        }
        if !any_metric {
            cfg.cpu = true;
            cfg.ram = true;
        }
        cfg.validate()
    }
}

fn value_for<I: Iterator<Item = String>>(
    flag: &'static str,
    inline: Option<String>,
    it: &mut I,
) -> Result<String, ConfigError> {
    inline
        .or_else(|| it.next())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingValue(flag))
}

fn parse_num<T: std::str::FromStr>(flag: &'static str, v: &str) -> Result<T, ConfigError> {
    v.parse().map_err(|_| ConfigError::InvalidValue {
        flag,
        value: v.to_string(),
    })
}
