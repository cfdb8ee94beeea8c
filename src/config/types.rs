//! Configuration types.

use serde::Deserialize;

use crate::ring::tpacket;
use crate::{Error, Result};

/// Total packet buffer memory when nothing else is specified, in megabytes.
pub const DEFAULT_BUFFER_SIZE_MB: u32 = 128;
/// Environment fallback consulted when `buffer_size_mb` is not set.
pub const BUFFER_SIZE_ENV: &str = "AF_PACKET_BUFFER_SIZE";
const DEFAULT_SNAPLEN: u32 = 1518;
const DEFAULT_TIMEOUT_MS: i32 = 1000;

/// Operating mode for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Observe only; every interface stands alone.
    #[default]
    Passive,
    /// Interfaces come in bridged pairs and forward each other's traffic.
    Inline,
}

/// User-facing session options (TOML file or key-value variables).
#[derive(Debug, Clone, Deserialize)]
pub struct Options {
    /// Colon-separated interface specification.
    pub interfaces: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default = "default_snaplen")]
    pub snaplen: u32,
    /// Poll timeout in milliseconds; non-positive means wait indefinitely.
    #[serde(default = "default_timeout")]
    pub timeout_ms: i32,
    /// Megabytes of total ring memory, or "max" for the default.
    #[serde(default)]
    pub buffer_size_mb: Option<String>,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub fanout_type: Option<String>,
    #[serde(default)]
    pub fanout_flags: Vec<String>,
    /// BPF expression installed after initialization.
    #[serde(default)]
    pub filter: Option<String>,
}

fn default_snaplen() -> u32 {
    DEFAULT_SNAPLEN
}

fn default_timeout() -> i32 {
    DEFAULT_TIMEOUT_MS
}

impl Options {
    pub fn new(interfaces: impl Into<String>, mode: Mode) -> Self {
        Options {
            interfaces: interfaces.into(),
            mode,
            snaplen: DEFAULT_SNAPLEN,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            buffer_size_mb: None,
            debug: false,
            fanout_type: None,
            fanout_flags: Vec::new(),
            filter: None,
        }
    }

    /// Apply one key-value variable the way an embedding host hands them in.
    pub fn apply_variable(&mut self, key: &str, value: Option<&str>) -> Result<()> {
        fn require<'a>(key: &str, value: Option<&'a str>) -> Result<&'a str> {
            value.ok_or_else(|| Error::Config(format!("{key} requires an argument")))
        }
        match key {
            "buffer_size_mb" => self.buffer_size_mb = Some(require(key, value)?.to_string()),
            "debug" => {
                if value.is_some() {
                    return Err(Error::Config("debug takes no argument".to_string()));
                }
                self.debug = true;
            }
            "fanout_type" => self.fanout_type = Some(require(key, value)?.to_string()),
            "fanout_flag" => self.fanout_flags.push(require(key, value)?.to_string()),
            _ => return Err(Error::Config(format!("unrecognized variable: {key}"))),
        }
        Ok(())
    }

    /// Resolve options into the typed configuration the engine consumes.
    pub fn resolve(&self) -> Result<Config> {
        if self.snaplen == 0 {
            return Err(Error::Config("snaplen must be positive".to_string()));
        }

        let size_str = self
            .buffer_size_mb
            .clone()
            .or_else(|| std::env::var(BUFFER_SIZE_ENV).ok());
        let size_mb = match size_str.as_deref() {
            None | Some("max") => DEFAULT_BUFFER_SIZE_MB,
            Some(s) => s
                .trim()
                .parse::<u32>()
                .map_err(|_| Error::Config(format!("invalid buffer_size_mb: '{s}'")))?,
        };
        if size_mb == 0 {
            return Err(Error::Config("buffer_size_mb must be positive".to_string()));
        }

        let fanout = match self.fanout_type.as_deref() {
            None => None,
            Some(kind) => {
                let kind = match kind {
                    "hash" => FanoutKind::Hash,
                    "lb" => FanoutKind::Lb,
                    "cpu" => FanoutKind::Cpu,
                    "rollover" => FanoutKind::Rollover,
                    "rnd" => FanoutKind::Rnd,
                    "qm" => FanoutKind::Qm,
                    other => {
                        return Err(Error::Config(format!(
                            "unrecognized fanout_type: '{other}'"
                        )))
                    }
                };
                let mut flags = 0u16;
                for flag in &self.fanout_flags {
                    flags |= match flag.as_str() {
                        "rollover" => tpacket::PACKET_FANOUT_FLAG_ROLLOVER,
                        "defrag" => tpacket::PACKET_FANOUT_FLAG_DEFRAG,
                        other => {
                            return Err(Error::Config(format!(
                                "unrecognized fanout_flag: '{other}'"
                            )))
                        }
                    };
                }
                Some(FanoutConfig { kind, flags })
            }
        };

        Ok(Config {
            device: self.interfaces.clone(),
            mode: self.mode,
            snaplen: self.snaplen,
            timeout_ms: if self.timeout_ms > 0 {
                self.timeout_ms
            } else {
                -1
            },
            buffer_bytes: u64::from(size_mb) * 1024 * 1024,
            debug: self.debug,
            fanout,
        })
    }
}

/// Resolved session configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub device: String,
    pub mode: Mode,
    pub snaplen: u32,
    pub timeout_ms: i32,
    /// Total packet buffer memory, split evenly across all rings.
    pub buffer_bytes: u64,
    pub debug: bool,
    pub fanout: Option<FanoutConfig>,
}

/// Kernel fanout load-balancing method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutKind {
    Hash,
    Lb,
    Cpu,
    Rollover,
    Rnd,
    Qm,
}

impl FanoutKind {
    pub fn kernel_value(self) -> u16 {
        match self {
            FanoutKind::Hash => tpacket::PACKET_FANOUT_HASH,
            FanoutKind::Lb => tpacket::PACKET_FANOUT_LB,
            FanoutKind::Cpu => tpacket::PACKET_FANOUT_CPU,
            FanoutKind::Rollover => tpacket::PACKET_FANOUT_ROLLOVER,
            FanoutKind::Rnd => tpacket::PACKET_FANOUT_RND,
            FanoutKind::Qm => tpacket::PACKET_FANOUT_QM,
        }
    }
}

/// Fanout group configuration applied to every instance at start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutConfig {
    pub kind: FanoutKind,
    pub flags: u16,
}

impl FanoutConfig {
    /// PACKET_FANOUT argument: method and flags in the high half, the
    /// interface index as the group id in the low half.
    pub fn sockopt_arg(&self, ifindex: i32) -> libc::c_int {
        ((i32::from(self.kind.kernel_value() | self.flags)) << 16) | (ifindex & 0xffff)
    }
}

/// Description of one recognized configuration variable.
#[derive(Debug, Clone, Copy)]
pub struct VariableDesc {
    pub name: &'static str,
    pub description: &'static str,
    pub requires_argument: bool,
}

/// The variables [`Options::apply_variable`] recognizes.
pub fn variable_descs() -> &'static [VariableDesc] {
    const DESCS: [VariableDesc; 4] = [
        VariableDesc {
            name: "buffer_size_mb",
            description: "Packet buffer space to allocate in megabytes",
            requires_argument: true,
        },
        VariableDesc {
            name: "debug",
            description: "Enable debugging output",
            requires_argument: false,
        },
        VariableDesc {
            name: "fanout_type",
            description: "Fanout loadbalancing method",
            requires_argument: true,
        },
        VariableDesc {
            name: "fanout_flag",
            description: "Fanout loadbalancing option",
            requires_argument: true,
        },
    ];
    &DESCS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve() {
        let config = Options::new("lo", Mode::Passive).resolve().unwrap();
        assert_eq!(config.snaplen, DEFAULT_SNAPLEN);
        assert_eq!(config.timeout_ms, DEFAULT_TIMEOUT_MS);
        assert_eq!(
            config.buffer_bytes,
            u64::from(DEFAULT_BUFFER_SIZE_MB) * 1024 * 1024
        );
        assert!(config.fanout.is_none());
        assert!(!config.debug);
    }

    #[test]
    fn test_buffer_size_variable() {
        let mut options = Options::new("lo", Mode::Passive);
        options
            .apply_variable("buffer_size_mb", Some("64"))
            .unwrap();
        let config = options.resolve().unwrap();
        assert_eq!(config.buffer_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_buffer_size_max_falls_through() {
        let mut options = Options::new("lo", Mode::Passive);
        options
            .apply_variable("buffer_size_mb", Some("max"))
            .unwrap();
        let config = options.resolve().unwrap();
        assert_eq!(
            config.buffer_bytes,
            u64::from(DEFAULT_BUFFER_SIZE_MB) * 1024 * 1024
        );
    }

    #[test]
    fn test_buffer_size_invalid() {
        let mut options = Options::new("lo", Mode::Passive);
        options
            .apply_variable("buffer_size_mb", Some("lots"))
            .unwrap();
        assert!(matches!(options.resolve(), Err(Error::Config(_))));
    }

    #[test]
    fn test_debug_forbids_argument() {
        let mut options = Options::new("lo", Mode::Passive);
        assert!(options.apply_variable("debug", Some("yes")).is_err());
        options.apply_variable("debug", None).unwrap();
        assert!(options.debug);
    }

    #[test]
    fn test_unknown_variable() {
        let mut options = Options::new("lo", Mode::Passive);
        assert!(matches!(
            options.apply_variable("frobnicate", Some("1")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_fanout_resolution() {
        let mut options = Options::new("eth0", Mode::Passive);
        options.apply_variable("fanout_type", Some("hash")).unwrap();
        options
            .apply_variable("fanout_flag", Some("defrag"))
            .unwrap();
        options
            .apply_variable("fanout_flag", Some("rollover"))
            .unwrap();
        let fanout = options.resolve().unwrap().fanout.unwrap();
        assert_eq!(fanout.kind, FanoutKind::Hash);
        assert_eq!(
            fanout.flags,
            tpacket::PACKET_FANOUT_FLAG_DEFRAG | tpacket::PACKET_FANOUT_FLAG_ROLLOVER
        );

        // Method and flags land in the high half, the ifindex group id in
        // the low half.
        let arg = fanout.sockopt_arg(7);
        assert_eq!(arg & 0xffff, 7);
        assert_eq!(
            (arg >> 16) as u16,
            tpacket::PACKET_FANOUT_HASH
                | tpacket::PACKET_FANOUT_FLAG_DEFRAG
                | tpacket::PACKET_FANOUT_FLAG_ROLLOVER
        );
    }

    #[test]
    fn test_fanout_unknown_type() {
        let mut options = Options::new("eth0", Mode::Passive);
        options
            .apply_variable("fanout_type", Some("round-robin"))
            .unwrap();
        assert!(matches!(options.resolve(), Err(Error::Config(_))));
    }

    #[test]
    fn test_timeout_normalization() {
        let mut options = Options::new("lo", Mode::Passive);
        options.timeout_ms = 0;
        assert_eq!(options.resolve().unwrap().timeout_ms, -1);
        options.timeout_ms = -5;
        assert_eq!(options.resolve().unwrap().timeout_ms, -1);
        options.timeout_ms = 250;
        assert_eq!(options.resolve().unwrap().timeout_ms, 250);
    }

    #[test]
    fn test_toml_options() {
        let options: Options = toml::from_str(
            r#"
            interfaces = "eth0:eth1"
            mode = "inline"
            snaplen = 1600
            buffer_size_mb = "32"
            "#,
        )
        .unwrap();
        assert_eq!(options.mode, Mode::Inline);
        assert_eq!(options.snaplen, 1600);
        let config = options.resolve().unwrap();
        assert_eq!(config.buffer_bytes, 32 * 1024 * 1024);
    }

    #[test]
    fn test_variable_descs_cover_all_keys() {
        let descs = variable_descs();
        assert_eq!(descs.len(), 4);
        let mut options = Options::new("lo", Mode::Passive);
        for desc in descs {
            let value = desc.requires_argument.then_some("hash");
            // "hash" parses for fanout keys and buffer_size_mb is validated
            // later, so applying each advertised key must succeed.
            if desc.name == "buffer_size_mb" {
                options.apply_variable(desc.name, Some("16")).unwrap();
            } else {
                options.apply_variable(desc.name, value).unwrap();
            }
        }
    }
}
