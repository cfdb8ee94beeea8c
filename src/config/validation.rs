//! Device specification parsing and validation.
//!
//! Interfaces are named in a colon-separated list. Passive mode takes a flat
//! list (`eth0:eth1:eth2`). In-line mode takes bridge pairs, optionally
//! separated by a double colon (`eth0:eth1::eth2:eth3`); each pair becomes a
//! bidirectional forwarding bridge.

use super::Mode;
use crate::{Error, Result};

/// Kernel bound on interface name length, including the NUL.
pub const IFNAMSIZ: usize = 16;
/// Most interfaces a single context will drive.
pub const MAX_INTERFACES: usize = 32;

/// One parsed interface: its name and, in in-line mode, the index of its
/// bridge peer within the returned list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSpec {
    pub name: String,
    pub peer: Option<usize>,
}

/// Parse and validate a device specification for the given mode.
pub fn parse_device_spec(device: &str, mode: Mode) -> Result<Vec<InstanceSpec>> {
    let invalid = || Error::Config(format!("invalid interface specification: '{device}'"));

    if device.is_empty() || device.starts_with(':') || device.ends_with(':') {
        return Err(invalid());
    }
    if mode == Mode::Passive && device.contains("::") {
        return Err(invalid());
    }

    let mut specs: Vec<InstanceSpec> = Vec::new();
    for name in device.split(':') {
        // Empty tokens come from "::" pair separators; the names on either
        // side still pair positionally.
        if name.is_empty() {
            continue;
        }
        if name.len() >= IFNAMSIZ {
            return Err(Error::Config(format!(
                "interface name too long: '{name}' ({} >= {IFNAMSIZ})",
                name.len()
            )));
        }
        specs.push(InstanceSpec {
            name: name.to_string(),
            peer: None,
        });
        if specs.len() > MAX_INTERFACES {
            return Err(Error::Config(format!(
                "using more than {MAX_INTERFACES} interfaces is not supported"
            )));
        }
    }

    if specs.is_empty() {
        return Err(invalid());
    }

    if mode == Mode::Inline {
        if specs.len() % 2 != 0 {
            return Err(invalid());
        }
        for pair in (0..specs.len()).step_by(2) {
            specs[pair].peer = Some(pair + 1);
            specs[pair + 1].peer = Some(pair);
        }
    }

    Ok(specs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passive_flat_list() {
        let specs = parse_device_spec("eth0:eth1:eth2", Mode::Passive).unwrap();
        assert_eq!(specs.len(), 3);
        assert!(specs.iter().all(|s| s.peer.is_none()));
        assert_eq!(specs[1].name, "eth1");
    }

    #[test]
    fn test_single_interface() {
        let specs = parse_device_spec("lo", Mode::Passive).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].name, "lo");
    }

    #[test]
    fn test_inline_pairs() {
        let specs = parse_device_spec("eth0:eth1::eth2:eth3", Mode::Inline).unwrap();
        assert_eq!(specs.len(), 4);
        assert_eq!(specs[0].peer, Some(1));
        assert_eq!(specs[1].peer, Some(0));
        assert_eq!(specs[2].peer, Some(3));
        assert_eq!(specs[3].peer, Some(2));
    }

    #[test]
    fn test_inline_single_colon_pairs() {
        // Pairing is positional; the double colon is only a visual separator.
        let specs = parse_device_spec("eth0:eth1:eth2:eth3", Mode::Inline).unwrap();
        assert_eq!(specs[2].peer, Some(3));
    }

    #[test]
    fn test_peer_symmetry() {
        let specs = parse_device_spec("a0:a1::b0:b1::c0:c1", Mode::Inline).unwrap();
        for (i, spec) in specs.iter().enumerate() {
            let peer = spec.peer.unwrap();
            assert_eq!(specs[peer].peer, Some(i));
        }
    }

    #[test]
    fn test_leading_trailing_colon_rejected() {
        assert!(parse_device_spec(":eth0", Mode::Passive).is_err());
        assert!(parse_device_spec("eth0:", Mode::Passive).is_err());
        assert!(parse_device_spec(":", Mode::Inline).is_err());
    }

    #[test]
    fn test_passive_forbids_double_colon() {
        assert!(parse_device_spec("eth0::eth1", Mode::Passive).is_err());
    }

    #[test]
    fn test_inline_unpaired_rejected() {
        assert!(parse_device_spec("eth0:eth1:eth2", Mode::Inline).is_err());
        assert!(parse_device_spec("eth0", Mode::Inline).is_err());
    }

    #[test]
    fn test_empty_spec_rejected() {
        assert!(parse_device_spec("", Mode::Passive).is_err());
    }

    #[test]
    fn test_name_length_bound() {
        let long = "x".repeat(IFNAMSIZ);
        assert!(parse_device_spec(&long, Mode::Passive).is_err());
        let just_fits = "x".repeat(IFNAMSIZ - 1);
        assert!(parse_device_spec(&just_fits, Mode::Passive).is_ok());
    }

    #[test]
    fn test_interface_count_bound() {
        let at_limit = (0..MAX_INTERFACES)
            .map(|i| format!("if{i}"))
            .collect::<Vec<_>>()
            .join(":");
        assert_eq!(
            parse_device_spec(&at_limit, Mode::Passive).unwrap().len(),
            MAX_INTERFACES
        );

        let over = format!("{at_limit}:overflow");
        assert!(parse_device_spec(&over, Mode::Passive).is_err());
    }
}
