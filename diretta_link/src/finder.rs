//! Target discovery.
//!
//! The vendor finder enumerates DACs reachable on the local segment and
//! measures the path MTU toward a chosen one. It is a linkage seam: the
//! real implementation wraps the vendor SDK, the loopback one serves tests
//! and the sandbox.

use std::net::SocketAddr;

use crate::error::{LinkError, Result};

/// A DAC advertised on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub address: SocketAddr,
    pub name: String,
    pub product_id: u32,
}

/// Vendor finder seam.
pub trait Finder: Send {
    /// Open the finder. Fails with [`LinkError::FinderOpenFailed`].
    fn open(&mut self) -> Result<()>;

    /// Enumerate currently reachable targets. An empty list is not an
    /// error at this level; callers decide how long to keep looking.
    fn list_targets(&mut self) -> Result<Vec<Target>>;

    /// Measure the usable per-path MTU toward `address`. Callers fall back
    /// to a configured default on failure.
    fn measure_mtu(&mut self, address: SocketAddr) -> Result<u32>;
}

/// Picks one target from an enumeration.
///
/// A name filter (case-insensitive substring) narrows the list first.
/// Then: exactly one candidate wins outright; an explicit in-range index
/// wins; otherwise the first candidate is taken.
pub fn select_target<'a>(
    targets: &'a [Target],
    name_filter: Option<&str>,
    index: Option<usize>,
) -> Result<&'a Target> {
    let filtered: Vec<&Target> = match name_filter {
        Some(filter) => {
            let filter = filter.to_ascii_lowercase();
            targets.iter().filter(|t| t.name.to_ascii_lowercase().contains(&filter)).collect()
        }
        None => targets.iter().collect(),
    };

    match filtered.as_slice() {
        [] => Err(LinkError::NoTargetsFound),
        [only] => Ok(only),
        many => match index {
            Some(i) if i < many.len() => Ok(many[i]),
            _ => Ok(many[0]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, port: u16) -> Target {
        Target {
            address: format!("192.168.1.10:{port}").parse().unwrap(),
            name: name.to_string(),
            product_id: port as u32,
        }
    }

    #[test]
    fn test_single_target_wins_outright() {
        let targets = vec![target("DAC-One", 1)];
        // Even with an out-of-range index request.
        let picked = select_target(&targets, None, Some(7)).unwrap();
        assert_eq!(picked.name, "DAC-One");
    }

    #[test]
    fn test_explicit_index_in_range() {
        let targets = vec![target("A", 1), target("B", 2), target("C", 3)];
        assert_eq!(select_target(&targets, None, Some(2)).unwrap().name, "C");
        // Out of range falls back to the first.
        assert_eq!(select_target(&targets, None, Some(9)).unwrap().name, "A");
        assert_eq!(select_target(&targets, None, None).unwrap().name, "A");
    }

    #[test]
    fn test_name_filter_narrows_first() {
        let targets = vec![target("Living Room", 1), target("Study DAC", 2), target("study dac mk2", 3)];
        assert_eq!(select_target(&targets, Some("study"), None).unwrap().name, "Study DAC");
        assert_eq!(select_target(&targets, Some("study"), Some(1)).unwrap().name, "study dac mk2");
        assert!(matches!(select_target(&targets, Some("kitchen"), None), Err(LinkError::NoTargetsFound)));
    }

    #[test]
    fn test_empty_enumeration() {
        assert!(matches!(select_target(&[], None, None), Err(LinkError::NoTargetsFound)));
    }
}
