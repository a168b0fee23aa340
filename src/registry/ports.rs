use std::collections::HashMap;
use thiserror::Error;

use super::record::PortBinding;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PortResolveError {
    /// The runtime did not assign a host port for a declared container port.
    /// This means the container is not reachable as the challenge intends,
    /// so resolution fails outright rather than returning a partial map.
    #[error("no host port assigned for container port {0}")]
    IncompleteAssignment(u16),
}

/// Build the ordered internal -> host port mapping for an instance.
///
/// `internal_ports` is the challenge's declared port list; `assigned` is
/// what the runtime reports after start. The result preserves declaration
/// order and contains exactly the declared ports.
pub fn resolve(
    internal_ports: &[u16],
    assigned: &HashMap<u16, u16>,
) -> Result<Vec<PortBinding>, PortResolveError> {
    internal_ports
        .iter()
        .map(|&internal| {
            assigned
                .get(&internal)
                .map(|&host| PortBinding { internal, host })
                .ok_or(PortResolveError::IncompleteAssignment(internal))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_declaration_order() {
        let assigned = HashMap::from([(1337, 30001), (1338, 30002)]);
        let mappings = resolve(&[1337, 1338], &assigned).unwrap();
        assert_eq!(
            mappings,
            vec![
                PortBinding { internal: 1337, host: 30001 },
                PortBinding { internal: 1338, host: 30002 },
            ]
        );
    }

    #[test]
    fn order_follows_declaration_not_assignment() {
        let assigned = HashMap::from([(80, 30080), (22, 30022), (443, 30443)]);
        let mappings = resolve(&[443, 22, 80], &assigned).unwrap();
        let internals: Vec<u16> = mappings.iter().map(|m| m.internal).collect();
        assert_eq!(internals, vec![443, 22, 80]);
    }

    #[test]
    fn missing_assignment_fails_without_partial_result() {
        let assigned = HashMap::from([(1337, 30001)]);
        let err = resolve(&[1337, 1338], &assigned).unwrap_err();
        assert_eq!(err, PortResolveError::IncompleteAssignment(1338));
    }

    #[test]
    fn extra_runtime_ports_are_ignored() {
        let assigned = HashMap::from([(1337, 30001), (9999, 39999)]);
        let mappings = resolve(&[1337], &assigned).unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].internal, 1337);
    }

    #[test]
    fn empty_declaration_resolves_empty() {
        let mappings = resolve(&[], &HashMap::new()).unwrap();
        assert!(mappings.is_empty());
    }
}
