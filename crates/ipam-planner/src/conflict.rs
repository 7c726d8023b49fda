//! CIDR conflict detection
//!
//! Checks a proposed set of blocks against itself and against blocks already
//! in use. Works for both address families; blocks of different families
//! never conflict.

use ipam_common::cidr;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    /// Proposed block overlaps a block in use
    OverlapsExisting,
    /// Two proposed blocks overlap
    OverlapsProposed,
    /// Entry is not valid CIDR notation
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub kind: ConflictKind,
    pub severity: ConflictSeverity,
    /// Proposed entry, as given
    pub cidr: String,
    /// Entry it collides with, if any
    pub other: Option<String>,
    pub detail: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub checked: usize,
    pub conflicts: Vec<Conflict>,
}

impl ConflictReport {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn count(&self, severity: ConflictSeverity) -> usize {
        self.conflicts.iter().filter(|c| c.severity == severity).count()
    }
}

/// Pairwise overlap check of `proposed` against `existing` and against itself
///
/// Identical blocks are high severity, partial overlaps medium. Malformed
/// entries of either list are reported as high-severity invalid input and
/// skipped for overlap checks.
pub fn detect_conflicts<P, E>(proposed: &[P], existing: &[E]) -> ConflictReport
where
    P: AsRef<str>,
    E: AsRef<str>,
{
    let mut conflicts = Vec::new();

    let proposed: Vec<(&str, Option<IpNetwork>)> = proposed
        .iter()
        .map(|raw| parse_or_report(raw.as_ref(), &mut conflicts))
        .collect();
    let existing: Vec<(&str, Option<IpNetwork>)> = existing
        .iter()
        .map(|raw| parse_or_report(raw.as_ref(), &mut conflicts))
        .collect();

    for (i, (raw, network)) in proposed.iter().enumerate() {
        let Some(network) = network else { continue };

        for (other_raw, other) in &existing {
            if let Some(other) = other {
                if let Some(conflict) = overlap(ConflictKind::OverlapsExisting, raw, network, other_raw, other) {
                    conflicts.push(conflict);
                }
            }
        }

        for (other_raw, other) in &proposed[i + 1..] {
            if let Some(other) = other {
                if let Some(conflict) = overlap(ConflictKind::OverlapsProposed, raw, network, other_raw, other) {
                    conflicts.push(conflict);
                }
            }
        }
    }

    ConflictReport {
        checked: proposed.len(),
        conflicts,
    }
}

fn parse_or_report<'a>(raw: &'a str, conflicts: &mut Vec<Conflict>) -> (&'a str, Option<IpNetwork>) {
    match cidr::parse_cidr(raw) {
        Ok(network) => (raw, Some(network)),
        Err(err) => {
            conflicts.push(Conflict {
                kind: ConflictKind::Invalid,
                severity: ConflictSeverity::High,
                cidr: raw.to_string(),
                other: None,
                detail: err.to_string(),
            });
            (raw, None)
        }
    }
}

fn overlap(kind: ConflictKind, raw: &str, a: &IpNetwork, other_raw: &str, b: &IpNetwork) -> Option<Conflict> {
    if !cidr::overlaps(a, b) {
        return None;
    }

    let (severity, detail) = if a == b {
        (ConflictSeverity::High, format!("{a} is identical to {b}"))
    } else if a.prefix() < b.prefix() {
        (ConflictSeverity::Medium, format!("{a} contains {b}"))
    } else {
        (ConflictSeverity::Medium, format!("{a} is inside {b}"))
    };

    Some(Conflict {
        kind,
        severity,
        cidr: raw.to_string(),
        other: Some(other_raw.to_string()),
        detail,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_and_partial_overlaps() {
        let report = detect_conflicts(
            &["10.0.0.0/24", "10.1.0.0/16", "192.168.0.0/24"],
            &["10.0.0.0/24", "10.1.4.0/22"],
        );

        assert_eq!(report.checked, 3);
        assert_eq!(report.conflicts.len(), 2);
        assert_eq!(report.count(ConflictSeverity::High), 1);
        assert_eq!(report.count(ConflictSeverity::Medium), 1);

        let partial = &report.conflicts[1];
        assert_eq!(partial.kind, ConflictKind::OverlapsExisting);
        assert_eq!(partial.other.as_deref(), Some("10.1.4.0/22"));
        assert_eq!(partial.detail, "10.1.0.0/16 contains 10.1.4.0/22");
    }

    #[test]
    fn test_proposed_against_itself() {
        let report = detect_conflicts::<_, &str>(&["10.0.0.0/25", "10.0.0.0/24", "10.0.0.0/25"], &[]);
        let kinds: Vec<_> = report.conflicts.iter().map(|c| (c.kind, c.severity)).collect();
        assert_eq!(
            kinds,
            [
                (ConflictKind::OverlapsProposed, ConflictSeverity::Medium),
                (ConflictKind::OverlapsProposed, ConflictSeverity::High),
                (ConflictKind::OverlapsProposed, ConflictSeverity::Medium),
            ]
        );
    }

    #[test]
    fn test_malformed_entries_are_high() {
        let report = detect_conflicts(&["10.0.0.0/33", "not-a-cidr", "10.0.0.5/24"], &["banana"]);
        assert_eq!(report.conflicts.len(), 4);
        assert!(report
            .conflicts
            .iter()
            .all(|c| c.kind == ConflictKind::Invalid && c.severity == ConflictSeverity::High));
    }

    #[test]
    fn test_families_never_conflict() {
        let report = detect_conflicts(&["::/0"], &["0.0.0.0/0"]);
        assert!(!report.has_conflicts());
    }
}
