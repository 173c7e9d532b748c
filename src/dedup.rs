//! Mirror deduplication.
//!
//! Identical text returned "from" several hosts is syndication, not
//! corroboration. Findings for the same (entity, metric) whose normalized
//! payload prefix hashes to the same fingerprint are collapsed: the finding
//! with the highest effective weight stays independent, the others are marked
//! as its mirrors and their hosts recorded on it.
//!
//! The outcome does not depend on the order findings arrive in.

use std::cmp::Ordering;
use std::collections::HashMap;

use blake3::Hasher;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::entity::GeoEntityId;
use crate::error::ConfigurationError;
use crate::finding::ResearchFinding;
use crate::metric::Metric;

/// Deduplication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Characters of normalized payload compared.
    pub prefix_chars: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { prefix_chars: 240 }
    }
}

impl DedupConfig {
    /// Validates the prefix length.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError::InvalidSetting` for a zero prefix.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.prefix_chars == 0 {
            return Err(ConfigurationError::setting("dedup.prefix_chars", "must be positive"));
        }
        Ok(())
    }
}

/// Counters from one deduplication pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    /// Groups with more than one member.
    pub groups: usize,
    /// Findings marked as mirrors.
    pub mirrors_collapsed: usize,
}

/// Lowercased alphanumeric tokens joined by single spaces, cut to `prefix_chars`.
///
/// # Examples
///
/// ```
/// use market_consensus::dedup::normalize_payload;
///
/// assert_eq!(
///     normalize_payload("  Median RENT:\n$1,650 (Oct.)", 240),
///     "median rent 1 650 oct"
/// );
/// assert_eq!(normalize_payload("abcdef", 3), "abc");
/// ```
#[must_use]
pub fn normalize_payload(text: &str, prefix_chars: usize) -> String {
    let joined = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ");
    joined.chars().take(prefix_chars).collect()
}

/// Fingerprint of a payload, or `None` for an empty one.
#[must_use]
pub fn payload_fingerprint(text: &str, prefix_chars: usize) -> Option<[u8; 32]> {
    let normalized = normalize_payload(text, prefix_chars);
    if normalized.is_empty() {
        return None;
    }
    let mut hasher = Hasher::new();
    hasher.update(normalized.as_bytes());
    Some(*hasher.finalize().as_bytes())
}

/// Marks mirrored findings in place.
pub fn deduplicate(findings: &mut [ResearchFinding], config: &DedupConfig) -> DedupStats {
    let mut groups: HashMap<(GeoEntityId, Metric, [u8; 32]), Vec<usize>> = HashMap::new();
    for (idx, finding) in findings.iter().enumerate() {
        if let Some(fp) = payload_fingerprint(&finding.payload, config.prefix_chars) {
            groups
                .entry((finding.entity, finding.metric.clone(), fp))
                .or_default()
                .push(idx);
        }
    }

    let mut stats = DedupStats::default();
    for members in groups.values().filter(|m| m.len() > 1) {
        let Some(&winner) = members
            .iter()
            .max_by(|&&a, &&b| rank(&findings[a], &findings[b]))
        else {
            continue;
        };
        let winner_id = findings[winner].id;
        let winner_host = findings[winner].actual_source_host.clone();

        let mut hosts = Vec::new();
        for &idx in members.iter().filter(|&&idx| idx != winner) {
            let mirror = &mut findings[idx];
            mirror.mirror_of = Some(winner_id);
            hosts.push(mirror.actual_source_host.clone());
            hosts.extend(std::mem::take(&mut mirror.mirrored_from_hosts));
        }

        let kept = &mut findings[winner];
        kept.mirrored_from_hosts
            .extend(hosts.into_iter().filter(|h| *h != winner_host));

        stats.groups += 1;
        stats.mirrors_collapsed += members.len() - 1;
        debug!(
            host = %kept.actual_source_host,
            metric = %kept.metric,
            mirrors = members.len() - 1,
            "Collapsed mirrored payloads"
        );
    }
    stats
}

/// Total order used to pick a group's winner; the greatest wins.
///
/// Higher effective weight, then higher trust, then the lexicographically
/// smaller host and URL.
fn rank(a: &ResearchFinding, b: &ResearchFinding) -> Ordering {
    a.effective_weight
        .total_cmp(&b.effective_weight)
        .then(a.trust_weight.total_cmp(&b.trust_weight))
        .then_with(|| b.actual_source_host.cmp(&a.actual_source_host))
        .then_with(|| b.url.cmp(&a.url))
        .then_with(|| b.id.cmp(&a.id))
}
