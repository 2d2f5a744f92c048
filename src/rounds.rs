//! Per-output round tracking.
//!
//! Every mixed output inherits its source input's round count plus one.
//! Counters are monotonic, survive restarts through a JSON state file, and
//! never change for failed or aborted sessions.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use dashcore::ScriptBuf;

/// Tracks completed mixing rounds per output script.
#[derive(Debug, Clone, Default)]
pub struct RoundTracker {
    counts: HashMap<ScriptBuf, u32>,
}

impl RoundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed rounds for a script. Unknown scripts have zero rounds.
    pub fn rounds_of(&self, script: &ScriptBuf) -> u32 {
        self.counts.get(script).copied().unwrap_or(0)
    }

    /// Record a completed session: the mixed output picks up the source
    /// input's count plus one. Counters never decrease, so a replayed
    /// completion cannot lower an existing count.
    pub fn record_completed_round(&mut self, source: &ScriptBuf, mixed_output: &ScriptBuf) {
        let inherited = self.rounds_of(source) + 1;
        let entry = self.counts.entry(mixed_output.clone()).or_insert(0);
        *entry = (*entry).max(inherited);
    }

    /// Whether a script has reached the anonymization target.
    pub fn is_fully_anonymized(&self, script: &ScriptBuf, target_rounds: u32) -> bool {
        self.rounds_of(script) >= target_rounds
    }

    /// Number of tracked scripts.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Whether nothing has been tracked yet.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Persist all counters as JSON, scripts hex-encoded.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let encoded: HashMap<String, u32> = self
            .counts
            .iter()
            .map(|(script, rounds)| (script.to_hex_string(), *rounds))
            .collect();
        let json = serde_json::to_string_pretty(&encoded)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(path, json)
    }

    /// Load counters from a JSON state file. A missing file yields an empty
    /// tracker; a corrupt one is an error.
    pub fn load(path: &Path) -> io::Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let json = fs::read_to_string(path)?;
        let encoded: HashMap<String, u32> = serde_json::from_str(&json)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        let mut counts = HashMap::with_capacity(encoded.len());
        for (hex, rounds) in encoded {
            let script = ScriptBuf::from_hex(&hex)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            counts.insert(script, rounds);
        }
        Ok(RoundTracker {
            counts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(n: u8) -> ScriptBuf {
        ScriptBuf::from(vec![0x76, 0xa9, n])
    }

    #[test]
    fn unknown_scripts_have_zero_rounds() {
        let tracker = RoundTracker::new();
        assert_eq!(tracker.rounds_of(&script(1)), 0);
        assert!(!tracker.is_fully_anonymized(&script(1), 1));
    }

    #[test]
    fn mixed_output_inherits_source_rounds_plus_one() {
        let mut tracker = RoundTracker::new();
        tracker.record_completed_round(&script(1), &script(2));
        assert_eq!(tracker.rounds_of(&script(2)), 1);

        tracker.record_completed_round(&script(2), &script(3));
        assert_eq!(tracker.rounds_of(&script(3)), 2);
        assert!(tracker.is_fully_anonymized(&script(3), 2));
    }

    #[test]
    fn counters_never_decrease() {
        let mut tracker = RoundTracker::new();
        tracker.record_completed_round(&script(1), &script(2));
        tracker.record_completed_round(&script(2), &script(3));
        // Completing a round from a zero-round source into script 3 must not
        // pull its count back down.
        tracker.record_completed_round(&script(4), &script(3));
        assert_eq!(tracker.rounds_of(&script(3)), 2);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rounds.json");

        let mut tracker = RoundTracker::new();
        tracker.record_completed_round(&script(1), &script(2));
        tracker.record_completed_round(&script(2), &script(3));
        tracker.save(&path).unwrap();

        let loaded = RoundTracker::load(&path).unwrap();
        assert_eq!(loaded.rounds_of(&script(2)), 1);
        assert_eq!(loaded.rounds_of(&script(3)), 2);
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn load_missing_file_yields_empty_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = RoundTracker::load(&dir.path().join("absent.json")).unwrap();
        assert!(tracker.is_empty());
    }
}
