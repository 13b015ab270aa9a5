//! Archive directory walker.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, warn};

use super::ScanError;
use crate::night::{Night, NightId, NightState};

/// Name of the capture pipeline's per-night configuration snapshot.
const STATION_CONFIG_FILE: &str = ".config";

/// Enumerates night directories under an archive root.
///
/// Scanning only reads the filesystem, so it can be repeated at any time and
/// always yields the same nights for the same tree.
#[derive(Debug, Clone)]
pub struct ArchiveScanner {
    root: PathBuf,
    stations: Vec<String>,
    cams_id: Option<u32>,
}

impl ArchiveScanner {
    /// Creates a scanner for the given archive root.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            stations: Vec::new(),
            cams_id: None,
        }
    }

    /// Restrict scanning to these station codes.
    pub fn with_stations(mut self, stations: &[String]) -> Self {
        self.stations = stations.iter().map(|s| s.to_ascii_uppercase()).collect();
        self
    }

    /// Use a fixed CAMS code instead of reading each night's `.config`.
    pub fn with_cams_id(mut self, cams_id: Option<u32>) -> Self {
        self.cams_id = cams_id;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// All nights in the archive, oldest first, with sequence numbers
    /// assigned.
    pub fn discover(&self) -> Result<Vec<Night>, ScanError> {
        self.discover_with(&HashSet::new())
    }

    /// Like [`discover`](Self::discover), but nights in `recorded` whose
    /// directories are gone still hold their sequence slot, so the remaining
    /// nights of that date keep the numbers they were first given.
    pub fn discover_with(&self, recorded: &HashSet<NightId>) -> Result<Vec<Night>, ScanError> {
        let entries = std::fs::read_dir(&self.root).map_err(|e| ScanError::Unreadable {
            path: self.root.clone(),
            source: e,
        })?;

        let mut nights = Vec::new();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable archive entry: {}", e);
                    continue;
                }
            };
            if !entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            let Some(id) = NightId::from_dir_name(&dir_name) else {
                debug!("Ignoring non-night directory {}", dir_name);
                continue;
            };
            if !self.stations.is_empty() && !self.stations.iter().any(|s| s == id.station()) {
                continue;
            }

            let path = entry.path();
            let cams_id = self.cams_id.or_else(|| read_cams_code(&path));
            nights.push(Night {
                id,
                path,
                dir_name,
                sequence: 0,
                cams_id,
                state: NightState::Discovered,
            });
        }

        nights.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.dir_name.cmp(&b.dir_name)));
        assign_sequences(&mut nights, recorded);
        Ok(nights)
    }

    /// Nights still needing work: everything not in `completed`, oldest
    /// first. The returned iterator is lazy; call `scan` again to restart.
    pub fn scan<'a>(
        &self,
        completed: &'a HashSet<NightId>,
    ) -> Result<impl Iterator<Item = Night> + 'a, ScanError> {
        self.scan_with(completed, completed)
    }

    /// [`scan`](Self::scan) with sequence numbers that account for every
    /// night in `recorded`, see [`discover_with`](Self::discover_with).
    pub fn scan_with<'a>(
        &self,
        completed: &'a HashSet<NightId>,
        recorded: &HashSet<NightId>,
    ) -> Result<impl Iterator<Item = Night> + 'a, ScanError> {
        let nights = self.discover_with(recorded)?;
        Ok(nights
            .into_iter()
            .filter(move |night| !completed.contains(&night.id)))
    }

    /// Look up one night by id.
    pub fn find(&self, id: &NightId) -> Result<Option<Night>, ScanError> {
        Ok(self.discover()?.into_iter().find(|n| &n.id == id))
    }
}

/// Number the directories of each station and date 1, 2, ... by start time.
/// Recorded nights no longer on disk are counted where they fall.
fn assign_sequences(nights: &mut [Night], recorded: &HashSet<NightId>) {
    let on_disk: HashSet<&NightId> = nights.iter().map(|n| &n.id).collect();
    let mut pruned: HashMap<(String, NaiveDate), Vec<NightId>> = HashMap::new();
    for id in recorded.iter().filter(|id| !on_disk.contains(id)) {
        pruned
            .entry((id.station().to_string(), id.date()))
            .or_default()
            .push(id.clone());
    }

    let mut counters: HashMap<(String, NaiveDate), u32> = HashMap::new();
    for night in nights.iter_mut() {
        let key = (night.id.station().to_string(), night.id.date());
        let earlier_pruned = pruned
            .get(&key)
            .map_or(0, |ids| ids.iter().filter(|id| **id < night.id).count()) as u32;
        let counter = counters.entry(key).or_insert(0);
        *counter += 1;
        night.sequence = *counter + earlier_pruned;
    }
}

/// Read `cams_code` from the night's configuration snapshot. Zero means
/// "not assigned" in the capture software and is treated as missing.
fn read_cams_code(night_dir: &Path) -> Option<u32> {
    let text = std::fs::read_to_string(night_dir.join(STATION_CONFIG_FILE)).ok()?;
    text.lines()
        .map(str::trim)
        .filter(|l| !l.starts_with(';') && !l.starts_with('#'))
        .filter_map(|l| l.split_once([':', '=']))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("cams_code"))
        .and_then(|(_, value)| {
            value
                .split(';')
                .next()
                .and_then(|v| v.trim().parse::<u32>().ok())
        })
        .filter(|code| *code != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use std::fs;
    use tempfile::TempDir;

    fn ids(nights: &[Night]) -> Vec<String> {
        nights.iter().map(|n| n.id.to_string()).collect()
    }

    #[test]
    fn test_discover_orders_chronologically_and_ignores_noise() {
        let root = TempDir::new().unwrap();
        fixtures::night_dir(root.path(), "NL0001_20240103_170000_000001", 1);
        fixtures::night_dir(root.path(), "NL0001_20240101_170000_000001", 1);
        fixtures::night_dir(root.path(), "NL0001_20240102_170000_000001", 1);
        fs::create_dir(root.path().join("CapturedFiles")).unwrap();
        fs::write(root.path().join("NL0001_20240104_170000_000001"), "a file").unwrap();

        let nights = ArchiveScanner::new(root.path()).discover().unwrap();
        assert_eq!(
            ids(&nights),
            vec![
                "NL0001_20240101_170000",
                "NL0001_20240102_170000",
                "NL0001_20240103_170000"
            ]
        );
    }

    #[test]
    fn test_scan_skips_completed_nights() {
        let root = TempDir::new().unwrap();
        fixtures::night_dir(root.path(), "NL0001_20240101_170000_000001", 1);
        fixtures::night_dir(root.path(), "NL0001_20240102_170000_000001", 1);

        let completed: HashSet<NightId> = ["NL0001_20240101_170000".parse().unwrap()].into();
        let scanner = ArchiveScanner::new(root.path());
        let pending: Vec<Night> = scanner.scan(&completed).unwrap().collect();
        assert_eq!(ids(&pending), vec!["NL0001_20240102_170000"]);

        // Rescanning yields the same result.
        let again: Vec<Night> = scanner.scan(&completed).unwrap().collect();
        assert_eq!(ids(&again), ids(&pending));
    }

    #[test]
    fn test_sequences_restart_per_date() {
        let root = TempDir::new().unwrap();
        fixtures::night_dir(root.path(), "NL0001_20240101_170000_000001", 1);
        fixtures::night_dir(root.path(), "NL0001_20240101_230000_000001", 1);
        fixtures::night_dir(root.path(), "NL0001_20240102_170000_000001", 1);

        let nights = ArchiveScanner::new(root.path()).discover().unwrap();
        let sequences: Vec<u32> = nights.iter().map(|n| n.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 1]);
    }

    #[test]
    fn test_pruned_recorded_night_keeps_its_slot() {
        let root = TempDir::new().unwrap();
        fixtures::night_dir(root.path(), "NL0001_20240101_230000_000001", 1);
        fixtures::night_dir(root.path(), "NL0001_20240102_170000_000001", 1);

        // 17:00 on the 1st was uploaded and its directory removed.
        let recorded: HashSet<NightId> = ["NL0001_20240101_170000".parse().unwrap()].into();
        let scanner = ArchiveScanner::new(root.path());

        let nights = scanner.discover_with(&recorded).unwrap();
        let sequences: Vec<u32> = nights.iter().map(|n| n.sequence).collect();
        assert_eq!(sequences, vec![2, 1]);

        let pending: Vec<Night> = scanner.scan_with(&recorded, &recorded).unwrap().collect();
        assert_eq!(pending[0].sequence, 2);

        // Without the ledger's memory the numbering would shift.
        assert_eq!(scanner.discover().unwrap()[0].sequence, 1);
    }

    #[test]
    fn test_recorded_night_on_disk_is_not_counted_twice() {
        let root = TempDir::new().unwrap();
        fixtures::night_dir(root.path(), "NL0001_20240101_170000_000001", 1);
        fixtures::night_dir(root.path(), "NL0001_20240101_230000_000001", 1);

        let recorded: HashSet<NightId> = ["NL0001_20240101_170000".parse().unwrap()].into();
        let nights = ArchiveScanner::new(root.path())
            .discover_with(&recorded)
            .unwrap();
        let sequences: Vec<u32> = nights.iter().map(|n| n.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn test_station_filter() {
        let root = TempDir::new().unwrap();
        fixtures::night_dir(root.path(), "NL0001_20240101_170000_000001", 1);
        fixtures::night_dir(root.path(), "NL0002_20240101_170000_000001", 1);

        let nights = ArchiveScanner::new(root.path())
            .with_stations(&["nl0002".to_string()])
            .discover()
            .unwrap();
        assert_eq!(ids(&nights), vec!["NL0002_20240101_170000"]);
    }

    #[test]
    fn test_cams_code_from_config_and_override() {
        let root = TempDir::new().unwrap();
        let night = fixtures::night_dir(root.path(), "NL0001_20240101_170000_000001", 1);
        fs::write(
            night.path.join(".config"),
            "[System]\nstationID: NL0001\ncams_code: 351 ; CAMS code\n",
        )
        .unwrap();

        let discovered = ArchiveScanner::new(root.path()).discover().unwrap();
        assert_eq!(discovered[0].cams_id, Some(351));

        let overridden = ArchiveScanner::new(root.path())
            .with_cams_id(Some(7))
            .discover()
            .unwrap();
        assert_eq!(overridden[0].cams_id, Some(7));
    }

    #[test]
    fn test_zero_cams_code_is_missing() {
        let root = TempDir::new().unwrap();
        let night = fixtures::night_dir(root.path(), "NL0001_20240101_170000_000001", 1);
        fs::write(night.path.join(".config"), "[System]\ncams_code = 0\n").unwrap();

        let discovered = ArchiveScanner::new(root.path()).discover().unwrap();
        assert_eq!(discovered[0].cams_id, None);
    }

    #[test]
    fn test_unreadable_root_is_error() {
        let result = ArchiveScanner::new("/nonexistent/archive").discover();
        assert!(matches!(result, Err(ScanError::Unreadable { .. })));
    }
}
