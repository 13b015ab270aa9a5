//! Testing utilities and mock implementations.
//!
//! Mocks stand in for the human-driven confirmation tool, the remote server,
//! the durable ledger and the clock, so whole runs can be exercised without
//! any of them.
//!
//! # Example
//!
//! ```rust,ignore
//! use nightrelay_core::testing::{fixtures, MockConfirmer, MockRemote};
//!
//! let remote = MockRemote::new();
//! remote.fail_next_connects(2);
//!
//! let confirmer = MockConfirmer::new();
//! confirmer.fail_night(&night_id, "viewer crashed").await;
//! ```

mod memory_ledger;
mod mock_confirmer;
mod mock_remote;
mod recording_sleeper;

pub use memory_ledger::MemoryLedger;
pub use mock_confirmer::MockConfirmer;
pub use mock_remote::MockRemote;
pub use recording_sleeper::RecordingSleeper;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::config::{ArchiveConfig, Config, LedgerConfig, StationConfig, UploadConfig};
    use crate::confirmation::ConfirmationConfig;
    use crate::night::{Night, NightId, NightState};
    use crate::transfer::{RemoteConfig, RetryConfig};

    /// CAMS code written into fixture nights.
    pub const CAMS_ID: u32 = 351;

    /// FTPdetectinfo text with `count` well-formed detections.
    pub fn detectinfo_text(station: &str, count: u32) -> String {
        let mut text = format!(
            "Meteor Count = {:06}\n\
             -----------------------------------------------------\n\
             Processed with RMS 1.0 2024-01-02 06:12:33.123456 UTC\n\
             -----------------------------------------------------\n\
             FF  file processed\n\
             CAL file processed\n\
             Cam# Meteor# #Segments fps hnr mle bin Pix/fm Rho Phi\n\
             Per segment:  Frame# Col Row RA Dec Azim Elev Inten Mag\n",
            count
        );
        for i in 1..=count {
            text.push_str("-------------------------------------------------------\n");
            text.push_str(&format!(
                "FF_{}_20240101_2{:05}_000_{:07}.fits\n",
                station,
                i % 60,
                i * 1000
            ));
            text.push_str("Recalibrated with RMS on: 2024-01-02 06:12:33.123456 UTC\n");
            text.push_str(&format!(
                "{} {:04} 0002 0025.00 000.0 000.0  00.0 001.2 0123.4 0045.6\n",
                station, i
            ));
            text.push_str("0012.0000 0123.45 0456.78\n");
            text.push_str("0013.0000 0124.45 0457.78\n");
        }
        text
    }

    /// An archived night directory under `root` named `name`, with a
    /// detection file holding `detections` detections, a calibration file and
    /// a `.config` carrying [`CAMS_ID`].
    ///
    /// Panics if `name` is not a night directory name.
    pub fn night_dir(root: &Path, name: &str, detections: u32) -> Night {
        let night = empty_night_dir(root, name);
        let station = night.id.station().to_string();
        std::fs::write(
            night.path.join(format!("FTPdetectinfo_{}.txt", name)),
            detectinfo_text(&station, detections),
        )
        .expect("write FTPdetectinfo");
        std::fs::write(
            night.path.join(format!("CAL_{}.txt", name)),
            "Calibration parameters\n",
        )
        .expect("write CAL file");
        night
    }

    /// A night directory with only its `.config`: no detection file.
    pub fn empty_night_dir(root: &Path, name: &str) -> Night {
        let id = NightId::from_dir_name(name).expect("fixture night name");
        let path = root.join(name);
        std::fs::create_dir_all(&path).expect("create night dir");
        std::fs::write(
            path.join(".config"),
            format!("[System]\nstationID: {}\ncams_code: {}\n", id.station(), CAMS_ID),
        )
        .expect("write .config");
        Night {
            id,
            path,
            dir_name: name.to_string(),
            sequence: 1,
            cams_id: Some(CAMS_ID),
            state: NightState::Discovered,
        }
    }

    /// Config for an archive at `archive` uploading to a local directory
    /// remote at `remote`, retrying without delay.
    pub fn config(archive: &Path, remote: &Path) -> Config {
        Config {
            archive: ArchiveConfig {
                root: archive.to_path_buf(),
                confirmed_root: None,
                stations: Vec::new(),
            },
            station: StationConfig::default(),
            confirmation: ConfirmationConfig::default(),
            remote: RemoteConfig::local(remote.to_string_lossy()),
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay_secs: 0,
                max_delay_secs: 0,
                backoff_multiplier: 2.0,
            },
            ledger: LedgerConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}
