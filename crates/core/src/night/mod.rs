//! Night data model: identifiers, lifecycle states and confirmation results.
//!
//! A night is one observing session of one camera station, stored by the
//! capture pipeline as a single archive directory named
//! `<STATION>_<YYYYMMDD>_<HHMMSS>_<micro>`.

mod detectinfo;
mod types;

pub use detectinfo::{find_detect_file, parse_detectinfo, read_detectinfo, DetectInfo, DetectInfoError};
pub use types::{ConfirmationResult, Detection, Night, NightId, NightState, ResultSource};
