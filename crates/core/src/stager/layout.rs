//! Remote naming and directory layout.

use std::path::PathBuf;

use super::StageError;
use crate::night::{ConfirmationResult, Night};
use crate::transfer::{join_remote, RemoteLayout, TransferRequest};

/// Where a night lives on the remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub dir: String,
    pub name: String,
}

impl RemoteTarget {
    pub fn path(&self) -> String {
        join_remote(&self.dir, &self.name)
    }
}

/// Everything needed to package and send one confirmed night.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub target: RemoteTarget,
    /// Local path of the package to build.
    pub package_path: PathBuf,
    /// Files that go into the package, in order.
    pub members: Vec<PathBuf>,
}

impl UploadPlan {
    /// The transfer for this plan's package.
    pub fn transfer_request(&self) -> TransferRequest {
        TransferRequest {
            local: self.package_path.clone(),
            remote_dir: self.target.dir.clone(),
            remote_name: self.target.name.clone(),
        }
    }
}

/// Maps confirmed nights to remote paths. Pure: no filesystem access.
#[derive(Debug, Clone)]
pub struct UploadStager {
    base_path: String,
    layout: RemoteLayout,
    staging_dir: Option<PathBuf>,
}

impl UploadStager {
    pub fn new(base_path: impl Into<String>, layout: RemoteLayout) -> Self {
        Self {
            base_path: base_path.into(),
            layout,
            staging_dir: None,
        }
    }

    /// Build packages in `dir` instead of the night's output directory.
    pub fn with_staging_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.staging_dir = dir;
        self
    }

    /// Package file name: `YYYY_MM_DD_<cams:06>_HH_MM_SS_<seq:02>.zip`.
    pub fn package_name(night: &Night) -> Result<String, StageError> {
        let cams_id = night.cams_id.ok_or_else(|| StageError::MissingCamsId {
            night_id: night.id.to_string(),
        })?;
        let start = night.id.start();
        Ok(format!(
            "{}_{:06}_{}_{:02}.zip",
            start.format("%Y_%m_%d"),
            cams_id,
            start.format("%H_%M_%S"),
            night.sequence
        ))
    }

    /// Remote directory for a night under a given layout.
    pub fn remote_dir(&self, night: &Night, layout: RemoteLayout) -> String {
        let start = night.id.start();
        match layout {
            RemoteLayout::Flat => self.base_path.clone(),
            RemoteLayout::Year => join_remote(&self.base_path, &start.format("%Y").to_string()),
            RemoteLayout::YearMonth => join_remote(
                &join_remote(&self.base_path, &start.format("%Y").to_string()),
                &start.format("%Y_%m").to_string(),
            ),
        }
    }

    /// Remote target under the configured layout.
    pub fn target(&self, night: &Night) -> Result<RemoteTarget, StageError> {
        Ok(RemoteTarget {
            dir: self.remote_dir(night, self.layout),
            name: Self::package_name(night)?,
        })
    }

    /// Every place the night's package may already be, configured layout
    /// first. Servers that were reorganised keep older uploads in the other
    /// layouts.
    pub fn candidate_targets(&self, night: &Night) -> Result<Vec<RemoteTarget>, StageError> {
        let name = Self::package_name(night)?;
        let mut layouts = vec![self.layout];
        for layout in [RemoteLayout::YearMonth, RemoteLayout::Year, RemoteLayout::Flat] {
            if !layouts.contains(&layout) {
                layouts.push(layout);
            }
        }
        Ok(layouts
            .into_iter()
            .map(|layout| RemoteTarget {
                dir: self.remote_dir(night, layout),
                name: name.clone(),
            })
            .collect())
    }

    /// Plan the upload of a confirmed night.
    pub fn plan(&self, night: &Night, result: &ConfirmationResult) -> Result<UploadPlan, StageError> {
        let target = self.target(night)?;
        let calibration = result
            .calibration
            .clone()
            .ok_or_else(|| StageError::MissingCalibration {
                night_id: night.id.to_string(),
            })?;

        let package_dir = self
            .staging_dir
            .clone()
            .unwrap_or_else(|| result.output_dir.clone());

        Ok(UploadPlan {
            package_path: package_dir.join(&target.name),
            members: vec![calibration, result.artifact.clone()],
            target,
        })
    }
}
