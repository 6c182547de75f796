//! On-disk model bundle.
//!
//! Every field is optional: a snapshot written by an older build, or one in
//! which only some families had enough data to train, still loads and the
//! missing families answer through their heuristics.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{InsightError, Result};
use crate::predictors::{BehaviorModel, GradingModel, ModelFamily, PerformanceModel, RiskModel};
use crate::similarity::{LearningPatterns, TopicSimilarity};

pub const SNAPSHOT_VERSION: u32 = 1;

/// The data the bundle was last trained on. Present even when no family
/// had enough rows to train.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub students: usize,
    pub score_rows: usize,
    pub finished_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSnapshot {
    pub version: u32,
    pub saved_at: Option<DateTime<Utc>>,
    pub last_training: Option<TrainingRecord>,
    pub performance: Option<PerformanceModel>,
    pub risk: Option<RiskModel>,
    pub grading: Option<GradingModel>,
    pub behavior: Option<BehaviorModel>,
    pub topic_similarity: Option<TopicSimilarity>,
    pub learning_patterns: Option<LearningPatterns>,
}

impl ModelSnapshot {
    pub fn trained_families(&self) -> usize {
        [
            self.performance.is_some(),
            self.risk.is_some(),
            self.grading.is_some(),
            self.behavior.is_some(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }
}

/// Drops a model that parsed but cannot be walked safely.
fn checked<M: ModelFamily>(model: Option<M>, path: &Path) -> Option<M> {
    let model = model?;
    match model.validate() {
        Ok(()) => Some(model),
        Err(err) => {
            warn!(path = %path.display(), model = M::NAME, %err, "discarding malformed model");
            None
        }
    }
}

/// Reads a snapshot. A missing file is not an error and yields `None`;
/// malformed models inside an otherwise readable file load as absent.
pub fn load(path: &Path) -> Result<Option<ModelSnapshot>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no model snapshot on disk");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };

    let mut snapshot: ModelSnapshot = serde_json::from_str(&contents)
        .map_err(|err| InsightError::Snapshot(format!("{}: {err}", path.display())))?;
    if snapshot.version > SNAPSHOT_VERSION {
        return Err(InsightError::Snapshot(format!(
            "{} was written by a newer version ({})",
            path.display(),
            snapshot.version
        )));
    }

    snapshot.performance = checked(snapshot.performance.take(), path);
    snapshot.risk = checked(snapshot.risk.take(), path);
    snapshot.grading = checked(snapshot.grading.take(), path);
    snapshot.behavior = checked(snapshot.behavior.take(), path);

    info!(
        path = %path.display(),
        families = snapshot.trained_families(),
        "model snapshot loaded"
    );
    Ok(Some(snapshot))
}

/// Writes the snapshot wholesale, replacing any previous file.
pub fn save(path: &Path, snapshot: &ModelSnapshot) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let stamped = ModelSnapshot {
        version: SNAPSHOT_VERSION,
        saved_at: Some(Utc::now()),
        ..snapshot.clone()
    };
    let json = serde_json::to_string(&stamped)?;

    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;

    info!(
        path = %path.display(),
        families = stamped.trained_families(),
        "model snapshot saved"
    );
    Ok(())
}
