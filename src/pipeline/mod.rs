//! The restartable stages: snapshot, upgrade check, materialize, apply.
//!
//! Each stage reads one checkpoint and writes new ones. Rows are processed
//! one at a time; when a systemic error stops a stage, the rows finished so
//! far are still written before the error is returned.

use std::collections::BTreeMap;
use std::path::PathBuf;
use crate::{Result, UpgraderError};

pub mod apply;
pub mod materialize;
pub mod records;
pub mod snapshot;
pub mod upgrade_check;

/// What a stage run produced.
#[derive(Debug, Default)]
pub struct StageReport {
    pub stage: &'static str,
    pub outputs: Vec<PathBuf>,
    /// Row counts per outcome label. Every row lands in exactly one.
    pub tallies: BTreeMap<String, usize>,
    /// Side counts that overlap the tallies, such as backups made.
    pub notes: BTreeMap<String, usize>,
}

impl StageReport {
    pub fn new(stage: &'static str) -> Self {
        Self { stage, ..Default::default() }
    }

    pub fn tally(&mut self, label: impl Into<String>) {
        *self.tallies.entry(label.into()).or_insert(0) += 1;
    }

    pub fn note(&mut self, label: impl Into<String>) {
        *self.notes.entry(label.into()).or_insert(0) += 1;
    }

    /// Looks in the tallies, then the notes.
    pub fn count(&self, label: &str) -> usize {
        self.tallies
            .get(label)
            .or_else(|| self.notes.get(label))
            .copied()
            .unwrap_or(0)
    }
}

/// Applies `f` to each row in order, stopping at the first error and
/// returning the rows finished before it.
pub(crate) fn process_rows<I, O, F>(rows: Vec<I>, mut f: F) -> (Vec<O>, Option<UpgraderError>)
where
    F: FnMut(I) -> Result<O>,
{
    let mut done = Vec::with_capacity(rows.len());
    for row in rows {
        match f(row) {
            Ok(processed) => done.push(processed),
            Err(e) => return (done, Some(e)),
        }
    }
    (done, None)
}

/// Turns a mid-stage error into `StageAborted`, naming the partial checkpoint.
pub(crate) fn finish(report: StageReport, error: Option<UpgraderError>) -> Result<StageReport> {
    match (error, report.outputs.first()) {
        (None, _) => Ok(report),
        (Some(source), Some(checkpoint)) => Err(UpgraderError::StageAborted {
            checkpoint: checkpoint.clone(),
            source: Box::new(source),
        }),
        (Some(source), None) => Err(source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_before_an_error_are_kept() {
        let (done, error) = process_rows(vec![1, 2, 3, 4], |n| {
            if n == 3 {
                Err(UpgraderError::Bridge("down".into()))
            } else {
                Ok(n * 10)
            }
        });
        assert_eq!(done, vec![10, 20]);
        assert!(matches!(error, Some(UpgraderError::Bridge(_))));
    }

    #[test]
    fn aborted_stages_name_their_partial_output() {
        let mut report = StageReport::new("test");
        report.outputs.push(PathBuf::from("/data/partial.csv"));
        match finish(report, Some(UpgraderError::Bridge("down".into()))) {
            Err(UpgraderError::StageAborted { checkpoint, .. }) => {
                assert_eq!(checkpoint, PathBuf::from("/data/partial.csv"))
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
