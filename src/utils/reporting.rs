use std::fmt::Write;
use crate::pipeline::StageReport;

pub struct Reporter;

impl Reporter {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, report: &StageReport) -> String {
        let mut out = String::new();
        let total: usize = report.tallies.values().sum();

        let _ = writeln!(out, "=== {} complete ===", report.stage);
        for (label, count) in &report.tallies {
            let percentage = if total > 0 { *count as f64 / total as f64 * 100.0 } else { 0.0 };
            let _ = writeln!(out, "{:<16} {:>6} ({:.1}%)", label, count, percentage);
        }
        for (label, count) in &report.notes {
            let _ = writeln!(out, "{:<16} {:>6}", label, count);
        }
        for path in &report.outputs {
            let _ = writeln!(out, "Saved: {}", path.display());
        }
        out
    }

    pub fn print_stage_report(&self, report: &StageReport) {
        print!("{}", self.render(report));
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}
