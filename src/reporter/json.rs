use std::io::Write;

use super::BenchReporter;
use crate::report::BenchReport;

/// Prints the report as pretty JSON, the same document the HTTP front-end
/// answers with.
pub struct JsonReporter;

impl BenchReporter for JsonReporter {
    fn print(&self, w: &mut dyn Write, report: &BenchReport) -> anyhow::Result<()> {
        serde_json::to_writer_pretty(&mut *w, report)?;
        writeln!(w)?;
        Ok(())
    }
}
