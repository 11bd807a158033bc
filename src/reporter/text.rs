use std::{cmp::Reverse, io::Write};

use crossterm::style::{StyledContent, Stylize};
use itertools::Itertools;
use tabled::{
    builder::Builder,
    settings::{
        Alignment, Color, Margin, Padding, Style,
        object::{Cell, Columns, FirstColumn, LastColumn, Object, Rows},
        themes::Colorization,
    },
};

use crate::{
    fmt::{self, TimeUnit},
    report::BenchReport,
    stats::{LatencySnapshot, MAIN_TIMER, StatsSnapshot},
};

/// Prints the report as colored tables for a terminal.
pub struct TextReporter;

impl super::BenchReporter for TextReporter {
    fn print(&self, w: &mut dyn Write, report: &BenchReport) -> anyhow::Result<()> {
        print_summary(w, report)?;
        writeln!(w)?;

        if !report.stats.timers.is_empty() {
            print_timers(w, &report.stats)?;
            writeln!(w)?;
        }

        if let Some(latency) = report.stats.timer(MAIN_TIMER).and_then(|t| t.latency.as_ref()) {
            print_percentiles(w, latency)?;
            writeln!(w)?;
        }

        print_status(w, &report.stats)?;
        print_errors(w, report)?;

        Ok(())
    }
}

fn render_success_ratio(success_rate: f64) -> StyledContent<String> {
    let text = format!("{:.2}%", success_rate);
    if success_rate >= 100.0 {
        text.green().bold()
    } else if success_rate >= 99.0 {
        text.yellow().bold()
    } else {
        text.red().bold()
    }
}

#[rustfmt::skip]
fn print_summary(w: &mut dyn Write, report: &BenchReport) -> anyhow::Result<()> {
    let stats = &report.stats;
    let elapsed = stats.total_elapsed.as_secs_f64();
    let completed = stats.count(MAIN_TIMER);

    writeln!(w, "{}", "Summary".h1())?;
    writeln!(w,       "  Time:          {}", format!("{:.2}s", elapsed).green().bold())?;
    writeln!(w,       "  Iterations:    {}", format!("{completed}/{}", report.iterations).green().bold())?;
    writeln!(w,       "  Concurrency:   {}", format!("{} (peak {})", report.limit, report.peak_concurrency).green().bold())?;
    writeln!(w,       "  Queued:        {}", format!("peak {}", report.peak_queued).green().bold())?;
    writeln!(w,       "  Success ratio: {}", render_success_ratio(100.0 * report.success_ratio()))?;
    if report.cancelled {
        writeln!(w,   "  {}", "Cancelled before every iteration was admitted".yellow().bold())?;
    }
    if report.total_failure {
        writeln!(w,   "  {}", "Total failure: every iteration failed".red().bold())?;
    }
    writeln!(w)?;

    let rate = |n: u64| if elapsed > 0.0 { n as f64 / elapsed } else { 0.0 };
    let rows = vec![
        vec!["".into(), "Total".into(), "Rate".into()],
        vec!["Iterations".into(), completed.to_string(), format!("{:.2}/s", rate(completed))],
        vec!["Errors".into(), report.error_count.to_string(), format!("{:.2}/s", rate(report.error_count))],
        vec!["Bytes".into(), fmt::bytes(stats.bytes), fmt::byte_rate(rate(stats.bytes))],
    ];
    let mut table = Builder::from(rows).build();
    table
        .with(Style::empty())
        .with(Alignment::center())
        .with(Padding::new(2, 2, 0, 0))
        .with(Colorization::exact([Color::BOLD], Cell::new(0, 1)))
        .with(Colorization::exact([Color::BOLD], Cell::new(0, 2)))
        .with(Colorization::exact([Color::FG_GREEN], Rows::new(1..=3).not(Columns::new(0..=0))));
    writeln!(w, "{}", table)?;
    Ok(())
}

fn print_timers(w: &mut dyn Write, stats: &StatsSnapshot) -> anyhow::Result<()> {
    writeln!(w, "{}", "Timers".h1())?;

    let unit = stats
        .timer(MAIN_TIMER)
        .and_then(|t| t.latency.as_ref())
        .or_else(|| stats.timers.values().find_map(|t| t.latency.as_ref()))
        .map_or(TimeUnit::Millis, |l| TimeUnit::of(l.median));

    let header = ["Timer", "Count", "Rate", "Avg", "Min", "Med", "Max", "Stdev"].map(String::from).to_vec();
    let rows = stats.timers.iter().map(|(name, timer)| {
        let mut row = vec![name.clone(), timer.meter.count.to_string(), format!("{:.2}/s", timer.meter.mean_rate)];
        match &timer.latency {
            Some(l) => row.extend([l.mean, l.min, l.median, l.max, l.stdev].map(|d| unit.format(d))),
            None => row.extend(std::iter::repeat_n("-".to_string(), 5)),
        }
        row
    });

    let mut table = Builder::from_iter(std::iter::once(header).chain(rows)).build();
    table
        .with(Style::empty())
        .with(Margin::new(1, 0, 0, 0))
        .with(Alignment::right())
        .with(Colorization::exact([Color::BOLD], Rows::first()))
        .with(Colorization::exact([Color::FG_GREEN], Rows::new(1..).not(FirstColumn)))
        .with(Colorization::exact([Color::FG_CYAN], Rows::new(1..).intersect(FirstColumn)))
        .modify(FirstColumn, Alignment::left());
    writeln!(w, "{}", table)?;
    Ok(())
}

fn print_percentiles(w: &mut dyn Write, latency: &LatencySnapshot) -> anyhow::Result<()> {
    writeln!(w, "{}", "Main percentiles".h1())?;
    let unit = TimeUnit::of(latency.median);
    let rows = latency
        .percentiles
        .iter()
        .map(|&(p, d)| vec![format!("{:.2}%", p), " in ".to_string(), unit.format(d)]);
    let mut table = Builder::from_iter(rows).build();
    table
        .with(Style::empty())
        .with(Margin::new(3, 0, 0, 0))
        .with(Alignment::center())
        .with(Padding::zero())
        .with(Colorization::exact([Color::FG_GREEN], FirstColumn))
        .with(Colorization::exact([Color::FG_GREEN], LastColumn))
        .modify(LastColumn, Alignment::right());
    writeln!(w, "{}", table)?;
    Ok(())
}

fn print_status(w: &mut dyn Write, stats: &StatsSnapshot) -> anyhow::Result<()> {
    if stats.status.is_empty() && stats.transport_errors == 0 {
        return Ok(());
    }
    writeln!(w, "{}", "Status distribution".h1())?;

    let max = stats.status.values().copied().chain([stats.transport_errors]).max().unwrap_or_default();
    let width = max.to_string().len();
    for (&code, &count) in stats.status.iter().sorted_unstable_by_key(|&(_, &n)| Reverse(n)) {
        let count = format!("{count:>width$}").green();
        let code = match code {
            200..=399 => code.to_string().green(),
            400..=499 => code.to_string().yellow(),
            _ => code.to_string().red(),
        };
        writeln!(w, "  [{count}] {code}")?;
    }
    if stats.transport_errors > 0 {
        writeln!(w, "{}", format!("  [{:>width$}] no response", stats.transport_errors).red())?;
    }
    writeln!(w)?;
    Ok(())
}

fn print_errors(w: &mut dyn Write, report: &BenchReport) -> anyhow::Result<()> {
    if report.error_count == 0 {
        return Ok(());
    }
    writeln!(w, "{}", "Error distribution".h1())?;

    let width = report.errors_by_phase.values().max().map_or(1, |n| n.to_string().len());
    for (phase, count) in report.errors_by_phase.iter().sorted_unstable_by_key(|&(_, &n)| Reverse(n)) {
        writeln!(w, "{}", format!("  [{count:>width$}] {phase}").red())?;
    }
    if let Some(setup) = &report.setup_error {
        writeln!(w, "  {} {}", "Setup:".h2(), setup.as_str().red())?;
    }
    if let Some(last) = &report.last_error {
        writeln!(w, "  {} {}", "Last:".h2(), last.as_str().red())?;
    }
    Ok(())
}

trait ReportStyle {
    fn h1(&self) -> StyledContent<&str>;
    fn h2(&self) -> StyledContent<&str>;
}

impl<T: AsRef<str>> ReportStyle for T {
    fn h1(&self) -> StyledContent<&str> {
        self.as_ref().bold().underlined().yellow()
    }

    fn h2(&self) -> StyledContent<&str> {
        self.as_ref().bold().cyan()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, time::Duration};

    use chrono::Utc;

    use super::*;
    use crate::{phase::Phase, reporter::BenchReporter, stats::Stats};

    fn report(stats: &Stats, errors: BTreeMap<Phase, u64>) -> BenchReport {
        let error_count = errors.values().sum();
        BenchReport {
            started_at: Utc::now(),
            iterations: 4,
            limit: 2,
            error_count,
            last_error: errors.keys().last().map(|p| format!("Failed in {p} with err: error statusCode: 404")),
            total_failure: error_count >= 4,
            setup_error: None,
            cancelled: false,
            peak_concurrency: 2,
            peak_queued: 2,
            errors_by_phase: errors,
            stats: stats.snapshot(),
        }
    }

    fn render(report: &BenchReport) -> String {
        let mut out = Vec::new();
        TextReporter.print(&mut out, report).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn prints_timers_status_and_errors() {
        let stats = Stats::new();
        for ms in [2, 3, 4, 5] {
            stats.record(MAIN_TIMER, Duration::from_millis(ms)).unwrap();
            stats.record_exchange(Some(http::StatusCode::OK), 10);
        }
        stats.record("step_1", Duration::from_millis(1)).unwrap();
        stats.record_exchange(Some(http::StatusCode::NOT_FOUND), 0);
        stats.record_exchange(None, 0);

        let out = render(&report(&stats, BTreeMap::from([(Phase::Main, 1)])));
        for needle in ["Summary", "Timers", "step_1", "Main percentiles", "404", "no response", "Error distribution", "Failed in main"] {
            assert!(out.contains(needle), "missing {needle:?} in\n{out}");
        }
    }

    #[test]
    fn empty_run_prints_only_the_summary() {
        let out = render(&report(&Stats::new(), BTreeMap::new()));
        assert!(out.contains("Summary"));
        assert!(!out.contains("Timers"));
        assert!(!out.contains("Status distribution"));
        assert!(!out.contains("Error distribution"));
    }
}
