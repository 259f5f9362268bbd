//! Console output.
//!
//! Human-readable progress goes to one stream, CSV rows to another, so the
//! two can be captured separately (`connramp > log.txt 2> results.csv`).

use crate::error::BenchError;
use crate::estimator::Metrics;
use crate::ramp::StepRow;
use colored::Colorize;
use std::io::{self, Stderr, Stdout, Write};

pub const CSV_HEADER: &str = "# connections,p50,p75,p95";

pub struct Reporter<H, C> {
    human: H,
    csv: C,
    color: bool,
}

impl Reporter<Stdout, Stderr> {
    /// Progress on stdout, CSV on stderr.
    pub fn stdio(color: bool) -> Self {
        Self::new(io::stdout(), io::stderr(), color)
    }
}

impl<H: Write, C: Write> Reporter<H, C> {
    pub fn new(human: H, csv: C, color: bool) -> Self {
        Self { human, csv, color }
    }

    /// Print a phase heading, underlined to its own width.
    pub fn section(&mut self, title: &str) -> io::Result<()> {
        let underline = "-".repeat(title.chars().count());
        if self.color {
            writeln!(self.human, "\n{}\n{}", title.bold(), underline.dimmed())?;
        } else {
            writeln!(self.human, "\n{title}\n{underline}")?;
        }
        self.human.flush()
    }

    pub fn csv_header(&mut self) -> io::Result<()> {
        writeln!(self.csv, "{CSV_HEADER}")?;
        self.csv.flush()
    }

    pub fn worker_failed(&mut self, slot: usize, err: &BenchError) -> io::Result<()> {
        if self.color {
            writeln!(
                self.human,
                "{} worker {slot}: {err}",
                "Error during work loop".red()
            )
        } else {
            writeln!(self.human, "Error during work loop: worker {slot}: {err}")
        }
    }

    /// Emit the summary block and the CSV line for one step.
    pub fn step(&mut self, row: &StepRow, metrics: &Metrics) -> io::Result<()> {
        let title = format!("loop {}", row.connections);
        let underline = "-".repeat(title.len());
        if self.color {
            writeln!(self.human, "{}\n{underline}", title.cyan().bold())?;
        } else {
            writeln!(self.human, "{title}\n{underline}")?;
        }
        writeln!(self.human, "num errors = {}", row.errors)?;
        writeln!(self.human)?;
        writeln!(self.human, "{metrics}")?;
        writeln!(self.human)?;
        writeln!(self.human)?;
        self.human.flush()?;

        writeln!(self.csv, "{}", row.csv_line())?;
        self.csv.flush()
    }

    pub fn into_inner(self) -> (H, C) {
        (self.human, self.csv)
    }
}
