//! Spinner that shows the running totals while a session is active

use std::time::Duration;

use exposer::session::{PassSummary, Reporter, SessionStats};
use indicatif::{ProgressBar, ProgressStyle};

pub struct SpinnerReporter {
  pb: ProgressBar,
}

impl SpinnerReporter {
  pub fn new() -> Self {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
      ProgressStyle::default_spinner()
        .template("{spinner:.green} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(120));
    pb.set_message(status_line(&SessionStats::default()));
    Self { pb }
  }

  pub fn finish(&self, stats: &SessionStats) {
    self.pb.finish_with_message(format!("Stopped | {}", status_line(stats)));
  }
}

impl Reporter for SpinnerReporter {
  fn event_processed(&mut self, stats: &SessionStats) {
    self.pb.set_message(status_line(stats));
  }

  fn pass_finished(&mut self, summary: &PassSummary, stats: &SessionStats) {
    let mut msg = format!("{} | passes: {}", status_line(stats), stats.passes);
    if summary.feed_error.is_some() {
      msg.push_str(" | last pass failed");
    }
    self.pb.set_message(msg);
  }
}

fn status_line(stats: &SessionStats) -> String {
  format!(
    "entries stored: {} | merged: {} | failed: {}",
    stats.created, stats.merged, stats.failed
  )
}
