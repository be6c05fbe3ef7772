use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};

const BAR_WIDTH: usize = 50;

/// Single-line progress bar with a percentage and an ETA.
pub struct Progress {
    bar: ProgressBar,
    started: Instant,
}

impl Progress {
    pub fn new(total: u64) -> Self {
        Self::with_bar(ProgressBar::new(total))
    }

    fn with_bar(bar: ProgressBar) -> Self {
        let total = bar.length().unwrap_or(0);
        let bar = bar.with_style(style()).with_prefix("Progress");
        bar.set_message(status(0, total, Duration::ZERO));
        Self {
            bar,
            started: Instant::now(),
        }
    }

    /// Mark one more target as done.
    pub fn inc(&self) {
        self.bar.inc(1);
        let completed = self.bar.position();
        let total = self.bar.length().unwrap_or(completed);
        self.bar
            .set_message(status(completed, total, self.started.elapsed()));
    }

    /// Print a line above the bar without garbling it. A hidden bar (stderr
    /// is not a terminal) would drop the line, so it goes to stdout instead.
    pub fn println(&self, msg: impl AsRef<str>) {
        if self.prints_directly() {
            println!("{}", msg.as_ref());
        } else {
            self.bar.println(msg);
        }
    }

    fn prints_directly(&self) -> bool {
        self.bar.is_hidden()
    }

    pub fn finish(&self) {
        self.bar.finish();
    }
}

/// Time left, assuming the remaining targets take as long as the average
/// so far. `None` until something has completed.
pub fn eta(elapsed: Duration, completed: u64, total: u64) -> Option<Duration> {
    if completed == 0 {
        return None;
    }
    let remaining = total.saturating_sub(completed);
    Some(elapsed.mul_f64(remaining as f64 / completed as f64))
}

/// `MM:SS`, with minutes allowed past 59.
pub fn format_eta(eta: Duration) -> String {
    let secs = eta.as_secs();
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

fn status(completed: u64, total: u64, elapsed: Duration) -> String {
    let percent = if total == 0 {
        100.0
    } else {
        100.0 * completed as f64 / total as f64
    };
    match eta(elapsed, completed, total) {
        Some(eta) => {
            format!("{percent:.1}% Complete | ETA: {}", format_eta(eta))
        }
        None => format!("{percent:.1}% Complete"),
    }
}

fn style() -> ProgressStyle {
    ProgressStyle::with_template(&format!(
        "{{prefix}} |{{bar:{BAR_WIDTH}}}| {{msg}}"
    ))
    .expect("always valid if tests pass")
    .progress_chars("██-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_is_valid() {
        let _ = style();
    }

    #[test]
    fn no_eta_before_first_completion() {
        assert_eq!(eta(Duration::from_secs(30), 0, 10), None);
        assert_eq!(status(0, 4, Duration::ZERO), "0.0% Complete");
    }

    #[test]
    fn eta_extrapolates_average() {
        let eta = eta(Duration::from_secs(20), 2, 5).unwrap();
        assert_eq!(eta, Duration::from_secs(30));
        assert_eq!(format_eta(eta), "00:30");
    }

    #[test]
    fn status_has_one_decimal_percent() {
        assert_eq!(
            status(1, 3, Duration::from_secs(65)),
            "33.3% Complete | ETA: 02:10"
        );
        assert_eq!(
            status(3, 3, Duration::from_secs(9)),
            "100.0% Complete | ETA: 00:00"
        );
    }

    #[test]
    fn hidden_bar_prints_lines_directly() {
        let progress = Progress::with_bar(ProgressBar::hidden());
        assert!(progress.prints_directly());
        progress.println("Processing: Car A");
        progress.inc();
        progress.finish();
    }

    #[test]
    fn long_etas_keep_counting_minutes() {
        assert_eq!(format_eta(Duration::from_secs(3725)), "62:05");
    }
}
