//! Terminal feedback for the CLI: a spinner per startup stage and a frame
//! counter while a provider is drained. Falls back to plain stderr lines when
//! not attached to a terminal.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiMode {
    Auto,
    Plain,
    Pretty,
}

#[derive(Clone, Debug)]
pub struct Ui {
    mode: UiMode,
    is_tty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, is_tty: bool) -> Self {
        Self { mode, is_tty }
    }

    pub fn from_flag(flag: Option<&str>, is_tty: bool) -> Self {
        let mode = match flag {
            Some("plain") => UiMode::Plain,
            Some("pretty") => UiMode::Pretty,
            _ => UiMode::Auto,
        };
        Self::new(mode, is_tty)
    }

    fn pretty(&self) -> bool {
        self.is_tty && self.mode != UiMode::Plain
    }

    pub fn stage(&self, name: &str) -> StageGuard {
        if self.pretty() {
            let spinner = ProgressBar::new_spinner();
            spinner.set_draw_target(ProgressDrawTarget::stderr());
            spinner.enable_steady_tick(Duration::from_millis(120));
            let style = ProgressStyle::with_template("{spinner} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            spinner.set_style(style);
            spinner.set_message(format!("{name}…"));
            StageGuard::new(name.to_string(), Some(spinner))
        } else {
            eprintln!("==> {}", name);
            StageGuard::new(name.to_string(), None)
        }
    }

    /// Frame counter for one provider. `total` is `None` for live streams.
    pub fn frames(&self, label: &str, total: Option<u64>) -> FrameProgress {
        if !self.pretty() {
            eprintln!("==> processing {}", label);
            return FrameProgress {
                bar: None,
                label: label.to_string(),
                frames: 0,
                start: Instant::now(),
            };
        }
        let bar = match total {
            Some(total) => {
                let bar = ProgressBar::new(total);
                let style = ProgressStyle::with_template(
                    "{msg} [{bar:30}] {pos}/{len} frames ({per_sec})",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar());
                bar.set_style(style);
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                let style = ProgressStyle::with_template("{spinner} {msg} {pos} frames")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner());
                bar.set_style(style);
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            }
        };
        bar.set_draw_target(ProgressDrawTarget::stderr());
        bar.set_message(label.to_string());
        FrameProgress {
            bar: Some(bar),
            label: label.to_string(),
            frames: 0,
            start: Instant::now(),
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl StageGuard {
    fn new(name: String, spinner: Option<ProgressBar>) -> Self {
        Self {
            name,
            start: Instant::now(),
            spinner,
        }
    }
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        if let Some(spinner) = &self.spinner {
            spinner.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

pub struct FrameProgress {
    bar: Option<ProgressBar>,
    label: String,
    frames: u64,
    start: Instant,
}

impl FrameProgress {
    pub fn advance(&mut self, frames: usize) {
        self.frames += frames as u64;
        if let Some(bar) = &self.bar {
            bar.inc(frames as u64);
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

impl Drop for FrameProgress {
    fn drop(&mut self) {
        let message = format!(
            "✔ {}: {} frames ({})",
            self.label,
            self.frames,
            format_duration(self.start.elapsed())
        );
        if let Some(bar) = &self.bar {
            bar.finish_with_message(message);
        } else {
            eprintln!("{message}");
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_selects_mode() {
        assert_eq!(Ui::from_flag(Some("plain"), true).mode, UiMode::Plain);
        assert_eq!(Ui::from_flag(Some("pretty"), true).mode, UiMode::Pretty);
        assert_eq!(Ui::from_flag(None, true).mode, UiMode::Auto);
        assert!(!Ui::from_flag(Some("pretty"), false).pretty());
    }

    #[test]
    fn plain_progress_counts_frames() {
        let ui = Ui::new(UiMode::Plain, false);
        let mut progress = ui.frames("clip.mp4", Some(10));
        progress.advance(4);
        progress.advance(2);
        assert_eq!(progress.frames(), 6);
    }

    #[test]
    fn durations_switch_units_at_one_second() {
        assert_eq!(format_duration(Duration::from_millis(250)), "250ms");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
