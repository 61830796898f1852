use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn create_reconnect_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix("MIDI");
    pb.set_message("Trying to reconnect…");
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
