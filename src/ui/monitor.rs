// monitor.rs

use super::progress::create_reconnect_spinner;
use crate::midi::MidiEvent;
use crate::session::SessionStatus;
use chrono::{DateTime, Local};
use crossbeam::channel::Receiver;
use indicatif::ProgressBar;
use log::debug;

pub fn format_event(event: &MidiEvent, at: &DateTime<Local>) -> String {
    format!(
        "{} ch{:<2} {:<18} {:>3} {:>3}",
        at.format("%H:%M:%S%.3f"),
        event.channel,
        event.kind.to_string(),
        event.data1,
        event.data2
    )
}

pub fn format_status(status: &SessionStatus) -> String {
    match status {
        SessionStatus::Connected(ports) => {
            format!("Connected (input {}, output {})", ports.input, ports.output)
        }
        SessionStatus::Disconnected => "Disconnected. Trying to reconnect…".to_string(),
        SessionStatus::Reconnected(ports) => {
            format!("Reconnected (input {}, output {})", ports.input, ports.output)
        }
        SessionStatus::Reloaded => "Reloaded".to_string(),
        SessionStatus::Stopped => "Stopped".to_string(),
    }
}

/// Prints events until every sender is gone.
pub fn run_monitor(events: Receiver<MidiEvent>) {
    for event in events.iter() {
        println!("{}", format_event(&event, &Local::now()));
    }
    debug!("Monitor finished");
}

/// Prints status changes, spinning while a reconnect is in progress.
pub fn run_status_display(status: Receiver<SessionStatus>) {
    let mut spinner: Option<ProgressBar> = None;
    for change in status.iter() {
        match change {
            SessionStatus::Disconnected => {
                spinner.get_or_insert_with(create_reconnect_spinner);
            }
            other => {
                if let Some(pb) = spinner.take() {
                    pb.finish_and_clear();
                }
                println!("{}", format_status(&other));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::{MessageType, PortPair};
    use chrono::TimeZone;

    #[test]
    fn test_format_event() {
        let at = Local.with_ymd_and_hms(2024, 3, 1, 21, 4, 5).unwrap();
        let event = MidiEvent {
            channel: 2,
            kind: MessageType::NoteOn,
            data1: 60,
            data2: 100,
        };
        let line = format_event(&event, &at);
        assert!(line.starts_with("21:04:05.000 ch2"), "{line}");
        assert!(line.ends_with(" 60 100"), "{line}");
    }

    #[test]
    fn test_format_status() {
        let ports = PortPair {
            input: 2,
            output: 3,
        };
        assert_eq!(
            format_status(&SessionStatus::Reconnected(ports)),
            "Reconnected (input 2, output 3)"
        );
        assert!(format_status(&SessionStatus::Disconnected).contains("Trying to reconnect"));
    }
}
