// tap.rs

use crossbeam::channel::{unbounded, Sender};
use log::trace;
use std::sync::Mutex;
use std::time::Duration;

/// Groups presses arriving within `timeout` of each other into one gesture.
///
/// The first press of a gesture waits for the followers and returns how many
/// presses it counted (capped at `max_taps`). Followers return `None`.
pub struct TapDetector {
    timeout: Duration,
    max_taps: usize,
    pending: Mutex<Option<Sender<()>>>,
}

impl TapDetector {
    pub fn new(timeout: Duration, max_taps: usize) -> Self {
        Self {
            timeout,
            max_taps: max_taps.max(1),
            pending: Mutex::new(None),
        }
    }

    /// Blocks the leading press until the gesture ends.
    pub fn press(&self) -> Option<usize> {
        let taps = {
            let mut pending = self.pending.lock().unwrap_or_else(|p| p.into_inner());
            if let Some(leader) = pending.as_ref() {
                let _ = leader.send(());
                return None;
            }
            let (tx, rx) = unbounded();
            *pending = Some(tx);
            rx
        };

        let mut count = 1;
        while count < self.max_taps {
            match taps.recv_timeout(self.timeout) {
                Ok(()) => count += 1,
                Err(_) => break,
            }
        }

        self.pending
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        // presses that raced with the timeout
        count += taps.try_iter().count();
        let count = count.min(self.max_taps);
        trace!("Tap gesture of {}", count);
        Some(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn gesture(detector: &Arc<TapDetector>, presses: usize, gap: Duration) -> Vec<Option<usize>> {
        let mut handles = Vec::new();
        for _ in 0..presses {
            let detector = Arc::clone(detector);
            handles.push(thread::spawn(move || detector.press()));
            thread::sleep(gap);
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn test_single_press() {
        let detector = TapDetector::new(Duration::from_millis(20), 3);
        assert_eq!(detector.press(), Some(1));
    }

    #[test]
    fn test_double_press() {
        let detector = Arc::new(TapDetector::new(Duration::from_millis(300), 3));
        let results = gesture(&detector, 2, Duration::from_millis(30));
        assert_eq!(results, vec![Some(2), None]);
    }

    #[test]
    fn test_presses_are_capped() {
        let detector = Arc::new(TapDetector::new(Duration::from_millis(300), 3));
        let results = gesture(&detector, 3, Duration::from_millis(20));
        assert_eq!(results, vec![Some(3), None, None]);
    }

    #[test]
    fn test_slow_presses_are_separate_gestures() {
        let detector = TapDetector::new(Duration::from_millis(10), 3);
        assert_eq!(detector.press(), Some(1));
        thread::sleep(Duration::from_millis(30));
        assert_eq!(detector.press(), Some(1));
    }
}
