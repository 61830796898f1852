// player.rs

use super::{run, ActionError};
use log::{debug, info};
use std::sync::Mutex;

pub trait MediaPlayer: Send + Sync {
    fn play_pause(&self) -> Result<(), ActionError>;
    fn next(&self) -> Result<(), ActionError>;
    fn previous(&self) -> Result<(), ActionError>;
}

fn is_player(candidate: &str, name: &str) -> bool {
    let candidate = candidate.to_lowercase();
    let name = name.to_lowercase();
    candidate == name || candidate.starts_with(&format!("{name}."))
}

/// Picks the player to control: a playing one before any other, and among a
/// group the most recently controlled one before the rest.
pub fn choose_player(players: &[String], playing: &[String], last: &str) -> Option<String> {
    let prefer = |group: &[String]| {
        group
            .iter()
            .find(|p| is_player(p, last))
            .or_else(|| group.first())
            .cloned()
    };
    prefer(playing).or_else(|| prefer(players))
}

/// Controls MPRIS players through `playerctl`
pub struct PlayerctlPlayer {
    last: Mutex<String>,
}

const PLAYERCTL: &str = "playerctl";

impl PlayerctlPlayer {
    /// `preferred` is controlled when nothing is playing, until another player is used
    pub fn new(preferred: impl Into<String>) -> Self {
        Self {
            last: Mutex::new(preferred.into()),
        }
    }

    fn players(&self) -> Result<Vec<String>, ActionError> {
        Ok(run(PLAYERCTL, &["-l"])?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect())
    }

    fn is_playing(&self, player: &str) -> bool {
        match run(PLAYERCTL, &["-p", player, "status"]) {
            Ok(status) => status.trim() == "Playing",
            Err(e) => {
                debug!("No status for {}: {}", player, e);
                false
            }
        }
    }

    fn control(&self, command: &str) -> Result<(), ActionError> {
        let players = self.players()?;
        let playing: Vec<String> = players
            .iter()
            .filter(|p| self.is_playing(p))
            .cloned()
            .collect();

        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        let Some(player) = choose_player(&players, &playing, &last) else {
            debug!("No media player to {}", command);
            return Ok(());
        };
        info!("{} -> {}", command, player);
        run(PLAYERCTL, &["-p", &player, command])?;
        *last = player.split('.').next().unwrap_or(&player).to_string();
        Ok(())
    }
}

impl MediaPlayer for PlayerctlPlayer {
    fn play_pause(&self) -> Result<(), ActionError> {
        self.control("play-pause")
    }

    fn next(&self) -> Result<(), ActionError> {
        self.control("next")
    }

    fn previous(&self) -> Result<(), ActionError> {
        self.control("previous")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_playing_player_wins() {
        let players = names(&["spotify", "firefox.instance1234", "vlc"]);
        let playing = names(&["firefox.instance1234"]);
        assert_eq!(
            choose_player(&players, &playing, "spotify").as_deref(),
            Some("firefox.instance1234")
        );
    }

    #[test]
    fn test_last_used_wins_among_equals() {
        let players = names(&["vlc", "firefox.instance1234", "spotify"]);
        assert_eq!(
            choose_player(&players, &[], "Spotify").as_deref(),
            Some("spotify")
        );
        assert_eq!(
            choose_player(&players, &[], "firefox").as_deref(),
            Some("firefox.instance1234")
        );

        let playing = names(&["vlc", "spotify"]);
        assert_eq!(
            choose_player(&players, &playing, "spotify").as_deref(),
            Some("spotify")
        );
    }

    #[test]
    fn test_falls_back_to_first() {
        let players = names(&["vlc", "mpv"]);
        assert_eq!(choose_player(&players, &[], "spotify").as_deref(), Some("vlc"));
        assert_eq!(choose_player(&[], &[], "spotify"), None);
    }
}
