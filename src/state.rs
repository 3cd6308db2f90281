//! Process-wide shared state: the two registries, configuration, and the
//! start-time stamp the control surface reports uptime from (§3 "Process-wide
//! state").

use std::time::Instant;

use crate::config::Config;
use crate::peer::PeerRegistry;
use crate::room::RoomRegistry;

pub struct AppState {
    pub peers: PeerRegistry,
    pub rooms: RoomRegistry,
    pub config: Config,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            peers: PeerRegistry::new(),
            rooms: RoomRegistry::new(config.max_rooms, config.max_peers_per_room),
            config,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
