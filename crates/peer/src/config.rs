use kartlink::{FixedPlayerId, MacAddressId, PlayerId, PlayerIdProvider, SessionConfig, Tick};

/// Where this peer's player id comes from.
#[derive(Debug, Clone, Copy)]
pub enum Identity {
    Mac(MacAddressId),
    Fixed(FixedPlayerId),
}

impl PlayerIdProvider for Identity {
    fn player_id(&self) -> PlayerId {
        match self {
            Identity::Mac(mac) => mac.player_id(),
            Identity::Fixed(fixed) => fixed.player_id(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PeerConfig {
    pub session: SessionConfig,
    pub identity: Identity,
    pub auto_ready: bool,
    /// Leave the race after this many ticks; `None` races until cancelled.
    pub race_ticks: Option<Tick>,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            identity: Identity::Mac(MacAddressId::new([0; 6])),
            auto_ready: false,
            race_ticks: None,
        }
    }
}
