//! Lobby state: a pre-match grouping with shared settings

use std::time::Instant;
use uuid::Uuid;

use crate::ws::protocol::{AircraftKind, Loadout, PlayerInfo, SessionSettings};

/// One player waiting in a lobby
#[derive(Debug, Clone)]
pub struct LobbyMember {
    pub player_id: Uuid,
    pub callsign: String,
    pub aircraft: AircraftKind,
    pub loadout: Loadout,
}

impl LobbyMember {
    pub fn new(
        player_id: Uuid,
        callsign: String,
        aircraft: AircraftKind,
        loadout: Loadout,
    ) -> Self {
        Self {
            player_id,
            callsign,
            aircraft,
            loadout,
        }
    }

    pub fn info(&self) -> PlayerInfo {
        PlayerInfo {
            player_id: self.player_id,
            callsign: self.callsign.clone(),
            aircraft: self.aircraft,
            loadout: self.loadout.clone(),
        }
    }
}

/// A lobby converts into a session on start, then is discarded
#[derive(Debug)]
pub struct Lobby {
    pub id: Uuid,
    pub settings: SessionSettings,
    members: Vec<LobbyMember>,
    pub created_at: Instant,
}

impl Lobby {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            settings,
            members: Vec::new(),
            created_at: Instant::now(),
        }
    }

    /// Add a member; rejoin replaces the previous entry
    pub fn add(&mut self, member: LobbyMember) -> bool {
        if self.members.len() >= self.settings.max_players
            && !self.contains(member.player_id)
        {
            return false;
        }
        self.members.retain(|m| m.player_id != member.player_id);
        self.members.push(member);
        true
    }

    pub fn remove(&mut self, player_id: Uuid) -> Option<LobbyMember> {
        let pos = self
            .members
            .iter()
            .position(|m| m.player_id == player_id)?;
        Some(self.members.remove(pos))
    }

    pub fn contains(&self, player_id: Uuid) -> bool {
        self.members.iter().any(|m| m.player_id == player_id)
    }

    pub fn members(&self) -> &[LobbyMember] {
        &self.members
    }

    pub fn member_infos(&self) -> Vec<PlayerInfo> {
        self.members.iter().map(LobbyMember::info).collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Drain all members for session conversion
    pub fn take_members(&mut self) -> Vec<LobbyMember> {
        std::mem::take(&mut self.members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str) -> LobbyMember {
        LobbyMember::new(
            Uuid::new_v4(),
            name.to_string(),
            AircraftKind::Fighter,
            Loadout::default(),
        )
    }

    #[test]
    fn rejoin_replaces_rather_than_duplicates() {
        let mut lobby = Lobby::new(SessionSettings::default());
        let m = member("Dup");
        let id = m.player_id;
        assert!(lobby.add(m.clone()));
        assert!(lobby.add(m));
        assert_eq!(lobby.len(), 1);
        assert!(lobby.contains(id));
    }

    #[test]
    fn full_lobby_rejects_new_members() {
        let settings = SessionSettings {
            max_players: 2,
            ..Default::default()
        };
        let mut lobby = Lobby::new(settings);
        assert!(lobby.add(member("A")));
        assert!(lobby.add(member("B")));
        assert!(!lobby.add(member("C")));
        assert_eq!(lobby.len(), 2);
    }

    #[test]
    fn take_members_empties_the_lobby() {
        let mut lobby = Lobby::new(SessionSettings::default());
        lobby.add(member("A"));
        lobby.add(member("B"));
        let drained = lobby.take_members();
        assert_eq!(drained.len(), 2);
        assert!(lobby.is_empty());
    }
}
