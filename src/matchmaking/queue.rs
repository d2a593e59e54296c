//! Matchmaking queue implementation

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::game::pawn::PawnKind;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    pub user_id: Uuid,
    pub display_name: String,
    /// Requested pawn; the match decides what is granted
    pub pawn: Option<PawnKind>,
    pub queued_at: Instant,
}

impl QueuedPlayer {
    pub fn new(user_id: Uuid, display_name: String, pawn: Option<PawnKind>) -> Self {
        Self {
            user_id,
            display_name,
            pawn,
            queued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.queued_at.elapsed()
    }
}

/// The matchmaking queue
pub struct MatchmakingQueue {
    queue: VecDeque<QueuedPlayer>,
    /// Minimum players to start a match
    min_players: usize,
    /// Maximum players per match
    max_players: usize,
    /// Max time to wait before starting with fewer players
    max_wait_time: Duration,
}

impl MatchmakingQueue {
    pub fn new(min_players: usize, max_players: usize, max_wait_secs: u64) -> Self {
        Self {
            queue: VecDeque::new(),
            min_players,
            max_players,
            max_wait_time: Duration::from_secs(max_wait_secs),
        }
    }

    /// Add a player to the queue
    pub fn enqueue(&mut self, player: QueuedPlayer) {
        // Remove if already in queue (rejoin)
        self.queue.retain(|p| p.user_id != player.user_id);
        self.queue.push_back(player);
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, user_id: Uuid) -> Option<QueuedPlayer> {
        let pos = self.queue.iter().position(|p| p.user_id == user_id)?;
        self.queue.remove(pos)
    }

    /// Queued players, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &QueuedPlayer> {
        self.queue.iter()
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Check if queue is empty
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The oldest connected player has waited past the limit
    pub fn has_waited_too_long(&self, connected: &HashSet<Uuid>) -> bool {
        self.queue
            .iter()
            .find(|p| connected.contains(&p.user_id))
            .is_some_and(|p| p.wait_time() >= self.max_wait_time)
    }

    /// Remove up to `max` connected players, oldest first.
    /// Players without a live connection keep their place.
    pub fn drain_connected(&mut self, connected: &HashSet<Uuid>, max: usize) -> std::vec::IntoIter<QueuedPlayer> {
        let mut taken = Vec::new();
        let mut kept = VecDeque::with_capacity(self.queue.len());
        for player in self.queue.drain(..) {
            if taken.len() < max && connected.contains(&player.user_id) {
                taken.push(player);
            } else {
                kept.push_back(player);
            }
        }
        self.queue = kept;
        taken.into_iter()
    }

    /// Get min players setting
    pub fn min_players(&self) -> usize {
        self.min_players
    }

    /// Get max players setting
    pub fn max_players(&self) -> usize {
        self.max_players
    }
}

impl Default for MatchmakingQueue {
    fn default() -> Self {
        Self::new(2, 8, 30) // 2-8 players, 30 second max wait
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> QueuedPlayer {
        QueuedPlayer::new(Uuid::new_v4(), "Moo".to_string(), None)
    }

    #[test]
    fn rejoin_moves_player_to_back() {
        let mut queue = MatchmakingQueue::default();
        let a = player();
        let b = player();
        queue.enqueue(a.clone());
        queue.enqueue(b.clone());
        queue.enqueue(a.clone());

        let order: Vec<Uuid> = queue.iter().map(|p| p.user_id).collect();
        assert_eq!(order, vec![b.user_id, a.user_id]);
    }

    #[test]
    fn drain_skips_disconnected_players() {
        let mut queue = MatchmakingQueue::default();
        let players: Vec<QueuedPlayer> = (0..4).map(|_| player()).collect();
        for p in &players {
            queue.enqueue(p.clone());
        }
        let connected: HashSet<Uuid> = [players[0].user_id, players[2].user_id, players[3].user_id]
            .into_iter()
            .collect();

        let drained: Vec<Uuid> = queue.drain_connected(&connected, 2).map(|p| p.user_id).collect();

        assert_eq!(drained, vec![players[0].user_id, players[2].user_id]);
        let left: Vec<Uuid> = queue.iter().map(|p| p.user_id).collect();
        assert_eq!(left, vec![players[1].user_id, players[3].user_id]);
    }

    #[test]
    fn wait_limit_only_counts_connected_players() {
        let mut queue = MatchmakingQueue::new(2, 8, 0);
        let p = player();
        queue.enqueue(p.clone());

        assert!(!queue.has_waited_too_long(&HashSet::new()));
        assert!(queue.has_waited_too_long(&[p.user_id].into_iter().collect()));
    }
}
