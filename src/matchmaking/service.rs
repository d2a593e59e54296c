//! Matchmaking service - manages queue and match creation

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::game::{GameMatch, MatchHandle, MatchRegistry, MatchSettings, PlayerInput};
use crate::util::time::unix_millis;
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::queue::{MatchmakingQueue, QueuedPlayer};

/// Seconds a lone player waits before a match starts without a full lobby
const MAX_QUEUE_WAIT_SECS: u64 = 30;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MatchmakingError {
    #[error("Already in a match")]
    AlreadyInMatch,
}

/// Player connection handle for routing messages
#[derive(Clone)]
pub struct PlayerConnection {
    /// Channel fanning match broadcasts out to this player
    pub snapshot_tx: broadcast::Sender<ServerMsg>,
    /// Hands the forwarder a subscription to the player's new match
    match_rx_tx: mpsc::UnboundedSender<broadcast::Receiver<ServerMsg>>,
}

/// What woke the broadcast forwarder
enum Forward {
    Attached(Option<broadcast::Receiver<ServerMsg>>),
    Received(Result<ServerMsg, broadcast::error::RecvError>),
}

/// Matchmaking service
#[derive(Clone)]
pub struct MatchmakingService {
    queue: Arc<Mutex<MatchmakingQueue>>,
    registry: Arc<MatchRegistry>,
    settings: MatchSettings,
    /// Connected players awaiting or in matches
    players: Arc<DashMap<Uuid, PlayerConnection>>,
    /// Map of player -> current match
    player_matches: Arc<DashMap<Uuid, Uuid>>,
}

impl MatchmakingService {
    pub fn new(registry: Arc<MatchRegistry>, settings: MatchSettings) -> Self {
        let queue = MatchmakingQueue::new(settings.min_players, settings.max_players, MAX_QUEUE_WAIT_SECS);
        Self {
            queue: Arc::new(Mutex::new(queue)),
            registry,
            settings,
            players: Arc::new(DashMap::new()),
            player_matches: Arc::new(DashMap::new()),
        }
    }

    /// Register a player connection (called when WebSocket connects)
    /// Returns channels for communication
    pub async fn register_player(
        &self,
        user_id: Uuid,
    ) -> (mpsc::Sender<PlayerInput>, broadcast::Receiver<ServerMsg>) {
        let (input_tx, mut input_rx) = mpsc::channel::<PlayerInput>(64);
        let (snapshot_tx, snapshot_rx) = broadcast::channel::<ServerMsg>(256);
        let (match_rx_tx, mut match_rx_rx) = mpsc::unbounded_channel::<broadcast::Receiver<ServerMsg>>();

        self.players.insert(
            user_id,
            PlayerConnection {
                snapshot_tx: snapshot_tx.clone(),
                match_rx_tx,
            },
        );

        // Route inputs from the player's channel to their current match
        let service = self.clone();
        tokio::spawn(async move {
            while let Some(input) = input_rx.recv().await {
                service.route_input(input).await;
            }
            debug!(user_id = %user_id, "Input router stopped");
        });

        // Forward broadcasts of the player's current match. Subscriptions arrive
        // from attach(), before the join is sent. Ends on unregister.
        tokio::spawn(async move {
            let mut current_match_rx: Option<broadcast::Receiver<ServerMsg>> = None;

            loop {
                let event = match current_match_rx.as_mut() {
                    Some(rx) => tokio::select! {
                        biased;
                        attached = match_rx_rx.recv() => Forward::Attached(attached),
                        msg = rx.recv() => Forward::Received(msg),
                    },
                    None => Forward::Attached(match_rx_rx.recv().await),
                };

                match event {
                    Forward::Attached(Some(rx)) => current_match_rx = Some(rx),
                    Forward::Attached(None) => break,
                    Forward::Received(Ok(msg)) => {
                        let _ = snapshot_tx.send(msg);
                    }
                    Forward::Received(Err(broadcast::error::RecvError::Lagged(n))) => {
                        warn!(user_id = %user_id, lagged = n, "Snapshot receiver lagged");
                    }
                    Forward::Received(Err(broadcast::error::RecvError::Closed)) => {
                        current_match_rx = None;
                    }
                }
            }
            debug!(user_id = %user_id, "Broadcast forwarder stopped");
        });

        (input_tx, snapshot_rx)
    }

    /// Deliver one player message, handling joins that are not tied to a match yet
    async fn route_input(&self, mut input: PlayerInput) {
        let user_id = input.user_id;

        if let ClientMsg::JoinMatch { match_id, pawn } = &input.msg {
            if !self.player_matches.contains_key(&user_id) {
                match match_id {
                    Some(id) => match self.registry.get(id) {
                        Some(handle) if handle.player_count() >= self.settings.max_players => {
                            debug!(user_id = %user_id, match_id = %id, "Join for full match");
                            self.notify(user_id, "match_full", "Match is full".to_string());
                            return;
                        }
                        Some(handle) => self.attach(user_id, &handle),
                        None => {
                            warn!(user_id = %user_id, match_id = %id, "Join for unknown match");
                            self.notify(user_id, "match_not_found", "Match not found".to_string());
                            return;
                        }
                    },
                    None => {
                        let name = input.display_name.clone().unwrap_or_default();
                        if let Err(e) = self.join_queue(QueuedPlayer::new(user_id, name, *pawn)).await {
                            debug!(user_id = %user_id, error = %e, "Queue join refused");
                            self.notify(user_id, "join_refused", e.to_string());
                        }
                        return;
                    }
                }
            }
        }

        if matches!(input.msg, ClientMsg::JoinMatch { .. }) {
            input.reply_tx = self.players.get(&user_id).map(|conn| conn.snapshot_tx.clone());
        }

        let Some(match_id) = self.get_player_match(&user_id) else {
            if matches!(input.msg, ClientMsg::LeaveMatch) {
                self.leave_queue(user_id).await;
            }
            return;
        };
        if let Some(match_handle) = self.registry.get(&match_id) {
            if match_handle.input_tx.send(input).await.is_err() {
                warn!(user_id = %user_id, "Failed to send input to match");
            }
        }
    }

    /// Map a player to a match and subscribe them to its broadcasts
    fn attach(&self, user_id: Uuid, handle: &MatchHandle) {
        self.player_matches.insert(user_id, handle.id);
        if let Some(conn) = self.players.get(&user_id) {
            let _ = conn.match_rx_tx.send(handle.snapshot_tx.subscribe());
        }
    }

    /// Send an error straight to one player
    fn notify(&self, user_id: Uuid, code: &str, message: String) {
        if let Some(conn) = self.players.get(&user_id) {
            let _ = conn.snapshot_tx.send(ServerMsg::Error {
                code: code.to_string(),
                message,
            });
        }
    }

    /// Unregister a player (called when WebSocket disconnects)
    pub async fn unregister_player(&self, user_id: Uuid) {
        self.players.remove(&user_id);

        // The match must hear about the disconnect even if the router is gone
        if let Some((_, match_id)) = self.player_matches.remove(&user_id) {
            if let Some(handle) = self.registry.get(&match_id) {
                let _ = handle.input_tx.try_send(PlayerInput {
                    user_id,
                    display_name: None,
                    msg: ClientMsg::LeaveMatch,
                    received_at: unix_millis(),
                    reply_tx: None,
                });
            }
        }

        self.queue.lock().await.dequeue(user_id);

        info!(user_id = %user_id, "Player unregistered from matchmaking");
    }

    /// Join matchmaking queue
    pub async fn join_queue(&self, player: QueuedPlayer) -> Result<(), MatchmakingError> {
        let user_id = player.user_id;

        if self.player_matches.contains_key(&user_id) {
            return Err(MatchmakingError::AlreadyInMatch);
        }

        let mut queue = self.queue.lock().await;
        queue.enqueue(player);

        info!(user_id = %user_id, queue_size = queue.len(), "Player joined matchmaking queue");

        // Matches are formed by the run() loop, which only takes connected players
        Ok(())
    }

    /// Leave matchmaking queue
    pub async fn leave_queue(&self, user_id: Uuid) {
        self.queue.lock().await.dequeue(user_id);
    }

    /// Create a match with the given players
    async fn create_match(&self, players: Vec<QueuedPlayer>) {
        let match_id = Uuid::new_v4();
        let seed = rand::random::<u64>();

        // A lobby formed by the wait limit can be smaller than the usual minimum
        let settings = MatchSettings {
            min_players: self.settings.min_players.min(players.len()).max(1),
            ..self.settings.clone()
        };

        let (game_match, handle) = GameMatch::new(match_id, seed, settings);
        self.registry.insert(handle.clone());

        for player in &players {
            self.attach(player.user_id, &handle);
        }

        info!(match_id = %match_id, player_count = players.len(), "Created new match");

        let registry = self.registry.clone();
        let player_matches = self.player_matches.clone();

        tokio::spawn(async move {
            game_match.run().await;

            registry.remove(&match_id);
            player_matches.retain(|_, mid| *mid != match_id);

            info!(match_id = %match_id, "Match removed from registry");
        });

        // Move players into the match
        for player in players {
            if !self.players.contains_key(&player.user_id) {
                continue;
            }
            let reply_tx = self.players.get(&player.user_id).map(|conn| conn.snapshot_tx.clone());
            let join_input = PlayerInput {
                user_id: player.user_id,
                display_name: Some(player.display_name),
                msg: ClientMsg::JoinMatch {
                    match_id: Some(match_id),
                    pawn: player.pawn,
                },
                received_at: unix_millis(),
                reply_tx,
            };

            if handle.input_tx.send(join_input).await.is_err() {
                error!(user_id = %player.user_id, "Failed to send join to match");
            }
        }
    }

    /// Form at most one match from connected queued players
    async fn process_queue(&self) {
        let connected_ids: HashSet<Uuid> = self.players.iter().map(|entry| *entry.key()).collect();

        let mut queue = self.queue.lock().await;
        let connected_count = queue.iter().filter(|p| connected_ids.contains(&p.user_id)).count();
        let waited_too_long = queue.has_waited_too_long(&connected_ids);

        if connected_count >= queue.min_players() || (connected_count >= 1 && waited_too_long) {
            let max_players = queue.max_players();
            let players: Vec<QueuedPlayer> = queue.drain_connected(&connected_ids, max_players).collect();

            if !players.is_empty() {
                drop(queue); // Release lock for match creation
                self.create_match(players).await;
            }
        }
    }

    /// Run the matchmaking service (periodic queue processing)
    pub async fn run(&self) {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_millis(500));

        loop {
            interval.tick().await;
            self.process_queue().await;
        }
    }

    /// Get current queue size
    pub async fn queue_size(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Get player's current match ID
    pub fn get_player_match(&self, user_id: &Uuid) -> Option<Uuid> {
        self.player_matches.get(user_id).map(|r| *r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(min_players: usize) -> MatchmakingService {
        let settings = MatchSettings {
            min_players,
            ..MatchSettings::default()
        };
        MatchmakingService::new(Arc::new(MatchRegistry::new()), settings)
    }

    #[test]
    fn queue_join_is_refused_while_in_a_match() {
        let svc = service(2);
        let user_id = Uuid::new_v4();
        svc.player_matches.insert(user_id, Uuid::new_v4());

        let result = tokio_test::block_on(svc.join_queue(QueuedPlayer::new(user_id, "Moo".to_string(), None)));
        assert_eq!(result, Err(MatchmakingError::AlreadyInMatch));
        assert_eq!(tokio_test::block_on(svc.queue_size()), 0);
    }

    #[test]
    fn leaving_the_queue_removes_the_player() {
        let svc = service(2);
        let user_id = Uuid::new_v4();
        tokio_test::block_on(async {
            svc.join_queue(QueuedPlayer::new(user_id, "Moo".to_string(), None))
                .await
                .unwrap();
            svc.leave_queue(user_id).await;
        });
        assert_eq!(tokio_test::block_on(svc.queue_size()), 0);
    }

    #[tokio::test]
    async fn connected_players_are_matched() {
        let svc = service(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let _a_channels = svc.register_player(a).await;
        let _b_channels = svc.register_player(b).await;

        svc.join_queue(QueuedPlayer::new(a, "A".to_string(), None)).await.unwrap();
        svc.join_queue(QueuedPlayer::new(b, "B".to_string(), None)).await.unwrap();
        svc.process_queue().await;

        let match_id = svc.get_player_match(&a).unwrap();
        assert_eq!(svc.get_player_match(&b), Some(match_id));
        assert!(svc.registry.get(&match_id).is_some());
        assert_eq!(svc.queue_size().await, 0);
    }

    #[tokio::test]
    async fn disconnected_players_stay_queued() {
        let svc = service(2);
        let a = Uuid::new_v4();
        let _a_channels = svc.register_player(a).await;

        svc.join_queue(QueuedPlayer::new(a, "A".to_string(), None)).await.unwrap();
        svc.join_queue(QueuedPlayer::new(Uuid::new_v4(), "B".to_string(), None))
            .await
            .unwrap();
        svc.process_queue().await;

        assert!(svc.get_player_match(&a).is_none());
        assert_eq!(svc.queue_size().await, 2);
    }

    #[tokio::test]
    async fn leave_message_takes_queued_player_out() {
        let svc = service(2);
        let user_id = Uuid::new_v4();
        svc.join_queue(QueuedPlayer::new(user_id, "Moo".to_string(), None))
            .await
            .unwrap();

        svc.route_input(PlayerInput {
            user_id,
            display_name: None,
            msg: ClientMsg::LeaveMatch,
            received_at: unix_millis(),
            reply_tx: None,
        })
        .await;

        assert_eq!(svc.queue_size().await, 0);
    }

    async fn next_match_joined(rx: &mut broadcast::Receiver<ServerMsg>) -> Option<Uuid> {
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                match rx.recv().await {
                    Ok(ServerMsg::MatchJoined { match_id, .. }) => return Some(match_id),
                    Ok(_) => continue,
                    Err(_) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
    }

    #[tokio::test]
    async fn joining_by_id_delivers_match_joined() {
        let svc = service(2);
        let (game_match, handle) = GameMatch::new(Uuid::new_v4(), 11, svc.settings.clone());
        svc.registry.insert(handle.clone());
        tokio::spawn(game_match.run());

        let user_id = Uuid::new_v4();
        let (input_tx, mut rx) = svc.register_player(user_id).await;
        input_tx
            .send(PlayerInput {
                user_id,
                display_name: Some("Daisy".to_string()),
                msg: ClientMsg::JoinMatch {
                    match_id: Some(handle.id),
                    pawn: None,
                },
                received_at: unix_millis(),
                reply_tx: None,
            })
            .await
            .unwrap();

        assert_eq!(next_match_joined(&mut rx).await, Some(handle.id));
        assert_eq!(svc.get_player_match(&user_id), Some(handle.id));
    }

    #[tokio::test]
    async fn queued_players_receive_match_joined() {
        let svc = service(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let (_a_tx, mut a_rx) = svc.register_player(a).await;
        let (_b_tx, mut b_rx) = svc.register_player(b).await;

        svc.join_queue(QueuedPlayer::new(a, "A".to_string(), None)).await.unwrap();
        svc.join_queue(QueuedPlayer::new(b, "B".to_string(), None)).await.unwrap();
        svc.process_queue().await;

        let match_id = svc.get_player_match(&a);
        assert!(match_id.is_some());
        assert_eq!(next_match_joined(&mut a_rx).await, match_id);
        assert_eq!(next_match_joined(&mut b_rx).await, match_id);
    }

    #[tokio::test]
    async fn full_match_refusal_reaches_only_the_joiner() {
        let settings = MatchSettings {
            max_players: 1,
            ..MatchSettings::default()
        };
        let svc = MatchmakingService::new(Arc::new(MatchRegistry::new()), settings.clone());
        let (_game_match, handle) = GameMatch::new(Uuid::new_v4(), 12, settings);
        handle.player_count.store(1, std::sync::atomic::Ordering::Relaxed);
        svc.registry.insert(handle.clone());
        let mut match_rx = handle.snapshot_tx.subscribe();

        let user_id = Uuid::new_v4();
        let (_input_tx, mut rx) = svc.register_player(user_id).await;
        svc.route_input(PlayerInput {
            user_id,
            display_name: None,
            msg: ClientMsg::JoinMatch {
                match_id: Some(handle.id),
                pawn: None,
            },
            received_at: unix_millis(),
            reply_tx: None,
        })
        .await;

        match rx.try_recv() {
            Ok(ServerMsg::Error { code, .. }) => assert_eq!(code, "match_full"),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert!(match_rx.try_recv().is_err());
        assert!(svc.get_player_match(&user_id).is_none());
    }
}
