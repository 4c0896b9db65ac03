use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{RwLock, broadcast, mpsc};
use tracing::{debug, warn};
use uuid::Uuid;

use quartier_types::api::{HangmanInvite, WordSubmitted};
use quartier_types::events::GatewayEvent;
use quartier_types::hangman::{GuessOutcome, HangmanError, HangmanGame};
use quartier_types::models::HangmanRole;

/// A room event serialized once and shared by every connection.
#[derive(Debug, Clone)]
pub struct BroadcastEnvelope {
    /// `None` for events every connection receives
    pub room: Option<String>,
    pub json: Arc<str>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GameError {
    #[error("no live game for this invite")]
    NoGame,
    #[error("you are not a player of this game")]
    NotPlayer,
    #[error("only the {0} can do that")]
    WrongRole(HangmanRole),
    #[error("the invite has not been accepted")]
    NotAccepted,
    #[error("the round is not over yet")]
    RoundInProgress,
    #[error(transparent)]
    Rule(#[from] HangmanError),
}

/// One hangman round between two users, keyed by invite id.
#[derive(Debug)]
struct LiveGame {
    giver: Uuid,
    guesser: Uuid,
    game: HangmanGame,
}

impl LiveGame {
    fn role_of(&self, user_id: Uuid) -> Option<HangmanRole> {
        if user_id == self.giver {
            Some(HangmanRole::Giver)
        } else if user_id == self.guesser {
            Some(HangmanRole::Guesser)
        } else {
            None
        }
    }

    fn other(&self, user_id: Uuid) -> Uuid {
        if user_id == self.giver { self.guesser } else { self.giver }
    }
}

/// Manages all connected clients and fans events out to them.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Room events and presence, filtered per connection by joined rooms
    broadcast_tx: broadcast::Sender<BroadcastEnvelope>,

    online_users: RwLock<HashSet<Uuid>>,

    /// Per-user targeted send channels: user_id -> (conn_id, sender)
    user_channels: RwLock<HashMap<Uuid, (Uuid, mpsc::UnboundedSender<GatewayEvent>)>>,

    /// Live hangman rounds: invite_id -> game
    games: RwLock<HashMap<Uuid, LiveGame>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                online_users: RwLock::new(HashSet::new()),
                user_channels: RwLock::new(HashMap::new()),
                games: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEnvelope> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Serialize once and fan out. Room events only reach connections that
    /// joined the room.
    pub fn broadcast(&self, event: &GatewayEvent) {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize gateway event: {}", e);
                return;
            }
        };
        let _ = self.inner.broadcast_tx.send(BroadcastEnvelope {
            room: event.room().map(str::to_string),
            json: json.into(),
        });
    }

    /// Register a per-user targeted channel. A newer connection replaces an
    /// older one. Returns (conn_id, receiver).
    pub async fn register_user_channel(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.user_channels.write().await.insert(user_id, (conn_id, tx));
        (conn_id, rx)
    }

    /// Unregister a per-user targeted channel, but only if conn_id matches.
    pub async fn unregister_user_channel(&self, user_id: Uuid, conn_id: Uuid) {
        let mut channels = self.inner.user_channels.write().await;
        if channels.get(&user_id).is_some_and(|(stored, _)| *stored == conn_id) {
            channels.remove(&user_id);
        }
    }

    /// Send a targeted event to a specific user, if connected.
    pub async fn send_to_user(&self, user_id: Uuid, event: GatewayEvent) {
        let channels = self.inner.user_channels.read().await;
        if let Some((_, tx)) = channels.get(&user_id) {
            let _ = tx.send(event);
        }
    }

    pub async fn online_users(&self) -> Vec<Uuid> {
        self.inner.online_users.read().await.iter().copied().collect()
    }

    pub async fn user_online(&self, user_id: Uuid) {
        self.inner.online_users.write().await.insert(user_id);
        self.broadcast(&GatewayEvent::PresenceUpdate { user_id, online: true });
    }

    /// Mark a user offline. Only cleans up if conn_id still owns the user.
    pub async fn user_offline(&self, user_id: Uuid, conn_id: Uuid) {
        let is_current = {
            let channels = self.inner.user_channels.read().await;
            channels.get(&user_id).is_some_and(|(cid, _)| *cid == conn_id)
        };
        if !is_current {
            // A newer connection has taken over
            return;
        }

        self.inner.online_users.write().await.remove(&user_id);
        self.abandon_games(user_id).await;
        self.unregister_user_channel(user_id, conn_id).await;
        self.broadcast(&GatewayEvent::PresenceUpdate { user_id, online: false });
    }

    // -- Hangman --

    /// Create the live round for an accepted invite and tell both players
    /// their role.
    pub async fn start_game(&self, invite_id: Uuid, giver: Uuid, guesser: Uuid) {
        self.inner.games.write().await.insert(
            invite_id,
            LiveGame {
                giver,
                guesser,
                game: HangmanGame::new(),
            },
        );
        debug!("Hangman game {} started ({} gives, {} guesses)", invite_id, giver, guesser);

        for (user_id, role) in [(giver, HangmanRole::Giver), (guesser, HangmanRole::Guesser)] {
            self.send_to_user(user_id, GatewayEvent::HangmanGameStarted { invite_id, role }).await;
        }
    }

    /// Attach a player to the round of `invite`, recreating it when the
    /// server restarted since the invite was accepted.
    pub async fn join_game(&self, invite: &HangmanInvite, user_id: Uuid) -> Result<HangmanRole, GameError> {
        if !invite.involves(user_id) {
            return Err(GameError::NotPlayer);
        }
        let guesser = invite.guesser_id.ok_or(GameError::NotAccepted)?;
        let giver = invite.other_player(guesser);

        let (role, other, word_state) = {
            let mut games = self.inner.games.write().await;
            let live = games.entry(invite.id).or_insert_with(|| LiveGame {
                giver,
                guesser,
                game: HangmanGame::new(),
            });
            let role = live.role_of(user_id).ok_or(GameError::NotPlayer)?;
            let masked = live.game.masked();
            let word_state = (!masked.is_empty()).then_some(masked);
            (role, live.other(user_id), word_state)
        };

        self.send_to_user(other, GatewayEvent::HangmanPlayerJoined { invite_id: invite.id, user_id })
            .await;
        if let Some(masked) = word_state {
            self.send_to_user(
                user_id,
                GatewayEvent::HangmanWordSubmitted {
                    invite_id: invite.id,
                    length: masked.chars().count(),
                    masked,
                },
            )
            .await;
        }
        Ok(role)
    }

    /// The giver picks the word; both players get its masked form.
    pub async fn submit_word(&self, invite_id: Uuid, user_id: Uuid, word: &str) -> Result<WordSubmitted, GameError> {
        let (submitted, other) = {
            let mut games = self.inner.games.write().await;
            let live = games.get_mut(&invite_id).ok_or(GameError::NoGame)?;
            match live.role_of(user_id) {
                Some(HangmanRole::Giver) => {}
                Some(HangmanRole::Guesser) => return Err(GameError::WrongRole(HangmanRole::Giver)),
                None => return Err(GameError::NotPlayer),
            }
            let length = live.game.submit_word(word)?;
            (
                WordSubmitted {
                    invite_id,
                    length,
                    masked: live.game.masked(),
                },
                live.other(user_id),
            )
        };

        for target in [user_id, other] {
            self.send_to_user(
                target,
                GatewayEvent::HangmanWordSubmitted {
                    invite_id,
                    length: submitted.length,
                    masked: submitted.masked.clone(),
                },
            )
            .await;
        }
        Ok(submitted)
    }

    pub async fn guess(&self, invite_id: Uuid, user_id: Uuid, letter: &str) -> Result<GuessOutcome, GameError> {
        let (outcome, word, other) = {
            let mut games = self.inner.games.write().await;
            let live = games.get_mut(&invite_id).ok_or(GameError::NoGame)?;
            match live.role_of(user_id) {
                Some(HangmanRole::Guesser) => {}
                Some(HangmanRole::Giver) => return Err(GameError::WrongRole(HangmanRole::Guesser)),
                None => return Err(GameError::NotPlayer),
            }
            let outcome = live.game.guess(letter)?;
            let word = live.game.revealed_word().map(str::to_string);
            (outcome, word, live.other(user_id))
        };

        let event = GatewayEvent::HangmanLetterGuessed {
            invite_id,
            letter: outcome.letter,
            correct: outcome.correct,
            masked: outcome.masked.clone(),
            incorrect_guesses: outcome.incorrect_guesses,
            status: outcome.status,
            word,
        };
        self.send_to_user(other, event.clone()).await;
        self.send_to_user(user_id, event).await;
        Ok(outcome)
    }

    /// Start a new round once the current one is over.
    pub async fn replay(&self, invite_id: Uuid, user_id: Uuid) -> Result<(), GameError> {
        let other = {
            let mut games = self.inner.games.write().await;
            let live = games.get_mut(&invite_id).ok_or(GameError::NoGame)?;
            if live.role_of(user_id).is_none() {
                return Err(GameError::NotPlayer);
            }
            let status = live.game.status();
            if !status.is_finished() {
                return Err(GameError::RoundInProgress);
            }
            live.game.reset();
            live.other(user_id)
        };

        for target in [user_id, other] {
            self.send_to_user(target, GatewayEvent::HangmanReplayStarted { invite_id }).await;
        }
        Ok(())
    }

    /// Drop the round and tell the opponent.
    pub async fn leave_game(&self, invite_id: Uuid, user_id: Uuid) -> Result<(), GameError> {
        let other = {
            let mut games = self.inner.games.write().await;
            let live = games.get(&invite_id).ok_or(GameError::NoGame)?;
            if live.role_of(user_id).is_none() {
                return Err(GameError::NotPlayer);
            }
            let other = live.other(user_id);
            games.remove(&invite_id);
            other
        };
        self.send_to_user(other, GatewayEvent::HangmanOpponentLeft { invite_id, user_id })
            .await;
        Ok(())
    }

    /// Forget a round without notifying anyone, e.g. when its invite is purged.
    pub async fn drop_game(&self, invite_id: Uuid) -> bool {
        self.inner.games.write().await.remove(&invite_id).is_some()
    }

    pub async fn has_game(&self, invite_id: Uuid) -> bool {
        self.inner.games.read().await.contains_key(&invite_id)
    }

    async fn abandon_games(&self, user_id: Uuid) {
        let abandoned: Vec<(Uuid, Uuid)> = {
            let mut games = self.inner.games.write().await;
            let ids: Vec<Uuid> = games
                .iter()
                .filter(|(_, live)| live.role_of(user_id).is_some())
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| games.remove(&id).map(|live| (id, live.other(user_id))))
                .collect()
        };
        for (invite_id, other) in abandoned {
            self.send_to_user(other, GatewayEvent::HangmanOpponentLeft { invite_id, user_id })
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quartier_types::hangman::GameStatus;
    use quartier_types::models::{InviteStatus, UserSummary};

    fn summary(id: Uuid) -> UserSummary {
        UserSummary {
            id,
            firstname: "A".into(),
            lastname: "B".into(),
            profile_picture: String::new(),
        }
    }

    fn accepted_invite(sender: Uuid, recipient: Uuid, guesser: Uuid) -> HangmanInvite {
        HangmanInvite {
            id: Uuid::new_v4(),
            sender: summary(sender),
            recipient: summary(recipient),
            status: InviteStatus::Accepted,
            guesser_id: Some(guesser),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn room_events_carry_their_room() {
        let dispatcher = Dispatcher::new();
        let mut rx = dispatcher.subscribe();
        dispatcher.broadcast(&GatewayEvent::PresenceUpdate { user_id: Uuid::nil(), online: true });
        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.room, None);
        assert!(envelope.json.contains("PresenceUpdate"));
    }

    #[tokio::test]
    async fn newer_connection_owns_the_user() {
        let dispatcher = Dispatcher::new();
        let user = Uuid::new_v4();
        let (old_conn, _old_rx) = dispatcher.register_user_channel(user).await;
        let (_new_conn, mut new_rx) = dispatcher.register_user_channel(user).await;
        dispatcher.user_online(user).await;

        dispatcher.user_offline(user, old_conn).await;
        assert!(dispatcher.online_users().await.contains(&user));

        dispatcher.send_to_user(user, GatewayEvent::Error { message: "x".into() }).await;
        assert!(matches!(new_rx.recv().await, Some(GatewayEvent::Error { .. })));
    }

    #[tokio::test]
    async fn full_round_over_the_dispatcher() {
        let dispatcher = Dispatcher::new();
        let giver = Uuid::new_v4();
        let guesser = Uuid::new_v4();
        let (_, mut giver_rx) = dispatcher.register_user_channel(giver).await;
        let (_, mut guesser_rx) = dispatcher.register_user_channel(guesser).await;
        let invite = accepted_invite(giver, guesser, guesser);

        dispatcher.start_game(invite.id, giver, guesser).await;
        assert!(matches!(
            guesser_rx.recv().await,
            Some(GatewayEvent::HangmanGameStarted { role: HangmanRole::Guesser, .. })
        ));
        assert!(matches!(
            giver_rx.recv().await,
            Some(GatewayEvent::HangmanGameStarted { role: HangmanRole::Giver, .. })
        ));

        assert_eq!(
            dispatcher.submit_word(invite.id, guesser, "chat").await,
            Err(GameError::WrongRole(HangmanRole::Giver))
        );
        let submitted = dispatcher.submit_word(invite.id, giver, "Chat").await.unwrap();
        assert_eq!(submitted.masked, "____");
        match guesser_rx.recv().await {
            Some(GatewayEvent::HangmanWordSubmitted { length, masked, .. }) => {
                assert_eq!(length, 4);
                assert_eq!(masked, "____");
            }
            other => panic!("unexpected {:?}", other),
        }

        assert_eq!(
            dispatcher.guess(invite.id, giver, "c").await,
            Err(GameError::WrongRole(HangmanRole::Guesser))
        );
        assert_eq!(dispatcher.replay(invite.id, giver).await, Err(GameError::RoundInProgress));
        for letter in ["c", "h", "a"] {
            dispatcher.guess(invite.id, guesser, letter).await.unwrap();
        }
        let last = dispatcher.guess(invite.id, guesser, "t").await.unwrap();
        assert_eq!(last.status, GameStatus::Won);

        dispatcher.replay(invite.id, giver).await.unwrap();
        dispatcher.leave_game(invite.id, guesser).await.unwrap();
        assert!(!dispatcher.has_game(invite.id).await);
    }

    #[tokio::test]
    async fn join_rebuilds_a_missing_game() {
        let dispatcher = Dispatcher::new();
        let sender = Uuid::new_v4();
        let recipient = Uuid::new_v4();
        let invite = accepted_invite(sender, recipient, sender);

        assert_eq!(dispatcher.join_game(&invite, Uuid::new_v4()).await, Err(GameError::NotPlayer));
        assert_eq!(dispatcher.join_game(&invite, recipient).await, Ok(HangmanRole::Giver));
        assert!(dispatcher.has_game(invite.id).await);
        assert_eq!(dispatcher.join_game(&invite, sender).await, Ok(HangmanRole::Guesser));
    }

    #[tokio::test]
    async fn disconnect_abandons_games() {
        let dispatcher = Dispatcher::new();
        let giver = Uuid::new_v4();
        let guesser = Uuid::new_v4();
        let (giver_conn, _giver_rx) = dispatcher.register_user_channel(giver).await;
        let (_, mut guesser_rx) = dispatcher.register_user_channel(guesser).await;
        let invite_id = Uuid::new_v4();
        dispatcher.start_game(invite_id, giver, guesser).await;
        let _ = guesser_rx.recv().await;

        dispatcher.user_offline(giver, giver_conn).await;
        assert!(matches!(
            guesser_rx.recv().await,
            Some(GatewayEvent::HangmanOpponentLeft { user_id, .. }) if user_id == giver
        ));
        assert!(!dispatcher.has_game(invite_id).await);
    }
}
