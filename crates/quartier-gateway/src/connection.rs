use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use jsonwebtoken::{DecodingKey, Validation, decode};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use quartier_db::Database;
use quartier_types::api::{ChatMessage, HangmanInvite};
use quartier_types::events::{GatewayCommand, GatewayEvent};
use quartier_types::models::Claims;
use quartier_types::rooms::Room;

use crate::dispatcher::{Dispatcher, GameError};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

pub const MAX_MESSAGE_LEN: usize = 2000;

/// Everything a connection needs besides its socket.
#[derive(Clone)]
pub struct GatewayContext {
    pub dispatcher: Dispatcher,
    pub db: Arc<Database>,
    pub jwt_secret: String,
}

impl GatewayContext {
    /// Run blocking DB work off the async runtime.
    pub async fn run<F, T>(&self, f: F) -> anyhow::Result<T>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {}", e))?
    }
}

type Rooms = Arc<RwLock<HashSet<String>>>;

/// Decode an access token into its subject.
pub fn verify_token(token: &str, jwt_secret: &str) -> Option<Uuid> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims.sub)
}

/// Whether `user_id` may read and write in `room`.
pub fn can_access_room(db: &Database, room: &Room, user_id: Uuid) -> anyhow::Result<bool> {
    match (room.admits(user_id), room) {
        (Some(allowed), _) => Ok(allowed),
        (None, Room::Group(group_id)) => db.is_group_member(*group_id, user_id),
        (None, _) => Ok(false),
    }
}

/// Handle a single WebSocket connection. When the token was already checked
/// at the upgrade (`?token=`), `pre_authenticated` carries the user and the
/// Identify handshake is skipped.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext, pre_authenticated: Option<Uuid>) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match pre_authenticated {
        Some(id) => id,
        None => match wait_for_identify(&mut receiver, &ctx.jwt_secret).await {
            Some(id) => id,
            None => {
                warn!("WebSocket client failed to identify, closing");
                return;
            }
        },
    };

    let user = match ctx.run(move |db| db.get_user(user_id)).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            warn!("Gateway token for unknown user {}", user_id);
            return;
        }
        Err(e) => {
            warn!("Failed to load gateway user {}: {:#}", user_id, e);
            return;
        }
    };

    info!("{} ({}) connected to gateway", user.display_name(), user_id);

    let ready = GatewayEvent::Ready {
        user_id,
        firstname: user.firstname.clone(),
        lastname: user.lastname.clone(),
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, ctx, user_id).await;
    info!("{} ({}) disconnected from gateway", user.display_name(), user_id);
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    ctx: GatewayContext,
    user_id: Uuid,
) {
    let dispatcher = ctx.dispatcher.clone();
    let (conn_id, mut user_rx) = dispatcher.register_user_channel(user_id).await;

    let presence = GatewayEvent::PresenceList {
        online: dispatcher.online_users().await,
    };
    if send_event(&mut sender, &presence).await.is_err() {
        dispatcher.unregister_user_channel(user_id, conn_id).await;
        return;
    }

    dispatcher.user_online(user_id).await;

    let mut broadcast_rx = dispatcher.subscribe();

    let joined: Rooms = Arc::new(RwLock::new(HashSet::new()));
    let send_rooms = joined.clone();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!("Broadcast receiver lagged by {} messages", n);
                            continue;
                        }
                        Err(_) => break,
                    };

                    if let Some(room) = &msg.room {
                        let rooms = send_rooms.read().unwrap_or_else(PoisonError::into_inner);
                        if !rooms.contains(room) {
                            continue;
                        }
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                result = user_rx.recv() => {
                    let Some(event) = result else { break };
                    if let GatewayEvent::RoomLeft { room } = &event {
                        send_rooms.write().unwrap_or_else(PoisonError::into_inner).remove(room);
                    }
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let recv_ctx = ctx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&recv_ctx, user_id, cmd, &joined).await,
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    dispatcher.user_offline(user_id, conn_id).await;
}

async fn send_event(sender: &mut SplitSink<WebSocket, Message>, event: &GatewayEvent) -> Result<(), ()> {
    let text = serde_json::to_string(event).map_err(|e| warn!("Failed to serialize event: {}", e))?;
    sender.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn wait_for_identify(receiver: &mut SplitStream<WebSocket>, jwt_secret: &str) -> Option<Uuid> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) = serde_json::from_str::<GatewayCommand>(&text) {
                    return verify_token(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify).await.ok().flatten()
}

async fn handle_command(ctx: &GatewayContext, user_id: Uuid, cmd: GatewayCommand, joined: &Rooms) {
    let dispatcher = &ctx.dispatcher;
    let result = match cmd {
        GatewayCommand::Identify { .. } => Ok(()), // Already handled

        GatewayCommand::Join { room } => join_room(ctx, user_id, &room, joined).await,

        GatewayCommand::Leave { room } => {
            let removed = joined.write().unwrap_or_else(PoisonError::into_inner).remove(&room);
            if removed {
                dispatcher.send_to_user(user_id, GatewayEvent::RoomLeft { room }).await;
            }
            Ok(())
        }

        GatewayCommand::SendMessage { room, content } => send_message(ctx, user_id, room, &content, joined).await,

        GatewayCommand::HangmanJoin { invite_id } => match load_invite(ctx, invite_id).await {
            Ok(invite) => dispatcher.join_game(&invite, user_id).await.map(|_| ()).map_err(game_message),
            Err(message) => Err(message),
        },

        GatewayCommand::HangmanSubmitWord { invite_id, word } => dispatcher
            .submit_word(invite_id, user_id, &word)
            .await
            .map(|_| ())
            .map_err(game_message),

        GatewayCommand::HangmanGuess { invite_id, letter } => dispatcher
            .guess(invite_id, user_id, &letter)
            .await
            .map(|_| ())
            .map_err(game_message),

        GatewayCommand::HangmanReplay { invite_id } => {
            dispatcher.replay(invite_id, user_id).await.map_err(game_message)
        }

        GatewayCommand::HangmanLeave { invite_id } => {
            dispatcher.leave_game(invite_id, user_id).await.map_err(game_message)
        }
    };

    if let Err(message) = result {
        debug!("{} gateway command rejected: {}", user_id, message);
        dispatcher.send_to_user(user_id, GatewayEvent::Error { message }).await;
    }
}

async fn join_room(ctx: &GatewayContext, user_id: Uuid, raw: &str, joined: &Rooms) -> Result<(), String> {
    let room: Room = raw.parse()?;
    match ctx.run(move |db| can_access_room(db, &room, user_id)).await {
        Ok(true) => {}
        Ok(false) => return Err(format!("You cannot join {}", room)),
        Err(e) => {
            warn!("Room access check failed for {}: {:#}", room, e);
            return Err("Internal server error".into());
        }
    }

    let name = room.to_string();
    joined.write().unwrap_or_else(PoisonError::into_inner).insert(name.clone());
    trace!("{} joined {}", user_id, name);
    ctx.dispatcher.send_to_user(user_id, GatewayEvent::RoomJoined { room: name }).await;
    Ok(())
}

async fn send_message(
    ctx: &GatewayContext,
    user_id: Uuid,
    raw_room: String,
    content: &str,
    joined: &Rooms,
) -> Result<(), String> {
    let room: Room = raw_room.parse()?;
    let name = room.to_string();
    if !joined.read().unwrap_or_else(PoisonError::into_inner).contains(&name) {
        return Err(format!("Join {} before sending messages", name));
    }

    let content = content.trim().to_string();
    let len = content.chars().count();
    if len == 0 || len > MAX_MESSAGE_LEN {
        return Err(format!("Message must be 1 to {} characters", MAX_MESSAGE_LEN));
    }

    // Group membership can change while the room is joined
    enum Posted {
        Denied,
        Stored(ChatMessage),
    }
    let stored = ctx
        .run(move |db| {
            if !can_access_room(db, &room, user_id)? {
                return Ok(Posted::Denied);
            }
            Ok(Posted::Stored(db.insert_chat_message(&room.to_string(), user_id, &content)?))
        })
        .await
        .map_err(|e| {
            warn!("Failed to store chat message in {}: {:#}", name, e);
            "Internal server error".to_string()
        })?;

    match stored {
        Posted::Denied => {
            joined.write().unwrap_or_else(PoisonError::into_inner).remove(&name);
            ctx.dispatcher
                .send_to_user(user_id, GatewayEvent::RoomLeft { room: name.clone() })
                .await;
            Err(format!("You are no longer allowed in {}", name))
        }
        Posted::Stored(message) => {
            trace!("{} -> {}: {} chars", user_id, name, len);
            ctx.dispatcher.broadcast(&GatewayEvent::MessageCreate { message });
            Ok(())
        }
    }
}

async fn load_invite(ctx: &GatewayContext, invite_id: Uuid) -> Result<HangmanInvite, String> {
    match ctx.run(move |db| db.get_invite(invite_id)).await {
        Ok(Some(invite)) => Ok(invite),
        Ok(None) => Err("Invite not found".into()),
        Err(e) => {
            warn!("Failed to load invite {}: {:#}", invite_id, e);
            Err("Internal server error".into())
        }
    }
}

fn game_message(err: GameError) -> String {
    err.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
    use jsonwebtoken::{EncodingKey, Header, encode};
    use quartier_db::models::NewUser;
    use quartier_types::models::{Role, User};

    fn user(db: &Database, email: &str) -> User {
        db.create_user(&NewUser {
            firstname: "Lea",
            lastname: "Martin",
            email,
            password_hash: "x",
            date_of_birth: NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            role: Role::User,
            address: None,
            iris_code: "751010101",
            iris_name: "Halles",
        })
        .unwrap()
    }

    #[test]
    fn tokens_decode_to_their_subject() {
        let sub = Uuid::new_v4();
        let claims = Claims {
            sub,
            email: "a@b.fr".into(),
            role: Role::User,
            exp: (Utc::now() + ChronoDuration::minutes(5)).timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"secret")).unwrap();
        assert_eq!(verify_token(&token, "secret"), Some(sub));
        assert_eq!(verify_token(&token, "other"), None);
        assert_eq!(verify_token("garbage", "secret"), None);
    }

    #[test]
    fn room_access_follows_membership() {
        let db = Database::open_in_memory().unwrap();
        let a = user(&db, "a@quartier.fr");
        let b = user(&db, "b@quartier.fr");
        let c = user(&db, "c@quartier.fr");

        assert!(can_access_room(&db, &Room::General, c.id).unwrap());
        let private = Room::private(a.id, b.id);
        assert!(can_access_room(&db, &private, b.id).unwrap());
        assert!(!can_access_room(&db, &private, c.id).unwrap());

        let group = db.create_chat_group("Voisins", a.id, &[b.id]).unwrap();
        let room = Room::Group(group.id);
        assert!(can_access_room(&db, &room, b.id).unwrap());
        assert!(!can_access_room(&db, &room, c.id).unwrap());
    }

    #[tokio::test]
    async fn messages_require_a_joined_room() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let author = user(&db, "a@quartier.fr");
        let ctx = GatewayContext {
            dispatcher: Dispatcher::new(),
            db: db.clone(),
            jwt_secret: "secret".into(),
        };
        let joined: Rooms = Arc::new(RwLock::new(HashSet::new()));
        let mut rx = ctx.dispatcher.subscribe();

        assert!(send_message(&ctx, author.id, "general".into(), "salut", &joined).await.is_err());

        join_room(&ctx, author.id, "general", &joined).await.unwrap();
        assert!(send_message(&ctx, author.id, "general".into(), "   ", &joined).await.is_err());
        assert!(send_message(&ctx, author.id, "general".into(), &"x".repeat(2001), &joined).await.is_err());
        send_message(&ctx, author.id, "general".into(), "  salut  ", &joined).await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.room.as_deref(), Some("general"));
        let history = db.list_chat_messages("general", 10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "salut");
    }

    #[tokio::test]
    async fn former_group_members_cannot_post() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let a = user(&db, "a@quartier.fr");
        let b = user(&db, "b@quartier.fr");
        let ctx = GatewayContext {
            dispatcher: Dispatcher::new(),
            db: db.clone(),
            jwt_secret: "secret".into(),
        };
        let (_, mut b_rx) = ctx.dispatcher.register_user_channel(b.id).await;
        let group = db.create_chat_group("Voisins", a.id, &[b.id]).unwrap();
        let room = Room::Group(group.id).to_string();
        let joined: Rooms = Arc::new(RwLock::new(HashSet::new()));

        join_room(&ctx, b.id, &room, &joined).await.unwrap();
        assert!(matches!(b_rx.recv().await, Some(GatewayEvent::RoomJoined { .. })));
        send_message(&ctx, b.id, room.clone(), "bonjour", &joined).await.unwrap();

        db.leave_chat_group(group.id, b.id).unwrap();
        assert!(send_message(&ctx, b.id, room.clone(), "still here", &joined).await.is_err());
        assert!(!joined.read().unwrap().contains(&room));
        assert!(matches!(b_rx.recv().await, Some(GatewayEvent::RoomLeft { room: left }) if left == room));
        assert_eq!(db.list_chat_messages(&room, 10).unwrap().len(), 1);
    }
}
