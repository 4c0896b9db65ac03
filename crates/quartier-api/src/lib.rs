//! REST surface: handlers per feature, the auth layer and [`router`].

pub mod auth;
pub mod challenges;
pub mod chat;
pub mod cleanup;
pub mod error;
pub mod events;
pub mod files;
pub mod gallery;
pub mod gateway;
pub mod guards;
pub mod hangman;
pub mod iris;
pub mod market;
pub mod middleware;
pub mod news;
pub mod permissions;
pub mod polls;
pub mod posts;
pub mod reports;
pub mod shop;
pub mod state;
pub mod users;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{delete, get, patch, post},
};

pub use state::{AppState, AppStateInner};

/// Multipart bodies may carry several images.
const MAX_BODY_SIZE: usize = 10 * files::MAX_IMAGE_SIZE;

/// Every route of the API. Static files and transport layers (CORS, tracing)
/// are added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(gateway::health))
        .route("/gateway", get(gateway::ws_upgrade))
        .route("/users", post(users::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/refresh", post(auth::refresh))
        .route("/auth/logout", post(auth::logout))
        .route("/iris/cities", get(iris::cities))
        .route("/iris/resolve", post(iris::resolve));

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        // Users
        .route("/users", get(users::list_users))
        .route("/users/search", get(users::search_users))
        .route("/users/me/profile-picture", post(users::upload_profile_picture))
        .route("/users/me/address", patch(users::update_address))
        .route("/users/me/staff", get(users::staff))
        .route(
            "/users/{id}",
            get(users::get_user).patch(users::update_user).delete(users::delete_user),
        )
        .route("/users/{id}/profile", get(users::profile))
        .route("/users/{id}/friends", get(users::list_friends))
        .route("/users/{id}/friend-request", post(users::send_friend_request))
        .route("/users/{id}/accept-friend", post(users::accept_friend))
        .route("/users/{id}/reject-friend", delete(users::reject_friend))
        .route("/users/{id}/remove-friend", delete(users::remove_friend))
        // Permissions
        .route("/permissions", get(permissions::list_permissions))
        .route("/permissions/{code}/restrict", post(permissions::restrict))
        .route("/permissions/{code}/restrict/{user_id}", delete(permissions::unrestrict))
        .route("/permissions/{code}/isRestricted", get(permissions::is_restricted))
        // Posts
        .route("/posts", get(posts::list_posts).post(posts::create_post))
        .route(
            "/posts/{id}",
            get(posts::get_post).patch(posts::update_post).delete(posts::delete_post),
        )
        .route("/flashposts", get(posts::list_flash_posts).post(posts::create_flash_post))
        .route(
            "/flashposts/{id}",
            get(posts::get_flash_post)
                .patch(posts::update_flash_post)
                .delete(posts::delete_flash_post),
        )
        // News
        .route("/news", get(news::list_news).post(news::create_news))
        .route("/news/upload-images", post(news::upload_images))
        .route(
            "/news/{id}",
            get(news::get_news).patch(news::update_news).delete(news::delete_news),
        )
        .route("/news/{id}/like", post(news::toggle_like))
        .route("/news/{id}/likes", get(news::likes))
        .route("/news/{id}/validate", patch(news::validate_news))
        .route("/news/{id}/comments", get(news::list_comments).post(news::create_comment))
        .route(
            "/news/{id}/comments/{comment_id}",
            patch(news::update_comment).delete(news::delete_comment),
        )
        .route("/news/{id}/comments/{comment_id}/like", post(news::toggle_comment_like))
        // Events
        .route("/events", get(events::list_events).post(events::create_event))
        .route(
            "/events/{id}",
            get(events::get_event).patch(events::update_event).delete(events::delete_event),
        )
        .route("/events/{id}/register", post(events::register).delete(events::unregister))
        // Challenges
        .route("/challenges", get(challenges::list_challenges).post(challenges::create_challenge))
        .route(
            "/challenges/{id}",
            get(challenges::get_challenge)
                .patch(challenges::update_challenge)
                .delete(challenges::delete_challenge),
        )
        .route(
            "/challenges/{id}/subscribe",
            post(challenges::subscribe).delete(challenges::unsubscribe),
        )
        .route("/challenges/{id}/complete", post(challenges::complete))
        .route("/challenges/{id}/complete/{completion_id}", patch(challenges::review_completion))
        // Polls
        .route("/polls", get(polls::list_polls).post(polls::create_poll))
        .route("/polls/{id}", get(polls::get_poll).delete(polls::delete_poll))
        .route("/polls/{id}/vote", post(polls::vote))
        .route("/polls/{id}/close", post(polls::close_poll))
        // Market
        .route("/market", get(market::list_items).post(market::create_item))
        .route("/market/upload-images", post(market::upload_images))
        .route(
            "/market/{id}",
            get(market::get_item).patch(market::update_item).delete(market::delete_item),
        )
        // Gallery
        .route("/gallery", get(gallery::list_gallery).post(gallery::create_item))
        .route("/gallery/{id}", get(gallery::get_item).delete(gallery::delete_item))
        .route("/gallery/{id}/like", post(gallery::toggle_like))
        // Shop
        .route("/shop/badges", get(shop::list_badges).post(shop::create_badge))
        .route("/shop/badges/{id}", delete(shop::delete_badge))
        .route("/shop/user-badges", get(shop::user_badges))
        .route("/shop/buy/{id}", post(shop::buy_badge))
        // Reports
        .route("/reports", get(reports::list_reports).post(reports::create_report))
        .route("/reports/{id}", get(reports::get_report).delete(reports::delete_report))
        .route("/reports/{id}/status", patch(reports::update_status))
        // Chat
        .route("/chat/messages/{room}", get(chat::list_messages))
        .route("/chat/groups", get(chat::list_groups).post(chat::create_group))
        .route("/chat/groups/{id}/leave", delete(chat::leave_group))
        // Hangman
        .route("/hangman/words", get(hangman::list_words))
        .route("/hangman/words/random", get(hangman::random_word))
        .route("/hangman/add-word", post(hangman::add_word))
        .route("/hangman/update-word", patch(hangman::update_word))
        .route("/hangman/delete-word", delete(hangman::delete_word))
        .route("/hangman/invite/send/{id}", post(hangman::send_invite))
        .route("/hangman/invite/pending", get(hangman::pending_invites))
        .route("/hangman/invite/{id}", get(hangman::get_invite))
        .route("/hangman/invite/{id}/cancel", patch(hangman::cancel_invite))
        .route("/hangman/invite/{id}/word", patch(hangman::submit_word))
        .route("/hangman/invite/{id}/{answer}", post(hangman::answer_invite))
        .layer(from_fn_with_state(state.clone(), middleware::require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode, header};
    use chrono::{Duration, NaiveDate, Utc};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use uuid::Uuid;

    use quartier_db::Database;
    use quartier_db::models::NewUser;
    use quartier_db::queries::challenges::NewChallenge;
    use quartier_gateway::Dispatcher;
    use quartier_types::events::GatewayEvent;
    use quartier_types::models::{Role, User};
    use quartier_types::rules::CHALLENGE_COMPLETION_POINTS;

    use super::*;
    use crate::files::Uploads;
    use crate::iris::IrisService;

    const SECRET: &str = "router-test-secret";

    fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            dispatcher: Dispatcher::new(),
            jwt_secret: SECRET.into(),
            uploads: Uploads::new(std::env::temp_dir().join(format!("quartier-test-{}", Uuid::new_v4()))),
            iris: IrisService::new("http://127.0.0.1:9", "http://127.0.0.1:9", None),
            admin_email: Some("mayor@example.com".into()),
        })
    }

    fn user(state: &AppState, email: &str, role: Role) -> (User, String) {
        let user = state
            .db
            .create_user(&NewUser {
                firstname: "Jules",
                lastname: "Moreau",
                email,
                password_hash: "unused",
                date_of_birth: NaiveDate::from_ymd_opt(1992, 7, 14).unwrap(),
                role,
                address: None,
                iris_code: "751010101",
                iris_name: "Saint-Germain",
            })
            .unwrap();
        let token = auth::create_access_token(SECRET, &user).unwrap();
        (user, token)
    }

    async fn call(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = router(test_state());
        let (status, body) = call(&app, Method::GET, "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }

    #[tokio::test]
    async fn protected_routes_need_a_bearer_token() {
        let app = router(test_state());
        let (status, body) = call(&app, Method::GET, "/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], 401);

        let (status, _) = call(&app, Method::GET, "/auth/me", Some("garbage"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_login_and_refresh() {
        let app = router(test_state());
        let registration = json!({
            "firstname": "Camille",
            "lastname": "Durand",
            "email": "Mayor@Example.com",
            "password": "longenough",
            "dateOfBirth": "1985-02-01",
            "irisCode": "751010101",
            "irisName": "Saint-Germain"
        });
        let (status, created) = call(&app, Method::POST, "/users", None, Some(registration.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["role"], "admin");

        let (status, _) = call(&app, Method::POST, "/users", None, Some(registration)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = call(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "mayor@example.com", "password": "wrong-password" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Email or password incorrect");

        let (status, tokens) = call(
            &app,
            Method::POST,
            "/auth/login",
            None,
            Some(json!({ "email": "mayor@example.com", "password": "longenough" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let access = tokens["accessToken"].as_str().unwrap();
        let refresh = tokens["refreshToken"].as_str().unwrap().to_string();

        let (status, me) = call(&app, Method::GET, "/auth/me", Some(access), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(me["id"], created["id"]);

        let (status, _) = call(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refreshToken": refresh }))).await;
        assert_eq!(status, StatusCode::OK);
        // The old token was rotated away
        let (status, _) = call(&app, Method::POST, "/auth/refresh", None, Some(json!({ "refreshToken": refresh }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn registration_requires_an_iris() {
        let app = router(test_state());
        let (status, _) = call(
            &app,
            Method::POST,
            "/users",
            None,
            Some(json!({
                "firstname": "Camille",
                "lastname": "Durand",
                "email": "camille@example.com",
                "password": "longenough",
                "dateOfBirth": "1985-02-01"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn hangman_invite_flow() {
        let state = test_state();
        let app = router(state.clone());
        let (alice, alice_token) = user(&state, "alice@example.com", Role::User);
        let (bob, bob_token) = user(&state, "bob@example.com", Role::User);

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/hangman/invite/send/{}", alice.id),
            Some(&alice_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, invite) = call(
            &app,
            Method::POST,
            &format!("/hangman/invite/send/{}", bob.id),
            Some(&alice_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let invite_id = invite["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            Method::POST,
            &format!("/hangman/invite/send/{}", bob.id),
            Some(&alice_token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        // Only the recipient answers
        let accept = format!("/hangman/invite/{}/accepted", invite_id);
        let (status, _) = call(&app, Method::POST, &accept, Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, answer) = call(&app, Method::POST, &accept, Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(answer["status"], "game_started");

        let giver_token = if answer["role"] == "giver" { &bob_token } else { &alice_token };
        let guesser_token = if answer["role"] == "giver" { &alice_token } else { &bob_token };
        let word = format!("/hangman/invite/{}/word", invite_id);

        let (status, _) = call(&app, Method::PATCH, &word, Some(guesser_token), Some(json!({ "word": "maison" }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, submitted) =
            call(&app, Method::PATCH, &word, Some(giver_token), Some(json!({ "word": "Forêt" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(submitted["length"], 5);
        assert_eq!(submitted["masked"], "_____");

        // Accepted invites can no longer be answered or cancelled
        let (status, _) = call(&app, Method::POST, &accept, Some(&bob_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let cancel = format!("/hangman/invite/{}/cancel", invite_id);
        let (status, _) = call(&app, Method::PATCH, &cancel, Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn hangman_dictionary_is_admin_only() {
        let state = test_state();
        let app = router(state.clone());
        let (_, user_token) = user(&state, "user@example.com", Role::User);
        let (_, admin_token) = user(&state, "admin@example.com", Role::Admin);
        let body = json!({ "word": "Château", "difficulty": 2 });

        let (status, _) = call(&app, Method::POST, "/hangman/add-word", Some(&user_token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, added) = call(&app, Method::POST, "/hangman/add-word", Some(&admin_token), Some(body.clone())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(added["word"], "chateau");

        let (status, _) = call(&app, Method::POST, "/hangman/add-word", Some(&admin_token), Some(body)).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = call(
            &app,
            Method::PATCH,
            "/hangman/update-word",
            Some(&admin_token),
            Some(json!({ "oldWord": "chateau" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::DELETE,
            "/hangman/delete-word",
            Some(&admin_token),
            Some(json!({ "word": "chateau" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_rooms_check_access() {
        let state = test_state();
        let app = router(state.clone());
        let (alice, alice_token) = user(&state, "alice@example.com", Role::User);
        let (bob, _) = user(&state, "bob@example.com", Role::User);
        let (carol, carol_token) = user(&state, "carol@example.com", Role::User);

        let (status, messages) = call(&app, Method::GET, "/chat/messages/general", Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(messages, json!([]));

        let private = quartier_types::rooms::Room::private(alice.id, bob.id).to_string();
        let uri = format!("/chat/messages/{}", private);
        let (status, _) = call(&app, Method::GET, &uri, Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, &uri, Some(&carol_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = call(&app, Method::GET, "/chat/messages/lobby", Some(&alice_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(
            &app,
            Method::POST,
            "/chat/groups",
            Some(&alice_token),
            Some(json!({ "name": "Voisins", "memberIds": [Uuid::new_v4()] })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, group) = call(
            &app,
            Method::POST,
            "/chat/groups",
            Some(&alice_token),
            Some(json!({ "name": "Voisins", "memberIds": [carol.id] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(group["members"].as_array().unwrap().len(), 2);

        let group_id = group["id"].as_str().unwrap();
        let leave = format!("/chat/groups/{}/leave", group_id);
        let (_, mut carol_rx) = state.dispatcher.register_user_channel(carol.id).await;
        let (status, body) = call(&app, Method::DELETE, &leave, Some(&carol_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], false);
        match carol_rx.recv().await {
            Some(GatewayEvent::RoomLeft { room }) => assert_eq!(room, format!("group-{}", group_id)),
            other => panic!("expected RoomLeft, got {:?}", other),
        }
        let (status, _) = call(&app, Method::DELETE, &leave, Some(&carol_token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (_, body) = call(&app, Method::DELETE, &leave, Some(&alice_token), None).await;
        assert_eq!(body["deleted"], true);
    }

    #[tokio::test]
    async fn shop_rejects_unknown_badges() {
        let state = test_state();
        let app = router(state.clone());
        let (_, token) = user(&state, "shopper@example.com", Role::User);

        let (status, badges) = call(&app, Method::GET, "/shop/badges", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(badges.is_array());

        let uri = format!("/shop/buy/{}", Uuid::new_v4());
        let (status, _) = call(&app, Method::POST, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn reports_are_staff_only() {
        let state = test_state();
        let app = router(state.clone());
        let (_, reporter_token) = user(&state, "reporter@example.com", Role::User);
        let (target, _) = user(&state, "target@example.com", Role::User);
        let (_, moderator_token) = user(&state, "mod@example.com", Role::Moderator);

        let (status, report) = call(
            &app,
            Method::POST,
            "/reports",
            Some(&reporter_token),
            Some(json!({ "reportedUserId": target.id, "reason": "Spam" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(report["status"], "PENDING");

        let (status, _) = call(&app, Method::GET, "/reports", Some(&reporter_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, page) = call(&app, Method::GET, "/reports", Some(&moderator_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["total"], 1);

        let (status, _) = call(
            &app,
            Method::POST,
            "/reports",
            Some(&reporter_token),
            Some(json!({ "reportedUserId": Uuid::new_v4(), "reason": "Spam" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn huge_pages_leave_the_database_usable() {
        let state = test_state();
        let app = router(state.clone());
        let (_, token) = user(&state, "reader@example.com", Role::User);

        let (status, page) = call(&app, Method::GET, "/posts?page=50000000&limit=100", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["data"], json!([]));

        let (status, _) = call(&app, Method::GET, "/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn restricted_users_cannot_publish() {
        let state = test_state();
        let app = router(state.clone());
        let (writer, writer_token) = user(&state, "writer@example.com", Role::User);
        let (_, moderator_token) = user(&state, "mod@example.com", Role::Moderator);
        let post = json!({ "title": "Vide-grenier", "description": "Dimanche place du marché" });

        let (status, _) = call(
            &app,
            Method::POST,
            "/permissions/publish_post/restrict",
            Some(&moderator_token),
            Some(json!({ "userId": writer.id, "reason": "Spam", "hours": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(&app, Method::POST, "/posts", Some(&writer_token), Some(post.clone())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "You are banned from performing this action (publish_post)");

        let lift = format!("/permissions/publish_post/restrict/{}", writer.id);
        let (status, _) = call(&app, Method::DELETE, &lift, Some(&moderator_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::POST, "/posts", Some(&writer_token), Some(post)).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    #[tokio::test]
    async fn poll_votes_follow_the_ballot_rules() {
        let state = test_state();
        let app = router(state.clone());
        let (_, voter_token) = user(&state, "voter@example.com", Role::User);
        let (_, moderator_token) = user(&state, "mod@example.com", Role::Moderator);

        let (status, poll) = call(
            &app,
            Method::POST,
            "/polls",
            Some(&voter_token),
            Some(json!({ "question": "Un marché le samedi ?", "type": "single", "options": ["Oui", "Non"] })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let vote = format!("/polls/{}/vote", poll["id"].as_str().unwrap());
        let yes = poll["options"][0]["id"].clone();
        let no = poll["options"][1]["id"].clone();

        let (status, _) = call(&app, Method::POST, &vote, Some(&moderator_token), Some(json!({ "selectedOptionsIds": [yes] }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let both = json!({ "selectedOptionsIds": [yes, no] });
        let (status, body) = call(&app, Method::POST, &vote, Some(&voter_token), Some(both)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Single response required.");

        let (status, voted) = call(&app, Method::POST, &vote, Some(&voter_token), Some(json!({ "selectedOptionsIds": [yes] }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(voted["hasVoted"], true);
        assert_eq!(voted["totalVoters"], 1);

        let (status, _) = call(&app, Method::POST, &vote, Some(&voter_token), Some(json!({ "selectedOptionsIds": [no] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn completions_are_reviewed_once() {
        let state = test_state();
        let app = router(state.clone());
        let (author, author_token) = user(&state, "author@example.com", Role::User);
        let (_, moderator_token) = user(&state, "mod@example.com", Role::Moderator);

        let now = Utc::now();
        let challenge = state
            .db
            .create_challenge(
                &author,
                &NewChallenge {
                    title: "Compost",
                    description: "Un bac par immeuble",
                    start_date: now - Duration::days(1),
                    end_date: now + Duration::days(7),
                    success_criteria: "Photo du bac",
                },
            )
            .unwrap();
        state.db.subscribe_to_challenge(challenge.id, author.id, now).unwrap();
        let completion = state
            .db
            .create_completion(challenge.id, author.id, Some("fait"), None)
            .unwrap()
            .unwrap();
        let review = format!("/challenges/{}/complete/{}", challenge.id, completion.id);

        let (status, _) = call(&app, Method::PATCH, &review, Some(&author_token), Some(json!({ "validated": true }))).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = call(&app, Method::PATCH, &review, Some(&moderator_token), Some(json!({ "validated": true }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "VALIDATED");

        let (status, _) = call(
            &app,
            Method::PATCH,
            &review,
            Some(&moderator_token),
            Some(json!({ "validated": false, "rejectionReason": "oups" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let points = state.db.get_user(author.id).unwrap().unwrap().points;
        assert_eq!(points, CHALLENGE_COMPLETION_POINTS);
    }
}
