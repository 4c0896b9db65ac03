//! Request and response bodies for the REST API. Everything is camelCase on
//! the wire.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{
    CompletionStatus, HangmanRole, InviteStatus, NewsStatus, PollType, ReportStatus, Role, User,
    UserSummary,
};
use crate::rules::Paging;

// -- Common --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub last_page: u64,
}

impl<T> Page<T> {
    pub fn new(data: Vec<T>, total: u64, paging: Paging) -> Self {
        Self {
            data,
            total,
            page: paging.page,
            last_page: paging.last_page(total),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub deleted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeResponse {
    pub liked: bool,
    pub total_likes: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadedUrls {
    pub urls: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub password: String,
    pub date_of_birth: NaiveDate,
    pub address: Option<String>,
    pub iris_code: Option<String>,
    pub iris_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUserRequest {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub role: Option<Role>,
}

/// Postal address used both to resolve an iris and to move a user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressRequest {
    pub street: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub user: User,
    pub badges: Vec<OwnedBadge>,
    pub participating_events: Vec<Event>,
    pub challenges: Vec<Challenge>,
    pub market_items: Vec<MarketItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_friend: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_sent: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_received: Option<bool>,
}

// -- Permissions --

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub code: String,
    pub description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictRequest {
    pub user_id: Uuid,
    pub reason: String,
    pub days: Option<u32>,
    pub hours: Option<u32>,
    pub minutes: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Restriction {
    pub id: Uuid,
    pub user_id: Uuid,
    pub permission_code: String,
    pub reason: String,
    pub restricted_by: Uuid,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestrictionStatus {
    pub code: String,
    pub restricted: bool,
    pub expires_at: Option<DateTime<Utc>>,
}

// -- Posts and flash posts --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub author: UserSummary,
    pub iris_code: String,
    pub iris_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set for flash posts only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct PostRequest {
    pub title: String,
    pub description: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

// -- News and comments --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct News {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub author: UserSummary,
    pub tags: Vec<String>,
    pub images: Vec<String>,
    pub published: bool,
    pub status: NewsStatus,
    pub rejection_reason: Option<String>,
    pub likes_count: i64,
    pub iris_code: String,
    pub iris_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateNewsRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default = "default_true")]
    pub published: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateNewsRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
    pub images: Option<Vec<String>>,
    pub published: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateNewsRequest {
    pub validated: bool,
    pub rejected_reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikesSummary {
    pub total_likes: i64,
    pub liked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: Uuid,
    pub news_id: Uuid,
    pub content: String,
    pub author: UserSummary,
    pub iris_code: String,
    pub likes_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub content: String,
}

// -- Events --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub place: String,
    pub max_participants: Option<u32>,
    pub participants: Vec<UserSummary>,
    pub author: UserSummary,
    pub iris_code: String,
    pub iris_name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub place: String,
    pub max_participants: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEventRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub place: Option<String>,
    pub max_participants: Option<u32>,
}

// -- Challenges --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub success_criteria: String,
    pub author: UserSummary,
    pub iris_code: String,
    pub iris_name: String,
    pub registrations_count: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeDetail {
    #[serde(flatten)]
    pub challenge: Challenge,
    pub registrations: Vec<UserSummary>,
    pub completions: Vec<ChallengeCompletion>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeCompletion {
    pub id: Uuid,
    pub challenge_id: Uuid,
    pub user: UserSummary,
    pub text: Option<String>,
    pub image_url: Option<String>,
    pub status: CompletionStatus,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub title: String,
    pub description: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub success_criteria: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateChallengeRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub success_criteria: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteChallengeRequest {
    pub text: Option<String>,
    pub image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCompletionRequest {
    pub validated: bool,
    pub rejection_reason: Option<String>,
}

// -- Polls --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: Uuid,
    pub question: String,
    #[serde(rename = "type")]
    pub poll_type: PollType,
    pub max_selections: Option<u32>,
    pub closes_at: Option<DateTime<Utc>>,
    pub closed: bool,
    pub author: UserSummary,
    pub iris_code: String,
    pub options: Vec<PollOption>,
    pub total_voters: i64,
    pub has_voted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub id: Uuid,
    pub label: String,
    pub votes_count: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub question: String,
    #[serde(rename = "type")]
    pub poll_type: PollType,
    pub options: Vec<String>,
    pub max_selections: Option<u32>,
    /// Hours until the poll closes by itself
    pub auto_close_in: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteRequest {
    pub selected_options_ids: Vec<Uuid>,
}

// -- Market --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketItem {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub price: Option<f64>,
    pub images: Vec<String>,
    pub contact_email: String,
    pub contact_phone: Option<String>,
    pub author: UserSummary,
    pub iris_code: String,
    pub iris_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketItemRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub price: Option<f64>,
    #[serde(default)]
    pub images: Vec<String>,
    pub contact_email: String,
    pub contact_phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMarketItemRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub images: Option<Vec<String>>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
}

// -- Gallery --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GalleryItem {
    pub id: Uuid,
    pub url: String,
    pub description: Option<String>,
    pub author: UserSummary,
    pub likes_count: i64,
    pub liked: bool,
    pub iris_code: String,
    pub created_at: DateTime<Utc>,
}

// -- Iris --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CitiesQuery {
    pub postal_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IrisResolution {
    pub iris_code: String,
    pub iris_name: String,
}

// -- Shop --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub id: Uuid,
    pub name: String,
    pub image_url: String,
    pub cost: i64,
    pub available: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShopBadge {
    #[serde(flatten)]
    pub badge: Badge,
    pub owned: bool,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnedBadge {
    pub badge: Badge,
    pub acquired_at: DateTime<Utc>,
}

// -- Reports --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: Uuid,
    pub reporter: UserSummary,
    pub reported_user: UserSummary,
    pub reason: String,
    pub content_id: Option<String>,
    pub content_type: Option<String>,
    pub description: Option<String>,
    pub status: ReportStatus,
    pub treated_by: Option<Uuid>,
    pub iris_code: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReportRequest {
    pub reported_user_id: Uuid,
    pub reason: String,
    pub content_id: Option<String>,
    pub content_type: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateReportStatusRequest {
    pub status: ReportStatus,
}

// -- Chat --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub room: String,
    pub author: UserSummary,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatGroup {
    pub id: Uuid,
    pub name: String,
    pub room: String,
    pub created_by: Uuid,
    pub members: Vec<UserSummary>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub name: String,
    #[serde(default)]
    pub member_ids: Vec<Uuid>,
}

// -- Hangman --

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HangmanWord {
    pub word: String,
    pub difficulty: u8,
}

#[derive(Debug, Deserialize)]
pub struct RandomWordQuery {
    pub difficulty: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct AddWordRequest {
    pub word: String,
    pub difficulty: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWordRequest {
    pub old_word: String,
    pub new_word: Option<String>,
    pub difficulty: Option<u8>,
}

#[derive(Debug, Deserialize)]
pub struct DeleteWordRequest {
    pub word: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HangmanInvite {
    pub id: Uuid,
    pub sender: UserSummary,
    pub recipient: UserSummary,
    pub status: InviteStatus,
    pub guesser_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl HangmanInvite {
    pub fn involves(&self, user_id: Uuid) -> bool {
        self.sender.id == user_id || self.recipient.id == user_id
    }

    pub fn other_player(&self, user_id: Uuid) -> Uuid {
        if self.sender.id == user_id { self.recipient.id } else { self.sender.id }
    }

    /// Role of `user_id` once the invite was accepted.
    pub fn role_of(&self, user_id: Uuid) -> Option<HangmanRole> {
        let guesser = self.guesser_id?;
        if !self.involves(user_id) {
            return None;
        }
        Some(if guesser == user_id { HangmanRole::Guesser } else { HangmanRole::Giver })
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum InviteAnswer {
    GameStarted { invite_id: Uuid, role: HangmanRole },
    Declined,
}

#[derive(Debug, Deserialize)]
pub struct SubmitWordRequest {
    pub word: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WordSubmitted {
    pub invite_id: Uuid,
    pub length: usize,
    pub masked: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> UserSummary {
        UserSummary {
            id: Uuid::new_v4(),
            firstname: "Ana".into(),
            lastname: "Roux".into(),
            profile_picture: crate::models::DEFAULT_PROFILE_PICTURE.into(),
        }
    }

    #[test]
    fn page_reports_last_page() {
        let paging = crate::rules::PageQuery { page: Some(2), limit: Some(5) }.resolve(10);
        let page = Page::new(vec![1, 2, 3], 13, paging);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["lastPage"], 3);
        assert_eq!(json["page"], 2);
        assert_eq!(json["total"], 13);
    }

    #[test]
    fn invite_answer_shape() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(InviteAnswer::GameStarted {
            invite_id: id,
            role: HangmanRole::Giver,
        })
        .unwrap();
        assert_eq!(json["status"], "game_started");
        assert_eq!(json["inviteId"], id.to_string());
        assert_eq!(json["role"], "giver");

        let json = serde_json::to_value(InviteAnswer::Declined).unwrap();
        assert_eq!(json, serde_json::json!({"status": "declined"}));
    }

    #[test]
    fn invite_roles() {
        let sender = summary();
        let recipient = summary();
        let mut invite = HangmanInvite {
            id: Uuid::new_v4(),
            sender: sender.clone(),
            recipient: recipient.clone(),
            status: InviteStatus::Pending,
            guesser_id: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert_eq!(invite.role_of(sender.id), None);

        invite.guesser_id = Some(recipient.id);
        assert_eq!(invite.role_of(sender.id), Some(HangmanRole::Giver));
        assert_eq!(invite.role_of(recipient.id), Some(HangmanRole::Guesser));
        assert_eq!(invite.role_of(Uuid::new_v4()), None);
        assert_eq!(invite.other_player(sender.id), recipient.id);
    }

    #[test]
    fn poll_request_reads_type() {
        let req: CreatePollRequest = serde_json::from_str(
            r#"{"question":"q","type":"limited","options":["a","b","c"],"maxSelections":2,"autoCloseIn":24}"#,
        )
        .unwrap();
        assert_eq!(req.poll_type, PollType::Limited);
        assert_eq!(req.max_selections, Some(2));
        assert_eq!(req.auto_close_in, Some(24));
    }
}
