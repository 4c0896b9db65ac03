//! Business rules that only look at values, never at storage.
//!
//! Handlers call these before touching the database so the same checks are
//! shared between REST and the gateway, and stay unit-testable.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::PollType;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("{0}")]
    Invalid(String),
}

fn invalid<T>(msg: impl Into<String>) -> Result<T, RuleError> {
    Err(RuleError::Invalid(msg.into()))
}

/// Points granted per poll option a user votes for.
pub const POLL_VOTE_POINTS: i64 = 1;

/// Points granted when a challenge completion is validated.
pub const CHALLENGE_COMPLETION_POINTS: i64 = 10;

/// Flash posts disappear after this long.
pub const FLASH_POST_LIFETIME: Duration = Duration::hours(24);

pub const MAX_PAGE_LIMIT: u32 = 100;

// -- Pagination --

#[derive(Debug, Default, Clone, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: u32,
    pub limit: u32,
}

impl PageQuery {
    pub fn resolve(&self, default_limit: u32) -> Paging {
        Paging {
            page: self.page.unwrap_or(1).max(1),
            limit: self.limit.unwrap_or(default_limit).clamp(1, MAX_PAGE_LIMIT),
        }
    }
}

impl Paging {
    /// Rows to skip before the requested page.
    pub fn offset(&self) -> i64 {
        (i64::from(self.page) - 1) * i64::from(self.limit)
    }

    pub fn last_page(&self, total: u64) -> u64 {
        total.div_ceil(self.limit as u64)
    }
}

// -- Text fields --

/// Trim `value` and require it to be non-empty and at most `max` characters.
pub fn require_text(field: &str, value: &str, max: usize) -> Result<String, RuleError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return invalid(format!("{} must not be empty", field));
    }
    if trimmed.chars().count() > max {
        return invalid(format!("{} must be at most {} characters", field, max));
    }
    Ok(trimmed.to_string())
}

/// Like [`require_text`] but absent or blank values become `None`.
pub fn optional_text(field: &str, value: Option<&str>, max: usize) -> Result<Option<String>, RuleError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => require_text(field, v, max).map(Some),
        None => Ok(None),
    }
}

pub fn validate_email(email: &str) -> Result<String, RuleError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if !valid {
        return invalid("email is not a valid address");
    }
    Ok(email)
}

pub fn validate_phone(phone: &str) -> Result<String, RuleError> {
    let phone = phone.trim();
    let digits = phone.chars().filter(|c| c.is_ascii_digit()).count();
    let allowed = phone
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '.' | '-' | '(' | ')'));
    if !allowed || !(6..=15).contains(&digits) {
        return invalid("contactPhone is not a valid phone number");
    }
    Ok(phone.to_string())
}

pub fn validate_password(password: &str) -> Result<(), RuleError> {
    if password.chars().count() < 8 {
        return invalid("password must be at least 8 characters");
    }
    Ok(())
}

pub fn validate_date_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), RuleError> {
    if end <= start {
        return invalid("endDate must be after startDate");
    }
    Ok(())
}

/// Reject lists that contain the same entry twice.
pub fn require_unique<T: Eq + std::hash::Hash>(field: &str, items: &[T]) -> Result<(), RuleError> {
    let mut seen = HashSet::with_capacity(items.len());
    if items.iter().all(|item| seen.insert(item)) {
        Ok(())
    } else {
        invalid(format!("{} must not contain duplicates", field))
    }
}

// -- Restrictions --

/// Compute when a restriction of the given duration ends.
pub fn restriction_expiry(
    now: DateTime<Utc>,
    days: Option<u32>,
    hours: Option<u32>,
    minutes: Option<u32>,
) -> Result<DateTime<Utc>, RuleError> {
    let days = days.unwrap_or(0);
    let hours = hours.unwrap_or(0);
    let minutes = minutes.unwrap_or(0);

    if hours > 23 {
        return invalid("hours must be between 0 and 23");
    }
    if minutes > 59 {
        return invalid("minutes must be between 0 and 59");
    }
    if days > 3650 {
        return invalid("days must be at most 3650");
    }

    let expires_at = now
        + Duration::days(days as i64)
        + Duration::hours(hours as i64)
        + Duration::minutes(minutes as i64);

    if expires_at <= now {
        return invalid("Duration must be positive.");
    }
    Ok(expires_at)
}

/// A restriction blocks only strictly before its expiry instant.
pub fn restriction_active(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expires_at > now
}

// -- Polls --

pub const MIN_POLL_OPTIONS: usize = 2;
pub const MAX_POLL_OPTIONS: usize = 10;

/// Validate a poll definition. Returns the trimmed option labels and the
/// effective selection cap (only kept for limited polls).
pub fn validate_new_poll(
    question: &str,
    options: &[String],
    poll_type: PollType,
    max_selections: Option<u32>,
) -> Result<(String, Vec<String>, Option<u32>), RuleError> {
    let question = require_text("question", question, 500)?;

    let labels: Vec<String> = options.iter().map(|o| o.trim().to_string()).collect();
    if labels.len() < MIN_POLL_OPTIONS || labels.len() > MAX_POLL_OPTIONS {
        return invalid(format!(
            "a poll needs between {} and {} options",
            MIN_POLL_OPTIONS, MAX_POLL_OPTIONS
        ));
    }
    if labels.iter().any(|l| l.is_empty()) {
        return invalid("options must not be empty");
    }
    if labels.iter().any(|l| l.chars().count() > 200) {
        return invalid("options must be at most 200 characters");
    }
    let lowered: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    require_unique("options", &lowered)?;

    let max_selections = match poll_type {
        PollType::Limited => {
            let max = match max_selections {
                Some(m) if m >= 1 => m,
                _ => return invalid("maxSelections required for LIMITED type."),
            };
            if max as usize > labels.len() - 1 {
                return invalid(
                    "The maximum number of answers cannot be greater than the number of options - 1.",
                );
            }
            Some(max)
        }
        PollType::Single | PollType::Multiple => None,
    };

    Ok((question, labels, max_selections))
}

/// Check the shape of a ballot against the poll type. Option membership is
/// checked by the caller, which knows the poll's options.
pub fn validate_ballot(
    poll_type: PollType,
    max_selections: Option<u32>,
    selected: &[Uuid],
) -> Result<(), RuleError> {
    if selected.is_empty() {
        return invalid("Select at least one option.");
    }
    if selected.len() > MAX_POLL_OPTIONS {
        return invalid(format!("At most {} options can be selected.", MAX_POLL_OPTIONS));
    }
    require_unique("selectedOptionsIds", selected)?;

    match poll_type {
        PollType::Single if selected.len() != 1 => invalid("Single response required."),
        PollType::Limited => match max_selections {
            Some(max) if selected.len() > max as usize => {
                invalid(format!("Maximum of {} choices", max))
            }
            _ => Ok(()),
        },
        _ => Ok(()),
    }
}

pub fn poll_is_closed(manual_closed: bool, closes_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    manual_closed || closes_at.is_some_and(|at| at <= now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn paging_defaults_and_bounds() {
        let q = PageQuery::default();
        let p = q.resolve(5);
        assert_eq!(p, Paging { page: 1, limit: 5 });
        assert_eq!(p.offset(), 0);

        let q = PageQuery { page: Some(0), limit: Some(1000) };
        let p = q.resolve(5);
        assert_eq!(p.page, 1);
        assert_eq!(p.limit, MAX_PAGE_LIMIT);

        let p = PageQuery { page: Some(3), limit: Some(10) }.resolve(5);
        assert_eq!(p.offset(), 20);
        assert_eq!(p.last_page(21), 3);
        assert_eq!(p.last_page(20), 2);
        assert_eq!(p.last_page(0), 0);
    }

    #[test]
    fn huge_page_offsets_do_not_overflow() {
        let p = PageQuery { page: Some(50_000_000), limit: Some(100) }.resolve(5);
        assert_eq!(p.offset(), 4_999_999_900);

        let p = PageQuery { page: Some(u32::MAX), limit: Some(u32::MAX) }.resolve(5);
        assert_eq!(p.offset(), (i64::from(u32::MAX) - 1) * i64::from(MAX_PAGE_LIMIT));
    }

    #[test]
    fn text_rules() {
        assert_eq!(require_text("title", "  hi  ", 10).unwrap(), "hi");
        assert!(require_text("title", "   ", 10).is_err());
        assert!(require_text("title", "abcdef", 5).is_err());
        assert_eq!(optional_text("d", Some("  "), 5).unwrap(), None);
        assert_eq!(optional_text("d", Some(" x "), 5).unwrap(), Some("x".into()));
    }

    #[test]
    fn email_rules() {
        assert_eq!(validate_email(" Jane@Example.org ").unwrap(), "jane@example.org");
        assert!(validate_email("jane.example.org").is_err());
        assert!(validate_email("jane@localhost").is_err());
        assert!(validate_email("@example.org").is_err());
        assert!(validate_email("a@b@c.org").is_err());
    }

    #[test]
    fn phone_rules() {
        assert!(validate_phone("+33 6 12 34 56 78").is_ok());
        assert!(validate_phone("12").is_err());
        assert!(validate_phone("06-12-ab").is_err());
    }

    #[test]
    fn restriction_duration_must_be_positive() {
        let now = Utc::now();
        assert!(restriction_expiry(now, None, None, None).is_err());
        assert!(restriction_expiry(now, Some(0), Some(0), Some(0)).is_err());
        assert!(restriction_expiry(now, None, Some(24), None).is_err());
        assert!(restriction_expiry(now, None, None, Some(60)).is_err());

        let at = restriction_expiry(now, Some(1), Some(2), Some(3)).unwrap();
        assert_eq!(at - now, Duration::minutes(24 * 60 + 2 * 60 + 3));
    }

    #[test]
    fn restriction_expires_at_its_instant() {
        let now = Utc::now();
        assert!(restriction_active(now + Duration::seconds(1), now));
        assert!(!restriction_active(now, now));
        assert!(!restriction_active(now - Duration::minutes(1), now));
    }

    #[test]
    fn poll_creation_rules() {
        let (q, opts, max) =
            validate_new_poll(" Lunch? ", &labels(&[" pizza", "sushi "]), PollType::Single, Some(4)).unwrap();
        assert_eq!(q, "Lunch?");
        assert_eq!(opts, labels(&["pizza", "sushi"]));
        assert_eq!(max, None);

        assert!(validate_new_poll("q", &labels(&["only"]), PollType::Single, None).is_err());
        assert!(validate_new_poll("q", &labels(&["a", "A"]), PollType::Multiple, None).is_err());
        assert!(validate_new_poll("q", &labels(&["a", " "]), PollType::Multiple, None).is_err());

        let three = labels(&["a", "b", "c"]);
        assert!(validate_new_poll("q", &three, PollType::Limited, None).is_err());
        assert!(validate_new_poll("q", &three, PollType::Limited, Some(3)).is_err());
        let (_, _, max) = validate_new_poll("q", &three, PollType::Limited, Some(2)).unwrap();
        assert_eq!(max, Some(2));
    }

    #[test]
    fn ballot_rules() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();

        assert!(validate_ballot(PollType::Single, None, &[]).is_err());
        assert!(validate_ballot(PollType::Single, None, &[a]).is_ok());
        assert!(validate_ballot(PollType::Single, None, &[a, b]).is_err());
        assert!(validate_ballot(PollType::Multiple, None, &[a, b, c]).is_ok());
        assert!(validate_ballot(PollType::Multiple, None, &[a, a]).is_err());
        assert!(validate_ballot(PollType::Limited, Some(2), &[a, b]).is_ok());
        assert_eq!(
            validate_ballot(PollType::Limited, Some(2), &[a, b, c]),
            Err(RuleError::Invalid("Maximum of 2 choices".into()))
        );
    }

    #[test]
    fn poll_closing() {
        let now = Utc::now();
        assert!(!poll_is_closed(false, None, now));
        assert!(poll_is_closed(true, None, now));
        assert!(poll_is_closed(false, Some(now - Duration::minutes(1)), now));
        assert!(!poll_is_closed(false, Some(now + Duration::hours(1)), now));
    }
}
