//! Domain models for Centime

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Direction of money movement for a rule or transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Spend,
    Earn,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Spend => "spend",
            Self::Earn => "earn",
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "spend" => Ok(Self::Spend),
            "earn" => Ok(Self::Earn),
            _ => Err(format!("Unknown direction: {}", s)),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A notification extraction rule: a named, scoped set of regex patterns
/// plus a transaction direction.
///
/// Rules are immutable values; edits go through the `with_*` updaters which
/// return a modified copy. `tainted_on` records the first user edit of a
/// system rule and is never cleared afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    /// Stable opaque id. Built-in rules use fixed ids so shipped fixes can
    /// find them across installs.
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub direction: Direction,
    pub enabled: bool,
    /// True only for built-in rules installed by the seeder
    pub system: bool,
    /// Source application package names this rule may match against
    pub scope: Vec<String>,
    /// Set on the first user edit of a system rule; never reset
    pub tainted_on: Option<DateTime<Utc>>,
}

impl NotificationRule {
    pub fn with_name(self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self
        }
    }

    pub fn with_direction(self, direction: Direction) -> Self {
        Self { direction, ..self }
    }

    pub fn with_enabled(self, enabled: bool) -> Self {
        Self { enabled, ..self }
    }

    pub fn with_scope(self, scope: Vec<String>) -> Self {
        Self { scope, ..self }
    }

    /// Mark the rule as user-edited. Only the first call has an effect.
    pub fn tainted_at(self, at: DateTime<Utc>) -> Self {
        Self {
            tainted_on: self.tainted_on.or(Some(at)),
            ..self
        }
    }

    pub fn is_tainted(&self) -> bool {
        self.tainted_on.is_some()
    }

    /// Whether this rule may be evaluated against an alert from `package`
    pub fn in_scope(&self, package: &str) -> bool {
        self.scope.iter().any(|p| p == package)
    }
}

/// One regex template owned by a rule
///
/// The regex uses named capture groups: `amount` (required for a match to
/// produce a candidate event), and optionally `account`, `date`, `merchant`,
/// `description`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchPattern {
    pub id: i64,
    /// Owning rule; patterns are cascade-deleted with the rule
    pub rule_id: String,
    /// Declaration order within the rule; lower tries first
    pub position: i64,
    /// Regex source text
    pub text: String,
    pub created_at: DateTime<Utc>,
}

/// A rule together with its patterns in declaration order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleWithPatterns {
    pub rule: NotificationRule,
    pub patterns: Vec<MatchPattern>,
}

/// A raw alert delivered by the OS notification listener
///
/// The engine does not control delivery timing or redelivery, so the same
/// alert may arrive more than once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// Source application package name (e.g. "com.google.android.gm")
    pub package_name: String,
    /// Full alert text
    pub text: String,
    pub notification_id: i64,
    pub notification_key: String,
    pub notification_group: String,
    /// Post time in epoch milliseconds
    pub post_time: i64,
}

/// The structured result of a successful extraction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredMatch {
    pub rule_id: String,
    pub rule_name: String,
    pub direction: Direction,
    /// Exact integer cents, never derived through floating point
    pub amount_cents: i64,
    /// The slice of alert text the winning pattern matched
    pub matched_text: String,
    /// Optional named groups default to "" when the pattern lacks them
    pub account: String,
    pub date: String,
    pub merchant: String,
    pub description: String,
}

/// A structured extraction result pending user confirmation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEvent {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    /// Category ids suggested for the eventual transaction
    pub categories: Vec<i64>,
    pub source_notification_id: i64,
    pub source_notification_key: String,
    pub source_notification_group: String,
    pub source_package: String,
    /// Epoch milliseconds the OS posted the source notification
    pub source_post_time: i64,
    pub matched_text: String,
    pub amount_cents: i64,
    pub title: String,
    pub direction: Direction,
    pub account: Option<String>,
    pub date: Option<String>,
    pub merchant: Option<String>,
    pub description: Option<String>,
    /// True once a transaction has been created from this event; never reverts
    pub used: bool,
}

/// Insert/merge payload for a candidate event
///
/// `(source_notification_id, source_notification_key, source_notification_group,
/// source_package, matched_text)` is the dedup identity key: two alerts with
/// the same key are the same underlying notification and resolve to one row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCandidateEvent {
    pub categories: Vec<i64>,
    pub source_notification_id: i64,
    pub source_notification_key: String,
    pub source_notification_group: String,
    pub source_package: String,
    pub source_post_time: i64,
    pub matched_text: String,
    pub amount_cents: i64,
    pub title: String,
    pub direction: Direction,
    pub account: Option<String>,
    pub date: Option<String>,
    pub merchant: Option<String>,
    pub description: Option<String>,
}

impl NewCandidateEvent {
    /// Build the candidate payload for a successful extraction
    pub fn from_match(alert: &Alert, m: &StructuredMatch) -> Self {
        fn non_empty(s: &str) -> Option<String> {
            if s.is_empty() {
                None
            } else {
                Some(s.to_string())
            }
        }

        Self {
            categories: Vec::new(),
            source_notification_id: alert.notification_id,
            source_notification_key: alert.notification_key.clone(),
            source_notification_group: alert.notification_group.clone(),
            source_package: alert.package_name.clone(),
            source_post_time: alert.post_time,
            matched_text: m.matched_text.clone(),
            amount_cents: m.amount_cents,
            title: m.rule_name.clone(),
            direction: m.direction,
            account: non_empty(&m.account),
            date: non_empty(&m.date),
            merchant: non_empty(&m.merchant),
            description: non_empty(&m.description),
        }
    }
}

/// The user-facing financial record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub categories: Vec<i64>,
    pub name: String,
    pub amount_cents: i64,
    pub date: NaiveDate,
    pub direction: Direction,
    pub note: String,
    /// Back-reference to the candidate event this was derived from, if any
    pub automatic_id: Option<i64>,
    pub automatic_created_date: Option<DateTime<Utc>>,
}

/// Insert payload for a transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransaction {
    pub categories: Vec<i64>,
    pub name: String,
    pub amount_cents: i64,
    pub date: NaiveDate,
    pub direction: Direction,
    pub note: String,
}

/// A spending category
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A payment source (card, account, wallet)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A change to an entity store, published after the write and cache
/// invalidation have succeeded
#[derive(Debug, Clone)]
pub enum ChangeEvent<T> {
    Insert(T),
    Update(T),
    Delete(T),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_round_trip() {
        assert_eq!(Direction::Spend.as_str(), "spend");
        assert_eq!("EARN".parse::<Direction>().unwrap(), Direction::Earn);
        assert!("sideways".parse::<Direction>().is_err());
    }

    #[test]
    fn test_rule_updaters_are_copy_on_write() {
        let rule = NotificationRule {
            id: "r1".to_string(),
            created_at: Utc::now(),
            name: "Original".to_string(),
            direction: Direction::Spend,
            enabled: true,
            system: false,
            scope: vec!["com.example.bank".to_string()],
            tainted_on: None,
        };

        let renamed = rule.clone().with_name("Renamed");
        assert_eq!(renamed.name, "Renamed");
        assert_eq!(rule.name, "Original");
        assert_eq!(renamed.id, rule.id);
    }

    #[test]
    fn test_taint_sets_once() {
        let rule = NotificationRule {
            id: "r1".to_string(),
            created_at: Utc::now(),
            name: "Rule".to_string(),
            direction: Direction::Spend,
            enabled: true,
            system: true,
            scope: vec![],
            tainted_on: None,
        };

        let first = Utc::now();
        let tainted = rule.tainted_at(first);
        assert_eq!(tainted.tainted_on, Some(first));

        // A later edit must not move the marker
        let later = first + chrono::Duration::hours(1);
        let again = tainted.tainted_at(later);
        assert_eq!(again.tainted_on, Some(first));
    }

    #[test]
    fn test_scope_membership() {
        let rule = NotificationRule {
            id: "r1".to_string(),
            created_at: Utc::now(),
            name: "Rule".to_string(),
            direction: Direction::Spend,
            enabled: true,
            system: false,
            scope: vec!["com.chase.sig.android".to_string()],
            tainted_on: None,
        };

        assert!(rule.in_scope("com.chase.sig.android"));
        assert!(!rule.in_scope("com.other.app"));
    }
}
