//! Pattern catalog and extraction dispatcher
//!
//! Turns a raw alert (source package + text) into a structured match by trying
//! every enabled rule scoped to that package, each rule's patterns in
//! declaration order. The first pattern that matches wins; vendor alert
//! formats are mutually exclusive by construction, so there is no scoring or
//! best-match search and the scan exits early.
//!
//! Compiled regexes are cached in memory keyed by pattern text, so rule
//! patterns are recompiled lazily after edits rather than on every alert.

use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::db::Database;
use crate::error::Result;
use crate::models::{MatchPattern, RuleWithPatterns, StructuredMatch};

/// Package names of common mail clients. Some vendors deliver alerts through
/// a generic mail app rather than their own; built-in rules for those vendors
/// include this set in their scope.
pub const COMMON_MAIL_PACKAGES: &[&str] = &[
    "com.google.android.gm",
    "com.microsoft.office.outlook",
    "com.samsung.android.email.provider",
    "com.yahoo.mobile.client.android.mail",
];

/// Parse a decimal amount string into exact integer cents
///
/// Scaling is decimal string arithmetic, never floating point: "2.00" -> 200,
/// "12.34" -> 1234, "1,234.5" -> 123450. Returns None for negative, empty, or
/// otherwise unparsable input, and for more than two fractional digits.
pub fn parse_amount_cents(raw: &str) -> Option<i64> {
    let s = raw.trim().trim_start_matches('$').replace(',', "");
    if s.is_empty() || s.starts_with('-') || s.starts_with('+') {
        return None;
    }

    let (units_part, frac_part) = match s.split_once('.') {
        Some((u, f)) => (u, f),
        None => (s.as_str(), ""),
    };

    if frac_part.len() > 2 {
        return None;
    }
    if units_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    let all_digits = |p: &str| p.chars().all(|c| c.is_ascii_digit());
    if !all_digits(units_part) || !all_digits(frac_part) {
        return None;
    }

    let units: i64 = if units_part.is_empty() {
        0
    } else {
        units_part.parse().ok()?
    };
    let frac_cents: i64 = match frac_part.len() {
        0 => 0,
        1 => frac_part.parse::<i64>().ok()? * 10,
        _ => frac_part.parse::<i64>().ok()?,
    };

    units.checked_mul(100)?.checked_add(frac_cents)
}

/// Extraction dispatcher over the rule catalog
pub struct Extractor {
    db: Database,
    /// Compiled pattern cache keyed by regex source text
    compiled: Mutex<HashMap<String, Arc<Regex>>>,
}

impl Extractor {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            compiled: Mutex::new(HashMap::new()),
        }
    }

    fn compile(&self, text: &str) -> Result<Arc<Regex>> {
        if let Some(re) = self.compiled.lock().unwrap().get(text) {
            return Ok(re.clone());
        }

        let re = Arc::new(Regex::new(text)?);
        self.compiled
            .lock()
            .unwrap()
            .insert(text.to_string(), re.clone());
        Ok(re)
    }

    /// Drop cached compilations (after rule edits or reseeding)
    pub fn clear_compiled(&self) {
        self.compiled.lock().unwrap().clear();
    }

    /// Try to extract a structured match from an alert
    ///
    /// Returns `Ok(None)` when no rule/pattern matches or when every textual
    /// match carries a malformed amount; a miss is a normal outcome, not an
    /// error. Only storage failures surface as `Err`.
    pub fn extract(&self, package: &str, text: &str) -> Result<Option<StructuredMatch>> {
        let rules = self.db.list_enabled_rules_for_package(package)?;

        for rule in &rules {
            if let Some((_, m)) = self.match_against_rule(rule, text) {
                debug!(
                    rule = %rule.rule.id,
                    amount_cents = m.amount_cents,
                    "Alert matched"
                );
                return Ok(Some(m));
            }
        }

        Ok(None)
    }

    /// Report which pattern of a single rule matches a sample text, if any
    ///
    /// Used by the add/edit rule flow to preview a rule against a pasted
    /// alert. Scope is not checked here.
    pub fn test_rule(
        &self,
        rule_id: &str,
        sample: &str,
    ) -> Result<Option<(MatchPattern, StructuredMatch)>> {
        let Some(rule) = self.db.get_rule_with_patterns(rule_id)? else {
            return Ok(None);
        };
        Ok(self
            .match_against_rule(&rule, sample)
            .map(|(idx, m)| (rule.patterns[idx].clone(), m)))
    }

    /// Try a rule's patterns in declaration order; first match wins
    ///
    /// A pattern whose match carries a negative or unparsable amount is
    /// rejected entirely (never a zero-amount event) and the scan continues.
    fn match_against_rule(
        &self,
        rule: &RuleWithPatterns,
        text: &str,
    ) -> Option<(usize, StructuredMatch)> {
        for (idx, pattern) in rule.patterns.iter().enumerate() {
            let re = match self.compile(&pattern.text) {
                Ok(re) => re,
                Err(e) => {
                    warn!(
                        rule = %rule.rule.id,
                        pattern = pattern.id,
                        "Skipping invalid pattern: {}",
                        e
                    );
                    continue;
                }
            };

            let Some(caps) = re.captures(text) else {
                continue;
            };

            let Some(amount_raw) = caps.name("amount") else {
                warn!(
                    rule = %rule.rule.id,
                    pattern = pattern.id,
                    "Pattern has no amount group; rejecting match"
                );
                continue;
            };
            let Some(amount_cents) = parse_amount_cents(amount_raw.as_str()) else {
                debug!(
                    rule = %rule.rule.id,
                    pattern = pattern.id,
                    amount = amount_raw.as_str(),
                    "Malformed amount; rejecting match"
                );
                continue;
            };

            let group = |name: &str| {
                caps.name(name)
                    .map(|m| m.as_str().to_string())
                    .unwrap_or_default()
            };

            return Some((
                idx,
                StructuredMatch {
                    rule_id: rule.rule.id.clone(),
                    rule_name: rule.rule.name.clone(),
                    direction: rule.rule.direction,
                    amount_cents,
                    matched_text: caps.get(0).map(|m| m.as_str()).unwrap_or(text).to_string(),
                    account: group("account"),
                    date: group("date"),
                    merchant: group("merchant"),
                    description: group("description"),
                },
            ));
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Direction;

    fn setup() -> (Database, Extractor) {
        let db = Database::in_memory().unwrap();
        (db.clone(), Extractor::new(db))
    }

    #[test]
    fn test_amount_exactness() {
        assert_eq!(parse_amount_cents("2.00"), Some(200));
        assert_eq!(parse_amount_cents("12.34"), Some(1234));
        assert_eq!(parse_amount_cents("0.07"), Some(7));
        assert_eq!(parse_amount_cents("1,234.56"), Some(123456));
        assert_eq!(parse_amount_cents("$5"), Some(500));
        assert_eq!(parse_amount_cents("3.5"), Some(350));
        assert_eq!(parse_amount_cents(".50"), Some(50));

        // Rejections: negative, junk, too many fractional digits
        assert_eq!(parse_amount_cents("-1.00"), None);
        assert_eq!(parse_amount_cents("abc"), None);
        assert_eq!(parse_amount_cents(""), None);
        assert_eq!(parse_amount_cents("1.234"), None);
        assert_eq!(parse_amount_cents("1.2.3"), None);
    }

    #[test]
    fn test_scope_enforcement() {
        let (db, extractor) = setup();
        db.create_rule(
            "Chase Spend",
            Direction::Spend,
            &["com.chase.sig.android".to_string()],
            &[r"You spent \$(?P<amount>[\d.]+)".to_string()],
        )
        .unwrap();

        let text = "You spent $4.20";
        // In-scope app matches
        assert!(extractor
            .extract("com.chase.sig.android", text)
            .unwrap()
            .is_some());
        // Out-of-scope app never matches, even though the regex would
        assert!(extractor.extract("com.other.app", text).unwrap().is_none());
    }

    #[test]
    fn test_disabled_rule_is_skipped() {
        let (db, extractor) = setup();
        let rule = db
            .create_rule(
                "Chase Spend",
                Direction::Spend,
                &["com.chase.sig.android".to_string()],
                &[r"You spent \$(?P<amount>[\d.]+)".to_string()],
            )
            .unwrap();

        db.set_rule_enabled(&rule.rule.id, false).unwrap();
        assert!(extractor
            .extract("com.chase.sig.android", "You spent $4.20")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_first_pattern_in_declaration_order_wins() {
        let (db, extractor) = setup();
        db.create_rule(
            "Multi",
            Direction::Spend,
            &["com.example.bank".to_string()],
            &[
                r"spent \$(?P<amount>[\d.]+) at (?P<merchant>\w+)".to_string(),
                r"spent \$(?P<amount>[\d.]+)".to_string(),
            ],
        )
        .unwrap();

        let m = extractor
            .extract("com.example.bank", "You spent $3.00 at Acme today")
            .unwrap()
            .unwrap();
        // The first, more specific pattern matched and captured the merchant
        assert_eq!(m.merchant, "Acme");
        assert_eq!(m.amount_cents, 300);
    }

    #[test]
    fn test_malformed_amount_rejects_match_and_scan_continues() {
        let (db, extractor) = setup();
        db.create_rule(
            "Fallthrough",
            Direction::Spend,
            &["com.example.bank".to_string()],
            &[
                // Matches textually but captures a non-numeric amount
                r"charge of (?P<amount>\w+) dollars".to_string(),
                r"charge of \w+ dollars \(\$(?P<amount>[\d.]+)\)".to_string(),
            ],
        )
        .unwrap();

        let m = extractor
            .extract("com.example.bank", "A charge of two dollars ($2.00) posted")
            .unwrap()
            .unwrap();
        assert_eq!(m.amount_cents, 200);

        // When nothing else matches, a malformed amount is a plain miss
        assert!(extractor
            .extract("com.example.bank", "A charge of twelve dollars posted")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_missing_optional_groups_default_to_empty() {
        let (db, extractor) = setup();
        db.create_rule(
            "Bare",
            Direction::Earn,
            &["com.example.bank".to_string()],
            &[r"received \$(?P<amount>[\d.]+)".to_string()],
        )
        .unwrap();

        let m = extractor
            .extract("com.example.bank", "You received $10.00")
            .unwrap()
            .unwrap();
        assert_eq!(m.direction, Direction::Earn);
        assert_eq!(m.account, "");
        assert_eq!(m.merchant, "");
        assert_eq!(m.date, "");
        assert_eq!(m.description, "");
    }

    #[test]
    fn test_invalid_pattern_is_skipped_not_fatal() {
        let (db, extractor) = setup();
        db.create_rule(
            "Broken first",
            Direction::Spend,
            &["com.example.bank".to_string()],
            &[
                r"(unclosed".to_string(),
                r"spent \$(?P<amount>[\d.]+)".to_string(),
            ],
        )
        .unwrap();

        let m = extractor
            .extract("com.example.bank", "You spent $1.25")
            .unwrap()
            .unwrap();
        assert_eq!(m.amount_cents, 125);
    }

    #[test]
    fn test_chase_mail_scenario() {
        let (db, extractor) = setup();
        let scope: Vec<String> = COMMON_MAIL_PACKAGES.iter().map(|p| p.to_string()).collect();
        db.create_rule(
            "Chase Bank Spending",
            Direction::Spend,
            &scope,
            &[
                r"(?P<account>[A-Za-z ]+): You made a \$(?P<amount>[0-9,]+\.\d{2}) transaction with (?P<merchant>.+) on (?P<date>.+)\."
                    .to_string(),
            ],
        )
        .unwrap();

        let text = "Chase Freedom: You made a $2.00 transaction with My Favorite Merchant on Oct 7, 2023 at 1:23PM ET.";
        let m = extractor
            .extract("com.google.android.gm", text)
            .unwrap()
            .unwrap();

        assert_eq!(m.amount_cents, 200);
        assert_eq!(m.merchant, "My Favorite Merchant");
        assert_eq!(m.account, "Chase Freedom");
        assert_eq!(m.direction, Direction::Spend);
    }

    #[test]
    fn test_rules_tried_in_stable_creation_order() {
        let (db, extractor) = setup();
        db.create_rule(
            "First",
            Direction::Spend,
            &["com.example.bank".to_string()],
            &[r"\$(?P<amount>[\d.]+)".to_string()],
        )
        .unwrap();
        db.create_rule(
            "Second",
            Direction::Earn,
            &["com.example.bank".to_string()],
            &[r"\$(?P<amount>[\d.]+)".to_string()],
        )
        .unwrap();

        // Both rules match; the earlier-created rule wins deterministically
        let m = extractor
            .extract("com.example.bank", "$9.99")
            .unwrap()
            .unwrap();
        assert_eq!(m.rule_name, "First");
        assert_eq!(m.direction, Direction::Spend);
    }

    #[test]
    fn test_test_rule_reports_matching_pattern() {
        let (db, extractor) = setup();
        let rule = db
            .create_rule(
                "Preview",
                Direction::Spend,
                &["com.example.bank".to_string()],
                &[
                    r"purchase of \$(?P<amount>[\d.]+)".to_string(),
                    r"spent \$(?P<amount>[\d.]+)".to_string(),
                ],
            )
            .unwrap();

        let (pattern, m) = extractor
            .test_rule(&rule.rule.id, "You spent $7.77")
            .unwrap()
            .unwrap();
        assert_eq!(pattern.position, 1);
        assert_eq!(m.amount_cents, 777);

        assert!(extractor
            .test_rule(&rule.rule.id, "No money here")
            .unwrap()
            .is_none());
    }
}
