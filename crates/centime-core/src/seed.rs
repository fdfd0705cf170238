//! Guarantee seeder for built-in vendor rules
//!
//! Runs at startup and idempotently upserts the shipped rule catalog:
//! missing rules are inserted, untainted rules are refreshed with the current
//! definition (how shipped regex fixes reach existing installs), and rules
//! the user has edited are never touched.

use tracing::{info, warn};

use crate::db::{Database, SystemRuleUpsert};
use crate::extract::COMMON_MAIL_PACKAGES;
use crate::models::Direction;

/// One shipped rule definition
///
/// Ids are fixed forever; the seeder finds existing installs' rows by id.
pub struct BuiltinRule {
    pub id: &'static str,
    pub name: &'static str,
    pub direction: Direction,
    /// Vendor application packages
    pub packages: &'static [&'static str],
    /// Whether this vendor's alerts also arrive via generic mail clients;
    /// folds `COMMON_MAIL_PACKAGES` into the scope
    pub via_mail: bool,
    /// Regex templates in declaration order
    pub patterns: &'static [&'static str],
}

impl BuiltinRule {
    /// Full scope set: vendor packages plus mail clients when applicable
    pub fn scope(&self) -> Vec<String> {
        let mut scope: Vec<String> = self.packages.iter().map(|p| p.to_string()).collect();
        if self.via_mail {
            scope.extend(COMMON_MAIL_PACKAGES.iter().map(|p| p.to_string()));
        }
        scope
    }
}

/// The shipped vendor rule catalog
pub const BUILTIN_RULES: &[BuiltinRule] = &[
    BuiltinRule {
        id: "builtin-chase-spend",
        name: "Chase Bank Spending",
        direction: Direction::Spend,
        packages: &["com.chase.sig.android"],
        via_mail: true,
        patterns: &[
            r"(?P<account>[A-Za-z0-9 ]+): You made a \$(?P<amount>[0-9,]+\.\d{2}) transaction with (?P<merchant>.+) on (?P<date>.+)\.",
            r"You made a \$(?P<amount>[0-9,]+\.\d{2}) transaction with (?P<merchant>.+)\.",
        ],
    },
    BuiltinRule {
        id: "builtin-chase-earn",
        name: "Chase Bank Deposit",
        direction: Direction::Earn,
        packages: &["com.chase.sig.android"],
        via_mail: true,
        patterns: &[
            r"(?P<account>[A-Za-z0-9 ]+): You have a \$(?P<amount>[0-9,]+\.\d{2}) (?P<description>deposit|credit)",
        ],
    },
    BuiltinRule {
        id: "builtin-venmo-earn",
        name: "Venmo Payment Received",
        direction: Direction::Earn,
        packages: &["com.venmo"],
        via_mail: false,
        patterns: &[
            r"(?P<merchant>.+) paid you \$(?P<amount>[0-9,]+\.\d{2})(?: for (?P<description>.+))?",
        ],
    },
    BuiltinRule {
        id: "builtin-venmo-spend",
        name: "Venmo Payment Sent",
        direction: Direction::Spend,
        packages: &["com.venmo"],
        via_mail: false,
        patterns: &[
            r"You paid (?P<merchant>.+) \$(?P<amount>[0-9,]+\.\d{2})(?: for (?P<description>.+))?",
        ],
    },
    BuiltinRule {
        id: "builtin-cashapp-earn",
        name: "Cash App Received",
        direction: Direction::Earn,
        packages: &["com.squareup.cash"],
        via_mail: false,
        patterns: &[
            r"(?P<merchant>.+) sent you \$(?P<amount>[0-9,]+\.\d{2})(?: for (?P<description>.+))?",
        ],
    },
    BuiltinRule {
        id: "builtin-cashapp-spend",
        name: "Cash App Purchase",
        direction: Direction::Spend,
        packages: &["com.squareup.cash"],
        via_mail: false,
        patterns: &[
            r"You spent \$(?P<amount>[0-9,]+\.\d{2}) at (?P<merchant>.+)",
        ],
    },
    BuiltinRule {
        id: "builtin-paypal-spend",
        name: "PayPal Payment Sent",
        direction: Direction::Spend,
        packages: &["com.paypal.android.p2pmobile"],
        via_mail: true,
        patterns: &[
            r"You sent \$(?P<amount>[0-9,]+\.\d{2})(?: USD)? to (?P<merchant>.+)",
        ],
    },
];

/// Summary of one seeding pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub inserted: usize,
    pub refreshed: usize,
    pub skipped_tainted: usize,
    pub failed: usize,
}

/// Idempotently upsert the built-in rule catalog
///
/// Safe to run any number of times and to interleave with ordinary rule
/// reads. A failure on one built-in is logged and skipped; the rest of the
/// catalog still seeds.
pub fn ensure_seeded(db: &Database) -> SeedReport {
    let mut report = SeedReport::default();

    for def in BUILTIN_RULES {
        let scope = def.scope();
        let patterns: Vec<String> = def.patterns.iter().map(|p| p.to_string()).collect();

        match db.upsert_system_rule(def.id, def.name, def.direction, &scope, &patterns) {
            Ok(SystemRuleUpsert::Inserted) => report.inserted += 1,
            Ok(SystemRuleUpsert::Refreshed) => report.refreshed += 1,
            Ok(SystemRuleUpsert::SkippedTainted) => report.skipped_tainted += 1,
            Err(e) => {
                warn!(rule_id = def.id, "Failed to seed built-in rule: {}", e);
                report.failed += 1;
            }
        }
    }

    info!(
        inserted = report.inserted,
        refreshed = report.refreshed,
        skipped_tainted = report.skipped_tainted,
        failed = report.failed,
        "Guarantee seeding complete"
    );
    report
}
