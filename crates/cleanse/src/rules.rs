use models::{CtsCphHoldingView, IssueContext, Lid, SamCphHoldingView};

/// Rule ids shared by the engine, the exporter and the tests.
pub mod ids {
    pub const CTS_CPH_NOT_IN_SAM: &str = "CTS_CPH_NOT_IN_SAM";
    pub const SAM_CPH_NOT_IN_CTS: &str = "SAM_CPH_NOT_IN_CTS";
    pub const CTS_SAM_NO_EMAIL_ADDRESSES: &str = "CTS_SAM_NO_EMAIL_ADDRESSES";
    pub const SAM_MISSING_EMAIL_ADDRESS: &str = "SAM_MISSING_EMAIL_ADDRESS";
    pub const CTS_SAM_NO_PHONE_NUMBERS: &str = "CTS_SAM_NO_PHONE_NUMBERS";
    pub const SAM_MISSING_PHONE_NUMBERS: &str = "SAM_MISSING_PHONE_NUMBERS";
    pub const SAM_NO_CATTLE_UNIT: &str = "SAM_NO_CATTLE_UNIT";
    pub const SAM_CATTLE_RELATED_CPHS: &str = "SAM_CATTLE_RELATED_CPHs";
}

/// A matched CTS/SAM holding pair under rule evaluation.
pub struct RulePair<'d> {
    pub lid: &'d Lid,
    pub cts: CtsCphHoldingView<'d>,
    pub sam: SamCphHoldingView<'d>,
}

pub struct Rule {
    pub id: &'static str,
    pub priority: u8,
    pub description: &'static str,
    eval: fn(&RulePair) -> Option<String>,
}

impl Rule {
    /// Evaluate against a pair; a hit yields the fully-populated issue
    /// context, reporting original-case values.
    pub fn evaluate(&self, pair: &RulePair) -> Option<IssueContext> {
        (self.eval)(pair).map(|detail| IssueContext {
            detail: Some(detail),
            ..base_context(pair)
        })
    }
}

/// The ordered rule table for the CTS-primary direction. Priority order is
/// load-bearing: it is the evaluation and reporting order.
pub fn cts_sam_rules() -> &'static [Rule] {
    CTS_SAM_RULES
}

static CTS_SAM_RULES: &[Rule] = &[
    Rule {
        id: ids::CTS_SAM_NO_EMAIL_ADDRESSES,
        priority: 2,
        description: "Neither CTS nor SAM holds an email address",
        eval: no_email_addresses,
    },
    Rule {
        id: ids::SAM_MISSING_EMAIL_ADDRESS,
        priority: 3,
        description: "SAM is missing email addresses CTS holds",
        eval: sam_missing_emails,
    },
    Rule {
        id: ids::CTS_SAM_NO_PHONE_NUMBERS,
        priority: 4,
        description: "Neither CTS nor SAM holds a phone number",
        eval: no_phone_numbers,
    },
    Rule {
        id: ids::SAM_MISSING_PHONE_NUMBERS,
        priority: 5,
        description: "SAM is missing phone numbers CTS holds",
        eval: sam_missing_phones,
    },
    Rule {
        id: ids::SAM_NO_CATTLE_UNIT,
        priority: 6,
        description: "SAM does not record the holding as a cattle unit",
        eval: sam_not_a_cattle_unit,
    },
    Rule {
        id: ids::SAM_CATTLE_RELATED_CPHS,
        priority: 10,
        description: "SAM cattle unit's location name disagrees with CTS",
        eval: cattle_location_mismatch,
    },
];

fn no_email_addresses(pair: &RulePair) -> Option<String> {
    let union = union_count(&pair.cts.emails(), &pair.sam.emails());
    (union == 0).then(|| "no email address on either system".to_string())
}

fn sam_missing_emails(pair: &RulePair) -> Option<String> {
    let missing = subtract(&pair.cts.emails(), &pair.sam.emails());
    (!missing.is_empty()).then(|| format!("missing from SAM: {}", missing.join("; ")))
}

fn no_phone_numbers(pair: &RulePair) -> Option<String> {
    let union = union_count(&pair.cts.phones(), &pair.sam.phones());
    (union == 0).then(|| "no phone number on either system".to_string())
}

fn sam_missing_phones(pair: &RulePair) -> Option<String> {
    let missing = subtract(&pair.cts.phones(), &pair.sam.phones());
    (!missing.is_empty()).then(|| format!("missing from SAM: {}", missing.join("; ")))
}

fn sam_not_a_cattle_unit(pair: &RulePair) -> Option<String> {
    (!pair.sam.is_cattle_unit())
        .then(|| format!("SAM species code is '{}'", pair.sam.species_code()))
}

fn cattle_location_mismatch(pair: &RulePair) -> Option<String> {
    if !pair.sam.is_cattle_unit() {
        return None;
    }
    let feature = pair.sam.feature_name().trim();
    let unusable = feature.is_empty() || is_unknown_marker(feature);
    let disagrees = !eq_ci(feature, pair.cts.location_name().trim());
    (unusable || disagrees).then(|| {
        format!(
            "SAM location '{}' does not match CTS '{}'",
            pair.sam.feature_name(),
            pair.cts.location_name(),
        )
    })
}

/// Priority of the unmatched-holding rules, ahead of every pair rule.
pub const UNMATCHED_PRIORITY: u8 = 1;

pub fn rule_priority(rule_id: &str) -> u8 {
    cts_sam_rules()
        .iter()
        .find(|rule| rule.id == rule_id)
        .map(|rule| rule.priority)
        .unwrap_or(UNMATCHED_PRIORITY)
}

pub fn rule_description(rule_id: &str) -> &'static str {
    match rule_id {
        ids::CTS_CPH_NOT_IN_SAM => "CTS holding has no SAM counterpart",
        ids::SAM_CPH_NOT_IN_CTS => "SAM holding has no CTS counterpart",
        _ => cts_sam_rules()
            .iter()
            .find(|rule| rule.id == rule_id)
            .map(|rule| rule.description)
            .unwrap_or(""),
    }
}

fn base_context(pair: &RulePair) -> IssueContext {
    IssueContext {
        cph: Some(pair.lid.cph.to_string()),
        lid_full_identifier: Some(pair.lid.to_string()),
        cts_emails: dedup(&pair.cts.emails()),
        sam_emails: dedup(&pair.sam.emails()),
        cts_phones: dedup(&pair.cts.phones()),
        sam_phones: dedup(&pair.sam.phones()),
        cts_location_name: Some(pair.cts.location_name().to_string()),
        sam_location_name: Some(pair.sam.feature_name().to_string()),
        fsa: Some(pair.sam.fsa().to_string()).filter(|v| !v.is_empty()),
        detail: None,
    }
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

fn eq_ci(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn is_unknown_marker(value: &str) -> bool {
    matches!(normalize(value).as_str(), "unknown" | "not known" | "notknown")
}

/// Deduplicate on normalized form, reporting original-case values.
fn dedup(values: &[String]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    values
        .iter()
        .filter(|v| seen.insert(normalize(v)))
        .cloned()
        .collect()
}

fn union_count(a: &[String], b: &[String]) -> usize {
    let mut set = std::collections::BTreeSet::new();
    for value in a.iter().chain(b) {
        set.insert(normalize(value));
    }
    set.len()
}

/// Values of `a` absent from `b`, compared case-insensitively on trimmed
/// form, reported in `a`'s original case.
fn subtract(a: &[String], b: &[String]) -> Vec<String> {
    let have: std::collections::BTreeSet<String> = b.iter().map(|v| normalize(v)).collect();
    dedup(a)
        .into_iter()
        .filter(|v| !have.contains(&normalize(v)))
        .collect()
}
