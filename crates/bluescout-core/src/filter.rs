//! Filter rules and the rule-set evaluation pass.
//!
//! A [`FilterRule`] is a persisted matching rule; a [`FilterSet`] holds the
//! enabled rules loaded for one monitor tick and evaluates observations
//! against all of them. An empty rule set matches nothing - scanning with no
//! rules configured must not flood the result table.

use regex::{Regex, RegexBuilder};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::observation::{hex_encode, ScanObservation};

/// Default lower bound of the RSSI acceptance window, in dBm.
pub const DEFAULT_RSSI_MIN: i16 = -100;

/// Default upper bound of the RSSI acceptance window, in dBm.
pub const DEFAULT_RSSI_MAX: i16 = 0;

/// One matching rule. All set conditions must hold for a match; unset
/// conditions are skipped. The RSSI window always applies.
#[derive(Debug, Clone)]
pub struct FilterRule {
    /// Row id, also the stable evaluation order.
    pub id: i64,

    /// Free-text note for operators.
    pub note: Option<String>,

    /// Disabled rules are dropped when the set is built.
    pub is_enabled: bool,

    /// Exact-match MAC address.
    pub mac_addr: Option<String>,

    /// Exact-match advertised local name.
    pub local_name: Option<String>,

    /// Company code that must be present among the manufacturer payloads.
    pub company_code: Option<u16>,

    /// Case-insensitive regex over the hex encoding of manufacturer payloads.
    pub manufacturer_data: Option<Regex>,

    /// Service UUID that must be present among the service payloads.
    pub service_uuid: Option<Uuid>,

    /// Case-insensitive regex over the hex encoding of service payloads.
    pub service_data: Option<Regex>,

    /// Inclusive lower RSSI bound in dBm.
    pub rssi_min: i16,

    /// Inclusive upper RSSI bound in dBm.
    pub rssi_max: i16,
}

impl Default for FilterRule {
    fn default() -> Self {
        Self {
            id: 0,
            note: None,
            is_enabled: true,
            mac_addr: None,
            local_name: None,
            company_code: None,
            manufacturer_data: None,
            service_uuid: None,
            service_data: None,
            rssi_min: DEFAULT_RSSI_MIN,
            rssi_max: DEFAULT_RSSI_MAX,
        }
    }
}

/// Compile a stored payload pattern the way rules expect it: case-insensitive,
/// matched against lowercase hex.
pub fn compile_payload_regex(rule_id: i64, pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| Error::InvalidFilterRegex { rule_id, source })
}

impl FilterRule {
    /// Evaluate this rule against a single observation.
    ///
    /// Payload regexes use one-of-many semantics: the condition holds if at
    /// least one payload value matches, and fails only when every value fails.
    #[must_use]
    pub fn matches(&self, obs: &ScanObservation) -> bool {
        if let Some(mac) = &self.mac_addr {
            if mac != &obs.address {
                return false;
            }
        }
        if let Some(name) = &self.local_name {
            if obs.local_name.as_deref() != Some(name.as_str()) {
                return false;
            }
        }
        if let Some(code) = self.company_code {
            if !obs.manufacturer_data.contains_key(&code) {
                return false;
            }
        }
        if let Some(re) = &self.manufacturer_data {
            if !obs
                .manufacturer_data
                .values()
                .any(|payload| re.is_match(&hex_encode(payload)))
            {
                return false;
            }
        }
        if let Some(uuid) = self.service_uuid {
            if !obs.service_data.contains_key(&uuid) {
                return false;
            }
        }
        if let Some(re) = &self.service_data {
            if !obs
                .service_data
                .values()
                .any(|payload| re.is_match(&hex_encode(payload)))
            {
                return false;
            }
        }
        self.rssi_min <= obs.rssi && obs.rssi <= self.rssi_max
    }
}

/// The set of enabled rules in effect for one evaluation pass.
///
/// Built fresh by the monitor task each tick so rule edits take effect without
/// restarting the scan process.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    rules: Vec<FilterRule>,
}

impl FilterSet {
    /// Build a set from loaded rules, keeping only enabled ones.
    #[must_use]
    pub fn new(rules: Vec<FilterRule>) -> Self {
        Self {
            rules: rules.into_iter().filter(|r| r.is_enabled).collect(),
        }
    }

    /// Number of enabled rules in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True when no rules are loaded; `filter` then returns nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Return every observation accepted by every rule, in (rule, observation)
    /// iteration order. An observation matched by two rules appears twice.
    #[must_use]
    pub fn filter(&self, observations: &[ScanObservation]) -> Vec<ScanObservation> {
        self.rules
            .iter()
            .flat_map(|rule| {
                observations
                    .iter()
                    .filter(|obs| rule.matches(obs))
                    .cloned()
            })
            .collect()
    }
}
