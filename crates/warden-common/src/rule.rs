//! Operator-defined access rules

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One side (allow or block) of an access rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Country codes matched exactly against the request's geo header
    #[serde(default, deserialize_with = "lenient_strings")]
    pub country: Vec<String>,
    /// Autonomous system numbers matched exactly against the request's ASN header
    #[serde(default, deserialize_with = "lenient_strings")]
    pub asn: Vec<String>,
    /// Individual addresses and CIDR blocks
    #[serde(default, deserialize_with = "lenient_strings")]
    pub ips: Vec<String>,
}

impl RuleSet {
    /// True when the set matches nothing
    pub fn is_empty(&self) -> bool {
        self.country.is_empty() && self.asn.is_empty() && self.ips.is_empty()
    }

    /// Exact match on country code
    pub fn matches_country(&self, country: Option<&str>) -> bool {
        match country {
            Some(c) if !c.is_empty() => self.country.iter().any(|entry| entry == c),
            _ => false,
        }
    }

    /// Exact match on ASN
    pub fn matches_asn(&self, asn: Option<&str>) -> bool {
        match asn {
            Some(a) if !a.is_empty() => self.asn.iter().any(|entry| entry == a),
            _ => false,
        }
    }
}

/// Access rule as served by `GET /access-rules/{id}`
///
/// Block always outranks allow within the same rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRule {
    /// Rule identifier
    #[serde(deserialize_with = "lenient_string")]
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Matches that let the request through
    #[serde(default)]
    pub allow: RuleSet,
    /// Matches that block the request
    #[serde(default)]
    pub block: RuleSet,
    /// Inactive rules never produce a decision
    #[serde(default)]
    pub is_active: bool,
    /// Creation time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last modification time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Envelope of the access-rule endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRuleResponse {
    /// Whether the lookup succeeded
    #[serde(default)]
    pub success: bool,
    /// Rule payload
    #[serde(default)]
    pub data: Option<AccessRule>,
}

/// Cache key under which a rule definition is stored
pub fn access_rule_cache_key(rule_id: &str) -> String {
    format!("access-rule-data-{}", rule_id)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Int(i64),
    Float(f64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Int(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
        }
    }
}

/// Accept either a string or a number where the API is loose about types
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Scalar::deserialize(deserializer).map(Scalar::into_string)
}

/// Optional variant of [`lenient_string`]
pub(crate) fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_string))
}

fn lenient_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Scalar>>::deserialize(deserializer)?;
    Ok(values
        .unwrap_or_default()
        .into_iter()
        .map(Scalar::into_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_decoding() {
        let rule: AccessRule = serde_json::from_str(
            r#"{
                "id": 42,
                "name": "office",
                "allow": {"country": [], "asn": [13335], "ips": ["10.1.2.3"]},
                "block": {"country": ["RU"], "asn": null, "ips": ["10.0.0.0/8"]},
                "is_active": true,
                "created_at": "2024-01-01T00:00:00Z"
            }"#,
        )
        .unwrap();

        assert_eq!(rule.id, "42");
        assert_eq!(rule.allow.asn, vec!["13335".to_string()]);
        assert!(rule.block.asn.is_empty());
        assert!(rule.is_active);
        assert!(rule.created_at.is_some());
        assert!(rule.updated_at.is_none());
    }

    #[test]
    fn test_ruleset_matching() {
        let set = RuleSet {
            country: vec!["DE".into()],
            asn: vec!["64512".into()],
            ips: vec![],
        };
        assert!(set.matches_country(Some("DE")));
        assert!(!set.matches_country(Some("de")));
        assert!(!set.matches_country(Some("")));
        assert!(!set.matches_country(None));
        assert!(set.matches_asn(Some("64512")));
        assert!(!set.matches_asn(Some("64513")));
        assert!(!set.is_empty());
        assert!(RuleSet::default().is_empty());
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(access_rule_cache_key("r1"), "access-rule-data-r1");
    }
}
