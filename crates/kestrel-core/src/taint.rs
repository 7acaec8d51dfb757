use crate::resources::is_qualified_name;
use crate::{KestrelError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Taint key set on nodes whose Ready condition is False
pub const TAINT_NODE_NOT_READY: &str = "node.kubernetes.io/not-ready";
/// Taint key set on nodes whose Ready condition is Unknown
pub const TAINT_NODE_UNREACHABLE: &str = "node.kubernetes.io/unreachable";
/// Taint key set on cordoned nodes
pub const TAINT_NODE_UNSCHEDULABLE: &str = "node.kubernetes.io/unschedulable";

/// Effect of a taint on pods that do not tolerate it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaintEffect {
    /// Blocks new placement
    NoSchedule,
    /// Soft avoidance, penalizes score
    PreferNoSchedule,
    /// Blocks placement and evicts running pods
    NoExecute,
}

impl fmt::Display for TaintEffect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaintEffect::NoSchedule => "NoSchedule",
            TaintEffect::PreferNoSchedule => "PreferNoSchedule",
            TaintEffect::NoExecute => "NoExecute",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TaintEffect {
    type Err = KestrelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NoSchedule" => Ok(TaintEffect::NoSchedule),
            "PreferNoSchedule" => Ok(TaintEffect::PreferNoSchedule),
            "NoExecute" => Ok(TaintEffect::NoExecute),
            other => Err(KestrelError::validation_failed(
                "Taint",
                format!("unknown effect '{}'", other),
                "Effect must be one of NoSchedule, PreferNoSchedule, NoExecute",
            )),
        }
    }
}

/// Node-side marker repelling pods that do not tolerate it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Taint {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub effect: TaintEffect,
    /// When the taint was added (informational; timers start when the
    /// eviction manager observes the taint)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_added: Option<DateTime<Utc>>,
}

impl Taint {
    pub fn new(key: impl Into<String>, value: Option<&str>, effect: TaintEffect) -> Self {
        Self {
            key: key.into(),
            value: value.map(str::to_string),
            effect,
            time_added: None,
        }
    }

    /// Value, with a missing value read as empty
    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    /// Identity of a taint on a node: key and effect. Two taints with the
    /// same key and effect cannot coexist on one node.
    pub fn identity(&self) -> (&str, TaintEffect) {
        (self.key.as_str(), self.effect)
    }

    /// Validate the taint at admission
    pub fn validate(&self) -> Result<()> {
        if !is_qualified_name(&self.key) {
            return Err(KestrelError::validation_failed(
                "Taint",
                format!("invalid key '{}'", self.key),
                "Taint keys must be qualified names such as 'example.com/dedicated'",
            ));
        }
        if self.value_str().len() > 63 {
            return Err(KestrelError::validation_failed(
                "Taint",
                format!("value for key '{}' exceeds 63 characters", self.key),
                "Shorten the taint value",
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Taint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) if !v.is_empty() => write!(f, "{}={}:{}", self.key, v, self.effect),
            _ => write!(f, "{}:{}", self.key, self.effect),
        }
    }
}

/// Operator relating a toleration's value to a taint's value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TolerationOperator {
    #[default]
    Equal,
    Exists,
    Gt,
    Lt,
}

impl fmt::Display for TolerationOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TolerationOperator::Equal => "Equal",
            TolerationOperator::Exists => "Exists",
            TolerationOperator::Gt => "Gt",
            TolerationOperator::Lt => "Lt",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for TolerationOperator {
    type Err = KestrelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" | "Equal" => Ok(TolerationOperator::Equal),
            "Exists" => Ok(TolerationOperator::Exists),
            "Gt" => Ok(TolerationOperator::Gt),
            "Lt" => Ok(TolerationOperator::Lt),
            other => Err(KestrelError::validation_failed(
                "Toleration",
                format!("unknown operator '{}'", other),
                "Operator must be one of Equal, Exists, Gt, Lt",
            )),
        }
    }
}

/// Pod-side declaration permitting a matching taint to be ignored
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toleration {
    /// Empty or missing key is a wildcard
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Missing effect matches all effects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effect: Option<TaintEffect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toleration_seconds: Option<i64>,
}

impl Toleration {
    /// `key Exists` toleration for one effect
    pub fn exists(key: impl Into<String>, effect: Option<TaintEffect>) -> Self {
        Self {
            key: Some(key.into()),
            operator: TolerationOperator::Exists,
            value: None,
            effect,
            toleration_seconds: None,
        }
    }

    /// `key = value` toleration for one effect
    pub fn equal(
        key: impl Into<String>,
        value: impl Into<String>,
        effect: Option<TaintEffect>,
    ) -> Self {
        Self {
            key: Some(key.into()),
            operator: TolerationOperator::Equal,
            value: Some(value.into()),
            effect,
            toleration_seconds: None,
        }
    }

    /// Toleration matching every taint on every node
    pub fn tolerate_everything() -> Self {
        Self {
            key: None,
            operator: TolerationOperator::Exists,
            value: None,
            effect: None,
            toleration_seconds: None,
        }
    }

    /// Set tolerationSeconds
    pub fn for_seconds(mut self, seconds: i64) -> Self {
        self.toleration_seconds = Some(seconds);
        self
    }

    /// Key, with a missing key read as empty
    pub fn key_str(&self) -> &str {
        self.key.as_deref().unwrap_or("")
    }

    /// Value, with a missing value read as empty
    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    /// Validate the toleration at admission.
    ///
    /// Rules: an empty key requires `Exists`; `Exists` carries no value;
    /// `Gt`/`Lt` carry a strict signed 64-bit integer value;
    /// `tolerationSeconds` is only allowed with the `NoExecute` effect.
    pub fn validate(&self) -> Result<()> {
        let key = self.key_str();

        if !key.is_empty() && !is_qualified_name(key) {
            return Err(KestrelError::validation_failed(
                "Toleration",
                format!("invalid key '{}'", key),
                "Toleration keys must be qualified names, or empty to match all keys",
            ));
        }

        if key.is_empty() && self.operator != TolerationOperator::Exists {
            return Err(KestrelError::validation_failed(
                "Toleration",
                format!("operator {} requires a key", self.operator),
                "Use operator Exists with an empty key to tolerate every taint",
            ));
        }

        match self.operator {
            TolerationOperator::Exists if !self.value_str().is_empty() => {
                return Err(KestrelError::validation_failed(
                    "Toleration",
                    format!("value '{}' must be empty when operator is Exists", self.value_str()),
                    "Remove the value or use operator Equal",
                ));
            }
            TolerationOperator::Gt | TolerationOperator::Lt => {
                parse_strict_i64(self.value_str()).map_err(|reason| {
                    KestrelError::validation_failed(
                        "Toleration",
                        format!(
                            "value '{}' for operator {} is not a valid integer: {}",
                            self.value_str(),
                            self.operator,
                            reason
                        ),
                        "Gt and Lt need a signed 64-bit integer without leading zeros",
                    )
                })?;
            }
            _ => {}
        }

        if self.toleration_seconds.is_some() && self.effect != Some(TaintEffect::NoExecute) {
            return Err(KestrelError::validation_failed(
                "Toleration",
                "tolerationSeconds is set but effect is not NoExecute",
                "Set effect to NoExecute or drop tolerationSeconds",
            ));
        }

        Ok(())
    }
}

impl fmt::Display for Toleration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = if self.key_str().is_empty() { "*" } else { self.key_str() };
        write!(f, "{} {}", key, self.operator)?;
        if !self.value_str().is_empty() {
            write!(f, " {}", self.value_str())?;
        }
        match self.effect {
            Some(effect) => write!(f, ":{}", effect)?,
            None => write!(f, ":*")?,
        }
        if let Some(secs) = self.toleration_seconds {
            write!(f, " ({}s)", secs)?;
        }
        Ok(())
    }
}

/// Parse a signed 64-bit integer in canonical form.
///
/// Accepts an optional leading '-' followed by decimal digits, where the
/// first digit may only be '0' if the whole number is "0". Rejects "+5",
/// "007", "-0", whitespace and anything that overflows i64.
pub fn parse_strict_i64(s: &str) -> std::result::Result<i64, String> {
    let digits = s.strip_prefix('-').unwrap_or(s);

    if digits.is_empty() {
        return Err("empty number".to_string());
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("non-digit characters".to_string());
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return Err("leading zero".to_string());
    }
    if s.starts_with('-') && digits == "0" {
        return Err("negative zero".to_string());
    }

    s.parse::<i64>().map_err(|e| e.to_string())
}

/// Validate a list of tolerations, failing on the first invalid entry
pub fn validate_tolerations(tolerations: &[Toleration]) -> Result<()> {
    for (i, toleration) in tolerations.iter().enumerate() {
        toleration.validate().map_err(|e| match e {
            KestrelError::ValidationFailed {
                resource_type,
                details,
                help_text,
            } => KestrelError::validation_failed(
                resource_type,
                format!("tolerations[{}]: {}", i, details),
                help_text,
            ),
            other => other,
        })?;
    }
    Ok(())
}

/// Validate a node's taint list: each taint must be valid and no two may
/// share a key and effect
pub fn validate_taints(taints: &[Taint]) -> Result<()> {
    for (i, taint) in taints.iter().enumerate() {
        taint.validate()?;
        if taints[..i].iter().any(|t| t.identity() == taint.identity()) {
            return Err(KestrelError::validation_failed(
                "Taint",
                format!("duplicate taint {}:{}", taint.key, taint.effect),
                "A node may carry one taint per key and effect",
            ));
        }
    }
    Ok(())
}
