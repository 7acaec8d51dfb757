use crate::taint::parse_strict_i64;
use crate::{KestrelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Only field key supported in `matchFields`
pub const FIELD_METADATA_NAME: &str = "metadata.name";

/// Operator of a node selector requirement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeSelectorOperator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
    Gt,
    Lt,
}

impl fmt::Display for NodeSelectorOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeSelectorOperator::In => "In",
            NodeSelectorOperator::NotIn => "NotIn",
            NodeSelectorOperator::Exists => "Exists",
            NodeSelectorOperator::DoesNotExist => "DoesNotExist",
            NodeSelectorOperator::Gt => "Gt",
            NodeSelectorOperator::Lt => "Lt",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for NodeSelectorOperator {
    type Err = KestrelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "In" => Ok(NodeSelectorOperator::In),
            "NotIn" => Ok(NodeSelectorOperator::NotIn),
            "Exists" => Ok(NodeSelectorOperator::Exists),
            "DoesNotExist" => Ok(NodeSelectorOperator::DoesNotExist),
            "Gt" => Ok(NodeSelectorOperator::Gt),
            "Lt" => Ok(NodeSelectorOperator::Lt),
            other => Err(KestrelError::validation_failed(
                "NodeSelectorRequirement",
                format!("unknown operator '{}'", other),
                "Operator must be one of In, NotIn, Exists, DoesNotExist, Gt, Lt",
            )),
        }
    }
}

/// A single `key <op> values` expression against node labels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorRequirement {
    pub key: String,
    pub operator: NodeSelectorOperator,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
}

impl NodeSelectorRequirement {
    pub fn new(key: impl Into<String>, operator: NodeSelectorOperator, values: &[&str]) -> Self {
        Self {
            key: key.into(),
            operator,
            values: values.iter().map(|v| v.to_string()).collect(),
        }
    }

    /// Validate value arity for the operator
    pub fn validate(&self) -> Result<()> {
        let fail = |details: String, help: &str| {
            Err(KestrelError::validation_failed(
                "NodeSelectorRequirement",
                details,
                help.to_string(),
            ))
        };

        match self.operator {
            NodeSelectorOperator::In | NodeSelectorOperator::NotIn if self.values.is_empty() => {
                fail(
                    format!("{} {} requires at least one value", self.key, self.operator),
                    "List the label values to match",
                )
            }
            NodeSelectorOperator::Exists | NodeSelectorOperator::DoesNotExist
                if !self.values.is_empty() =>
            {
                fail(
                    format!("{} {} must not carry values", self.key, self.operator),
                    "Remove the values list",
                )
            }
            NodeSelectorOperator::Gt | NodeSelectorOperator::Lt => {
                if self.values.len() != 1 {
                    return fail(
                        format!("{} {} requires exactly one value", self.key, self.operator),
                        "Provide a single integer value",
                    );
                }
                match parse_strict_i64(&self.values[0]) {
                    Ok(_) => Ok(()),
                    Err(reason) => fail(
                        format!(
                            "{} {} value '{}' is not a valid integer: {}",
                            self.key, self.operator, self.values[0], reason
                        ),
                        "Gt and Lt need a signed 64-bit integer without leading zeros",
                    ),
                }
            }
            _ => Ok(()),
        }
    }
}

/// Conjunction of requirements
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelectorTerm {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_expressions: Vec<NodeSelectorRequirement>,
    /// Requirements against node fields; only `metadata.name` is supported
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_fields: Vec<NodeSelectorRequirement>,
}

impl NodeSelectorTerm {
    pub fn with_expressions(match_expressions: Vec<NodeSelectorRequirement>) -> Self {
        Self {
            match_expressions,
            match_fields: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.match_expressions.is_empty() && self.match_fields.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        for requirement in &self.match_expressions {
            requirement.validate()?;
        }
        for requirement in &self.match_fields {
            if requirement.key != FIELD_METADATA_NAME {
                return Err(KestrelError::validation_failed(
                    "NodeSelectorTerm",
                    format!("unsupported field '{}'", requirement.key),
                    "matchFields only supports metadata.name",
                ));
            }
            if !matches!(
                requirement.operator,
                NodeSelectorOperator::In | NodeSelectorOperator::NotIn
            ) {
                return Err(KestrelError::validation_failed(
                    "NodeSelectorTerm",
                    format!("operator {} is not allowed in matchFields", requirement.operator),
                    "matchFields only supports In and NotIn",
                ));
            }
            requirement.validate()?;
        }
        Ok(())
    }
}

/// Weighted soft term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferredSchedulingTerm {
    pub weight: i32,
    pub preference: NodeSelectorTerm,
}

/// Required and preferred node affinity of a pod
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeAffinity {
    /// Disjunction of terms; `None` means unconstrained
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<Vec<NodeSelectorTerm>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred: Vec<PreferredSchedulingTerm>,
}

impl NodeAffinity {
    pub fn validate(&self) -> Result<()> {
        if let Some(terms) = &self.required {
            for term in terms {
                term.validate()?;
            }
        }
        for term in &self.preferred {
            if !(1..=100).contains(&term.weight) {
                return Err(KestrelError::validation_failed(
                    "PreferredSchedulingTerm",
                    format!("weight {} is out of range", term.weight),
                    "Weights must be between 1 and 100",
                ));
            }
            term.preference.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirement_arity() {
        assert!(NodeSelectorRequirement::new("zone", NodeSelectorOperator::In, &[])
            .validate()
            .is_err());
        assert!(NodeSelectorRequirement::new("zone", NodeSelectorOperator::Exists, &["a"])
            .validate()
            .is_err());
        assert!(NodeSelectorRequirement::new("cores", NodeSelectorOperator::Gt, &["4", "8"])
            .validate()
            .is_err());
        assert!(NodeSelectorRequirement::new("cores", NodeSelectorOperator::Gt, &["04"])
            .validate()
            .is_err());
        assert!(NodeSelectorRequirement::new("cores", NodeSelectorOperator::Lt, &["-4"])
            .validate()
            .is_ok());
    }

    #[test]
    fn test_match_fields_only_metadata_name() {
        let term = NodeSelectorTerm {
            match_expressions: vec![],
            match_fields: vec![NodeSelectorRequirement::new(
                "spec.podCIDR",
                NodeSelectorOperator::In,
                &["x"],
            )],
        };
        assert!(term.validate().is_err());
    }

    #[test]
    fn test_preferred_weight_range() {
        let affinity = NodeAffinity {
            required: None,
            preferred: vec![PreferredSchedulingTerm {
                weight: 0,
                preference: NodeSelectorTerm::default(),
            }],
        };
        assert!(affinity.validate().is_err());
    }
}
