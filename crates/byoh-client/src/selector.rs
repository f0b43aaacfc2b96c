//! Label selectors
//!
//! Evaluates Kubernetes label selectors locally (mock store, watch mappers) and
//! renders them as the `labelSelector` query for the API server.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Equals,
    Exists,
    DoesNotExist,
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

/// Conjunction of label requirements. The empty selector matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    requirements: Vec<Requirement>,
}

impl Selector {
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Converts `matchLabels` and `matchExpressions`.
    pub fn from_label_selector(selector: &LabelSelector) -> Result<Self, StoreError> {
        let mut out = Self::default();
        for (k, v) in selector.match_labels.iter().flatten() {
            out = out.equals(k, v);
        }
        for expr in selector.match_expressions.iter().flatten() {
            let values = expr.values.clone().unwrap_or_default();
            let operator = match expr.operator.as_str() {
                "In" => Operator::In,
                "NotIn" => Operator::NotIn,
                "Exists" => Operator::Exists,
                "DoesNotExist" => Operator::DoesNotExist,
                other => {
                    return Err(StoreError::InvalidRequest(format!(
                        "unsupported label selector operator {:?} for key {}",
                        other, expr.key
                    )));
                }
            };
            if matches!(operator, Operator::In | Operator::NotIn) && values.is_empty() {
                return Err(StoreError::InvalidRequest(format!(
                    "label selector operator {} for key {} needs values",
                    expr.operator, expr.key
                )));
            }
            out.requirements.push(Requirement { key: expr.key.clone(), operator, values });
        }
        Ok(out)
    }

    #[must_use]
    pub fn equals(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.requirements.push(Requirement {
            key: key.into(),
            operator: Operator::Equals,
            values: vec![value.into()],
        });
        self
    }

    #[must_use]
    pub fn exists(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement { key: key.into(), operator: Operator::Exists, values: vec![] });
        self
    }

    #[must_use]
    pub fn does_not_exist(mut self, key: impl Into<String>) -> Self {
        self.requirements.push(Requirement {
            key: key.into(),
            operator: Operator::DoesNotExist,
            values: vec![],
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    pub fn requirements(&self) -> &[Requirement] {
        &self.requirements
    }

    #[must_use]
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.requirements.iter().all(|r| {
            let value = labels.get(&r.key);
            match r.operator {
                Operator::Equals | Operator::In => value.is_some_and(|v| r.values.contains(v)),
                Operator::NotIn => value.is_none_or(|v| !r.values.contains(v)),
                Operator::Exists => value.is_some(),
                Operator::DoesNotExist => value.is_none(),
            }
        })
    }

    /// Renders the selector in `labelSelector` query syntax.
    #[must_use]
    pub fn to_query(&self) -> String {
        self.requirements
            .iter()
            .map(|r| match r.operator {
                Operator::Equals => format!("{}={}", r.key, r.values.join("")),
                Operator::Exists => r.key.clone(),
                Operator::DoesNotExist => format!("!{}", r.key),
                Operator::In => format!("{} in ({})", r.key, r.values.join(",")),
                Operator::NotIn => format!("{} notin ({})", r.key, r.values.join(",")),
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}
