//! Config-boundary normalization of rule conditions.

use serde_json::Value;

use shared_types::units::{decimal_to_wei, ETH_DECIMALS};
use shared_types::{AddressStatus, CoreError, CoreResult, RuleCondition};

/// Turn an operator-supplied condition bag into tagged conditions.
///
/// Recognized keys: `amount_lte|amount_lt|amount_gte|amount_gt` (decimal in
/// the asset's natural unit, string or number), `address_in` /
/// `address_not_in` (plus the legacy `to_address_*` spellings), and the
/// combinators `all` / `any` holding arrays of bags. Anything else is
/// rejected so that a typo in a policy file cannot silently weaken a rule.
///
/// An empty bag yields no conditions: a catch-all rule.
pub fn normalize_conditions(bag: &Value) -> CoreResult<Vec<RuleCondition>> {
    let object = bag.as_object().ok_or_else(|| {
        CoreError::Configuration("rule conditions must be a JSON object".to_string())
    })?;

    let mut conditions = Vec::new();
    for (key, value) in object {
        let condition = match key.as_str() {
            "amount_lte" => RuleCondition::AmountLte {
                wei: amount_value(key, value)?,
            },
            "amount_lt" => RuleCondition::AmountLt {
                wei: amount_value(key, value)?,
            },
            "amount_gte" => RuleCondition::AmountGte {
                wei: amount_value(key, value)?,
            },
            "amount_gt" => RuleCondition::AmountGt {
                wei: amount_value(key, value)?,
            },
            "address_in" | "to_address_in" => RuleCondition::AddressIn {
                list: list_value(key, value)?,
            },
            "address_not_in" | "to_address_not_in" => RuleCondition::AddressNotIn {
                list: list_value(key, value)?,
            },
            "all" => RuleCondition::All {
                conditions: nested(key, value)?,
            },
            "any" => RuleCondition::Any {
                conditions: nested(key, value)?,
            },
            other => {
                return Err(CoreError::Configuration(format!(
                    "unknown rule condition key: {other:?}"
                )))
            }
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn amount_value(key: &str, value: &Value) -> CoreResult<primitive_types::U256> {
    let text = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => {
            return Err(CoreError::Configuration(format!(
                "{key} must be a decimal amount, got {value}"
            )))
        }
    };
    decimal_to_wei(&text, ETH_DECIMALS)
}

fn list_value(key: &str, value: &Value) -> CoreResult<AddressStatus> {
    match value.as_str() {
        Some("allowlist") => Ok(AddressStatus::Allowlist),
        Some("denylist") => Ok(AddressStatus::Denylist),
        Some("unknown") => Ok(AddressStatus::Unknown),
        _ => Err(CoreError::Configuration(format!(
            "{key} must be one of allowlist/denylist/unknown, got {value}"
        ))),
    }
}

fn nested(key: &str, value: &Value) -> CoreResult<Vec<RuleCondition>> {
    let items = value.as_array().ok_or_else(|| {
        CoreError::Configuration(format!("{key} must be an array of condition objects"))
    })?;
    let mut out = Vec::new();
    for item in items {
        out.extend(normalize_conditions(item)?);
    }
    Ok(out)
}
