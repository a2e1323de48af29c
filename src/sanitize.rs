//! Repairs untrusted model output into an executable [`ActionPlan`].
//!
//! Rules, applied to each element in input order:
//! - it must be an object holding `selector`, `action_type` and `value`;
//! - the selector must not already belong to an accepted action (first wins);
//! - `FILL_TEXT` never carries a boolean value.
//!
//! Anything that is not an array yields an empty plan. The pass never fails.

use std::collections::HashSet;

use serde_json::{Map, Value};

use crate::protocol::{Action, ActionPlan, ActionType, ActionValue};

const REQUIRED_KEYS: [&str; 3] = ["selector", "action_type", "value"];

/// Counts of what a sanitizing pass kept and dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SanitizeReport {
    pub accepted: usize,
    pub malformed: usize,
    pub duplicates: usize,
    pub type_mismatches: usize,
}

impl SanitizeReport {
    pub fn dropped(&self) -> usize {
        self.malformed + self.duplicates + self.type_mismatches
    }
}

enum Rejection {
    Malformed,
    TypeMismatch,
}

pub fn sanitize(raw: &Value) -> ActionPlan {
    sanitize_with_report(raw).0
}

pub fn sanitize_with_report(raw: &Value) -> (ActionPlan, SanitizeReport) {
    let mut report = SanitizeReport::default();
    let Some(items) = raw.as_array() else {
        return (ActionPlan::empty(), report);
    };

    let mut seen: HashSet<String> = HashSet::new();
    let mut accepted = Vec::with_capacity(items.len());

    for item in items {
        let Some(obj) = item.as_object() else {
            report.malformed += 1;
            continue;
        };
        match parse_action(obj) {
            Ok(action) => {
                if seen.contains(&action.selector) {
                    report.duplicates += 1;
                    continue;
                }
                seen.insert(action.selector.clone());
                accepted.push(action);
            }
            Err(Rejection::Malformed) => report.malformed += 1,
            Err(Rejection::TypeMismatch) => report.type_mismatches += 1,
        }
    }

    report.accepted = accepted.len();
    (ActionPlan::new(accepted), report)
}

fn parse_action(obj: &Map<String, Value>) -> Result<Action, Rejection> {
    if !REQUIRED_KEYS.iter().all(|k| obj.contains_key(*k)) {
        return Err(Rejection::Malformed);
    }

    let selector = obj["selector"].as_str().ok_or(Rejection::Malformed)?;
    let action_type = obj["action_type"]
        .as_str()
        .and_then(ActionType::parse)
        .ok_or(Rejection::Malformed)?;
    let value = match &obj["value"] {
        Value::Bool(b) => ActionValue::Flag(*b),
        Value::String(s) => ActionValue::Text(s.clone()),
        Value::Number(n) => ActionValue::Text(n.to_string()),
        _ => return Err(Rejection::Malformed),
    };

    if action_type == ActionType::FillText && matches!(value, ActionValue::Flag(_)) {
        return Err(Rejection::TypeMismatch);
    }

    Ok(Action::new(selector, action_type, value))
}


#[cfg(test)]
mod props {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "\\PC{0,16}".prop_map(Value::String),
        ];
        leaf.prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::btree_map("\\PC{0,8}", inner, 0..6)
                    .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    /// Elements that look like model output: a few shared selectors, mostly
    /// valid action names, and keys that are sometimes missing.
    fn action_like() -> impl Strategy<Value = Value> {
        let selector = prop_oneof![
            Just(json!("#a")),
            Just(json!("#b")),
            Just(json!("#c")),
            Just(json!(3)),
        ];
        let action_type = prop_oneof![
            Just(json!("FILL_TEXT")),
            Just(json!("SELECT_DROPDOWN")),
            Just(json!("CHECK_BOX")),
            Just(json!("SELECT_RADIO")),
            Just(json!("CLICK")),
        ];
        let value = prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            "[a-z]{0,6}".prop_map(Value::String),
            any::<i32>().prop_map(Value::from),
            Just(Value::Null),
        ];
        (
            prop::option::weighted(0.9, selector),
            prop::option::weighted(0.9, action_type),
            prop::option::weighted(0.9, value),
        )
            .prop_map(|(selector, action_type, value)| {
                let mut obj = Map::new();
                for (key, v) in REQUIRED_KEYS.into_iter().zip([selector, action_type, value]) {
                    if let Some(v) = v {
                        obj.insert(key.to_string(), v);
                    }
                }
                Value::Object(obj)
            })
    }

    fn model_output() -> impl Strategy<Value = Vec<Value>> {
        prop::collection::vec(prop_oneof![4 => action_like(), 1 => json_value()], 0..24)
    }

    /// Input index each accepted action was parsed from, searching forward
    /// so the result is only complete when the plan keeps input order.
    fn source_positions(items: &[Value], plan: &ActionPlan) -> Vec<usize> {
        let mut positions = Vec::new();
        let mut from = 0;
        for action in plan.iter() {
            let at = items[from..]
                .iter()
                .position(|item| {
                    item.as_object()
                        .and_then(|obj| parse_action(obj).ok())
                        .as_ref()
                        == Some(action)
                })
                .map(|p| p + from);
            if let Some(at) = at {
                positions.push(at);
                from = at + 1;
            }
        }
        positions
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            .. ProptestConfig::default()
        })]

        #[test]
        fn any_document_yields_a_plan(raw in json_value()) {
            let (plan, report) = sanitize_with_report(&raw);
            prop_assert_eq!(plan.len(), report.accepted);
            if !raw.is_array() {
                prop_assert!(plan.is_empty());
            }
        }

        #[test]
        fn accepted_actions_obey_every_rule(items in model_output()) {
            let raw = Value::Array(items.clone());
            let (plan, report) = sanitize_with_report(&raw);

            let mut seen = HashSet::new();
            for action in plan.iter() {
                prop_assert!(seen.insert(action.selector.clone()), "duplicate {}", action.selector);
                prop_assert!(
                    !(action.action_type == ActionType::FillText
                        && matches!(action.value, ActionValue::Flag(_)))
                );
            }
            prop_assert_eq!(report.accepted + report.dropped(), items.len());

            // survivors appear in input order, each from a complete element
            let positions = source_positions(&items, &plan);
            prop_assert_eq!(positions.len(), plan.len());
            for at in positions {
                let obj = items[at].as_object().unwrap();
                prop_assert!(REQUIRED_KEYS.iter().all(|k| obj.contains_key(*k)));
            }
        }

        #[test]
        fn first_valid_occurrence_wins(items in model_output()) {
            let plan = sanitize(&Value::Array(items.clone()));
            for action in plan.iter() {
                let first = items
                    .iter()
                    .filter_map(|item| item.as_object())
                    .filter(|obj| obj.get("selector") == Some(&json!(action.selector)))
                    .find_map(|obj| parse_action(obj).ok())
                    .unwrap();
                prop_assert_eq!(&first, action);
            }
        }
    }
}
