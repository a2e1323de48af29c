use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::value::RawValue;

/// One scanned form control as the extension reports it. Opaque to us.
pub type FieldDescriptor = Value;

/// The array of field descriptors produced by one page scan.
pub type ScanResult = Vec<FieldDescriptor>;

/// `action` value the extension uses when it reports a finished scan.
pub const SCAN_RESULT_ACTION: &str = "contextual_scan_result";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    FillText,
    SelectDropdown,
    CheckBox,
    SelectRadio,
}

impl ActionType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "FILL_TEXT" => Some(Self::FillText),
            "SELECT_DROPDOWN" => Some(Self::SelectDropdown),
            "CHECK_BOX" => Some(Self::CheckBox),
            "SELECT_RADIO" => Some(Self::SelectRadio),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FillText => "FILL_TEXT",
            Self::SelectDropdown => "SELECT_DROPDOWN",
            Self::CheckBox => "CHECK_BOX",
            Self::SelectRadio => "SELECT_RADIO",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionValue {
    Flag(bool),
    Text(String),
}

/// A single fill/select/check step the extension performs on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub selector: String,
    pub action_type: ActionType,
    pub value: ActionValue,
}

impl Action {
    pub fn new(selector: impl Into<String>, action_type: ActionType, value: ActionValue) -> Self {
        Self {
            selector: selector.into(),
            action_type,
            value,
        }
    }
}

/// Ordered list of actions. Serialises as a bare JSON array.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionPlan(Vec<Action>);

impl ActionPlan {
    pub fn new(actions: Vec<Action>) -> Self {
        Self(actions)
    }

    pub fn empty() -> Self {
        Self(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn actions(&self) -> &[Action] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Action> {
        self.0.iter()
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.0
    }
}

impl FromIterator<Action> for ActionPlan {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ActionPlan {
    type Item = &'a Action;
    type IntoIter = std::slice::Iter<'a, Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Orchestrator → host envelope on the loopback command channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    Scan,
    ExecutePlan { payload: ActionPlan },
}

/// Host → extension message written to the native-messaging pipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum BrowserCommand {
    ScanPage,
    ExecuteActionPlan { plan: ActionPlan },
}

impl From<Command> for BrowserCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Scan => BrowserCommand::ScanPage,
            Command::ExecutePlan { payload } => BrowserCommand::ExecuteActionPlan { plan: payload },
        }
    }
}

/// Extension → host message read from the native-messaging pipe.
///
/// `data` stays as the exact text the extension sent, so the relay can
/// forward a scan result without re-encoding it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtensionMessage {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
}

impl ExtensionMessage {
    pub fn is_scan_result(&self) -> bool {
        self.action == SCAN_RESULT_ACTION
    }

    /// Number of elements when `data` is an array.
    pub fn field_count(&self) -> Option<usize> {
        let raw = self.data.as_ref()?;
        serde_json::from_str::<Vec<&RawValue>>(raw.get())
            .ok()
            .map(|items| items.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn command_shapes_match_the_loopback_protocol() {
        assert_eq!(
            serde_json::to_value(Command::Scan).unwrap(),
            json!({"command": "scan"})
        );

        let plan = ActionPlan::new(vec![Action::new(
            "#email",
            ActionType::FillText,
            ActionValue::Text("a@b.c".into()),
        )]);
        assert_eq!(
            serde_json::to_value(Command::ExecutePlan { payload: plan }).unwrap(),
            json!({
                "command": "execute_plan",
                "payload": [{"selector": "#email", "action_type": "FILL_TEXT", "value": "a@b.c"}]
            })
        );
    }

    #[test]
    fn unknown_command_is_rejected() {
        let err = serde_json::from_value::<Command>(json!({"command": "reboot"}));
        assert!(err.is_err());
    }

    #[test]
    fn browser_command_carries_the_plan() {
        let plan = ActionPlan::new(vec![Action::new(
            "#terms",
            ActionType::CheckBox,
            ActionValue::Flag(true),
        )]);
        let cmd = BrowserCommand::from(Command::ExecutePlan { payload: plan });
        assert_eq!(
            serde_json::to_value(cmd).unwrap(),
            json!({
                "command": "execute_action_plan",
                "plan": [{"selector": "#terms", "action_type": "CHECK_BOX", "value": true}]
            })
        );
        assert_eq!(
            serde_json::to_value(BrowserCommand::from(Command::Scan)).unwrap(),
            json!({"command": "scan_page"})
        );
    }

    #[test]
    fn extension_message_without_data_has_none() {
        let msg: ExtensionMessage = serde_json::from_str(r#"{"action": "ping"}"#).unwrap();
        assert!(!msg.is_scan_result());
        assert!(msg.data.is_none());
        assert_eq!(msg.field_count(), None);
    }

    #[test]
    fn scan_data_keeps_its_original_text() {
        let body = r#"{"action":"contextual_scan_result","data":[ {"z":1,"a":0.30000000000000004} ,"x"]}"#;
        let msg: ExtensionMessage = serde_json::from_str(body).unwrap();
        assert!(msg.is_scan_result());
        assert_eq!(
            msg.data.as_ref().map(|raw| raw.get()),
            Some(r#"[ {"z":1,"a":0.30000000000000004} ,"x"]"#)
        );
        assert_eq!(msg.field_count(), Some(2));
    }

    #[test]
    fn action_type_names_round_trip() {
        for t in [
            ActionType::FillText,
            ActionType::SelectDropdown,
            ActionType::CheckBox,
            ActionType::SelectRadio,
        ] {
            assert_eq!(ActionType::parse(t.as_str()), Some(t));
            assert_eq!(serde_json::to_value(t).unwrap(), json!(t.as_str()));
        }
        assert_eq!(ActionType::parse("fill_text"), None);
    }
}
