use serde_json::Value;

pub const DEFAULT_INSTRUCTION: &str = "No special instructions. Use primary data.";

const ACTION_PLAN_TEMPLATE: &str = r#"You are a form-filling assistant. Read the user's data and instructions, then decide how to fill the web form below the way a careful person would.

--------------------
Primary user data:
<PrimaryUserData>
{primary_context}
</PrimaryUserData>

Special instructions for this form:
<AdditionalInstructions>
{instruction}
</AdditionalInstructions>

Form fields to fill (each may carry retrieved context about the user):
<HtmlFormFields>
{html_fields}
</HtmlFormFields>
--------------------

Produce a JSON array of action objects. Every object has exactly three keys:
1. "selector": a unique CSS selector for the element. Prefer the id over the name.
2. "action_type": one of "FILL_TEXT", "SELECT_DROPDOWN", "CHECK_BOX", "SELECT_RADIO".
3. "value": the text to enter or option to pick; true/false for CHECK_BOX.

Rules:
- Text inputs and textareas always use "FILL_TEXT" with a string value.
- Interpret the instructions; write what the user means rather than copying their words.
- Emit at most one action per selector.
- Leave out any field you have no information for.

Return ONLY the JSON array."#;

/// Assemble the single prompt sent to the model.
pub fn build_prompt(primary_context: &str, instruction: &str, html_fields: &str) -> String {
    let instruction = if instruction.trim().is_empty() {
        DEFAULT_INSTRUCTION
    } else {
        instruction.trim()
    };
    let primary_context = if primary_context.trim().is_empty() {
        "(none provided)"
    } else {
        primary_context.trim()
    };
    fill_template(
        ACTION_PLAN_TEMPLATE,
        [primary_context, instruction, html_fields],
    )
}

const PLACEHOLDERS: [&str; 3] = ["{primary_context}", "{instruction}", "{html_fields}"];

/// Single left-to-right pass over the template; inserted values are never
/// scanned for placeholders themselves.
fn fill_template(template: &str, values: [&str; 3]) -> String {
    let extra: usize = values.iter().map(|v| v.len()).sum();
    let mut out = String::with_capacity(template.len() + extra);
    let mut rest = template;
    loop {
        let next = PLACEHOLDERS
            .iter()
            .zip(values)
            .filter_map(|(name, value)| rest.find(name).map(|at| (at, *name, value)))
            .min_by_key(|(at, _, _)| *at);
        let Some((at, name, value)) = next else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..at]);
        out.push_str(value);
        rest = &rest[at + name.len()..];
    }
}

/// Search query for one scanned field: the words a person would read off
/// the control, followed by the user's instruction when there is one.
pub fn field_query(field: &Value, instruction: &str) -> String {
    let mut parts = Vec::new();
    collect_field_words(field, &mut parts);
    let instruction = instruction.trim();
    if !instruction.is_empty() {
        parts.push(instruction.to_string());
    }
    parts.join(" ")
}

fn collect_field_words(field: &Value, out: &mut Vec<String>) {
    match field {
        Value::String(html) => out.extend(describe_html(html)),
        Value::Array(items) => items.iter().for_each(|v| collect_field_words(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_field_words(v, out)),
        _ => {}
    }
}

const DESCRIPTIVE_ATTRS: [&str; 5] = ["id", "name", "placeholder", "aria-label", "type"];

/// Visible text plus descriptive attribute values of an HTML snippet.
fn describe_html(html: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut rest = html;
    while let Some(open) = rest.find('<') {
        push_text(&rest[..open], &mut words);
        let Some(close) = rest[open..].find('>') else {
            rest = "";
            break;
        };
        let tag = &rest[open + 1..open + close];
        for attr in DESCRIPTIVE_ATTRS {
            if let Some(value) = attribute(tag, attr) {
                push_text(value, &mut words);
            }
        }
        rest = &rest[open + close + 1..];
    }
    push_text(rest, &mut words);
    words
}

fn push_text(text: &str, out: &mut Vec<String>) {
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.is_empty() {
        out.push(text);
    }
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let mut search = tag;
    loop {
        let at = search.find(name)?;
        let boundary = at == 0 || search[..at].ends_with(char::is_whitespace);
        let after = search[at + name.len()..].trim_start();
        search = &search[at + name.len()..];
        if !boundary {
            continue;
        }
        let Some(after_eq) = after.strip_prefix('=') else {
            continue;
        };
        let after_eq = after_eq.trim_start();
        let quote = after_eq.chars().next()?;
        if quote == '"' || quote == '\'' {
            let inner = &after_eq[1..];
            let end = inner.find(quote)?;
            return Some(&inner[..end]);
        }
        let end = after_eq
            .find(|c: char| c.is_whitespace() || c == '/')
            .unwrap_or(after_eq.len());
        return Some(&after_eq[..end]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_instruction_uses_default() {
        let prompt = build_prompt("- Name: Jane", "  ", "[]");
        assert!(prompt.contains(DEFAULT_INSTRUCTION));
        assert!(prompt.contains("- Name: Jane"));
        assert!(!prompt.contains("{instruction}"));
    }

    #[test]
    fn instruction_and_fields_are_embedded() {
        let prompt = build_prompt("", "use my work email", "[\"<input id=\\\"email\\\">\"]");
        assert!(prompt.contains("<AdditionalInstructions>\nuse my work email\n</AdditionalInstructions>"));
        assert!(prompt.contains("<input id=\\\"email\\\">"));
        assert!(prompt.contains("(none provided)"));
    }

    #[test]
    fn placeholder_text_in_user_data_stays_literal() {
        let prompt = build_prompt(
            "Nickname: {instruction}",
            "write {html_fields} verbatim",
            "[\"<input id=\\\"nick\\\">\"]",
        );
        assert!(prompt.contains("<PrimaryUserData>\nNickname: {instruction}\n</PrimaryUserData>"));
        assert!(prompt.contains(
            "<AdditionalInstructions>\nwrite {html_fields} verbatim\n</AdditionalInstructions>"
        ));
        assert_eq!(prompt.matches("<input id=").count(), 1);
    }

    #[test]
    fn field_html_containing_placeholders_is_inserted_once() {
        let prompt = build_prompt("Name: Jane", "", "[\"{primary_context}{html_fields}\"]");
        assert_eq!(prompt.matches("Name: Jane").count(), 1);
        assert!(prompt.contains("<HtmlFormFields>\n[\"{primary_context}{html_fields}\"]\n</HtmlFormFields>"));
    }

    #[test]
    fn query_reads_labels_and_attributes() {
        let field = json!(
            "<fieldset><label for=\"em\">Email address</label><input type=\"email\" id=\"em\" name='contact_email' placeholder=\"you@example.com\"></fieldset>"
        );
        let query = field_query(&field, "");
        assert!(query.contains("Email address"));
        assert!(query.contains("contact_email"));
        assert!(query.contains("you@example.com"));
        assert!(query.contains("email"));
        assert!(!query.contains('<'));
    }

    #[test]
    fn attribute_match_requires_a_word_boundary() {
        assert_eq!(attribute("input data-name=\"x\" name=\"y\"", "name"), Some("y"));
        assert_eq!(attribute("input id=plain", "id"), Some("plain"));
        assert_eq!(attribute("input disabled", "id"), None);
    }

    #[test]
    fn query_appends_instruction_and_walks_objects() {
        let field = json!({"label": "Phone", "html": "<input name=\"tel\">"});
        let query = field_query(&field, "use my office number");
        assert!(query.contains("Phone"));
        assert!(query.contains("tel"));
        assert!(query.ends_with("use my office number"));
    }
}
