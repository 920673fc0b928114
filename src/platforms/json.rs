use serde::Deserialize;
use serde_json::Value;

/// Look up a dotted field path such as `.status.phase` or
/// `{.status.conditions[0].type}` (kubectl jsonpath braces are accepted).
///
/// `[?key=value]` selects the first array element whose `key` renders to
/// `value`, e.g. `.status.conditions[?type=Deployed].status`.
pub fn extract<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path
        .trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .trim_start_matches('.');
    if path.is_empty() {
        return Some(value);
    }

    let mut current = value;
    for segment in path.split('.') {
        let (field, indexes) = match segment.find('[') {
            Some(pos) => segment.split_at(pos),
            None => (segment, ""),
        };
        if !field.is_empty() {
            current = current.get(field)?;
        }
        for selector in indexes.split('[').skip(1) {
            let selector = selector.strip_suffix(']')?;
            current = match selector.strip_prefix('?') {
                Some(filter) => select(current, filter)?,
                None => current.get(selector.parse::<usize>().ok()?)?,
            };
        }
    }
    Some(current)
}

fn select<'a>(array: &'a Value, filter: &str) -> Option<&'a Value> {
    let (key, expected) = filter.split_once('=')?;
    let expected = expected.trim().trim_matches(&['"', '\''][..]);
    array
        .as_array()?
        .iter()
        .find(|item| item.get(key.trim()).map(render).as_deref() == Some(expected))
}

/// Render a field value for comparison with plain strings: strings without
/// quotes, everything else as compact JSON.
pub fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Condition on one field of a listed item. With neither `equals` nor
/// `prefix` it only requires the field to be set.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FieldMatch {
    pub field: String,
    #[serde(default)]
    pub equals: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
}

impl FieldMatch {
    pub fn matches(&self, item: &Value) -> bool {
        let Some(actual) = extract(item, &self.field).map(render) else {
            return false;
        };
        self.equals.as_ref().map_or(true, |e| &actual == e)
            && self.prefix.as_ref().map_or(true, |p| actual.starts_with(p.as_str()))
    }
}

/// Apply `patch` onto `target` with JSON merge patch semantics: objects merge
/// recursively, `null` removes a key, anything else replaces.
pub fn merge(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_nested_and_indexed() {
        let pod = json!({
            "status": {
                "phase": "Running",
                "conditions": [{"type": "Ready", "status": "True"}]
            }
        });
        assert_eq!(extract(&pod, ".status.phase"), Some(&json!("Running")));
        assert_eq!(
            extract(&pod, "{.status.conditions[0].type}"),
            Some(&json!("Ready"))
        );
        assert_eq!(extract(&pod, "status.conditions[1]"), None);
        assert_eq!(extract(&pod, ".spec.nodeName"), None);
        assert_eq!(extract(&pod, "."), Some(&pod));
    }

    #[test]
    fn test_extract_selects_condition_by_type() {
        let central = json!({
            "status": {
                "conditions": [
                    {"type": "Initialized", "status": "True"},
                    {"type": "Deployed", "status": "False", "reason": "InstallError"},
                    {"type": "ReleaseFailed", "status": "True"}
                ]
            }
        });
        assert_eq!(
            extract(&central, ".status.conditions[?type=Deployed].status"),
            Some(&json!("False"))
        );
        assert_eq!(
            extract(&central, r#".status.conditions[?type="Deployed"].reason"#),
            Some(&json!("InstallError"))
        );
        assert_eq!(extract(&central, ".status.conditions[?type=Irreconcilable]"), None);
        assert_eq!(extract(&central, ".status[?type=Deployed]"), None);
    }

    #[test]
    fn test_field_match() {
        let pod = json!({"metadata": {"name": "frontend-7c9"}, "status": {"phase": "Running", "succeeded": true}});
        let by = |field: &str, equals: Option<&str>, prefix: Option<&str>| FieldMatch {
            field: field.into(),
            equals: equals.map(String::from),
            prefix: prefix.map(String::from),
        };

        assert!(by(".metadata.name", None, Some("frontend-")).matches(&pod));
        assert!(by(".status.phase", Some("Running"), None).matches(&pod));
        assert!(by(".status.succeeded", Some("true"), None).matches(&pod));
        assert!(!by(".metadata.name", None, Some("backend-")).matches(&pod));
        assert!(!by(".status.phase", Some("Pending"), None).matches(&pod));
        assert!(!by(".spec.nodeName", None, None).matches(&pod));
    }

    #[test]
    fn test_render_strips_string_quotes() {
        assert_eq!(render(&json!("Running")), "Running");
        assert_eq!(render(&json!(3)), "3");
        assert_eq!(render(&json!(true)), "true");
    }

    #[test]
    fn test_merge_keeps_unmentioned_fields() {
        let mut observed = json!({
            "id": "io.stackrox.authz.permissionset.1",
            "name": "Metrics Reader",
            "resourceToAccess": {"Administration": "READ_ACCESS"},
            "traits": {"origin": "IMPERATIVE"}
        });
        merge(
            &mut observed,
            &json!({"resourceToAccess": {"Cluster": "READ_ACCESS"}, "traits": null}),
        );
        assert_eq!(
            observed,
            json!({
                "id": "io.stackrox.authz.permissionset.1",
                "name": "Metrics Reader",
                "resourceToAccess": {"Administration": "READ_ACCESS", "Cluster": "READ_ACCESS"}
            })
        );
    }

    #[test]
    fn test_merge_replaces_arrays() {
        let mut observed = json!({"rules": [1, 2, 3]});
        merge(&mut observed, &json!({"rules": [4]}));
        assert_eq!(observed, json!({"rules": [4]}));
    }
}
