//! Placeholder substitution and push envelope construction.
//!
//! Grounded in the original `templates.Replace`/`ApnsMsg`/`GcmMsg`: a
//! flat `{{ path }}` grammar over a merged parameter map, and two fixed
//! envelope shapes keyed by [`Service`].

use entities::{MarathonError, Service};
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_.]+)\s*\}\}").unwrap());

/// Merge `defaults`, then `context`, then `extra` (later keys win),
/// shallow at the top level — this mirrors `params` in the original
/// builder, which is a single flat-ish map passed to `Replace`.
pub fn merge_params(layers: &[&Value]) -> Value {
  let mut merged = Map::new();
  for layer in layers {
    if let Value::Object(map) = layer {
      for (k, v) in map {
        merged.insert(k.clone(), v.clone());
      }
    }
  }
  Value::Object(merged)
}

/// Walks `path` (dot-separated) through `params`. A segment whose
/// current node is not an object yields `None`, which the caller
/// renders as the empty string. Never errors.
fn resolve<'a>(params: &'a Value, path: &str) -> Option<&'a Value> {
  let mut current = params;
  for segment in path.split('.') {
    match current {
      Value::Object(map) => current = map.get(segment)?,
      _ => return None,
    }
  }
  Some(current)
}

fn value_to_display(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

/// Replaces every `{{path}}` token in `body` with its resolved value
/// from `params`, rendering the empty string for anything missing.
/// Tokens are not re-scanned after substitution.
pub fn render(body: &str, params: &Value) -> String {
  TOKEN
    .replace_all(body, |caps: &regex::Captures| {
      let path = &caps[1];
      resolve(params, path)
        .map(value_to_display)
        .unwrap_or_default()
    })
    .into_owned()
}

/// Renders a JSON template body (itself serialized as a string, as the
/// original does via `json.Marshal(request.Message)`), then parses the
/// result back into a `Value`. A render that fails to parse is a
/// per-user [`MarathonError::RenderError`], not a batch-fatal error.
pub fn render_json(body: &Value, params: &Value) -> Result<Value, MarathonError> {
  let serialized = body.to_string();
  let rendered = render(&serialized, params);
  serde_json::from_str(&rendered)
    .map_err(|e| MarathonError::RenderError(e.to_string()))
}

/// Builds the push envelope for one user, per §4.2. `push_expiry` is
/// already in seconds (`job.expires_at / 1e9`).
pub fn build_envelope(
  service: Service,
  token: &str,
  push_expiry: i64,
  content: Value,
  metadata: &Value,
) -> Value {
  let metadata_present = !matches!(metadata, Value::Null)
    && metadata.as_object().map(|m| !m.is_empty()).unwrap_or(true);

  match service {
    Service::Apns => {
      let mut payload = Map::new();
      payload.insert("aps".into(), content);
      if metadata_present {
        payload.insert("m".into(), metadata.clone());
      }
      json!({
        "DeviceToken": token,
        "PushExpiry": push_expiry,
        "Payload": Value::Object(payload),
      })
    }
    Service::Gcm => {
      let mut data = match content {
        Value::Object(map) => map,
        other => {
          let mut m = Map::new();
          m.insert("value".into(), other);
          m
        }
      };
      if metadata_present {
        data.insert("m".into(), metadata.clone());
      }
      json!({
        "to": token,
        "push_expiry": push_expiry,
        "data": Value::Object(data),
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn renders_dotted_path() {
    let params = json!({"user": {"name": "Everyone"}});
    assert_eq!(render("hi {{user.name}}", &params), "hi Everyone");
  }

  #[test]
  fn renders_top_level_token() {
    let params = json!({"name": "Everyone"});
    assert_eq!(render("hi {{name}}", &params), "hi Everyone");
  }

  #[test]
  fn missing_path_renders_empty() {
    let params = json!({});
    assert_eq!(render("hi {{missing.path}}", &params), "hi ");
  }

  #[test]
  fn non_object_segment_renders_empty() {
    let params = json!({"name": "flat"});
    assert_eq!(render("{{name.sub}}", &params), "");
  }

  #[test]
  fn empty_params_clears_all_tokens() {
    let params = json!({});
    assert_eq!(
      render("{{a}} and {{b.c}}", &params),
      " and "
    );
  }

  #[test]
  fn render_is_pure() {
    let params = json!({"x": 1});
    let body = "val={{x}}";
    assert_eq!(render(body, &params), render(body, &params));
  }

  #[test]
  fn tokens_are_not_rescanned() {
    let params = json!({"a": "{{b}}", "b": "final"});
    assert_eq!(render("{{a}}", &params), "{{b}}");
  }

  #[test]
  fn merge_params_layers_later_wins() {
    let defaults = json!({"user_name": "Someone", "object_name": "village"});
    let context = json!({"user_name": "Everyone"});
    let merged = merge_params(&[&defaults, &context]);
    assert_eq!(merged["user_name"], "Everyone");
    assert_eq!(merged["object_name"], "village");
  }

  #[test]
  fn happy_path_gcm_envelope() {
    let defaults = json!({"user_name": "Someone", "object_name": "village"});
    let context = json!({"user_name": "Everyone"});
    let params = merge_params(&[&defaults, &context]);
    let body = json!({"alert": "{{user_name}} just liked your {{object_name}}!"});
    let rendered = render_json(&body, &params).unwrap();
    let metadata = json!({"k": "v"});
    let envelope = build_envelope(Service::Gcm, "T1", 1_700_000_000, rendered, &metadata);
    assert_eq!(
      envelope["data"]["alert"],
      "Everyone just liked your village!"
    );
    assert_eq!(envelope["push_expiry"], 1_700_000_000);
    assert_eq!(envelope["data"]["m"], metadata);
    assert_eq!(envelope["to"], "T1");
  }

  #[test]
  fn apns_envelope_shape() {
    let body = json!({"alert": "{{user_name}} just liked your {{object_name}}!"});
    let params = json!({"user_name": "Everyone", "object_name": "village"});
    let rendered = render_json(&body, &params).unwrap();
    let metadata = json!({"k": "v"});
    let envelope = build_envelope(Service::Apns, "T1", 1_700_000_000, rendered, &metadata);
    assert_eq!(
      envelope["Payload"]["aps"]["alert"],
      "Everyone just liked your village!"
    );
    assert_eq!(envelope["DeviceToken"], "T1");
    assert_eq!(envelope["Payload"]["m"], metadata);
  }

  #[test]
  fn metadata_omitted_when_empty() {
    let envelope = build_envelope(
      Service::Apns,
      "T1",
      1,
      json!({"alert": "hi"}),
      &Value::Null,
    );
    assert!(envelope["Payload"].get("m").is_none());
  }

  #[test]
  fn render_json_fails_on_malformed_result() {
    let body = json!("unquoted {{x}} value");
    let params = json!({"x": "broken \" json"});
    assert!(render_json(&body, &params).is_err());
  }
}
