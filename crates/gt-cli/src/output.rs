//! Shared output conventions: `✓`/`!`/`✗` prefixes for text, and the
//! `{ok, warnings, errors, ...}` envelope for `--json`.

use serde_json::Value;

pub fn ok(msg: &str) {
    println!("✓ {msg}");
}

pub fn warn(msg: &str) {
    println!("! {msg}");
}

pub fn err(msg: &str) {
    eprintln!("✗ {msg}");
}

/// Emit the standard JSON envelope. `payload` keys are merged in at the
/// top level next to `ok`/`warnings`/`errors`.
pub fn emit_json(ok: bool, warnings: &[String], errors: &[String], payload: Value) {
    let mut envelope = serde_json::json!({
        "ok": ok,
        "warnings": warnings,
        "errors": errors,
    });
    if let (Some(env_map), Value::Object(payload_map)) = (envelope.as_object_mut(), payload) {
        for (key, value) in payload_map {
            env_map.insert(key, value);
        }
    }
    println!("{}", serde_json::to_string_pretty(&envelope).unwrap_or_default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_merges_payload() {
        // Shape only — stdout is not captured here.
        let mut envelope = serde_json::json!({"ok": true, "warnings": [], "errors": []});
        let payload = serde_json::json!({"session": "gt-gastown-Toast"});
        if let (Some(env_map), Value::Object(payload_map)) =
            (envelope.as_object_mut(), payload)
        {
            for (key, value) in payload_map {
                env_map.insert(key, value);
            }
        }
        assert_eq!(envelope["session"], "gt-gastown-Toast");
        assert_eq!(envelope["ok"], true);
    }
}
