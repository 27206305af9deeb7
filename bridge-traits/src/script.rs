//! Embedded Web Content Script Host
//!
//! The host surface that runs the embedded web application (a web view in a
//! dialog, an in-app browser, ...). The core only needs one capability from
//! it: evaluating a script in the page so results can be handed back to the
//! callbacks the web content registered.

use crate::error::Result;

/// Evaluates scripts inside the embedded web content.
///
/// Called from the interactive context only.
pub trait ScriptHost: Send + Sync {
    fn evaluate_script(&self, script: &str) -> Result<()>;
}

/// Builds `window['<callback>'](<result>, <error>)` with every argument
/// emitted as a JSON literal so quotes, backslashes and line breaks in the
/// payload cannot break out of the call.
pub fn callback_script(callback: &str, result: Option<&str>, error: Option<&str>) -> String {
    fn literal(value: Option<&str>) -> String {
        match value {
            Some(text) => serde_json::Value::String(text.to_string()).to_string(),
            None => "null".to_string(),
        }
    }

    format!(
        "window[{}]({}, {})",
        literal(Some(callback)),
        literal(result),
        literal(error)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_script() {
        assert_eq!(
            callback_script("cb_1", Some("true"), None),
            r#"window["cb_1"]("true", null)"#
        );
    }

    #[test]
    fn test_error_script_escapes_payload() {
        let script = callback_script("cb", None, Some(r#"{"area":"Login's"}"#));
        assert_eq!(script, r#"window["cb"](null, "{\"area\":\"Login's\"}")"#);
    }

    #[test]
    fn test_callback_name_cannot_break_out() {
        let script = callback_script("x']);alert(1);//", Some(""), None);
        assert!(script.starts_with(r#"window["x']);alert(1);//"]"#));
    }
}
