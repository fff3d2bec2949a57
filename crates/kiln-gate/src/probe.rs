//! Synthetic endpoint probes
//!
//! Each probe is judged by its own rule. An endpoint that must always work
//! has to answer 200 with its required fields; an endpoint that validates
//! input may reject the deliberately incomplete probe body with 400.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// HTTP method of a probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProbeMethod {
    Get,
    Post,
}

/// How a probe response is judged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ProbeRule {
    /// 200 with every required top-level field present and non-null
    MustSucceed {
        #[serde(default)]
        required_fields: Vec<String>,
    },
    /// Any answer except 5xx or 404; a 400 validation rejection passes
    ValidatesInput,
}

/// One required endpoint of a candidate engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointProbe {
    pub name: String,
    pub method: ProbeMethod,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(flatten)]
    pub rule: ProbeRule,
}

impl EndpointProbe {
    /// GET probe that must succeed
    #[must_use]
    pub fn get(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            method: ProbeMethod::Get,
            path: path.into(),
            body: None,
            rule: ProbeRule::MustSucceed {
                required_fields: Vec::new(),
            },
        }
    }

    /// POST probe with a synthetic body, validating input
    #[must_use]
    pub fn post(name: impl Into<String>, path: impl Into<String>, body: Value) -> Self {
        Self {
            name: name.into(),
            method: ProbeMethod::Post,
            path: path.into(),
            body: Some(body),
            rule: ProbeRule::ValidatesInput,
        }
    }

    /// Require a 200 carrying these fields
    #[must_use]
    pub fn must_succeed<I, S>(mut self, required_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rule = ProbeRule::MustSucceed {
            required_fields: required_fields.into_iter().map(Into::into).collect(),
        };
        self
    }

    /// Accept a validation rejection
    #[inline]
    #[must_use]
    pub fn validates_input(mut self) -> Self {
        self.rule = ProbeRule::ValidatesInput;
        self
    }

    /// Judge a response
    ///
    /// # Errors
    /// Returns the failure reason when the response breaks the rule
    pub fn evaluate(&self, status: u16, body: &str) -> Result<(), String> {
        if status >= 500 {
            return Err(format!("server error (HTTP {status})"));
        }
        if status == 404 {
            return Err("endpoint not found (HTTP 404)".to_string());
        }
        match &self.rule {
            ProbeRule::ValidatesInput => Ok(()),
            ProbeRule::MustSucceed { required_fields } => {
                if status != 200 {
                    return Err(format!("expected HTTP 200, got {status}"));
                }
                if required_fields.is_empty() {
                    return Ok(());
                }
                let value: Value = serde_json::from_str(body)
                    .map_err(|e| format!("response is not json: {e}"))?;
                match required_fields
                    .iter()
                    .find(|f| value.get(f.as_str()).map_or(true, Value::is_null))
                {
                    Some(missing) => Err(format!("missing required field `{missing}`")),
                    None => Ok(()),
                }
            }
        }
    }
}

/// Probes run by default against a candidate engine
///
/// The POST bodies deliberately omit required fields.
#[must_use]
pub fn default_battery() -> Vec<EndpointProbe> {
    vec![
        EndpointProbe::get("health", "/health").must_succeed(["status"]),
        EndpointProbe::get("version", "/v1/version").must_succeed(["engine", "version"]),
        EndpointProbe::post("generate", "/v1/generate", json!({ "intent": "edit" })),
        EndpointProbe::post("chat", "/v1/chat", json!({ "intent": "chat" })),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn health() -> EndpointProbe {
        EndpointProbe::get("health", "/health").must_succeed(["status"])
    }

    #[test]
    fn must_succeed_rules() {
        let probe = health();
        assert!(probe.evaluate(200, r#"{"status":"ok"}"#).is_ok());
        assert!(probe.evaluate(500, "").unwrap_err().contains("server error"));
        assert!(probe.evaluate(404, "").unwrap_err().contains("not found"));
        assert!(probe.evaluate(400, "").unwrap_err().contains("expected HTTP 200"));
        assert!(probe.evaluate(204, "").is_err());
        assert_eq!(
            probe.evaluate(200, r#"{"state":"ok"}"#),
            Err("missing required field `status`".to_string())
        );
        assert!(probe.evaluate(200, r#"{"status":null}"#).is_err());
        assert!(probe.evaluate(200, "<html>").unwrap_err().contains("not json"));
    }

    #[test]
    fn validates_input_accepts_rejection() {
        let probe = EndpointProbe::post("generate", "/v1/generate", json!({}));
        assert!(probe.evaluate(400, r#"{"error":"text is required"}"#).is_ok());
        assert!(probe.evaluate(200, "").is_ok());
        assert!(probe.evaluate(502, "").is_err());
        assert!(probe.evaluate(404, "").is_err());
    }

    #[test]
    fn default_battery_shape() {
        let battery = default_battery();
        let names: Vec<_> = battery.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["health", "version", "generate", "chat"]);
        assert!(matches!(battery[2].rule, ProbeRule::ValidatesInput));
        assert!(battery[2].body.is_some());
    }

    #[test]
    fn probes_deserialize_from_config() {
        let probe: EndpointProbe = serde_json::from_value(json!({
            "name": "models",
            "method": "GET",
            "path": "/v1/models",
            "rule": "must_succeed",
            "required_fields": ["models"]
        }))
        .unwrap();
        assert_eq!(probe, EndpointProbe::get("models", "/v1/models").must_succeed(["models"]));
    }
}
