//! Configurable passthrough for OpenAI-like endpoints.
//!
//! The body is the OpenAI shape with the endpoint's `params` merged underneath
//! and `param_mapping` renames applied last. Responses are decoded by the
//! OpenAI adapter.

use serde_json::{Map, Value};

use lingmo_types::chat::ChatCompletionRequest;
use lingmo_types::model::{Credential, ModelEndpoint};

use super::openai::canonical_body;
use super::{EncodedRequest, bearer_headers, merge_params};

/// Rename keys per `mapping`. A renamed value replaces any value already
/// sent under the target name.
fn apply_mapping(
    body: Map<String, Value>,
    mapping: &std::collections::BTreeMap<String, String>,
) -> Map<String, Value> {
    if mapping.is_empty() {
        return body;
    }
    let mut out = Map::with_capacity(body.len());
    let mut renamed = Vec::new();
    for (k, v) in body {
        match mapping.get(&k) {
            Some(target) if !target.is_empty() => renamed.push((target.clone(), v)),
            _ => {
                out.insert(k, v);
            }
        }
    }
    for (target, v) in renamed {
        out.insert(target, v);
    }
    out
}

pub(super) fn encode(
    endpoint: &ModelEndpoint,
    credential: Option<&Credential>,
    request: &ChatCompletionRequest,
    stream: bool,
) -> EncodedRequest {
    let body = merge_params(
        &endpoint.params,
        canonical_body(&endpoint.model_name, request, stream),
    );
    let body = apply_mapping(body, &endpoint.param_mapping);
    EncodedRequest::json(
        endpoint.url(),
        bearer_headers(credential, stream),
        &Value::Object(body),
    )
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::apply_mapping;
    use crate::adapter::Adapter;
    use crate::testing::{endpoint, user_request};
    use lingmo_types::model::ApiSpec;

    #[test]
    fn params_merged_and_keys_renamed() {
        let mut ep = endpoint(5, 1, ApiSpec::Custom);
        ep.params.insert("top_k".into(), json!(40));
        ep.params.insert("max_tokens".into(), json!(256));
        ep.param_mapping
            .insert("max_tokens".into(), "max_output_tokens".into());

        let mut req = user_request("hi");
        req.extra.insert("seed".into(), json!(7));

        let body = Adapter::Custom
            .encode(&ep, &req, false)
            .unwrap()
            .body_json()
            .unwrap();
        assert_eq!(body["top_k"], 40);
        assert_eq!(body["max_output_tokens"], 256);
        assert!(body.get("max_tokens").is_none());
        assert_eq!(body["seed"], 7);
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn credential_is_optional() {
        let mut ep = endpoint(5, 1, ApiSpec::Custom);
        ep.credential = None;
        let encoded = Adapter::Custom.encode(&ep, &user_request("hi"), false).unwrap();
        assert!(encoded.header("authorization").is_none());
    }

    #[test]
    fn renamed_key_wins_over_existing_target() {
        let body = json!({"max_output_tokens": 64, "max_tokens": 256, "n": 1});
        let Value::Object(body) = body else {
            unreachable!()
        };
        // Target sorts both before and after the source key.
        let mapping = [
            ("max_tokens".to_string(), "max_output_tokens".to_string()),
            ("n".to_string(), "a_count".to_string()),
        ]
        .into_iter()
        .collect();
        let mut with_earlier = body.clone();
        with_earlier.insert("a_count".into(), json!(9));

        let mapped = apply_mapping(body, &mapping);
        assert_eq!(mapped["max_output_tokens"], 256);
        assert!(mapped.get("max_tokens").is_none());

        let mapped = apply_mapping(with_earlier, &mapping);
        assert_eq!(mapped["a_count"], 1);
        assert!(mapped.get("n").is_none());
    }
}
