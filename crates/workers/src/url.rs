// Copyright The AIPerf Authors
// SPDX-License-Identifier: Apache-2.0

//! Request URL assembly.

use aiperf_config::EndpointConfig;

/// Builds the request URL for one call.
///
/// The path is `custom_endpoint` when set, else the endpoint type's default
/// path. A single trailing `/v1` on the base URL is deduplicated against a
/// default path that begins with `/v1`, so `http://host/v1` plus
/// `/v1/chat/completions` yields `http://host/v1/chat/completions`, not a
/// doubled prefix. `endpoint_params` are merged into the query string,
/// overriding pre-existing keys.
#[must_use]
pub fn build_url(endpoint: &EndpointConfig) -> String {
    let mut base = endpoint.base_url.trim_end_matches('/').to_string();

    let path = match &endpoint.custom_endpoint {
        Some(custom) => {
            let custom = custom.trim_start_matches('/');
            format!("/{custom}")
        }
        None => {
            let path = endpoint.endpoint_type.path();
            if base.ends_with("/v1")
                && let Some(stripped) = path.strip_prefix("/v1")
            {
                base.truncate(base.len() - "/v1".len());
                format!("/v1{stripped}")
            } else {
                path.to_string()
            }
        }
    };

    let mut url = format!("{base}{path}");
    if !endpoint.endpoint_params.is_empty() {
        // Existing query keys are overridden by endpoint params.
        let (without_query, existing) = match url.split_once('?') {
            Some((prefix, query)) => (prefix.to_string(), query.to_string()),
            None => (url.clone(), String::new()),
        };
        let mut params: Vec<(String, String)> = existing
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| match pair.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (pair.to_string(), String::new()),
            })
            .filter(|(k, _)| !endpoint.endpoint_params.contains_key(k))
            .collect();
        for (key, value) in &endpoint.endpoint_params {
            params.push((key.clone(), value.clone()));
        }
        let query: Vec<String> =
            params.into_iter().map(|(k, v)| format!("{k}={v}")).collect();
        url = format!("{without_query}?{}", query.join("&"));
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiperf_config::{EndpointType, ModelSelectionStrategy};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn endpoint(base_url: &str, endpoint_type: EndpointType) -> EndpointConfig {
        EndpointConfig {
            endpoint_type,
            base_url: base_url.to_string(),
            custom_endpoint: None,
            streaming: false,
            model_names: vec!["m".to_string()],
            model_selection_strategy: ModelSelectionStrategy::RoundRobin,
            endpoint_params: BTreeMap::new(),
            request_timeout_sec: 600.0,
        }
    }

    #[test]
    fn appends_the_default_path() {
        let url = build_url(&endpoint("http://localhost:8000", EndpointType::Chat));
        assert_eq!(url, "http://localhost:8000/v1/chat/completions");
    }

    #[test]
    fn deduplicates_a_trailing_v1() {
        let url = build_url(&endpoint("http://localhost:8000/v1", EndpointType::Chat));
        assert_eq!(url, "http://localhost:8000/v1/chat/completions");
        let url = build_url(&endpoint("http://localhost:8000/v1/", EndpointType::Completions));
        assert_eq!(url, "http://localhost:8000/v1/completions");
    }

    #[test]
    fn custom_endpoint_overrides_dedup() {
        let mut config = endpoint("http://localhost:8000/v1", EndpointType::Chat);
        config.custom_endpoint = Some("/v1/custom/chat".to_string());
        // A custom endpoint is taken literally against the base URL.
        assert_eq!(build_url(&config), "http://localhost:8000/v1/v1/custom/chat");
        config.custom_endpoint = Some("serve/generate".to_string());
        assert_eq!(build_url(&config), "http://localhost:8000/v1/serve/generate");
    }

    #[test]
    fn non_v1_paths_are_not_deduplicated() {
        let url = build_url(&endpoint(
            "http://localhost:8000/v1",
            EndpointType::HuggingfaceGenerate,
        ));
        assert_eq!(url, "http://localhost:8000/v1/generate");
    }

    #[test]
    fn endpoint_params_merge_and_override() {
        let mut config = endpoint("http://localhost:8000", EndpointType::Embeddings);
        let _ = config.endpoint_params.insert("api-version".to_string(), "2".to_string());
        let _ = config.endpoint_params.insert("tenant".to_string(), "blue".to_string());
        assert_eq!(
            build_url(&config),
            "http://localhost:8000/v1/embeddings?api-version=2&tenant=blue"
        );

        config.custom_endpoint = Some("/v1/embeddings?api-version=1&keep=yes".to_string());
        assert_eq!(
            build_url(&config),
            "http://localhost:8000/v1/embeddings?keep=yes&api-version=2&tenant=blue"
        );
    }
}
