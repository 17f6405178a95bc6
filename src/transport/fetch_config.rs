//! Resolution of a request template into a concrete HTTP call

use reqwest::{Method, Url};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::http::SharedHttpClient;
use super::rate_limit::RateLimiter;
use super::template::RequestTemplate;
use super::timeseries::{TimestampStyle, Window};
use super::TransportError;

/// Fully resolved HTTP call
#[derive(Clone)]
pub struct FetchDescriptor {
    /// HTTP method
    pub method: Method,
    /// Absolute URL including the merged query string
    pub url: Url,
    /// Shared client performing the call
    pub client: SharedHttpClient,
    /// Limiter shared with every unit of the same template
    pub rate_limiter: Arc<RateLimiter>,
}

impl fmt::Debug for FetchDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchDescriptor")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("rate_limiter", &self.rate_limiter)
            .finish_non_exhaustive()
    }
}

impl FetchDescriptor {
    /// Resolve `template` against `base_url`, optionally for one time window.
    ///
    /// The endpoint is joined onto the base path segment-wise. Query
    /// parameters are merged in order: the base URL's own query, the
    /// template's static parameters, then the window's start/end values. The
    /// last write wins. No network call happens here.
    pub fn build(
        base_url: &Url,
        template: &RequestTemplate,
        window: Option<&Window>,
        client: &SharedHttpClient,
    ) -> Result<Self, TransportError> {
        let mut url = join_endpoint(base_url, &template.endpoint)?;

        let mut query: BTreeMap<String, String> = base_url.query_pairs().into_owned().collect();
        query.extend(template.query.iter().map(|(k, v)| (k.clone(), v.clone())));

        if let Some(window) = window {
            let timeseries = template.timeseries.as_ref().ok_or_else(|| {
                TransportError::Configuration(format!(
                    "window given for endpoint `{}` which has no timeseries",
                    template.endpoint
                ))
            })?;
            // Each bound keeps the shape of the value it replaces
            let style = |name: &str| {
                template
                    .query
                    .get(name)
                    .map(|value| TimestampStyle::of(value))
                    .unwrap_or_default()
            };
            let start = style(&timeseries.start_name).format(&window.start);
            let end = style(&timeseries.end_name).format(&window.end);
            query.insert(timeseries.start_name.clone(), start);
            query.insert(timeseries.end_name.clone(), end);
        }

        if query.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(query.iter());
        }

        Ok(Self {
            method: template.method.clone(),
            url,
            client: Arc::clone(client),
            rate_limiter: Arc::clone(&template.rate_limiter),
        })
    }
}

/// Join `endpoint` onto the path of `base_url` without doubling or losing `/`
pub fn join_endpoint(base_url: &Url, endpoint: &str) -> Result<Url, TransportError> {
    let mut url = base_url.clone();
    url.set_fragment(None);
    url.path_segments_mut()
        .map_err(|_| {
            TransportError::Configuration(format!("base URL `{base_url}` cannot carry a path"))
        })?
        .pop_if_empty()
        .extend(endpoint.split('/').filter(|segment| !segment.is_empty()));
    Ok(url)
}
