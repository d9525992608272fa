use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use jaq_interpret::{Ctx, FilterT, ParseCtx, RcIter, Val};
use log::{debug, warn};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::interpolate::interpolate;
use crate::message::Message;
use crate::secrets::SecretCache;
use crate::types::{
    AggregatedMetricsAnalysis, AuthType, ExperimentResource, MetricSpec, Method, VersionDetail,
    VersionMetric,
};

/// Per-request timeout for metric backends. There are no retries.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// A fully resolved request against one metrics backend for one version.
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub url: String,
    pub method: Method,
    pub params: Option<Vec<(String, String)>>,
    pub headers: BTreeMap<String, String>,
    pub basic_auth: Option<(String, String)>,
    pub body: Option<Value>,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
        }
    }
}

/// Interpolation arguments for params and body: the version name, the
/// version's variables, and the elapsed experiment time in whole seconds.
fn version_args(version: &VersionDetail, start_time: DateTime<Utc>) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    args.insert("name".to_string(), version.name.clone());
    if let Some(variables) = &version.variables {
        for variable in variables {
            args.insert(variable.name.clone(), variable.value.clone());
        }
    }
    let elapsed = (Utc::now() - start_time).num_seconds();
    args.insert("elapsedTime".to_string(), elapsed.to_string());
    args
}

async fn resolve_url(spec: &MetricSpec, secrets: &SecretCache) -> Result<String> {
    match &spec.secret {
        None => Ok(spec.url_template.clone()),
        Some(reference) => {
            let data = secrets.get_for_ref(reference).await?;
            Ok(interpolate(&spec.url_template, Some(&data)))
        }
    }
}

/// Header values are interpolated against secret data only for auth modes
/// that place secret material in headers (Bearer, APIKey); Basic and absent
/// auth use the templates verbatim.
async fn resolve_headers(
    spec: &MetricSpec,
    secrets: &SecretCache,
) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    let Some(templates) = &spec.header_templates else {
        return Ok(headers);
    };
    for item in templates {
        headers.insert(item.name.clone(), item.value.clone());
    }
    if !matches!(spec.auth_type, Some(AuthType::Bearer) | Some(AuthType::ApiKey)) {
        return Ok(headers);
    }
    let Some(reference) = &spec.secret else {
        return Ok(headers);
    };
    let data = secrets.get_for_ref(reference).await?;
    for value in headers.values_mut() {
        *value = interpolate(value, Some(&data));
    }
    Ok(headers)
}

/// Basic-auth credentials come from the `username` and `password` fields of
/// the referenced secret; both must be present.
async fn resolve_basic_auth(
    spec: &MetricSpec,
    secrets: &SecretCache,
) -> Result<(String, String)> {
    let Some(reference) = &spec.secret else {
        return Err(Error::QueryError("basic auth requires a secret".into()));
    };
    let data = secrets.get_for_ref(reference).await?;
    match (data.get("username"), data.get("password")) {
        (Some(username), Some(password)) => Ok((username.clone(), password.clone())),
        _ => Err(Error::QueryError(
            "username and password keys missing in secret data".into(),
        )),
    }
}

fn resolve_params(
    spec: &MetricSpec,
    args: &BTreeMap<String, String>,
) -> Option<Vec<(String, String)>> {
    let templates = spec.params.as_ref()?;
    let params: Vec<(String, String)> = templates
        .iter()
        .map(|param| (param.name.clone(), interpolate(&param.value, Some(args))))
        .collect();
    if params.is_empty() {
        None
    } else {
        Some(params)
    }
}

fn resolve_body(spec: &MetricSpec, args: &BTreeMap<String, String>) -> Result<Option<Value>> {
    let Some(template) = &spec.body else {
        return Ok(None);
    };
    let rendered = interpolate(template, Some(args));
    let body = serde_json::from_str(&rendered)?;
    Ok(Some(body))
}

/// Resolve URL, headers, auth, params, and body for one `(metric, version)`
/// pair. A secret failure is fatal for this pair only.
pub async fn build_query(
    spec: &MetricSpec,
    version: &VersionDetail,
    start_time: DateTime<Utc>,
    secrets: &SecretCache,
) -> Result<MetricQuery> {
    let url = resolve_url(spec, secrets).await?;
    let headers = resolve_headers(spec, secrets).await?;
    let basic_auth = match spec.auth_type {
        Some(AuthType::Basic) => Some(resolve_basic_auth(spec, secrets).await?),
        _ => None,
    };
    let args = version_args(version, start_time);
    let params = resolve_params(spec, &args);
    let body = resolve_body(spec, &args)?;
    Ok(MetricQuery {
        url,
        method: spec.method,
        params,
        headers,
        basic_auth,
        body,
    })
}

/// Apply a jq program to a backend response and return its first yielded
/// value, which must be a finite number.
pub fn unmarshal(response: &Value, jq_expression: &str) -> Result<f64> {
    let mut defs = ParseCtx::new(Vec::new());
    defs.insert_natives(jaq_core::core());
    defs.insert_defs(jaq_std::std());

    let (parsed, parse_errs) = jaq_parse::parse(jq_expression, jaq_parse::main());
    if !parse_errs.is_empty() || parsed.is_none() {
        return Err(Error::JqError(format!(
            "cannot parse jq expression {jq_expression:?}"
        )));
    }
    let filter = defs.compile(parsed.expect("checked above"));
    if !defs.errs.is_empty() {
        return Err(Error::JqError(format!(
            "cannot compile jq expression {jq_expression:?}"
        )));
    }

    let inputs = RcIter::new(core::iter::empty());
    let mut outputs = filter.run((Ctx::new([], &inputs), Val::from(response.clone())));
    let first = outputs
        .next()
        .ok_or_else(|| Error::JqError(format!("{jq_expression:?} yielded no value")))?
        .map_err(|err| Error::JqError(err.to_string()))?;

    Value::from(first)
        .as_f64()
        .filter(|number| number.is_finite())
        .ok_or_else(|| Error::JqError("metrics response did not yield a finite number".into()))
}

/// Execute a built query and extract the metric value from its JSON
/// response. Non-2xx statuses, transport errors, non-JSON bodies, and
/// non-numeric extractions are all errors.
pub async fn fetch_metric_value(
    client: &reqwest::Client,
    query: &MetricQuery,
    jq_expression: &str,
) -> Result<f64> {
    let mut request = client
        .request(query.method.into(), &query.url)
        .timeout(REQUEST_TIMEOUT);
    if let Some(params) = &query.params {
        request = request.query(params);
    }
    for (name, value) in &query.headers {
        request = request.header(name, value);
    }
    if let Some((username, password)) = &query.basic_auth {
        request = request.basic_auth(username, Some(password));
    }
    if let Some(body) = &query.body {
        request = request.json(body);
    }

    debug!("querying {} {}", &query.url, jq_expression);
    let response = request.send().await?.error_for_status()?;
    let payload: Value = response.json().await?;
    unmarshal(&payload, jq_expression)
}

async fn query_one(
    client: &reqwest::Client,
    secrets: &SecretCache,
    spec: &MetricSpec,
    version: &VersionDetail,
    start_time: DateTime<Utc>,
) -> Result<f64> {
    let query = build_query(spec, version, start_time, secrets).await?;
    fetch_metric_value(client, &query, &spec.jq_expression).await
}

/// Fetch every metric for every version and aggregate the results.
///
/// All `(metric, version)` fetches are independent; they fan out with a
/// bounded concurrency cap and failures degrade to `null` values with
/// error-level messages. Output ordering is deterministic regardless of
/// completion order.
pub async fn aggregate_metrics(
    expr: &ExperimentResource,
    client: &reqwest::Client,
    secrets: &SecretCache,
) -> AggregatedMetricsAnalysis {
    let mut analysis = AggregatedMetricsAnalysis::default();
    let mut messages: Vec<Message> = Vec::new();

    if expr.status.start_time > Utc::now() {
        messages.push(Message::error(
            "invalid startTime: greater than current time",
        ));
        analysis.message = Message::join(&messages);
        return analysis;
    }

    let Some(metric_infos) = &expr.status.metrics else {
        return analysis;
    };

    let versions = expr.versions();

    // every pair gets a cell up front, so failed fetches surface as nulls
    for info in metric_infos {
        let metric = analysis.data.entry(info.name.clone()).or_default();
        for version in &versions {
            metric
                .data
                .insert(version.name.clone(), VersionMetric::default());
        }
    }

    let pairs: Vec<(&str, &MetricSpec, &VersionDetail)> = metric_infos
        .iter()
        .flat_map(|info| {
            versions
                .iter()
                .map(move |version| (info.name.as_str(), &info.metric_obj.spec, *version))
        })
        .collect();

    let start_time = expr.status.start_time;
    let limit = metric_infos.len().max(1);
    let futures: Vec<std::pin::Pin<Box<dyn std::future::Future<Output = (usize, Result<f64>)> + Send + '_>>> =
        pairs
            .iter()
            .enumerate()
            .map(|(index, (_, spec, version))| {
                let fut = async move {
                    let outcome = query_one(client, secrets, spec, version, start_time).await;
                    (index, outcome)
                };
                Box::pin(fut) as std::pin::Pin<Box<dyn std::future::Future<Output = (usize, Result<f64>)> + Send + '_>>
            })
            .collect();
    let mut results: Vec<(usize, Result<f64>)> =
        stream::iter(futures).buffer_unordered(limit).collect().await;
    results.sort_by_key(|(index, _)| *index);

    for (index, outcome) in results {
        let (metric_name, _, version) = pairs[index];
        match outcome {
            Ok(value) => {
                if let Some(metric) = analysis.data.get_mut(metric_name) {
                    metric.data.insert(
                        version.name.clone(),
                        VersionMetric { value: Some(value) },
                    );
                }
            }
            Err(err) => {
                warn!(
                    "fetch failed for metric {metric_name} and version {}: {err}",
                    version.name
                );
                messages.push(Message::error(format!(
                    "error from metrics backend for metric {metric_name} and version {}: {err}",
                    version.name
                )));
            }
        }
    }

    analysis.message = Message::join(&messages);
    analysis
}
