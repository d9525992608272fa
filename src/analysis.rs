use log::debug;
use reqwest::Client;

use crate::assessment::{version_assessments, winner_assessment};
use crate::config::AdvancedParameters;
use crate::metrics::{aggregate_metrics, REQUEST_TIMEOUT};
use crate::secrets::SecretCache;
use crate::types::{Analysis, ExperimentResource};
use crate::weights::compute_weights;

/// The assessment pipeline: metric aggregation, version assessment, winner
/// assessment, and weight recommendation, in that order.
///
/// The engine is stateless across calls apart from the secret cache; each
/// stage consumes only the outputs of its predecessors.
pub struct AnalyticsEngine {
    client: Client,
    secrets: SecretCache,
    params: AdvancedParameters,
}

impl AnalyticsEngine {
    pub fn new(secrets: SecretCache, params: AdvancedParameters) -> Self {
        Self {
            client: Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_else(|_| Client::new()),
            secrets,
            params,
        }
    }

    /// Run the four stages against an experiment resource.
    pub async fn analyze(&self, expr: &ExperimentResource) -> Analysis {
        let aggregated = aggregate_metrics(expr, &self.client, &self.secrets).await;
        let assessments = version_assessments(expr, &aggregated);
        let winner = winner_assessment(expr, &aggregated, &assessments);
        let weights = compute_weights(expr, &winner, &self.params);
        debug!("analysis complete for experiment starting {}", expr.status.start_time);
        Analysis {
            aggregated_metrics: Some(aggregated),
            version_assessments: Some(assessments),
            winner_assessment: Some(winner),
            weights: Some(weights),
        }
    }

    /// Analyze and attach the result; the only mutation of the resource.
    pub async fn assess(&self, mut expr: ExperimentResource) -> ExperimentResource {
        let analysis = self.analyze(&expr).await;
        expr.status.analysis = Some(analysis);
        expr
    }
}
