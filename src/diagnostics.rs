//! Hints attached to queries that came back empty.
//!
//! Everything here is pure: the same context always yields the same hints.

use serde::Serialize;

use crate::backend::BackendKind;
use crate::materialize::{Emptiness, MaterializedResult};
use crate::resolver::TimeRange;

#[derive(Debug, Clone)]
pub struct HintContext<'a> {
    pub backend: &'a BackendKind,
    pub query: &'a str,
    pub processed_query: &'a str,
    pub range: Option<TimeRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub summary: String,
    pub possible_causes: Vec<String>,
    pub suggested_actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub debug: Option<DebugInfo>,
}

/// Hints for `result`, or `None` when it holds data.
pub fn diagnose(result: &MaterializedResult, ctx: &HintContext<'_>) -> Option<Diagnostics> {
    match result.emptiness() {
        Emptiness::HasData => None,
        emptiness => Some(build_hints(ctx, emptiness)),
    }
}

pub fn build_hints(ctx: &HintContext<'_>, emptiness: Emptiness) -> Diagnostics {
    let mut hints = match ctx.backend {
        BackendKind::Prometheus => prometheus_hints(ctx.query),
        BackendKind::Loki => loki_hints(ctx.query),
        BackendKind::ClickHouse => clickhouse_hints(),
        BackendKind::CloudWatch => cloudwatch_hints(),
        BackendKind::InfluxDb | BackendKind::Other(_) => generic_hints(),
    };

    if emptiness == Emptiness::AllNaN {
        hints.possible_causes.insert(
            0,
            "Series were found but every sample is NaN (for example a rate over too few points or a division by zero)"
                .to_string(),
        );
        hints.suggested_actions.insert(
            0,
            "Check your window: widen the time range or the range-vector interval so each series has enough samples"
                .to_string(),
        );
    }

    hints.debug = debug_info(ctx);
    hints
}

fn debug_info(ctx: &HintContext<'_>) -> Option<DebugInfo> {
    let processed_query = Some(ctx.processed_query)
        .filter(|p| !p.is_empty() && *p != ctx.query)
        .map(str::to_string);
    let time_range = ctx.range.map(|r| r.describe());

    if processed_query.is_none() && time_range.is_none() {
        return None;
    }
    Some(DebugInfo {
        processed_query,
        time_range,
    })
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn hints(summary: &str, causes: &[&str], actions: &[&str]) -> Diagnostics {
    Diagnostics {
        summary: summary.to_string(),
        possible_causes: strings(causes),
        suggested_actions: strings(actions),
        debug: None,
    }
}

fn prometheus_hints(query: &str) -> Diagnostics {
    let mut h = hints(
        "The Prometheus query returned no data for the specified time range.",
        &[
            "The metric may not exist in this Prometheus instance",
            "The label selectors may not match any time series",
            "The time range may be outside when the metric was being scraped",
            "The scrape target may be down or not configured",
        ],
        &[
            "Use list_prometheus_metric_names to verify the metric exists",
            "Use list_prometheus_label_values to check available label values",
            "Try expanding the time range to see if data exists in a different period",
            "Verify the scrape configuration and target health in Prometheus",
        ],
    );

    let lower = query.to_lowercase();
    if lower.contains("rate(") || lower.contains("irate(") {
        h.possible_causes
            .push("Rate functions require at least two data points within the range vector window".to_string());
    }
    if lower.contains("histogram_quantile") {
        h.possible_causes
            .push("Histogram quantile requires histogram buckets (le labels) to be present".to_string());
    }
    if query.contains('{') && query.contains('}') {
        h.suggested_actions
            .push("Try removing or simplifying label matchers to broaden the search".to_string());
    }
    h
}

fn loki_hints(query: &str) -> Diagnostics {
    let mut h = hints(
        "The Loki query returned no log entries for the specified time range.",
        &[
            "The stream selector labels may not match any log streams",
            "No logs were ingested during the specified time range",
            "The filter expression may be too restrictive",
            "The label values in the selector may be misspelled or incorrect",
        ],
        &[
            "Use list_loki_label_names to verify available labels",
            "Use list_loki_label_values to check values for specific labels",
            "Use query_loki_stats to check if logs exist for the stream selector",
            "Try expanding the time range to see if logs exist in a different period",
        ],
    );

    if ["|=", "!=", "|~", "!~"].iter().any(|op| query.contains(op)) {
        h.possible_causes
            .push("Line filter expressions may be filtering out all matching logs".to_string());
    }
    if query.contains("| json") || query.contains("| logfmt") {
        h.possible_causes
            .push("Log parsing may fail if logs are not in the expected format".to_string());
    }
    if query.contains('|') {
        h.suggested_actions
            .push("Try removing pipeline stages to see if the base stream selector matches any logs".to_string());
    }
    if query.contains("=~") {
        h.suggested_actions.push(
            "Verify regex patterns are correct - use list_loki_label_values to see actual values".to_string(),
        );
    }
    h
}

fn clickhouse_hints() -> Diagnostics {
    hints(
        "The ClickHouse query returned no rows for the specified parameters.",
        &[
            "The table may not contain data for the specified time range",
            "The WHERE clause filters may not match any rows",
            "The table or column names may be incorrect",
            "The time column filter may use an incorrect format",
        ],
        &[
            "Use list_clickhouse_tables to verify the table exists",
            "Use describe_clickhouse_table to check column names and types",
            "Try removing WHERE clause filters to see if the table contains data",
            "Verify time parameters are in Unix milliseconds format",
        ],
    )
}

fn cloudwatch_hints() -> Diagnostics {
    hints(
        "The CloudWatch query returned no data for the specified time range.",
        &[
            "The metric may not exist in the specified namespace",
            "The dimension values may not match any metrics",
            "The time range may be outside the data retention period",
            "The metric may not have been published during this time period",
        ],
        &[
            "Use list_cloudwatch_namespaces to verify available namespaces",
            "Use list_cloudwatch_metrics to check metrics in the namespace",
            "Use list_cloudwatch_dimensions to verify dimension values",
            "Try expanding the time range - CloudWatch data may have ingestion delays",
        ],
    )
}

fn generic_hints() -> Diagnostics {
    hints(
        "The query returned no data for the specified parameters.",
        &[
            "No data exists for the specified query parameters",
            "The time range may not contain any data",
            "The query filters may be too restrictive",
        ],
        &[
            "Try expanding the time range",
            "Review and simplify query filters",
            "Verify that the data source is configured correctly",
        ],
    )
}
