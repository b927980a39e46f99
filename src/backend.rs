use std::fmt;

/// Observability backend behind a datasource, derived from the Grafana
/// plugin type string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Prometheus,
    Loki,
    ClickHouse,
    CloudWatch,
    InfluxDb,
    Other(String),
}

impl BackendKind {
    /// `grafana-clickhouse-datasource`, `prometheus`, `influxdb`, ... are all
    /// accepted; matching is by case-insensitive containment.
    pub fn from_type(datasource_type: &str) -> Self {
        let lower = datasource_type.trim().to_lowercase();
        if lower.contains("prometheus") {
            BackendKind::Prometheus
        } else if lower.contains("loki") {
            BackendKind::Loki
        } else if lower.contains("clickhouse") {
            BackendKind::ClickHouse
        } else if lower.contains("cloudwatch") {
            BackendKind::CloudWatch
        } else if lower.contains("influx") {
            BackendKind::InfluxDb
        } else {
            BackendKind::Other(lower)
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            BackendKind::Prometheus => "prometheus",
            BackendKind::Loki => "loki",
            BackendKind::ClickHouse => "clickhouse",
            BackendKind::CloudWatch => "cloudwatch",
            BackendKind::InfluxDb => "influxdb",
            BackendKind::Other(t) => t,
        }
    }

    /// Name of the query-model property holding the query text.
    pub fn expression_key(&self) -> &'static str {
        match self {
            BackendKind::Prometheus | BackendKind::Loki => "expr",
            BackendKind::ClickHouse => "rawSql",
            BackendKind::CloudWatch => "expression",
            BackendKind::InfluxDb | BackendKind::Other(_) => "query",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_type() {
        assert_eq!(BackendKind::from_type("prometheus"), BackendKind::Prometheus);
        assert_eq!(BackendKind::from_type("Loki"), BackendKind::Loki);
        assert_eq!(BackendKind::from_type("grafana-clickhouse-datasource"), BackendKind::ClickHouse);
        assert_eq!(BackendKind::from_type("cloudwatch"), BackendKind::CloudWatch);
        assert_eq!(BackendKind::from_type("influxdb"), BackendKind::InfluxDb);
        assert_eq!(BackendKind::from_type("Elasticsearch"), BackendKind::Other("elasticsearch".into()));
    }

    #[test]
    fn test_expression_keys() {
        assert_eq!(BackendKind::Prometheus.expression_key(), "expr");
        assert_eq!(BackendKind::ClickHouse.expression_key(), "rawSql");
        assert_eq!(BackendKind::Other("x".into()).expression_key(), "query");
    }
}
