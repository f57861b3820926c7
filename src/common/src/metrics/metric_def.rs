pub const GATEWAY_MAX_CONN: &str = "gateway_max_connections";
pub const GATEWAY_CURR_CONN: &str = "gateway_curr_connections";
pub const GATEWAY_COM_LATENCY: &str = "gateway_com_latency";
pub const GATEWAY_REWRITE_LATENCY: &str = "gateway_rewrite_latency";
pub const GATEWAY_BACKEND_ACQUIRE_LATENCY: &str = "gateway_backend_acquire_latency";
pub const GATEWAY_MAPPED_ERRORS: &str = "gateway_mapped_errors_total";
pub const GATEWAY_SCHEMA_CACHE_HITS: &str = "gateway_schema_cache_hits_total";
pub const GATEWAY_SCHEMA_CACHE_MISSES: &str = "gateway_schema_cache_misses_total";

#[macro_export]
macro_rules! metrics_const {
    ($({$metric_name:ident, $init_fn:ident, $metric_type:expr, $name:expr, $desc:expr}),*) => {
        use metrics::KeyName;
        use std::sync::OnceLock;
        use $crate::metrics::MetricType;

        #[derive(Debug, Clone)]
        pub enum MetricsConsts {
           $($metric_name(&'static str, &'static str, KeyName, MetricType),)*
        }

        pub fn list_all_metrics() -> &'static Vec<MetricsConsts> {
           static ALL_METRICS: OnceLock<Vec<MetricsConsts>> = OnceLock::new();
           ALL_METRICS.get_or_init(|| {
              vec![$(MetricsConsts::$metric_name($name, $desc, KeyName::from_const_str($name), $metric_type),)*]
           })
        }

        impl MetricsConsts {
            $(
            #[inline]
            pub fn $init_fn() -> Self {
                MetricsConsts::$metric_name($name, $desc, KeyName::from_const_str($name), $metric_type)
            })*

            pub fn get_name(&self) -> String {
                let (name, _, _, _) = self.get_metrics_pair();
                name.to_string()
            }

            pub fn get_metrics_pair(&self) -> (&'static str, &'static str, &KeyName, &MetricType){
                match self {
                    $(
                    MetricsConsts::$metric_name(name, desc, key_name, metrics_type) => (name, desc, key_name, metrics_type),
                    )*
                }
            }
        }
    };
}

metrics_const!(
    { GatewayMaxConnections, max_connections, MetricType::Gauge, GATEWAY_MAX_CONN, "The max number of client connections allowed by the gateway."},
    { GatewayCurrentConnections, current_connections, MetricType::Gauge, GATEWAY_CURR_CONN, "The current client connection count."},
    { GatewayComLatency, com_latency, MetricType::Histogram, GATEWAY_COM_LATENCY, "Latency of MySQL command execution."},
    { GatewayRewriteLatency, rewrite_latency, MetricType::Histogram, GATEWAY_REWRITE_LATENCY, "Latency of the SQL rewrite pipeline."},
    { GatewayBackendAcquireLatency, backend_acquire_latency, MetricType::Histogram, GATEWAY_BACKEND_ACQUIRE_LATENCY, "Latency of acquiring a backend session from the pool."},
    { GatewayMappedErrors, mapped_errors, MetricType::Counter, GATEWAY_MAPPED_ERRORS, "Backend errors mapped to MySQL error packets."},
    { GatewaySchemaCacheHits, schema_cache_hits, MetricType::Counter, GATEWAY_SCHEMA_CACHE_HITS, "Auto-increment schema cache hits."},
    { GatewaySchemaCacheMisses, schema_cache_misses, MetricType::Counter, GATEWAY_SCHEMA_CACHE_MISSES, "Auto-increment schema cache misses."}
);
