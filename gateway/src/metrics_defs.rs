//! Metrics definitions for the gateway.

use shared::metrics_defs::{MetricDef, MetricType};

pub const ROUTE_NOT_MATCHED: MetricDef = MetricDef {
    name: "route.not_matched",
    metric_type: MetricType::Counter,
    description: "Number of requests that matched no route",
};

pub const RATE_LIMITED: MetricDef = MetricDef {
    name: "route.rate_limited",
    metric_type: MetricType::Counter,
    description: "Number of requests rejected by a token bucket",
};

pub const BREAKER_OPENED: MetricDef = MetricDef {
    name: "breaker.opened",
    metric_type: MetricType::Counter,
    description: "Number of transitions into the open state",
};

pub const BREAKER_SHORT_CIRCUIT: MetricDef = MetricDef {
    name: "breaker.short_circuit",
    metric_type: MetricType::Counter,
    description: "Number of calls answered with the fallback without invoking the primary",
};

pub const BREAKER_FALLBACK: MetricDef = MetricDef {
    name: "breaker.fallback",
    metric_type: MetricType::Counter,
    description: "Number of primary failures or timeouts masked by the fallback",
};

pub const BACKEND_ERRORS: MetricDef = MetricDef {
    name: "backend.errors",
    metric_type: MetricType::Counter,
    description: "Number of failed calls to backend services",
};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds",
};

// TODO: all metrics must be added here for now, this can be done dynamically with a macro in the future.
pub const ALL_METRICS: &[MetricDef] = &[
    ROUTE_NOT_MATCHED,
    RATE_LIMITED,
    BREAKER_OPENED,
    BREAKER_SHORT_CIRCUIT,
    BREAKER_FALLBACK,
    BACKEND_ERRORS,
    REQUEST_DURATION,
];
