use shared::metrics_defs::{MetricDef, MetricType};

pub const SUBMIT_REQUESTS: MetricDef = MetricDef {
    name: "submit.requests",
    metric_type: MetricType::Counter,
    description: "Submissions handled. Tagged with outcome.",
};

pub const SUBMIT_DURATION: MetricDef = MetricDef {
    name: "submit.duration",
    metric_type: MetricType::Histogram,
    description: "Time to handle a submission in seconds. Tagged with outcome.",
};

pub const BOT_DROPPED: MetricDef = MetricDef {
    name: "submit.bot_dropped",
    metric_type: MetricType::Counter,
    description: "Submissions dropped because the honeypot field was filled in",
};

pub const STORE_ERRORS: MetricDef = MetricDef {
    name: "store.errors",
    metric_type: MetricType::Counter,
    description: "Failed contact store calls. Tagged with operation.",
};

pub const ALL_METRICS: &[MetricDef] = &[SUBMIT_REQUESTS, SUBMIT_DURATION, BOT_DROPPED, STORE_ERRORS];
