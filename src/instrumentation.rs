// Fire-and-forget metrics sinks
use prometheus::core::Collector;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::collections::HashMap;
use std::sync::Mutex;

pub type Labels<'a> = &'a [(&'a str, &'a str)];

/// Metrics sink. Implementations must never fail or block the caller.
pub trait Instrumentation: Send + Sync {
    fn incr_counter(&self, name: &str, labels: Labels<'_>, value: u64);

    fn set_gauge(&self, _name: &str, _labels: Labels<'_>, _value: f64) {}

    fn observe_histogram(&self, _name: &str, _labels: Labels<'_>, _value: f64) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl Instrumentation for NoopSink {
    fn incr_counter(&self, _name: &str, _labels: Labels<'_>, _value: u64) {}
}

/// Records metrics into a private prometheus `Registry`.
///
/// Metric families are created on first use with the sorted label keys of that call;
/// later calls with a different label set are dropped with a warning.
pub struct PrometheusSink {
    registry: Registry,
    counters: Mutex<HashMap<String, IntCounterVec>>,
    gauges: Mutex<HashMap<String, GaugeVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
}

impl PrometheusSink {
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            counters: Mutex::new(HashMap::new()),
            gauges: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current counter value; 0 when the series was never written
    pub fn counter(&self, name: &str, labels: Labels<'_>) -> u64 {
        let values = label_values(labels);
        self.counters
            .lock()
            .ok()
            .and_then(|c| c.get(name).cloned())
            .and_then(|vec| vec.get_metric_with_label_values(&values).ok())
            .map(|c| c.get())
            .unwrap_or(0)
    }

    pub fn gauge(&self, name: &str, labels: Labels<'_>) -> Option<f64> {
        let values = label_values(labels);
        self.gauges
            .lock()
            .ok()
            .and_then(|g| g.get(name).cloned())
            .and_then(|vec| vec.get_metric_with_label_values(&values).ok())
            .map(|g| g.get())
    }

    /// Text exposition of everything recorded so far
    pub fn render(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    fn family<V>(
        &self,
        cache: &Mutex<HashMap<String, V>>,
        name: &str,
        labels: Labels<'_>,
        make: impl FnOnce(&str, &[&str]) -> prometheus::Result<V>,
    ) -> Option<V>
    where
        V: Collector + Clone + 'static,
    {
        let mut cache = cache.lock().ok()?;
        if let Some(family) = cache.get(name) {
            return Some(family.clone());
        }

        let keys = label_keys(labels);
        let created = make(name, &keys).and_then(|family| {
            self.registry.register(Box::new(family.clone()))?;
            Ok(family)
        });
        match created {
            Ok(family) => {
                cache.insert(name.to_string(), family.clone());
                Some(family)
            }
            Err(e) => {
                tracing::warn!(metric = name, error = %e, "Dropping unregistrable metric");
                None
            }
        }
    }
}

impl Default for PrometheusSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Instrumentation for PrometheusSink {
    fn incr_counter(&self, name: &str, labels: Labels<'_>, value: u64) {
        let family = self.family(&self.counters, name, labels, |name, keys| {
            IntCounterVec::new(Opts::new(name, name), keys)
        });
        match family.map(|f| f.get_metric_with_label_values(&label_values(labels))) {
            Some(Ok(counter)) => counter.inc_by(value),
            Some(Err(e)) => tracing::warn!(metric = name, error = %e, "Dropping counter sample"),
            None => {}
        }
    }

    fn set_gauge(&self, name: &str, labels: Labels<'_>, value: f64) {
        let family = self.family(&self.gauges, name, labels, |name, keys| {
            GaugeVec::new(Opts::new(name, name), keys)
        });
        match family.map(|f| f.get_metric_with_label_values(&label_values(labels))) {
            Some(Ok(gauge)) => gauge.set(value),
            Some(Err(e)) => tracing::warn!(metric = name, error = %e, "Dropping gauge sample"),
            None => {}
        }
    }

    fn observe_histogram(&self, name: &str, labels: Labels<'_>, value: f64) {
        let family = self.family(&self.histograms, name, labels, |name, keys| {
            HistogramVec::new(HistogramOpts::new(name, name), keys)
        });
        match family.map(|f| f.get_metric_with_label_values(&label_values(labels))) {
            Some(Ok(histogram)) => histogram.observe(value),
            Some(Err(e)) => tracing::warn!(metric = name, error = %e, "Dropping histogram sample"),
            None => {}
        }
    }
}

fn sorted(labels: Labels<'_>) -> Vec<(&str, &str)> {
    let mut sorted = labels.to_vec();
    sorted.sort();
    sorted
}

fn label_keys<'a>(labels: Labels<'a>) -> Vec<&'a str> {
    sorted(labels).into_iter().map(|(k, _)| k).collect()
}

fn label_values<'a>(labels: Labels<'a>) -> Vec<&'a str> {
    sorted(labels).into_iter().map(|(_, v)| v).collect()
}
