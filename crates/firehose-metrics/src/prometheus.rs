//! Prometheus text exposition format.
//!
//! Renders collected samples into the Prometheus text exposition format
//! (version 0.0.4) for scraping by a Prometheus server or compatible agent.

use std::collections::HashMap;
use std::fmt::Write as _;

/// Content type served alongside [`render_prometheus`] output.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// One exposed series value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub help: String,
    pub metric_type: MetricType,
    /// Label pairs in exposition order.
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Render samples into Prometheus text format.
///
/// Samples sharing a name are grouped under a single HELP/TYPE header,
/// taken from the first sample of that family.
pub fn render_prometheus(samples: &[Sample]) -> String {
    // Families in first-seen order.
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut families: Vec<Vec<&Sample>> = Vec::new();
    for sample in samples {
        let slot = *index.entry(sample.name.as_str()).or_insert_with(|| {
            families.push(Vec::new());
            families.len() - 1
        });
        families[slot].push(sample);
    }

    let mut out = String::new();
    for family in &families {
        let head = family[0];
        let _ = writeln!(out, "# HELP {} {}", head.name, escape_help(&head.help));
        let _ = writeln!(out, "# TYPE {} {}", head.name, head.metric_type.as_str());
        for member in family {
            write_sample(&mut out, member);
        }
    }

    out
}

fn write_sample(out: &mut String, sample: &Sample) {
    out.push_str(&sample.name);
    if !sample.labels.is_empty() {
        out.push('{');
        for (i, (name, value)) in sample.labels.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            let _ = write!(out, "{name}=\"{}\"", escape_label_value(value));
        }
        out.push('}');
    }
    let _ = writeln!(out, " {}", format_value(sample.value));
}

fn escape_help(help: &str) -> String {
    help.replace('\\', "\\\\").replace('\n', "\\n")
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "+Inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        value.to_string()
    }
}
