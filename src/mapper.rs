//! The mapping engine: declarative rewriting of dotted StatsD names into
//! structured, labeled metric identities.

use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use crate::event::{Labels, MetricType};
use crate::formatting::escape_metric_name;

/// What to do with an event whose name matched a rule.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    /// Rewrite the event to the rule's target name and labels.
    #[default]
    Map,
    /// Discard the event.
    Drop,
}

impl ActionType {
    /// The lowercase name used in configuration and telemetry labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Map => "map",
            ActionType::Drop => "drop",
        }
    }
}

/// Which output kind a timer event is accumulated under.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum TimerKind {
    /// A quantile summary.
    #[default]
    Summary,
    /// A bucketed histogram.
    Histogram,
}

/// How a rule's `match` pattern is interpreted.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    /// Dotted-name glob where each `*` captures one dot-separated part.
    #[default]
    Glob,
    /// A raw regular expression with positional or named captures.
    Regex,
}

/// Global fallbacks applied when no rule matches, or when a matching rule
/// leaves a knob unset.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MapperDefaults {
    /// Seconds of inactivity before a translated metric is evicted;
    /// `0` means never.
    #[serde(default)]
    pub ttl: u64,
    /// The output kind for timer events.
    #[serde(default)]
    pub timer_type: TimerKind,
}

/// One declarative rewrite rule.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingRule {
    /// The pattern the dotted StatsD name is matched against.
    #[serde(rename = "match")]
    pub match_pattern: String,
    /// How `match` is interpreted: `glob` (default) or `regex`.
    #[serde(default)]
    pub match_type: MatchType,
    /// Restricts the rule to events of one StatsD type.
    #[serde(default)]
    pub match_metric_type: Option<MetricType>,
    /// The target metric name.
    #[serde(default)]
    pub name: String,
    /// Whether to map or drop matching events.
    #[serde(default)]
    pub action: ActionType,
    /// Overrides the output kind for timer events.
    #[serde(default)]
    pub timer_type: Option<TimerKind>,
    /// Per-metric TTL in seconds; `0` means never expire.
    #[serde(default)]
    pub ttl: Option<u64>,
    /// Help text attached to the translated metric.
    #[serde(default)]
    pub help: Option<String>,
    /// Bucket upper bounds for `timer_type: histogram`.
    #[serde(default)]
    pub buckets: Option<Vec<f64>>,
    /// Quantiles for `timer_type: summary`.
    #[serde(default)]
    pub quantiles: Option<Vec<f64>>,
    /// Labels injected on matching events; values may reference captures as
    /// `$1` or `${name}`.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// The deserialized rule set.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingConfig {
    /// Global fallbacks.
    #[serde(default)]
    pub defaults: MapperDefaults,
    /// Rules, evaluated in order; the first match wins.
    #[serde(default)]
    pub mappings: Vec<MappingRule>,
}

/// Errors raised while compiling a [`MappingConfig`].
#[derive(Debug, Error)]
pub enum MapperError {
    /// The configuration did not deserialize.
    #[error("failed to parse mapping configuration: {0}")]
    InvalidConfig(#[from] serde_yaml::Error),

    /// A rule had an empty `match` pattern.
    #[error("mapping rule {index} has an empty match pattern")]
    EmptyMatch {
        /// Index of the offending rule.
        index: usize,
    },

    /// A glob pattern contained a character outside `[A-Za-z0-9_.*-]`.
    #[error("mapping rule {index} ({pattern:?}): invalid character {ch:?} in glob pattern")]
    InvalidGlobPattern {
        /// Index of the offending rule.
        index: usize,
        /// The pattern as configured.
        pattern: String,
        /// The rejected character.
        ch: char,
    },

    /// A `match_type: regex` pattern failed to compile.
    #[error("mapping rule {index} ({pattern:?}): {source}")]
    InvalidRegex {
        /// Index of the offending rule.
        index: usize,
        /// The pattern as configured.
        pattern: String,
        /// The underlying regex error.
        source: regex::Error,
    },

    /// A rule configured an empty `buckets` list.
    #[error("mapping rule {index} ({pattern:?}): buckets cannot be empty")]
    EmptyBuckets {
        /// Index of the offending rule.
        index: usize,
        /// The pattern as configured.
        pattern: String,
    },

    /// A rule configured an empty `quantiles` list.
    #[error("mapping rule {index} ({pattern:?}): quantiles cannot be empty")]
    EmptyQuantiles {
        /// Index of the offending rule.
        index: usize,
        /// The pattern as configured.
        pattern: String,
    },
}

/// The decision for one `(name, type)` lookup.
#[derive(Clone, Debug)]
pub struct MetricMapping {
    /// Map or drop.
    pub action: ActionType,
    /// The target metric name, before escaping.
    pub name: String,
    /// Inactivity TTL for slots created from this mapping.
    pub ttl: Duration,
    /// Output kind override for timers.
    pub timer_type: Option<TimerKind>,
    /// Help text override.
    pub help: Option<String>,
    /// Histogram bucket override.
    pub buckets: Option<Vec<f64>>,
    /// Summary quantile override.
    pub quantiles: Option<Vec<f64>>,
}

struct CompiledRule {
    pattern: Regex,
    match_metric_type: Option<MetricType>,
    label_templates: Vec<(String, String)>,
    mapping: MetricMapping,
}

/// A compiled rule set, queried once per event.
pub struct MetricMapper {
    rules: Vec<CompiledRule>,
    defaults: MapperDefaults,
}

fn compile_glob(pattern: &str, index: usize) -> Result<Regex, MapperError> {
    let mut regex = String::with_capacity(pattern.len() * 2 + 2);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => regex.push_str("([^.]*)"),
            '.' => regex.push_str("\\."),
            ch if ch.is_ascii_alphanumeric() || ch == '_' || ch == '-' => regex.push(ch),
            ch => {
                return Err(MapperError::InvalidGlobPattern {
                    index,
                    pattern: pattern.to_string(),
                    ch,
                })
            }
        }
    }
    regex.push('$');

    Regex::new(&regex).map_err(|source| MapperError::InvalidRegex {
        index,
        pattern: pattern.to_string(),
        source,
    })
}

impl MetricMapper {
    /// Compiles a rule set.
    pub fn new(config: MappingConfig) -> Result<MetricMapper, MapperError> {
        let defaults = config.defaults;
        let default_ttl = Duration::from_secs(defaults.ttl);

        let mut rules = Vec::with_capacity(config.mappings.len());
        for (index, rule) in config.mappings.into_iter().enumerate() {
            if rule.match_pattern.is_empty() {
                return Err(MapperError::EmptyMatch { index });
            }

            let pattern = match rule.match_type {
                MatchType::Glob => compile_glob(&rule.match_pattern, index)?,
                MatchType::Regex => {
                    Regex::new(&rule.match_pattern).map_err(|source| MapperError::InvalidRegex {
                        index,
                        pattern: rule.match_pattern.clone(),
                        source,
                    })?
                }
            };

            if rule.buckets.as_ref().is_some_and(Vec::is_empty) {
                return Err(MapperError::EmptyBuckets { index, pattern: rule.match_pattern });
            }
            if rule.quantiles.as_ref().is_some_and(Vec::is_empty) {
                return Err(MapperError::EmptyQuantiles { index, pattern: rule.match_pattern });
            }

            let label_templates = rule
                .labels
                .into_iter()
                .map(|(key, template)| (escape_metric_name(&key), template))
                .collect();

            rules.push(CompiledRule {
                pattern,
                match_metric_type: rule.match_metric_type,
                label_templates,
                mapping: MetricMapping {
                    action: rule.action,
                    name: rule.name,
                    ttl: rule.ttl.map_or(default_ttl, Duration::from_secs),
                    timer_type: rule.timer_type,
                    help: rule.help,
                    buckets: rule.buckets,
                    quantiles: rule.quantiles.map(|q| crate::summary::clamp_quantiles(&q)),
                },
            });
        }

        Ok(MetricMapper { rules, defaults })
    }

    /// Compiles a rule set from its YAML form.
    pub fn from_yaml(yaml: &str) -> Result<MetricMapper, MapperError> {
        let config: MappingConfig = serde_yaml::from_str(yaml)?;
        MetricMapper::new(config)
    }

    /// Looks up the first rule matching `(name, metric_type)`.
    ///
    /// Returns the rule's mapping together with the labels extracted from
    /// the name, or `None` when no rule matches.
    pub fn lookup(&self, name: &str, metric_type: MetricType) -> Option<(&MetricMapping, Labels)> {
        for rule in &self.rules {
            if rule.match_metric_type.is_some_and(|required| required != metric_type) {
                continue;
            }
            let Some(captures) = rule.pattern.captures(name) else {
                continue;
            };

            let mut labels = Labels::new();
            for (key, template) in &rule.label_templates {
                let mut value = String::new();
                captures.expand(template, &mut value);
                labels.insert(key.clone(), value);
            }
            return Some((&rule.mapping, labels));
        }
        None
    }

    /// The mapping used for events no rule matched: passthrough with the
    /// global default TTL.
    pub fn default_mapping(&self) -> MetricMapping {
        MetricMapping {
            action: ActionType::Map,
            name: String::new(),
            ttl: Duration::from_secs(self.defaults.ttl),
            timer_type: None,
            help: None,
            buckets: None,
            quantiles: None,
        }
    }

    /// The globally configured output kind for timers.
    pub fn default_timer_type(&self) -> TimerKind {
        self.defaults.timer_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapper(yaml: &str) -> MetricMapper {
        MetricMapper::from_yaml(yaml).expect("configuration should compile")
    }

    #[test]
    fn glob_match_extracts_positional_labels() {
        let mapper = mapper(
            r#"
mappings:
  - match: "test.dispatcher.*.*.*"
    name: "dispatcher_events_total"
    labels:
      processor: "$1"
      action: "$2"
      outcome: "$3"
      job: "test_dispatcher"
"#,
        );

        let (mapping, labels) = mapper
            .lookup("test.dispatcher.FooProcessor.send.succeeded", MetricType::Counter)
            .expect("name should match");
        assert_eq!(mapping.name, "dispatcher_events_total");
        assert_eq!(labels["processor"], "FooProcessor");
        assert_eq!(labels["action"], "send");
        assert_eq!(labels["outcome"], "succeeded");
        assert_eq!(labels["job"], "test_dispatcher");
    }

    #[test]
    fn glob_star_does_not_cross_dots() {
        let mapper = mapper(
            r#"
mappings:
  - match: "foo.*"
    name: "foo"
"#,
        );

        assert!(mapper.lookup("foo.bar", MetricType::Counter).is_some());
        assert!(mapper.lookup("foo.bar.baz", MetricType::Counter).is_none());
        assert!(mapper.lookup("prefix.foo.bar", MetricType::Counter).is_none());
    }

    #[test]
    fn regex_match_with_named_captures() {
        let mapper = mapper(
            r#"
mappings:
  - match: "^airflow\\.pool\\.(?P<pool>[^.]+)\\.open$"
    match_type: regex
    name: "airflow_pool_open_slots"
    labels:
      pool: "${pool}"
"#,
        );

        let (mapping, labels) = mapper
            .lookup("airflow.pool.default.open", MetricType::Gauge)
            .expect("name should match");
        assert_eq!(mapping.name, "airflow_pool_open_slots");
        assert_eq!(labels["pool"], "default");
    }

    #[test]
    fn first_match_wins() {
        let mapper = mapper(
            r#"
mappings:
  - match: "foo.*"
    name: "first"
  - match: "foo.bar"
    name: "second"
"#,
        );

        let (mapping, _) = mapper.lookup("foo.bar", MetricType::Counter).expect("match");
        assert_eq!(mapping.name, "first");
    }

    #[test]
    fn metric_type_filter_constrains_rules() {
        let mapper = mapper(
            r#"
mappings:
  - match: "foo.*"
    match_metric_type: timer
    name: "foo_timer"
  - match: "foo.*"
    name: "foo_other"
"#,
        );

        let (timer, _) = mapper.lookup("foo.x", MetricType::Timer).expect("match");
        assert_eq!(timer.name, "foo_timer");
        let (counter, _) = mapper.lookup("foo.x", MetricType::Counter).expect("match");
        assert_eq!(counter.name, "foo_other");
    }

    #[test]
    fn drop_action_and_per_rule_overrides() {
        let mapper = mapper(
            r#"
defaults:
  ttl: 60
  timer_type: histogram
mappings:
  - match: "noisy.*"
    action: drop
    name: "dropped"
  - match: "important.latency"
    name: "important_latency"
    timer_type: summary
    ttl: 45
    help: "Latency of the important thing."
    quantiles: [0.5, 0.9, 0.99]
"#,
        );

        let (dropped, _) = mapper.lookup("noisy.thing", MetricType::Counter).expect("match");
        assert_eq!(dropped.action, ActionType::Drop);
        assert_eq!(dropped.ttl, Duration::from_secs(60));

        let (latency, _) = mapper.lookup("important.latency", MetricType::Timer).expect("match");
        assert_eq!(latency.action, ActionType::Map);
        assert_eq!(latency.timer_type, Some(TimerKind::Summary));
        assert_eq!(latency.ttl, Duration::from_secs(45));
        assert_eq!(latency.help.as_deref(), Some("Latency of the important thing."));
        assert_eq!(latency.quantiles.as_deref(), Some(&[0.5, 0.9, 0.99][..]));

        assert_eq!(mapper.default_timer_type(), TimerKind::Histogram);
        assert_eq!(mapper.default_mapping().ttl, Duration::from_secs(60));
    }

    #[test]
    fn unmatched_lookup_returns_none() {
        let mapper = mapper("mappings: []");
        assert!(mapper.lookup("anything.at.all", MetricType::Counter).is_none());
        assert_eq!(mapper.default_mapping().ttl, Duration::ZERO);
        assert_eq!(mapper.default_timer_type(), TimerKind::Summary);
    }

    #[test]
    fn label_keys_are_escaped_at_compile_time() {
        let mapper = mapper(
            r#"
mappings:
  - match: "foo.*"
    name: "foo"
    labels:
      some.key: "$1"
"#,
        );

        let (_, labels) = mapper.lookup("foo.bar", MetricType::Counter).expect("match");
        assert_eq!(labels["some_key"], "bar");
    }

    #[test]
    fn invalid_configurations_are_rejected() {
        assert!(matches!(
            MetricMapper::from_yaml("mappings:\n  - match: \"\"\n    name: x"),
            Err(MapperError::EmptyMatch { index: 0 })
        ));
        assert!(matches!(
            MetricMapper::from_yaml("mappings:\n  - match: \"foo/bar\"\n    name: x"),
            Err(MapperError::InvalidGlobPattern { ch: '/', .. })
        ));
        assert!(matches!(
            MetricMapper::from_yaml(
                "mappings:\n  - match: \"fo[o\"\n    match_type: regex\n    name: x"
            ),
            Err(MapperError::InvalidRegex { .. })
        ));
        assert!(matches!(
            MetricMapper::from_yaml("mappings:\n  - match: \"foo\"\n    name: x\n    buckets: []"),
            Err(MapperError::EmptyBuckets { .. })
        ));
        assert!(matches!(
            MetricMapper::from_yaml("mappings:\n  - match: \"foo\"\n    name: x\n    quantiles: []"),
            Err(MapperError::EmptyQuantiles { .. })
        ));
        assert!(MetricMapper::from_yaml("nonsense: true").is_err());
    }
}
