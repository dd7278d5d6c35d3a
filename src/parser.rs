//! Parsing of StatsD lines into event batches.
//!
//! One line in, an ordered batch of [`Event`]s out. The parser understands
//! the vanilla dialect (including multi-sample lines), Librato/InfluxDB
//! inline name-tags, and DogStatsD tag suffixes. It never fails: malformed
//! input produces no events and bumps a categorized telemetry counter.

use tracing::debug;

use crate::event::{Event, Events, Labels};
use crate::formatting::escape_metric_name;
use crate::telemetry::{SampleError, Telemetry};

fn build_event(
    stat_type: &str,
    name: &str,
    value: f64,
    relative: bool,
    labels: Labels,
) -> Option<Event> {
    match stat_type {
        "c" => Some(Event::Counter { name: name.to_string(), value, labels }),
        "g" => Some(Event::Gauge { name: name.to_string(), value, relative, labels }),
        "ms" | "h" | "d" => Some(Event::Timer { name: name.to_string(), value, labels }),
        // "s" lands here as well: sets are not supported.
        _ => None,
    }
}

fn parse_tag(tag: &str, separator: char, labels: &mut Labels, telemetry: &Telemetry) {
    match tag.split_once(separator) {
        Some((key, value)) if !key.is_empty() && !value.is_empty() => {
            labels.insert(escape_metric_name(key), value.to_string());
        }
        _ => {
            telemetry.increment_tag_errors();
            debug!(tag = %tag, "skipping malformed tag");
        }
    }
}

fn parse_name_tags(section: &str, labels: &mut Labels, telemetry: &Telemetry) {
    let mut tags = section.split(',').peekable();
    while let Some(tag) = tags.next() {
        // A trailing comma leaves a final empty segment; not an error.
        if tag.is_empty() && tags.peek().is_none() {
            break;
        }
        parse_tag(tag, '=', labels, telemetry);
    }
}

fn parse_dogstatsd_tags(section: &str, labels: &mut Labels, telemetry: &Telemetry) {
    let mut tags = section.split(',').peekable();
    while let Some(tag) = tags.next() {
        if tag.is_empty() && tags.peek().is_none() {
            break;
        }
        parse_tag(tag.strip_prefix('#').unwrap_or(tag), ':', labels, telemetry);
    }
}

/// Splits inline name-tags off the name section.
///
/// The first `#` (Librato) or `,` (InfluxDB) starts the tag block; tags use
/// `=` as the key/value separator.
fn parse_name_and_tags<'a>(name: &'a str, labels: &mut Labels, telemetry: &Telemetry) -> &'a str {
    match name.find(['#', ',']) {
        Some(index) => {
            parse_name_tags(&name[index + 1..], labels, telemetry);
            &name[..index]
        }
        None => name,
    }
}

/// Parses one line of StatsD input into an ordered batch of events.
///
/// Returns an empty batch for empty and malformed lines; partial failures
/// drop only the offending sample. All failures are accounted on `telemetry`.
pub fn line_to_events(line: &str, telemetry: &Telemetry) -> Events {
    let mut events = Events::new();
    if line.is_empty() {
        return events;
    }

    let Some((name_section, sample_section)) = line.split_once(':') else {
        telemetry.increment_sample_error(SampleError::MalformedLine);
        debug!(line = %line, "bad line: no value separator");
        return events;
    };
    if name_section.is_empty() {
        telemetry.increment_sample_error(SampleError::MalformedLine);
        debug!(line = %line, "bad line: empty metric name");
        return events;
    }

    let mut labels = Labels::new();
    let metric = parse_name_and_tags(name_section, &mut labels, telemetry);

    let samples: Vec<&str> = if sample_section.contains("|#") {
        // DogStatsD tags use `:` inside the sample section, so multi-sample
        // splitting is off for these lines. Mixing tag styles is an error.
        if !labels.is_empty() {
            telemetry.increment_sample_error(SampleError::MixedTaggingStyles);
            debug!(line = %line, "bad line: multiple tagging styles");
            return events;
        }
        vec![sample_section]
    } else {
        sample_section.split(':').collect()
    };

    'samples: for sample in samples {
        telemetry.increment_samples();

        let components: Vec<&str> = sample.split('|').collect();
        if components.len() < 2 || components.len() > 4 {
            telemetry.increment_sample_error(SampleError::MalformedComponent);
            debug!(line = %line, "bad sample: wrong number of components");
            continue;
        }
        let (value_str, stat_type) = (components[0], components[1]);

        let relative = value_str.starts_with('+') || value_str.starts_with('-');

        let Ok(mut value) = value_str.parse::<f64>() else {
            telemetry.increment_sample_error(SampleError::MalformedValue);
            debug!(value = %value_str, line = %line, "bad sample: unparseable value");
            continue;
        };

        let mut multiply_events = 1;
        if components.len() > 2 {
            for component in &components[2..] {
                if component.is_empty() {
                    telemetry.increment_sample_error(SampleError::MalformedComponent);
                    debug!(line = %line, "bad sample: empty component");
                    continue 'samples;
                }
            }

            for component in &components[2..] {
                let component = *component;
                match component.as_bytes()[0] {
                    b'@' => {
                        let mut factor = match component[1..].parse::<f64>() {
                            Ok(factor) => factor,
                            Err(_) => {
                                telemetry
                                    .increment_sample_error(SampleError::InvalidSampleFactor);
                                debug!(component = %component, line = %line, "invalid sampling factor");
                                0.0
                            }
                        };
                        if factor == 0.0 {
                            factor = 1.0;
                        }

                        match stat_type {
                            // Gauges are last-write-wins; the factor is meaningless.
                            "g" => {}
                            "c" => value /= factor,
                            "ms" | "h" | "d" => multiply_events = (1.0 / factor) as usize,
                            _ => {}
                        }
                    }
                    b'#' => parse_dogstatsd_tags(&component[1..], &mut labels, telemetry),
                    _ => {
                        telemetry.increment_sample_error(SampleError::InvalidSampleFactor);
                        debug!(component = %component, line = %line, "invalid sampling factor or tag section");
                    }
                }
            }
        }

        if !labels.is_empty() {
            telemetry.increment_tags();
        }

        match build_event(stat_type, metric, value, relative, labels.clone()) {
            Some(event) => events.extend(std::iter::repeat(event).take(multiply_events)),
            None => {
                telemetry.increment_sample_error(SampleError::IllegalEvent);
                debug!(stat_type = %stat_type, line = %line, "bad sample: unsupported stat type");
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::MetricType;

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn parse(line: &str) -> Events {
        line_to_events(line, &Telemetry::new())
    }

    #[test]
    fn empty_line_produces_nothing() {
        assert!(parse("").is_empty());
    }

    #[test]
    fn simple_counter() {
        let events = parse("foo:2|c");
        assert_eq!(
            events,
            vec![Event::Counter { name: "foo".into(), value: 2.0, labels: Labels::new() }]
        );
    }

    #[test]
    fn simple_gauge_and_relative_gauges() {
        assert_eq!(
            parse("foo:3|g"),
            vec![Event::Gauge { name: "foo".into(), value: 3.0, relative: false, labels: Labels::new() }]
        );
        assert_eq!(
            parse("foo:+10|g"),
            vec![Event::Gauge { name: "foo".into(), value: 10.0, relative: true, labels: Labels::new() }]
        );
        assert_eq!(
            parse("foo:-10|g"),
            vec![Event::Gauge { name: "foo".into(), value: -10.0, relative: true, labels: Labels::new() }]
        );
    }

    #[test]
    fn timer_type_codes() {
        for stat_type in ["ms", "h", "d"] {
            let events = parse(&format!("foo:200.5|{}", stat_type));
            assert_eq!(
                events,
                vec![Event::Timer { name: "foo".into(), value: 200.5, labels: Labels::new() }]
            );
            assert_eq!(events[0].metric_type(), MetricType::Timer);
        }
    }

    #[test]
    fn multi_sample_line_keeps_order() {
        let events = parse("foo:2|c:3|c:4|g");
        assert_eq!(
            events,
            vec![
                Event::Counter { name: "foo".into(), value: 2.0, labels: Labels::new() },
                Event::Counter { name: "foo".into(), value: 3.0, labels: Labels::new() },
                Event::Gauge { name: "foo".into(), value: 4.0, relative: false, labels: Labels::new() },
            ]
        );
    }

    #[test]
    fn counter_sampling_factor_scales_value() {
        let events = parse("foo:1|c|@0.1");
        assert_eq!(
            events,
            vec![Event::Counter { name: "foo".into(), value: 10.0, labels: Labels::new() }]
        );
    }

    #[test]
    fn timer_sampling_factor_replicates_events() {
        let events = parse("foo:320|ms|@0.1");
        assert_eq!(events.len(), 10);
        for event in &events {
            assert_eq!(
                event,
                &Event::Timer { name: "foo".into(), value: 320.0, labels: Labels::new() }
            );
        }
    }

    #[test]
    fn zero_sampling_factor_is_clamped_to_one() {
        let events = parse("foo:320|ms|@0");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn gauge_ignores_sampling_factor() {
        let events = parse("foo:3|g|@0.2");
        assert_eq!(
            events,
            vec![Event::Gauge { name: "foo".into(), value: 3.0, relative: false, labels: Labels::new() }]
        );
    }

    #[test]
    fn invalid_sampling_factor_is_counted_and_treated_as_one() {
        let telemetry = Telemetry::new();
        let events = line_to_events("foo:1|c|@bar", &telemetry);
        assert_eq!(
            events,
            vec![Event::Counter { name: "foo".into(), value: 1.0, labels: Labels::new() }]
        );
        assert_eq!(telemetry.sample_error_count(SampleError::InvalidSampleFactor), 1);
    }

    #[test]
    fn influxdb_name_tags() {
        let events = parse("my.metric,host=a,env=prod:5|c");
        assert_eq!(
            events,
            vec![Event::Counter {
                name: "my.metric".into(),
                value: 5.0,
                labels: labels(&[("host", "a"), ("env", "prod")]),
            }]
        );
    }

    #[test]
    fn librato_name_tags() {
        let events = parse("my.metric#host=a,env=prod:5|c");
        assert_eq!(
            events,
            vec![Event::Counter {
                name: "my.metric".into(),
                value: 5.0,
                labels: labels(&[("host", "a"), ("env", "prod")]),
            }]
        );
    }

    #[test]
    fn dogstatsd_tags() {
        let events = parse("my.metric:5|c|#host:a,env:prod");
        assert_eq!(
            events,
            vec![Event::Counter {
                name: "my.metric".into(),
                value: 5.0,
                labels: labels(&[("host", "a"), ("env", "prod")]),
            }]
        );
    }

    #[test]
    fn dogstatsd_tags_with_leading_hashes() {
        let events = parse("my.metric:5|c|#host:a,#env:prod");
        assert_eq!(
            events,
            vec![Event::Counter {
                name: "my.metric".into(),
                value: 5.0,
                labels: labels(&[("host", "a"), ("env", "prod")]),
            }]
        );
    }

    #[test]
    fn tag_keys_are_escaped_values_are_not() {
        let events = parse("foo:1|c|#some.tag:some.value");
        assert_eq!(
            events,
            vec![Event::Counter {
                name: "foo".into(),
                value: 1.0,
                labels: labels(&[("some_tag", "some.value")]),
            }]
        );
    }

    #[test]
    fn mixed_tagging_styles_drop_the_line() {
        let telemetry = Telemetry::new();
        let events = line_to_events("my.metric,host=a:5|c|#env:prod", &telemetry);
        assert!(events.is_empty());
        assert_eq!(telemetry.sample_error_count(SampleError::MixedTaggingStyles), 1);
    }

    #[test]
    fn malformed_lines_produce_nothing() {
        let telemetry = Telemetry::new();
        for line in ["foo", ":1|c"] {
            assert!(line_to_events(line, &telemetry).is_empty());
        }
        assert_eq!(telemetry.sample_error_count(SampleError::MalformedLine), 2);
    }

    #[test]
    fn malformed_value_drops_only_that_sample() {
        let telemetry = Telemetry::new();
        let events = line_to_events("foo:bar|c:2|c", &telemetry);
        assert_eq!(
            events,
            vec![Event::Counter { name: "foo".into(), value: 2.0, labels: Labels::new() }]
        );
        assert_eq!(telemetry.sample_error_count(SampleError::MalformedValue), 1);
    }

    #[test]
    fn empty_suffix_component_aborts_the_sample() {
        let telemetry = Telemetry::new();
        let events = line_to_events("foo:1|c|", &telemetry);
        assert!(events.is_empty());
        assert_eq!(telemetry.sample_error_count(SampleError::MalformedComponent), 1);
    }

    #[test]
    fn too_many_components_is_malformed() {
        let telemetry = Telemetry::new();
        assert!(line_to_events("foo:1|c|@0.5|#a:b|what", &telemetry).is_empty());
        assert_eq!(telemetry.sample_error_count(SampleError::MalformedComponent), 1);
    }

    #[test]
    fn sets_are_not_supported() {
        let telemetry = Telemetry::new();
        assert!(line_to_events("foo:42|s", &telemetry).is_empty());
        assert_eq!(telemetry.sample_error_count(SampleError::IllegalEvent), 1);
    }

    #[test]
    fn unknown_stat_type_is_illegal() {
        let telemetry = Telemetry::new();
        assert!(line_to_events("foo:42|wibble", &telemetry).is_empty());
        assert_eq!(telemetry.sample_error_count(SampleError::IllegalEvent), 1);
    }

    #[test]
    fn malformed_tags_are_skipped_not_fatal() {
        let telemetry = Telemetry::new();
        let events = line_to_events("my.metric,host=a,bogus,=x,y=:5|c", &telemetry);
        assert_eq!(
            events,
            vec![Event::Counter {
                name: "my.metric".into(),
                value: 5.0,
                labels: labels(&[("host", "a")]),
            }]
        );
        assert_eq!(telemetry.tag_error_count(), 3);
    }

    #[test]
    fn events_carry_raw_names() {
        let events = parse("some.dotted.name:1|c");
        assert_eq!(events[0].metric_name(), "some.dotted.name");
    }
}
