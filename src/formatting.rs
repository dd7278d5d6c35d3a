//! Identifier escaping and helpers for writing the text exposition format.

use std::fmt::Display;

/// Escapes a StatsD metric or label name into the identifier character class
/// `[A-Za-z_][A-Za-z0-9_]*`.
///
/// Every character outside `[A-Za-z0-9_]` is replaced with a single `_`,
/// multibyte characters included. A leading ASCII digit gets one `_`
/// prepended. The transformation is idempotent.
pub fn escape_metric_name(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 1);
    if name.as_bytes().first().is_some_and(u8::is_ascii_digit) {
        escaped.push('_');
    }
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            escaped.push(c);
        } else {
            escaped.push('_');
        }
    }
    escaped
}

/// Escapes a label value for the exposition format.
///
/// Label values may contain arbitrary UTF-8, but backslashes, double quotes,
/// and line feeds must be escaped.
pub(crate) fn escape_label_value(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Escapes a help string for the exposition format.
///
/// Like label values, but double quotes are allowed verbatim.
pub(crate) fn escape_help(help: &str) -> String {
    let mut escaped = String::with_capacity(help.len());
    for c in help.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub(crate) fn write_help_line(buffer: &mut String, name: &str, help: &str) {
    buffer.push_str("# HELP ");
    buffer.push_str(name);
    buffer.push(' ');
    buffer.push_str(&escape_help(help));
    buffer.push('\n');
}

pub(crate) fn write_type_line(buffer: &mut String, name: &str, metric_type: &str) {
    buffer.push_str("# TYPE ");
    buffer.push_str(name);
    buffer.push(' ');
    buffer.push_str(metric_type);
    buffer.push('\n');
}

/// Writes a single sample line.
///
/// `suffix` is appended to the metric name, which is how the `_sum`, `_count`
/// and `_bucket` series of an aggregated distribution are written.
/// `additional_label` carries the data-type specific label, such as `le` for
/// histogram buckets or `quantile` for summaries.
pub(crate) fn write_metric_line<T, T2>(
    buffer: &mut String,
    name: &str,
    suffix: Option<&'static str>,
    label_keys: &[String],
    label_values: &[String],
    additional_label: Option<(&'static str, T)>,
    value: T2,
) where
    T: Display,
    T2: Display,
{
    buffer.push_str(name);
    if let Some(suffix) = suffix {
        buffer.push('_');
        buffer.push_str(suffix);
    }

    if !label_keys.is_empty() || additional_label.is_some() {
        buffer.push('{');

        let mut first = true;
        for (key, val) in label_keys.iter().zip(label_values) {
            if first {
                first = false;
            } else {
                buffer.push(',');
            }
            buffer.push_str(key);
            buffer.push_str("=\"");
            buffer.push_str(&escape_label_value(val));
            buffer.push('"');
        }

        if let Some((key, val)) = additional_label {
            if !first {
                buffer.push(',');
            }
            buffer.push_str(key);
            buffer.push_str("=\"");
            buffer.push_str(&val.to_string());
            buffer.push('"');
        }

        buffer.push('}');
    }

    buffer.push(' ');
    buffer.push_str(&value.to_string());
    buffer.push('\n');
}
