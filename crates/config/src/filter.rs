//! Filter environment
//!
//! The per-configuration `(message) -> {topic, partition_key, partition,
//! verdict}` function. Script-defined functions run in the external
//! evaluation sandbox; the built-in implementation compiles the template
//! strings from the configuration (`{appname}`-style placeholders over the
//! parsed fields).

use skewer_model::SyslogMessage;

use crate::FilterConfig;

/// What the filter decided about one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterVerdict {
    /// Forward the message
    Pass,
    /// Intentionally discard; the message is acknowledged
    Dropped,
    /// Refuse; the message goes to the poison namespace
    Rejected,
}

impl FilterVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterVerdict::Pass => "passing",
            FilterVerdict::Dropped => "dropped",
            FilterVerdict::Rejected => "rejected",
        }
    }
}

/// Routing decision for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub topic: String,
    pub partition_key: String,
    pub partition: Option<i32>,
    pub verdict: FilterVerdict,
}

/// Compiled filter for one configuration block.
pub struct FilterEnv {
    topic_tmpl: String,
    partition_key_tmpl: String,
}

impl FilterEnv {
    pub fn new(config: &FilterConfig) -> Self {
        FilterEnv {
            topic_tmpl: config.topic_tmpl.clone(),
            partition_key_tmpl: config.partition_key_tmpl.clone(),
        }
    }

    /// Evaluate the filter for one message.
    pub fn evaluate(&self, fields: &SyslogMessage) -> Routing {
        let topic = render(&self.topic_tmpl, fields);
        let partition_key = render(&self.partition_key_tmpl, fields);
        let verdict = if topic.is_empty() {
            // no topic can be computed: refuse rather than misroute
            FilterVerdict::Rejected
        } else {
            FilterVerdict::Pass
        };
        Routing {
            topic,
            partition_key,
            partition: None,
            verdict,
        }
    }
}

/// Fill `{placeholder}` fields from the message. Unknown placeholders
/// render empty.
fn render(template: &str, fields: &SyslogMessage) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open + 1..];
        match rest.find('}') {
            Some(close) => {
                let name = &rest[..close];
                out.push_str(lookup(name, fields));
                rest = &rest[close + 1..];
            }
            None => {
                out.push('{');
                break;
            }
        }
    }
    out.push_str(rest);
    sanitize(out)
}

fn lookup<'a>(name: &str, fields: &'a SyslogMessage) -> &'a str {
    match name {
        "appname" | "app" => &fields.app_name,
        "hostname" | "host" => &fields.host,
        "procid" => &fields.proc_id,
        "msgid" => &fields.msg_id,
        "severity" => fields.severity.as_str(),
        "facility" => fields.facility.as_str(),
        _ => "",
    }
}

/// Fill a filename template. Separators are kept; `..` segments and
/// placeholder-injected metacharacters are not.
pub fn render_path(template: &str, fields: &SyslogMessage) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        rest = &rest[open + 1..];
        match rest.find('}') {
            Some(close) => {
                let value: String = lookup(&rest[..close], fields)
                    .chars()
                    .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
                    .collect();
                out.push_str(value.trim_matches('.'));
                rest = &rest[close + 1..];
            }
            None => break,
        }
    }
    out.push_str(rest);
    out
}

/// Topic names must stay broker-safe.
fn sanitize(s: String) -> String {
    s.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect()
}

#[cfg(test)]
#[path = "filter_test.rs"]
mod filter_test;

