//! Filter environment tests

use skewer_model::SyslogMessage;

use crate::filter::{FilterEnv, FilterVerdict};
use crate::FilterConfig;

fn fields(app: &str, host: &str) -> SyslogMessage {
    SyslogMessage {
        app_name: app.into(),
        host: host.into(),
        time_generated: chrono::Utc::now(),
        ..Default::default()
    }
}

#[test]
fn templates_render_fields() {
    let env = FilterEnv::new(&FilterConfig::default());
    let routing = env.evaluate(&fields("nginx", "web1"));
    assert_eq!(routing.topic, "rsyslog-nginx");
    assert_eq!(routing.partition_key, "mypk-web1");
    assert_eq!(routing.verdict, FilterVerdict::Pass);
}

#[test]
fn empty_topic_is_rejected() {
    let config = FilterConfig {
        topic_tmpl: "{appname}".into(),
        ..Default::default()
    };
    let env = FilterEnv::new(&config);
    let routing = env.evaluate(&fields("", "web1"));
    assert!(routing.topic.is_empty());
    assert_eq!(routing.verdict, FilterVerdict::Rejected);
}

#[test]
fn topic_is_sanitized_for_the_broker() {
    let config = FilterConfig {
        topic_tmpl: "logs/{appname}".into(),
        ..Default::default()
    };
    let env = FilterEnv::new(&config);
    let routing = env.evaluate(&fields("my app!", "h"));
    assert_eq!(routing.topic, "logsmyapp");
}

#[test]
fn unknown_placeholder_renders_empty() {
    let config = FilterConfig {
        topic_tmpl: "x-{nope}-y".into(),
        ..Default::default()
    };
    let env = FilterEnv::new(&config);
    assert_eq!(env.evaluate(&fields("a", "h")).topic, "x--y");
}
