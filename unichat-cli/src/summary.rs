//! Human-readable rendering of the effective configuration.

use humantime::format_duration;
use serde_json::{Value, json};
use unichat_http::ServerConfig;

pub fn config_summary(config: &ServerConfig) -> Value {
    let realtime = &config.realtime;
    json!({
        "bind_addr": config.bind_addr.to_string(),
        "enable_cors": config.enable_cors,
        "categories": config.categories,
        "user_header": config.user_header,
        "realtime": {
            "greeting": realtime.greeting,
            "probe_timeout": format_duration(realtime.probe_timeout).to_string(),
            "close_timeout": format_duration(realtime.close_timeout).to_string(),
            "sweep_interval": format_duration(realtime.sweep_interval).to_string(),
            "max_concurrent_probes": realtime.max_concurrent_probes,
        },
    })
}
