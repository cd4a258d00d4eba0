use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::errors::AppError;
use crate::models::directive::TopicDirective;

/// Hostname label or IP: non-empty, no leading or trailing dash.
static HOST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]([A-Za-z0-9_.-]*[A-Za-z0-9_])?$").unwrap()
});

/// Validate a topic directive list before any execution begins. All
/// violations are accumulated; callers must not proceed on any error.
///
/// Uniqueness is per role: a producer and a consumer may share a topic
/// (that is how a probe observes its own traffic), but two directives for
/// the same (topic, role) are a bundle mistake.
pub fn validate_topic_directives(directives: &[TopicDirective]) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    let mut counts: HashMap<(&str, crate::models::directive::TopicRole), usize> = HashMap::new();
    for directive in directives {
        *counts
            .entry((directive.topic.as_str(), directive.role))
            .or_default() += 1;
    }
    let mut reported: HashSet<(&str, crate::models::directive::TopicRole)> = HashSet::new();
    for directive in directives {
        let key = (directive.topic.as_str(), directive.role);
        let count = counts[&key];
        if count > 1 && reported.insert(key) {
            errors.push(format!("Topic '{}' appears {} times", directive.topic, count));
        }
    }

    for directive in directives {
        if let Some(servers) = &directive.bootstrap_servers {
            errors.extend(validate_bootstrap_servers(servers));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// `None`/unset is valid and means "use the engine default"; an empty
/// string is a configuration mistake and rejected outright.
pub fn validate_bootstrap_servers(value: &str) -> Vec<String> {
    if value.trim().is_empty() {
        return vec!["Bootstrap servers cannot be empty".to_string()];
    }

    let mut errors = Vec::new();
    for entry in value.split(',') {
        let entry = entry.trim();
        if !is_valid_server_entry(entry) {
            errors.push(format!(
                "Invalid bootstrap server format: '{}'. Expected format: host:port",
                entry
            ));
        }
    }
    errors
}

fn is_valid_server_entry(entry: &str) -> bool {
    let Some((host, port)) = entry.rsplit_once(':') else {
        return false;
    };
    if host.is_empty() || !HOST_PATTERN.is_match(host) {
        return false;
    }
    matches!(port.parse::<u32>(), Ok(p) if (1..=65_535).contains(&p))
}

/// Convenience wrapper folding the accumulated list into one error value.
pub fn ensure_valid_topic_directives(directives: &[TopicDirective]) -> Result<(), AppError> {
    validate_topic_directives(directives)
        .map_err(|errors| AppError::Validation(errors.join("; ")))
}
