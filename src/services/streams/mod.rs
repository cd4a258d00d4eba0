pub mod consumer;
pub mod messages;
pub mod producer;
pub mod router;

pub use consumer::*;
pub use messages::*;
pub use producer::*;
pub use router::*;

use rdkafka::config::ClientConfig;

use crate::errors::AppError;
use crate::models::directive::{KafkaSecurityDirective, TopicDirective};

/// Per-topic bootstrap override wins over the engine-wide default.
pub fn effective_bootstrap_servers(directive: &TopicDirective, default_servers: &[String]) -> String {
    match &directive.bootstrap_servers {
        Some(servers) if !servers.trim().is_empty() => servers
            .split(',')
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(","),
        _ => default_servers.join(","),
    }
}

/// Build the rdkafka client configuration for one stream worker from its
/// effective bootstrap servers and the security directive paired with its
/// (topic, role).
pub fn build_stream_client_config(
    bootstrap_servers: &str,
    security: &KafkaSecurityDirective,
) -> Result<ClientConfig, AppError> {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", bootstrap_servers);
    client_config.set("security.protocol", security.protocol.as_str());

    let credentials = security.decode_credentials()?;
    if let (Some(username), Some(password)) =
        (&credentials.sasl_username, &credentials.sasl_password)
    {
        client_config.set("sasl.username", username);
        client_config.set("sasl.password", password);
        if let Some(mechanism) = &credentials.sasl_mechanism {
            client_config.set("sasl.mechanism", mechanism);
        }
    }
    if let Some(ca_location) = &credentials.ssl_ca_location {
        client_config.set("ssl.ca.location", ca_location);
    }

    client_config.set("request.timeout.ms", "30000");
    client_config.set("socket.timeout.ms", "60000");
    Ok(client_config)
}
