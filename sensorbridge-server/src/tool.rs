use anyhow::Result;
use likely_stable::unlikely;
use rand::{distributions::Alphanumeric, Rng};
use rumqttc::{MqttOptions, QoS};

use sensorbridge_core::config::BrokerConfig;
use sensorbridge_core::error_bail;

/// Largest mqtt packet accepted or sent. Batches of a few thousand rows fit.
pub const MAX_PACKET_SIZE: usize = 4 * 1024 * 1024;

/// Capacity of the request channel between the mqtt client and its event loop.
pub const MQTT_CHANNEL_CAPACITY: usize = 64;

/// Random client id, the broker drops a session when another client reuses its id.
pub fn generate_client_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();

    format!("sensorbridge-{}", suffix)
}

pub fn to_qos(qos: u8) -> Result<QoS> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        _ => {
            error_bail!("invalid mqtt qos: {}", qos);
        }
    }
}

pub fn mqtt_options(config: &BrokerConfig) -> Result<MqttOptions> {
    if unlikely(config.host.is_empty()) {
        error_bail!("broker host is empty");
    }

    let client_id = config
        .client_id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_client_id);

    let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);

    options
        .set_keep_alive(config.keepalive())
        .set_clean_session(true)
        .set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let (Some(username), Some(password)) = (&config.username, &config.password) {
        options.set_credentials(username.clone(), password.clone());
    }

    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_client_id() {
        let a = generate_client_id();
        let b = generate_client_id();

        assert!(a.starts_with("sensorbridge-"));
        assert_eq!(a.len(), "sensorbridge-".len() + 12);
        assert_ne!(a, b);
    }

    #[test]
    fn test_to_qos() {
        assert_eq!(to_qos(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(to_qos(2).unwrap(), QoS::ExactlyOnce);
        assert!(to_qos(3).is_err());
    }

    #[test]
    fn test_mqtt_options() -> Result<()> {
        let config = BrokerConfig {
            client_id: Some("bridge-1".to_string()),
            ..BrokerConfig::default()
        };

        let options = mqtt_options(&config)?;
        assert_eq!(options.client_id(), "bridge-1");
        assert_eq!(options.broker_address(), ("localhost".to_string(), 1883));
        assert_eq!(options.keep_alive(), config.keepalive());

        Ok(())
    }
}
