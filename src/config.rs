use crate::pipeline::{FailureAction, FailurePolicy};
use anyhow::{Context, Result, anyhow};
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use std::env;
use std::str::FromStr;

pub const DEFAULT_API_URL: &str = "http://backend-api:3000/api/weather/logs";

#[derive(Debug, Clone)]
pub struct Config {
    pub rabbit_host: String,
    pub rabbit_port: u16,
    pub rabbit_user: String,
    pub rabbit_pass: String,
    pub rabbit_vhost: String,
    pub rabbit_queue: String,
    pub rabbit_consumer_tag: String,
    pub api_url: String,
    pub failure_policy: FailurePolicy,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Loads the config from any variable source; `from_env` passes the
    /// process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let config = Self {
            rabbit_host: vars.string("RABBIT_HOST", "rabbitmq"),
            rabbit_port: vars.u16("RABBIT_PORT", 5672)?,
            rabbit_user: vars.string("RABBIT_USER", "guest"),
            rabbit_pass: vars.string("RABBIT_PASS", "guest"),
            rabbit_vhost: vars.string("RABBIT_VHOST", "/"),
            rabbit_queue: vars.string("RABBIT_QUEUE", "weather_queue"),
            rabbit_consumer_tag: vars.string("RABBIT_CONSUMER_TAG", "weather-relay"),
            api_url: vars.string("API_URL", DEFAULT_API_URL),
            failure_policy: FailurePolicy {
                on_decode_error: vars.failure_action(
                    "RELAY_ON_DECODE_ERROR",
                    FailureAction::Requeue,
                )?,
                on_forward_error: vars.failure_action(
                    "RELAY_ON_FORWARD_ERROR",
                    FailureAction::Requeue,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.rabbit_port == 0 {
            return Err(anyhow!("RABBIT_PORT must be greater than 0"));
        }

        if self.rabbit_queue.trim().is_empty() {
            return Err(anyhow!("RABBIT_QUEUE cannot be empty"));
        }

        if !self.api_url.starts_with("http://") && !self.api_url.starts_with("https://") {
            return Err(anyhow!("API_URL must be an http(s) URL"));
        }

        Ok(())
    }

    pub fn amqp_uri(&self) -> AMQPUri {
        AMQPUri {
            authority: AMQPAuthority {
                userinfo: AMQPUserInfo {
                    username: self.rabbit_user.clone(),
                    password: self.rabbit_pass.clone(),
                },
                host: self.rabbit_host.clone(),
                port: self.rabbit_port,
            },
            vhost: self.rabbit_vhost.clone(),
            ..Default::default()
        }
    }

    /// Broker location without credentials, for log lines.
    pub fn broker_addr(&self) -> String {
        format!(
            "{}:{}{}",
            self.rabbit_host,
            self.rabbit_port,
            display_vhost(&self.rabbit_vhost)
        )
    }
}

fn display_vhost(vhost: &str) -> String {
    if vhost.starts_with('/') {
        vhost.to_string()
    } else {
        format!("/{vhost}")
    }
}

struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|value| !value.trim().is_empty())
    }

    fn string(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn u16(&self, name: &str, default: u16) -> Result<u16> {
        self.get(name)
            .map(|value| {
                value
                    .trim()
                    .parse::<u16>()
                    .with_context(|| format!("invalid u16 for {name}"))
            })
            .transpose()
            .map(|value| value.unwrap_or(default))
    }

    fn failure_action(&self, name: &str, default: FailureAction) -> Result<FailureAction> {
        self.get(name)
            .map(|value| {
                FailureAction::from_str(&value).map_err(|error| anyhow!("{name}: {error}"))
            })
            .transpose()
            .map(|value| value.unwrap_or(default))
    }
}
