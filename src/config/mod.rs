//! Host configuration.
//!
//! Loaded from YAML files and environment variables by the `relaybus`
//! binary. Applications embedding the bus can build their publishers and
//! sinks from the same file with [`Config::publisher`] and [`Config::sink`].

mod bus;
mod serialization;

pub use bus::{BusConfig, DispatcherConfig, PublisherConfig};
pub use serialization::SerializationConfig;

use serde::Deserialize;

use std::sync::Arc;

use crate::bus::BusPublisher;
use crate::dispatcher::SocketDispatcher;
use crate::endpoint::{DualEndpoint, EndpointError, SocketEndpoint};
use crate::serialization::MessageSerializer;
use crate::sink::MessageSink;
use crate::socket::SocketContext;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "relaybus.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "RELAYBUS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RELAYBUS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "RELAYBUS_LOG";

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bus: BusConfig,
    pub serialization: SerializationConfig,
    pub dispatcher: DispatcherConfig,
    pub publisher: PublisherConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `relaybus.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, e.g.
    ///    `RELAYBUS_BUS__INCOMING=tcp://0.0.0.0:5555`
    pub fn load(path: Option<&str>) -> Result<Self, Box<dyn std::error::Error>> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        Ok(config)
    }

    /// Parse a YAML document, without consulting files or the environment.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// The relay address pair.
    pub fn endpoint(&self) -> Result<DualEndpoint, EndpointError> {
        let incoming: SocketEndpoint = self.bus.incoming.parse()?;
        let outgoing: SocketEndpoint = self.bus.outgoing.parse()?;
        DualEndpoint::new(incoming, outgoing)
    }

    pub fn serializer(&self) -> MessageSerializer {
        MessageSerializer::new(self.serialization.codec).compressed(self.serialization.compression)
    }

    /// A publisher for the configured relay, with the configured queue limit.
    pub fn publisher(
        &self,
        dispatcher: Arc<SocketDispatcher>,
        context: &SocketContext,
    ) -> Result<BusPublisher, EndpointError> {
        Ok(BusPublisher::with_queue_capacity(
            self.endpoint()?,
            dispatcher,
            context,
            self.publisher.queue_capacity,
        ))
    }

    /// [`publisher`](Self::publisher) paired with [`serializer`](Self::serializer).
    pub fn sink(
        &self,
        dispatcher: Arc<SocketDispatcher>,
        context: &SocketContext,
    ) -> Result<MessageSink, EndpointError> {
        Ok(MessageSink::new(
            self.publisher(dispatcher, context)?,
            self.serializer(),
        ))
    }

    pub fn dispatcher(&self) -> SocketDispatcher {
        match &self.dispatcher.id {
            Some(id) => SocketDispatcher::with_id(id.clone()),
            None => SocketDispatcher::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialization::Codec;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.bus.incoming, "tcp://127.0.0.1:5555");
        assert_eq!(config.bus.outgoing, "tcp://127.0.0.1:5556");
        assert_eq!(config.serialization.codec, Codec::Json);
        assert!(!config.serialization.compression);
        assert!(config.dispatcher.id.is_none());
        assert_eq!(config.publisher.queue_capacity, crate::bus::DEFAULT_QUEUE_CAPACITY);

        let endpoint = config.endpoint().unwrap();
        assert_eq!(endpoint, DualEndpoint::tcp_localhost(5555, 5556).unwrap());
    }

    #[test]
    fn test_from_yaml_partial() {
        let config = Config::from_yaml(
            "bus:\n  incoming: inproc://orders-in\n  outgoing: inproc://orders-out\nserialization:\n  codec: bincode\n  compression: true\n",
        )
        .unwrap();
        assert_eq!(config.endpoint().unwrap(), DualEndpoint::in_process("orders").unwrap());
        assert_eq!(config.serialization.codec, Codec::Bincode);

        let serializer = config.serializer();
        assert_eq!(serializer.codec(), Codec::Bincode);
        assert!(serializer.is_compressed());
        assert_eq!(config.publisher.queue_capacity, crate::bus::DEFAULT_QUEUE_CAPACITY);
    }

    #[tokio::test]
    async fn test_sink_from_config_reaches_subscriber() {
        use crate::bus::{BusSubscriber, DualSocketBus};
        use crate::stream::{observe_channel, MessageStream, Notification};

        #[derive(Debug, PartialEq, serde::Serialize, Deserialize)]
        struct Heartbeat {
            seq: u64,
        }
        crate::impl_message!(Heartbeat, Event);

        let config = Config::from_yaml(
            "bus:\n  incoming: inproc://configured-in\n  outgoing: inproc://configured-out\nserialization:\n  codec: bincode\n  compression: true\npublisher:\n  queue_capacity: 32\n",
        )
        .unwrap();
        let dispatcher = Arc::new(config.dispatcher());
        let context = SocketContext::new();

        let relay = DualSocketBus::new(config.endpoint().unwrap(), dispatcher.clone(), &context);
        relay.start().unwrap();
        let subscriber = BusSubscriber::new(config.endpoint().unwrap(), dispatcher.clone(), &context);
        let stream = MessageStream::<Heartbeat>::new(Arc::new(subscriber), config.serializer());
        let (_sub, mut rx) = observe_channel(&stream);

        let sink = config.sink(dispatcher, &context).unwrap();
        assert_eq!(sink.publisher().queue_capacity(), 32);
        assert_eq!(sink.serializer().codec(), Codec::Bincode);
        assert!(sink.serializer().is_compressed());

        sink.publish_event(&Heartbeat { seq: 9 }).unwrap();
        match tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await {
            Ok(Some(Notification::Next(heartbeat))) => assert_eq!(*heartbeat, Heartbeat { seq: 9 }),
            other => panic!("expected heartbeat, got {:?}", other),
        }
    }

    #[test]
    fn test_publisher_from_invalid_endpoint_fails() {
        let config = Config::from_yaml("bus:\n  incoming: udp://1.2.3.4:5\n").unwrap();
        assert!(matches!(
            config.publisher(Arc::new(SocketDispatcher::new()), &SocketContext::new()),
            Err(EndpointError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_same_address_rejected() {
        let config = Config::from_yaml(
            "bus:\n  incoming: tcp://127.0.0.1:7000\n  outgoing: tcp://127.0.0.1:7000\n",
        )
        .unwrap();
        assert!(matches!(config.endpoint(), Err(EndpointError::SameAddress(_))));
    }

    #[test]
    fn test_dispatcher_id() {
        let config = Config::from_yaml("dispatcher:\n  id: relay-main\n").unwrap();
        assert_eq!(config.dispatcher().id(), "relay-main");
        assert!(Config::default().dispatcher().id().starts_with("dispatcher-"));
    }

    #[test]
    #[serial]
    fn test_load_from_path() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "bus:\n  incoming: tcp://0.0.0.0:6000\n  outgoing: tcp://0.0.0.0:6001").unwrap();
        writeln!(file, "publisher:\n  queue_capacity: 64").unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.bus.incoming, "tcp://0.0.0.0:6000");
        assert_eq!(config.publisher.queue_capacity, 64);
    }

    #[test]
    #[serial]
    fn test_load_missing_path_fails() {
        assert!(Config::load(Some("/nonexistent/relaybus.yaml")).is_err());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("RELAYBUS_BUS__OUTGOING", "tcp://127.0.0.1:7101");
        std::env::set_var("RELAYBUS_PUBLISHER__QUEUE_CAPACITY", "128");
        let config = Config::load(None);
        std::env::remove_var("RELAYBUS_BUS__OUTGOING");
        std::env::remove_var("RELAYBUS_PUBLISHER__QUEUE_CAPACITY");

        let config = config.unwrap();
        assert_eq!(config.bus.outgoing, "tcp://127.0.0.1:7101");
        assert_eq!(config.bus.incoming, "tcp://127.0.0.1:5555");
        assert_eq!(config.publisher.queue_capacity, 128);
    }
}
