pub mod consumer;
pub mod database;
pub mod email;
pub mod in_memory_queue;
pub mod message_queue;
pub mod producer;

pub use consumer::{ConsumerSettings, ConsumerStats, ManagedConsumer, MessageConsumer};
pub use database::*;
pub use email::{build_email_sender, ConsoleEmailSender, SmtpEmailSender};
pub use in_memory_queue::{topic_matches, BrokerEvent, InMemoryBroker};
pub use message_queue::RabbitMqBroker;
pub use producer::MessageProducer;
