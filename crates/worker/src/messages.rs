//! 共享队列上的消息联合类型
//!
//! `email_queue` 和 `event_queue` 各自承载多种消息，按投递的路由键选择具体类型。

use serde::{Deserialize, Serialize};
use taskbus_core::{
    models::{
        routing, BrokerMessage, DomainEventMessage, EmailMessage, EmailVerificationMessage,
        Envelope, PasswordResetEmailMessage, UserLoggedInEvent, UserRegisteredEvent,
    },
    Result,
};

/// `email_queue` 上的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmailJob {
    PasswordReset(PasswordResetEmailMessage),
    Verification(EmailVerificationMessage),
    Plain(EmailMessage),
}

impl BrokerMessage for EmailJob {
    const KIND: &'static str = "email";

    fn envelope(&self) -> &Envelope {
        match self {
            EmailJob::PasswordReset(m) => &m.envelope,
            EmailJob::Verification(m) => &m.envelope,
            EmailJob::Plain(m) => &m.envelope,
        }
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        match self {
            EmailJob::PasswordReset(m) => &mut m.envelope,
            EmailJob::Verification(m) => &mut m.envelope,
            EmailJob::Plain(m) => &mut m.envelope,
        }
    }

    fn routing_key(&self) -> String {
        match self {
            EmailJob::PasswordReset(m) => m.routing_key(),
            EmailJob::Verification(m) => m.routing_key(),
            EmailJob::Plain(m) => m.routing_key(),
        }
    }

    fn decode(routing_key: &str, bytes: &[u8]) -> Result<Self> {
        match routing_key {
            routing::EMAIL_PASSWORD_RESET => {
                PasswordResetEmailMessage::from_bytes(bytes).map(EmailJob::PasswordReset)
            }
            routing::EMAIL_VERIFICATION => {
                EmailVerificationMessage::from_bytes(bytes).map(EmailJob::Verification)
            }
            _ => EmailMessage::from_bytes(bytes).map(EmailJob::Plain),
        }
    }
}

/// `event_queue` 上的消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventJob {
    UserRegistered(UserRegisteredEvent),
    UserLoggedIn(UserLoggedInEvent),
    Domain(DomainEventMessage),
}

impl BrokerMessage for EventJob {
    const KIND: &'static str = "event";

    fn envelope(&self) -> &Envelope {
        match self {
            EventJob::UserRegistered(m) => &m.envelope,
            EventJob::UserLoggedIn(m) => &m.envelope,
            EventJob::Domain(m) => &m.envelope,
        }
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        match self {
            EventJob::UserRegistered(m) => &mut m.envelope,
            EventJob::UserLoggedIn(m) => &mut m.envelope,
            EventJob::Domain(m) => &mut m.envelope,
        }
    }

    fn routing_key(&self) -> String {
        match self {
            EventJob::UserRegistered(m) => m.routing_key(),
            EventJob::UserLoggedIn(m) => m.routing_key(),
            EventJob::Domain(m) => m.routing_key(),
        }
    }

    fn decode(routing_key: &str, bytes: &[u8]) -> Result<Self> {
        match routing_key {
            routing::EVENT_USER_REGISTERED => {
                UserRegisteredEvent::from_bytes(bytes).map(EventJob::UserRegistered)
            }
            routing::EVENT_USER_LOGGED_IN => {
                UserLoggedInEvent::from_bytes(bytes).map(EventJob::UserLoggedIn)
            }
            _ => DomainEventMessage::from_bytes(bytes).map(EventJob::Domain),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use taskbus_core::TaskbusError;

    #[test]
    fn test_email_job_selected_by_routing_key() {
        let reset = PasswordResetEmailMessage::new("a@b.com", "alice", "tok");
        let bytes = reset.to_bytes().unwrap();

        let job = EmailJob::decode(routing::EMAIL_PASSWORD_RESET, &bytes).unwrap();
        assert_eq!(job, EmailJob::PasswordReset(reset.clone()));
        assert_eq!(job.id(), reset.id());

        // 路由键与消息体不匹配时解码失败
        let err = EmailJob::decode(routing::EMAIL_VERIFICATION, &bytes).unwrap_err();
        assert!(matches!(err, TaskbusError::Deserialization(_)));
    }

    #[test]
    fn test_event_job_round_trips_through_bytes() {
        let event = DomainEventMessage::new("order.paid", "42", "order", json!({"amount": 10}));
        let bytes = EventJob::Domain(event.clone()).to_bytes().unwrap();

        let decoded = EventJob::decode("event.order.paid", &bytes).unwrap();
        assert_eq!(decoded, EventJob::Domain(event));
        assert_eq!(decoded.routing_key(), "event.order.paid");
    }

    #[test]
    fn test_retry_count_survives_reencoding() {
        let mut job = EventJob::UserLoggedIn(UserLoggedInEvent::new(7));
        assert!(job.envelope_mut().increment_retry());

        let bytes = job.to_bytes().unwrap();
        let decoded = EventJob::decode(routing::EVENT_USER_LOGGED_IN, &bytes).unwrap();
        assert_eq!(decoded.envelope().retry_count(), 1);
    }
}
