pub mod channel;
pub mod inbound;
pub mod signature;

pub use channel::{ChannelError, DeliveryAck, MessagingChannel, NoopChannel, TwilioChannel};
pub use inbound::InboundMessage;
