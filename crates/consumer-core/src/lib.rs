mod error;
mod message;
mod naming;
mod source;
pub mod memory;

pub use error::{ConsumerError, Result, SourceError};
pub use message::{Message, MessageId, ParseMessageIdError, Properties};
pub use naming::{subscription_name, tenant, SUBSCRIPTION_SUFFIX};
pub use source::{Connector, MessageSource, SubscribeOptions, SubscriptionType};

pub use tokio_util::sync::CancellationToken;
