pub mod publish;
pub mod source;

pub use publish::{PublishPacket, PublishPacketHistory, TrendlineEstimate};
pub use source::TwccSource;
