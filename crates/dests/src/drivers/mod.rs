//! Destination drivers

mod file;
mod http;
mod kafka;
mod relp;
mod stderr;
mod tcp;
mod udp;

use skewer_config::DestinationType;

use crate::{DestEnv, DestError, Destination};

/// Build one destination driver. Connection counters are recorded inside;
/// an `Err` means the connect attempt failed and the dispatcher should
/// apply its retry budget.
pub async fn build_destination(
    dest: DestinationType,
    env: &DestEnv,
) -> Result<Box<dyn Destination>, DestError> {
    Ok(match dest {
        DestinationType::Tcp => Box::new(tcp::TcpDestination::build(env).await?),
        DestinationType::Udp => Box::new(udp::UdpDestination::build(env).await?),
        DestinationType::Http => Box::new(http::HttpDestination::build(env).await?),
        DestinationType::File => Box::new(file::FileDestination::build(env).await?),
        DestinationType::Stderr => Box::new(stderr::StderrDestination::build(env).await?),
        DestinationType::Relp => Box::new(relp::RelpDestination::build(env).await?),
        DestinationType::Kafka => Box::new(kafka::KafkaDestination::build(env).await?),
    })
}
