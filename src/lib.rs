pub mod config;
pub mod coordinator;
pub mod error;
pub mod logger;
pub mod peer;
pub mod retry;
pub mod session;
pub mod signaling;
pub mod source;
pub mod utils;

use crate::config::{Config, SignalingMode};
use crate::coordinator::Coordinator;
use crate::error::Result;
use crate::peer::RtcConnector;
use crate::retry::Backoff;
use crate::signaling::{HttpChannel, QueueChannel, RedisQueue, SignalingChannel};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Runs the coordinator described by `config` until Ctrl+C.
pub async fn run(config: Config) -> Result<()> {
    run_until(config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Runs the coordinator described by `config` until `shutdown` resolves.
pub async fn run_until<F>(config: Config, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let channel: Box<dyn SignalingChannel> = match config.signaling_mode {
        SignalingMode::Http => {
            info!("polling offers from {}", config.signaling_url);
            Box::new(HttpChannel::new(&config.signaling_url)?)
        }
        SignalingMode::Queue => {
            let queue = tokio::select! {
                queue = connect_queue(&config) => queue,
                _ = &mut shutdown => return Ok(()),
            };
            info!("popping offers for machine {}", config.machine_id);
            Box::new(QueueChannel::new(Arc::new(queue), &config.machine_id))
        }
    };

    let connector = Arc::new(RtcConnector::new(
        config.ice_servers.clone(),
        config.codec_preference()?,
    ));
    let factory = config.source_spec().factory();

    Coordinator::new(channel, connector, factory, config.coordinator_settings())
        .run(shutdown)
        .await
}

/// Connects to the queue backend, retrying with a fixed delay until it answers.
async fn connect_queue(config: &Config) -> RedisQueue {
    let mut backoff = Backoff::fixed(config.reconnect_delay());
    loop {
        match RedisQueue::connect(&config.queue_url).await {
            Ok(queue) => return queue,
            Err(e) => {
                warn!("queue backend unreachable: {} (retrying)", e);
                backoff.wait().await;
            }
        }
    }
}
