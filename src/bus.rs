use std::future::Future;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use zbus::message::Type as MessageType;
use zbus::{Connection, MatchRule, Message, MessageStream};

use crate::config::{BusConfig, BusKind};
use crate::error::AppError;
use crate::timer::epoch_millis;

/// One observed print job. Only its arrival matters to the relay.
#[derive(Debug, Clone)]
pub struct JobEvent {
    pub sender: Option<String>,
    pub timestamp_ms: u64,
}

impl JobEvent {
    pub fn now(sender: Option<String>) -> Self {
        Self {
            sender,
            timestamp_ms: epoch_millis(),
        }
    }

    fn from_message(msg: &Message) -> Self {
        Self::now(msg.header().sender().map(|s| s.to_string()))
    }
}

/// Anything that can deliver job notifications to the daemon.
pub trait JobSource {
    /// Starts delivering one [`JobEvent`] per observed job into `jobs`.
    ///
    /// Returns once the subscription is established; the returned task keeps
    /// forwarding until the source ends or `jobs` is closed.
    fn subscribe(
        self,
        jobs: mpsc::Sender<JobEvent>,
    ) -> impl Future<Output = Result<JoinHandle<()>, AppError>> + Send;
}

/// Subscribes to a D-Bus signal, `com.redhat.PrinterSpooler.JobQueuedLocal`
/// on the system bus unless configured otherwise.
pub struct DbusJobSource {
    config: BusConfig,
}

impl DbusJobSource {
    pub fn new(config: BusConfig) -> Self {
        Self { config }
    }

    async fn connect(&self) -> Result<Connection, AppError> {
        let connection = match self.config.bus {
            BusKind::System => Connection::system().await,
            BusKind::Session => Connection::session().await,
        };
        connection.map_err(|e| AppError::BusConnection(format!("{:?} bus: {e}", self.config.bus)))
    }

    fn match_rule(&self) -> Result<MatchRule<'_>, AppError> {
        let rule_err = |e: zbus::Error| AppError::Config(format!("signal match rule: {e}"));

        let mut builder = MatchRule::builder()
            .msg_type(MessageType::Signal)
            .interface(self.config.interface.as_str())
            .map_err(rule_err)?
            .member(self.config.member.as_str())
            .map_err(rule_err)?;
        if let Some(sender) = &self.config.sender {
            builder = builder.sender(sender.as_str()).map_err(rule_err)?;
        }
        if let Some(path) = &self.config.path {
            builder = builder.path(path.as_str()).map_err(rule_err)?;
        }
        Ok(builder.build())
    }
}

impl JobSource for DbusJobSource {
    async fn subscribe(self, jobs: mpsc::Sender<JobEvent>) -> Result<JoinHandle<()>, AppError> {
        let connection = self.connect().await?;
        let rule = self.match_rule()?;
        let stream = MessageStream::for_match_rule(rule, &connection, None)
            .await
            .map_err(|e| AppError::BusConnection(format!("add match rule: {e}")))?;

        info!(
            "listening for {}.{} signals",
            self.config.interface, self.config.member
        );

        Ok(tokio::spawn(forward_jobs(connection, stream, jobs)))
    }
}

async fn forward_jobs(
    _connection: Connection,
    mut stream: MessageStream,
    jobs: mpsc::Sender<JobEvent>,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                warn!("signal stream error: {e}");
                continue;
            }
        };

        let job = JobEvent::from_message(&msg);
        debug!("job signal from {:?}", job.sender);
        if jobs.send(job).await.is_err() {
            // event loop is gone, nothing left to notify
            return;
        }
    }
    warn!("signal stream ended");
}
