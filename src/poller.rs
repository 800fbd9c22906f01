use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client::{IComfortClient, Outcome};
use crate::types::{Command, CommandInput};

type OutcomeCallback = Box<dyn Fn(&Outcome) + Send + Sync>;

/// Re-issues a command on a fixed interval. The first tick fires one interval
/// after start.
pub struct Poller {
    client: Arc<IComfortClient>,
    interval: Duration,
    command: Command,
    callbacks: Vec<OutcomeCallback>,
}

impl Poller {
    /// `None` for a zero interval, which means polling is disabled.
    pub fn new(client: Arc<IComfortClient>, interval: Duration) -> Option<Self> {
        if interval.is_zero() {
            return None;
        }
        let command = client.options().poll_command;
        Some(Self {
            client,
            interval,
            command,
            callbacks: Vec::new(),
        })
    }

    /// `None` when the client's options leave polling disabled.
    pub fn from_options(client: Arc<IComfortClient>) -> Option<Self> {
        let secs = client.options().polling_secs;
        Self::new(client, Duration::from_secs(secs))
    }

    pub fn command(mut self, command: Command) -> Self {
        self.command = command;
        self
    }

    pub fn on_outcome(mut self, f: impl Fn(&Outcome) + Send + Sync + 'static) -> Self {
        self.callbacks.push(Box::new(f));
        self
    }

    pub fn start(self) -> PollHandle {
        let token = CancellationToken::new();
        let task = tokio::spawn(self.run(token.clone()));
        PollHandle { token, task }
    }

    async fn run(self, token: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(interval = ?self.interval, command = %self.command, "poller started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // An in-flight tick runs to completion and is delivered like any other result.
            let outcome = self
                .client
                .handle(CommandInput::command(self.command.as_str()))
                .await;
            match outcome.error_message() {
                Some(e) => warn!(command = %self.command, error = %e, "poll failed"),
                None => trace!(command = %self.command, "poll succeeded"),
            }
            for cb in &self.callbacks {
                cb(&outcome);
            }
        }

        debug!("poller stopped");
    }
}

/// Cancels the timer when stopped or dropped.
pub struct PollHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Cancels the timer and waits for an in-flight tick to be delivered.
    /// No tick starts after this returns.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Err(e) = (&mut self.task).await {
            warn!(error = %e, "poller task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
