//! Interactive command coordination over the shared assistant session.
//!
//! A [`Coordinator`] sends one command at a time into the session and waits
//! for the reply it produces. Because the driven program gives no completion
//! signal, the reply is found by polling: capture the scrollback, extract the
//! latest reply, and stop as soon as it differs from the reply that was on
//! screen before the command was sent.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::config::{Config, PollConfig};
use crate::driver::{DriverError, Multiplexer, SessionDriver, SessionStart};
use crate::extract::{
    MarkerExtractor, ReplyBlock, ReplyExtractor, limit_reply_size, strip_decoration,
};
use crate::limits::{ReplyLimits, tail_lines};
use crate::outcome::{Failure, FailureKind, Outcome};
use crate::policy::Gatekeeper;

/// Maximum length of a reply excerpt written to the audit log.
const AUDIT_SUMMARY_CHARS: usize = 200;

/// Serializes access to the session and turns commands into replies.
///
/// Every operation checks the caller (and command) with the [`Gatekeeper`],
/// holds the session lock for its whole conversation with the driver, is
/// bounded by `poll.run_timeout`, and is audited.
pub struct Coordinator {
    gatekeeper: Arc<Gatekeeper>,
    driver: Mutex<SessionDriver>,
    session_name: String,
    extractor: Arc<dyn ReplyExtractor>,
    poll: PollConfig,
    limits: ReplyLimits,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("session_name", &self.session_name)
            .field("poll", &self.poll)
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Create a coordinator owning `driver`.
    pub fn new(
        gatekeeper: Arc<Gatekeeper>,
        driver: SessionDriver,
        extractor: Arc<dyn ReplyExtractor>,
        poll: PollConfig,
        limits: ReplyLimits,
    ) -> Self {
        Self {
            gatekeeper,
            session_name: driver.name().to_string(),
            driver: Mutex::new(driver),
            extractor,
            poll,
            limits,
        }
    }

    /// Build a coordinator for the configured session on top of `mux`.
    pub fn from_config(
        gatekeeper: Arc<Gatekeeper>,
        mux: Arc<dyn Multiplexer>,
        config: &Config,
    ) -> Self {
        Self::new(
            gatekeeper,
            SessionDriver::from_config(mux, config),
            Arc::new(MarkerExtractor::new(config.markers.clone())),
            config.poll.clone(),
            config.reply,
        )
    }

    /// Name of the driven session.
    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    /// Send `command` to the assistant and return its reply.
    ///
    /// If no new reply shows up within the poll budget, the last capture is
    /// returned anyway with `stale` set.
    pub async fn run(&self, caller_id: &str, command: &str) -> Outcome {
        if let Err(failure) = self.gatekeeper.admit(caller_id, command) {
            return failure.into();
        }

        let outcome = match self.bounded(self.converse(command)).await {
            Ok((message, stale)) => Outcome::Success { message, stale },
            Err(failure) => failure.into(),
        };
        self.record(caller_id, command, &outcome);
        outcome
    }

    /// Make sure the session is running.
    pub async fn start(&self, caller_id: &str) -> Outcome {
        if let Err(failure) = self.gatekeeper.admit_caller(caller_id, "start") {
            return failure.into();
        }

        let started = self
            .bounded(async {
                let driver = self.driver.lock().await;
                driver.ensure_session().await
            })
            .await;
        let outcome = match started {
            Ok(SessionStart::Created) => {
                Outcome::success(format!("session {} started", self.session_name))
            }
            Ok(SessionStart::AlreadyRunning) => {
                Outcome::success(format!("session {} is already running", self.session_name))
            }
            Err(failure) => failure.into(),
        };
        self.record(caller_id, "start", &outcome);
        outcome
    }

    /// Kill the session. An absent session is reported as a failure.
    pub async fn stop(&self, caller_id: &str) -> Outcome {
        if let Err(failure) = self.gatekeeper.admit_caller(caller_id, "stop") {
            return failure.into();
        }

        let killed = self
            .bounded(async {
                let driver = self.driver.lock().await;
                driver.kill_session().await
            })
            .await;
        let outcome = match killed {
            Ok(true) => Outcome::success(format!("session {} stopped", self.session_name)),
            Ok(false) => Failure::unexpected(format!(
                "session {} is not running",
                self.session_name
            ))
            .into(),
            Err(failure) => failure.into(),
        };
        self.record(caller_id, "stop", &outcome);
        outcome
    }

    /// Return the last `lines` lines of the session's screen, undecorated.
    pub async fn capture(&self, caller_id: &str, lines: Option<usize>) -> Outcome {
        if let Err(failure) = self.gatekeeper.admit_caller(caller_id, "capture") {
            return failure.into();
        }

        let captured = self
            .bounded(async {
                let driver = self.driver.lock().await;
                driver.capture(lines).await
            })
            .await;
        let outcome = match captured {
            Ok(buffer) => {
                let plain = strip_decoration(&buffer.raw_text);
                let keep = lines.unwrap_or(self.limits.max_lines);
                Outcome::success(self.limits.cap_chars(&tail_lines(&plain, keep)))
            }
            Err(failure) => failure.into(),
        };
        self.record(caller_id, "capture", &outcome);
        outcome
    }

    /// Steps of an interactive run that need the session lock.
    async fn converse(&self, command: &str) -> Result<(String, bool), DriverError> {
        let driver = self.driver.lock().await;
        driver.ensure_session().await?;

        let baseline = driver.capture(None).await?;
        let before = self
            .extractor
            .latest_reply(&strip_decoration(&baseline.raw_text));

        driver.send_text(command).await?;

        let attempts = self.poll.effective_attempts();
        let mut last_plain = String::new();
        let mut last_reply = ReplyBlock::default();
        for attempt in 1..=attempts {
            tokio::time::sleep(self.poll.delay).await;

            let buffer = driver.capture(None).await?;
            let plain = strip_decoration(&buffer.raw_text);
            let mut reply = self.extractor.reply_after(&plain, command);
            if reply.is_empty() {
                reply = self.extractor.latest_reply(&plain);
            }

            if !reply.is_empty() && reply != before {
                tracing::debug!("Reply detected on attempt {}/{}", attempt, attempts);
                return Ok((limit_reply_size(&reply, &plain, &self.limits), false));
            }
            last_plain = plain;
            last_reply = reply;
        }

        tracing::warn!(
            "No new reply in {} after {} attempts ({:?}), returning last capture",
            self.session_name,
            attempts,
            self.poll.budget()
        );
        Ok((limit_reply_size(&last_reply, &last_plain, &self.limits), true))
    }

    /// Bound `fut` by the run timeout and map driver errors to failures.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = Result<T, DriverError>>,
    ) -> Result<T, Failure> {
        match tokio::time::timeout(self.poll.run_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::error!("Session {} failed: {}", self.session_name, e);
                Err(Failure::from(&e))
            }
            Err(_) => {
                tracing::error!(
                    "Session {} did not finish within {:?}",
                    self.session_name,
                    self.poll.run_timeout
                );
                Err(Failure::new(
                    FailureKind::ToolTimeout,
                    format!(
                        "session {} did not respond within {:?}",
                        self.session_name, self.poll.run_timeout
                    ),
                ))
            }
        }
    }

    fn record(&self, caller_id: &str, command: &str, outcome: &Outcome) {
        let summary: String = outcome.message().chars().take(AUDIT_SUMMARY_CHARS).collect();
        self.gatekeeper
            .audit(caller_id, command, outcome.is_success(), &summary);
    }
}
