//! The process-wide context every front end is built on.

use std::sync::Arc;

use crate::bindings::{BindingError, SessionBindings};
use crate::config::{Config, ConfigError};
use crate::coordinator::Coordinator;
use crate::driver::{Multiplexer, TmuxControl};
use crate::oneshot::OneShotExecutor;
use crate::outcome::{Failure, Outcome};
use crate::policy::Gatekeeper;
use crate::session_index::SessionIndex;
use crate::transfer::TransferGate;

/// Everything needed to serve callers, built once at start-up.
///
/// There is no global state: front ends hold a `Helmsman` (or an `Arc` of
/// one) and call into its components.
#[derive(Debug)]
pub struct Helmsman {
    config: Config,
    gatekeeper: Arc<Gatekeeper>,
    coordinator: Coordinator,
    oneshot: OneShotExecutor,
    bindings: Arc<SessionBindings>,
    transfer: TransferGate,
    sessions: SessionIndex,
}

impl Helmsman {
    /// Build the context with tmux as the multiplexer.
    ///
    /// Creates the workspace and log directories if they are missing.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let mux = Arc::new(TmuxControl::new(
            &config.session.multiplexer,
            config.session.control_timeout,
        ));
        Self::with_multiplexer(config, mux)
    }

    /// Build the context on top of an arbitrary multiplexer.
    pub fn with_multiplexer(
        config: Config,
        mux: Arc<dyn Multiplexer>,
    ) -> Result<Self, ConfigError> {
        config.prepare_dirs()?;

        let gatekeeper = Arc::new(Gatekeeper::from_config(&config));
        if config.allowed_callers.is_empty() {
            tracing::warn!("No allowed callers configured; every caller is admitted");
        }
        let bindings = Arc::new(SessionBindings::new(config.bindings_path()));

        Ok(Self {
            coordinator: Coordinator::from_config(gatekeeper.clone(), mux, &config),
            oneshot: OneShotExecutor::from_config(gatekeeper.clone(), bindings.clone(), &config),
            transfer: TransferGate::from_config(gatekeeper.clone(), &config),
            sessions: SessionIndex::new(&config.assistant.state_dir),
            gatekeeper,
            bindings,
            config,
        })
    }

    /// The configuration the context was built from.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The policy gatekeeper.
    pub fn gatekeeper(&self) -> &Gatekeeper {
        &self.gatekeeper
    }

    /// The interactive session coordinator.
    pub fn coordinator(&self) -> &Coordinator {
        &self.coordinator
    }

    /// The one-shot executor.
    pub fn oneshot(&self) -> &OneShotExecutor {
        &self.oneshot
    }

    /// The file transfer gate.
    pub fn transfer(&self) -> &TransferGate {
        &self.transfer
    }

    /// Pin `session_id` as the one-shot session of `caller_id`.
    pub async fn pin_session(&self, caller_id: &str, session_id: &str) -> Outcome {
        let label = format!("pin {session_id}");
        if let Err(failure) = self.gatekeeper.admit_caller(caller_id, &label) {
            return failure.into();
        }

        let outcome = match self.bindings.pin(caller_id, session_id).await {
            Ok(()) => Outcome::success(format!("pinned session {}", session_id.trim())),
            Err(e @ BindingError::EmptySessionId) => Failure::unexpected(e.to_string()).into(),
            Err(e) => {
                tracing::error!("Failed to pin session for {}: {}", caller_id, e);
                Failure::unexpected(e.to_string()).into()
            }
        };
        self.gatekeeper
            .audit(caller_id, &label, outcome.is_success(), outcome.message());
        outcome
    }

    /// List the assistant's recently active sessions.
    pub async fn list_sessions(&self, caller_id: &str, limit: usize, active_minutes: u64) -> Outcome {
        if let Err(failure) = self.gatekeeper.admit_caller(caller_id, "sessions") {
            return failure.into();
        }
        self.sessions.list(limit, active_minutes).await
    }
}
