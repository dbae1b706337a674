//! Trace orchestration
//!
//! One iteration walks through
//! `BUILDING → CONNECTED → RUNNING → STOPPING → JOINED → TERMINATED`:
//! build one behavior per population entry, connect them all (any failure
//! aborts the launch), run each on its own task until the deadline, signal
//! stop, join, then disconnect. Multi-iteration traces repeat this with a
//! cooldown and a reset in between.

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::{TraceError, TracePhase};
use super::population::{ClientPlan, PopulationPlan};
use super::report::{ClientOutcome, ClientStatus, IterationReport, PhaseRecord, TraceReport};
use super::reset::{IterationReset, NoReset};
use crate::behavior::{
    BehaviorError, BroadcastSender, ClientBehavior, ClientSession, PassiveConsumer,
    PayloadSource, PersistentProducer, RequestSource, RequestTarget, RingRelay, Role,
    SimpleReader,
};
use crate::config::TraceConfig;
use crate::event_log::{EventCounts, LogTarget, now_millis};
use crate::messaging::ClientConnector;

type ClientTask = JoinHandle<(Box<dyn ClientBehavior>, Result<(), BehaviorError>)>;

/// Runs configured client populations against a messaging service
pub struct TraceOrchestrator {
    config: TraceConfig,
    connector: Arc<dyn ClientConnector>,
    log_target: LogTarget,
    reset: Arc<dyn IterationReset>,
    payloads: PayloadSource,
}

impl TraceOrchestrator {
    /// Event logs go to the configured `LogPath`, or are only counted when unset
    pub fn new(config: TraceConfig, connector: Arc<dyn ClientConnector>) -> Self {
        let log_target = match &config.trace.log_path {
            Some(path) => LogTarget::Directory(path.clone()),
            None => LogTarget::Discard,
        };
        Self {
            config,
            connector,
            log_target,
            reset: Arc::new(NoReset),
            payloads: PayloadSource::builtin(),
        }
    }

    pub fn with_log_target(mut self, log_target: LogTarget) -> Self {
        self.log_target = log_target;
        self
    }

    pub fn with_reset(mut self, reset: Arc<dyn IterationReset>) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_payloads(mut self, payloads: PayloadSource) -> Self {
        self.payloads = payloads;
        self
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    /// Run every iteration of the trace
    pub async fn run(&self) -> Result<TraceReport, TraceError> {
        self.config.validate()?;
        let iterations = self.config.iterations();
        let mut report = TraceReport::default();

        for iteration in 0..iterations {
            if iteration > 0 {
                let cooldown = self.config.trace.cooldown;
                if !cooldown.is_zero() {
                    info!("Cooling down for {:?} before iteration {}", cooldown, iteration);
                    tokio::time::sleep(cooldown).await;
                }
                self.reset.reset(iteration).await?;
            }

            let plan = PopulationPlan::build(&self.config, iteration)?;
            let outcome = self.run_iteration(&plan).await?;
            outcome.log_summary();
            report.iterations.push(outcome);
        }

        report.log_summary();
        Ok(report)
    }

    /// Run one planned population to completion
    pub async fn run_iteration(&self, plan: &PopulationPlan) -> Result<IterationReport, TraceError> {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        let mut phases = Vec::with_capacity(6);

        enter_phase(&mut phases, TracePhase::Building, plan.iteration);
        let log_target = self.log_target.for_iteration(plan.iteration, plan.iterations);
        log_target.prepare().map_err(TraceError::LogDestination)?;

        let mut clients = Vec::with_capacity(plan.clients.len());
        for client in &plan.clients {
            clients.push(self.build_client(client, plan, &log_target)?);
        }

        enter_phase(&mut phases, TracePhase::Connected, plan.iteration);
        for i in 0..clients.len() {
            let endpoint = &plan.clients[i].endpoint;
            if let Err(e) = clients[i].connect(endpoint).await {
                error!("Trace setup failed: {}", e);
                for connected in &mut clients[..i] {
                    connected.disconnect().await;
                }
                return Err(TraceError::Setup(e));
            }
        }
        info!(
            "Connected {} clients over {} servers (run {})",
            clients.len(),
            self.config.system.servers.len(),
            run_id
        );

        enter_phase(&mut phases, TracePhase::Running, plan.iteration);
        let deadline = tokio::time::Instant::now() + self.config.trace.running_time;
        let mut stop_handles = Vec::with_capacity(clients.len());
        let mut tasks: Vec<ClientTask> = Vec::with_capacity(clients.len());
        for mut client in clients {
            stop_handles.push(client.stop_handle());
            tasks.push(tokio::spawn(async move {
                let result = client.run().await;
                (client, result)
            }));
        }
        tokio::time::sleep_until(deadline).await;

        enter_phase(&mut phases, TracePhase::Stopping, plan.iteration);
        for handle in &stop_handles {
            handle.stop();
        }

        enter_phase(&mut phases, TracePhase::Joined, plan.iteration);
        let mut joined = Vec::with_capacity(tasks.len());
        for (task, client) in tasks.into_iter().zip(&plan.clients) {
            match task.await {
                Ok((behavior, Ok(()))) => joined.push((Some(behavior), ClientStatus::Completed)),
                Ok((behavior, Err(e))) => {
                    debug!("{} failed: {}", client.identity.username, e);
                    counter!("queuetrace_client_failures_total", "role" => client.identity.role.prefix())
                        .increment(1);
                    joined.push((
                        Some(behavior),
                        ClientStatus::Failed {
                            reason: e.to_string(),
                        },
                    ));
                }
                Err(e) => {
                    error!("{} task did not complete: {}", client.identity.username, e);
                    counter!("queuetrace_client_failures_total", "role" => client.identity.role.prefix())
                        .increment(1);
                    joined.push((
                        None,
                        ClientStatus::Panicked {
                            reason: e.to_string(),
                        },
                    ));
                }
            }
        }

        enter_phase(&mut phases, TracePhase::Terminated, plan.iteration);
        let mut outcomes = Vec::with_capacity(joined.len());
        for ((behavior, status), client) in joined.into_iter().zip(&plan.clients) {
            let events = match behavior {
                Some(mut behavior) => {
                    behavior.disconnect().await;
                    behavior.session().events().clone()
                }
                None => EventCounts::default(),
            };
            outcomes.push(ClientOutcome {
                username: client.identity.username.clone(),
                role: client.identity.role,
                server: client.endpoint.clone(),
                status,
                events,
            });
        }

        Ok(IterationReport {
            run_id,
            iteration: plan.iteration,
            population: plan.counts,
            duration_ms: started.elapsed().as_millis() as u64,
            phases,
            clients: outcomes,
        })
    }

    fn build_client(
        &self,
        client: &ClientPlan,
        plan: &PopulationPlan,
        log_target: &LogTarget,
    ) -> Result<Box<dyn ClientBehavior>, TraceError> {
        let trace = &self.config.trace;
        let identity = client.identity.clone();
        let log = log_target
            .open(&identity.username)
            .map_err(|source| TraceError::Log {
                username: identity.username.clone(),
                source,
            })?;
        let messaging = self.connector.client(&identity.username);
        let session = ClientSession::new(identity, messaging, log, trace.poll_interval);
        let partition = &plan.partition;

        let behavior: Box<dyn ClientBehavior> = match client.identity.role {
            Role::Alice => Box::new(BroadcastSender::new(
                session,
                Arc::clone(&partition.general),
                trace.broadcast_fanout,
                self.payloads.clone(),
                trace.message_size,
                trace.wait,
            )),
            Role::Bob => Box::new(SimpleReader::new(
                session,
                Arc::clone(&partition.general),
                trace.wait,
            )),
            Role::Larry => Box::new(RingRelay::new(
                session,
                plan.counts.larry,
                Arc::clone(&partition.general),
                trace.message_size,
            )),
            Role::Tola => Box::new(RequestSource::new(
                session,
                partition.pair_queue()?.to_string(),
                self.payloads.clone(),
                trace.message_size,
            )),
            Role::Maruja => Box::new(RequestTarget::new(
                session,
                partition.pair_queue()?.to_string(),
            )),
            Role::Rick => Box::new(PassiveConsumer::new(
                session,
                partition.shared_queue()?.to_string(),
            )),
            Role::Carl => Box::new(PersistentProducer::new(
                session,
                partition.shared_queue()?.to_string(),
                self.payloads.clone(),
                trace.message_size,
            )),
        };
        Ok(behavior)
    }
}

fn enter_phase(phases: &mut Vec<PhaseRecord>, phase: TracePhase, iteration: usize) {
    info!("Iteration {}: {}", iteration, phase);
    phases.push(PhaseRecord {
        phase,
        at_ms: now_millis(),
    });
}
