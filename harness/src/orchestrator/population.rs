//! Population planning: who runs, on which server, against which queues

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::behavior::{ClientIdentity, Role};
use crate::config::{RoleCounts, TraceConfig};
use crate::messaging::ServerEndpoint;

/// Planning errors
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("No server configured")]
    NoServers,

    #[error("Iteration {iteration} out of range ({iterations} iterations)")]
    IterationOutOfRange { iteration: usize, iterations: usize },

    #[error("{needed} queues needed, {available} available")]
    NotEnoughQueues { needed: usize, available: usize },

    #[error("No queue reserved for {0}")]
    MissingQueue(Role),
}

/// `<base><i>` for `i` in `[0, count)`
pub fn queue_names(base: &str, count: usize) -> Vec<String> {
    (0..count).map(|i| format!("{base}{i}")).collect()
}

/// Server index of the `index`-th client of a role
pub fn assign_server(index: usize, servers: usize) -> usize {
    if servers == 0 { 0 } else { index % servers }
}

/// Which queues each role family uses.
///
/// The last queue goes to Rick/Carl and the one before it to Tola/Maruja,
/// each only when that family is present. Alice, Bob and Larry share the rest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuePartition {
    pub general: Arc<[String]>,
    pub pair: Option<String>,
    pub shared: Option<String>,
}

impl QueuePartition {
    pub fn new(queues: &[String], counts: &RoleCounts) -> Result<Self, PlanError> {
        let needed = counts.required_queues();
        if queues.len() < needed {
            return Err(PlanError::NotEnoughQueues {
                needed,
                available: queues.len(),
            });
        }

        let mut remaining = queues;
        let shared = if counts.has_shared_queue() {
            let (last, rest) = remaining.split_last().ok_or(PlanError::MissingQueue(Role::Rick))?;
            remaining = rest;
            Some(last.clone())
        } else {
            None
        };
        let pair = if counts.has_pairs() {
            let (last, rest) = remaining.split_last().ok_or(PlanError::MissingQueue(Role::Tola))?;
            remaining = rest;
            Some(last.clone())
        } else {
            None
        };

        Ok(Self {
            general: remaining.iter().cloned().collect(),
            pair,
            shared,
        })
    }

    pub fn pair_queue(&self) -> Result<&str, PlanError> {
        self.pair.as_deref().ok_or(PlanError::MissingQueue(Role::Tola))
    }

    pub fn shared_queue(&self) -> Result<&str, PlanError> {
        self.shared.as_deref().ok_or(PlanError::MissingQueue(Role::Rick))
    }
}

/// One client of the population
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientPlan {
    pub identity: ClientIdentity,
    pub server_index: usize,
    pub endpoint: ServerEndpoint,
}

/// Everything needed to launch one iteration
#[derive(Debug, Clone, Serialize)]
pub struct PopulationPlan {
    pub iteration: usize,
    pub iterations: usize,
    pub counts: RoleCounts,
    pub clients: Vec<ClientPlan>,
    pub partition: QueuePartition,
}

impl PopulationPlan {
    pub fn build(config: &TraceConfig, iteration: usize) -> Result<Self, PlanError> {
        let iterations = config.iterations();
        let counts = *config
            .trace
            .populations
            .get(iteration)
            .ok_or(PlanError::IterationOutOfRange {
                iteration,
                iterations,
            })?;
        let servers = &config.system.servers;
        if servers.is_empty() {
            return Err(PlanError::NoServers);
        }

        let partition = QueuePartition::new(&config.queue_names(), &counts)?;

        let mut clients = Vec::with_capacity(counts.total());
        let mut push = |role: Role, index: usize| {
            let server_index = assign_server(index, servers.len());
            clients.push(ClientPlan {
                identity: ClientIdentity::new(role, index),
                server_index,
                endpoint: servers[server_index].clone(),
            });
        };

        for role in [Role::Alice, Role::Bob, Role::Larry] {
            for index in 0..counts.count(role) {
                push(role, index);
            }
        }
        for index in 0..counts.tola_maruja {
            push(Role::Tola, index);
            push(Role::Maruja, index);
        }
        for role in [Role::Rick, Role::Carl] {
            for index in 0..counts.count(role) {
                push(role, index);
            }
        }

        Ok(Self {
            iteration,
            iterations,
            counts,
            clients,
            partition,
        })
    }

    /// Clients per server index
    pub fn clients_per_server(&self, servers: usize) -> Vec<usize> {
        let mut per_server = vec![0; servers];
        for client in &self.clients {
            if let Some(count) = per_server.get_mut(client.server_index) {
                *count += 1;
            }
        }
        per_server
    }
}

impl fmt::Display for PopulationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Iteration {} of {}: {} clients",
            self.iteration + 1,
            self.iterations,
            self.clients.len()
        )?;
        for role in Role::ALL {
            let count = self.counts.count(role);
            if count > 0 {
                writeln!(f, "  {:<7} {:>5}  {}", role.prefix(), count, role.description())?;
            }
        }

        let general = self.partition.general.len();
        match (self.partition.general.first(), self.partition.general.last()) {
            (Some(first), Some(last)) => {
                writeln!(f, "  queues  {general} general ({first} .. {last})")?
            }
            _ => writeln!(f, "  queues  none general")?,
        }
        if let Some(pair) = &self.partition.pair {
            writeln!(f, "  pair queue    {pair}")?;
        }
        if let Some(shared) = &self.partition.shared {
            writeln!(f, "  shared queue  {shared}")?;
        }

        for client in &self.clients {
            writeln!(
                f,
                "  {:<12} -> server {} ({})",
                client.identity.username, client.server_index, client.endpoint
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(servers: usize, queues: usize, counts: RoleCounts) -> TraceConfig {
        let mut config = TraceConfig::default();
        config.system.queue_base_name = "Q".to_string();
        config.system.queue_count = queues;
        config.system.servers = (0..servers)
            .map(|i| ServerEndpoint::new(format!("server-{i}"), 4000 + i as u16))
            .collect();
        config.trace.populations = vec![counts];
        config
    }

    #[test]
    fn test_queue_names() {
        assert_eq!(queue_names("Q", 3), vec!["Q0", "Q1", "Q2"]);
        assert!(queue_names("Q", 0).is_empty());
    }

    #[test]
    fn test_round_robin_sharding() {
        for servers in [1, 2, 5] {
            let counts = RoleCounts {
                alice: 7,
                bob: 11,
                ..RoleCounts::default()
            };
            let plan = PopulationPlan::build(&config_with(servers, 10, counts), 0).unwrap();
            for client in &plan.clients {
                assert_eq!(client.server_index, client.identity.index % servers);
                assert_eq!(
                    client.endpoint.address,
                    format!("server-{}", client.identity.index % servers)
                );
            }
        }
    }

    #[test]
    fn test_pairs_share_a_server() {
        let counts = RoleCounts {
            tola_maruja: 3,
            ..RoleCounts::default()
        };
        let plan = PopulationPlan::build(&config_with(2, 4, counts), 0).unwrap();
        let names: Vec<&str> = plan
            .clients
            .iter()
            .map(|c| c.identity.username.as_str())
            .collect();
        assert_eq!(names, vec!["Tola0", "Maruja0", "Tola1", "Maruja1", "Tola2", "Maruja2"]);
        for pair in plan.clients.chunks(2) {
            assert_eq!(pair[0].server_index, pair[1].server_index);
        }
    }

    #[test]
    fn test_usernames_are_unique() {
        let counts = RoleCounts {
            alice: 3,
            bob: 3,
            larry: 4,
            tola_maruja: 2,
            rick: 2,
            carl: 2,
        };
        let plan = PopulationPlan::build(&config_with(2, 10, counts), 0).unwrap();
        let mut names: Vec<&str> = plan
            .clients
            .iter()
            .map(|c| c.identity.username.as_str())
            .collect();
        assert_eq!(names.len(), counts.total());
        names.sort();
        names.dedup();
        assert_eq!(names.len(), counts.total());
    }

    #[test]
    fn test_partition_reserves_tail_queues() {
        let queues = queue_names("Q", 5);

        let all = RoleCounts {
            larry: 1,
            tola_maruja: 1,
            carl: 1,
            ..RoleCounts::default()
        };
        let partition = QueuePartition::new(&queues, &all).unwrap();
        assert_eq!(&*partition.general, &queues[..3]);
        assert_eq!(partition.pair.as_deref(), Some("Q3"));
        assert_eq!(partition.shared.as_deref(), Some("Q4"));

        let pairs_only = RoleCounts {
            alice: 1,
            tola_maruja: 1,
            ..RoleCounts::default()
        };
        let partition = QueuePartition::new(&queues, &pairs_only).unwrap();
        assert_eq!(partition.general.len(), 4);
        assert_eq!(partition.pair.as_deref(), Some("Q4"));
        assert!(partition.shared_queue().is_err());

        let general_only = RoleCounts {
            bob: 1,
            ..RoleCounts::default()
        };
        let partition = QueuePartition::new(&queues, &general_only).unwrap();
        assert_eq!(&*partition.general, &queues[..]);
    }

    #[test]
    fn test_partition_needs_enough_queues() {
        let counts = RoleCounts {
            larry: 1,
            tola_maruja: 1,
            rick: 1,
            ..RoleCounts::default()
        };
        let err = QueuePartition::new(&queue_names("Q", 2), &counts).unwrap_err();
        assert!(matches!(err, PlanError::NotEnoughQueues { needed: 3, available: 2 }));
    }

    #[test]
    fn test_iteration_out_of_range() {
        let config = config_with(1, 2, RoleCounts { bob: 1, ..RoleCounts::default() });
        assert!(matches!(
            PopulationPlan::build(&config, 1),
            Err(PlanError::IterationOutOfRange { iteration: 1, iterations: 1 })
        ));
    }

    #[test]
    fn test_plan_display_lists_clients() {
        let counts = RoleCounts {
            alice: 1,
            rick: 1,
            ..RoleCounts::default()
        };
        let plan = PopulationPlan::build(&config_with(2, 3, counts), 0).unwrap();
        let text = plan.to_string();
        assert!(text.contains("Iteration 1 of 1: 2 clients"));
        assert!(text.contains("shared queue  Q2"));
        assert!(text.contains("Rick0"));
        assert_eq!(plan.clients_per_server(2), vec![2, 0]);
    }

    #[test]
    fn test_plan_serializes_partition() {
        let counts = RoleCounts {
            bob: 2,
            tola_maruja: 1,
            ..RoleCounts::default()
        };
        let plan = PopulationPlan::build(&config_with(1, 3, counts), 0).unwrap();
        let value = serde_json::to_value(&plan).unwrap();

        assert_eq!(value["partition"]["general"], serde_json::json!(["Q0", "Q1"]));
        assert_eq!(value["partition"]["pair"], "Q2");
        assert_eq!(value["clients"][0]["identity"]["username"], "Bob0");
    }
}
