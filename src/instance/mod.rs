// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Engine shell
//!
//! The [`Instance`] is the explicit context object of the engine: system
//! identity, configuration, and the area list, with a defined construction
//! and teardown. Nothing here is process-global, so multiple instances can
//! coexist in one process, which is what the tests do.
//!
//! Execution is single-threaded and cooperative: the event loop pulls one
//! parsed event at a time (decoder output, interface events, timer expiries)
//! and runs the resulting state transitions to completion before the next.
//! Timer traffic goes to the [`TimerManager`]; transmit signals go to the
//! external hello/CSNP/PSNP transmitters.

pub mod actions;
pub mod area;
pub mod timer_manager;

use std::time::Instant;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use crate::config::{Config, ConfigError};
use crate::logging::{Facility, Logger};
use crate::protocol::circuit::CsmEvent;
use crate::protocol::{adjacency, events};
use crate::protocol::{ProtocolEvent, TimerCancel};
use crate::{log_debug, log_info, log_warning};
use crate::{AddressFamily, SystemId};

pub use actions::{EngineAction, EngineNotification, EngineOutput, HandlerResult, PduSend};
pub use area::Area;
pub use timer_manager::{TimerCommand, TimerManager};

/// One routing engine instance.
pub struct Instance {
    pub system_id: SystemId,
    pub config: Config,
    pub areas: Vec<Area>,
    logger: Logger,
}

impl Instance {
    /// Build an instance from validated configuration.
    pub fn new(config: Config, logger: Logger) -> Result<Self, ConfigError> {
        config.validate()?;
        let area = Area::new(&config);
        Ok(Self {
            system_id: config.system_id,
            areas: vec![area],
            config,
            logger,
        })
    }

    /// The instance's (single) area.
    pub fn area(&self) -> &Area {
        &self.areas[0]
    }

    pub fn area_mut(&mut self) -> &mut Area {
        &mut self.areas[0]
    }

    /// Feed one event through the engine and fully process its effects.
    pub fn handle_event(&mut self, event: ProtocolEvent, now: Instant) -> EngineOutput {
        let logger = self.logger.clone();
        let system_id = self.system_id;

        let result = match event {
            ProtocolEvent::AdminEnable { interface } => {
                self.circuit_csm(&interface, CsmEvent::Enable, now)
            }
            ProtocolEvent::AdminDisable { interface } => {
                self.circuit_csm(&interface, CsmEvent::Disable, now)
            }
            ProtocolEvent::InterfaceUp { interface, info } => {
                self.circuit_csm(&interface, CsmEvent::InterfaceUp(info), now)
            }
            ProtocolEvent::InterfaceDown { interface } => {
                self.circuit_csm(&interface, CsmEvent::InterfaceDown, now)
            }
            ProtocolEvent::LanHelloReceived {
                interface,
                level,
                hello,
            } => {
                let area = &mut self.areas[0];
                match area.circuits.get_mut(&interface) {
                    Some(circuit) => {
                        adjacency::process_lan_hello(circuit, level, &hello, now, &logger)
                    }
                    None => {
                        log_debug!(
                            logger,
                            Facility::Instance,
                            &format!("{interface}: hello for unknown circuit dropped")
                        );
                        HandlerResult::new()
                    }
                }
            }
            ProtocolEvent::P2pHelloReceived { interface, hello } => {
                let area = &mut self.areas[0];
                match area.circuits.get_mut(&interface) {
                    Some(circuit) => adjacency::process_p2p_hello(circuit, &hello, now, &logger),
                    None => {
                        log_debug!(
                            logger,
                            Facility::Instance,
                            &format!("{interface}: hello for unknown circuit dropped")
                        );
                        HandlerResult::new()
                    }
                }
            }
            ProtocolEvent::LspReceived {
                interface,
                level,
                lsp,
            } => {
                let area = &mut self.areas[0];
                if !area.usage.has(level) {
                    log_warning!(
                        logger,
                        Facility::Instance,
                        &format!("{interface}: {level} LSP while that level is inactive")
                    );
                    HandlerResult::new()
                } else {
                    let lsp_id = lsp.lsp_id;
                    let accepted = area.lsdb_mut(level).insert_received(lsp, now);
                    let mut result = HandlerResult::new();
                    if accepted {
                        log_debug!(
                            logger,
                            Facility::Lsdb,
                            &format!("{interface}: accepted {level} LSP {lsp_id}")
                        );
                        for family in AddressFamily::all() {
                            result.add_action(EngineAction::ScheduleSpf { level, family });
                        }
                    }
                    result
                }
            }
            ProtocolEvent::SystemTypeChange { usage } => {
                events::system_type_changed(&mut self.areas[0], usage, system_id, now, &logger)
            }
            ProtocolEvent::CircuitTypeChange { interface, usage } => events::circuit_type_changed(
                &mut self.areas[0],
                &interface,
                usage,
                system_id,
                now,
                &logger,
            ),
            ProtocolEvent::TimerExpired(timer) => {
                self.areas[0].timer_expired(timer, system_id, now, &logger)
            }
        };

        self.areas[0].process_result(result, system_id, now, &logger)
    }

    fn circuit_csm(&mut self, interface: &str, event: CsmEvent, now: Instant) -> HandlerResult {
        let Some(cfg) = self.config.interface(interface).cloned() else {
            log_debug!(
                self.logger,
                Facility::Instance,
                &format!("{interface}: not configured for routing, event ignored")
            );
            return HandlerResult::new();
        };
        let logger = self.logger.clone();
        self.areas[0].circuit_event(&cfg, self.system_id, event, now, &logger)
    }

    /// Teardown: every timer owned by this instance must be canceled so no
    /// callback can fire against freed state.
    pub fn shutdown_cancels(&self) -> Vec<TimerCancel> {
        self.areas.iter().flat_map(|a| a.shutdown_cancels()).collect()
    }

    /// Cooperative event loop.
    ///
    /// Bootstraps by administratively enabling every configured interface,
    /// then processes events until the channel closes. Interface state and
    /// parsed PDUs arrive from external integrations on `events`; the timer
    /// manager feeds its expiries into the same channel.
    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<ProtocolEvent>,
        timer_tx: mpsc::Sender<TimerCommand>,
        send_tx: mpsc::Sender<PduSend>,
    ) -> Result<()> {
        log_info!(
            self.logger,
            Facility::Instance,
            &format!(
                "instance {} starting as {} ({})",
                self.config.area_tag, self.system_id, self.config.level_usage
            )
        );

        let interfaces: Vec<String> = self
            .config
            .interfaces
            .iter()
            .map(|i| i.name.clone())
            .collect();
        for interface in interfaces {
            let output = self.handle_event(ProtocolEvent::AdminEnable { interface }, Instant::now());
            flush(&timer_tx, &send_tx, output).await?;
        }

        while let Some(event) = events.recv().await {
            let output = self.handle_event(event, Instant::now());
            flush(&timer_tx, &send_tx, output).await?;
        }

        log_info!(
            self.logger,
            Facility::Instance,
            &format!("instance {} shutting down", self.config.area_tag)
        );
        for cancel in self.shutdown_cancels() {
            // Best-effort: the timer manager may already be gone
            let _ = timer_tx.send(TimerCommand::Cancel(cancel)).await;
        }
        Ok(())
    }
}

/// Forward one batch of engine output. Timers are scheduled before cancels
/// are applied, so a teardown sweep in the same batch wins over timers it
/// covers.
async fn flush(
    timer_tx: &mpsc::Sender<TimerCommand>,
    send_tx: &mpsc::Sender<PduSend>,
    output: EngineOutput,
) -> Result<()> {
    for timer in output.timers {
        timer_tx
            .send(TimerCommand::Schedule(timer))
            .await
            .map_err(|_| anyhow!("timer manager unavailable"))?;
    }
    for cancel in output.cancels {
        timer_tx
            .send(TimerCommand::Cancel(cancel))
            .await
            .map_err(|_| anyhow!("timer manager unavailable"))?;
    }
    for send in output.sends {
        send_tx
            .send(send)
            .await
            .map_err(|_| anyhow!("transmitter unavailable"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{InterfaceInfo, LanHello, TimerType};
    use crate::{LanId, Level, LevelUsage, Snpa};
    use std::time::Duration;

    fn test_config() -> Config {
        Config::parse(
            r#"{
                system_id: "0000.0000.0001",
                area_tag: "test",
                area_addresses: ["49.0001"],
                interfaces: [{ name: "eth0" }],
            }"#,
        )
        .unwrap()
    }

    fn test_instance() -> Instance {
        Instance::new(test_config(), Logger::ring(1024).0).unwrap()
    }

    fn iface_info() -> InterfaceInfo {
        InterfaceInfo {
            ifindex: 3,
            mtu: 1500,
            snpa: Some("aa:00:00:00:00:01".parse().unwrap()),
            prefixes: vec!["10.0.0.1/24".parse().unwrap()],
        }
    }

    fn hello_from(last: u8, seen: Vec<Snpa>) -> LanHello {
        let id = SystemId([0, 0, 0, 0, 0, last]);
        LanHello {
            source_id: id,
            source_snpa: Snpa([0xaa, 0, 0, 0, 0, last]),
            circuit_type: LevelUsage::Level1And2,
            priority: 64,
            holding_time: Duration::from_secs(30),
            lan_id: LanId::system(id),
            area_addresses: vec!["49.0001".parse().unwrap()],
            seen_snpas: seen,
            ipv4_addresses: Vec::new(),
            ipv6_addresses: Vec::new(),
            families: vec![AddressFamily::Ipv4],
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = Config::parse(
            r#"{ system_id: "0000.0000.0000", area_tag: "x", interfaces: [] }"#,
        )
        .unwrap();
        assert!(Instance::new(config, Logger::ring(16).0).is_err());
    }

    #[test]
    fn test_end_to_end_adjacency_and_timers() {
        let mut instance = test_instance();
        let now = Instant::now();

        instance.handle_event(
            ProtocolEvent::AdminEnable {
                interface: "eth0".to_string(),
            },
            now,
        );
        let output = instance.handle_event(
            ProtocolEvent::InterfaceUp {
                interface: "eth0".to_string(),
                info: iface_info(),
            },
            now,
        );
        // Circuit up: hello/election/PSNP timers plus deferred regeneration
        assert!(output
            .timers
            .iter()
            .any(|t| matches!(t.timer_type, TimerType::LanHello { .. })));
        assert!(output
            .timers
            .iter()
            .any(|t| matches!(t.timer_type, TimerType::LspRegenerate { .. })));

        // A two-way hello brings the neighbor up and arms its hold timer
        let local: Snpa = "aa:00:00:00:00:01".parse().unwrap();
        let output = instance.handle_event(
            ProtocolEvent::LanHelloReceived {
                interface: "eth0".to_string(),
                level: Level::L1,
                hello: hello_from(9, vec![local]),
            },
            now,
        );
        assert!(output
            .timers
            .iter()
            .any(|t| matches!(t.timer_type, TimerType::AdjacencyHold { .. })));
        let circuit = instance.area().circuit("eth0").unwrap();
        assert_eq!(circuit.level(Level::L1).up_adjacency_count, 1);

        // Unconfigured interfaces are ignored
        let output = instance.handle_event(
            ProtocolEvent::AdminEnable {
                interface: "wlan0".to_string(),
            },
            now,
        );
        assert!(output.is_empty());
    }

    #[test]
    fn test_interface_down_cancels_circuit_timers() {
        let mut instance = test_instance();
        let now = Instant::now();

        instance.handle_event(
            ProtocolEvent::AdminEnable {
                interface: "eth0".to_string(),
            },
            now,
        );
        instance.handle_event(
            ProtocolEvent::InterfaceUp {
                interface: "eth0".to_string(),
                info: iface_info(),
            },
            now,
        );

        let output = instance.handle_event(
            ProtocolEvent::InterfaceDown {
                interface: "eth0".to_string(),
            },
            now,
        );
        assert!(output.cancels.contains(&TimerCancel::Circuit {
            interface: "eth0".to_string()
        }));
    }

    #[test]
    fn test_received_lsp_schedules_spf() {
        let mut instance = test_instance();
        let now = Instant::now();
        let remote = SystemId([0, 0, 0, 0, 0, 9]);

        let lsp = crate::lsdb::ReceivedLsp {
            lsp_id: crate::LspId::base(LanId::system(remote)),
            seq_number: 1,
            checksum: 0,
            remaining_lifetime: Duration::from_secs(1200),
            payload: crate::lsdb::LspPayload::default(),
        };
        instance.handle_event(
            ProtocolEvent::LspReceived {
                interface: "eth0".to_string(),
                level: Level::L1,
                lsp: lsp.clone(),
            },
            now,
        );

        assert!(instance
            .area()
            .lsdb(Level::L1)
            .get(&crate::LspId::base(LanId::system(remote)))
            .is_some());
        // First request ran immediately
        assert_eq!(
            instance.area().spf_tree(Level::L1, AddressFamily::Ipv4).runcount,
            1
        );

        // A duplicate is rejected and triggers nothing
        let output = instance.handle_event(
            ProtocolEvent::LspReceived {
                interface: "eth0".to_string(),
                level: Level::L1,
                lsp,
            },
            now,
        );
        assert!(output.timers.is_empty());
    }

    #[test]
    fn test_shutdown_cancels_everything() {
        let mut instance = test_instance();
        let now = Instant::now();
        instance.handle_event(
            ProtocolEvent::AdminEnable {
                interface: "eth0".to_string(),
            },
            now,
        );

        let cancels = instance.shutdown_cancels();
        assert!(cancels.contains(&TimerCancel::Circuit {
            interface: "eth0".to_string()
        }));
        assert!(cancels.contains(&TimerCancel::Level { level: Level::L1 }));
        assert!(cancels.contains(&TimerCancel::Level { level: Level::L2 }));
    }
}
