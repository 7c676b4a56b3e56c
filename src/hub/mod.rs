//! Telemetry and broadcast hub.
//!
//! One actor task owns the classification tallies and the latest reading per
//! bin. Every mutation arrives as a [`HubCommand`] over an mpsc channel, and
//! every broadcast leaves through the same task, so observers see events in
//! the order the actor handled them.

mod sensor;

pub use sensor::{BinLevel, BinStatus, SensorPayload, SensorReading};

use crate::classification::{ClassificationRecord, Strategy, WasteCategory};
use crate::config::HubConfig;
use crate::error::HubError;
use crate::events::{EventBus, EventFilter, HubEvent, Observer};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Running classification statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_classifications: u64,
    pub category_counts: BTreeMap<String, u64>,
    pub model_classifications: u64,
    pub llm_classifications: u64,
    pub timestamp: DateTime<Utc>,
}

impl StatsSnapshot {
    pub fn count(&self, category: WasteCategory) -> u64 {
        self.category_counts
            .get(category.key())
            .copied()
            .unwrap_or(0)
    }
}

enum HubCommand {
    RecordClassification {
        category: WasteCategory,
        strategy: Strategy,
    },
    PublishClassification {
        session_id: Option<String>,
        record: Box<ClassificationRecord>,
    },
    IngestSensor {
        reading: SensorReading,
        reply: oneshot::Sender<BinStatus>,
    },
    Stats {
        reply: oneshot::Sender<StatsSnapshot>,
    },
    Bins {
        reply: oneshot::Sender<Vec<BinStatus>>,
    },
}

struct HubActor {
    events: EventBus,
    warning_level: f32,
    full_level: f32,
    total: u64,
    per_category: BTreeMap<WasteCategory, u64>,
    per_strategy: HashMap<Strategy, u64>,
    bins: HashMap<String, SensorReading>,
}

impl HubActor {
    fn new(events: EventBus, config: &HubConfig) -> Self {
        Self {
            events,
            warning_level: config.warning_level,
            full_level: config.full_level,
            total: 0,
            per_category: WasteCategory::ALL.into_iter().map(|c| (c, 0)).collect(),
            per_strategy: HashMap::new(),
            bins: HashMap::new(),
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<HubCommand>, cancel: CancellationToken) {
        info!("Telemetry hub started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Telemetry hub stopping");
                    break;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!("All hub handles dropped");
                        break;
                    }
                }
            }
        }
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::RecordClassification { category, strategy } => {
                self.total += 1;
                *self.per_category.entry(category).or_insert(0) += 1;
                *self.per_strategy.entry(strategy).or_insert(0) += 1;
            }
            HubCommand::PublishClassification { session_id, record } => {
                self.events.publish(HubEvent::ClassificationComplete {
                    session_id,
                    record: *record,
                });
            }
            HubCommand::IngestSensor { reading, reply } => {
                let stored = self.store(reading);
                let level = self.level(&stored);
                let status = BinStatus::from_reading(&stored, level);
                self.events.publish(HubEvent::SensorUpdate {
                    reading: stored,
                    level,
                });
                let _ = reply.send(status);
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            HubCommand::Bins { reply } => {
                let _ = reply.send(self.bins());
            }
        }
    }

    /// Latest-wins per bin; an identical re-delivery keeps the stored reading
    fn store(&mut self, reading: SensorReading) -> SensorReading {
        if let Some(existing) = self.bins.get(&reading.bin_id) {
            if existing.same_measurement(&reading) {
                debug!("Duplicate reading for bin {}", reading.bin_id);
                return existing.clone();
            }
        }
        self.bins.insert(reading.bin_id.clone(), reading.clone());
        reading
    }

    fn level(&self, reading: &SensorReading) -> BinLevel {
        BinLevel::from_fill(reading.fill_level, self.warning_level, self.full_level)
    }

    fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_classifications: self.total,
            category_counts: self
                .per_category
                .iter()
                .map(|(category, count)| (category.key().to_string(), *count))
                .collect(),
            model_classifications: self.per_strategy.get(&Strategy::Model).copied().unwrap_or(0),
            llm_classifications: self.per_strategy.get(&Strategy::Llm).copied().unwrap_or(0),
            timestamp: Utc::now(),
        }
    }

    fn bins(&self) -> Vec<BinStatus> {
        let mut bins: Vec<BinStatus> = self
            .bins
            .values()
            .map(|reading| BinStatus::from_reading(reading, self.level(reading)))
            .collect();
        bins.sort_by(|a, b| a.bin_id.cmp(&b.bin_id));
        bins
    }
}

/// Cloneable handle to the hub actor
#[derive(Clone)]
pub struct TelemetryHub {
    commands: mpsc::Sender<HubCommand>,
    events: EventBus,
}

impl TelemetryHub {
    /// Spawn the actor; it stops when `cancel` fires or every handle is dropped
    pub fn spawn(config: &HubConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (commands, receiver) = mpsc::channel(config.command_capacity.max(1));
        let events = EventBus::new(config.event_capacity);
        let actor = HubActor::new(events.clone(), config);
        let task = tokio::spawn(actor.run(receiver, cancel));
        (Self { commands, events }, task)
    }

    async fn send(&self, command: HubCommand) -> Result<(), HubError> {
        self.commands.send(command).await.map_err(|_| HubError::Closed)
    }

    /// Register a new observer of the event stream
    pub fn subscribe(&self, filter: EventFilter, name: impl Into<String>) -> Observer {
        Observer::new(self.events.subscribe(), filter, name.into())
    }

    pub fn observer_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Count a completed classification in the statistics
    pub async fn record_classification(&self, record: &ClassificationRecord) -> Result<(), HubError> {
        self.send(HubCommand::RecordClassification {
            category: record.category,
            strategy: record.strategy_used,
        })
        .await
    }

    /// Broadcast a classification result to observers
    pub async fn publish_classification(
        &self,
        session_id: Option<String>,
        record: ClassificationRecord,
    ) -> Result<(), HubError> {
        self.send(HubCommand::PublishClassification {
            session_id,
            record: Box::new(record),
        })
        .await
    }

    /// Store a validated reading and broadcast it
    pub async fn ingest_sensor(&self, reading: SensorReading) -> Result<BinStatus, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::IngestSensor { reading, reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    pub async fn stats(&self) -> Result<StatsSnapshot, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Stats { reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Latest status of every bin, ordered by bin id
    pub async fn bins(&self) -> Result<Vec<BinStatus>, HubError> {
        let (reply, response) = oneshot::channel();
        self.send(HubCommand::Bins { reply }).await?;
        response.await.map_err(|_| HubError::Closed)
    }
}
