use crate::classification::ClassificationRecord;
use crate::error::HubError;
use crate::hub::{BinLevel, SensorReading};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Events pushed to real-time observers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubEvent {
    /// A scan cycle (or a direct classification request) produced a record
    ClassificationComplete {
        session_id: Option<String>,
        record: ClassificationRecord,
    },
    /// A bin sensor reported a reading
    SensorUpdate {
        reading: SensorReading,
        level: BinLevel,
    },
}

impl HubEvent {
    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            HubEvent::ClassificationComplete { session_id, record } => format!(
                "Classification {} ({:.2}, {}) for session {}",
                record.category,
                record.confidence,
                record.strategy_used,
                session_id.as_deref().unwrap_or("-")
            ),
            HubEvent::SensorUpdate { reading, level } => format!(
                "Bin {} at {:.1}% ({})",
                reading.bin_id, reading.fill_level, level
            ),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            HubEvent::ClassificationComplete { .. } => "classification_complete",
            HubEvent::SensorUpdate { .. } => "sensor_update",
        }
    }
}

/// Ordered fan-out of hub events over a broadcast channel
pub struct EventBus {
    sender: broadcast::Sender<HubEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified per-observer capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current observers, returning how many received it
    pub fn publish(&self, event: HubEvent) -> usize {
        match &event {
            HubEvent::ClassificationComplete { .. } => info!("{}", event.description()),
            HubEvent::SensorUpdate { .. } => debug!("{}", event.description()),
        }

        // A send error only means nobody is listening right now
        self.sender.send(event).unwrap_or(0)
    }

    /// Get the number of connected observers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

/// Event filter for selective observers
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<String>),
}

impl EventFilter {
    /// Build a filter from a comma separated list; empty means everything
    pub fn parse(list: Option<&str>) -> Self {
        let types: Vec<String> = list
            .unwrap_or_default()
            .split(',')
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();

        if types.is_empty() {
            EventFilter::All
        } else {
            EventFilter::EventTypes(types)
        }
    }

    /// Check if an event passes this filter
    pub fn matches(&self, event: &HubEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.iter().any(|t| t == event.event_type()),
        }
    }
}

/// A connected observer with filtering
pub struct Observer {
    receiver: broadcast::Receiver<HubEvent>,
    filter: EventFilter,
    name: String,
}

impl Observer {
    pub fn new(receiver: broadcast::Receiver<HubEvent>, filter: EventFilter, name: String) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next event passing the filter.
    ///
    /// `Lagged` is recoverable: the observer keeps its place after the gap.
    pub async fn recv(&mut self) -> Result<HubEvent, HubError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Observer '{}' lagged behind by {} events", self.name, n);
                    return Err(HubError::Lagged { missed: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for observer '{}'", self.name);
                    return Err(HubError::Closed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::SensorReading;
    use chrono::Utc;
    use tokio::time::{timeout, Duration};

    fn sensor_event(bin_id: &str, fill_level: f32) -> HubEvent {
        HubEvent::SensorUpdate {
            reading: SensorReading {
                bin_id: bin_id.to_string(),
                fill_level,
                temperature: None,
                humidity: None,
                received_at: Utc::now(),
            },
            level: BinLevel::Normal,
        }
    }

    #[tokio::test]
    async fn test_event_bus_preserves_order() {
        let bus = EventBus::new(16);
        let mut receiver = bus.subscribe();

        for i in 0..5 {
            bus.publish(sensor_event(&format!("bin-{}", i), i as f32));
        }

        for i in 0..5 {
            let event = timeout(Duration::from_millis(100), receiver.recv())
                .await
                .unwrap()
                .unwrap();
            match event {
                HubEvent::SensorUpdate { reading, .. } => {
                    assert_eq!(reading.bin_id, format!("bin-{}", i))
                }
                _ => panic!("Unexpected event type"),
            }
        }
    }

    #[tokio::test]
    async fn test_publish_without_observers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(sensor_event("red", 10.0)), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_filtered_observer() {
        let bus = EventBus::new(8);
        let filter = EventFilter::parse(Some("classification_complete"));
        let mut observer = Observer::new(bus.subscribe(), filter, "test".to_string());

        bus.publish(sensor_event("red", 50.0));
        drop(bus);

        // The only event is filtered out, then the bus closes
        let result = timeout(Duration::from_millis(100), observer.recv())
            .await
            .unwrap();
        assert!(matches!(result, Err(HubError::Closed)));
    }

    #[tokio::test]
    async fn test_lagging_observer_is_told_how_much_it_missed() {
        let bus = EventBus::new(2);
        let mut observer = Observer::new(bus.subscribe(), EventFilter::All, "slow".to_string());

        for i in 0..5 {
            bus.publish(sensor_event("red", i as f32));
        }

        match observer.recv().await {
            Err(HubError::Lagged { missed }) => assert_eq!(missed, 3),
            other => panic!("Expected lag, got {:?}", other.map(|e| e.event_type())),
        }
        assert!(observer.recv().await.is_ok());
    }

    #[test]
    fn test_filter_parsing() {
        assert!(matches!(EventFilter::parse(None), EventFilter::All));
        assert!(matches!(EventFilter::parse(Some(" , ")), EventFilter::All));
        let filter = EventFilter::parse(Some("sensor_update"));
        assert!(filter.matches(&sensor_event("red", 1.0)));
    }
}
