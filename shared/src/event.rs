use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::ActiveState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ServerUp,
    ServerDown,
    ServiceFailed,
    ServiceRecovered,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::ServerUp => "server_up",
            EventType::ServerDown => "server_down",
            EventType::ServiceFailed => "service_failed",
            EventType::ServiceRecovered => "service_recovered",
        }
    }
}

/// A state-transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: i64,
    pub server_id: i64,
    pub ts: DateTime<Utc>,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventWithServer {
    #[serde(flatten)]
    pub event: Event,
    pub server_name: String,
}

/// Prior state tracked per server for transition detection.
/// `online: None` means unknown — primed at startup so the first pull
/// never manufactures a spurious `server_down`.
#[derive(Debug, Clone, Default)]
pub struct PrevState {
    pub online: Option<bool>,
    pub services: std::collections::HashMap<String, ActiveState>,
}

/// A detected transition, not yet persisted/deduped.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedEvent {
    pub event_type: EventType,
    pub message: String,
}

/// Pure transition logic. Does not touch dedup or persistence —
/// those are the persistence layer's job (`save_event`).
pub fn detect_transitions(
    prev: &PrevState,
    current_online: bool,
    current_services: &std::collections::HashMap<String, ActiveState>,
) -> Vec<DetectedEvent> {
    let mut events = Vec::new();

    match prev.online {
        Some(true) if !current_online => events.push(DetectedEvent {
            event_type: EventType::ServerDown,
            message: "server went offline".to_string(),
        }),
        Some(false) if current_online => events.push(DetectedEvent {
            event_type: EventType::ServerUp,
            message: "server came back online".to_string(),
        }),
        _ => {}
    }

    for (name, &current_state) in current_services {
        let prior_state = prev.services.get(name).copied();
        match (prior_state, current_state) {
            (Some(ActiveState::Active), ActiveState::Failed) => {
                events.push(DetectedEvent {
                    event_type: EventType::ServiceFailed,
                    message: format!("service {name} failed"),
                });
            }
            (Some(ActiveState::Failed), ActiveState::Active) => {
                events.push(DetectedEvent {
                    event_type: EventType::ServiceRecovered,
                    message: format!("service {name} recovered"),
                });
            }
            _ => {}
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_prior_never_produces_server_down() {
        let prev = PrevState::default();
        let events = detect_transitions(&prev, false, &Default::default());
        assert!(events.is_empty());
    }

    #[test]
    fn up_to_down_produces_server_down() {
        let prev = PrevState {
            online: Some(true),
            services: Default::default(),
        };
        let events = detect_transitions(&prev, false, &Default::default());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ServerDown);
    }

    #[test]
    fn same_state_produces_no_event() {
        let prev = PrevState {
            online: Some(true),
            services: Default::default(),
        };
        let events = detect_transitions(&prev, true, &Default::default());
        assert!(events.is_empty());
    }

    #[test]
    fn service_active_to_failed_produces_service_failed() {
        let mut prev_services = std::collections::HashMap::new();
        prev_services.insert("nginx".to_string(), ActiveState::Active);
        let prev = PrevState {
            online: Some(true),
            services: prev_services,
        };
        let mut current = std::collections::HashMap::new();
        current.insert("nginx".to_string(), ActiveState::Failed);

        let events = detect_transitions(&prev, true, &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ServiceFailed);
    }

    #[test]
    fn service_failed_to_active_produces_service_recovered() {
        let mut prev_services = std::collections::HashMap::new();
        prev_services.insert("nginx".to_string(), ActiveState::Failed);
        let prev = PrevState {
            online: Some(true),
            services: prev_services,
        };
        let mut current = std::collections::HashMap::new();
        current.insert("nginx".to_string(), ActiveState::Active);

        let events = detect_transitions(&prev, true, &current);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::ServiceRecovered);
    }

    #[test]
    fn service_inactive_to_unknown_produces_no_event() {
        let mut prev_services = std::collections::HashMap::new();
        prev_services.insert("nginx".to_string(), ActiveState::Inactive);
        let prev = PrevState {
            online: Some(true),
            services: prev_services,
        };
        let mut current = std::collections::HashMap::new();
        current.insert("nginx".to_string(), ActiveState::Unknown);

        let events = detect_transitions(&prev, true, &current);
        assert!(events.is_empty());
    }
}
