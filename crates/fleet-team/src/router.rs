use std::collections::HashMap;

use fleet_eventbus::{topics, Event, EventBus, Mailbox};
use fleet_types::{InterTeamMessage, BROADCAST};
use serde_json::json;
use tokio::sync::Mutex;

struct State {
    mailboxes: HashMap<String, Mailbox>,
    order: Vec<String>,
    log: Vec<InterTeamMessage>,
}

/// Bus-level courier for `InterTeamMessage`. Delivers targeted messages to
/// one team's mailbox and broadcasts to every team but the sender. The log
/// is append-only within a session.
pub struct Router {
    bus: EventBus,
    state: Mutex<State>,
}

impl Router {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            state: Mutex::new(State {
                mailboxes: HashMap::new(),
                order: Vec::new(),
                log: Vec::new(),
            }),
        }
    }

    pub async fn register(&self, team_id: impl Into<String>, mailbox: Mailbox) {
        let team_id = team_id.into();
        let mut state = self.state.lock().await;
        if !state.mailboxes.contains_key(&team_id) {
            state.order.push(team_id.clone());
        }
        state.mailboxes.insert(team_id, mailbox);
    }

    pub async fn unregister(&self, team_id: &str) {
        let mut state = self.state.lock().await;
        state.mailboxes.remove(team_id);
        state.order.retain(|id| id != team_id);
    }

    /// Assigns an ID/timestamp if missing, appends to the log, then
    /// delivers: targeted messages go to one mailbox, broadcasts go to every
    /// team but the sender. A recipient mailbox with no active receivers
    /// does not stop delivery to the rest.
    pub async fn route(&self, mut msg: InterTeamMessage) {
        msg.finalize();
        let sender = format!("team:{}", msg.from_team);

        let mut state = self.state.lock().await;
        state.log.push(msg.clone());

        if msg.is_broadcast() {
            for team_id in state.order.clone() {
                if team_id == msg.from_team {
                    continue;
                }
                if let Some(mailbox) = state.mailboxes.get(&team_id) {
                    let _ = mailbox.send(sender.clone(), msg.clone());
                }
            }
        } else if let Some(mailbox) = state.mailboxes.get(&msg.to_team) {
            let _ = mailbox.send(sender.clone(), msg.clone());
        }
        drop(state);

        self.bus.publish(Event::new(
            topics::TEAM_MESSAGE,
            json!({
                "id": msg.id,
                "fromTeam": msg.from_team,
                "toTeam": msg.to_team,
            }),
        ));
    }

    pub async fn messages_for_team(&self, team_id: &str) -> Vec<InterTeamMessage> {
        let state = self.state.lock().await;
        state
            .log
            .iter()
            .filter(|m| m.from_team == team_id || m.to_team == team_id || m.is_broadcast())
            .cloned()
            .collect()
    }
}
