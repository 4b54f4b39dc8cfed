//! The session side of the peer interface: tracks every channel's
//! throughput and work balance, and redistributes or drops channels
//! through addressed chase events.

use std::{collections::BTreeMap, sync::Arc};

use caryatid_sdk::Context;
use obelisk_common::{
    messages::{ChaseEvent, Message},
    ChannelId,
};
use tokio::sync::mpsc;
use tracing::{error, info};

/// A channel needs at least this much work before splitting pays.
const MINIMUM_FOR_SPLIT: usize = 2;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerEvent {
    Started,
    /// Periodic performance report: bytes/second and work on hand.
    Rate { rate: u64, remaining: usize },
    /// The pool had nothing for this channel.
    Starved,
    Disconnected,
}

pub enum NetworkEvent {
    PeerUpdate { peer: ChannelId, event: PeerEvent },
}

#[derive(Clone, Copy, Debug, Default)]
struct ChannelStatus {
    rate: u64,
    remaining: usize,
}

/// What the session decided to do about an event.
#[derive(Clone, Debug, PartialEq, Eq)]
enum SessionAction {
    /// Channel is too slow while others wait; drop it.
    Stall(ChannelId),
    /// Channel holds work a starved channel could take.
    Split(ChannelId),
}

pub struct NetworkManager {
    context: Arc<Context<Message>>,
    chase_topic: String,
    /// Below this many bytes/second a busy channel counts as slow.
    minimum_rate: u64,
    channels: BTreeMap<ChannelId, ChannelStatus>,
    events: mpsc::Receiver<NetworkEvent>,
}

impl NetworkManager {
    pub fn new(
        context: Arc<Context<Message>>,
        chase_topic: String,
        minimum_rate: u64,
        events: mpsc::Receiver<NetworkEvent>,
    ) -> Self {
        Self {
            context,
            chase_topic,
            minimum_rate,
            channels: BTreeMap::new(),
            events,
        }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            let NetworkEvent::PeerUpdate { peer, event } = event;
            if let Some(action) = apply(&mut self.channels, self.minimum_rate, peer, event) {
                let event = match action {
                    SessionAction::Stall(channel) => {
                        info!(%channel, "stalling slow channel");
                        ChaseEvent::Stall { channel }
                    }
                    SessionAction::Split(channel) => {
                        info!(%channel, "splitting work off channel");
                        ChaseEvent::Split { channel }
                    }
                };
                self.context
                    .message_bus
                    .publish(&self.chase_topic, Arc::new(Message::Chase(event)))
                    .await
                    .unwrap_or_else(|e| error!("Failed to publish: {e}"));
            }
        }
    }
}

/// Pure session policy, separated from the bus for testability.
fn apply(
    channels: &mut BTreeMap<ChannelId, ChannelStatus>,
    minimum_rate: u64,
    peer: ChannelId,
    event: PeerEvent,
) -> Option<SessionAction> {
    match event {
        PeerEvent::Started => {
            channels.insert(peer, ChannelStatus::default());
            None
        }
        PeerEvent::Rate { rate, remaining } => {
            let status = channels.entry(peer).or_default();
            status.rate = rate;
            status.remaining = remaining;

            // A slow channel sitting on work starves the rest; only
            // worth dropping when someone else could pick it up.
            if remaining != 0 && rate < minimum_rate && channels.len() > 1 {
                Some(SessionAction::Stall(peer))
            } else {
                None
            }
        }
        PeerEvent::Starved => {
            if let Some(status) = channels.get_mut(&peer) {
                status.remaining = 0;
            }
            // Split the most loaded other channel, if any has enough.
            channels
                .iter()
                .filter(|(id, status)| **id != peer && status.remaining >= MINIMUM_FOR_SPLIT)
                .max_by_key(|(_, status)| status.remaining)
                .map(|(id, _)| SessionAction::Split(*id))
        }
        PeerEvent::Disconnected => {
            channels.remove(&peer);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> ChannelId {
        ChannelId(n)
    }

    #[test]
    fn slow_busy_channel_is_stalled_only_with_company() {
        let mut channels = BTreeMap::new();
        apply(&mut channels, 100, id(1), PeerEvent::Started);

        // Alone: nothing to gain from dropping it.
        let action = apply(
            &mut channels,
            100,
            id(1),
            PeerEvent::Rate { rate: 5, remaining: 50 },
        );
        assert_eq!(action, None);

        apply(&mut channels, 100, id(2), PeerEvent::Started);
        let action = apply(
            &mut channels,
            100,
            id(1),
            PeerEvent::Rate { rate: 5, remaining: 50 },
        );
        assert_eq!(action, Some(SessionAction::Stall(id(1))));

        // Fast channels are left alone.
        let action = apply(
            &mut channels,
            100,
            id(2),
            PeerEvent::Rate { rate: 500, remaining: 50 },
        );
        assert_eq!(action, None);

        // Idle channels are not stalled no matter how slow.
        let action = apply(
            &mut channels,
            100,
            id(2),
            PeerEvent::Rate { rate: 0, remaining: 0 },
        );
        assert_eq!(action, None);
    }

    #[test]
    fn starvation_splits_the_most_loaded_peer() {
        let mut channels = BTreeMap::new();
        apply(&mut channels, 100, id(1), PeerEvent::Started);
        apply(&mut channels, 100, id(2), PeerEvent::Started);
        apply(&mut channels, 100, id(3), PeerEvent::Started);
        apply(&mut channels, 100, id(2), PeerEvent::Rate { rate: 900, remaining: 10 });
        apply(&mut channels, 100, id(3), PeerEvent::Rate { rate: 900, remaining: 400 });

        let action = apply(&mut channels, 100, id(1), PeerEvent::Starved);
        assert_eq!(action, Some(SessionAction::Split(id(3))));
    }

    #[test]
    fn starvation_with_no_splittable_work_does_nothing() {
        let mut channels = BTreeMap::new();
        apply(&mut channels, 100, id(1), PeerEvent::Started);
        apply(&mut channels, 100, id(2), PeerEvent::Started);
        apply(&mut channels, 100, id(2), PeerEvent::Rate { rate: 900, remaining: 1 });

        let action = apply(&mut channels, 100, id(1), PeerEvent::Starved);
        assert_eq!(action, None);
    }

    #[test]
    fn disconnect_forgets_the_channel() {
        let mut channels = BTreeMap::new();
        apply(&mut channels, 100, id(1), PeerEvent::Started);
        apply(&mut channels, 100, id(1), PeerEvent::Disconnected);
        assert!(channels.is_empty());
    }
}
