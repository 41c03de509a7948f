#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Property tests for the room registry: membership bookkeeping stays
//! consistent under arbitrary join/leave sequences.

use pairline_proto::identity::{PeerId, RoomName};
use pairline_relay::rooms::{Member, RoomRegistry};
use proptest::prelude::*;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

const ROOMS: [&str; 3] = ["room-1", "lobby", "ops"];

#[derive(Debug, Clone)]
enum Op {
    Join { peer: u8, room: usize },
    Leave { peer: u8 },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6, 0usize..ROOMS.len()).prop_map(|(peer, room)| Op::Join { peer, room }),
        (0u8..6).prop_map(|peer| Op::Leave { peer }),
    ]
}

fn member(peer: u8) -> Member {
    let (tx, _rx) = mpsc::unbounded_channel();
    let (kill, _) = oneshot::channel();
    Member::new(PeerId::new(format!("c{peer}")), tx, kill, Instant::now())
}

proptest! {
    #[test]
    fn membership_matches_model(ops in proptest::collection::vec(arb_op(), 0..64)) {
        let mut registry = RoomRegistry::new(RoomName::new("room-1"));
        // Model: ordered (peer, room) list in join order.
        let mut model: Vec<(PeerId, RoomName)> = Vec::new();

        for op in ops {
            match op {
                Op::Join { peer, room } => {
                    let id = PeerId::new(format!("c{peer}"));
                    let room = RoomName::new(ROOMS[room]);
                    model.retain(|(p, _)| p != &id);
                    model.push((id, room.clone()));
                    registry.add(&room, member(peer));
                }
                Op::Leave { peer } => {
                    let id = PeerId::new(format!("c{peer}"));
                    let was_member = model.iter().any(|(p, _)| p == &id);
                    model.retain(|(p, _)| p != &id);
                    prop_assert_eq!(registry.remove(&id).is_some(), was_member);
                }
            }

            prop_assert_eq!(registry.connection_count(), model.len());
            prop_assert!(registry.lookup(&RoomName::new("room-1")).is_some());

            let total: usize = registry.rooms().map(|(_, r)| r.len()).sum();
            prop_assert_eq!(total, model.len());

            for name in ROOMS {
                let room = RoomName::new(name);
                let expected: Vec<PeerId> = model
                    .iter()
                    .filter(|(_, r)| r == &room)
                    .map(|(p, _)| p.clone())
                    .collect();
                match registry.lookup(&room) {
                    Some(r) => prop_assert_eq!(r.ids(), expected.clone()),
                    None => prop_assert!(expected.is_empty()),
                }
                if name != "room-1" && expected.is_empty() {
                    prop_assert!(registry.lookup(&room).is_none());
                }
            }
        }
    }
}
