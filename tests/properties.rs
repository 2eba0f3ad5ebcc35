use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::rc::Rc;
use y_presence::awareness::{AwarenessEntry, AwarenessUpdate};
use y_presence::{Awareness, Origin, Room};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Cursor {
    x: i32,
    y: i32,
}

#[derive(Debug, Clone)]
enum Op {
    SetLocal(i32, i32),
    UpdateLocal(i32),
    RemoteJoin(u64, i32),
    RemoteLeave(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<i32>(), any::<i32>()).prop_map(|(x, y)| Op::SetLocal(x, y)),
        any::<i32>().prop_map(Op::UpdateLocal),
        (2u64..6, any::<i32>()).prop_map(|(id, x)| Op::RemoteJoin(id, x)),
        (2u64..6).prop_map(Op::RemoteLeave),
    ]
}

proptest! {
    #[test]
    fn views_partition_users(ops in prop::collection::vec(op(), 0..40)) {
        let awareness = Rc::new(Awareness::new(1));
        let room = Room::new(awareness.clone(), Some(Cursor { x: 0, y: 0 })).unwrap();
        let mut clock = 0;

        for op in ops {
            clock += 1;
            match op {
                Op::SetLocal(x, y) => room.set_presence(&Cursor { x, y }).unwrap(),
                Op::UpdateLocal(x) => room.update_presence(&json!({ "x": x })).unwrap(),
                Op::RemoteJoin(client_id, x) => {
                    awareness.apply_update(
                        AwarenessUpdate {
                            entries: vec![AwarenessEntry {
                                client_id,
                                clock,
                                state: json!({ "x": x, "y": 0 }).as_object().cloned(),
                            }],
                        },
                        Origin::Remote,
                    );
                }
                Op::RemoteLeave(client_id) => {
                    awareness.apply_update(
                        AwarenessUpdate {
                            entries: vec![AwarenessEntry { client_id, clock, state: None }],
                        },
                        Origin::Remote,
                    );
                }
            }

            let me = room.get_self();
            let others = room.get_others();
            let users = room.get_users();

            prop_assert!(others.iter().all(|user| user.id != me.id));

            let user_ids: HashSet<_> = users.iter().map(|user| user.id).collect();
            let mut expected: HashSet<_> = others.iter().map(|user| user.id).collect();
            expected.insert(me.id);
            prop_assert_eq!(user_ids, expected);
            prop_assert_eq!(users.len(), others.len() + 1);
        }
    }

    #[test]
    fn update_keeps_untouched_fields(x in any::<i32>(), y in any::<i32>(), next_x in any::<i32>()) {
        let room = Room::new(Rc::new(Awareness::new(1)), Some(Cursor { x, y })).unwrap();
        room.update_presence(&json!({ "x": next_x })).unwrap();
        prop_assert_eq!(room.get_self().presence, Some(Cursor { x: next_x, y }));
    }
}
