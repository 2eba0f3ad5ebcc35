use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::rc::Rc;
use y_presence::awareness::{AwarenessEntry, AwarenessUpdate};
use y_presence::{Awareness, Origin, Room};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Cursor {
    x: i32,
    y: i32,
}

fn room_with_peers(peers: u64) -> (Rc<Awareness>, Room<Cursor>) {
    let awareness = Rc::new(Awareness::new(0));
    let room = Room::new(awareness.clone(), Some(Cursor { x: 0, y: 0 })).unwrap();
    let entries = (1..=peers)
        .map(|client_id| AwarenessEntry {
            client_id,
            clock: 1,
            state: json!({ "x": client_id, "y": 0 }).as_object().cloned(),
        })
        .collect();
    awareness.apply_update(AwarenessUpdate { entries }, Origin::Remote);
    (awareness, room)
}

/// Local cursor moves with self and users listeners attached
fn bench_local_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("presence_local_update");

    for peers in [1u64, 10, 100].iter() {
        group.bench_with_input(BenchmarkId::from_parameter(peers), peers, |b, &peers| {
            let (_awareness, room) = room_with_peers(peers);
            let _s = room.on_self(|me| {
                black_box(me);
            });
            let _u = room.on_users(|users| {
                black_box(users.len());
            });
            let mut x = 0;
            b.iter(|| {
                x += 1;
                room.update_presence(&json!({ "x": x })).unwrap();
            });
        });
    }

    group.finish();
}

/// Remote updates fanned out to others listeners
fn bench_remote_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("presence_remote_update");

    for listeners in [1usize, 10, 50].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(listeners),
            listeners,
            |b, &listeners| {
                let (awareness, room) = room_with_peers(10);
                let _subscriptions: Vec<_> = (0..listeners)
                    .map(|_| {
                        room.on_others(|others| {
                            black_box(others.len());
                        })
                        .unwrap()
                    })
                    .collect();
                let mut clock = 1;
                b.iter(|| {
                    clock += 1;
                    awareness.apply_update(
                        AwarenessUpdate {
                            entries: vec![AwarenessEntry {
                                client_id: 1,
                                clock,
                                state: json!({ "x": clock, "y": 0 }).as_object().cloned(),
                            }],
                        },
                        Origin::Remote,
                    );
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_local_updates, bench_remote_updates);

criterion_main!(benches);
