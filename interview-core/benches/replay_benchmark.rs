use criterion::{black_box, criterion_group, criterion_main, Criterion};
use interview_core::{
    CandidateEvent, DrawingStroke, EventLog, Language, Point, Projector, RoomState,
};
use uuid::Uuid;

fn mixed_log(n: usize) -> EventLog {
    let mut log = EventLog::new("room-bench");
    let author = Uuid::new_v4();
    for i in 0..n {
        let candidate = match i % 4 {
            0 => CandidateEvent::chat(format!("message {i}")),
            1 => CandidateEvent::code(Language::Python, format!("print({i})")),
            2 => {
                let t = (i % 100) as f32 / 100.0;
                CandidateEvent::stroke(DrawingStroke::new(
                    vec![Point::new(t, t), Point::new(t, 1.0 - t)],
                    "#000000",
                    2.0,
                ))
            }
            _ => CandidateEvent::instructions(format!("round {i}")),
        };
        log.append(author, candidate);
    }
    log
}

fn bench_append(c: &mut Criterion) {
    let author = Uuid::new_v4();
    c.bench_function("log_append_1k_chat", |b| {
        b.iter(|| {
            let mut log = EventLog::new("room-bench");
            for i in 0..1000 {
                black_box(log.append(author, CandidateEvent::chat(format!("m{i}"))));
            }
        })
    });
}

fn bench_replay(c: &mut Criterion) {
    let log = mixed_log(10_000);
    c.bench_function("room_state_replay_10k", |b| {
        b.iter(|| black_box(log.replay()))
    });

    c.bench_function("room_state_fold_10k", |b| {
        b.iter(|| {
            let mut state = RoomState::default();
            for event in log.read_from(0).unwrap() {
                state.apply(event);
            }
            black_box(state)
        })
    });
}

criterion_group!(benches, bench_append, bench_replay);
criterion_main!(benches);
