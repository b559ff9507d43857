use courier_core::subscription::SubscriptionIndex;
use criterion::{criterion_group, criterion_main, Criterion};
use rand::Rng;

fn populated_index() -> SubscriptionIndex {
    let mut index = SubscriptionIndex::new();

    for session in 0..100 {
        index
            .subscribe(session, &format!("sensors/region{}/+", session % 10))
            .unwrap();
        index
            .subscribe(session, &format!("events/node{}", session))
            .unwrap();
    }

    for session in 0..10 {
        index.subscribe(session, "sensors/*").unwrap();
    }

    index
}

fn bench_match_topic(c: &mut Criterion) {
    let index = populated_index();
    let mut rng = rand::thread_rng();

    c.bench_function("match_topic", |b| {
        b.iter(|| {
            let region = rng.gen_range(0..10);
            index.match_topic(&format!("sensors/region{}/temp", region))
        })
    });

    c.bench_function("match_topic_miss", |b| {
        b.iter(|| index.match_topic("power/grid/load"))
    });
}

criterion_group!(benches, bench_match_topic);
criterion_main!(benches);
