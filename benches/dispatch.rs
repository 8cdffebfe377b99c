use std::hint::black_box;
use std::sync::Arc;
use std::time::Instant;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use gdci::{
    Action, ActionKind, ActionManager, ActionManagerConfig, Axis, BoxError, DynObservable, ObservableId, ObservableRef,
    State, StateCollection, Ternary,
};

struct BenchObservable(ObservableId);

impl DynObservable for BenchObservable {
    fn id(&self) -> ObservableId {
        self.0
    }

    fn name(&self) -> &str {
        "bench"
    }

    fn current_state(&self) -> Arc<State> {
        Arc::new(State::default())
    }
}

struct Noop;

impl Action for Noop {
    fn perform_action(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

fn registered_manager() -> (ActionManager, ObservableRef) {
    let manager = ActionManager::new(ActionManagerConfig::default());
    let observable: ObservableRef = Arc::new(BenchObservable(ObservableId::new()));

    // A few unrelated observables so lookups hit a realistically sized map.
    for _ in 0..64 {
        manager.associate(
            ActionKind::new("noise", |_| Ok(Noop)),
            ObservableId::new(),
            StateCollection::all(),
            StateCollection::all(),
        );
    }
    manager.associate(
        ActionKind::new("noop", |_| Ok(Noop)),
        observable.id(),
        StateCollection::all(),
        StateCollection::expand(Axis::Any, Ternary::True),
    );
    (manager, observable)
}

fn bench_check_state_change(c: &mut Criterion) {
    let mut group = c.benchmark_group("check_state_change");
    group.throughput(Throughput::Elements(1));

    let off = State::new(Ternary::True, Ternary::False);
    let on = State::new(Ternary::True, Ternary::True);

    group.bench_function("miss", |b| {
        let (manager, observable) = registered_manager();
        b.iter(|| black_box(manager.check_state_change(&observable, &on, &off)));
    });

    group.bench_function("hit_enqueue", |b| {
        // Fresh manager per sample; the queue is never drained.
        b.iter_custom(|iters| {
            let (manager, observable) = registered_manager();
            let start = Instant::now();
            for _ in 0..iters {
                black_box(manager.check_state_change(&observable, &off, &on));
            }
            start.elapsed()
        });
    });

    group.finish();
}

fn bench_expand(c: &mut Criterion) {
    c.bench_function("state/expand_any_any", |b| {
        b.iter(|| black_box(StateCollection::expand(Axis::Any, Axis::Any)));
    });
    c.bench_function("state/copy_with_attributes", |b| {
        let state = State::new(Ternary::True, Ternary::True);
        for i in 0..8 {
            state.set_secondary(format!("attr{i}"), serde_json::json!(i));
        }
        b.iter(|| black_box(state.copy()));
    });
}

criterion_group!(dispatch, bench_check_state_change, bench_expand);
criterion_main!(dispatch);
