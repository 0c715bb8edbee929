use async_event_loop::{EventLoop, Value};
use criterion::{criterion_group, criterion_main, Criterion};
use futures_lite::future;

const TIMERS: usize = 1_000;
const MICROTASKS: usize = 10_000;
const CHAIN: usize = 1_000;
const INPUTS: usize = 250;

fn create(c: &mut Criterion) {
    c.bench_function("event_loop::create", |b| {
        b.iter(|| {
            let lp = EventLoop::new();
            lp.set_timeout(0, |_| Ok(())).unwrap();
            lp.run_until_idle().unwrap();
        })
    });
}

fn timers(c: &mut Criterion) {
    let mut group = c.benchmark_group("timers");

    group.bench_function("event_loop::set_timeout_random", |b| {
        b.iter(|| {
            let lp = EventLoop::new();
            for _ in 0..TIMERS {
                lp.set_timeout(fastrand::i64(0..1_000), |_| Ok(())).unwrap();
            }
            lp.run_until_idle().unwrap();
        })
    });

    group.bench_function("event_loop::clear_timeout_half", |b| {
        b.iter(|| {
            let lp = EventLoop::new();
            let ids: Vec<_> = (0..TIMERS)
                .map(|i| lp.set_timeout(i as i64, |_| Ok(())).unwrap())
                .collect();
            for id in ids.iter().step_by(2) {
                lp.clear_timeout(*id);
            }
            lp.run_until_idle().unwrap();
        })
    });

    group.finish();
}

fn microtasks(c: &mut Criterion) {
    let mut group = c.benchmark_group("microtasks");

    group.bench_function("event_loop::queue_microtask", |b| {
        b.iter(|| {
            let lp = EventLoop::new();
            for _ in 0..MICROTASKS {
                lp.queue_microtask(|_| Ok(()));
            }
            lp.run_until_idle().unwrap();
        })
    });

    group.bench_function("event_loop::recursive_microtask", |b| {
        fn again(lp: &EventLoop, left: usize) {
            if left > 0 {
                lp.queue_microtask(move |lp| {
                    again(lp, left - 1);
                    Ok(())
                });
            }
        }

        b.iter(|| {
            let lp = EventLoop::new();
            again(&lp, MICROTASKS);
            lp.run_until_idle().unwrap();
        })
    });

    group.finish();
}

fn promises(c: &mut Criterion) {
    let mut group = c.benchmark_group("promises");

    group.bench_function("promise::then_chain", |b| {
        b.iter(|| {
            let lp = EventLoop::new();
            let mut p = lp.resolve(0);
            for _ in 0..CHAIN {
                p = p.then(|_, v| Ok((v.as_number().unwrap_or(0.0) + 1.0).into()));
            }
            lp.run_until_idle().unwrap();
        })
    });

    group.bench_function("promise::all", |b| {
        b.iter(|| {
            let lp = EventLoop::new();
            let inputs: Vec<Value> = (0..INPUTS)
                .map(|i| lp.delay(fastrand::u64(0..100), i as u32).into())
                .collect();
            lp.all(inputs);
            lp.run_until_idle().unwrap();
        })
    });

    group.bench_function("promise::spawn_yield", |b| {
        b.iter(|| {
            let lp = EventLoop::new();
            for _ in 0..INPUTS {
                lp.spawn(async {
                    future::yield_now().await;
                    Ok(Value::Undefined)
                });
            }
            lp.run_until_idle().unwrap();
        })
    });

    group.finish();
}

criterion_group!(benches, create, timers, microtasks, promises);
criterion_main!(benches);
