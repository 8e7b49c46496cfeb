// Dotsync
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use dotsync_executor::{AsyncExecutor, ExecutionStrategy, ExecutorConfig, Priority};

fn bench_submit_throughput(c: &mut Criterion) {
    let executor = AsyncExecutor::new(ExecutorConfig {
        min_threads: 4,
        max_threads: 4,
        ..ExecutorConfig::default()
    });
    executor.start().unwrap();

    c.bench_function("submit_wait_100_tasks", |b| {
        b.iter(|| {
            let handles: Vec<_> = (0..100)
                .map(|i| {
                    executor
                        .submit(move || black_box(i) * 2, ExecutionStrategy::Immediate, Priority::Normal)
                        .unwrap()
                })
                .collect();
            for handle in handles {
                handle.wait().unwrap();
            }
        });
    });

    c.bench_function("submit_wait_global_queue", |b| {
        let executor = AsyncExecutor::new(ExecutorConfig {
            min_threads: 4,
            max_threads: 4,
            use_work_stealing: false,
            ..ExecutorConfig::default()
        });
        executor.start().unwrap();
        b.iter(|| {
            let handles: Vec<_> = (0..100)
                .map(|i| {
                    executor
                        .submit(move || black_box(i) * 2, ExecutionStrategy::Immediate, Priority::Normal)
                        .unwrap()
                })
                .collect();
            for handle in handles {
                handle.wait().unwrap();
            }
        });
        executor.stop();
    });

    executor.stop();
}

criterion_group!(benches, bench_submit_throughput);
criterion_main!(benches);
