// Copyright (c) 2025 Rajan Panneer Selvam
//
// Licensed under the Business Source License 1.1 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.mariadb.com/bsl11
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use std::env;

use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Keeps the non-blocking file writer flushing for the process lifetime.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Per-dependency levels for the stacks the probe embeds. librdkafka
/// forwards broker reconnect chatter through the `rdkafka` target on every
/// stream worker, and the HTTP stacks (actix serving the REST surface,
/// reqwest/hyper talking to the Schema Registry) log per-connection events
/// that would drown per-test tracing at debug.
const DEPENDENCY_LEVELS: &[(&str, &str)] = &[
    ("rdkafka", "warn"),
    ("librdkafka", "warn"),
    ("actix_web", "info"),
    ("actix_server", "info"),
    ("reqwest", "info"),
    ("hyper", "info"),
];

fn probe_filter() -> EnvFilter {
    let level = env::var("TESTPROBE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let mut filter = EnvFilter::new(format!("testprobe={}", level));
    for (target, target_level) in DEPENDENCY_LEVELS {
        if let Ok(directive) = format!("{}={}", target, target_level).parse() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

/// Install the process-wide subscriber. `RUST_LOG` overrides everything;
/// otherwise the probe's own targets follow `TESTPROBE_LOG_LEVEL` and the
/// embedded dependencies are pinned per `DEPENDENCY_LEVELS`.
pub fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| probe_filter());
    let stdout = tracing_subscriber::fmt::layer().with_writer(std::io::stdout);
    let registry = tracing_subscriber::registry().with(filter).with(stdout);

    // File output is opt-in. The durable record of a run is its evidence
    // drop in object storage; the process log exists for operating the
    // service, and only deployments that set a directory want it on disk.
    match env::var("TESTPROBE_LOG_DIR") {
        Ok(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "testprobe.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(writer))
                .init();
        }
        Err(_) => registry.init(),
    }
}
