use std::time::Duration;

use crank_core::prelude::ShutdownFlag;
use sysinfo::System;

/// Watches overall CPU load while a scenario runs and warns when other work
/// on the machine is likely to distort the measurements.
///
/// This never stops the scenario; it only tells the operator that the numbers
/// may be noisy.
pub(crate) fn start_monitor(shutdown: ShutdownFlag) {
    std::thread::Builder::new()
        .name("monitor".to_string())
        .spawn(move || {
            let mut sys = System::new();

            loop {
                if shutdown.should_shutdown() {
                    break;
                }

                sys.refresh_cpu_usage();
                let usage = sys.global_cpu_usage();
                if usage > 90.0 {
                    log::warn!(
                        "High CPU load detected: {usage:.1}% of all cores in use, measurements may be noisy"
                    );
                }

                std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(Duration::from_secs(1)));
            }
        })
        .expect("Failed to start monitor thread");
}
