use crate::commands::Command;
use crate::session::{Session, SessionSettings};
use crate::types::{BurstTestResult, DelaySearchResult, DelayTrial};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// At most one automatic reconnect per burst; a second drop aborts the
/// burst so test suites can assert the exact retry count.
const MAX_RECONNECTS_PER_BURST: usize = 1;

/// Reliability test harness for the MK3 control protocol
///
/// The MK3 command processor can drop or starve connections when commands
/// arrive faster than it drains its queue. This harness characterizes that
/// behavior: repeated bursts measure the error rate and latency spread at
/// a fixed inter-command delay, and the delay search walks a candidate
/// ladder to find the smallest delay the device sustains reliably.
pub struct ReliabilityTester {
    settings: SessionSettings,
}

impl ReliabilityTester {
    pub fn new(settings: SessionSettings) -> Self {
        Self { settings }
    }

    /// Build a tester from the shared tunables
    pub fn from_config(config: &crate::config::Mk3Config) -> Self {
        Self::new(config.session_settings())
    }

    /// Send `command` `count` times over one session with `delay_ms` of
    /// sleep between sends
    ///
    /// Connects once up front; a connect failure yields an unambiguous
    /// result with every command marked failed and a single error. If the
    /// session drops mid-burst the harness reconnects once and continues;
    /// if it drops again (or the reconnect fails) the remaining iterations
    /// are recorded as failed and the burst aborts. Cancellation is
    /// honored between iterations and returns the partial result.
    pub async fn burst_test(
        &self,
        addr: &str,
        command: &Command,
        count: usize,
        delay_ms: u64,
        cancel: &CancellationToken,
    ) -> BurstTestResult {
        let mut result = BurstTestResult::new(count, delay_ms);
        let mut session = Session::new(self.settings.clone());

        tracing::info!(addr = %addr, count, delay_ms, "starting burst test");

        if let Err(e) = session.connect(addr).await {
            result.failed = count;
            result.errors.push(format!("connection failed: {e}"));
            result.finalize();
            return result;
        }

        let mut reconnects_used = 0;
        let mut sent = 0;

        while sent < count {
            if cancel.is_cancelled() {
                tracing::info!(addr = %addr, sent, "burst test cancelled");
                break;
            }

            match session.send(command).await {
                Ok(response) if response.success => {
                    result.successful += 1;
                    result.latencies_ms.push(response.latency_ms);
                }
                Ok(response) => {
                    result.failed += 1;
                    let reason = response
                        .error_text()
                        .unwrap_or_else(|| "no response".to_string());
                    result.errors.push(format!("command {}: {reason}", sent + 1));
                }
                Err(e) => {
                    result.failed += 1;
                    result.errors.push(format!("command {}: {e}", sent + 1));
                }
            }
            sent += 1;

            if delay_ms > 0 && sent < count {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }

            if !session.is_connected() && sent < count {
                if reconnects_used >= MAX_RECONNECTS_PER_BURST {
                    let remaining = count - sent;
                    result.failed += remaining;
                    result.errors.push(format!(
                        "session dropped again; {remaining} remaining commands not attempted"
                    ));
                    break;
                }
                reconnects_used += 1;
                tracing::warn!(addr = %addr, "connection lost mid-burst, reconnecting");
                if let Err(e) = session.connect(addr).await {
                    let remaining = count - sent;
                    result.failed += remaining;
                    result.errors.push(format!(
                        "reconnect failed: {e}; {remaining} remaining commands not attempted"
                    ));
                    break;
                }
            }
        }

        session.disconnect().await;
        result.finalize();

        tracing::info!(
            addr = %addr,
            successful = result.successful,
            error_rate = result.error_rate_percent,
            "burst test complete"
        );
        result
    }

    /// Find the smallest inter-command delay the device sustains
    ///
    /// Runs a burst test at every candidate delay in ascending order,
    /// recording a trial for each even after one passes, so the caller
    /// gets the full error-rate curve. The recommendation is the first
    /// (smallest) candidate whose error rate stays at or below
    /// `max_error_rate_percent`; `None` means no candidate passed and the
    /// caller must surface "no reliable delay found" rather than guessing.
    pub async fn find_minimum_delay(
        &self,
        addr: &str,
        command: &Command,
        candidate_delays_ms: &[u64],
        per_delay_count: usize,
        max_error_rate_percent: f64,
        cancel: &CancellationToken,
    ) -> DelaySearchResult {
        let mut delays = candidate_delays_ms.to_vec();
        delays.sort_unstable();
        delays.dedup();

        tracing::info!(addr = %addr, ?delays, "searching for minimum reliable delay");

        let mut trials = Vec::with_capacity(delays.len());
        for delay_ms in delays {
            if cancel.is_cancelled() {
                tracing::info!(addr = %addr, "delay search cancelled");
                break;
            }

            let burst = self
                .burst_test(addr, command, per_delay_count, delay_ms, cancel)
                .await;
            trials.push(DelayTrial {
                delay_ms,
                error_rate_percent: burst.error_rate_percent,
                avg_latency_ms: burst.avg_ms,
                successful: burst.successful,
                failed: burst.failed,
            });
        }

        let (recommended_delay_ms, all_passed_at_zero) =
            select_recommendation(&trials, max_error_rate_percent);

        tracing::info!(
            addr = %addr,
            recommended = ?recommended_delay_ms,
            "delay search complete"
        );

        DelaySearchResult {
            trials,
            recommended_delay_ms,
            all_passed_at_zero,
        }
    }
}

/// Pick the smallest passing delay out of an ascending trial list
fn select_recommendation(trials: &[DelayTrial], max_error_rate_percent: f64) -> (Option<u64>, bool) {
    let recommended = trials
        .iter()
        .find(|t| t.error_rate_percent <= max_error_rate_percent)
        .map(|t| t.delay_ms);
    let all_passed_at_zero = trials
        .first()
        .is_some_and(|t| t.delay_ms == 0 && t.error_rate_percent <= max_error_rate_percent);
    (recommended, all_passed_at_zero)
}
