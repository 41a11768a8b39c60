use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Counters for status resolution, accumulated across calls until reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PerformanceStats {
    pub total_checks: u64,
    pub l2_hits: u64,
    pub l3_checks: u64,
    pub total_time: Duration,
    pub l2_time: Duration,
    pub l3_time: Duration,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PerformanceReport {
    pub total_checks: u64,
    pub l2_hits: u64,
    pub l3_checks: u64,
    pub l2_hit_rate_pct: f64,
    pub total_time_ms: f64,
    pub avg_time_per_check_ms: f64,
    pub l2_time_pct: f64,
    pub l3_time_pct: f64,
}

fn percent(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 { 0.0 } else { part / whole * 100.0 }
}

impl PerformanceStats {
    pub fn record(
        &mut self,
        l2_hits: usize,
        l3_checks: usize,
        l2_time: Duration,
        l3_time: Duration,
        total: Duration,
    ) {
        self.total_checks += (l2_hits + l3_checks) as u64;
        self.l2_hits += l2_hits as u64;
        self.l3_checks += l3_checks as u64;
        self.l2_time += l2_time;
        self.l3_time += l3_time;
        self.total_time += total;
    }

    /// Share of checks answered by the quick layer, in percent.
    pub fn hit_rate(&self) -> f64 {
        percent(self.l2_hits as f64, self.total_checks as f64)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn report(&self) -> PerformanceReport {
        let total_ms = self.total_time.as_secs_f64() * 1000.0;
        let tiers_ms = (self.l2_time + self.l3_time).as_secs_f64() * 1000.0;
        PerformanceReport {
            total_checks: self.total_checks,
            l2_hits: self.l2_hits,
            l3_checks: self.l3_checks,
            l2_hit_rate_pct: self.hit_rate(),
            total_time_ms: total_ms,
            avg_time_per_check_ms: if self.total_checks == 0 {
                0.0
            } else {
                total_ms / self.total_checks as f64
            },
            l2_time_pct: percent(self.l2_time.as_secs_f64() * 1000.0, tiers_ms),
            l3_time_pct: percent(self.l3_time.as_secs_f64() * 1000.0, tiers_ms),
        }
    }
}

impl fmt::Display for PerformanceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Checked {} apps: {} quick ({:.1}%), {} via package manager",
            self.total_checks, self.l2_hits, self.l2_hit_rate_pct, self.l3_checks
        )?;
        write!(
            f,
            "Total {:.1} ms, {:.2} ms per app (quick {:.1}% / query {:.1}%)",
            self.total_time_ms, self.avg_time_per_check_ms, self.l2_time_pct, self.l3_time_pct
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn hit_rate_and_report() {
        let mut stats = PerformanceStats::default();
        stats.record(
            1,
            3,
            Duration::from_millis(10),
            Duration::from_millis(30),
            Duration::from_millis(40),
        );
        assert_eq!(stats.total_checks, 4);
        assert!(approx(stats.hit_rate(), 25.0));

        let report = stats.report();
        assert!(approx(report.avg_time_per_check_ms, 10.0));
        assert!(approx(report.l2_time_pct, 25.0));
        assert!(approx(report.l3_time_pct, 75.0));
        assert!(report.to_string().contains("1 quick (25.0%)"));
    }

    #[test]
    fn empty_stats_do_not_divide_by_zero() {
        let report = PerformanceStats::default().report();
        assert_eq!(report.l2_hit_rate_pct, 0.0);
        assert_eq!(report.avg_time_per_check_ms, 0.0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = PerformanceStats::default();
        stats.record(2, 2, Duration::ZERO, Duration::ZERO, Duration::from_millis(1));
        stats.reset();
        assert_eq!(stats, PerformanceStats::default());
    }
}
