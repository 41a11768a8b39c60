use regex::Regex;

/// Progress never reported before the process has exited.
pub const RUNNING_CAP: u8 = 95;

#[derive(Debug, Clone, Copy)]
enum Step {
    Fixed(u8),
    /// `min(base + per_line * lines, cap)`
    Ramp { base: f64, per_line: f64, cap: f64 },
}

const fn ramp(base: f64, per_line: f64, cap: f64) -> Step {
    Step::Ramp { base, per_line, cap }
}

/// Ordered; the first marker found in a line wins.
const MARKERS: &[(&str, Step)] = &[
    // apt
    ("reading package lists", Step::Fixed(10)),
    ("building dependency tree", Step::Fixed(15)),
    ("reading state information", Step::Fixed(20)),
    ("the following new packages will be installed", Step::Fixed(25)),
    ("need to get", Step::Fixed(30)),
    ("get:", ramp(30.0, 2.0, 60.0)),
    ("fetched", Step::Fixed(65)),
    ("unpacking", ramp(65.0, 2.0, 80.0)),
    ("setting up", ramp(80.0, 2.0, 90.0)),
    ("processing triggers", Step::Fixed(90)),
    // yum / dnf
    ("resolving dependencies", Step::Fixed(15)),
    ("checking for conflicts", Step::Fixed(20)),
    ("downloading packages", ramp(25.0, 3.0, 60.0)),
    ("installing", ramp(45.0, 4.0, 85.0)),
    ("cleanup", Step::Fixed(90)),
    ("complete!", Step::Fixed(95)),
    // pacman
    ("checking dependencies", Step::Fixed(15)),
    ("checking for conflicting packages", Step::Fixed(20)),
    ("downloading required keys", Step::Fixed(25)),
    ("checking package integrity", Step::Fixed(30)),
    ("loading package files", Step::Fixed(35)),
    ("checking available disk space", Step::Fixed(40)),
    ("running post-transaction hooks", Step::Fixed(90)),
    // generic
    ("downloading", ramp(20.0, 2.0, 50.0)),
    ("extracting", ramp(50.0, 3.0, 70.0)),
    ("configuring", ramp(70.0, 2.0, 85.0)),
    ("done", Step::Fixed(95)),
];

impl Step {
    fn value(self, lines: usize) -> f64 {
        match self {
            Step::Fixed(v) => f64::from(v),
            Step::Ramp { base, per_line, cap } => (base + per_line * lines as f64).min(cap),
        }
    }
}

/// Turns package manager output into a rough, monotonic percentage.
#[derive(Debug, Clone)]
pub struct ProgressEstimator {
    command: String,
    lines: usize,
    current: u8,
    percent: Option<Regex>,
}

impl ProgressEstimator {
    pub fn new(command_line: &str) -> Self {
        Self {
            command: command_line.to_lowercase(),
            lines: 0,
            current: 0,
            percent: Regex::new(r"(\d+)%").ok(),
        }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Feed one non-empty line. Returns the new percentage if it went up.
    pub fn observe(&mut self, line: &str) -> Option<u8> {
        self.lines += 1;
        let estimate = self.estimate(line).min(RUNNING_CAP);
        if estimate > self.current {
            self.current = estimate;
            Some(estimate)
        } else {
            None
        }
    }

    /// The process exited.
    pub fn finish(&mut self) -> u8 {
        self.current = 100;
        self.current
    }

    /// Raw estimate for `line` given the lines seen so far, before capping.
    pub fn estimate(&self, line: &str) -> u8 {
        let lower = line.to_lowercase();
        let n = self.lines;

        if let Some((_, step)) = MARKERS.iter().find(|(marker, _)| lower.contains(marker)) {
            return step.value(n) as u8;
        }

        if let Some(p) = self
            .percent
            .as_ref()
            .and_then(|re| re.captures(line))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
        {
            let value = if lower.contains("download") {
                (30.0 + p * 0.3).min(60.0)
            } else if lower.contains("install") || lower.contains("setup") {
                (60.0 + p * 0.3).min(90.0)
            } else {
                (20.0 + p * 0.7).min(95.0)
            };
            return value as u8;
        }

        let fallback = if self.command.contains("install") {
            ramp(10.0, 1.5, 85.0)
        } else if self.command.contains("remove") || self.command.contains("uninstall") {
            ramp(20.0, 3.0, 85.0)
        } else {
            ramp(5.0, 2.0, 80.0)
        };
        fallback.value(n) as u8
    }
}
