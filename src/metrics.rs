use std::time::Instant;

/// Smallest interval folded into a rate update; guards against division by zero
/// for duplicate or out-of-order timestamps.
pub const MIN_DT_SECS: f64 = 1e-3;

/// The first sample of a tracker is spread over at least this many seconds.
pub const SEED_WINDOW_SECS: f64 = 1.0;

/// Time constants in the style of 1/5/15 minute load averages.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Horizon {
    Short,
    Medium,
    Long,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::Short, Horizon::Medium, Horizon::Long];

    pub fn tau_secs(self) -> f64 {
        match self {
            Horizon::Short => 60.0,
            Horizon::Medium => 300.0,
            Horizon::Long => 900.0,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Horizon::Short => "1m",
            Horizon::Medium => "5m",
            Horizon::Long => "15m",
        }
    }

    pub(crate) fn index(self) -> usize {
        match self {
            Horizon::Short => 0,
            Horizon::Medium => 1,
            Horizon::Long => 2,
        }
    }
}

#[cfg(test)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Metric {
    Messages,
    Bytes,
}

/// Exponentially weighted rate (weight per second) with time constant `tau`.
#[derive(Clone, Debug)]
pub struct DecayingRateTracker {
    tau_secs: f64,
    reference: Instant,
    last_update: Option<Instant>,
    rate: f64,
}

impl DecayingRateTracker {
    /// `reference` is the instant the first sample is measured from.
    pub fn new(tau_secs: f64, reference: Instant) -> Self {
        Self {
            tau_secs,
            reference,
            last_update: None,
            rate: 0.0,
        }
    }

    pub fn observe(&mut self, weight: f64, now: Instant) {
        let weight = if weight.is_finite() { weight.max(0.0) } else { 0.0 };
        match self.last_update {
            None => {
                let dt = secs_between(self.reference, now).max(SEED_WINDOW_SECS);
                self.rate = weight / dt;
                self.last_update = Some(now);
            }
            Some(last) => {
                let dt = secs_between(last, now).max(MIN_DT_SECS);
                let alpha = (-dt / self.tau_secs).exp();
                self.rate = self.rate * alpha + (weight / dt) * (1.0 - alpha);
                // never move the clock backwards
                if now > last {
                    self.last_update = Some(now);
                }
            }
        }
    }

    pub fn value(&self) -> f64 {
        self.rate
    }

    /// Rate as it would read at `now` if nothing was observed since the last update.
    pub fn value_at(&self, now: Instant) -> f64 {
        match self.last_update {
            None => 0.0,
            Some(last) => self.value() * (-secs_between(last, now) / self.tau_secs).exp(),
        }
    }

    #[cfg(test)]
    pub fn last_update(&self) -> Option<Instant> {
        self.last_update
    }
}

/// The six trackers kept per key: {messages, bytes} x {short, medium, long}.
#[derive(Clone, Debug)]
pub struct RateSet {
    messages: [DecayingRateTracker; 3],
    bytes: [DecayingRateTracker; 3],
}

impl RateSet {
    pub fn new(reference: Instant) -> Self {
        let make = || Horizon::ALL.map(|h| DecayingRateTracker::new(h.tau_secs(), reference));
        Self {
            messages: make(),
            bytes: make(),
        }
    }

    pub fn observe(&mut self, size_bytes: u64, now: Instant) {
        for t in self.messages.iter_mut() {
            t.observe(1.0, now);
        }
        for t in self.bytes.iter_mut() {
            t.observe(size_bytes as f64, now);
        }
    }

    #[cfg(test)]
    pub fn tracker(&self, metric: Metric, horizon: Horizon) -> &DecayingRateTracker {
        match metric {
            Metric::Messages => &self.messages[horizon.index()],
            Metric::Bytes => &self.bytes[horizon.index()],
        }
    }

    #[cfg(test)]
    pub fn value(&self, metric: Metric, horizon: Horizon) -> f64 {
        self.tracker(metric, horizon).value()
    }

    /// Message rates then byte rates, short to long, projected to `now`.
    pub fn values_at(&self, now: Instant) -> [f64; 6] {
        let mut out = [0.0; 6];
        for (i, t) in self.messages.iter().chain(self.bytes.iter()).enumerate() {
            out[i] = t.value_at(now);
        }
        out
    }
}

fn secs_between(earlier: Instant, later: Instant) -> f64 {
    later.saturating_duration_since(earlier).as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn at(origin: Instant, secs: f64) -> Instant {
        origin + Duration::from_secs_f64(secs)
    }

    #[test]
    fn value_is_zero_before_any_observation() {
        let t0 = Instant::now();
        let tracker = DecayingRateTracker::new(60.0, t0);
        assert_eq!(tracker.value(), 0.0);
        assert_eq!(tracker.value_at(at(t0, 10.0)), 0.0);
    }

    #[test]
    fn first_sample_is_spread_over_seed_window() {
        let t0 = Instant::now();
        let mut tracker = DecayingRateTracker::new(60.0, t0);
        tracker.observe(50.0, t0);
        assert!((tracker.value() - 50.0).abs() < 1e-9);

        let mut late = DecayingRateTracker::new(60.0, t0);
        late.observe(50.0, at(t0, 10.0));
        assert!((late.value() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn update_follows_exponential_smoothing() {
        let t0 = Instant::now();
        let mut tracker = DecayingRateTracker::new(60.0, t0);
        tracker.observe(1.0, t0);
        tracker.observe(10.0, at(t0, 2.0));
        let alpha = (-2.0f64 / 60.0).exp();
        let expected = 1.0 * alpha + (10.0 / 2.0) * (1.0 - alpha);
        assert!((tracker.value() - expected).abs() < 1e-9);
    }

    #[test]
    fn converges_monotonically_to_constant_rate() {
        let t0 = Instant::now();
        let mut tracker = DecayingRateTracker::new(60.0, t0);
        tracker.observe(1.0, t0);
        // 4 per second arriving every second, starting from a rate of 1
        let mut prev = tracker.value();
        for i in 1..=1200 {
            tracker.observe(4.0, at(t0, i as f64));
            let v = tracker.value();
            assert!(v >= prev - 1e-12, "rate decreased at step {i}");
            assert!(v <= 4.0 + 1e-9);
            prev = v;
        }
        assert!((tracker.value() - 4.0).abs() < 1e-3);
    }

    #[test]
    fn duplicate_timestamp_uses_floor() {
        let t0 = Instant::now();
        let mut tracker = DecayingRateTracker::new(60.0, t0);
        tracker.observe(1.0, t0);
        tracker.observe(1.0, t0);
        let alpha = (-MIN_DT_SECS / 60.0).exp();
        let expected = alpha + (1.0 / MIN_DT_SECS) * (1.0 - alpha);
        assert!(tracker.value().is_finite());
        assert!((tracker.value() - expected).abs() < 1e-9);
    }

    #[test]
    fn out_of_order_timestamp_does_not_rewind_clock() {
        let t0 = Instant::now();
        let mut tracker = DecayingRateTracker::new(60.0, t0);
        tracker.observe(1.0, at(t0, 5.0));
        tracker.observe(1.0, at(t0, 3.0));
        assert_eq!(tracker.last_update(), Some(at(t0, 5.0)));
        assert!(tracker.value() > 0.0);
    }

    #[test]
    fn rate_never_negative() {
        let t0 = Instant::now();
        let mut tracker = DecayingRateTracker::new(5.0, t0);
        tracker.observe(-10.0, t0);
        tracker.observe(f64::NAN, at(t0, 1.0));
        tracker.observe(0.0, at(t0, 2.0));
        assert!(tracker.value() >= 0.0);
    }

    #[test]
    fn long_idle_gap_collapses_to_new_sample() {
        let t0 = Instant::now();
        let mut tracker = DecayingRateTracker::new(60.0, t0);
        tracker.observe(1000.0, t0);
        tracker.observe(100.0, at(t0, 6000.0));
        let inst = 100.0 / 6000.0;
        assert!((tracker.value() - inst).abs() < 1e-6);
    }

    #[test]
    fn value_at_projects_idle_decay_without_mutation() {
        let t0 = Instant::now();
        let mut tracker = DecayingRateTracker::new(60.0, t0);
        tracker.observe(60.0, t0);
        let projected = tracker.value_at(at(t0, 60.0));
        assert!((projected - 60.0 * (-1.0f64).exp()).abs() < 1e-9);
        assert_eq!(tracker.value(), 60.0);
    }

    #[test]
    fn rate_set_updates_all_six_trackers() {
        let t0 = Instant::now();
        let mut set = RateSet::new(t0);
        set.observe(100, t0);
        for h in Horizon::ALL {
            assert_eq!(set.tracker(Metric::Messages, h).last_update(), Some(t0));
            assert_eq!(set.tracker(Metric::Bytes, h).last_update(), Some(t0));
            assert!((set.value(Metric::Messages, h) - 1.0).abs() < 1e-9);
            assert!((set.value(Metric::Bytes, h) - 100.0).abs() < 1e-9);
        }
    }

    #[test]
    fn shorter_horizon_reacts_faster() {
        let t0 = Instant::now();
        let mut set = RateSet::new(t0);
        set.observe(10, t0);
        for i in 1..=30 {
            set.observe(10, at(t0, i as f64 * 0.1));
        }
        let short = set.value(Metric::Messages, Horizon::Short);
        let long = set.value(Metric::Messages, Horizon::Long);
        assert!(short > long);
    }
}
