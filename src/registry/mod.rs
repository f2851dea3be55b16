use std::fmt;

/// MetricId identifies one tracked kernel metric.
///
/// The set is fixed at build time; the store's slot array is indexed by the
/// discriminant, so values must stay dense starting at zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MetricId {
    RunQueueLatency = 0,
    SchedMigrations = 1,
    PageFaultsMajor = 2,
    PageFaultsMinor = 3,
    SchedSwitches = 4,
    SchedSwitchesVoluntary = 5,
    PageAllocs = 6,
    PageFrees = 7,
    SwapInPages = 8,
    SwapOutPages = 9,
    OomKills = 10,
    LastOomVictimPid = 11,
}

/// Maximum MetricId value, used for array sizing.
pub const MAX_METRIC_ID: usize = 11;
/// Number of MetricId variants.
pub const METRIC_CARDINALITY: usize = MAX_METRIC_ID + 1;

/// Aggregation semantics of a metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    /// Monotonic, aggregated by addition.
    Counter,
    /// Last-write-wins, aggregated by replacement.
    Gauge,
}

impl MetricKind {
    /// Returns the canonical export label.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

impl MetricId {
    /// Returns the canonical metric name used in exports and logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunQueueLatency => "run_queue_latency_ns",
            Self::SchedMigrations => "sched_migrations_count",
            Self::PageFaultsMajor => "major_page_faults_count",
            Self::PageFaultsMinor => "minor_page_faults_count",
            Self::SchedSwitches => "sched_switches_count",
            Self::SchedSwitchesVoluntary => "sched_switches_voluntary",
            Self::PageAllocs => "page_allocs_count",
            Self::PageFrees => "page_frees_count",
            Self::SwapInPages => "swap_in_pages",
            Self::SwapOutPages => "swap_out_pages",
            Self::OomKills => "oom_kills_count",
            Self::LastOomVictimPid => "last_oom_victim_pid",
        }
    }

    /// Returns the metric's aggregation kind. A given id has exactly one
    /// kind for its lifetime.
    pub const fn kind(self) -> MetricKind {
        match self {
            Self::RunQueueLatency | Self::LastOomVictimPid => MetricKind::Gauge,
            _ => MetricKind::Counter,
        }
    }

    /// Returns the slot index for this id.
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Convert from a raw u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::RunQueueLatency),
            1 => Some(Self::SchedMigrations),
            2 => Some(Self::PageFaultsMajor),
            3 => Some(Self::PageFaultsMinor),
            4 => Some(Self::SchedSwitches),
            5 => Some(Self::SchedSwitchesVoluntary),
            6 => Some(Self::PageAllocs),
            7 => Some(Self::PageFrees),
            8 => Some(Self::SwapInPages),
            9 => Some(Self::SwapOutPages),
            10 => Some(Self::OomKills),
            11 => Some(Self::LastOomVictimPid),
            _ => None,
        }
    }

    /// Convert from the canonical metric name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "run_queue_latency_ns" => Some(Self::RunQueueLatency),
            "sched_migrations_count" => Some(Self::SchedMigrations),
            "major_page_faults_count" => Some(Self::PageFaultsMajor),
            "minor_page_faults_count" => Some(Self::PageFaultsMinor),
            "sched_switches_count" => Some(Self::SchedSwitches),
            "sched_switches_voluntary" => Some(Self::SchedSwitchesVoluntary),
            "page_allocs_count" => Some(Self::PageAllocs),
            "page_frees_count" => Some(Self::PageFrees),
            "swap_in_pages" => Some(Self::SwapInPages),
            "swap_out_pages" => Some(Self::SwapOutPages),
            "oom_kills_count" => Some(Self::OomKills),
            "last_oom_victim_pid" => Some(Self::LastOomVictimPid),
            _ => None,
        }
    }

    /// Return all metric ids in registry-declaration order.
    pub fn all() -> &'static [Self] {
        &[
            Self::RunQueueLatency,
            Self::SchedMigrations,
            Self::PageFaultsMajor,
            Self::PageFaultsMinor,
            Self::SchedSwitches,
            Self::SchedSwitchesVoluntary,
            Self::PageAllocs,
            Self::PageFrees,
            Self::SwapInPages,
            Self::SwapOutPages,
            Self::OomKills,
            Self::LastOomVictimPid,
        ]
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_id_roundtrip() {
        for i in 0..=MAX_METRIC_ID as u8 {
            let id = MetricId::from_u8(i).expect("valid metric id");
            assert_eq!(id as u8, i);
        }
        assert!(MetricId::from_u8(12).is_none());
    }

    #[test]
    fn test_from_name_roundtrip() {
        for id in MetricId::all() {
            assert_eq!(MetricId::from_name(id.as_str()), Some(*id));
        }
        assert_eq!(MetricId::from_name("not_a_metric"), None);
    }

    #[test]
    fn test_all_is_dense_and_ordered() {
        let all = MetricId::all();
        assert_eq!(all.len(), METRIC_CARDINALITY);
        for (i, id) in all.iter().enumerate() {
            assert_eq!(id.index(), i);
        }
    }

    #[test]
    fn test_kinds() {
        assert_eq!(MetricId::RunQueueLatency.kind(), MetricKind::Gauge);
        assert_eq!(MetricId::LastOomVictimPid.kind(), MetricKind::Gauge);
        assert_eq!(MetricId::SchedMigrations.kind(), MetricKind::Counter);
        assert_eq!(MetricId::OomKills.kind(), MetricKind::Counter);
    }

    #[test]
    fn test_display() {
        assert_eq!(MetricId::RunQueueLatency.to_string(), "run_queue_latency_ns");
        assert_eq!(MetricKind::Counter.to_string(), "counter");
        assert_eq!(MetricKind::Gauge.to_string(), "gauge");
    }
}
