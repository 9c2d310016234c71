/// Module tags used to categorize log output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogTag {
    Api,
    Breaker,
    Config,
    Holders,
    Limiter,
    Metrics,
    Onchain,
    Snapshots,
    Sweep,
}

impl LogTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogTag::Api => "API",
            LogTag::Breaker => "BREAKER",
            LogTag::Config => "CONFIG",
            LogTag::Holders => "HOLDERS",
            LogTag::Limiter => "LIMITER",
            LogTag::Metrics => "METRICS",
            LogTag::Onchain => "ONCHAIN",
            LogTag::Snapshots => "SNAPSHOTS",
            LogTag::Sweep => "SWEEP",
        }
    }
}
