//! Market-session parameter builders.
//!
//! These types describe one market session: who trades, how orders are
//! issued, and over what time window. `build()` validates the description
//! and produces the [`SessionParams`] JSON object the engine consumes and
//! the task manifest persists. The launcher itself never interprets the
//! result beyond the `endtime` field.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

/// Validation errors raised when building session parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpecError {
    #[error("session time window is inverted: start {start} > end {end}")]
    SessionTime { start: u64, end: u64 },

    #[error("order window is inverted: from {from} > to {to}")]
    OrderTime { from: u64, to: u64 },

    #[error("price range is inverted: start {start} > end {end}")]
    PriceRange { start: u32, end: u32 },

    #[error("order strategy has no price ranges")]
    EmptyRanges,
}

/// Built-in trader algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Trader {
    /// Giveaway.
    GVWY,
    /// Zero Intelligence - Constrained.
    ZIC,
    /// Shaver.
    SHVR,
    /// Sniper.
    SNPR,
    /// Zero Intelligence Plus.
    ZIP,
    /// Parameterised-Response Zero Intelligence.
    PRZI,
    /// PRZI with stochastic hill-climbing.
    PRSH,
    /// PRZI with differential evolution.
    PRDE,
}

impl Trader {
    pub fn as_str(self) -> &'static str {
        match self {
            Trader::GVWY => "GVWY",
            Trader::ZIC => "ZIC",
            Trader::SHVR => "SHVR",
            Trader::SNPR => "SNPR",
            Trader::ZIP => "ZIP",
            Trader::PRZI => "PRZI",
            Trader::PRSH => "PRSH",
            Trader::PRDE => "PRDE",
        }
    }
}

impl std::fmt::Display for Trader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How order prices step through a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepMode {
    Fixed,
    Jittered,
    Random,
}

impl StepMode {
    pub fn as_str(self) -> &'static str {
        match self {
            StepMode::Fixed => "fixed",
            StepMode::Jittered => "jittered",
            StepMode::Random => "random",
        }
    }
}

/// How orders are released over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TimeMode {
    Periodic,
    DripFixed,
    DripJitter,
    DripPoisson,
}

impl TimeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeMode::Periodic => "periodic",
            TimeMode::DripFixed => "drip-fixed",
            TimeMode::DripJitter => "drip-jitter",
            TimeMode::DripPoisson => "drip-poisson",
        }
    }
}

/// A population of one trader type on one side of the market.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraderSpec {
    pub trader: Trader,
    pub count: u32,
    /// Optional algorithm-specific arguments, passed through verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Map<String, Value>>,
}

impl TraderSpec {
    pub fn new(trader: Trader, count: u32) -> Self {
        Self {
            trader,
            count,
            args: None,
        }
    }

    /// Wire form: `["ZIP", 10]` or `["ZIP", 10, {..args..}]`.
    fn build(&self) -> Value {
        match &self.args {
            Some(args) if !args.is_empty() => json!([self.trader.as_str(), self.count, args]),
            _ => json!([self.trader.as_str(), self.count]),
        }
    }
}

/// An inclusive limit-price range for generated orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceRange {
    pub start: u32,
    pub end: u32,
}

impl PriceRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    fn build(self) -> Result<Value, SpecError> {
        if self.end < self.start {
            return Err(SpecError::PriceRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(json!([self.start, self.end]))
    }
}

/// Order generation over one time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStrategy {
    /// Window as `(from, to)` in session time units.
    pub time: (u64, u64),
    pub ranges: Vec<PriceRange>,
    pub step_mode: StepMode,
}

impl OrderStrategy {
    pub fn new(time: (u64, u64), ranges: Vec<PriceRange>, step_mode: StepMode) -> Self {
        Self {
            time,
            ranges,
            step_mode,
        }
    }

    fn build(&self) -> Result<Value, SpecError> {
        let (from, to) = self.time;
        if to < from {
            return Err(SpecError::OrderTime { from, to });
        }
        if self.ranges.is_empty() {
            return Err(SpecError::EmptyRanges);
        }
        let ranges = self
            .ranges
            .iter()
            .map(|r| r.build())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({
            "from": from,
            "to": to,
            "ranges": ranges,
            "stepmode": self.step_mode.as_str(),
        }))
    }
}

/// The full order schedule: supply and demand strategies plus timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSchedule {
    pub supply: Vec<OrderStrategy>,
    pub demand: Vec<OrderStrategy>,
    /// Reissue interval in session time units.
    pub interval: u64,
    pub time_mode: TimeMode,
}

impl OrderSchedule {
    pub fn new(
        supply: Vec<OrderStrategy>,
        demand: Vec<OrderStrategy>,
        interval: u64,
        time_mode: TimeMode,
    ) -> Self {
        Self {
            supply,
            demand,
            interval,
            time_mode,
        }
    }

    /// A schedule with identical supply and demand strategies.
    pub fn symmetric(strategies: Vec<OrderStrategy>, interval: u64, time_mode: TimeMode) -> Self {
        Self::new(strategies.clone(), strategies, interval, time_mode)
    }

    fn build(&self) -> Result<Value, SpecError> {
        let sup = self
            .supply
            .iter()
            .map(OrderStrategy::build)
            .collect::<Result<Vec<_>, _>>()?;
        let dem = self
            .demand
            .iter()
            .map(OrderStrategy::build)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(json!({
            "sup": sup,
            "dem": dem,
            "interval": self.interval,
            "timemode": self.time_mode.as_str(),
        }))
    }
}

/// Complete description of one market session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSessionSpec {
    /// Session window as `(start_time, end_time)`; `end_time` is the
    /// progress-unit total one session contributes.
    pub session_time: (u64, u64),
    pub sellers: Vec<TraderSpec>,
    pub buyers: Vec<TraderSpec>,
    pub order_schedule: OrderSchedule,
    /// Ask the engine to dump all auxiliary output files.
    #[serde(default = "default_true")]
    pub dump_all: bool,
    #[serde(default)]
    pub verbose: bool,
}

fn default_true() -> bool {
    true
}

impl MarketSessionSpec {
    pub fn new(
        session_time: (u64, u64),
        sellers: Vec<TraderSpec>,
        buyers: Vec<TraderSpec>,
        order_schedule: OrderSchedule,
    ) -> Self {
        Self {
            session_time,
            sellers,
            buyers,
            order_schedule,
            dump_all: true,
            verbose: false,
        }
    }

    /// A spec with identical seller and buyer populations.
    pub fn with_symmetric_traders(
        session_time: (u64, u64),
        traders: Vec<TraderSpec>,
        order_schedule: OrderSchedule,
    ) -> Self {
        Self::new(session_time, traders.clone(), traders, order_schedule)
    }

    /// Validates the spec and produces the engine parameter set.
    ///
    /// # Errors
    ///
    /// Returns a [`SpecError`] describing the first invalid field.
    pub fn build(&self) -> Result<SessionParams, SpecError> {
        let (start, end) = self.session_time;
        if end < start {
            return Err(SpecError::SessionTime { start, end });
        }
        let sellers: Vec<Value> = self.sellers.iter().map(TraderSpec::build).collect();
        let buyers: Vec<Value> = self.buyers.iter().map(TraderSpec::build).collect();
        let value = json!({
            "starttime": start,
            "endtime": end,
            "trader_spec": { "sellers": sellers, "buyers": buyers },
            "order_schedule": self.order_schedule.build()?,
            "dump_all": self.dump_all,
            "verbose": self.verbose,
        });
        match value {
            Value::Object(map) => Ok(SessionParams(map)),
            _ => unreachable!("session params are always a JSON object"),
        }
    }
}

/// The built parameter set handed to the engine and persisted in the task
/// manifest. Opaque to the core beyond the accessors below.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionParams(pub serde_json::Map<String, Value>);

impl SessionParams {
    /// Looks up a top-level parameter.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The session start time, if declared.
    pub fn start_time(&self) -> Option<u64> {
        self.get("starttime").and_then(Value::as_u64)
    }

    /// The session end time: the progress-unit total one session reaches.
    pub fn end_time(&self) -> Option<u64> {
        self.get("endtime").and_then(Value::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_spec() -> MarketSessionSpec {
        MarketSessionSpec::with_symmetric_traders(
            (0, 600),
            vec![
                TraderSpec::new(Trader::ZIP, 10),
                TraderSpec::new(Trader::ZIC, 10),
            ],
            OrderSchedule::symmetric(
                vec![OrderStrategy::new(
                    (0, 600),
                    vec![PriceRange::new(80, 320)],
                    StepMode::Fixed,
                )],
                30,
                TimeMode::Periodic,
            ),
        )
    }

    #[test]
    fn test_build_uses_original_key_names() {
        let params = sample_spec().build().unwrap();
        assert_eq!(params.start_time(), Some(0));
        assert_eq!(params.end_time(), Some(600));
        assert_eq!(
            params.get("trader_spec").unwrap()["sellers"][0],
            json!(["ZIP", 10])
        );
        let schedule = params.get("order_schedule").unwrap();
        assert_eq!(schedule["interval"], json!(30));
        assert_eq!(schedule["timemode"], json!("periodic"));
        assert_eq!(schedule["sup"][0]["stepmode"], json!("fixed"));
        assert_eq!(schedule["sup"][0]["ranges"][0], json!([80, 320]));
    }

    #[test]
    fn test_trader_args_appear_when_present() {
        let mut spec = sample_spec();
        let mut args = serde_json::Map::new();
        args.insert("k".to_string(), json!(4));
        spec.sellers[0].args = Some(args);
        let params = spec.build().unwrap();
        assert_eq!(
            params.get("trader_spec").unwrap()["sellers"][0],
            json!(["ZIP", 10, {"k": 4}])
        );
    }

    #[test]
    fn test_inverted_session_time_rejected() {
        let mut spec = sample_spec();
        spec.session_time = (600, 0);
        assert_eq!(
            spec.build(),
            Err(SpecError::SessionTime {
                start: 600,
                end: 0
            })
        );
    }

    #[test]
    fn test_inverted_price_range_rejected() {
        let mut spec = sample_spec();
        spec.order_schedule.supply[0].ranges[0] = PriceRange::new(320, 80);
        assert_eq!(
            spec.build(),
            Err(SpecError::PriceRange {
                start: 320,
                end: 80
            })
        );
    }

    #[test]
    fn test_empty_ranges_rejected() {
        let mut spec = sample_spec();
        spec.order_schedule.demand[0].ranges.clear();
        assert_eq!(spec.build(), Err(SpecError::EmptyRanges));
    }

    #[test]
    fn test_spec_roundtrips_through_yaml_style_json() {
        let spec = sample_spec();
        let text = serde_json::to_string(&spec).unwrap();
        let parsed: MarketSessionSpec = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, spec);
        assert_eq!(parsed.build().unwrap(), spec.build().unwrap());
    }

    #[test]
    fn test_time_mode_wire_names() {
        assert_eq!(
            serde_json::to_string(&TimeMode::DripPoisson).unwrap(),
            "\"drip-poisson\""
        );
        assert_eq!(TimeMode::DripFixed.as_str(), "drip-fixed");
    }
}
