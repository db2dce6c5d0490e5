//! Wraps a reader or writer with absolute or percentage-based rate
//! gating. See spec section 4.3.

use std::str::FromStr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;

use crate::error::{LimiterError, PluginError};
use crate::message::Message;
use crate::plugin::{Input, Output};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterSpec {
    /// Permit up to N events per second; excess is dropped silently.
    Absolute(u32),
    /// Admit message iff `rand() mod 100 < N`.
    Percentage(u8),
}

impl FromStr for LimiterSpec {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(pct) = s.strip_suffix('%') {
            let n: u8 = pct
                .parse()
                .map_err(|_| LimiterError::InvalidSpec(s.to_string()))?;
            if n > 100 {
                return Err(LimiterError::InvalidSpec(s.to_string()));
            }
            Ok(LimiterSpec::Percentage(n))
        } else {
            let n: u32 = s
                .parse()
                .map_err(|_| LimiterError::InvalidSpec(s.to_string()))?;
            Ok(LimiterSpec::Absolute(n))
        }
    }
}

/// Token-bucket (absolute) / coin-flip (percentage) gate, shared by the
/// input- and output-side limiter wrappers.
#[derive(Debug)]
struct RateGate {
    spec: LimiterSpec,
    window_start: Instant,
    admitted_in_window: u32,
}

impl RateGate {
    fn new(spec: LimiterSpec) -> Self {
        Self {
            spec,
            window_start: Instant::now(),
            admitted_in_window: 0,
        }
    }

    fn admit(&mut self) -> bool {
        match self.spec {
            LimiterSpec::Absolute(capacity) => {
                let now = Instant::now();
                if now.duration_since(self.window_start) >= Duration::from_secs(1) {
                    self.window_start = now;
                    self.admitted_in_window = 0;
                }
                if self.admitted_in_window < capacity {
                    self.admitted_in_window += 1;
                    true
                } else {
                    false
                }
            }
            LimiterSpec::Percentage(pct) => rand::thread_rng().gen_range(0..100) < pct,
        }
    }
}

/// Wraps an [`Output`], limiting dispatch.
pub struct LimitedOutput<O: Output> {
    inner: O,
    gate: RateGate,
}

impl<O: Output> LimitedOutput<O> {
    pub fn new(inner: O, spec: LimiterSpec) -> Self {
        Self {
            inner,
            gate: RateGate::new(spec),
        }
    }
}

#[async_trait]
impl<O: Output> Output for LimitedOutput<O> {
    async fn write(&mut self, msg: &Message) -> Result<(), PluginError> {
        if self.gate.admit() {
            self.inner.write(msg).await
        } else {
            Ok(())
        }
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.inner.close().await
    }

    fn name(&self) -> String {
        format!("limiter({})", self.inner.name())
    }
}

/// Wraps an [`Input`], limiting ingestion.
pub struct LimitedInput<I: Input> {
    inner: I,
    gate: RateGate,
}

impl<I: Input> LimitedInput<I> {
    pub fn new(inner: I, spec: LimiterSpec) -> Self {
        Self {
            inner,
            gate: RateGate::new(spec),
        }
    }
}

#[async_trait]
impl<I: Input> Input for LimitedInput<I> {
    async fn read(&mut self) -> Result<Option<Message>, PluginError> {
        loop {
            match self.inner.read().await? {
                Some(_) if !self.gate.admit() => continue,
                other => return Ok(other),
            }
        }
    }

    async fn close(&mut self) -> Result<(), PluginError> {
        self.inner.close().await
    }

    fn name(&self) -> String {
        format!("limiter({})", self.inner.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_absolute_spec() {
        assert_eq!("10".parse::<LimiterSpec>().unwrap(), LimiterSpec::Absolute(10));
    }

    #[test]
    fn parses_percentage_spec() {
        assert_eq!("50%".parse::<LimiterSpec>().unwrap(), LimiterSpec::Percentage(50));
    }

    #[test]
    fn rejects_garbage_spec() {
        assert!("abc".parse::<LimiterSpec>().is_err());
        assert!("150%".parse::<LimiterSpec>().is_err());
    }

    #[test]
    fn absolute_gate_admits_at_most_capacity_per_window() {
        let mut gate = RateGate::new(LimiterSpec::Absolute(5));
        let admitted = (0..20).filter(|_| gate.admit()).count();
        assert_eq!(admitted, 5);
    }

    #[test]
    fn percentage_zero_admits_nothing() {
        let mut gate = RateGate::new(LimiterSpec::Percentage(0));
        assert!((0..200).all(|_| !gate.admit()));
    }

    #[test]
    fn percentage_hundred_admits_everything() {
        let mut gate = RateGate::new(LimiterSpec::Percentage(100));
        assert!((0..200).all(|_| gate.admit()));
    }
}
