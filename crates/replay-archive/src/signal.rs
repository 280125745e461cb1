use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// OTLP signal carried by an archive entry and addressed by `/v1/{kind}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SignalKind {
    Traces,
    Logs,
    Metrics,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [Self::Traces, Self::Logs, Self::Metrics];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Traces => "traces",
            Self::Logs => "logs",
            Self::Metrics => "metrics",
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown signal kind `{value}`"))
    }
}

/// Signal kinds selected for replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalSet {
    kinds: BTreeSet<SignalKind>,
}

impl SignalSet {
    #[must_use]
    pub fn all() -> Self {
        Self {
            kinds: SignalKind::ALL.into_iter().collect(),
        }
    }

    /// Build from per-kind inclusion switches; no switch set selects every kind.
    #[must_use]
    pub fn from_switches(traces: bool, logs: bool, metrics: bool) -> Self {
        let kinds: BTreeSet<_> = [
            (SignalKind::Traces, traces),
            (SignalKind::Logs, logs),
            (SignalKind::Metrics, metrics),
        ]
        .into_iter()
        .filter_map(|(kind, selected)| selected.then_some(kind))
        .collect();
        if kinds.is_empty() {
            Self::all()
        } else {
            Self { kinds }
        }
    }

    pub fn contains(&self, kind: SignalKind) -> bool {
        self.kinds.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = SignalKind> + '_ {
        self.kinds.iter().copied()
    }
}

impl FromIterator<SignalKind> for SignalSet {
    fn from_iter<I: IntoIterator<Item = SignalKind>>(iter: I) -> Self {
        Self {
            kinds: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for SignalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(SignalKind::as_str).collect();
        f.write_str(&names.join(", "))
    }
}
