use std::fmt;

/// Type tag carried by every selector this attestor emits
pub const SELECTOR_TYPE: &str = "k8s";

/// A typed identity fact about a workload, rendered as `k8s:<value>`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Selector {
    pub kind: &'static str,
    pub value: String,
}

impl Selector {
    pub fn k8s(value: impl Into<String>) -> Self {
        Self {
            kind: SELECTOR_TYPE,
            value: value.into(),
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}
