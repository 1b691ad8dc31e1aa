//! Resource demand descriptors and node utilization snapshots.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Requirement for a number of accelerators of some kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcceleratorRequirement {
    /// How many are needed.
    pub count: u32,
    /// Broad category, e.g. `gpu`.
    pub kind: String,
    /// Specific model, if it matters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Vendor, if it matters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// Programming API that must be supported, e.g. `cuda`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
}

impl AcceleratorRequirement {
    /// `count` accelerators of `kind`, any model.
    pub fn new(count: u32, kind: impl Into<String>) -> Self {
        Self {
            count,
            kind: kind.into(),
            model: None,
            brand: None,
            api: None,
        }
    }

    /// Require a specific model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Require a specific brand.
    #[must_use]
    pub fn with_brand(mut self, brand: impl Into<String>) -> Self {
        self.brand = Some(brand.into());
        self
    }

    /// Require a specific API.
    #[must_use]
    pub fn with_api(mut self, api: impl Into<String>) -> Self {
        self.api = Some(api.into());
        self
    }

    /// Whether an accelerator described by `offer` can serve this requirement.
    /// Counts are not compared.
    #[must_use]
    pub fn is_served_by(&self, offer: &Self) -> bool {
        fn matches(wanted: Option<&String>, offered: Option<&String>) -> bool {
            wanted.is_none() || wanted == offered
        }
        self.kind == offer.kind
            && matches(self.model.as_ref(), offer.model.as_ref())
            && matches(self.brand.as_ref(), offer.brand.as_ref())
            && matches(self.api.as_ref(), offer.api.as_ref())
    }
}

impl fmt::Display for AcceleratorRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count)?;
        for part in [&self.brand, &self.model, &self.api].into_iter().flatten() {
            write!(f, " {part}")?;
        }
        write!(f, " {}", self.kind)
    }
}

/// Anything that carries a resource demand and can be admission-checked.
pub trait Requirements {
    /// Cores requested. Fractional values are allowed.
    fn cores(&self) -> f64;
    /// Memory requested, in bytes.
    fn memory(&self) -> u64;
    /// Scratch disk requested, in bytes.
    fn disk(&self) -> u64;
    /// Accelerators requested, possibly none.
    fn accelerators(&self) -> &[AcceleratorRequirement];
    /// Name to quote in diagnostics.
    fn job_name(&self) -> Option<&str> {
        None
    }
}

/// Resource demand of one unit of work.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Requirer {
    /// Name of the job, for diagnostics.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    /// Cores requested.
    pub cores: f64,
    /// Memory requested, in bytes.
    pub memory: u64,
    /// Disk requested, in bytes.
    pub disk: u64,
    /// Accelerators requested.
    #[serde(default)]
    pub accelerators: Vec<AcceleratorRequirement>,
}

impl Requirer {
    /// A demand for the given cores, memory and disk, with no accelerators.
    #[must_use]
    pub const fn new(cores: f64, memory: u64, disk: u64) -> Self {
        Self {
            job_name: None,
            cores,
            memory,
            disk,
            accelerators: Vec::new(),
        }
    }

    /// Attach a job name for diagnostics.
    #[must_use]
    pub fn with_job_name(mut self, name: impl Into<String>) -> Self {
        self.job_name = Some(name.into());
        self
    }

    /// Add an accelerator requirement.
    #[must_use]
    pub fn with_accelerator(mut self, accelerator: AcceleratorRequirement) -> Self {
        self.accelerators.push(accelerator);
        self
    }
}

impl Requirements for Requirer {
    fn cores(&self) -> f64 {
        self.cores
    }

    fn memory(&self) -> u64 {
        self.memory
    }

    fn disk(&self) -> u64 {
        self.disk
    }

    fn accelerators(&self) -> &[AcceleratorRequirement] {
        &self.accelerators
    }

    fn job_name(&self) -> Option<&str> {
        self.job_name.as_deref()
    }
}

/// Utilization and capacity of one worker node, as polled from a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    /// CPU load, 0 (all cores idle) to 1 (all cores busy).
    pub cores_used: f64,
    /// Memory pressure, 0 (none used) to 1 (all used).
    pub memory_used: f64,
    /// Cores on the node.
    pub cores_total: f64,
    /// Memory on the node, in bytes.
    pub memory_total: u64,
    /// Cores reserved by jobs, whether or not they are busy.
    pub requested_cores: f64,
    /// Memory reserved by jobs, in bytes.
    pub requested_memory: u64,
    /// Active worker processes on the node.
    pub workers: usize,
}
