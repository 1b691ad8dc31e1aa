//! Admission-failure diagnostics and accelerator admission hooks.

use std::collections::VecDeque;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::requirer::{AcceleratorRequirement, Requirements};

/// Resource a job can be rejected for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// CPU cores.
    Cores,
    /// Memory, in bytes.
    Memory,
    /// Scratch disk, in bytes.
    Disk,
    /// Accelerators such as GPUs.
    Accelerators,
}

impl ResourceKind {
    /// Lower-case name used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cores => "cores",
            Self::Memory => "memory",
            Self::Disk => "disk",
            Self::Accelerators => "accelerators",
        }
    }

    /// Command-line flag that sets the ceiling for this resource, if any.
    #[must_use]
    pub const fn ceiling_flag(self) -> Option<&'static str> {
        match self {
            Self::Cores => Some("--maxCores"),
            Self::Memory => Some("--maxMemory"),
            Self::Disk => Some("--maxDisk"),
            Self::Accelerators => None,
        }
    }

    const fn is_bytes(self) -> bool {
        matches!(self, Self::Memory | Self::Disk)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An amount of some resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceAmount {
    /// Number of cores.
    Cores(f64),
    /// Bytes of memory or disk.
    Bytes(u64),
    /// A list of accelerators.
    Accelerators(Vec<AcceleratorRequirement>),
}

impl fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cores(cores) => write!(f, "{cores}"),
            Self::Bytes(bytes) => write!(f, "{bytes}"),
            Self::Accelerators(list) => {
                f.write_str("[")?;
                for (i, accelerator) in list.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{accelerator}")?;
                }
                f.write_str("]")
            }
        }
    }
}

/// A job asked for more of a resource than a batch system can provide.
///
/// Carries structured fields so callers can branch on [`Self::resource`];
/// the `Display` form is the user-facing explanation.
#[derive(Debug, Clone, PartialEq)]
pub struct InsufficientSystemResources {
    /// Name of the job that asked, if known.
    pub job_name: Option<String>,
    /// The resource that was over budget.
    pub resource: ResourceKind,
    /// The amount requested.
    pub requested: Option<ResourceAmount>,
    /// The ceiling the request was compared against.
    pub available: Option<ResourceAmount>,
    /// The batch system that could not provide the resource.
    pub batch_system: Option<String>,
    /// Where the resource was to come from; a path, for disk.
    pub source: Option<String>,
    /// Extra details appended verbatim to the explanation.
    pub details: Vec<String>,
}

impl InsufficientSystemResources {
    /// A rejection of `requirer` for `resource`.
    pub fn new<R: Requirements + ?Sized>(
        requirer: &R,
        resource: ResourceKind,
        requested: Option<ResourceAmount>,
        available: Option<ResourceAmount>,
    ) -> Self {
        Self {
            job_name: requirer.job_name().map(str::to_owned),
            resource,
            requested,
            available,
            batch_system: None,
            source: None,
            details: Vec::new(),
        }
    }

    /// Name the batch system that rejected the request.
    #[must_use]
    pub fn with_batch_system(mut self, batch_system: impl Into<String>) -> Self {
        self.batch_system = Some(batch_system.into());
        self
    }

    /// Name the place the resource was to come from.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Append an extra detail line.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(detail.into());
        self
    }
}

impl fmt::Display for InsufficientSystemResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let resource = self.resource;
        let unit = if resource.is_bytes() { "bytes of " } else { "" };

        match &self.job_name {
            Some(name) => write!(f, "The job {name} is requesting ")?,
            None => f.write_str("Requesting ")?,
        }
        if let Some(requested) = &self.requested {
            write!(f, "{requested} {unit}{resource}")?;
        }
        if resource == ResourceKind::Disk {
            f.write_str(" for temporary space")?;
        }
        if let Some(available) = &self.available {
            write!(f, ", more than the maximum of {available} {unit}{resource}")?;
            if let (ResourceKind::Disk, Some(source)) = (resource, &self.source) {
                write!(f, " free on {source}")?;
            }
            let batch_system = self.batch_system.as_deref().unwrap_or("this batch system");
            write!(f, " that {batch_system} was configured with")?;
            if let Some(flag) = resource.ceiling_flag() {
                write!(f, ", or enforced by {flag}")?;
            }
        } else {
            f.write_str(", but that is not available")?;
        }
        f.write_str(".")?;

        if resource == ResourceKind::Disk {
            f.write_str(
                " Try setting/changing the \"--workDir\" option or changing the base \
                 temporary directory by setting TMPDIR.",
            )?;
        }
        for detail in &self.details {
            write!(f, " {detail}")?;
        }
        Ok(())
    }
}

impl std::error::Error for InsufficientSystemResources {}

/// Decides whether a backend can provide the accelerators a job requests.
///
/// Backends that have accelerators plug in their own implementation; the
/// default, [`NoAccelerators`], refuses every request.
pub trait AcceleratorCheck: Send + Sync {
    /// Reject `requirer` if its accelerator request cannot be met.
    ///
    /// # Errors
    ///
    /// An [`InsufficientSystemResources`] for [`ResourceKind::Accelerators`].
    fn check_accelerator_request(
        &self,
        requirer: &dyn Requirements,
    ) -> Result<(), InsufficientSystemResources>;
}

/// Accelerator hook for backends without accelerator support.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAccelerators;

impl AcceleratorCheck for NoAccelerators {
    fn check_accelerator_request(
        &self,
        requirer: &dyn Requirements,
    ) -> Result<(), InsufficientSystemResources> {
        let requested = requirer.accelerators();
        if requested.is_empty() {
            return Ok(());
        }
        Err(InsufficientSystemResources::new(
            requirer,
            ResourceKind::Accelerators,
            Some(ResourceAmount::Accelerators(requested.to_vec())),
            Some(ResourceAmount::Accelerators(Vec::new())),
        ))
    }
}

/// Accelerator hook for backends whose jobs may use a fixed set of devices.
///
/// A request passes when every requirement can be met by matching entries
/// of the inventory, counting each offered device once.
#[derive(Debug, Clone, Default)]
pub struct AcceleratorInventory {
    available: Vec<AcceleratorRequirement>,
}

impl AcceleratorInventory {
    /// Inventory of the given accelerators.
    #[must_use]
    pub const fn new(available: Vec<AcceleratorRequirement>) -> Self {
        Self { available }
    }

    /// The accelerators on offer.
    #[must_use]
    pub fn available(&self) -> &[AcceleratorRequirement] {
        &self.available
    }
}

impl AcceleratorCheck for AcceleratorInventory {
    fn check_accelerator_request(
        &self,
        requirer: &dyn Requirements,
    ) -> Result<(), InsufficientSystemResources> {
        let wanted = requirer.accelerators();
        if wanted.is_empty() {
            return Ok(());
        }
        let unmet = Assignment::new(wanted, &self.available).unmet();
        match unmet.and_then(|idx| wanted.get(idx)) {
            None => Ok(()),
            Some(short) => Err(InsufficientSystemResources::new(
                requirer,
                ResourceKind::Accelerators,
                Some(ResourceAmount::Accelerators(wanted.to_vec())),
                Some(ResourceAmount::Accelerators(self.available.clone())),
            )
            .with_detail(format!("No match for {short}."))),
        }
    }
}

/// Flow network from requirements to the inventory entries that serve them.
///
/// Node 0 is the source, then one node per requirement, one per offer, and
/// the sink last. A request fits exactly when the maximum flow saturates
/// every source edge.
struct Assignment {
    wanted: usize,
    capacity: Vec<Vec<u64>>,
}

impl Assignment {
    fn new(wanted: &[AcceleratorRequirement], offered: &[AcceleratorRequirement]) -> Self {
        let nodes = wanted.len() + offered.len() + 2;
        let sink = nodes - 1;
        let mut capacity = vec![vec![0_u64; nodes]; nodes];
        for (i, want) in wanted.iter().enumerate() {
            capacity[0][1 + i] = u64::from(want.count);
            for (j, offer) in offered.iter().enumerate() {
                if want.is_served_by(offer) {
                    capacity[1 + i][1 + wanted.len() + j] = u64::MAX;
                }
            }
        }
        for (j, offer) in offered.iter().enumerate() {
            capacity[1 + wanted.len() + j][sink] = u64::from(offer.count);
        }
        Self {
            wanted: wanted.len(),
            capacity,
        }
    }

    /// Index of the first requirement left short after a maximum flow.
    fn unmet(mut self) -> Option<usize> {
        while let Some(path) = self.augmenting_path() {
            let bottleneck = path
                .windows(2)
                .map(|edge| self.capacity[edge[0]][edge[1]])
                .min()
                .unwrap_or(0);
            for edge in path.windows(2) {
                self.capacity[edge[0]][edge[1]] -= bottleneck;
                self.capacity[edge[1]][edge[0]] =
                    self.capacity[edge[1]][edge[0]].saturating_add(bottleneck);
            }
        }
        (0..self.wanted).find(|i| self.capacity[0][1 + i] > 0)
    }

    /// Shortest source-to-sink path with spare capacity.
    fn augmenting_path(&self) -> Option<Vec<usize>> {
        let nodes = self.capacity.len();
        let sink = nodes - 1;
        let mut parent = vec![None; nodes];
        let mut queue = VecDeque::from([0]);
        parent[0] = Some(0);
        while let Some(node) = queue.pop_front() {
            for next in 0..nodes {
                if parent[next].is_none() && self.capacity[node][next] > 0 {
                    parent[next] = Some(node);
                    queue.push_back(next);
                }
            }
        }

        parent[sink]?;
        let mut path = vec![sink];
        let mut node = sink;
        while node != 0 {
            node = parent[node]?;
            path.push(node);
        }
        path.reverse();
        Some(path)
    }
}
