//! Resource accounting primitives shared by every subsystem.
//!
//! `ResourceInfo` is the unit of demand and supply (CPU millicores, memory
//! bytes, GPU count, plus free-form capability tags carried by requests).
//! `Capacity` is a provider's `total / used / available` triple, and
//! `ResourceTags` is the fixed capability bit-set a provider advertises.
//!
//! All numeric arithmetic is saturating and never goes below zero: a
//! misbehaving backend reporting `used > total` must not poison the
//! scheduler with negative availability.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A bundle of compute resources: a request's demand or a provider's supply.
///
/// `tags` is only meaningful on the request side; it names the capability
/// bits (see [`ResourceTags`]) the chosen provider must have.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// CPU demand/supply in millicores (1000 = one full core).
    #[serde(default)]
    pub cpu_millicores: i64,
    /// Memory demand/supply in bytes.
    #[serde(default)]
    pub memory_bytes: i64,
    /// Number of GPUs.
    #[serde(default)]
    pub gpu_count: i64,
    /// Capability tags the request requires (e.g. `"gpu"`, `"camera"`).
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

impl ResourceInfo {
    /// A zero request. Matches any connected provider whose tags cover it.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Numeric-only constructor, no tags.
    pub fn new(cpu_millicores: i64, memory_bytes: i64, gpu_count: i64) -> Self {
        Self {
            cpu_millicores,
            memory_bytes,
            gpu_count,
            tags: BTreeSet::new(),
        }
    }

    /// Add a required capability tag, builder-style.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Component-wise saturating addition. Tag sets are unioned.
    pub fn saturating_add(&self, other: &ResourceInfo) -> ResourceInfo {
        ResourceInfo {
            cpu_millicores: self.cpu_millicores.saturating_add(other.cpu_millicores),
            memory_bytes: self.memory_bytes.saturating_add(other.memory_bytes),
            gpu_count: self.gpu_count.saturating_add(other.gpu_count),
            tags: self.tags.union(&other.tags).cloned().collect(),
        }
    }

    /// Component-wise subtraction clamped at zero. Tags of `self` are kept.
    pub fn saturating_sub(&self, other: &ResourceInfo) -> ResourceInfo {
        ResourceInfo {
            cpu_millicores: (self.cpu_millicores - other.cpu_millicores).max(0),
            memory_bytes: (self.memory_bytes - other.memory_bytes).max(0),
            gpu_count: (self.gpu_count - other.gpu_count).max(0),
            tags: self.tags.clone(),
        }
    }

    /// Whether this request fits inside `available`.
    ///
    /// Integer comparison on each axis; a request with `gpu_count = 0`
    /// matches any supply including zero GPUs.
    pub fn fits_within(&self, available: &ResourceInfo) -> bool {
        self.cpu_millicores <= available.cpu_millicores
            && self.memory_bytes <= available.memory_bytes
            && self.gpu_count <= available.gpu_count
    }

    /// Clamp every axis at zero. Backends can report negative numbers on
    /// the wire; they must not survive past this boundary.
    pub fn clamped(&self) -> ResourceInfo {
        ResourceInfo {
            cpu_millicores: self.cpu_millicores.max(0),
            memory_bytes: self.memory_bytes.max(0),
            gpu_count: self.gpu_count.max(0),
            tags: self.tags.clone(),
        }
    }

    /// True when every numeric axis is zero.
    pub fn is_zero(&self) -> bool {
        self.cpu_millicores == 0 && self.memory_bytes == 0 && self.gpu_count == 0
    }
}

impl fmt::Display for ResourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cpu={}m mem={}B gpu={}",
            self.cpu_millicores, self.memory_bytes, self.gpu_count
        )?;
        if !self.tags.is_empty() {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            write!(f, " tags=[{}]", tags.join(","))?;
        }
        Ok(())
    }
}

/// A provider's capacity triple.
///
/// Invariant maintained by [`Capacity::normalized`]:
/// `available = total − used` (saturating) and `available ≥ 0`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capacity {
    pub total: ResourceInfo,
    pub used: ResourceInfo,
    pub available: ResourceInfo,
}

impl Capacity {
    /// Build a capacity from total and used, deriving `available`.
    pub fn from_total_used(total: ResourceInfo, used: ResourceInfo) -> Self {
        let total = total.clamped();
        let used = used.clamped();
        let available = total.saturating_sub(&used);
        Self {
            total,
            used,
            available,
        }
    }

    /// Re-derive `available` from `total − used`, clamping negatives.
    ///
    /// Applied to every capacity received from a backend or a gossip peer
    /// so the rest of the system never observes a violated invariant.
    pub fn normalized(&self) -> Capacity {
        Capacity::from_total_used(self.total.clone(), self.used.clone())
    }

    /// Sum two capacities axis-by-axis (used for node-level aggregates).
    pub fn merged(&self, other: &Capacity) -> Capacity {
        Capacity::from_total_used(
            self.total.saturating_add(&other.total),
            self.used.saturating_add(&other.used),
        )
    }
}

/// Capability bits a provider advertises.
///
/// A request's tag set must name only bits that are `true` here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTags {
    #[serde(default)]
    pub cpu: bool,
    #[serde(default)]
    pub gpu: bool,
    #[serde(default)]
    pub memory: bool,
    #[serde(default)]
    pub camera: bool,
}

impl ResourceTags {
    /// Whether every requested tag names a bit that is set.
    ///
    /// An empty request matches any provider. An unknown tag name never
    /// matches, since it cannot be satisfied by any provider.
    pub fn covers(&self, requested: &BTreeSet<String>) -> bool {
        requested.iter().all(|tag| match tag.as_str() {
            "cpu" => self.cpu,
            "gpu" => self.gpu,
            "memory" => self.memory,
            "camera" => self.camera,
            _ => false,
        })
    }

    /// Bitwise OR, used when aggregating a node's providers for gossip.
    pub fn union(&self, other: &ResourceTags) -> ResourceTags {
        ResourceTags {
            cpu: self.cpu || other.cpu,
            gpu: self.gpu || other.gpu,
            memory: self.memory || other.memory,
            camera: self.camera || other.camera,
        }
    }

    /// The set-of-strings view (diagnostics and logging).
    pub fn as_set(&self) -> BTreeSet<String> {
        let mut set = BTreeSet::new();
        if self.cpu {
            set.insert("cpu".to_string());
        }
        if self.gpu {
            set.insert("gpu".to_string());
        }
        if self.memory {
            set.insert("memory".to_string());
        }
        if self.camera {
            set.insert("camera".to_string());
        }
        set
    }
}

impl fmt::Display for ResourceTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tags: Vec<String> = self.as_set().into_iter().collect();
        write!(f, "{{{}}}", tags.join(","))
    }
}

/// Runtime language of a deployable component.
///
/// The backend selects its container image from this value; the scheduler
/// only checks provider support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    Unknown,
    Python,
    Go,
    Unikernel,
}

impl Default for Language {
    fn default() -> Self {
        Language::Unknown
    }
}

impl Language {
    /// Language-support rule:
    /// - `Unknown` in a request is a wildcard and matches any provider
    ///   that supports at least one language;
    /// - an empty supported list means the provider supports nothing.
    pub fn supported_by(&self, supported: &[Language]) -> bool {
        if supported.is_empty() {
            return false;
        }
        match self {
            Language::Unknown => true,
            lang => supported.contains(lang),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::Unknown => "UNKNOWN",
            Language::Python => "PYTHON",
            Language::Go => "GO",
            Language::Unikernel => "UNIKERNEL",
        };
        write!(f, "{}", s)
    }
}
