//! Administrative placeholder providers.
//!
//! A fake provider occupies a slot in the registry and contributes fixed
//! numbers to aggregate capacity reports, but the scheduler never selects
//! it and it rejects every workload operation. Operators use fakes to
//! reserve names and to demo listings before real hardware arrives.

use crate::error::{IarnetError, Result};
use crate::provider::{ProviderSnapshot, ProviderStatus};
use crate::resources::{Capacity, Language, ResourceTags};
use time::OffsetDateTime;

pub struct FakeProvider {
    id: String,
    name: String,
    capacity: Capacity,
    tags: ResourceTags,
    created_at: OffsetDateTime,
}

impl FakeProvider {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        capacity: Capacity,
        tags: ResourceTags,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            capacity: capacity.normalized(),
            tags,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Placeholders are always "connected": there is no channel to lose.
    pub fn status(&self) -> ProviderStatus {
        ProviderStatus::Connected
    }

    /// Fixed capacity, normalized once at construction.
    pub fn capacity(&self) -> Capacity {
        self.capacity.clone()
    }

    pub fn tags(&self) -> ResourceTags {
        self.tags
    }

    /// Placeholders advertise no runtime support at all.
    pub fn supported_languages(&self) -> Vec<Language> {
        Vec::new()
    }

    /// Uniform refusal for Deploy/Undeploy.
    pub fn reject_workload(&self) -> Result<()> {
        Err(IarnetError::FakeProvider {
            provider_id: self.id.clone(),
        })
    }

    pub fn snapshot(&self) -> ProviderSnapshot {
        ProviderSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            host: None,
            port: None,
            provider_type: "placeholder".to_string(),
            is_fake: true,
            status: ProviderStatus::Connected,
            supported_languages: Vec::new(),
            capacity: Some(self.capacity.clone()),
            tags: Some(self.tags),
            last_update: self.created_at.unix_timestamp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ResourceInfo;

    fn fake() -> FakeProvider {
        FakeProvider::new(
            "fake-1",
            "showroom",
            Capacity::from_total_used(ResourceInfo::new(8000, 1 << 33, 1), ResourceInfo::zero()),
            ResourceTags {
                cpu: true,
                gpu: true,
                memory: true,
                camera: false,
            },
        )
    }

    #[test]
    fn workload_operations_are_rejected() {
        let err = fake().reject_workload().unwrap_err();
        assert!(matches!(err, IarnetError::FakeProvider { .. }));
    }

    #[test]
    fn reports_fixed_capacity_and_connected_status() {
        let f = fake();
        assert_eq!(f.status(), ProviderStatus::Connected);
        assert_eq!(f.capacity().available.cpu_millicores, 8000);
    }

    #[test]
    fn snapshot_is_flagged_fake() {
        let snap = fake().snapshot();
        assert!(snap.is_fake);
        assert!(snap.host.is_none());
        assert_eq!(snap.provider_type, "placeholder");
    }
}
