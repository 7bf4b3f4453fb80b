//! Resource Manager role-assignment scope classification.

use serde::{Deserialize, Serialize};
use tracing::warn;

const MANAGEMENT_GROUP_PREFIX: &str = "/providers/Microsoft.Management/managementGroups/";

/// Where a role assignment is attached in the ARM hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeBucket {
    Tenant,
    ManagementGroup,
    Subscription,
    ResourceGroup,
    Resource,
}

impl ScopeBucket {
    pub const ALL: [ScopeBucket; 5] = [
        ScopeBucket::Tenant,
        ScopeBucket::ManagementGroup,
        ScopeBucket::Subscription,
        ScopeBucket::ResourceGroup,
        ScopeBucket::Resource,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::ManagementGroup => "managementGroup",
            Self::Subscription => "subscription",
            Self::ResourceGroup => "resourceGroup",
            Self::Resource => "resource",
        }
    }
}

impl std::fmt::Display for ScopeBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a scope path. First match wins:
///
/// 1. `/providers/Microsoft.Management/managementGroups/...` is a management group.
/// 2. `/` or empty is the tenant root.
/// 3. Anything containing `/subscriptions/` is a subscription (two slashes),
///    a resource group (`/resourceGroups/` and four slashes) or a resource.
/// 4. Everything else falls back to resource, with a warning.
#[must_use]
pub fn classify_scope(scope: &str) -> ScopeBucket {
    if scope.starts_with(MANAGEMENT_GROUP_PREFIX) {
        return ScopeBucket::ManagementGroup;
    }
    if scope.is_empty() || scope == "/" {
        return ScopeBucket::Tenant;
    }
    if scope.contains("/subscriptions/") {
        let slashes = scope.matches('/').count();
        if slashes == 2 {
            return ScopeBucket::Subscription;
        }
        if scope.contains("/resourceGroups/") && slashes == 4 {
            return ScopeBucket::ResourceGroup;
        }
        return ScopeBucket::Resource;
    }
    warn!(scope = %scope, "Unrecognised role assignment scope, classifying as resource");
    ScopeBucket::Resource
}

/// Items partitioned into the five scope buckets.
#[derive(Debug)]
pub struct ScopeBuckets<T> {
    pub tenant: Vec<T>,
    pub management_group: Vec<T>,
    pub subscription: Vec<T>,
    pub resource_group: Vec<T>,
    pub resource: Vec<T>,
}

impl<T> Default for ScopeBuckets<T> {
    fn default() -> Self {
        Self {
            tenant: Vec::new(),
            management_group: Vec::new(),
            subscription: Vec::new(),
            resource_group: Vec::new(),
            resource: Vec::new(),
        }
    }
}

impl<T> ScopeBuckets<T> {
    /// Partitions `items` using an already-computed bucket per item.
    pub fn partition<I, F>(items: I, bucket_of: F) -> Self
    where
        I: IntoIterator<Item = T>,
        F: Fn(&T) -> ScopeBucket,
    {
        let mut buckets = Self::default();
        for item in items {
            let bucket = bucket_of(&item);
            buckets.bucket_mut(bucket).push(item);
        }
        buckets
    }

    #[must_use]
    pub fn bucket(&self, bucket: ScopeBucket) -> &[T] {
        match bucket {
            ScopeBucket::Tenant => &self.tenant,
            ScopeBucket::ManagementGroup => &self.management_group,
            ScopeBucket::Subscription => &self.subscription,
            ScopeBucket::ResourceGroup => &self.resource_group,
            ScopeBucket::Resource => &self.resource,
        }
    }

    fn bucket_mut(&mut self, bucket: ScopeBucket) -> &mut Vec<T> {
        match bucket {
            ScopeBucket::Tenant => &mut self.tenant,
            ScopeBucket::ManagementGroup => &mut self.management_group,
            ScopeBucket::Subscription => &mut self.subscription,
            ScopeBucket::ResourceGroup => &mut self.resource_group,
            ScopeBucket::Resource => &mut self.resource,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        ScopeBucket::ALL.iter().map(|b| self.bucket(*b).len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_root() {
        assert_eq!(classify_scope("/"), ScopeBucket::Tenant);
        assert_eq!(classify_scope(""), ScopeBucket::Tenant);
    }

    #[test]
    fn test_management_group() {
        assert_eq!(
            classify_scope("/providers/Microsoft.Management/managementGroups/mg1"),
            ScopeBucket::ManagementGroup
        );
    }

    #[test]
    fn test_subscription_and_resource_group() {
        assert_eq!(classify_scope("/subscriptions/s1"), ScopeBucket::Subscription);
        assert_eq!(
            classify_scope("/subscriptions/s1/resourceGroups/rg1"),
            ScopeBucket::ResourceGroup
        );
    }

    #[test]
    fn test_resource_under_resource_group() {
        assert_eq!(
            classify_scope(
                "/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1"
            ),
            ScopeBucket::Resource
        );
        assert_eq!(
            classify_scope("/subscriptions/abc/resourceGroups/rg/providers/Microsoft.Web/sites/x"),
            ScopeBucket::Resource
        );
    }

    #[test]
    fn test_subscription_level_provider_is_resource() {
        // Four slashes but no resource group segment.
        assert_eq!(
            classify_scope("/subscriptions/s1/providers/Microsoft.Security"),
            ScopeBucket::Resource
        );
    }

    #[test]
    fn test_trailing_slash_subscription_is_resource() {
        assert_eq!(classify_scope("/subscriptions/s1/"), ScopeBucket::Resource);
    }

    #[test]
    fn test_unrecognised_scope_falls_back_to_resource() {
        assert_eq!(classify_scope("garbage"), ScopeBucket::Resource);
        assert_eq!(
            classify_scope("/providers/Microsoft.Capacity"),
            ScopeBucket::Resource
        );
    }

    #[test]
    fn test_partition_is_total_and_disjoint() {
        let scopes = vec![
            "/",
            "/providers/Microsoft.Management/managementGroups/mg1",
            "/subscriptions/s1",
            "/subscriptions/s1/resourceGroups/rg1",
            "/subscriptions/s1/resourceGroups/rg1/providers/Microsoft.Storage/storageAccounts/sa1",
        ];
        let buckets = ScopeBuckets::partition(scopes.clone(), |s| classify_scope(s));

        for bucket in ScopeBucket::ALL {
            assert_eq!(buckets.bucket(bucket).len(), 1, "bucket {bucket}");
        }
        assert_eq!(buckets.len(), scopes.len());

        for (i, a) in ScopeBucket::ALL.iter().enumerate() {
            for b in ScopeBucket::ALL.iter().skip(i + 1) {
                for item in buckets.bucket(*a) {
                    assert!(!buckets.bucket(*b).contains(item));
                }
            }
        }
    }

    #[test]
    fn test_bucket_serializes_camel_case() {
        assert_eq!(
            serde_json::to_value(ScopeBucket::ManagementGroup).unwrap(),
            serde_json::json!("managementGroup")
        );
        assert_eq!(ScopeBucket::ResourceGroup.to_string(), "resourceGroup");
    }
}
