//! Re-reading live credentials from the cluster
//!
//! The engine never persists plaintext secrets; on upgrade or dependency
//! resolution it re-reads the instance's secret object from the cluster.
//! Secret names follow conventions rather than being recorded, tried in
//! canonical order. Recipes without secrets tolerate an empty result.

use crate::error::Result;
use crate::ops::ClusterOps;
use std::collections::BTreeMap;
use tracing::debug;

/// Candidate secret names for an instance, in lookup order
pub fn candidate_names(instance: &str) -> [String; 3] {
    [
        format!("{}-secret", instance),
        format!("{}-credentials", instance),
        instance.to_string(),
    ]
}

/// Read the live secret values for an instance.
///
/// Tries each canonical name in order and returns the first match; an empty
/// map when none exists.
pub async fn read_live(
    ops: &dyn ClusterOps,
    namespace: &str,
    instance: &str,
) -> Result<BTreeMap<String, String>> {
    for name in candidate_names(instance) {
        if let Some(values) = ops.secret_values(namespace, &name).await? {
            debug!(instance = %instance, secret = %name, "Read live secret");
            return Ok(values);
        }
    }
    Ok(BTreeMap::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeCluster;

    #[test]
    fn test_candidate_order() {
        let names = candidate_names("pg");
        assert_eq!(names[0], "pg-secret");
        assert_eq!(names[1], "pg-credentials");
        assert_eq!(names[2], "pg");
    }

    #[tokio::test]
    async fn test_read_live_first_convention_wins() {
        let fake = FakeCluster::new();
        fake.put_secret(
            "ws-1",
            "pg-secret",
            BTreeMap::from([("password".to_string(), "abc".to_string())]),
        );
        let values = read_live(&fake, "ws-1", "pg").await.unwrap();
        assert_eq!(values["password"], "abc");
    }

    #[tokio::test]
    async fn test_read_live_empty_when_absent() {
        let fake = FakeCluster::new();
        let values = read_live(&fake, "ws-1", "pg").await.unwrap();
        assert!(values.is_empty());
    }
}
