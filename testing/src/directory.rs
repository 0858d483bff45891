//! Static recipient directory.

use herald_core::broadcast::TargetType;
use herald_core::directory::{DirectoryError, DirectoryFuture, RecipientDirectory};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    population: Vec<String>,
    roles: HashMap<String, Vec<String>>,
    unavailable: bool,
}

/// A directory with a fixed population and role map, plus an outage switch
/// for exercising the external-unavailable path.
#[derive(Clone, Default)]
pub struct StaticDirectory {
    inner: Arc<Mutex<Inner>>,
}

impl StaticDirectory {
    /// A directory whose `ALL` expands to `population`.
    #[must_use]
    pub fn with_population<I, S>(population: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directory = Self::default();
        if let Ok(mut inner) = directory.inner.lock() {
            inner.population = population.into_iter().map(Into::into).collect();
        }
        directory
    }

    /// Define a role's members.
    pub fn add_role<I, S>(&self, role: &str, members: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Ok(mut inner) = self.inner.lock() {
            inner
                .roles
                .insert(role.to_string(), members.into_iter().map(Into::into).collect());
        }
    }

    /// Simulate (or heal) a directory outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.unavailable = unavailable;
        }
    }
}

impl RecipientDirectory for StaticDirectory {
    fn resolve(
        &self,
        target_type: TargetType,
        target_ids: &[String],
    ) -> DirectoryFuture<'_, Vec<String>> {
        let target_ids: Vec<String> = target_ids.to_vec();
        Box::pin(async move {
            let inner = self
                .inner
                .lock()
                .map_err(|_| DirectoryError::Unavailable("directory lock poisoned".into()))?;
            if inner.unavailable {
                return Err(DirectoryError::Unavailable("injected outage".into()));
            }
            match target_type {
                TargetType::All => Ok(inner.population.clone()),
                TargetType::Selected => Ok(target_ids),
                TargetType::Role => {
                    let mut members: Vec<String> = target_ids
                        .iter()
                        .filter_map(|role| inner.roles.get(role))
                        .flatten()
                        .cloned()
                        .collect();
                    members.sort();
                    members.dedup();
                    Ok(members)
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_each_target_type() {
        let directory = StaticDirectory::with_population(["u1", "u2", "u3"]);
        directory.add_role("ops", ["u2", "u3"]);

        let all = directory.resolve(TargetType::All, &[]).await.expect("all");
        assert_eq!(all, vec!["u1", "u2", "u3"]);

        let selected = directory
            .resolve(TargetType::Selected, &["u9".to_string()])
            .await
            .expect("selected");
        assert_eq!(selected, vec!["u9"]);

        let role = directory
            .resolve(TargetType::Role, &["ops".to_string()])
            .await
            .expect("role");
        assert_eq!(role, vec!["u2", "u3"]);
    }

    #[tokio::test]
    async fn outage_is_a_distinct_error() {
        let directory = StaticDirectory::with_population(["u1"]);
        directory.set_unavailable(true);
        let err = directory.resolve(TargetType::All, &[]).await;
        assert!(matches!(err, Err(DirectoryError::Unavailable(_))));
    }
}
