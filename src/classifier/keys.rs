use rand::{Rng, seq::IndexedRandom};
use std::{env, fmt, sync::Arc};
use tracing::{info, warn};

/// Numbered variables scanned in addition to the comma separated list.
const NUMBERED_KEY_PREFIX: &str = "GROQ_API_KEY_";
const MAX_NUMBERED_KEYS: usize = 6;

/// A classifier credential. Only the last four characters ever reach logs.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    pub fn new(secret: &str) -> Self {
        Self(Arc::from(secret))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn suffix(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let start = chars.len().saturating_sub(4);
        chars[start..].iter().collect()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey(...{})", self.suffix())
    }
}

/// Immutable set of interchangeable credentials. Selection is uniform random
/// per attempt, so concurrent callers need no shared cursor.
#[derive(Clone, Debug, Default)]
pub struct KeyPool {
    keys: Arc<[ApiKey]>,
}

impl KeyPool {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut keys: Vec<ApiKey> = Vec::new();
        for secret in secrets {
            let trimmed = secret.as_ref().trim();
            if trimmed.is_empty() || keys.iter().any(|key| key.expose() == trimmed) {
                continue;
            }
            keys.push(ApiKey::new(trimmed));
        }
        Self { keys: keys.into() }
    }

    /// Reads `CLASSIFIER_API_KEYS` (comma separated) and `GROQ_API_KEY_1..6`.
    pub fn from_env() -> Self {
        let listed = env::var("CLASSIFIER_API_KEYS").ok();
        let numbered =
            (1..=MAX_NUMBERED_KEYS).map(|n| env::var(format!("{NUMBERED_KEY_PREFIX}{n}")).ok());
        let pool = Self::from_sources(listed.as_deref(), numbered);
        if pool.is_empty() {
            warn!(
                target = "normalizer.classifier",
                "no classifier credentials configured; every classification will fail"
            );
        } else {
            info!(
                target = "normalizer.classifier",
                key_count = pool.len(),
                "loaded classifier credentials"
            );
        }
        pool
    }

    fn from_sources<I>(listed: Option<&str>, numbered: I) -> Self
    where
        I: IntoIterator<Item = Option<String>>,
    {
        let mut secrets: Vec<String> = listed
            .map(|raw| raw.split(',').map(str::to_string).collect())
            .unwrap_or_default();
        secrets.extend(numbered.into_iter().flatten());
        Self::new(secrets)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&ApiKey> {
        self.keys.choose(rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::SmallRng};
    use std::collections::HashSet;

    #[test]
    fn trims_and_dedups_secrets() {
        let pool = KeyPool::new([" gsk_a ", "", "gsk_b", "gsk_a"]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn merges_list_and_numbered_sources() {
        let pool = KeyPool::from_sources(
            Some("gsk_one,gsk_two"),
            vec![Some("gsk_three".to_string()), None, Some("gsk_one".into())],
        );
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn empty_pool_yields_no_key() {
        let pool = KeyPool::default();
        let mut rng = SmallRng::seed_from_u64(1);
        assert!(pool.pick(&mut rng).is_none());
    }

    #[test]
    fn random_pick_reaches_every_key() {
        let pool = KeyPool::new(["k1", "k2", "k3", "k4"]);
        let mut rng = SmallRng::seed_from_u64(7);
        let seen: HashSet<String> = (0..200)
            .filter_map(|_| pool.pick(&mut rng).map(|key| key.expose().to_string()))
            .collect();
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn debug_output_redacts_secret() {
        let key = ApiKey::new("gsk_supersecret_9xyz");
        assert_eq!(format!("{key:?}"), "ApiKey(...9xyz)");
        assert_eq!(ApiKey::new("ab").suffix(), "ab");
    }
}
