use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Identity of a subscription: channel plus optional instrument key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub channel: String,
    pub instrument_key: Option<String>,
}

impl SubscriptionKey {
    pub fn new(channel: impl Into<String>, instrument_key: Option<String>) -> Self {
        Self {
            channel: channel.into(),
            instrument_key,
        }
    }
}

impl std::fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.instrument_key {
            Some(key) => write!(f, "{}:{}", self.channel, key),
            None => f.write_str(&self.channel),
        }
    }
}

/// A desired subscription, as sent to the venue.
///
/// `raw_args` holds every argument field other than `channel`; the
/// instrument key is duplicated there under the venue's field name.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionDescriptor {
    pub channel: String,
    pub instrument_key: Option<String>,
    pub raw_args: Map<String, Value>,
}

impl SubscriptionDescriptor {
    pub fn new(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            instrument_key: None,
            raw_args: Map::new(),
        }
    }

    /// Set the instrument key, sent under `field` (e.g. `instId`)
    pub fn instrument(mut self, field: &str, key: impl Into<String>) -> Self {
        let key = key.into();
        self.raw_args
            .insert(field.to_string(), Value::String(key.clone()));
        self.instrument_key = Some(key);
        self
    }

    /// Add an extra argument that is not part of the identity
    pub fn with_arg(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.raw_args.insert(name.to_string(), value.into());
        self
    }

    pub fn identity(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.channel.clone(), self.instrument_key.clone())
    }

    /// The argument object: `{"channel": ..., ...raw_args}`
    pub fn to_arg(&self) -> Value {
        let mut arg = Map::with_capacity(self.raw_args.len() + 1);
        arg.insert("channel".to_string(), Value::String(self.channel.clone()));
        for (name, value) in &self.raw_args {
            arg.insert(name.clone(), value.clone());
        }
        Value::Object(arg)
    }
}

/// Thread-safe record of what the client wants to be subscribed to.
///
/// Outlives any single connection; the socket session replays it on every
/// connect. Every operation takes the lock briefly and never across I/O.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<HashMap<SubscriptionKey, SubscriptionDescriptor>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<SubscriptionKey, SubscriptionDescriptor>> {
        // The map is always left consistent, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a subscription, replacing any with the same identity.
    /// Returns `true` when the identity was not present before.
    pub fn add(&self, descriptor: SubscriptionDescriptor) -> bool {
        let key = descriptor.identity();
        let replaced = self.lock().insert(key.clone(), descriptor).is_some();
        debug!(subscription = %key, replaced, "Registered subscription");
        !replaced
    }

    pub fn remove(&self, key: &SubscriptionKey) -> Option<SubscriptionDescriptor> {
        let removed = self.lock().remove(key);
        debug!(subscription = %key, found = removed.is_some(), "Removed subscription");
        removed
    }

    /// Snapshot of every descriptor; the lock is released before returning.
    pub fn all(&self) -> Vec<SubscriptionDescriptor> {
        self.lock().values().cloned().collect()
    }

    pub fn get(&self, key: &SubscriptionKey) -> Option<SubscriptionDescriptor> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &SubscriptionKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn trades(inst: &str) -> SubscriptionDescriptor {
        SubscriptionDescriptor::new("trades").instrument("instId", inst)
    }

    #[test]
    fn test_same_identity_overwrites() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.add(trades("BTC-USDT")));
        assert!(!registry.add(trades("BTC-USDT").with_arg("extra", "x")));

        let all = registry.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].raw_args["extra"], "x");
    }

    #[test]
    fn test_add_n_remove_one() {
        let registry = SubscriptionRegistry::new();
        for inst in ["BTC-USDT", "ETH-USDT", "SOL-USDT", "OKB-USDT"] {
            registry.add(trades(inst));
        }
        registry.add(SubscriptionDescriptor::new("status"));

        let removed = registry.remove(&SubscriptionKey::new("trades", Some("ETH-USDT".to_string())));
        assert!(removed.is_some());
        assert_eq!(registry.all().len(), 4);
        assert!(!registry.contains(&trades("ETH-USDT").identity()));
        assert!(registry.contains(&SubscriptionKey::new("status", None)));
    }

    #[test]
    fn test_remove_missing_is_none() {
        let registry = SubscriptionRegistry::new();
        assert!(registry.remove(&SubscriptionKey::new("books", None)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_channel_and_instrument_both_form_identity() {
        let registry = SubscriptionRegistry::new();
        registry.add(trades("BTC-USDT"));
        registry.add(SubscriptionDescriptor::new("books").instrument("instId", "BTC-USDT"));
        registry.add(SubscriptionDescriptor::new("trades"));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_concurrent_adders_never_lose_updates() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    for i in 0..250 {
                        registry.add(trades(&format!("INST-{}-{}", t, i)));
                        // Overlapping identities from every thread.
                        registry.add(trades(&format!("SHARED-{}", i % 10)));
                    }
                })
            })
            .collect();

        for handle in threads {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 8 * 250 + 10);
    }

    #[test]
    fn test_to_arg_and_display() {
        let desc = SubscriptionDescriptor::new("books")
            .instrument("instId", "BTC-USDT")
            .with_arg("instType", "SPOT");
        let arg = desc.to_arg();
        assert_eq!(arg["channel"], "books");
        assert_eq!(arg["instId"], "BTC-USDT");
        assert_eq!(arg["instType"], "SPOT");
        assert_eq!(desc.identity().to_string(), "books:BTC-USDT");
        assert_eq!(SubscriptionKey::new("status", None).to_string(), "status");
    }
}
