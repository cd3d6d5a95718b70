use super::backend::CacheBackend;
use crate::errors::CacheError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::time::{Duration, Instant};

pub struct LocalBackend {
    pub(crate) store: DashMap<String, (Vec<u8>, Option<Instant>)>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl CacheBackend for LocalBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(entry) = self.store.get(key) {
            let (val, expires_at) = entry.value();
            if let Some(exp) = expires_at
                && Instant::now() > *exp
            {
                drop(entry);
                self.store.remove(key);
                return Ok(None);
            }
            return Ok(Some(val.clone()));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<(), CacheError> {
        let expires_at = ttl.map(|d| Instant::now() + d);
        self.store
            .insert(key.to_string(), (value.to_vec(), expires_at));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &[u8], ttl: Option<Duration>) -> Result<bool, CacheError> {
        let now = Instant::now();
        let expires_at = ttl.map(|d| now + d);

        match self.store.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let (_, old_expires_at) = occupied.get();
                match old_expires_at {
                    Some(exp) if now >= *exp => {
                        occupied.insert((value.to_vec(), expires_at));
                        Ok(true)
                    }
                    _ => Ok(false),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert((value.to_vec(), expires_at));
                Ok(true)
            }
        }
    }

    async fn del(&self, key: &str) -> Result<(), CacheError> {
        self.store.remove(key);
        Ok(())
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }
}
